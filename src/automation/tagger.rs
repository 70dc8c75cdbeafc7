use super::job_log::{log_job, JobLog};
use super::llm::{Completer, CompletionRequest};
use super::settings::TaggerSettings;
use super::{Job, JobReport, JobStatus};
use crate::category::get_categories;
use crate::keyword::link_keywords;
use crate::orm::{categories, posts};
use crate::post::PostStatus;
use anyhow::{anyhow, Result};
use chrono::prelude::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{entity::*, query::*, ConnectionTrait, TransactionTrait};
use serde::Deserialize;

const UNTAGGED_CANDIDATES: u64 = 10;
pub const MAX_KEYWORDS: usize = 5;

static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]+\}").expect("valid regex"));

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Tagging {
    #[serde(default)]
    pub category_id: Option<i32>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Parses the first `{...}` block of a model reply.
pub fn parse_tagging(reply: &str) -> Option<Tagging> {
    let block = JSON_BLOCK.find(reply)?;
    let mut tagging: Tagging = serde_json::from_str(block.as_str()).ok()?;
    tagging.keywords.truncate(MAX_KEYWORDS);
    Some(tagging)
}

pub fn tagging_prompt(post: &posts::Model, categories: &[categories::Model]) -> String {
    let category_list = categories
        .iter()
        .map(|c| format!("{}: {}", c.id, c.name))
        .collect::<Vec<String>>()
        .join("\n");

    format!(
        "以下の投稿内容を分析して、最適なカテゴリ1つとキーワード最大5つを抽出してください。\n\n【投稿タイトル】\n{}\n\n【投稿内容】\n{}\n\n【利用可能なカテゴリ】\n{}\n\n以下のJSON形式で出力してください：\n{{\n  \"category_id\": カテゴリID（数値、最も適切なもの1つ）,\n  \"keywords\": [\"キーワード1\", \"キーワード2\", ...] （最大5つ、日本語）\n}}",
        post.title, post.content, category_list
    )
}

async fn tag_post<C>(
    db: &C,
    completer: &dyn Completer,
    post: &posts::Model,
    categories: &[categories::Model],
) -> Result<Tagging>
where
    C: ConnectionTrait + TransactionTrait,
{
    let reply = completer
        .complete(CompletionRequest::new(tagging_prompt(post, categories)))
        .await?;
    let tagging = parse_tagging(&reply).ok_or_else(|| anyhow!("unparseable reply: {}", reply))?;

    let now = Utc::now().naive_utc();
    let mut update = posts::ActiveModel {
        id: Set(post.id),
        ai_tagged: Set(true),
        ai_tagged_at: Set(Some(now)),
        ..Default::default()
    };
    if let Some(category_id) = tagging.category_id.filter(|id| categories.iter().any(|c| c.id == *id)) {
        update.category_id = Set(Some(category_id));
    }

    let txn = db.begin().await?;
    update.update(&txn).await?;
    link_keywords(&txn, post.id, &tagging.keywords, MAX_KEYWORDS).await?;
    txn.commit().await?;

    Ok(tagging)
}

/// Categorises and keywords the newest untagged posts. A failure on one post does not stop the rest.
pub async fn run<C>(db: &C, completer: &dyn Completer, settings: &TaggerSettings) -> Result<JobReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let untagged = posts::Entity::find()
        .filter(posts::Column::Status.eq(PostStatus::Published))
        .filter(posts::Column::AiTagged.eq(false))
        .order_by_desc(posts::Column::CreatedAt)
        .limit(UNTAGGED_CANDIDATES)
        .all(db)
        .await?;
    if untagged.is_empty() {
        return Ok(JobReport::Skipped("タグ付け対象の投稿がありません".to_owned()));
    }

    let categories = get_categories(db).await?;
    let mut tagged = Vec::new();
    let mut failed = Vec::new();

    for post in untagged.iter().take(settings.posts_per_run) {
        match tag_post(db, completer, post, &categories).await {
            Ok(tagging) => {
                log_job(
                    db,
                    Job::AutoTagger,
                    JobStatus::Success,
                    JobLog::message(format!(
                        "カテゴリ: {:?} / キーワード: {}",
                        tagging.category_id,
                        tagging.keywords.join(", ")
                    ))
                    .post(post.id),
                )
                .await;
                tagged.push(post.id);
            }
            Err(e) => {
                log::warn!("auto_tagger: post {} failed: {:#}", post.id, e);
                log_job(db, Job::AutoTagger, JobStatus::Error, JobLog::error(format!("{:#}", e)).post(post.id)).await;
                failed.push(post.id);
            }
        }
    }

    Ok(JobReport::Completed(serde_json::json!({
        "tagged": tagged,
        "failed": failed,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagging_from_prose() {
        let reply = "分析結果です。\n{\n  \"category_id\": 12,\n  \"keywords\": [\"円安\", \"為替\"]\n}\n以上です。";
        assert_eq!(
            parse_tagging(reply),
            Some(Tagging {
                category_id: Some(12),
                keywords: vec!["円安".to_owned(), "為替".to_owned()],
            })
        );
    }

    #[test]
    fn test_parse_tagging_caps_keywords() {
        let reply = r#"{"category_id": 1, "keywords": ["a","b","c","d","e","f","g"]}"#;
        assert_eq!(parse_tagging(reply).map(|t| t.keywords.len()), Some(MAX_KEYWORDS));
    }

    #[test]
    fn test_parse_tagging_rejects_garbage() {
        assert_eq!(parse_tagging("カテゴリはニュースです"), None);
        assert_eq!(parse_tagging("{not json}"), None);
    }

    #[test]
    fn test_parse_tagging_missing_fields() {
        assert_eq!(parse_tagging(r#"{"keywords": []}"#), Some(Tagging::default()));
    }
}
