use super::job_log::{log_job, JobLog};
use super::llm::{Completer, CompletionRequest};
use super::schedule::{in_blackout, local_hour};
use super::settings::CreatorSettings;
use super::{Job, JobReport, JobStatus};
use crate::category::{match_category, FALLBACK_CATEGORY};
use crate::global::get_site_offset;
use crate::keyword::link_keywords;
use crate::orm::auto_creator_processed;
use crate::post::{insert_post, ValidPost};
use crate::ugc::clean_image_url;
use crate::user::pick_automation_user;
use anyhow::{Context, Result};
use chrono::prelude::Utc;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{entity::*, query::*, ConnectionTrait, TransactionTrait};
use serde::Deserialize;

pub const MAX_CHOICES: usize = 4;
/// Post bodies are cut to this many characters of the article description.
pub const CONTENT_CHARS: usize = 200;
const PROMPT_ARTICLE_CHARS: usize = 1000;

const DEFAULT_TITLE_PROMPT: &str = "ニュース記事をもとに、読者の意見を聞くアンケートの質問文を1つだけ作成してください。質問文のみを出力してください。";
const DEFAULT_CHOICES_PROMPT: &str =
    "質問に対するアンケートの選択肢を2〜4個作成してください。1行に1つずつ、選択肢のみを出力してください。";
const CATEGORY_LIST: &str = "アニメ・漫画, エンタメ, お受験, クレカ・電子マネー, ゲーム, ジャニーズ, ニュース・話題, ファッション, ペット, 住まい・不動産, 保険, 医療費, 婚活・結婚, 就職・転職, 恋愛, 投資・貯蓄, 整形・脱毛, 料理・グルメ, 旅行・ホテル, 税金・年金";

static CHOICE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-•\d.)\s]+").expect("valid regex"));
static CATEGORY_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"カテゴリ[：:]\s*(.+)").expect("valid regex"));
static KEYWORD_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"キーワード[：:]\s*(.+)").expect("valid regex"));
static LIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,、]").expect("valid regex"));

/// A scraped article handed to the creator.
#[derive(Clone, Debug, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub content: String,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnkeDraft {
    pub title: String,
    pub choices: Vec<String>,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// `posts.title` is VARCHAR(255).
const TITLE_MAX_CHARS: usize = 255;

/// Strips quotes from a generated title and fits it to the column.
/// An empty result falls back to the article title.
pub fn clean_title(generated: &str, fallback: &str) -> String {
    let title = generated
        .trim()
        .trim_matches(|c| matches!(c, '「' | '」' | '『' | '』' | '"'))
        .trim();
    let title = if title.is_empty() { fallback.trim() } else { title };
    truncate_chars(title, TITLE_MAX_CHARS)
}

/// One choice per line with bullets and numbering removed. Fewer than two falls back to a stock set.
pub fn parse_choices(text: &str) -> Vec<String> {
    let choices: Vec<String> = text
        .lines()
        .map(|line| CHOICE_PREFIX.replace(line.trim(), "").trim().to_owned())
        .filter(|choice| !choice.is_empty())
        .take(MAX_CHOICES)
        .collect();

    if choices.len() >= 2 {
        choices
    } else {
        vec!["賛成".to_owned(), "反対".to_owned(), "どちらでもない".to_owned()]
    }
}

/// Items of a labelled line such as `カテゴリ: a, b`. None when the line is absent.
fn parse_labeled(text: &str, label: &Regex, max: usize) -> Option<Vec<String>> {
    let caps = label.captures(text)?;
    let items = caps.get(1)?.as_str();
    Some(
        LIST_SEPARATOR
            .split(items)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .take(max)
            .map(str::to_owned)
            .collect(),
    )
}

pub fn parse_categories(text: &str, max: usize) -> Vec<String> {
    parse_labeled(text, &CATEGORY_LINE, max).unwrap_or_else(|| vec![FALLBACK_CATEGORY.to_owned()])
}

pub fn parse_keywords(text: &str, max: usize) -> Vec<String> {
    parse_labeled(text, &KEYWORD_LINE, max).unwrap_or_default()
}

/// Asks the model for a question, its choices and the category/keyword extraction.
pub async fn draft_anke(completer: &dyn Completer, article: &Article, settings: &CreatorSettings) -> Result<AnkeDraft> {
    let excerpt = truncate_chars(&article.content, PROMPT_ARTICLE_CHARS);

    let title = completer
        .complete(
            CompletionRequest::new(format!("記事タイトル: {}\n\n記事内容: {}", article.title, excerpt))
                .system(settings.title_prompt.as_deref().unwrap_or(DEFAULT_TITLE_PROMPT))
                .max_tokens(100),
        )
        .await
        .context("title generation failed")?;
    let title = clean_title(&title, &article.title);

    let choices_text = completer
        .complete(
            CompletionRequest::new(format!("質問: {}\n\n記事内容: {}", title, excerpt))
                .system(settings.choices_prompt.as_deref().unwrap_or(DEFAULT_CHOICES_PROMPT))
                .max_tokens(200),
        )
        .await
        .context("choice generation failed")?;

    let extract_text = completer
        .complete(
            CompletionRequest::new(format!("記事タイトル: {}\n\n記事内容: {}", article.title, excerpt))
                .system(format!(
                    "記事から適切なカテゴリ（最大{}個）とキーワード（最大{}個）を抽出してください。\nカテゴリは以下から選択: {}\nキーワードは記事の重要な固有名詞や話題を抽出してください。\n\n出力形式:\nカテゴリ: カテゴリ1, カテゴリ2\nキーワード: キーワード1, キーワード2, キーワード3",
                    settings.max_categories, settings.max_keywords, CATEGORY_LIST
                ))
                .temperature(0.5)
                .max_tokens(150),
        )
        .await
        .context("category extraction failed")?;

    Ok(AnkeDraft {
        title,
        choices: parse_choices(&choices_text),
        categories: parse_categories(&extract_text, settings.max_categories),
        keywords: parse_keywords(&extract_text, settings.max_keywords),
    })
}

async fn is_processed<C: ConnectionTrait>(db: &C, link: &str) -> Result<bool> {
    Ok(auto_creator_processed::Entity::find()
        .filter(auto_creator_processed::Column::ArticleUrl.eq(link))
        .count(db)
        .await?
        > 0)
}

/// Builds the post body from the article description, or its title when there is none.
pub fn post_content(article: &Article) -> String {
    let description = article.content.trim();
    let source = if description.is_empty() {
        article.title.trim()
    } else {
        description
    };
    truncate_chars(source, CONTENT_CHARS)
}

/// Creates one poll post from the first unprocessed article.
pub async fn run<C>(
    db: &C,
    completer: &dyn Completer,
    settings: &CreatorSettings,
    input: super::CronRequest,
    now: NaiveDateTime,
) -> Result<JobReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    if in_blackout(
        local_hour(now, get_site_offset()),
        settings.blackout_start,
        settings.blackout_end,
    ) {
        return Ok(JobReport::Skipped("作成しない時間帯です".to_owned()));
    }

    let mut article = None;
    for candidate in input.articles.into_iter().filter(|a| !a.link.trim().is_empty()) {
        if !is_processed(db, &candidate.link).await? {
            article = Some(candidate);
            break;
        }
    }
    let article = match article {
        Some(article) => article,
        None => {
            log_job(db, Job::AutoCreator, JobStatus::Failed, JobLog::error("未処理の記事がありません")).await;
            return Ok(JobReport::Skipped("未処理の記事がありません".to_owned()));
        }
    };

    match create_from_article(db, completer, settings, &article, input.source_url).await {
        Ok(post_id) => {
            log_job(
                db,
                Job::AutoCreator,
                JobStatus::Success,
                JobLog::message(format!("記事「{}」からアンケートを作成しました", article.title)).post(post_id),
            )
            .await;
            Ok(JobReport::Completed(serde_json::json!({
                "post_id": post_id,
                "article_url": article.link,
            })))
        }
        Err(e) => {
            log_job(
                db,
                Job::AutoCreator,
                JobStatus::Error,
                JobLog::error(format!("{}: {:#}", article.link, e)),
            )
            .await;
            Err(e)
        }
    }
}

async fn create_from_article<C>(
    db: &C,
    completer: &dyn Completer,
    settings: &CreatorSettings,
    article: &Article,
    source_url: Option<String>,
) -> Result<i32>
where
    C: ConnectionTrait + TransactionTrait,
{
    let draft = draft_anke(completer, article, settings).await?;
    let questioner = pick_automation_user(db, settings.ai_user_probability).await?;

    let category_id = match draft.categories.first() {
        Some(name) => match_category(db, name).await?.map(|c| c.id),
        None => None,
    };

    let post = ValidPost {
        title: draft.title,
        content: post_content(article),
        category_id,
        choices: draft.choices,
        multi: false,
        random: false,
        image: clean_image_url(article.image.to_owned()),
        close_at: None,
        workid: None,
    };

    let txn = db.begin().await?;
    let created = insert_post(&txn, questioner.id, &post, Some(article.link.to_owned()), true).await?;
    link_keywords(&txn, created.id, &draft.keywords, settings.max_keywords).await?;
    auto_creator_processed::ActiveModel {
        source_url: Set(source_url),
        article_url: Set(article.link.to_owned()),
        article_title: Set(article.title.to_owned()),
        post_id: Set(Some(created.id)),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    log::info!(
        "auto_creator: post {} by user {} from {}",
        created.id,
        questioner.id,
        article.link
    );
    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::llm::ScriptedCompleter;

    fn article(content: &str) -> Article {
        Article {
            title: "円安が進行".to_owned(),
            link: "https://news.example/1".to_owned(),
            content: content.to_owned(),
            image: None,
        }
    }

    #[test]
    fn test_parse_choices_strips_bullets() {
        let text = "1. 賛成\n2) 反対\n- わからない\n• その他\n5. 多すぎ";
        assert_eq!(parse_choices(text), vec!["賛成", "反対", "わからない", "その他"]);
    }

    #[test]
    fn test_parse_choices_fallback() {
        assert_eq!(parse_choices("1. ひとつだけ"), vec!["賛成", "反対", "どちらでもない"]);
        assert_eq!(parse_choices(""), vec!["賛成", "反対", "どちらでもない"]);
    }

    #[test]
    fn test_parse_categories_and_keywords() {
        let text = "カテゴリ: ニュース・話題、投資・貯蓄\nキーワード：円安, 日銀, 為替, 物価";
        assert_eq!(parse_categories(text, 1), vec!["ニュース・話題"]);
        assert_eq!(parse_keywords(text, 3), vec!["円安", "日銀", "為替"]);
    }

    #[test]
    fn test_missing_lines() {
        assert_eq!(parse_categories("なし", 2), vec![FALLBACK_CATEGORY]);
        assert!(parse_keywords("なし", 3).is_empty());
    }

    #[test]
    fn test_post_content() {
        assert_eq!(post_content(&article("")), "円安が進行");
        let long = "あ".repeat(250);
        assert_eq!(post_content(&article(&long)).chars().count(), CONTENT_CHARS);
    }

    #[actix_rt::test]
    async fn test_draft_anke() {
        let completer = ScriptedCompleter::new(&[
            "円安はあなたの生活に影響していますか？",
            "1. 影響している\n2. 影響していない",
            "カテゴリ: ニュース・話題\nキーワード: 円安, 物価",
        ]);
        let draft = draft_anke(&completer, &article("本文"), &CreatorSettings::default())
            .await
            .expect("draft");
        assert_eq!(draft.title, "円安はあなたの生活に影響していますか？");
        assert_eq!(draft.choices, vec!["影響している", "影響していない"]);
        assert_eq!(draft.categories, vec!["ニュース・話題"]);
        assert_eq!(draft.keywords, vec!["円安", "物価"]);
        assert_eq!(completer.request_count(), 3);
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("「円安どう思う？」", "記事"), "円安どう思う？");
        assert_eq!(clean_title(" \"値上げ\" ", "記事"), "値上げ");
        assert_eq!(clean_title("「」", "記事"), "記事");
        assert_eq!(clean_title(&"あ".repeat(300), "記事").chars().count(), 255);
        assert_eq!(clean_title("", &"い".repeat(300)).chars().count(), 255);
    }

    #[actix_rt::test]
    async fn test_empty_title_falls_back_to_article() {
        let completer = ScriptedCompleter::new(&["", "", ""]);
        let draft = draft_anke(&completer, &article("本文"), &CreatorSettings::default())
            .await
            .expect("draft");
        assert_eq!(draft.title, "円安が進行");
        assert_eq!(draft.choices.len(), 3);
        assert_eq!(draft.categories, vec![FALLBACK_CATEGORY]);
    }
}
