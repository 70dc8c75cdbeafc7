use crate::db::{escape_like, insert_or_skip};
use crate::orm::{keyword_search_history, keywords, posts};
use crate::post::{summarize, PostStatus, PostSummary};
use crate::ugc::reject_ng_words;
use actix_web::{error, Error};
use chrono::prelude::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::*, query::*, Condition, ConnectionTrait, DbErr, FromQueryResult};
use serde::Serialize;
use std::collections::HashSet;

pub const SEARCH_RESULT_LIMIT: u64 = 50;

#[derive(Clone, Debug, Serialize)]
pub struct KeywordForList {
    pub id: i32,
    pub keyword: String,
    pub slug: String,
    pub post_count: i32,
    pub view_count: i32,
}

impl From<keywords::Model> for KeywordForList {
    fn from(k: keywords::Model) -> Self {
        Self {
            id: k.id,
            keyword: k.keyword,
            slug: k.slug,
            post_count: k.post_count,
            view_count: k.view_count,
        }
    }
}

#[derive(Clone, Debug, Serialize, FromQueryResult)]
pub struct PopularKeyword {
    pub keyword: String,
    pub search_count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    pub keyword: String,
    pub posts: Vec<PostSummary>,
    pub total: usize,
}

/// Lowercases and joins words with `-`. Non-ASCII letters are kept as they are.
pub fn slugify(keyword: &str) -> String {
    let mut slug = String::with_capacity(keyword.len());
    for word in keyword.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .flat_map(char::to_lowercase)
            .collect();
        if word.is_empty() {
            continue;
        }
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(&word);
    }
    slug
}

/// Trims, drops blanks and duplicates, and keeps at most `max` names in their given order.
pub fn clean_keyword_names<S: AsRef<str>>(names: &[S], max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .take(max)
        .map(str::to_owned)
        .collect()
}

pub async fn find_keyword<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<keywords::Model>, DbErr> {
    keywords::Entity::find()
        .filter(keywords::Column::Keyword.eq(name))
        .one(db)
        .await
}

const INSERT_KEYWORD: &str = r#"INSERT INTO keywords
    (keyword, slug, is_featured, display_order, post_count, search_count, view_count, created_at, updated_at)
VALUES ($1, $2, false, 0, 0, 0, 0, now(), now())
ON CONFLICT DO NOTHING
RETURNING *"#;

const LINK_KEYWORD: &str = r#"INSERT INTO post_keywords (post_id, keyword_id)
VALUES ($1, $2)
ON CONFLICT DO NOTHING
RETURNING keyword_id"#;

pub async fn find_or_create_keyword<C: ConnectionTrait>(db: &C, name: &str) -> Result<keywords::Model, DbErr> {
    if let Some(existing) = find_keyword(db, name).await? {
        return Ok(existing);
    }

    match insert_or_skip(db, INSERT_KEYWORD, vec![name.into(), slugify(name).into()]).await? {
        Some(row) => keywords::Model::from_query_result(&row, ""),
        // Created concurrently; take theirs.
        None => find_keyword(db, name)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("keyword {:?}", name))),
    }
}

/// Links up to `max` keywords to a post. Already linked keywords are skipped.
/// Returns the ids of newly linked keywords.
pub async fn link_keywords<C, S>(db: &C, post_id: i32, names: &[S], max: usize) -> Result<Vec<i32>, DbErr>
where
    C: ConnectionTrait,
    S: AsRef<str>,
{
    let mut linked = Vec::new();

    for name in clean_keyword_names(names, max) {
        let keyword = find_or_create_keyword(db, &name).await?;

        if insert_or_skip(db, LINK_KEYWORD, vec![post_id.into(), keyword.id.into()])
            .await?
            .is_none()
        {
            continue;
        }

        keywords::Entity::update_many()
            .col_expr(keywords::Column::PostCount, Expr::cust("post_count + 1"))
            .col_expr(keywords::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(keywords::Column::Id.eq(keyword.id))
            .exec(db)
            .await?;

        linked.push(keyword.id);
    }

    Ok(linked)
}

/// Most searched terms across the search history.
pub async fn popular_keywords<C: ConnectionTrait>(db: &C, limit: u64) -> Result<Vec<PopularKeyword>, DbErr> {
    keyword_search_history::Entity::find()
        .select_only()
        .column_as(keyword_search_history::Column::SearchKeyword, "keyword")
        .column_as(Expr::cust("COUNT(*)"), "search_count")
        .group_by(keyword_search_history::Column::SearchKeyword)
        .order_by_desc(Expr::cust("COUNT(*)"))
        .order_by_asc(keyword_search_history::Column::SearchKeyword)
        .limit(limit)
        .into_model::<PopularKeyword>()
        .all(db)
        .await
}

pub async fn featured_keywords<C: ConnectionTrait>(db: &C, limit: u64) -> Result<Vec<KeywordForList>, DbErr> {
    Ok(keywords::Entity::find()
        .filter(keywords::Column::IsFeatured.eq(true))
        .order_by_asc(keywords::Column::DisplayOrder)
        .order_by_asc(keywords::Column::Id)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

pub async fn latest_keywords<C: ConnectionTrait>(db: &C, limit: u64) -> Result<Vec<KeywordForList>, DbErr> {
    Ok(keywords::Entity::find()
        .order_by_desc(keywords::Column::CreatedAt)
        .order_by_desc(keywords::Column::Id)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

/// Returns false when the keyword does not exist.
pub async fn increment_view<C: ConnectionTrait>(db: &C, keyword_id: i32) -> Result<bool, DbErr> {
    let res = keywords::Entity::update_many()
        .col_expr(keywords::Column::ViewCount, Expr::cust("view_count + 1"))
        .filter(keywords::Column::Id.eq(keyword_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}

async fn record_search<C: ConnectionTrait>(
    db: &C,
    keyword: &str,
    user_id: Option<i32>,
    result_count: usize,
) -> Result<(), DbErr> {
    keyword_search_history::ActiveModel {
        user_id: Set(user_id),
        search_keyword: Set(keyword.to_owned()),
        result_count: Set(result_count as i32),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    keywords::Entity::update_many()
        .col_expr(keywords::Column::SearchCount, Expr::cust("search_count + 1"))
        .filter(keywords::Column::Keyword.eq(keyword))
        .exec(db)
        .await?;

    Ok(())
}

/// Substring match on title or body. `%` and `_` in the keyword match themselves.
fn search_condition(keyword: &str) -> Condition {
    let pattern = format!("%{}%", escape_like(keyword));
    Condition::any()
        .add(posts::Column::Title.like(&pattern))
        .add(posts::Column::Content.like(&pattern))
}

/// Title and body search over published posts. The query is recorded in the search history.
pub async fn search<C: ConnectionTrait>(db: &C, q: &str, user_id: Option<i32>) -> Result<SearchResult, Error> {
    let keyword = q.trim();
    if keyword.is_empty() {
        return Err(error::ErrorBadRequest("検索キーワードを入力してください"));
    }
    reject_ng_words(db, &[keyword]).await?;

    let rows = posts::Entity::find()
        .filter(posts::Column::Status.eq(PostStatus::Published))
        .filter(search_condition(keyword))
        .order_by_desc(posts::Column::CreatedAt)
        .limit(SEARCH_RESULT_LIMIT)
        .all(db)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let posts = summarize(db, rows)
        .await
        .map_err(error::ErrorInternalServerError)?;

    if let Err(e) = record_search(db, keyword, user_id, posts.len()).await {
        log::error!("search: failed to record history for {:?}: {}", keyword, e);
    }

    Ok(SearchResult {
        keyword: keyword.to_owned(),
        total: posts.len(),
        posts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    fn keyword(id: i32, name: &str) -> keywords::Model {
        let at = NaiveDate::from_ymd(2024, 3, 1).and_hms(0, 0, 0);
        keywords::Model {
            id,
            keyword: name.to_owned(),
            slug: slugify(name),
            is_featured: false,
            display_order: 0,
            post_count: 1,
            search_count: 0,
            view_count: 0,
            created_at: at,
            updated_at: at,
        }
    }

    #[actix_rt::test]
    async fn test_keyword_created_concurrently_is_reused() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<keywords::Model>::new()])
            .append_query_results(vec![Vec::<keywords::Model>::new()])
            .append_query_results(vec![vec![keyword(12, "猫")]])
            .into_connection();

        let found = find_or_create_keyword(&db, "猫").await.expect("keyword");
        assert_eq!(found.id, 12);
    }

    #[actix_rt::test]
    async fn test_link_keywords_skips_existing_link() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![keyword(12, "猫")]])
            .append_query_results(vec![Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection();

        let linked = link_keywords(&db, 3, &["猫"], 3).await.expect("link");
        assert!(linked.is_empty());

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT DO NOTHING"));
        assert!(!log.contains("post_count + 1"));
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let stmt = posts::Entity::find()
            .filter(search_condition("100%_off"))
            .build(DatabaseBackend::Postgres);
        assert!(stmt.sql.contains("LIKE"));
        let values = format!("{:?}", stmt.values);
        assert!(values.contains(r"%100\\%\\_off%"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rust Lang"), "rust-lang");
        assert_eq!(slugify("  C++ / Go  "), "c-go");
        assert_eq!(slugify("東京 オリンピック"), "東京-オリンピック");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_clean_keyword_names() {
        let names = vec![" 猫 ", "犬", "", "猫", "鳥", "魚"];
        assert_eq!(clean_keyword_names(&names, 3), vec!["猫", "犬", "鳥"]);
        assert!(clean_keyword_names::<&str>(&[], 5).is_empty());
        assert!(clean_keyword_names(&["a", "b"], 0).is_empty());
    }
}
