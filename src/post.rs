use crate::db::escape_like;
use crate::middleware::ClientCtx;
use crate::orm::{categories, keywords, post_keywords, posts, vote_choices, vote_options};
use crate::point::{self, PointType};
use crate::ugc::{clean_image_url, reject_ng_words, validate_ugc};
use crate::user::{display_name, get_profiles_by_ids};
use crate::vote::{self, ChoiceCount, Voter};
use actix_web::{error, Error};
use chrono::prelude::Utc;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{entity::*, query::*, Condition, ConnectionTrait, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};

pub const POSTS_PER_PAGE: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[sea_orm(string_value = "published")]
    Published,
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Soft deleted. Visible only to the author and admins.
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

/// A new post as submitted by the author.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    /// A category id, or "auto" to leave it for the tagger.
    pub category: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub random: bool,
    pub image: Option<String>,
    pub close_date: Option<String>,
    pub close_time: Option<String>,
    pub workid: Option<i32>,
}

/// A NewPost after trimming and validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidPost {
    pub title: String,
    pub content: String,
    pub category_id: Option<i32>,
    pub choices: Vec<String>,
    pub multi: bool,
    pub random: bool,
    pub image: Option<String>,
    pub close_at: Option<NaiveDateTime>,
    pub workid: Option<i32>,
}

impl ValidPost {
    /// Posts without choices are consultations rather than surveys.
    pub fn is_survey(&self) -> bool {
        !self.choices.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdatePost {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreatedPost {
    pub id: i32,
    pub message: &'static str,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostFilter {
    pub category: Option<i32>,
    pub keyword: Option<String>,
    pub user: Option<i32>,
    pub q: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PostSummary {
    pub id: i32,
    pub title: String,
    pub user_id: Option<i32>,
    pub author_name: String,
    pub status: PostStatus,
    pub category_id: Option<i32>,
    pub og_image: Option<String>,
    pub total_votes: i32,
    pub view_count: i32,
    pub is_survey: bool,
    pub best_answer_id: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, Serialize)]
pub struct VoteSettings {
    pub multi: bool,
    pub random: bool,
    pub close_at: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PostDetail {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub user_id: Option<i32>,
    pub author_name: String,
    pub status: PostStatus,
    pub category_id: Option<i32>,
    pub og_image: Option<String>,
    pub source_url: Option<String>,
    pub total_votes: i32,
    pub view_count: i32,
    pub best_answer_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub choices: Vec<ChoiceCount>,
    pub vote_options: Option<VoteSettings>,
    pub keywords: Vec<String>,
    pub favorite_count: u64,
    pub like_count: i32,
    /// The viewer's ballot, if they have voted.
    pub voted: Option<Vec<i32>>,
}

/// "auto" and empty values leave the category unset.
pub fn parse_category(category: Option<&str>) -> Result<Option<i32>, Error> {
    match category.map(str::trim) {
        None | Some("") | Some("auto") => Ok(None),
        Some(id) => id
            .parse::<i32>()
            .map(Some)
            .map_err(|_| error::ErrorUnprocessableEntity("カテゴリーが正しくありません")),
    }
}

/// Combines a local date and time into a UTC timestamp. A date alone closes at 23:59.
pub fn parse_deadline(
    date: Option<&str>,
    time: Option<&str>,
    offset: chrono::FixedOffset,
) -> Result<Option<NaiveDateTime>, Error> {
    let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| error::ErrorUnprocessableEntity("締切日が正しくありません"))?,
        None => return Ok(None),
    };
    let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(time) => NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|_| error::ErrorUnprocessableEntity("締切時刻が正しくありません"))?,
        None => NaiveTime::from_hms(23, 59, 0),
    };

    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|local| Some(local.naive_utc()))
        .ok_or_else(|| error::ErrorUnprocessableEntity("締切日時が正しくありません"))
}

pub fn validate_new_post(form: NewPost, offset: chrono::FixedOffset) -> Result<ValidPost, Error> {
    let title = validate_ugc(&form.title, "タイトル")?;
    let content = validate_ugc(&form.content, "本文")?;

    let choices: Vec<String> = form
        .choices
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .collect();
    if choices.len() == 1 {
        return Err(error::ErrorUnprocessableEntity(
            "選択肢は2つ以上入力してください",
        ));
    }

    Ok(ValidPost {
        title,
        content,
        category_id: parse_category(form.category.as_deref())?,
        multi: form.multi,
        random: form.random,
        image: clean_image_url(form.image),
        close_at: parse_deadline(form.close_date.as_deref(), form.close_time.as_deref(), offset)?,
        workid: form.workid,
        choices,
    })
}

async fn category_exists<C: ConnectionTrait>(db: &C, id: i32) -> Result<bool, DbErr> {
    Ok(categories::Entity::find_by_id(id).count(db).await? > 0)
}

/// Inserts a post with its vote options and choices. Runs inside the caller's transaction.
pub async fn insert_post<C: ConnectionTrait>(
    txn: &C,
    author_id: i32,
    post: &ValidPost,
    source_url: Option<String>,
    auto_created: bool,
) -> Result<posts::Model, DbErr> {
    let now = Utc::now().naive_utc();
    let new_post = posts::ActiveModel {
        user_id: Set(Some(author_id)),
        title: Set(post.title.to_owned()),
        content: Set(post.content.to_owned()),
        status: Set(PostStatus::Published),
        category_id: Set(post.category_id),
        og_image: Set(post.image.to_owned()),
        source_url: Set(source_url),
        workid: Set(post.workid),
        deadline_at: Set(post.close_at),
        total_votes: Set(0),
        view_count: Set(0),
        best_answer_id: Set(None),
        best_answer_selected_at: Set(None),
        auto_created: Set(auto_created),
        ai_tagged: Set(false),
        ai_tagged_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await?;

    if post.is_survey() {
        vote_options::ActiveModel {
            post_id: Set(new_post.id),
            multi: Set(post.multi),
            random: Set(post.random),
            close_at: Set(post.close_at),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        // Choice ids follow submission order.
        for choice in post.choices.iter() {
            vote_choices::ActiveModel {
                post_id: Set(new_post.id),
                choice: Set(choice.to_owned()),
                vote_count: Set(0),
                ..Default::default()
            }
            .insert(txn)
            .await?;
        }
    }

    Ok(new_post)
}

pub async fn create_post<C: TransactionTrait>(
    db: &C,
    author_id: i32,
    form: NewPost,
) -> Result<CreatedPost, Error> {
    let post = validate_new_post(form, crate::global::get_site_offset())?;

    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    reject_ng_words(&txn, &[&post.title, &post.content]).await?;

    if let Some(category_id) = post.category_id {
        if !category_exists(&txn, category_id)
            .await
            .map_err(error::ErrorInternalServerError)?
        {
            return Err(error::ErrorUnprocessableEntity("カテゴリーが見つかりません"));
        }
    }

    let new_post = insert_post(&txn, author_id, &post, None, false)
        .await
        .map_err(error::ErrorInternalServerError)?;

    point::grant(&txn, author_id, PointType::Post, Some(new_post.id))
        .await
        .map_err(error::ErrorInternalServerError)?;
    if post.workid.is_some() {
        point::grant(&txn, author_id, PointType::WorkPost, Some(new_post.id))
            .await
            .map_err(error::ErrorInternalServerError)?;
    }

    txn.commit().await.map_err(error::ErrorInternalServerError)?;

    Ok(CreatedPost {
        id: new_post.id,
        message: if post.is_survey() {
            "アンケートを作成しました"
        } else {
            "相談を投稿しました"
        },
    })
}

pub(crate) async fn summarize<C: ConnectionTrait>(db: &C, rows: Vec<posts::Model>) -> Result<Vec<PostSummary>, DbErr> {
    let user_ids: Vec<i32> = rows.iter().filter_map(|p| p.user_id).collect();
    let profiles = get_profiles_by_ids(db, user_ids).await?;

    let post_ids: Vec<i32> = rows.iter().map(|p| p.id).collect();
    let surveys: Vec<i32> = if post_ids.is_empty() {
        Vec::new()
    } else {
        vote_options::Entity::find()
            .filter(vote_options::Column::PostId.is_in(post_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|o| o.post_id)
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|p| PostSummary {
            author_name: display_name(
                p.user_id
                    .and_then(|id| profiles.get(&id))
                    .and_then(|profile| profile.name.as_deref()),
            ),
            is_survey: surveys.contains(&p.id),
            id: p.id,
            title: p.title,
            user_id: p.user_id,
            status: p.status,
            category_id: p.category_id,
            og_image: p.og_image,
            total_votes: p.total_votes,
            view_count: p.view_count,
            best_answer_id: p.best_answer_id,
            created_at: p.created_at,
        })
        .collect())
}

/// Published posts matching a filter. Title search takes `%` and `_` literally.
fn filtered_posts(filter: &PostFilter) -> Select<posts::Entity> {
    let mut select = posts::Entity::find().filter(posts::Column::Status.eq(PostStatus::Published));

    if let Some(category_id) = filter.category {
        select = select.filter(posts::Column::CategoryId.eq(category_id));
    }
    if let Some(user_id) = filter.user {
        select = select.filter(posts::Column::UserId.eq(user_id));
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        select = select.filter(posts::Column::Title.like(&format!("%{}%", escape_like(q))));
    }
    if let Some(keyword) = filter.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        select = select.filter(
            posts::Column::Id.in_subquery(
                Query::select()
                    .column(post_keywords::Column::PostId)
                    .from(post_keywords::Entity)
                    .inner_join(
                        keywords::Entity,
                        Expr::tbl(keywords::Entity, keywords::Column::Id)
                            .equals(post_keywords::Entity, post_keywords::Column::KeywordId),
                    )
                    .cond_where(
                        Condition::any()
                            .add(Expr::tbl(keywords::Entity, keywords::Column::Keyword).eq(keyword))
                            .add(Expr::tbl(keywords::Entity, keywords::Column::Slug).eq(keyword)),
                    )
                    .to_owned(),
            ),
        );
    }

    select
}

/// Published posts, newest first. Pages start at 1.
pub async fn list_posts<C: ConnectionTrait>(
    db: &C,
    filter: &PostFilter,
    page: u64,
) -> Result<Vec<PostSummary>, DbErr> {
    let rows = filtered_posts(filter)
        .order_by_desc(posts::Column::CreatedAt)
        .order_by_desc(posts::Column::Id)
        .offset(page.saturating_sub(1) * POSTS_PER_PAGE)
        .limit(POSTS_PER_PAGE)
        .all(db)
        .await?;

    summarize(db, rows).await
}

/// Every post by a user except deleted ones, newest first.
pub async fn my_posts<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<Vec<PostSummary>, DbErr> {
    let rows = posts::Entity::find()
        .filter(posts::Column::UserId.eq(user_id))
        .filter(posts::Column::Status.ne(PostStatus::Deleted))
        .order_by_desc(posts::Column::CreatedAt)
        .all(db)
        .await?;

    summarize(db, rows).await
}

pub async fn get_post<C: ConnectionTrait>(db: &C, id: i32) -> Result<posts::Model, Error> {
    posts::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(error::ErrorInternalServerError)?
        .ok_or_else(|| error::ErrorNotFound("投稿が見つかりません"))
}

pub async fn post_keyword_names<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<Vec<String>, DbErr> {
    Ok(keywords::Entity::find()
        .filter(
            keywords::Column::Id.in_subquery(
                Query::select()
                    .column(post_keywords::Column::KeywordId)
                    .from(post_keywords::Entity)
                    .and_where(Expr::col(post_keywords::Column::PostId).eq(post_id))
                    .to_owned(),
            ),
        )
        .order_by_asc(keywords::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(|k| k.keyword)
        .collect())
}

pub async fn view_post<C: ConnectionTrait>(db: &C, client: &ClientCtx, id: i32) -> Result<PostDetail, Error> {
    let post = get_post(db, id).await?;
    if !client.can_read_post(&post) {
        return Err(error::ErrorNotFound("投稿が見つかりません"));
    }

    posts::Entity::update_many()
        .col_expr(posts::Column::ViewCount, Expr::cust("view_count + 1"))
        .filter(posts::Column::Id.eq(id))
        .exec(db)
        .await
        .map_err(error::ErrorInternalServerError)?;

    let choices = vote::get_choices(db, id)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let options = vote_options::Entity::find()
        .filter(vote_options::Column::PostId.eq(id))
        .one(db)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let keywords = post_keyword_names(db, id)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let favorite_count = crate::favorite::favorite_count(db, id)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let like_count = crate::like::like_count(db, crate::like::LikeKind::Post, id)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let voted = vote::has_voted(db, id, &Voter::from_client(client))
        .await
        .map_err(error::ErrorInternalServerError)?;
    let author_name = match post.user_id {
        Some(user_id) => {
            let profiles = get_profiles_by_ids(db, vec![user_id])
                .await
                .map_err(error::ErrorInternalServerError)?;
            display_name(profiles.get(&user_id).and_then(|p| p.name.as_deref()))
        }
        None => display_name(None),
    };

    Ok(PostDetail {
        id: post.id,
        title: post.title,
        content: post.content,
        user_id: post.user_id,
        author_name,
        status: post.status,
        category_id: post.category_id,
        og_image: post.og_image,
        source_url: post.source_url,
        total_votes: post.total_votes,
        view_count: post.view_count + 1,
        best_answer_id: post.best_answer_id,
        created_at: post.created_at,
        updated_at: post.updated_at,
        choices,
        vote_options: options.map(|o| VoteSettings {
            multi: o.multi,
            random: o.random,
            close_at: o.close_at,
        }),
        keywords,
        favorite_count,
        like_count,
        voted,
    })
}

pub async fn update_post<C: ConnectionTrait>(
    db: &C,
    client: &ClientCtx,
    id: i32,
    form: UpdatePost,
) -> Result<(), Error> {
    let post = get_post(db, id).await?;
    if !client.can_update_post(&post) {
        return Err(error::ErrorForbidden("権限がありません"));
    }

    let title = validate_ugc(&form.title, "タイトル")?;
    let content = validate_ugc(&form.content, "本文")?;
    reject_ng_words(db, &[&title, &content]).await?;

    let mut active: posts::ActiveModel = post.into();
    if form.category.is_some() {
        let category_id = parse_category(form.category.as_deref())?;
        if let Some(category_id) = category_id {
            if !category_exists(db, category_id)
                .await
                .map_err(error::ErrorInternalServerError)?
            {
                return Err(error::ErrorUnprocessableEntity("カテゴリーが見つかりません"));
            }
        }
        active.category_id = Set(category_id);
    }
    active.title = Set(title);
    active.content = Set(content);
    active.updated_at = Set(Utc::now().naive_utc());
    active.update(db).await.map_err(error::ErrorInternalServerError)?;

    Ok(())
}

async fn set_status<C: ConnectionTrait>(db: &C, id: i32, status: PostStatus) -> Result<(), Error> {
    posts::Entity::update_many()
        .col_expr(posts::Column::Status, Expr::value(status))
        .col_expr(posts::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(posts::Column::Id.eq(id))
        .exec(db)
        .await
        .map_err(error::ErrorInternalServerError)?;
    Ok(())
}

/// Soft delete by the author or an admin.
pub async fn delete_post<C: ConnectionTrait>(db: &C, client: &ClientCtx, id: i32) -> Result<(), Error> {
    let post = get_post(db, id).await?;
    if !client.can_delete_post(&post) {
        return Err(error::ErrorForbidden("権限がありません"));
    }
    set_status(db, id, PostStatus::Deleted).await
}

pub async fn restore_post<C: ConnectionTrait>(db: &C, client: &ClientCtx, id: i32) -> Result<(), Error> {
    if !client.is_admin() {
        return Err(error::ErrorForbidden("権限がありません"));
    }
    let post = get_post(db, id).await?;
    if post.status != PostStatus::Deleted {
        return Err(error::ErrorBadRequest("この投稿は削除されていません"));
    }
    set_status(db, id, PostStatus::Published).await
}

/// Unsets the best answer on a post and revokes its grant.
pub async fn unset_best_answer<C>(txn: &C, post: &posts::Model) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    if let Some(comment_id) = post.best_answer_id {
        let previous = crate::orm::comments::Entity::find_by_id(comment_id).one(txn).await?;
        if let Some(author_id) = previous.and_then(|c| c.user_id) {
            point::revoke(txn, author_id, PointType::BestAnswer, post.id).await?;
        }
    }

    posts::Entity::update_many()
        .col_expr(posts::Column::BestAnswerId, Expr::value(Option::<i32>::None))
        .col_expr(
            posts::Column::BestAnswerSelectedAt,
            Expr::value(Option::<NaiveDateTime>::None),
        )
        .filter(posts::Column::Id.eq(post.id))
        .exec(txn)
        .await?;

    Ok(())
}

fn require_post_author(client: &ClientCtx, post: &posts::Model) -> Result<(), Error> {
    if client.is_user() && post.user_id.is_some() && client.get_id() == post.user_id {
        Ok(())
    } else {
        Err(error::ErrorForbidden("投稿者のみベストアンサーを選択できます"))
    }
}

pub async fn select_best_answer<C: TransactionTrait>(
    db: &C,
    client: &ClientCtx,
    post_id: i32,
    comment_id: i32,
) -> Result<(), Error> {
    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    let post = posts::Entity::find_by_id(post_id)
        .lock_exclusive()
        .one(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        .ok_or_else(|| error::ErrorNotFound("投稿が見つかりません"))?;
    require_post_author(client, &post)?;

    let comment = crate::orm::comments::Entity::find_by_id(comment_id)
        .one(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        .filter(|c| c.post_id == post_id)
        .ok_or_else(|| error::ErrorNotFound("コメントが見つかりません"))?;

    unset_best_answer(&txn, &post)
        .await
        .map_err(error::ErrorInternalServerError)?;

    posts::Entity::update_many()
        .col_expr(posts::Column::BestAnswerId, Expr::value(comment.id))
        .col_expr(
            posts::Column::BestAnswerSelectedAt,
            Expr::value(Utc::now().naive_utc()),
        )
        .filter(posts::Column::Id.eq(post_id))
        .exec(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?;

    if let Some(answerer) = comment.user_id {
        point::grant(&txn, answerer, PointType::BestAnswer, Some(post_id))
            .await
            .map_err(error::ErrorInternalServerError)?;
    }

    txn.commit().await.map_err(error::ErrorInternalServerError)?;
    Ok(())
}

pub async fn clear_best_answer<C: TransactionTrait>(
    db: &C,
    client: &ClientCtx,
    post_id: i32,
) -> Result<(), Error> {
    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    let post = posts::Entity::find_by_id(post_id)
        .lock_exclusive()
        .one(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        .ok_or_else(|| error::ErrorNotFound("投稿が見つかりません"))?;
    require_post_author(client, &post)?;

    unset_best_answer(&txn, &post)
        .await
        .map_err(error::ErrorInternalServerError)?;

    txn.commit().await.map_err(error::ErrorInternalServerError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use sea_orm::DatabaseBackend;

    fn jst() -> FixedOffset {
        FixedOffset::east(9 * 3600)
    }

    fn form(choices: &[&str]) -> NewPost {
        NewPost {
            title: "  好きな季節は？ ".to_owned(),
            content: "教えてください".to_owned(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_consultation_has_no_choices() {
        let post = validate_new_post(form(&[]), jst()).expect("valid consultation");
        assert_eq!(post.title, "好きな季節は？");
        assert!(!post.is_survey());
    }

    #[test]
    fn test_single_choice_rejected() {
        assert!(validate_new_post(form(&["春", "  ", ""]), jst()).is_err());
    }

    #[test]
    fn test_blank_choices_dropped() {
        let post = validate_new_post(form(&["春", " ", "夏 "]), jst()).expect("valid survey");
        assert_eq!(post.choices, vec!["春".to_owned(), "夏".to_owned()]);
        assert!(post.is_survey());
    }

    #[test]
    fn test_title_required() {
        let mut f = form(&[]);
        f.title = "   ".to_owned();
        assert!(validate_new_post(f, jst()).is_err());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(parse_category(Some("auto")).ok(), Some(None));
        assert_eq!(parse_category(None).ok(), Some(None));
        assert_eq!(parse_category(Some(" 4 ")).ok(), Some(Some(4)));
        assert!(parse_category(Some("sports")).is_err());
    }

    #[test]
    fn test_deadline_is_local_time() {
        let close = parse_deadline(Some("2024-05-01"), Some("18:30"), jst())
            .expect("valid")
            .expect("present");
        assert_eq!(close, NaiveDate::from_ymd(2024, 5, 1).and_hms(9, 30, 0));

        let end_of_day = parse_deadline(Some("2024-05-01"), None, jst())
            .expect("valid")
            .expect("present");
        assert_eq!(end_of_day, NaiveDate::from_ymd(2024, 5, 1).and_hms(14, 59, 0));

        assert_eq!(parse_deadline(None, Some("10:00"), jst()).ok(), Some(None));
        assert!(parse_deadline(Some("05/01/2024"), None, jst()).is_err());
    }

    #[test]
    fn test_title_search_escapes_wildcards() {
        let filter = PostFilter {
            q: Some(" 50%_off ".to_owned()),
            ..Default::default()
        };
        let stmt = filtered_posts(&filter).build(DatabaseBackend::Postgres);
        assert!(stmt.sql.contains("LIKE"));
        let values = format!("{:?}", stmt.values);
        assert!(values.contains(r"%50\\%\\_off%") || values.contains(r"%50\%\_off%"));
    }
}
