use crate::like::{self, LikeKind};
use crate::middleware::ClientCtx;
use crate::orm::{comments, likes, posts};
use crate::point::{self, PointType};
use crate::post::{unset_best_answer, PostStatus};
use crate::ugc::{screen_ugc, validate_ugc};
use crate::user::{display_name, get_profiles_by_ids};
use actix_web::{error, Error};
use chrono::prelude::Utc;
use chrono::NaiveDateTime;
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Held for review after a low severity NG word match.
    #[sea_orm(string_value = "pending")]
    Pending,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewComment {
    pub content: String,
    pub parent_id: Option<i32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommentForList {
    pub id: i32,
    pub post_id: i32,
    pub parent_id: Option<i32>,
    pub user_id: Option<i32>,
    pub user_name: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub status: CommentStatus,
    pub like_count: i32,
    pub created_at: NaiveDateTime,
}

/// Decides how a comment is stored given its NG word screening.
pub fn status_for_screening(hit: Option<&crate::ng_word::NgMatch>) -> Result<CommentStatus, Error> {
    match hit {
        Some(hit) if hit.is_high() => Err(error::ErrorBadRequest("不適切な表現が含まれています")),
        Some(_) => Ok(CommentStatus::Pending),
        None => Ok(CommentStatus::Approved),
    }
}

/// Approved comments on a post, oldest first.
pub async fn list_comments<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<Vec<CommentForList>, DbErr> {
    let rows = comments::Entity::find()
        .filter(comments::Column::PostId.eq(post_id))
        .filter(comments::Column::Status.eq(CommentStatus::Approved))
        .order_by_asc(comments::Column::CreatedAt)
        .order_by_asc(comments::Column::Id)
        .all(db)
        .await?;

    let profiles = get_profiles_by_ids(db, rows.iter().filter_map(|c| c.user_id).collect()).await?;
    let like_counts = like::like_counts(db, LikeKind::Comment, rows.iter().map(|c| c.id).collect()).await?;

    Ok(rows
        .into_iter()
        .map(|c| {
            let profile = c.user_id.and_then(|id| profiles.get(&id));
            CommentForList {
                user_name: display_name(profile.and_then(|p| p.name.as_deref())),
                avatar_url: profile.and_then(|p| p.avatar_url.to_owned()),
                like_count: like_counts.get(&c.id).copied().unwrap_or(0),
                id: c.id,
                post_id: c.post_id,
                parent_id: c.parent_id,
                user_id: c.user_id,
                content: c.content,
                status: c.status,
                created_at: c.created_at,
            }
        })
        .collect())
}

/// Inserts a comment without screening or grants. Runs inside the caller's transaction.
pub async fn insert_comment<C: ConnectionTrait>(
    db: &C,
    post_id: i32,
    user_id: Option<i32>,
    parent_id: Option<i32>,
    content: String,
    status: CommentStatus,
) -> Result<comments::Model, DbErr> {
    comments::ActiveModel {
        post_id: Set(post_id),
        user_id: Set(user_id),
        parent_id: Set(parent_id),
        content: Set(content),
        status: Set(status),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn create_comment<C: TransactionTrait>(
    db: &C,
    client: &ClientCtx,
    post_id: i32,
    form: NewComment,
) -> Result<CommentForList, Error> {
    let content = validate_ugc(&form.content, "コメント")?;

    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    let status = status_for_screening(screen_ugc(&txn, &[&content]).await?.as_ref())?;

    posts::Entity::find_by_id(post_id)
        .one(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        .filter(|p| p.status == PostStatus::Published)
        .ok_or_else(|| error::ErrorNotFound("投稿が見つかりません"))?;

    if let Some(parent_id) = form.parent_id {
        comments::Entity::find_by_id(parent_id)
            .one(&txn)
            .await
            .map_err(error::ErrorInternalServerError)?
            .filter(|parent| parent.post_id == post_id)
            .ok_or_else(|| error::ErrorBadRequest("返信先のコメントが見つかりません"))?;
    }

    let user_id = client.get_id();
    let comment = insert_comment(&txn, post_id, user_id, form.parent_id, content, status)
        .await
        .map_err(error::ErrorInternalServerError)?;

    if let Some(user_id) = user_id {
        point::grant(&txn, user_id, PointType::Comment, Some(comment.id))
            .await
            .map_err(error::ErrorInternalServerError)?;
    }

    txn.commit().await.map_err(error::ErrorInternalServerError)?;

    if status == CommentStatus::Pending {
        log::info!("create_comment: comment {} held for review", comment.id);
    }

    Ok(CommentForList {
        id: comment.id,
        post_id: comment.post_id,
        parent_id: comment.parent_id,
        user_id: comment.user_id,
        user_name: client.get_name(),
        avatar_url: None,
        content: comment.content,
        status: comment.status,
        like_count: 0,
        created_at: comment.created_at,
    })
}

/// Hard deletes a comment and its likes. A best answer pointing at it is cleared.
pub async fn delete_comment<C: TransactionTrait>(db: &C, client: &ClientCtx, id: i32) -> Result<(), Error> {
    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    let comment = comments::Entity::find_by_id(id)
        .one(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        .ok_or_else(|| error::ErrorNotFound("コメントが見つかりません"))?;
    if !client.can_delete_comment(&comment) {
        return Err(error::ErrorForbidden("権限がありません"));
    }

    let post = posts::Entity::find_by_id(comment.post_id)
        .lock_exclusive()
        .one(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?;
    if let Some(post) = post.filter(|p| p.best_answer_id == Some(id)) {
        unset_best_answer(&txn, &post)
            .await
            .map_err(error::ErrorInternalServerError)?;
    }

    likes::Entity::delete_many()
        .filter(likes::Column::LikeType.eq(LikeKind::Comment))
        .filter(likes::Column::TargetId.eq(id))
        .exec(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?;
    crate::orm::like_counts::Entity::delete_many()
        .filter(crate::orm::like_counts::Column::LikeType.eq(LikeKind::Comment))
        .filter(crate::orm::like_counts::Column::TargetId.eq(id))
        .exec(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?;

    comments::Entity::delete_many()
        .filter(comments::Column::Id.eq(id))
        .exec(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?;

    txn.commit().await.map_err(error::ErrorInternalServerError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ng_word::NgMatch;
    use crate::orm::like_counts;
    use crate::post::PostStatus;
    use crate::user::{ClientUser, UserStatus};
    use actix_web::http::StatusCode;
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn comment(id: i32, user_id: Option<i32>) -> comments::Model {
        comments::Model {
            id,
            post_id: 3,
            user_id,
            parent_id: None,
            content: format!("comment {}", id),
            status: CommentStatus::Approved,
            created_at: NaiveDate::from_ymd(2024, 2, 1).and_hms(10, id as u32, 0),
        }
    }

    fn post() -> posts::Model {
        let at = NaiveDate::from_ymd(2024, 2, 1).and_hms(9, 0, 0);
        posts::Model {
            id: 3,
            user_id: Some(1),
            title: "title".to_owned(),
            content: String::new(),
            status: PostStatus::Published,
            category_id: None,
            og_image: None,
            source_url: None,
            workid: None,
            deadline_at: None,
            total_votes: 0,
            view_count: 0,
            best_answer_id: None,
            best_answer_selected_at: None,
            auto_created: false,
            ai_tagged: false,
            ai_tagged_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn author(id: i32) -> ClientCtx {
        ClientCtx::for_user(ClientUser {
            id,
            name: None,
            status: UserStatus::Member,
        })
    }

    fn deleted(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    #[actix_rt::test]
    async fn test_deleted_comment_leaves_the_thread() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![comment(11, Some(6))]])
            .append_query_results(vec![vec![post()]])
            // The thread as read back after the delete.
            .append_query_results(vec![vec![comment(12, None)]])
            .append_query_results(vec![Vec::<like_counts::Model>::new()])
            .append_exec_results(vec![deleted(2), deleted(1), deleted(1)])
            .into_connection();

        delete_comment(&db, &author(6), 11).await.expect("delete");
        let thread = list_comments(&db, 3).await.expect("list");
        assert_eq!(thread.iter().map(|c| c.id).collect::<Vec<_>>(), vec![12]);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains(r#"DELETE FROM \"comments\""#));
        assert!(log.contains("COMMIT"));
    }

    #[actix_rt::test]
    async fn test_only_the_author_deletes() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![comment(11, Some(6))]])
            .into_connection();

        let err = delete_comment(&db, &author(7), 11).await.expect_err("forbidden");
        assert_eq!(err.as_response_error().status_code(), StatusCode::FORBIDDEN);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(!log.contains("DELETE"));
    }

    fn hit(severity: &str) -> NgMatch {
        NgMatch {
            word: "w".to_owned(),
            severity: severity.to_owned(),
            category: None,
        }
    }

    #[test]
    fn test_clean_comment_is_approved() {
        assert_eq!(status_for_screening(None).ok(), Some(CommentStatus::Approved));
    }

    #[test]
    fn test_high_severity_rejected() {
        assert!(status_for_screening(Some(&hit("high"))).is_err());
    }

    #[test]
    fn test_lower_severity_held() {
        assert_eq!(
            status_for_screening(Some(&hit("medium"))).ok(),
            Some(CommentStatus::Pending)
        );
        assert_eq!(
            status_for_screening(Some(&hit("low"))).ok(),
            Some(CommentStatus::Pending)
        );
    }
}
