use crate::comment::CommentStatus;
use crate::db::insert_or_skip;
use crate::global::get_staff_user_id;
use crate::orm::{comments, notification_reads, posts};
use crate::post::PostStatus;
use crate::user::{display_name, get_profiles_by_ids};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{entity::*, query::*, Condition, ConnectionTrait, DbErr, TryFromU64};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_LIMIT: usize = 15;
/// Notification previews are cut to this many characters.
pub const PREVIEW_CHARS: usize = 40;
const STAFF_POST_LIMIT: u64 = 20;
const STAFF_NAME: &str = "運営スタッフ";

static COMMENT_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#(?:reply-|anke-comment-)(\d+)").expect("valid regex"));
static POST_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/posts/(\d+)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A post by the staff account.
    #[sea_orm(string_value = "admin_post")]
    AdminPost,
    /// A reply to one of the user's comments.
    #[sea_orm(string_value = "reply")]
    Reply,
    /// A top level comment on one of the user's posts.
    #[sea_orm(string_value = "post_comment")]
    PostComment,
}

/// `notification_reads` is keyed by (user, type, target), never by a generated id.
impl TryFromU64 for NotificationType {
    fn try_from_u64(n: u64) -> Result<Self, DbErr> {
        Err(DbErr::Exec(format!("NotificationType cannot be read from the integer key {}", n)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub date: NaiveDateTime,
    pub content: String,
    pub link: String,
    pub author_name: String,
    pub target_id: i32,
    pub read: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: usize,
    pub has_more: bool,
}

pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
        preview.push_str("...");
        preview
    } else {
        text.to_owned()
    }
}

/// Extracts the id a notification link points at: a comment for replies and
/// post comments, a post otherwise.
pub fn parse_target(kind: NotificationType, link: &str) -> Option<i32> {
    let pattern = match kind {
        NotificationType::Reply | NotificationType::PostComment => &*COMMENT_ANCHOR,
        NotificationType::AdminPost => &*POST_PATH,
    };
    pattern
        .captures(link)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .filter(|id| *id > 0)
}

/// Sorts newest first and slices out one page.
pub fn paginate(mut items: Vec<Notification>, offset: usize, limit: usize) -> NotificationPage {
    items.sort_by(|a, b| b.date.cmp(&a.date));
    let total = items.len();
    let notifications = items.into_iter().skip(offset).take(limit).collect();
    NotificationPage {
        notifications,
        total,
        has_more: offset + limit < total,
    }
}

async fn read_marks<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<HashSet<(NotificationType, i32)>, DbErr> {
    Ok(notification_reads::Entity::find()
        .filter(notification_reads::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|r| (r.notification_type, r.target_id))
        .collect())
}

/// Every notification for a user, unsorted, with read flags applied.
pub async fn collect_notifications<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<Vec<Notification>, DbErr> {
    let mut items: Vec<Notification> = Vec::new();

    let staff_posts = posts::Entity::find()
        .filter(posts::Column::UserId.eq(get_staff_user_id()))
        .filter(posts::Column::Status.eq(PostStatus::Published))
        .order_by_desc(posts::Column::CreatedAt)
        .limit(STAFF_POST_LIMIT)
        .all(db)
        .await?;
    for post in staff_posts {
        items.push(Notification {
            kind: NotificationType::AdminPost,
            date: post.created_at,
            content: truncate_preview(&post.title),
            link: format!("/posts/{}", post.id),
            author_name: STAFF_NAME.to_owned(),
            target_id: post.id,
            read: false,
        });
    }

    let replies = comments::Entity::find()
        .filter(comments::Column::Status.eq(CommentStatus::Approved))
        .filter(
            comments::Column::ParentId.in_subquery(
                Query::select()
                    .column(comments::Column::Id)
                    .from(comments::Entity)
                    .and_where(Expr::col(comments::Column::UserId).eq(user_id))
                    .and_where(Expr::col(comments::Column::Status).eq(CommentStatus::Approved))
                    .to_owned(),
            ),
        )
        .order_by_desc(comments::Column::CreatedAt)
        .all(db)
        .await?;

    let on_my_posts = comments::Entity::find()
        .filter(comments::Column::Status.eq(CommentStatus::Approved))
        .filter(comments::Column::ParentId.is_null())
        .filter(
            Condition::any()
                .add(comments::Column::UserId.is_null())
                .add(comments::Column::UserId.ne(user_id)),
        )
        .filter(
            comments::Column::PostId.in_subquery(
                Query::select()
                    .column(posts::Column::Id)
                    .from(posts::Entity)
                    .and_where(Expr::col(posts::Column::UserId).eq(user_id))
                    .and_where(Expr::col(posts::Column::Status).eq(PostStatus::Published))
                    .to_owned(),
            ),
        )
        .order_by_desc(comments::Column::CreatedAt)
        .all(db)
        .await?;

    let authors: Vec<i32> = replies
        .iter()
        .chain(on_my_posts.iter())
        .filter_map(|c| c.user_id)
        .collect();
    let profiles = get_profiles_by_ids(db, authors).await?;

    let comment_items = replies
        .into_iter()
        .map(|c| (NotificationType::Reply, c))
        .chain(on_my_posts.into_iter().map(|c| (NotificationType::PostComment, c)));
    for (kind, c) in comment_items {
        items.push(Notification {
            kind,
            date: c.created_at,
            content: truncate_preview(&c.content),
            link: format!("/posts/{}#anke-comment-{}", c.post_id, c.id),
            author_name: display_name(
                c.user_id
                    .and_then(|id| profiles.get(&id))
                    .and_then(|p| p.name.as_deref()),
            ),
            target_id: c.id,
            read: false,
        });
    }

    let marks = read_marks(db, user_id).await?;
    for item in items.iter_mut() {
        item.read = marks.contains(&(item.kind, item.target_id));
    }

    Ok(items)
}

pub async fn notifications<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    offset: usize,
    limit: usize,
) -> Result<NotificationPage, DbErr> {
    Ok(paginate(collect_notifications(db, user_id).await?, offset, limit))
}

pub async fn unread_count<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<usize, DbErr> {
    Ok(collect_notifications(db, user_id)
        .await?
        .iter()
        .filter(|n| !n.read)
        .count())
}

const INSERT_READ: &str = r#"INSERT INTO notification_reads (user_id, notification_type, target_id, read_at)
VALUES ($1, $2, $3, now())
ON CONFLICT DO NOTHING
RETURNING target_id"#;

/// Records a read mark. Marking the same notification twice is not an error.
pub async fn mark_read<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    kind: NotificationType,
    target_id: i32,
) -> Result<(), DbErr> {
    insert_or_skip(
        db,
        INSERT_READ,
        vec![user_id.into(), kind.to_value().into(), target_id.into()],
    )
    .await?;
    Ok(())
}

/// Marks every current notification read. Returns how many were newly marked.
pub async fn mark_all_read<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<usize, DbErr> {
    let unread: Vec<Notification> = collect_notifications(db, user_id)
        .await?
        .into_iter()
        .filter(|n| !n.read)
        .collect();

    for n in unread.iter() {
        mark_read(db, user_id, n.kind, n.target_id).await?;
    }

    Ok(unread.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    #[actix_rt::test]
    async fn test_mark_read_twice_is_ok() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![
                vec![BTreeMap::from([("target_id", Value::Int(Some(8)))])],
                vec![],
            ])
            .into_connection();

        mark_read(&db, 2, NotificationType::Reply, 8).await.expect("first mark");
        mark_read(&db, 2, NotificationType::Reply, 8).await.expect("repeat mark");
    }

    #[test]
    fn test_notification_type_has_no_integer_key() {
        assert!(NotificationType::try_from_u64(3).is_err());
    }

    fn item(day: u32, target_id: i32) -> Notification {
        Notification {
            kind: NotificationType::Reply,
            date: NaiveDate::from_ymd(2024, 1, day).and_hms(0, 0, 0),
            content: String::new(),
            link: String::new(),
            author_name: String::new(),
            target_id,
            read: false,
        }
    }

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("short"), "short");
        let long = "あ".repeat(41);
        let preview = truncate_preview(&long);
        assert_eq!(preview, format!("{}...", "あ".repeat(40)));
        assert_eq!(truncate_preview(&"い".repeat(40)), "い".repeat(40));
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target(NotificationType::Reply, "/posts/12#anke-comment-345"), Some(345));
        assert_eq!(parse_target(NotificationType::PostComment, "/posts/12#reply-7"), Some(7));
        assert_eq!(parse_target(NotificationType::AdminPost, "/posts/99"), Some(99));
        assert_eq!(parse_target(NotificationType::Reply, "/posts/12"), None);
        assert_eq!(parse_target(NotificationType::AdminPost, "/users/5"), None);
        assert_eq!(parse_target(NotificationType::AdminPost, "/posts/0"), None);
    }

    #[test]
    fn test_paginate_sorts_newest_first() {
        let page = paginate(vec![item(1, 1), item(3, 3), item(2, 2)], 0, 2);
        let ids: Vec<i32> = page.notifications.iter().map(|n| n.target_id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(page.total, 3);
        assert!(page.has_more);

        let page = paginate(vec![item(1, 1), item(3, 3), item(2, 2)], 2, 2);
        assert_eq!(page.notifications.len(), 1);
        assert_eq!(page.notifications[0].target_id, 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_notification_type_field_name() {
        let body = serde_json::to_value(item(1, 1)).expect("serializes");
        assert_eq!(body["type"], "reply");
    }
}
