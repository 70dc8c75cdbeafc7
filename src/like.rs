use crate::db::insert_or_skip;
use crate::middleware::ClientCtx;
use crate::orm::{comments, like_counts, likes, posts};
use actix_web::{error, Error};
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::{entity::*, query::*, ActiveEnum, ConnectionTrait, DbBackend, DbErr, Statement, TransactionTrait, TryFromU64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum LikeKind {
    #[sea_orm(string_value = "post")]
    Post,
    #[sea_orm(string_value = "comment")]
    Comment,
}

/// `like_counts` is keyed by (type, target), never by a generated id.
impl TryFromU64 for LikeKind {
    fn try_from_u64(n: u64) -> Result<Self, DbErr> {
        Err(DbErr::Exec(format!("LikeKind cannot be read from the integer key {}", n)))
    }
}

/// Who is liking. Users by id, guests by hashed session token.
#[derive(Clone, Debug)]
pub enum Liker {
    User(i32),
    Guest(String),
}

impl Liker {
    pub fn from_client(client: &ClientCtx) -> Option<Self> {
        match client.get_id() {
            Some(id) => Some(Self::User(id)),
            None => client.voter_hash().map(Self::Guest),
        }
    }

    fn columns(&self) -> (Option<i32>, Option<String>) {
        match self {
            Self::User(id) => (Some(*id), None),
            Self::Guest(hash) => (None, Some(hash.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i32,
}

const UPSERT_LIKE_COUNT: &str = r#"INSERT INTO like_counts (like_type, target_id, like_count, updated_at)
VALUES ($1, $2, GREATEST($3, 0), now())
ON CONFLICT (like_type, target_id)
DO UPDATE SET like_count = GREATEST(like_counts.like_count + $3, 0), updated_at = now()
RETURNING like_count"#;

const INSERT_LIKE: &str = r#"INSERT INTO likes (user_id, voter_hash, like_type, target_id, created_at)
VALUES ($1, $2, $3, $4, now())
ON CONFLICT DO NOTHING
RETURNING id"#;

/// Applies a delta to the cached count. The count never goes below zero.
pub async fn bump_like_count<C: ConnectionTrait>(
    db: &C,
    kind: LikeKind,
    target_id: i32,
    delta: i32,
) -> Result<i32, DbErr> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT_LIKE_COUNT,
            vec![kind.to_value().into(), target_id.into(), delta.into()],
        ))
        .await?;

    match row {
        Some(row) => row.try_get::<i32>("", "like_count"),
        None => Err(DbErr::Custom("like_counts upsert returned no row".to_owned())),
    }
}

pub async fn like_count<C: ConnectionTrait>(db: &C, kind: LikeKind, target_id: i32) -> Result<i32, DbErr> {
    Ok(like_counts::Entity::find()
        .filter(like_counts::Column::LikeType.eq(kind))
        .filter(like_counts::Column::TargetId.eq(target_id))
        .one(db)
        .await?
        .map(|c| c.like_count)
        .unwrap_or(0))
}

pub async fn like_counts<C: ConnectionTrait>(
    db: &C,
    kind: LikeKind,
    target_ids: Vec<i32>,
) -> Result<HashMap<i32, i32>, DbErr> {
    if target_ids.is_empty() {
        return Ok(HashMap::new());
    }

    Ok(like_counts::Entity::find()
        .filter(like_counts::Column::LikeType.eq(kind))
        .filter(like_counts::Column::TargetId.is_in(target_ids))
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.target_id, c.like_count))
        .collect())
}

fn liker_condition(liker: &Liker) -> sea_orm::Condition {
    match liker {
        Liker::User(id) => sea_orm::Condition::all().add(likes::Column::UserId.eq(*id)),
        Liker::Guest(hash) => sea_orm::Condition::all().add(likes::Column::VoterHash.eq(hash.to_owned())),
    }
}

pub async fn find_like<C: ConnectionTrait>(
    db: &C,
    kind: LikeKind,
    target_id: i32,
    liker: &Liker,
) -> Result<Option<likes::Model>, DbErr> {
    likes::Entity::find()
        .filter(likes::Column::LikeType.eq(kind))
        .filter(likes::Column::TargetId.eq(target_id))
        .filter(liker_condition(liker))
        .one(db)
        .await
}

async fn target_exists<C: ConnectionTrait>(db: &C, kind: LikeKind, target_id: i32) -> Result<bool, DbErr> {
    Ok(match kind {
        LikeKind::Post => {
            posts::Entity::find_by_id(target_id)
                .filter(posts::Column::Status.eq(crate::post::PostStatus::Published))
                .count(db)
                .await?
                > 0
        }
        LikeKind::Comment => comments::Entity::find_by_id(target_id).count(db).await? > 0,
    })
}

/// Writes the like row. False when the liker already liked the target.
async fn insert_like<C: ConnectionTrait>(db: &C, kind: LikeKind, target_id: i32, liker: &Liker) -> Result<bool, DbErr> {
    let (user_id, voter_hash) = liker.columns();
    let row = insert_or_skip(
        db,
        INSERT_LIKE,
        vec![user_id.into(), voter_hash.into(), kind.to_value().into(), target_id.into()],
    )
    .await?;
    Ok(row.is_some())
}

/// Adds a like without toggling. Returns None when the liker already liked the target.
pub async fn add_like<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    kind: LikeKind,
    target_id: i32,
    liker: &Liker,
) -> Result<Option<i32>, DbErr> {
    let txn = db.begin().await?;

    if find_like(&txn, kind, target_id, liker).await?.is_some() {
        return Ok(None);
    }

    if !insert_like(&txn, kind, target_id, liker).await? {
        return Ok(None);
    }

    let count = bump_like_count(&txn, kind, target_id, 1).await?;
    txn.commit().await?;
    Ok(Some(count))
}

/// Removes the liker's like if present, otherwise adds one.
pub async fn toggle_like<C: TransactionTrait>(
    db: &C,
    kind: LikeKind,
    target_id: i32,
    liker: &Liker,
) -> Result<LikeState, Error> {
    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    if !target_exists(&txn, kind, target_id)
        .await
        .map_err(error::ErrorInternalServerError)?
    {
        return Err(error::ErrorNotFound("対象が見つかりません"));
    }

    let existing = find_like(&txn, kind, target_id, liker)
        .await
        .map_err(error::ErrorInternalServerError)?;

    let state = match existing {
        Some(like) => {
            likes::Entity::delete_many()
                .filter(likes::Column::Id.eq(like.id))
                .exec(&txn)
                .await
                .map_err(error::ErrorInternalServerError)?;
            LikeState {
                liked: false,
                like_count: bump_like_count(&txn, kind, target_id, -1)
                    .await
                    .map_err(error::ErrorInternalServerError)?,
            }
        }
        None => {
            if !insert_like(&txn, kind, target_id, liker)
                .await
                .map_err(error::ErrorInternalServerError)?
            {
                return Err(error::ErrorConflict("既にいいねしています"));
            }
            LikeState {
                liked: true,
                like_count: bump_like_count(&txn, kind, target_id, 1)
                    .await
                    .map_err(error::ErrorInternalServerError)?,
            }
        }
    };

    txn.commit().await.map_err(error::ErrorInternalServerError)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    #[test]
    fn test_liker_columns() {
        assert_eq!(Liker::User(4).columns(), (Some(4), None));
        assert_eq!(Liker::Guest("abc".to_owned()).columns(), (None, Some("abc".to_owned())));
    }

    #[test]
    fn test_guest_without_session_cannot_like() {
        assert!(Liker::from_client(&ClientCtx::new()).is_none());
    }

    fn like_count_row(count: i32) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("like_count", Value::Int(Some(count)))])
    }

    #[actix_rt::test]
    async fn test_bump_like_count_returns_stored_count() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![like_count_row(0)], vec![]])
            .into_connection();

        // Unliking an uncounted target reads back the clamped zero.
        let count = bump_like_count(&db, LikeKind::Comment, 3, -1).await.expect("bump");
        assert_eq!(count, 0);

        // An upsert that yields no row is an error, not a silent zero.
        assert!(bump_like_count(&db, LikeKind::Comment, 3, 1).await.is_err());

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("GREATEST"));
        assert!(log.contains("Int(Some(-1))"));
    }

    #[actix_rt::test]
    async fn test_add_like_skips_count_when_already_liked() {
        // Nothing found by the lookup, then the insert hits the unique index.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<likes::Model>::new()])
            .append_query_results(vec![Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection();

        let added = add_like(&db, LikeKind::Post, 10, &Liker::User(4)).await.expect("add_like");
        assert_eq!(added, None);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT DO NOTHING"));
        assert!(!log.contains("like_counts"));
    }

    #[actix_rt::test]
    async fn test_add_like_counts_new_like() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<likes::Model>::new()])
            .append_query_results(vec![vec![BTreeMap::from([("id", Value::Int(Some(21)))])]])
            .append_query_results(vec![vec![like_count_row(5)]])
            .into_connection();

        let added = add_like(&db, LikeKind::Post, 10, &Liker::User(4)).await.expect("add_like");
        assert_eq!(added, Some(5));
    }

    #[test]
    fn test_like_kind_has_no_integer_key() {
        assert!(LikeKind::try_from_u64(1).is_err());
    }

    #[test]
    fn test_like_kind_wire_format() {
        assert_eq!(serde_json::to_string(&LikeKind::Comment).ok().as_deref(), Some("\"comment\""));
        assert_eq!(LikeKind::Post.to_value(), "post");
    }
}
