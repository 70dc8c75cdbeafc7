use crate::db::insert_or_skip;
use crate::orm::{favorites, posts};
use actix_web::{error, Error};
use chrono::prelude::Utc;
use chrono::Duration;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr, FromQueryResult, TransactionTrait};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FavoriteAction {
    Added,
    Removed,
}

#[derive(Clone, Debug, Serialize)]
pub struct FavoriteToggle {
    pub action: FavoriteAction,
    pub count: u64,
}

#[derive(Clone, Debug, Serialize, FromQueryResult)]
pub struct FavoriteRank {
    pub post_id: i32,
    pub count: i64,
}

pub async fn favorite_count<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<u64, DbErr> {
    let count = favorites::Entity::find()
        .filter(favorites::Column::PostId.eq(post_id))
        .count(db)
        .await?;
    Ok(count as u64)
}

pub async fn user_favorite_count<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<u64, DbErr> {
    let count = favorites::Entity::find()
        .filter(favorites::Column::UserId.eq(user_id))
        .count(db)
        .await?;
    Ok(count as u64)
}

pub async fn is_favorited<C: ConnectionTrait>(db: &C, user_id: i32, post_id: i32) -> Result<bool, DbErr> {
    Ok(favorites::Entity::find()
        .filter(favorites::Column::UserId.eq(user_id))
        .filter(favorites::Column::PostId.eq(post_id))
        .count(db)
        .await?
        > 0)
}

const INSERT_FAVORITE: &str = r#"INSERT INTO favorites (user_id, post_id, created_at)
VALUES ($1, $2, now())
ON CONFLICT DO NOTHING
RETURNING id"#;

pub async fn toggle_favorite<C: TransactionTrait>(
    db: &C,
    user_id: i32,
    post_id: i32,
) -> Result<FavoriteToggle, Error> {
    let txn = db.begin().await.map_err(error::ErrorInternalServerError)?;

    if posts::Entity::find_by_id(post_id)
        .count(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        == 0
    {
        return Err(error::ErrorNotFound("投稿が見つかりません"));
    }

    let removed = favorites::Entity::delete_many()
        .filter(favorites::Column::UserId.eq(user_id))
        .filter(favorites::Column::PostId.eq(post_id))
        .exec(&txn)
        .await
        .map_err(error::ErrorInternalServerError)?
        .rows_affected;

    let action = if removed > 0 {
        FavoriteAction::Removed
    } else {
        let inserted = insert_or_skip(&txn, INSERT_FAVORITE, vec![user_id.into(), post_id.into()])
            .await
            .map_err(error::ErrorInternalServerError)?;
        if inserted.is_none() {
            return Err(error::ErrorConflict("既にお気に入りに追加されています"));
        }
        FavoriteAction::Added
    };

    let count = favorite_count(&txn, post_id)
        .await
        .map_err(error::ErrorInternalServerError)?;
    txn.commit().await.map_err(error::ErrorInternalServerError)?;

    Ok(FavoriteToggle { action, count })
}

/// A user's favourite post ids, newest first.
pub async fn user_favorites<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    limit: u64,
    offset: u64,
) -> Result<Vec<i32>, DbErr> {
    Ok(favorites::Entity::find()
        .filter(favorites::Column::UserId.eq(user_id))
        .order_by_desc(favorites::Column::CreatedAt)
        .offset(offset)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(|f| f.post_id)
        .collect())
}

/// Most favourited posts over the last `days` days.
pub async fn favorites_ranking<C: ConnectionTrait>(
    db: &C,
    limit: u64,
    days: i64,
) -> Result<Vec<FavoriteRank>, DbErr> {
    let since = Utc::now().naive_utc() - Duration::days(days.max(0));

    favorites::Entity::find()
        .select_only()
        .column(favorites::Column::PostId)
        .column_as(Expr::cust("COUNT(*)"), "count")
        .filter(favorites::Column::CreatedAt.gte(since))
        .group_by(favorites::Column::PostId)
        .order_by_desc(Expr::cust("COUNT(*)"))
        .order_by_asc(favorites::Column::PostId)
        .limit(limit)
        .into_model::<FavoriteRank>()
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    #[actix_rt::test]
    async fn test_concurrent_add_reports_conflict() {
        // Nothing to remove, then a parallel request wins the unique index.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![count_row(1)], vec![]])
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let err = toggle_favorite(&db, 4, 9).await.expect_err("conflict");
        assert_eq!(err.as_response_error().status_code(), StatusCode::CONFLICT);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT DO NOTHING"));
    }

    #[actix_rt::test]
    async fn test_counts_fit_u64() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![count_row(3)], vec![]])
            .into_connection();
        assert_eq!(favorite_count(&db, 9).await.expect("count"), 3);
        assert_eq!(user_favorite_count(&db, 4).await.expect("count"), 0);
    }

    #[test]
    fn test_toggle_wire_format() {
        let body = serde_json::to_value(FavoriteToggle {
            action: FavoriteAction::Removed,
            count: 3,
        })
        .expect("serializes");
        assert_eq!(body["action"], "removed");
        assert_eq!(body["count"], 3);
    }
}
