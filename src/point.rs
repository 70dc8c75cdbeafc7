use crate::db::insert_or_skip;
use crate::orm::{point_settings, points};
use actix_web::http::StatusCode;
use actix_web::ResponseError;
use chrono::prelude::Utc;
use derive_more::Display;
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::sea_query::Expr;
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr, FromQueryResult, TransactionTrait, TryFromU64};
use serde::{Deserialize, Serialize};

/// Exchanges are made in blocks of this many points.
pub const EXCHANGE_UNIT: i32 = 10_000;
/// Points per yen when exchanging.
pub const POINTS_PER_YEN: i32 = 10;
/// Used when `best_answer` has no row in `point_settings`.
pub const DEFAULT_BEST_ANSWER_POINTS: i32 = 10;
pub const HISTORY_PER_PAGE: u64 = 20;

/// The action a ledger row was granted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    #[sea_orm(string_value = "post")]
    Post,
    #[sea_orm(string_value = "vote")]
    Vote,
    #[sea_orm(string_value = "comment")]
    Comment,
    /// Posting under a sponsored worker campaign.
    #[sea_orm(string_value = "work_post")]
    WorkPost,
    /// Paid to the author when someone votes on a worker campaign post.
    #[sea_orm(string_value = "work_vote")]
    WorkVote,
    #[sea_orm(string_value = "best_answer")]
    BestAnswer,
    #[sea_orm(string_value = "admin_grant")]
    AdminGrant,
    /// Negative row written when points are cashed out.
    #[sea_orm(string_value = "exchange")]
    Exchange,
}

/// `point_settings` is keyed by type, never by a generated id.
impl TryFromU64 for PointType {
    fn try_from_u64(n: u64) -> Result<Self, DbErr> {
        Err(DbErr::Exec(format!("PointType cannot be read from the integer key {}", n)))
    }
}

#[derive(Debug, Display)]
pub enum PointError {
    #[display(fmt = "交換は{}ポイント以上、{}ポイント単位で申請してください", EXCHANGE_UNIT, EXCHANGE_UNIT)]
    InvalidAmount,
    #[display(fmt = "ポイントが不足しています")]
    InsufficientBalance,
    #[display(fmt = "連絡先を入力してください")]
    MissingContact,
    #[display(fmt = "Database error")]
    Database(DbErr),
}

impl From<DbErr> for PointError {
    fn from(err: DbErr) -> Self {
        Self::Database(err)
    }
}

impl ResponseError for PointError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidAmount | Self::InsufficientBalance | Self::MissingContact => {
                StatusCode::BAD_REQUEST
            }
            Self::Database(e) => {
                log::error!("PointError: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct PointSum {
    total: i64,
}

/// Decides what a grant is worth given its settings row, if any.
pub fn resolve_point_value(kind: PointType, setting: Option<(i32, bool)>) -> Option<i32> {
    match setting {
        Some((value, true)) if value > 0 => Some(value),
        Some(_) => None,
        None if kind == PointType::BestAnswer => Some(DEFAULT_BEST_ANSWER_POINTS),
        None => None,
    }
}

/// Validates an exchange request against a balance. Returns the yen value.
pub fn validate_exchange(amount: i32, balance: i64) -> Result<i32, PointError> {
    if amount < EXCHANGE_UNIT || amount % EXCHANGE_UNIT != 0 {
        return Err(PointError::InvalidAmount);
    }
    if i64::from(amount) > balance {
        return Err(PointError::InsufficientBalance);
    }
    Ok(amount / POINTS_PER_YEN)
}

pub async fn point_value<C: ConnectionTrait>(db: &C, kind: PointType) -> Result<Option<i32>, DbErr> {
    let setting = point_settings::Entity::find()
        .filter(point_settings::Column::PointType.eq(kind))
        .one(db)
        .await?;
    Ok(resolve_point_value(
        kind,
        setting.map(|s| (s.point_value, s.is_active)),
    ))
}

const INSERT_GRANT: &str = r#"INSERT INTO points (user_id, amount, point_type, related_id, note, created_at)
VALUES ($1, $2, $3, $4, NULL, now())
ON CONFLICT DO NOTHING
RETURNING *"#;

/// Awards points for an action at most once per (user, type, related id).
/// Returns None when the type is disabled or the grant already exists.
pub async fn grant<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    kind: PointType,
    related_id: Option<i32>,
) -> Result<Option<points::Model>, DbErr> {
    let amount = match point_value(db, kind).await? {
        Some(amount) => amount,
        None => return Ok(None),
    };

    let existing = points::Entity::find()
        .filter(points::Column::UserId.eq(user_id))
        .filter(points::Column::PointType.eq(kind))
        .filter(match related_id {
            Some(id) => points::Column::RelatedId.eq(id),
            None => points::Column::RelatedId.is_null(),
        })
        .count(db)
        .await?;
    if existing > 0 {
        return Ok(None);
    }

    // `points_grant_once` settles races without aborting the caller's transaction.
    let row = insert_or_skip(
        db,
        INSERT_GRANT,
        vec![user_id.into(), amount.into(), kind.to_value().into(), related_id.into()],
    )
    .await?;
    row.map(|row| points::Model::from_query_result(&row, "")).transpose()
}

/// Grants and logs instead of failing. For side effects that must not abort the main action.
pub async fn grant_or_log<C: ConnectionTrait>(db: &C, user_id: i32, kind: PointType, related_id: Option<i32>) {
    if let Err(e) = grant(db, user_id, kind, related_id).await {
        log::error!(
            "grant_or_log: {:?} for user {} ({:?}): {}",
            kind,
            user_id,
            related_id,
            e
        );
    }
}

/// Removes grants matching (user, type, related id).
pub async fn revoke<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    kind: PointType,
    related_id: i32,
) -> Result<u64, DbErr> {
    Ok(points::Entity::delete_many()
        .filter(points::Column::UserId.eq(user_id))
        .filter(points::Column::PointType.eq(kind))
        .filter(points::Column::RelatedId.eq(related_id))
        .exec(db)
        .await?
        .rows_affected)
}

pub async fn balance<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<i64, DbErr> {
    let sum = points::Entity::find()
        .select_only()
        .column_as(Expr::cust("COALESCE(SUM(amount), 0)::BIGINT"), "total")
        .filter(points::Column::UserId.eq(user_id))
        .into_model::<PointSum>()
        .one(db)
        .await?;
    Ok(sum.map(|s| s.total).unwrap_or(0))
}

/// Ledger rows newest first. Pages start at 1.
pub async fn history<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    page: u64,
) -> Result<Vec<points::Model>, DbErr> {
    points::Entity::find()
        .filter(points::Column::UserId.eq(user_id))
        .order_by_desc(points::Column::CreatedAt)
        .order_by_desc(points::Column::Id)
        .offset(page.saturating_sub(1) * HISTORY_PER_PAGE)
        .limit(HISTORY_PER_PAGE)
        .all(db)
        .await
}

/// Cashes out points. The balance is re-read inside the transaction that writes the
/// negative row, and the user's row is locked so two requests cannot spend the same points.
pub async fn request_exchange<C: TransactionTrait>(
    db: &C,
    user_id: i32,
    amount: i32,
    contact: &str,
) -> Result<i32, PointError> {
    let contact = contact.trim();
    if contact.is_empty() {
        return Err(PointError::MissingContact);
    }
    validate_exchange(amount, i64::MAX)?;

    let txn = db.begin().await?;

    // Serializes concurrent exchanges by the same user.
    crate::orm::users::Entity::find_by_id(user_id)
        .lock_exclusive()
        .one(&txn)
        .await?;

    let yen = validate_exchange(amount, balance(&txn, user_id).await?)?;

    points::ActiveModel {
        user_id: Set(user_id),
        amount: Set(-amount),
        point_type: Set(PointType::Exchange),
        related_id: Set(None),
        note: Set(Some(format!("{}円 / {}", yen, contact))),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    log::info!(
        "request_exchange: user {} exchanged {} points for {} yen",
        user_id,
        amount,
        yen
    );
    Ok(yen)
}

/// Manual adjustment by an admin. Negative amounts are allowed.
pub async fn admin_grant<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    amount: i32,
    note: Option<String>,
) -> Result<points::Model, DbErr> {
    points::ActiveModel {
        user_id: Set(user_id),
        amount: Set(amount),
        point_type: Set(PointType::AdminGrant),
        related_id: Set(None),
        note: Set(note.filter(|n| !n.trim().is_empty())),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    fn vote_setting() -> point_settings::Model {
        point_settings::Model {
            point_type: PointType::Vote,
            point_value: 1,
            is_active: true,
        }
    }

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    #[actix_rt::test]
    async fn test_grant_skips_existing_ledger_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![vote_setting()]])
            .append_query_results(vec![vec![count_row(1)]])
            .into_connection();

        let granted = grant(&db, 3, PointType::Vote, Some(9)).await.expect("grant");
        assert_eq!(granted, None);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(!log.contains("INSERT"));
    }

    #[actix_rt::test]
    async fn test_grant_lost_race_is_not_an_error() {
        // The pre-check sees nothing but the unique index already holds the row.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![vote_setting()]])
            .append_query_results(vec![vec![count_row(0)]])
            .append_query_results(vec![Vec::<points::Model>::new()])
            .into_connection();

        let granted = grant(&db, 3, PointType::Vote, Some(9)).await.expect("grant");
        assert_eq!(granted, None);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT DO NOTHING"));
    }

    #[actix_rt::test]
    async fn test_grant_writes_ledger_row() {
        let row = points::Model {
            id: 40,
            user_id: 3,
            amount: 1,
            point_type: PointType::Vote,
            related_id: Some(9),
            note: None,
            created_at: NaiveDate::from_ymd(2024, 5, 1).and_hms(9, 0, 0),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![vote_setting()]])
            .append_query_results(vec![vec![count_row(0)]])
            .append_query_results(vec![vec![row.clone()]])
            .into_connection();

        let granted = grant(&db, 3, PointType::Vote, Some(9)).await.expect("grant");
        assert_eq!(granted, Some(row));
    }

    #[actix_rt::test]
    async fn test_disabled_type_grants_nothing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<point_settings::Model>::new()])
            .into_connection();
        assert_eq!(grant(&db, 3, PointType::Comment, Some(1)).await.expect("grant"), None);
    }

    #[test]
    fn test_point_type_has_no_integer_key() {
        assert!(PointType::try_from_u64(1).is_err());
    }

    #[test]
    fn test_best_answer_defaults_when_unset() {
        assert_eq!(resolve_point_value(PointType::BestAnswer, None), Some(10));
        assert_eq!(resolve_point_value(PointType::Post, None), None);
        assert_eq!(resolve_point_value(PointType::Vote, None), None);
    }

    #[test]
    fn test_inactive_or_non_positive_settings_grant_nothing() {
        assert_eq!(resolve_point_value(PointType::Post, Some((5, false))), None);
        assert_eq!(resolve_point_value(PointType::Post, Some((0, true))), None);
        assert_eq!(resolve_point_value(PointType::BestAnswer, Some((-3, true))), None);
        assert_eq!(resolve_point_value(PointType::BestAnswer, Some((25, false))), None);
        assert_eq!(resolve_point_value(PointType::Comment, Some((2, true))), Some(2));
    }

    #[test]
    fn test_exchange_rules() {
        assert!(matches!(validate_exchange(9_999, 50_000), Err(PointError::InvalidAmount)));
        assert!(matches!(validate_exchange(15_000, 50_000), Err(PointError::InvalidAmount)));
        assert!(matches!(validate_exchange(0, 50_000), Err(PointError::InvalidAmount)));
        assert!(matches!(
            validate_exchange(30_000, 29_999),
            Err(PointError::InsufficientBalance)
        ));
        assert_eq!(validate_exchange(10_000, 10_000).ok(), Some(1_000));
        assert_eq!(validate_exchange(20_000, 50_000).ok(), Some(2_000));
    }

    #[test]
    fn test_point_error_statuses() {
        assert_eq!(PointError::InvalidAmount.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            PointError::Database(DbErr::Custom("x".to_owned())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
