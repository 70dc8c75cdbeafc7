use super::job_log::{log_job, JobLog};
use super::settings::AggregateSettings;
use super::{Job, JobReport, JobStatus};
use crate::orm::users;
use crate::user::UserStatus;
use anyhow::Result;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::*, query::*, ConnectionTrait, TransactionTrait};

/// Recomputes every active user's point total and ranks the top users.
pub async fn run<C>(db: &C, settings: &AggregateSettings) -> Result<JobReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let (updated, ranked) = match aggregate_points(db, settings.ranked_users).await {
        Ok(counts) => counts,
        Err(e) => {
            log_job(db, Job::PointsAggregate, JobStatus::Error, JobLog::error(format!("{:#}", e))).await;
            return Err(e);
        }
    };

    let message = format!("{}人のポイントを集計し、上位{}人を順位付けしました", updated, ranked);
    log::info!("points_aggregate: {}", message);
    log_job(db, Job::PointsAggregate, JobStatus::Success, JobLog::message(message.to_owned())).await;

    Ok(JobReport::Completed(serde_json::json!({
        "users": updated,
        "ranked": ranked,
        "message": message,
    })))
}

/// Returns how many totals were written and how many users were ranked.
async fn aggregate_points<C>(db: &C, ranked_users: u64) -> Result<(u64, usize)>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let updated = users::Entity::update_many()
        .col_expr(
            users::Column::TotalPoints,
            Expr::cust("COALESCE((SELECT SUM(points.amount) FROM points WHERE points.user_id = users.id), 0)"),
        )
        .filter(users::Column::Status.ne(UserStatus::Disabled))
        .exec(&txn)
        .await?
        .rows_affected;

    users::Entity::update_many()
        .col_expr(users::Column::Rank, Expr::value(Option::<i32>::None))
        .filter(users::Column::Rank.is_not_null())
        .exec(&txn)
        .await?;

    let top = users::Entity::find()
        .filter(users::Column::Status.ne(UserStatus::Disabled))
        .order_by_desc(users::Column::TotalPoints)
        .order_by_asc(users::Column::Id)
        .limit(ranked_users)
        .all(&txn)
        .await?;

    for (rank, user) in top.iter().enumerate() {
        users::Entity::update_many()
            .col_expr(users::Column::Rank, Expr::value(rank as i32 + 1))
            .filter(users::Column::Id.eq(user.id))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;
    Ok((updated, top.len()))
}
