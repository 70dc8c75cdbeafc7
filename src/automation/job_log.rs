use super::{Job, JobStatus};
use crate::orm::job_logs;
use chrono::prelude::Utc;
use chrono::NaiveDateTime;
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr};

/// Optional columns of a `job_logs` row.
#[derive(Clone, Debug, Default)]
pub struct JobLog {
    pub action_type: Option<String>,
    pub post_id: Option<i32>,
    pub user_id: Option<i32>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl JobLog {
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn post(mut self, post_id: i32) -> Self {
        self.post_id = Some(post_id);
        self
    }

    pub fn user(mut self, user_id: i32) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn action<S: Into<String>>(mut self, action: S) -> Self {
        self.action_type = Some(action.into());
        self
    }
}

/// Writes a log row. A failed write is logged and otherwise ignored.
pub async fn log_job<C: ConnectionTrait>(db: &C, job: Job, status: JobStatus, entry: JobLog) {
    let res = job_logs::ActiveModel {
        job: Set(job),
        execution_type: Set("cron".to_owned()),
        status: Set(status),
        action_type: Set(entry.action_type),
        post_id: Set(entry.post_id),
        user_id: Set(entry.user_id),
        message: Set(entry.message),
        error_message: Set(entry.error),
        executed_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await;

    if let Err(e) = res {
        log::error!("log_job: unable to write {:?} log: {}", job, e);
    }
}

pub async fn last_success<C: ConnectionTrait>(db: &C, job: Job) -> Result<Option<NaiveDateTime>, DbErr> {
    Ok(job_logs::Entity::find()
        .filter(job_logs::Column::Job.eq(job))
        .filter(job_logs::Column::Status.eq(JobStatus::Success))
        .order_by_desc(job_logs::Column::ExecutedAt)
        .one(db)
        .await?
        .map(|l| l.executed_at))
}

/// Newest log rows of a job.
pub async fn recent_logs<C: ConnectionTrait>(db: &C, job: Job, limit: u64) -> Result<Vec<job_logs::Model>, DbErr> {
    job_logs::Entity::find()
        .filter(job_logs::Column::Job.eq(job))
        .order_by_desc(job_logs::Column::ExecutedAt)
        .limit(limit)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let entry = JobLog::message("ok").post(3).user(9).action("vote");
        assert_eq!(entry.message.as_deref(), Some("ok"));
        assert_eq!(entry.post_id, Some(3));
        assert_eq!(entry.user_id, Some(9));
        assert_eq!(entry.action_type.as_deref(), Some("vote"));
        assert!(entry.error.is_none());
    }
}
