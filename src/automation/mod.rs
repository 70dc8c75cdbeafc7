//! Cron-triggered jobs: post creation from articles, simulated activity,
//! LLM tagging and point aggregation.

pub mod aggregate;
pub mod creator;
pub mod job_log;
pub mod llm;
pub mod schedule;
pub mod settings;
pub mod tagger;
pub mod voter;

use self::job_log::{last_success, log_job, JobLog};
use self::llm::{Completer, OpenAiCompleter};
use self::settings::{load_settings, Settings};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::prelude::Utc;
use derive_more::Display;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sea_orm::entity::prelude::{DeriveActiveEnum, EnumIter};
use sea_orm::{ConnectionTrait, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum Job {
    #[sea_orm(string_value = "auto_creator")]
    AutoCreator,
    #[sea_orm(string_value = "auto_voter")]
    AutoVoter,
    #[sea_orm(string_value = "auto_tagger")]
    AutoTagger,
    #[sea_orm(string_value = "points_aggregate")]
    PointsAggregate,
}

impl Job {
    /// Parses the path segment used by the trigger routes, e.g. `auto-creator`.
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "auto-creator" => Some(Self::AutoCreator),
            "auto-voter" => Some(Self::AutoVoter),
            "auto-tagger" => Some(Self::AutoTagger),
            "points-aggregate" => Some(Self::PointsAggregate),
            _ => None,
        }
    }

    /// Prefix of this job's keys in `automation_settings`.
    pub fn key(&self) -> &'static str {
        match self {
            Self::AutoCreator => "auto_creator",
            Self::AutoVoter => "auto_voter",
            Self::AutoTagger => "auto_tagger",
            Self::PointsAggregate => "points_aggregate",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoCreator => "自動作成",
            Self::AutoVoter => "自動投票",
            Self::AutoTagger => "AI自動タグ付け",
            Self::PointsAggregate => "ポイント集計",
        }
    }

    fn needs_llm(&self) -> bool {
        !matches!(self, Self::PointsAggregate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "success")]
    Success,
    /// The run could not do its work, e.g. nothing left to process.
    #[sea_orm(string_value = "failed")]
    Failed,
    /// The run aborted on an unexpected error.
    #[sea_orm(string_value = "error")]
    Error,
    #[sea_orm(string_value = "skipped")]
    Skipped,
}

#[derive(Debug, Display)]
pub enum JobError {
    #[display(fmt = "Unauthorized")]
    Unauthorized,
    #[display(fmt = "不明なジョブです")]
    UnknownJob,
    #[display(fmt = "OpenAI APIキーが設定されていません")]
    MissingApiKey,
    #[display(fmt = "{}", _0)]
    Failed(String),
    #[display(fmt = "{}", _0)]
    Database(DbErr),
}

impl From<DbErr> for JobError {
    fn from(e: DbErr) -> Self {
        Self::Database(e)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", e))
    }
}

impl ResponseError for JobError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownJob => StatusCode::NOT_FOUND,
            Self::MissingApiKey | Self::Failed(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

/// Body of a trigger request. Every field is optional.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CronRequest {
    /// Candidate articles for the auto-creator, already scraped.
    #[serde(default)]
    pub articles: Vec<creator::Article>,
    pub source_url: Option<String>,
    /// Runs the auto-voter's single random action instead of a batch.
    #[serde(default)]
    pub single: bool,
}

/// Result of a trigger that did not fail.
#[derive(Debug)]
pub enum JobReport {
    /// Disabled, inside the interval or otherwise not run. Reported with 200.
    Skipped(String),
    Completed(serde_json::Value),
}

impl JobReport {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Skipped(message) => serde_json::json!({ "success": false, "message": message }),
            Self::Completed(details) => serde_json::json!({ "success": true, "details": details }),
        }
    }
}

/// Rejects a trigger whose `x-api-secret` does not match.
pub fn authorize(provided: Option<&str>, expected: &str) -> Result<(), JobError> {
    match provided {
        Some(secret) if !expected.is_empty() && secret == expected => Ok(()),
        _ => Err(JobError::Unauthorized),
    }
}

fn completer_for(settings: &Settings) -> Option<OpenAiCompleter> {
    settings
        .openai_api_key()
        .map(|key| OpenAiCompleter::new(key, crate::global::get_openai_base_url(), settings.openai_model()))
}

/// Gates a job on its enable flag and interval, then runs it with the OpenAI client.
pub async fn trigger<C>(db: &C, job: Job, request: CronRequest) -> Result<JobReport, JobError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let settings = load_settings(db).await?;

    if !settings.is_enabled(job) {
        log::info!("trigger: {:?} is disabled", job);
        return Ok(JobReport::Skipped(format!("{}が停止中です", job.label())));
    }

    let (base, variance) = settings.interval(job);
    let mut rng = StdRng::from_entropy();
    let jitter = schedule::roll_jitter(&mut rng, variance);
    let now = Utc::now().naive_utc();
    let last = last_success(db, job).await?;
    if !schedule::interval_elapsed(last, now, base, variance, jitter) {
        let remaining = schedule::minutes_remaining(last, now, base + jitter);
        return Ok(JobReport::Skipped(format!("次回実行まで{:.1}分", remaining)));
    }

    if !job.needs_llm() {
        return run_job(db, job, &settings, request, None).await;
    }

    match completer_for(&settings) {
        Some(completer) => run_job(db, job, &settings, request, Some(&completer as &dyn Completer)).await,
        None => {
            log_job(db, job, JobStatus::Failed, JobLog::error(JobError::MissingApiKey.to_string())).await;
            Err(JobError::MissingApiKey)
        }
    }
}

/// Runs a job without gating. LLM jobs require a completer.
pub async fn run_job<C>(
    db: &C,
    job: Job,
    settings: &Settings,
    request: CronRequest,
    completer: Option<&dyn Completer>,
) -> Result<JobReport, JobError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut rng = StdRng::from_entropy();

    let result = match (job, completer) {
        (Job::PointsAggregate, _) => aggregate::run(db, &settings.aggregate()).await,
        (_, None) => return Err(JobError::MissingApiKey),
        (Job::AutoCreator, Some(completer)) => {
            creator::run(db, completer, &settings.creator(), request, Utc::now().naive_utc()).await
        }
        (Job::AutoVoter, Some(completer)) if request.single => {
            voter::run_once(db, completer, &settings.voter(), &mut rng).await
        }
        (Job::AutoVoter, Some(completer)) => voter::run_batch(db, completer, &settings.voter(), &mut rng).await,
        (Job::AutoTagger, Some(completer)) => tagger::run(db, completer, &settings.tagger()).await,
    };

    result.map_err(|e| {
        log::error!("run_job: {:?} failed: {:#}", job, e);
        JobError::from(e)
    })
}

/// Flips a job's enable flag. Returns the new state.
pub async fn toggle_job<C: ConnectionTrait>(db: &C, job: Job) -> Result<bool, DbErr> {
    let settings = load_settings(db).await?;
    let enabled = !settings.is_enabled(job);
    settings::set_setting(db, &settings::enabled_key(job), if enabled { "true" } else { "false" }).await?;
    log::info!("toggle_job: {:?} is now {}", job, if enabled { "enabled" } else { "disabled" });
    Ok(enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_slugs() {
        assert_eq!(Job::from_slug("auto-creator"), Some(Job::AutoCreator));
        assert_eq!(Job::from_slug("points-aggregate"), Some(Job::PointsAggregate));
        assert_eq!(Job::from_slug("auto_creator"), None);
        assert_eq!(Job::from_slug("backup"), None);
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(Some("s3cret"), "s3cret").is_ok());
        assert!(authorize(Some("wrong"), "s3cret").is_err());
        assert!(authorize(None, "s3cret").is_err());
        assert!(authorize(Some(""), "").is_err());
    }

    #[test]
    fn test_job_error_status() {
        assert_eq!(JobError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(JobError::UnknownJob.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            JobError::Failed("x".to_owned()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_report_json() {
        let skipped = JobReport::Skipped("停止中".to_owned()).to_json();
        assert_eq!(skipped["success"], false);
        assert_eq!(skipped["message"], "停止中");

        let done = JobReport::Completed(serde_json::json!({ "count": 2 })).to_json();
        assert_eq!(done["success"], true);
        assert_eq!(done["details"]["count"], 2);
    }
}
