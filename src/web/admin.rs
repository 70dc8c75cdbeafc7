use super::require_admin;
use crate::automation::job_log::recent_logs;
use crate::automation::{toggle_job, Job, JobStatus};
use crate::db::get_db_pool;
use crate::middleware::ClientCtx;
use crate::{ng_word, point};
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const JOB_LOG_LIMIT: u64 = 50;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(grant_points)
        .service(reload_ng_words)
        .service(toggle_job_enabled)
        .service(view_job_logs);
}

#[derive(Deserialize)]
pub struct GrantFormData {
    #[serde(alias = "userId")]
    pub user_id: i32,
    pub amount: i32,
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct JobLogLine {
    pub id: i32,
    pub status: JobStatus,
    pub action_type: Option<String>,
    pub post_id: Option<i32>,
    pub user_id: Option<i32>,
    pub message: Option<String>,
    pub error_message: Option<String>,
    pub executed_at: NaiveDateTime,
}

fn parse_job(slug: &str) -> Result<Job, Error> {
    Job::from_slug(slug).ok_or_else(|| error::ErrorNotFound("不明なジョブです"))
}

#[post("/api/admin/points/grant")]
pub async fn grant_points(client: ClientCtx, form: web::Json<GrantFormData>) -> Result<impl Responder, Error> {
    let admin_id = require_admin(&client)?;
    if form.amount == 0 {
        return Err(error::ErrorBadRequest("ポイント数を入力してください"));
    }

    let form = form.into_inner();
    let row = point::admin_grant(get_db_pool(), form.user_id, form.amount, form.note)
        .await
        .map_err(error::ErrorInternalServerError)?;
    log::info!(
        "grant_points: admin {} granted {} to user {}",
        admin_id,
        row.amount,
        row.user_id
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "id": row.id,
        "amount": row.amount,
    })))
}

#[post("/api/admin/ng-words/reload")]
pub async fn reload_ng_words(client: ClientCtx) -> Result<impl Responder, Error> {
    require_admin(&client)?;
    ng_word::clear_cache();
    let words = ng_word::active_words(get_db_pool())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "count": words.len(),
    })))
}

#[post("/api/admin/jobs/{job}/toggle")]
pub async fn toggle_job_enabled(client: ClientCtx, path: web::Path<String>) -> Result<impl Responder, Error> {
    require_admin(&client)?;
    let job = parse_job(&path)?;
    let enabled = toggle_job(get_db_pool(), job)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "job": job,
        "enabled": enabled,
        "message": format!("{}を{}しました", job.label(), if enabled { "開始" } else { "停止" }),
    })))
}

#[get("/api/admin/jobs/{job}/logs")]
pub async fn view_job_logs(client: ClientCtx, path: web::Path<String>) -> Result<impl Responder, Error> {
    require_admin(&client)?;
    let job = parse_job(&path)?;
    let logs: Vec<JobLogLine> = recent_logs(get_db_pool(), job, JOB_LOG_LIMIT)
        .await
        .map_err(error::ErrorInternalServerError)?
        .into_iter()
        .map(|l| JobLogLine {
            id: l.id,
            status: l.status,
            action_type: l.action_type,
            post_id: l.post_id,
            user_id: l.user_id,
            message: l.message,
            error_message: l.error_message,
            executed_at: l.executed_at,
        })
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "logs": logs,
    })))
}
