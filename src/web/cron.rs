use crate::automation::{self, authorize, CronRequest, Job, JobError};
use crate::db::get_db_pool;
use crate::global::get_api_secret;
use actix_web::{post, web, Error, HttpRequest, HttpResponse, Responder};

pub const API_SECRET_HEADER: &str = "x-api-secret";

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(trigger_job);
}

/// Runs an automation job. The body is optional and only read by the auto-creator and auto-voter.
#[post("/api/cron/{job}")]
pub async fn trigger_job(
    req: HttpRequest,
    path: web::Path<String>,
    body: Option<web::Json<CronRequest>>,
) -> Result<impl Responder, Error> {
    let provided = req
        .headers()
        .get(API_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    authorize(provided, get_api_secret())?;

    let job = Job::from_slug(&path).ok_or(JobError::UnknownJob)?;
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let report = automation::trigger(get_db_pool(), job, request).await?;

    Ok(HttpResponse::Ok().json(report.to_json()))
}
