use super::require_user;
use crate::db::get_db_pool;
use crate::middleware::ClientCtx;
use crate::notification::{self, NotificationType, DEFAULT_LIMIT};
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use serde::Deserialize;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_notifications)
        .service(view_unread_count)
        .service(mark_read)
        .service(mark_all_read);
}

#[derive(Deserialize)]
pub struct NotificationQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct MarkReadFormData {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Either the target id or the notification link it can be parsed from.
    #[serde(alias = "targetId")]
    pub target_id: Option<i32>,
    pub link: Option<String>,
}

impl MarkReadFormData {
    fn target(&self) -> Option<i32> {
        self.target_id.or_else(|| {
            self.link
                .as_deref()
                .and_then(|link| notification::parse_target(self.kind, link))
        })
    }
}

#[get("/api/notifications")]
pub async fn view_notifications(client: ClientCtx, query: web::Query<NotificationQuery>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let page = notification::notifications(
        get_db_pool(),
        user_id,
        query.offset.unwrap_or(0),
        query.limit.unwrap_or(DEFAULT_LIMIT).min(100),
    )
    .await
    .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "notifications": page.notifications,
        "total": page.total,
        "has_more": page.has_more,
    })))
}

#[get("/api/notifications/unread")]
pub async fn view_unread_count(client: ClientCtx) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let count = notification::unread_count(get_db_pool(), user_id)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "count": count,
    })))
}

#[post("/api/notifications/mark-read")]
pub async fn mark_read(client: ClientCtx, form: web::Json<MarkReadFormData>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let target_id = form
        .target()
        .ok_or_else(|| error::ErrorBadRequest("通知の対象が見つかりません"))?;

    notification::mark_read(get_db_pool(), user_id, form.kind, target_id)
        .await
        .map_err(error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[post("/api/notifications/mark-all-read")]
pub async fn mark_all_read(client: ClientCtx) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let marked = notification::mark_all_read(get_db_pool(), user_id)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "marked": marked,
    })))
}
