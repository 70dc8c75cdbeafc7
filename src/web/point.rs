use super::require_user;
use crate::db::get_db_pool;
use crate::middleware::ClientCtx;
use crate::orm::points;
use crate::point::{self, PointType};
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_balance)
        .service(view_history)
        .service(request_exchange);
}

#[derive(Serialize)]
pub struct PointHistoryItem {
    pub id: i32,
    pub amount: i32,
    #[serde(rename = "type")]
    pub point_type: PointType,
    pub related_id: Option<i32>,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<points::Model> for PointHistoryItem {
    fn from(p: points::Model) -> Self {
        Self {
            id: p.id,
            amount: p.amount,
            point_type: p.point_type,
            related_id: p.related_id,
            note: p.note,
            created_at: p.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u64>,
}

#[derive(Deserialize)]
pub struct ExchangeFormData {
    pub amount: i32,
    pub contact: String,
}

#[get("/api/points")]
pub async fn view_balance(client: ClientCtx) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let balance = point::balance(get_db_pool(), user_id)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "points": balance,
    })))
}

#[get("/api/points/history")]
pub async fn view_history(client: ClientCtx, query: web::Query<HistoryQuery>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let page = query.page.unwrap_or(1).max(1);
    let history: Vec<PointHistoryItem> = point::history(get_db_pool(), user_id, page)
        .await
        .map_err(error::ErrorInternalServerError)?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "page": page,
        "history": history,
    })))
}

#[post("/api/points/exchange")]
pub async fn request_exchange(client: ClientCtx, form: web::Json<ExchangeFormData>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let yen = point::request_exchange(get_db_pool(), user_id, form.amount, &form.contact).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "yen": yen,
        "message": format!("{}ポイントを{}円分に交換申請しました", form.amount, yen),
    })))
}
