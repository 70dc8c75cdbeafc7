use crate::db::get_db_pool;
use crate::like::{self, LikeKind, Liker};
use crate::middleware::ClientCtx;
use actix_web::{error, post, web, Error, HttpResponse, Responder};
use serde::Deserialize;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(toggle_like);
}

#[derive(Deserialize)]
pub struct LikeFormData {
    #[serde(alias = "likeType")]
    pub like_type: LikeKind,
    #[serde(alias = "targetId")]
    pub target_id: i32,
}

#[post("/api/likes")]
pub async fn toggle_like(client: ClientCtx, form: web::Json<LikeFormData>) -> Result<impl Responder, Error> {
    let liker = Liker::from_client(&client).ok_or_else(|| error::ErrorBadRequest("セッションが必要です"))?;
    let state = like::toggle_like(get_db_pool(), form.like_type, form.target_id, &liker).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "liked": state.liked,
        "like_count": state.like_count,
    })))
}
