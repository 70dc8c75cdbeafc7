use super::require_user;
use crate::db::get_db_pool;
use crate::favorite;
use crate::middleware::ClientCtx;
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: u64 = 20;
const DEFAULT_RANKING_DAYS: i64 = 30;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(toggle_favorite)
        .service(view_favorites)
        .service(view_favorite_ranking)
        .service(check_favorite);
}

#[derive(Deserialize)]
pub struct FavoriteFormData {
    #[serde(alias = "postId")]
    pub post_id: i32,
}

#[derive(Deserialize)]
pub struct FavoriteListQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Deserialize)]
pub struct RankingQuery {
    pub limit: Option<u64>,
    pub days: Option<i64>,
}

#[post("/api/favorites/toggle")]
pub async fn toggle_favorite(client: ClientCtx, form: web::Json<FavoriteFormData>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let toggle = favorite::toggle_favorite(get_db_pool(), user_id, form.post_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "action": toggle.action,
        "count": toggle.count,
    })))
}

#[get("/api/favorites")]
pub async fn view_favorites(client: ClientCtx, query: web::Query<FavoriteListQuery>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(100);
    let offset = query.offset.unwrap_or(0);

    let db = get_db_pool();
    let post_ids = favorite::user_favorites(db, user_id, limit, offset)
        .await
        .map_err(error::ErrorInternalServerError)?;
    let total = favorite::user_favorite_count(db, user_id)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "post_ids": post_ids,
        "total": total,
    })))
}

#[get("/api/favorites/ranking")]
pub async fn view_favorite_ranking(query: web::Query<RankingQuery>) -> Result<impl Responder, Error> {
    let ranking = favorite::favorites_ranking(
        get_db_pool(),
        query.limit.unwrap_or(10).min(100),
        query.days.unwrap_or(DEFAULT_RANKING_DAYS),
    )
    .await
    .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "ranking": ranking,
    })))
}

#[get("/api/favorites/check/{post_id}")]
pub async fn check_favorite(client: ClientCtx, path: web::Path<i32>) -> Result<impl Responder, Error> {
    let post_id = path.into_inner();
    let db = get_db_pool();

    let favorited = match client.get_id() {
        Some(user_id) => favorite::is_favorited(db, user_id, post_id)
            .await
            .map_err(error::ErrorInternalServerError)?,
        None => false,
    };
    let count = favorite::favorite_count(db, post_id)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "favorited": favorited,
        "count": count,
    })))
}
