use crate::category;
use crate::db::get_db_pool;
use crate::keyword;
use crate::middleware::ClientCtx;
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use serde::Deserialize;

const DEFAULT_KEYWORD_LIMIT: u64 = 10;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_categories)
        .service(view_popular_keywords)
        .service(view_featured_keywords)
        .service(view_latest_keywords)
        .service(increment_keyword_view)
        .service(search);
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u64>,
}

impl LimitQuery {
    fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_KEYWORD_LIMIT).clamp(1, 100)
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[get("/api/categories")]
pub async fn view_categories() -> Result<impl Responder, Error> {
    let categories = category::list_categories(get_db_pool())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "categories": categories,
    })))
}

#[get("/api/keywords/popular")]
pub async fn view_popular_keywords(query: web::Query<LimitQuery>) -> Result<impl Responder, Error> {
    let keywords = keyword::popular_keywords(get_db_pool(), query.limit())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "keywords": keywords,
    })))
}

#[get("/api/keywords/featured")]
pub async fn view_featured_keywords(query: web::Query<LimitQuery>) -> Result<impl Responder, Error> {
    let keywords = keyword::featured_keywords(get_db_pool(), query.limit())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "keywords": keywords,
    })))
}

#[get("/api/keywords/latest")]
pub async fn view_latest_keywords(query: web::Query<LimitQuery>) -> Result<impl Responder, Error> {
    let keywords = keyword::latest_keywords(get_db_pool(), query.limit())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "keywords": keywords,
    })))
}

#[post("/api/keywords/{keyword_id}/view")]
pub async fn increment_keyword_view(path: web::Path<i32>) -> Result<impl Responder, Error> {
    let found = keyword::increment_view(get_db_pool(), path.into_inner())
        .await
        .map_err(error::ErrorInternalServerError)?;
    if !found {
        return Err(error::ErrorNotFound("キーワードが見つかりません"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[get("/api/search")]
pub async fn search(client: ClientCtx, query: web::Query<SearchQuery>) -> Result<impl Responder, Error> {
    if query.q.trim().is_empty() {
        return Err(error::ErrorBadRequest("検索キーワードを入力してください"));
    }

    let result = keyword::search(get_db_pool(), &query.q, client.get_id()).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "keyword": result.keyword,
        "total": result.total,
        "posts": result.posts,
    })))
}
