use super::require_user;
use crate::db::get_db_pool;
use crate::middleware::ClientCtx;
use crate::post::{self, NewPost, PostFilter, UpdatePost};
use actix_web::{delete, error, get, patch, post, put, web, Error, HttpResponse, Responder};
use serde::Deserialize;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_posts)
        .service(create_post)
        .service(view_my_posts)
        .service(view_post)
        .service(update_post)
        .service(delete_post)
        .service(restore_post)
        .service(select_best_answer)
        .service(clear_best_answer);
}

#[derive(Deserialize)]
pub struct PostListQuery {
    pub page: Option<u64>,
    pub category: Option<i32>,
    pub keyword: Option<String>,
    pub user: Option<i32>,
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct BestAnswerFormData {
    pub comment_id: i32,
}

#[get("/api/posts")]
pub async fn view_posts(query: web::Query<PostListQuery>) -> Result<impl Responder, Error> {
    let query = query.into_inner();
    let page = query.page.unwrap_or(1).max(1);
    let filter = PostFilter {
        category: query.category,
        keyword: query.keyword,
        user: query.user,
        q: query.q,
    };
    let posts = post::list_posts(get_db_pool(), &filter, page)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "page": page,
        "posts": posts,
    })))
}

#[post("/api/posts")]
pub async fn create_post(client: ClientCtx, form: web::Json<NewPost>) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let created = post::create_post(get_db_pool(), user_id, form.into_inner()).await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "id": created.id,
        "message": created.message,
    })))
}

#[get("/api/my-posts")]
pub async fn view_my_posts(client: ClientCtx) -> Result<impl Responder, Error> {
    let user_id = require_user(&client)?;
    let posts = post::my_posts(get_db_pool(), user_id)
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "posts": posts,
    })))
}

#[get("/api/posts/{post_id}")]
pub async fn view_post(client: ClientCtx, path: web::Path<i32>) -> Result<impl Responder, Error> {
    let detail = post::view_post(get_db_pool(), &client, path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "post": detail,
    })))
}

#[patch("/api/posts/{post_id}")]
pub async fn update_post(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<UpdatePost>,
) -> Result<impl Responder, Error> {
    require_user(&client)?;
    post::update_post(get_db_pool(), &client, path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[delete("/api/posts/{post_id}")]
pub async fn delete_post(client: ClientCtx, path: web::Path<i32>) -> Result<impl Responder, Error> {
    require_user(&client)?;
    post::delete_post(get_db_pool(), &client, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[post("/api/posts/{post_id}/restore")]
pub async fn restore_post(client: ClientCtx, path: web::Path<i32>) -> Result<impl Responder, Error> {
    require_user(&client)?;
    post::restore_post(get_db_pool(), &client, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[put("/api/posts/{post_id}/best-answer")]
pub async fn select_best_answer(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<BestAnswerFormData>,
) -> Result<impl Responder, Error> {
    require_user(&client)?;
    let post_id = path.into_inner();
    post::select_best_answer(get_db_pool(), &client, post_id, form.comment_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "best_answer_id": form.comment_id,
    })))
}

#[delete("/api/posts/{post_id}/best-answer")]
pub async fn clear_best_answer(client: ClientCtx, path: web::Path<i32>) -> Result<impl Responder, Error> {
    require_user(&client)?;
    post::clear_best_answer(get_db_pool(), &client, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}
