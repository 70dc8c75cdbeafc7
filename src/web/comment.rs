use crate::comment::{self, NewComment};
use crate::db::get_db_pool;
use crate::middleware::ClientCtx;
use actix_web::{delete, error, get, post, web, Error, HttpResponse, Responder};

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_comments)
        .service(create_comment)
        .service(delete_comment);
}

#[get("/api/posts/{post_id}/comments")]
pub async fn view_comments(path: web::Path<i32>) -> Result<impl Responder, Error> {
    let comments = comment::list_comments(get_db_pool(), path.into_inner())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "comments": comments,
    })))
}

#[post("/api/posts/{post_id}/comments")]
pub async fn create_comment(
    client: ClientCtx,
    path: web::Path<i32>,
    form: web::Json<NewComment>,
) -> Result<impl Responder, Error> {
    if form.content.trim().is_empty() {
        return Err(error::ErrorUnprocessableEntity("コメントを入力してください"));
    }

    let comment = comment::create_comment(get_db_pool(), &client, path.into_inner(), form.into_inner()).await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "comment": comment,
    })))
}

#[delete("/api/comments/{comment_id}")]
pub async fn delete_comment(client: ClientCtx, path: web::Path<i32>) -> Result<impl Responder, Error> {
    super::require_user(&client)?;
    comment::delete_comment(get_db_pool(), &client, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}
