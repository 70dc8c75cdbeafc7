mod admin;
mod comment;
mod cron;
pub mod error;
mod favorite;
mod keyword;
mod like;
mod notification;
mod point;
mod post;
mod vote;

use crate::middleware::ClientCtx;
use actix_web::{error as actix_error, Error};

/// Configures the web app
///
/// @see https://docs.rs/actix-web/4.0.1/actix_web/struct.App.html#method.configure
pub fn configure(conf: &mut actix_web::web::ServiceConfig) {
    admin::configure(conf);
    comment::configure(conf);
    cron::configure(conf);
    favorite::configure(conf);
    keyword::configure(conf);
    like::configure(conf);
    notification::configure(conf);
    point::configure(conf);
    post::configure(conf);
    vote::configure(conf);
}

/// The logged in user's id, or 401.
pub(crate) fn require_user(client: &ClientCtx) -> Result<i32, Error> {
    client
        .get_id()
        .ok_or_else(|| actix_error::ErrorUnauthorized("ログインが必要です"))
}

pub(crate) fn require_admin(client: &ClientCtx) -> Result<i32, Error> {
    let id = require_user(client)?;
    if client.is_admin() {
        Ok(id)
    } else {
        Err(actix_error::ErrorForbidden("権限がありません"))
    }
}
