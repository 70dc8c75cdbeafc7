use actix_web::body::{BoxBody, EitherBody};
use actix_web::dev::ServiceResponse;
use actix_web::http::{header, header::HeaderValue, StatusCode};
use actix_web::middleware::{ErrorHandlerResponse, ErrorHandlers};
use actix_web::Result;

const INTERNAL_ERROR_MESSAGE: &str = "サーバーエラーが発生しました";

/// Every error status the API rewrites into a JSON document.
pub fn error_handlers<B: 'static>() -> ErrorHandlers<B> {
    ErrorHandlers::new()
        .handler(StatusCode::BAD_REQUEST, error_document)
        .handler(StatusCode::UNAUTHORIZED, error_document)
        .handler(StatusCode::FORBIDDEN, error_document)
        .handler(StatusCode::NOT_FOUND, error_document)
        .handler(StatusCode::CONFLICT, error_document)
        .handler(StatusCode::UNPROCESSABLE_ENTITY, error_document)
        .handler(StatusCode::INTERNAL_SERVER_ERROR, error_document)
}

/// The client-facing message for an error response. Internal errors never leak their cause.
pub fn error_message(status: StatusCode, error: Option<String>) -> String {
    if status.is_server_error() {
        return INTERNAL_ERROR_MESSAGE.to_owned();
    }
    error
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Error").to_owned())
}

pub fn error_document<B>(res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
    let status = res.status();
    if status.is_server_error() {
        if let Some(e) = res.response().error() {
            log::error!("{} {}: {}", res.request().method(), res.request().path(), e);
        }
    }

    let message = error_message(status, res.response().error().map(|e| e.to_string()));
    let body = BoxBody::new(
        serde_json::json!({
            "success": false,
            "error": message,
        })
        .to_string(),
    );
    let mut res: ServiceResponse<EitherBody<B>> = res.map_body(|_, _| EitherBody::<B, BoxBody>::right(body));

    let headers = res.response_mut().headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    // Proxies cache error documents unless told not to.
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok(ErrorHandlerResponse::Response(res))
}
