#[cfg(test)]
mod tests {
    use actix_web::body::MessageBody;
    use actix_web::dev::ServiceResponse;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use anke::web::error::error_handlers;

    async fn error_text<B: MessageBody>(resp: ServiceResponse<B>) -> String {
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        body["error"].as_str().unwrap_or_default().to_owned()
    }

    #[actix_rt::test]
    async fn test_cron_rejects_bad_secret() {
        let mut app = test::init_service(App::new().wrap(error_handlers()).configure(anke::web::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/cron/auto-voter")
            .insert_header(("x-api-secret", "wrong"))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(!error_text(resp).await.is_empty());

        let req = test::TestRequest::post().uri("/api/cron/auto-creator").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_vote_requires_a_choice() {
        let mut app = test::init_service(App::new().wrap(error_handlers()).configure(anke::web::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/vote")
            .set_json(&serde_json::json!({ "postId": 1, "choiceIds": [] }))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_text(resp).await, "選択肢を選んでください");
    }

    #[actix_rt::test]
    async fn test_guest_endpoints_require_login() {
        let mut app = test::init_service(App::new().wrap(error_handlers()).configure(anke::web::configure)).await;

        for uri in ["/api/points", "/api/notifications/unread", "/api/my-posts", "/api/favorites"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&mut app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(error_text(resp).await, "ログインが必要です");
        }

        let req = test::TestRequest::post()
            .uri("/api/admin/ng-words/reload")
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_empty_input_rejected_before_storage() {
        let mut app = test::init_service(App::new().wrap(error_handlers()).configure(anke::web::configure)).await;

        let req = test::TestRequest::get().uri("/api/search?q=%20").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_text(resp).await, "検索キーワードを入力してください");

        let req = test::TestRequest::post()
            .uri("/api/posts/1/comments")
            .set_json(&serde_json::json!({ "content": "   " }))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_unknown_route_is_json() {
        let mut app = test::init_service(App::new().wrap(error_handlers()).configure(anke::web::configure)).await;

        let req = test::TestRequest::get().uri("/api/nothing-here").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }
}
