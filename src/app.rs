use std::net::SocketAddr;

use axum::{routing::get, Router};

use crate::{auth, security::Pipeline, state::AppState};

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let pipeline = Pipeline::new(state.config.security.clone(), state.config.profile);
    let router = Router::new()
        .nest("/api/v1", auth::router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state);
    pipeline.apply(router)
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        extract::FromRef,
        http::{header, HeaderMap, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::{delivery::testing::Outbox, jwt::JwtKeys, validation::Registration},
        clock::SystemClock,
        config::{AppConfig, PERMISSIVE_CONTENT_SECURITY_POLICY},
        error::RATE_LIMIT_MESSAGE,
        users::Role,
    };

    struct TestApp {
        router: Router,
        state: AppState,
        outbox: Arc<Outbox>,
    }

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        raw: String,
        json: Value,
    }

    fn test_app_with(outbox: Outbox) -> TestApp {
        let outbox = Arc::new(outbox);
        let state = AppState::fake_with(
            AppConfig::for_tests(),
            outbox.clone(),
            Arc::new(SystemClock),
        );
        let router = build_app(state.clone()).unwrap();
        TestApp {
            router,
            state,
            outbox,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(Outbox::default())
    }

    fn signup_body(name: &str) -> Value {
        json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "username": name,
            "email": format!("{name}@example.com"),
            "password": "Secret123",
            "passwordConfirm": "Secret123",
        })
    }

    impl TestApp {
        async fn send(&self, request: Request<Body>) -> Reply {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let raw = String::from_utf8(bytes.to_vec()).unwrap();
            let json = serde_json::from_str(&raw).unwrap_or(Value::Null);
            Reply {
                status,
                headers,
                raw,
                json,
            }
        }

        async fn call(&self, method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Reply {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.send(request).await
        }

        /// Signs up `name` and returns `(token, user id)`.
        async fn signup(&self, name: &str) -> (String, Uuid) {
            let reply = self
                .call(Method::POST, "/api/v1/users/signup", Some(signup_body(name)), None)
                .await;
            assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.raw);
            let token = reply.json["token"].as_str().unwrap().to_string();
            let id = reply.json["data"]["user"]["id"].as_str().unwrap().parse().unwrap();
            (token, id)
        }

        async fn login(&self, email: &str, password: &str) -> Reply {
            self.call(
                Method::POST,
                "/api/v1/users/login",
                Some(json!({"email": email, "password": password})),
                None,
            )
            .await
        }
    }

    #[tokio::test]
    async fn signup_returns_session_without_password() {
        let app = test_app();
        let reply = app
            .call(Method::POST, "/api/v1/users/signup", Some(signup_body("ada")), None)
            .await;

        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.json["status"], "success");
        assert_eq!(reply.json["data"]["user"]["email"], "ada@example.com");
        assert_eq!(reply.json["data"]["user"]["role"], "user");
        assert!(!reply.raw.to_lowercase().contains("password"));

        let cookie = reply.headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("jwt="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
    }

    #[tokio::test]
    async fn signup_reports_every_invalid_field() {
        let app = test_app();
        let reply = app
            .call(
                Method::POST,
                "/api/v1/users/signup",
                Some(json!({"username": "ab", "email": "nope", "password": "short"})),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json["status"], "fail");
        let fields: Vec<&str> = reply.json["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(
            fields,
            ["firstName", "lastName", "username", "email", "password", "passwordConfirm"]
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let app = test_app();
        app.signup("ada").await;

        let mut body = signup_body("ada2");
        body["email"] = json!("ADA@example.com");
        let reply = app
            .call(Method::POST, "/api/v1/users/signup", Some(body), None)
            .await;
        assert_eq!(reply.status, StatusCode::CONFLICT);
        assert_eq!(app.state.credentials.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let app = test_app();
        app.signup("ada").await;

        assert_eq!(app.login("ada@example.com", "Secret123").await.status, StatusCode::OK);
        let reply = app.login("ada@example.com", "Wrong1234").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.json["message"], "Incorrect email or password");
    }

    #[tokio::test]
    async fn api_is_rate_limited_per_client() {
        let app = test_app();
        for n in 0..100 {
            let reply = app.call(Method::GET, "/api/v1/users/me", None, None).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
            if n == 0 {
                assert_eq!(reply.headers["x-ratelimit-limit"], "100");
                assert_eq!(reply.headers["x-ratelimit-remaining"], "99");
            }
        }

        let reply = app.call(Method::GET, "/api/v1/users/me", None, None).await;
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(reply.json["message"], RATE_LIMIT_MESSAGE);
        assert!(reply.headers.contains_key(header::RETRY_AFTER));

        let health = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(health.status, StatusCode::OK);
        assert!(!health.headers.contains_key("x-ratelimit-limit"));

        let other = app
            .send(
                Request::builder()
                    .uri("/api/v1/users/me")
                    .header("x-forwarded-for", "203.0.113.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(other.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = test_app();
        let mut body = signup_body("ada");
        body["firstName"] = json!("x".repeat(11 * 1024));
        let reply = app
            .call(Method::POST, "/api/v1/users/signup", Some(body), None)
            .await;
        assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.state.credentials.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_before_handlers() {
        let app = test_app();
        let reply = app
            .send(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/users/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"email\": \"a@b.io\","))
                    .unwrap(),
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json["status"], "fail");
    }

    #[tokio::test]
    async fn operator_keys_never_reach_the_store() {
        let app = test_app();
        app.signup("ada").await;

        let reply = app
            .call(
                Method::POST,
                "/api/v1/users/login",
                Some(json!({"email": {"$gt": ""}, "password": "Secret123"})),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json["message"], "Please provide email and password!");
    }

    #[tokio::test]
    async fn markup_in_input_is_escaped() {
        let app = test_app();
        let mut body = signup_body("ada");
        body["firstName"] = json!("<script>alert(1)</script>");
        let reply = app
            .call(Method::POST, "/api/v1/users/signup", Some(body), None)
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(
            reply.json["data"]["user"]["firstName"],
            "&lt;script&gt;alert(1)&lt;/script&gt;"
        );
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let app = test_app();
        let reply = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(reply.headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(reply.headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(
            reply.headers[header::CONTENT_SECURITY_POLICY],
            PERMISSIVE_CONTENT_SECURITY_POLICY
        );
        assert_eq!(reply.headers["cross-origin-resource-policy"], "cross-origin");
        assert!(!reply.headers.contains_key("cross-origin-embedder-policy"));
    }

    #[tokio::test]
    async fn reset_token_works_exactly_once() {
        let app = test_app();
        app.signup("ada").await;

        let reply = app
            .call(
                Method::POST,
                "/api/v1/users/forgotPassword",
                Some(json!({"email": "ada@example.com"})),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json["message"], "Token sent to email!");
        let sent = app.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("http://localhost:8080/api/v1/users/resetPassword/"));

        let token = app.outbox.last_token().unwrap();
        let uri = format!("/api/v1/users/resetPassword/{token}");
        let body = json!({"password": "NewSecret1", "passwordConfirm": "NewSecret1"});

        let first = app
            .call(Method::PATCH, &uri, Some(body.clone()), None)
            .await;
        assert_eq!(first.status, StatusCode::OK, "{}", first.raw);
        assert!(first.json["token"].is_string());

        let second = app.call(Method::PATCH, &uri, Some(body), None).await;
        assert_eq!(second.status, StatusCode::BAD_REQUEST);
        assert_eq!(second.json["message"], "Token is invalid or has expired");

        assert_eq!(app.login("ada@example.com", "NewSecret1").await.status, StatusCode::OK);
        assert_eq!(
            app.login("ada@example.com", "Secret123").await.status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_is_not_found() {
        let app = test_app();
        let reply = app
            .call(
                Method::POST,
                "/api/v1/users/forgotPassword",
                Some(json!({"email": "ghost@example.com"})),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert!(app.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_is_a_server_error() {
        let app = test_app_with(Outbox::failing());
        app.signup("ada").await;
        let reply = app
            .call(
                Method::POST,
                "/api/v1/users/forgotPassword",
                Some(json!({"email": "ada@example.com"})),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.json["message"], "Something went wrong");
    }

    #[tokio::test]
    async fn tokens_issued_before_password_change_are_rejected() {
        let app = test_app();
        let (token, id) = app.signup("ada").await;
        let keys = JwtKeys::from_ref(&app.state);
        let old = keys
            .sign_issued_at(id, OffsetDateTime::now_utc() - Duration::seconds(30))
            .unwrap();
        assert_eq!(
            app.call(Method::GET, "/api/v1/users/me", None, Some(&old)).await.status,
            StatusCode::OK
        );

        let reply = app
            .call(
                Method::PATCH,
                "/api/v1/users/updateMyPassword",
                Some(json!({
                    "passwordCurrent": "Secret123",
                    "password": "NewSecret1",
                    "passwordConfirm": "NewSecret1",
                })),
                Some(&token),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.raw);
        let fresh = reply.json["token"].as_str().unwrap().to_string();

        let stale = app.call(Method::GET, "/api/v1/users/me", None, Some(&old)).await;
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            stale.json["message"],
            "User recently changed password! Please log in again."
        );

        let me = app.call(Method::GET, "/api/v1/users/me", None, Some(&fresh)).await;
        assert_eq!(me.status, StatusCode::OK);
        assert_eq!(me.json["user"]["username"], "ada");
    }

    #[tokio::test]
    async fn update_password_requires_current_password() {
        let app = test_app();
        let (token, _) = app.signup("ada").await;
        let reply = app
            .call(
                Method::PATCH,
                "/api/v1/users/updateMyPassword",
                Some(json!({
                    "passwordCurrent": "Wrong1234",
                    "password": "NewSecret1",
                    "passwordConfirm": "NewSecret1",
                })),
                Some(&token),
            )
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.json["message"], "Your current password is wrong.");
    }

    #[tokio::test]
    async fn session_cookie_authenticates() {
        let app = test_app();
        let (token, _) = app.signup("ada").await;
        let reply = app
            .send(
                Request::builder()
                    .uri("/api/v1/users/me")
                    .header(header::COOKIE, format!("theme=dark; jwt={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn deleted_account_cannot_log_in() {
        let app = test_app();
        let (token, _) = app.signup("ada").await;

        let reply = app
            .call(Method::DELETE, "/api/v1/users/deleteMe", None, Some(&token))
            .await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);

        assert_eq!(
            app.login("ada@example.com", "Secret123").await.status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            app.call(Method::GET, "/api/v1/users/me", None, Some(&token)).await.status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn only_admins_list_users() {
        let app = test_app();
        let (user_token, _) = app.signup("ada").await;
        let admin = app
            .state
            .credentials
            .register(Registration {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                username: "grace".into(),
                email: "grace@example.com".into(),
                password: "Secret123".into(),
                password_confirm: "Secret123".into(),
                role: Role::Admin,
            })
            .await
            .unwrap();
        let admin_token = JwtKeys::from_ref(&app.state).sign(admin.id).unwrap();

        let denied = app
            .call(Method::GET, "/api/v1/users", None, Some(&user_token))
            .await;
        assert_eq!(denied.status, StatusCode::FORBIDDEN);

        let listed = app
            .call(Method::GET, "/api/v1/users", None, Some(&admin_token))
            .await;
        assert_eq!(listed.status, StatusCode::OK);
        assert_eq!(listed.json["results"], 2);
        assert!(listed.json["requestedAt"].is_string());
    }
}
