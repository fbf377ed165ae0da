#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use student_records::app::{build_router, AppState};
use student_records::config::AppConfig;
use student_records::session::InMemorySessionStore;
use student_records::store::memory::InMemoryStore;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        redis_url: "redis://unused".to_string(),
        access_token_secret: "access-secret-for-tests".to_string(),
        refresh_token_secret: "refresh-secret-for-tests".to_string(),
        access_token_expires_in: 15,
        refresh_token_expires_in: 60,
        session_expires_in: 60,
        production: false,
        password_hash_rounds: 1_000,
    }
}

pub fn test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let state = AppState::new(store.clone(), sessions, &test_config());
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
    }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// `name=value` of a cookie set by the response.
pub fn set_cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

impl TestApp {
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }

    pub async fn send_with_cookie(&self, method: &str, uri: &str, cookie: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(COOKIE, cookie)
            .body(Body::empty())
            .expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }

    pub async fn register(&self, username: &str, password: &str, roles: &[&str]) -> Response {
        self.send(
            "POST",
            "/api/auth/register",
            Some(json!({ "username": username, "password": password, "roles": roles })),
            None,
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Response {
        self.send(
            "POST",
            "/api/auth/login",
            Some(json!({ "username": username, "password": password })),
            None,
        )
        .await
    }

    /// Logs in and returns the access token, panicking on failure.
    pub async fn access_token(&self, username: &str, password: &str) -> String {
        let response = self.login(username, password).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        body["access_token"].as_str().expect("access_token").to_string()
    }

    pub async fn admin_token(&self) -> String {
        let response = self.register("admin", "admin-password", &["admin"]).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        self.access_token("admin", "admin-password").await
    }

    pub async fn create_student(&self, admin: &str, student: Value) -> Response {
        self.send("POST", "/api/students", Some(student), Some(admin))
            .await
    }
}

pub fn student_body(identifier: &str, passport: &str, group: &str) -> Value {
    json!({
        "identifier": identifier,
        "last_name": "Karimov",
        "first_name": "Aziz",
        "passport_number": passport,
        "email": format!("{}@uni.edu", identifier.to_lowercase()),
        "group": group,
        "faculty": "Physics"
    })
}
