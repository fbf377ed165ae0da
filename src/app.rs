//! HTTP application wiring: shared state and route table.
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::cookies::CookieSettings;
use crate::password::Passwords;
use crate::session::SessionStore;
use crate::store::{ApplicationRepository, StudentRepository, UserRepository};
use crate::token::TokenService;
use crate::{applications, auth, err, proceeds, students, users, Payload};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub students: Arc<dyn StudentRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub tokens: TokenService,
    pub passwords: Passwords,
    pub cookies: CookieSettings,
    pub session_ttl: Duration,
}

impl AppState {
    /// State over one store object that backs every repository.
    pub fn new<S>(store: Arc<S>, sessions: Arc<dyn SessionStore>, config: &AppConfig) -> Self
    where
        S: UserRepository + StudentRepository + ApplicationRepository + 'static,
    {
        Self {
            users: store.clone(),
            students: store.clone(),
            applications: store,
            sessions,
            tokens: TokenService::from_config(config),
            passwords: Passwords::with_rounds(config.password_hash_rounds),
            cookies: CookieSettings::from_config(config),
            session_ttl: config.session_ttl(),
        }
    }
}

#[derive(Serialize)]
struct Health {
    message: &'static str,
}

async fn healthchecker() -> Payload<Health> {
    proceeds(Health {
        message: "Student records server is up",
    })
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    log::info!(
        "{} {} -> {} in {:?}",
        method,
        uri.path(),
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", get(auth::refresh))
        .route("/logout", get(auth::logout))
        .route("/verifyemail/:code", get(auth::verify_email))
        .route("/me", get(users::me));

    let student_routes = Router::new()
        .route(
            "/",
            get(students::list_students).post(students::create_student),
        )
        .route("/me", get(students::me_as_student))
        .route(
            "/:id",
            get(students::get_student)
                .patch(students::update_student)
                .delete(students::delete_student),
        );

    let application_routes = Router::new()
        .route(
            "/",
            get(applications::list_applications).post(applications::create_application),
        )
        .route("/:id", patch(applications::answer_application));

    Router::new()
        .route("/api/healthchecker", get(healthchecker))
        .nest("/api/auth", auth_routes)
        .nest("/api/users", Router::new().route("/me", get(users::me)))
        .nest("/api/students", student_routes)
        .nest("/api/applications", application_routes)
        .fallback(err::handler404)
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}
