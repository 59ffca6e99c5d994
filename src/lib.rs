pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;

use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use crate::config::Settings;

pub use auth::{AuthService, CookiePolicy, CsrfIssuer};
pub use db::{DbOperations, MemoryStore, TokenRepository, User, UserRepository};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub csrf: Arc<CsrfIssuer>,
    pub cookies: CookiePolicy,
}

impl AppState {
    pub fn new(
        config: Settings,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenRepository>,
    ) -> Result<Self> {
        let auth_service = AuthService::new(users, tokens, &config.auth)?;
        Ok(Self::with_service(config, auth_service))
    }

    /// State around an already configured service, e.g. one with a mailer attached.
    pub fn with_service(config: Settings, auth_service: AuthService) -> Self {
        let csrf = CsrfIssuer::new(config.auth.jwt_secret.clone(), config.csrf.mode);
        let cookies = CookiePolicy::from_config(&config.cookie);
        Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            csrf: Arc::new(csrf),
            cookies,
        }
    }

    /// State backed by the in-process store.
    pub fn in_memory(config: Settings) -> Result<Self> {
        let store = MemoryStore::new();
        Self::new(config, Arc::new(store.clone()), Arc::new(store))
    }
}

/// Routes served by the application, shared by the server binary and tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    use auth::handlers;

    cfg.route("/health", web::get().to(health_check))
        .service(
            web::scope("/api/auth")
                .route("/register", web::post().to(handlers::register))
                .route("/login", web::post().to(handlers::login))
                .route("/refresh", web::post().to(handlers::refresh))
                .route("/logout", web::post().to(handlers::logout))
                .route("/logout-all", web::post().to(handlers::logout_all)),
        )
        .service(
            web::scope("/api/user")
                .route("/me", web::get().to(handlers::me))
                .route("/sessions", web::get().to(handlers::sessions)),
        );
}
