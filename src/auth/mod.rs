//! Authentication module
//!
//! Access tokens, refresh-token sessions, CSRF protection and the HTTP
//! handlers that expose them.

pub mod cookies;
pub mod csrf;
pub mod handlers;
pub mod jwt;
pub mod mailer;
pub mod service;
pub mod validation;

pub use cookies::CookiePolicy;
pub use csrf::CsrfIssuer;
pub use jwt::{AccessTokenCodec, Claims};
pub use mailer::VerificationMailer;
pub use service::{AuthService, LoginResult, TokenPair};
