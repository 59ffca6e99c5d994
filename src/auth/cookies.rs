use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{HttpRequest, HttpResponseBuilder};

use crate::config::CookieConfig;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const CSRF_TOKEN_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Cookie settings resolved once from [`CookieConfig`].
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    domain: Option<String>,
    secure: bool,
    same_site: SameSite,
}

impl CookiePolicy {
    pub fn from_config(config: &CookieConfig) -> Self {
        let same_site = match config.same_site.to_ascii_lowercase().as_str() {
            "lax" => SameSite::Lax,
            "none" => SameSite::None,
            _ => SameSite::Strict,
        };
        Self {
            domain: config.domain.clone().filter(|d| !d.is_empty()),
            secure: config.secure,
            same_site,
        }
    }

    fn build(&self, name: &'static str, value: String, max_age_secs: i64, http_only: bool) -> Cookie<'static> {
        let mut builder = Cookie::build(name, value)
            .path("/")
            .secure(self.secure)
            .http_only(http_only)
            .same_site(self.same_site)
            .max_age(time::Duration::seconds(max_age_secs));
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.finish()
    }

    /// Access and refresh tokens are HttpOnly. The CSRF cookie is readable by scripts,
    /// which echo it back in the `X-CSRF-Token` header.
    pub fn set_session(
        &self,
        response: &mut HttpResponseBuilder,
        tokens: SessionCookies<'_>,
    ) {
        response.cookie(self.build(
            ACCESS_TOKEN_COOKIE,
            tokens.access_token.to_string(),
            tokens.access_ttl_secs,
            true,
        ));
        response.cookie(self.build(
            REFRESH_TOKEN_COOKIE,
            tokens.refresh_token.to_string(),
            tokens.refresh_ttl_secs,
            true,
        ));
        response.cookie(self.build(
            CSRF_TOKEN_COOKIE,
            tokens.csrf_token.to_string(),
            tokens.refresh_ttl_secs,
            false,
        ));
    }

    pub fn clear_session(&self, response: &mut HttpResponseBuilder) {
        response.cookie(self.build(ACCESS_TOKEN_COOKIE, String::new(), 0, true));
        response.cookie(self.build(REFRESH_TOKEN_COOKIE, String::new(), 0, true));
        response.cookie(self.build(CSRF_TOKEN_COOKIE, String::new(), 0, false));
    }
}

pub struct SessionCookies<'a> {
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub csrf_token: &'a str,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

/// Non-empty cookie value.
pub fn read_cookie(req: &HttpRequest, name: &str) -> Option<String> {
    req.cookie(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

pub fn read_header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .filter(|value| !value.is_empty())
}

/// Access token from its cookie, falling back to `Authorization: Bearer`.
pub fn read_access_token(req: &HttpRequest) -> Option<String> {
    read_cookie(req, ACCESS_TOKEN_COOKIE).or_else(|| {
        read_header(req, "Authorization")
            .and_then(|h| h.strip_prefix("Bearer ").map(str::to_string))
            .filter(|token| !token.is_empty())
    })
}
