use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::CsrfMode;
use crate::error::{AppError, AuthError};

type HmacSha256 = Hmac<Sha256>;

/// Mints double-submit CSRF tokens.
///
/// Nothing is stored server side: a request passes when the `csrf_token` cookie
/// and the `X-CSRF-Token` header carry the same value. In [`CsrfMode::Session`]
/// the token must additionally be the MAC of the refresh token presented with
/// the request, so it cannot be replayed from another session.
#[derive(Clone)]
pub struct CsrfIssuer {
    secret: String,
    mode: CsrfMode,
}

impl CsrfIssuer {
    pub fn new(secret: impl Into<String>, mode: CsrfMode) -> Self {
        Self {
            secret: secret.into(),
            mode,
        }
    }

    pub fn mode(&self) -> CsrfMode {
        self.mode
    }

    /// Token to hand out alongside `refresh_token`.
    pub fn issue_for(&self, refresh_token: &str) -> String {
        match self.mode {
            CsrfMode::Time => self.issue(),
            CsrfMode::Session => self.issue_for_session(refresh_token),
        }
    }

    /// `hex(sha256(secret ":" unix_seconds))`
    pub fn issue(&self) -> String {
        self.issue_at(Utc::now().timestamp())
    }

    pub fn issue_at(&self, unix_seconds: i64) -> String {
        let digest = Sha256::digest(format!("{}:{}", self.secret, unix_seconds).as_bytes());
        hex::encode(digest)
    }

    /// `hex(hmac_sha256(secret, refresh_token))`
    pub fn issue_for_session(&self, refresh_token: &str) -> String {
        hex::encode(self.session_mac(refresh_token).finalize().into_bytes())
    }

    /// Double-submit check, plus the session binding when that mode is on and a
    /// refresh token was presented. Without a refresh token there is no session
    /// to bind to, so the plain comparison decides.
    pub fn check(
        &self,
        cookie: Option<&str>,
        header: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        let token = match (cookie, header) {
            (Some(cookie), Some(header)) if !cookie.is_empty() && cookie == header => cookie,
            _ => return Err(AuthError::CsrfMismatch.into()),
        };

        if let (CsrfMode::Session, Some(refresh)) = (self.mode, refresh_token) {
            if !self.verify_session_token(token, refresh) {
                return Err(AuthError::CsrfMismatch.into());
            }
        }
        Ok(())
    }

    fn verify_session_token(&self, token: &str, refresh_token: &str) -> bool {
        match hex::decode(token) {
            Ok(tag) => self.session_mac(refresh_token).verify_slice(&tag).is_ok(),
            Err(_) => false,
        }
    }

    fn session_mac(&self, refresh_token: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));
        mac.update(refresh_token.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_token_format() {
        let issuer = CsrfIssuer::new("secret", CsrfMode::Time);
        let token = issuer.issue_at(1_700_000_000);

        let expected = hex::encode(Sha256::digest(b"secret:1700000000"));
        assert_eq!(token, expected);
        assert_eq!(token.len(), 64);
        assert_ne!(token, issuer.issue_at(1_700_000_001));
    }

    #[test]
    fn test_time_token_bound_to_secret() {
        let a = CsrfIssuer::new("secret-a", CsrfMode::Time);
        let b = CsrfIssuer::new("secret-b", CsrfMode::Time);
        assert_ne!(a.issue_at(1), b.issue_at(1));
    }

    #[test]
    fn test_double_submit() {
        let issuer = CsrfIssuer::new("secret", CsrfMode::Time);
        let token = issuer.issue();

        assert!(issuer.check(Some(&token), Some(&token), None).is_ok());
        assert!(issuer.check(Some(&token), Some("other"), None).is_err());
        assert!(issuer.check(Some(&token), None, None).is_err());
        assert!(issuer.check(None, Some(&token), None).is_err());
        assert!(issuer.check(Some(""), Some(""), None).is_err());
    }

    #[test]
    fn test_session_mode_binds_to_refresh_token() {
        let issuer = CsrfIssuer::new("secret", CsrfMode::Session);
        let token = issuer.issue_for("refresh-one");

        assert_eq!(token, issuer.issue_for_session("refresh-one"));
        assert!(issuer.check(Some(&token), Some(&token), Some("refresh-one")).is_ok());
        assert!(issuer.check(Some(&token), Some(&token), Some("refresh-two")).is_err());
        assert!(issuer.check(Some(&token), None, None).is_err());

        // A matching pair of time-derived tokens is not enough in session mode
        let time_token = issuer.issue();
        assert!(issuer
            .check(Some(&time_token), Some(&time_token), Some("refresh-one"))
            .is_err());
    }

    #[test]
    fn test_session_mode_without_refresh_token_falls_back_to_double_submit() {
        let issuer = CsrfIssuer::new("secret", CsrfMode::Session);

        assert!(issuer.check(Some("abc"), Some("abc"), None).is_ok());
        assert!(issuer.check(Some("abc"), Some("abd"), None).is_err());
        assert!(issuer.check(Some("abc"), None, None).is_err());
    }

    #[test]
    fn test_time_mode_issue_for_ignores_refresh_token() {
        let issuer = CsrfIssuer::new("secret", CsrfMode::Time);
        let token = issuer.issue_for("refresh-one");
        assert!(issuer.check(Some(&token), Some(&token), Some("anything")).is_ok());
    }
}
