use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use authflow_server::auth::cookies::{
    ACCESS_TOKEN_COOKIE, CSRF_HEADER, CSRF_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
};
use authflow_server::config::CsrfMode;
use authflow_server::{configure_routes, AppState, Settings};
use serde_json::json;

const EMAIL: &str = "test@example.com";
const PASSWORD: &str = "Passw0rd123";

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state).configure(configure_routes)).await
    };
}

fn state(mode: CsrfMode) -> web::Data<AppState> {
    let mut config = Settings::new_for_test().expect("Failed to load test config");
    config.csrf.mode = mode;
    web::Data::new(AppState::in_memory(config).expect("Failed to build state"))
}

fn cookie<B>(resp: &ServiceResponse<B>, name: &str) -> Option<Cookie<'static>> {
    resp.response()
        .cookies()
        .find(|c| c.name() == name)
        .map(|c| c.into_owned())
}

fn register_request(email: &str, password: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({ "email": email, "password": password }))
}

fn login_request(email: &str, password: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": email, "password": password }))
}

/// Cookies a browser would hold after login or refresh.
#[derive(Debug, Clone)]
struct Session {
    access: String,
    refresh: String,
    csrf: String,
}

impl Session {
    fn from_response<B>(resp: &ServiceResponse<B>) -> Self {
        let value = |name: &str| {
            cookie(resp, name)
                .unwrap_or_else(|| panic!("missing {name} cookie"))
                .value()
                .to_string()
        };
        Self {
            access: value(ACCESS_TOKEN_COOKIE),
            refresh: value(REFRESH_TOKEN_COOKIE),
            csrf: value(CSRF_TOKEN_COOKIE),
        }
    }

    fn cookies(&self, req: test::TestRequest) -> test::TestRequest {
        req.cookie(Cookie::new(ACCESS_TOKEN_COOKIE, self.access.clone()))
            .cookie(Cookie::new(REFRESH_TOKEN_COOKIE, self.refresh.clone()))
            .cookie(Cookie::new(CSRF_TOKEN_COOKIE, self.csrf.clone()))
    }

    fn with_csrf(&self, req: test::TestRequest) -> test::TestRequest {
        self.cookies(req).insert_header((CSRF_HEADER, self.csrf.as_str()))
    }
}

#[actix_web::test]
async fn test_register() {
    let app = init_app!(state(CsrfMode::Time));

    let resp = test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "registration successful");
    assert_eq!(body["user"]["email"], EMAIL);
    assert_eq!(body["user"]["verified"], true);
    assert!(body["user"].get("password_hash").is_none());

    let resp = test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_invalid_registration() {
    let app = init_app!(state(CsrfMode::Time));

    for (email, password) in [("invalid-email", PASSWORD), (EMAIL, "weak"), (EMAIL, "nodigitsHere")] {
        let resp = test::call_service(&app, register_request(email, password).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{email} / {password}");
    }

    let resp = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({ "email": EMAIL }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_login_sets_session_cookies() {
    let app = init_app!(state(CsrfMode::Time));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;

    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let access = cookie(&resp, ACCESS_TOKEN_COOKIE).unwrap();
    let refresh = cookie(&resp, REFRESH_TOKEN_COOKIE).unwrap();
    let csrf = cookie(&resp, CSRF_TOKEN_COOKIE).unwrap();
    assert_eq!(access.http_only(), Some(true));
    assert_eq!(refresh.http_only(), Some(true));
    assert_eq!(csrf.http_only(), Some(false));
    assert_eq!(access.path(), Some("/"));
    assert!(!csrf.value().is_empty());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["email"], EMAIL);
}

#[actix_web::test]
async fn test_invalid_login() {
    let app = init_app!(state(CsrfMode::Time));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;

    for (email, password) in [(EMAIL, "Wrongpassw0rd"), ("nonexistent@example.com", PASSWORD)] {
        let resp = test::call_service(&app, login_request(email, password).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(cookie(&resp, REFRESH_TOKEN_COOKIE).is_none());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["status"], 401);
        assert_eq!(body["error"]["message"], "Invalid email or password");
    }
}

#[actix_web::test]
async fn test_login_rejects_malformed_email() {
    let app = init_app!(state(CsrfMode::Time));

    let resp = test::call_service(&app, login_request("not-an-email", PASSWORD).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(cookie(&resp, REFRESH_TOKEN_COOKIE).is_none());
}

#[actix_web::test]
async fn test_me_requires_access_token() {
    let app = init_app!(state(CsrfMode::Time));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let session = Session::from_response(&resp);

    let resp = test::TestRequest::get().uri("/api/user/me").send_request(&app).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = session
        .cookies(test::TestRequest::get().uri("/api/user/me"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["email"], EMAIL);

    let resp = test::TestRequest::get()
        .uri("/api/user/me")
        .insert_header(("Authorization", format!("Bearer {}", session.access)))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::TestRequest::get()
        .uri("/api/user/me")
        .insert_header(("Authorization", "Bearer not.a.token"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_refresh_rotates_cookies() {
    let app = init_app!(state(CsrfMode::Time));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let first = Session::from_response(&resp);

    let resp = first
        .cookies(test::TestRequest::post().uri("/api/auth/refresh"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let second = Session::from_response(&resp);
    assert_ne!(second.refresh, first.refresh);

    let resp = second
        .cookies(test::TestRequest::get().uri("/api/user/me"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Replaying the consumed token fails and takes the successor down with it
    let resp = first
        .cookies(test::TestRequest::post().uri("/api/auth/refresh"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = second
        .cookies(test::TestRequest::post().uri("/api/auth/refresh"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_refresh_without_cookie() {
    let app = init_app!(state(CsrfMode::Time));
    let resp = test::TestRequest::post().uri("/api/auth/refresh").send_request(&app).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_logout_requires_csrf() {
    let app = init_app!(state(CsrfMode::Time));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let session = Session::from_response(&resp);

    let resp = session
        .cookies(test::TestRequest::post().uri("/api/auth/logout"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = session
        .cookies(test::TestRequest::post().uri("/api/auth/logout"))
        .insert_header((CSRF_HEADER, "forged"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = session
        .with_csrf(test::TestRequest::post().uri("/api/auth/logout"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cleared = cookie(&resp, REFRESH_TOKEN_COOKIE).unwrap();
    assert_eq!(cleared.value(), "");
    assert_eq!(cleared.max_age(), Some(actix_web::cookie::time::Duration::ZERO));

    let resp = session
        .cookies(test::TestRequest::post().uri("/api/auth/refresh"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_logout_without_session_succeeds() {
    for mode in [CsrfMode::Time, CsrfMode::Session] {
        let app = init_app!(state(mode));

        let resp = test::TestRequest::post()
            .uri("/api/auth/logout")
            .cookie(Cookie::new(CSRF_TOKEN_COOKIE, "abc"))
            .insert_header((CSRF_HEADER, "abc"))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), StatusCode::OK, "{mode:?}");
        let cleared = cookie(&resp, CSRF_TOKEN_COOKIE).unwrap();
        assert_eq!(cleared.max_age(), Some(actix_web::cookie::time::Duration::ZERO));

        let resp = test::TestRequest::post()
            .uri("/api/auth/logout")
            .cookie(Cookie::new(CSRF_TOKEN_COOKIE, "abc"))
            .insert_header((CSRF_HEADER, "abd"))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{mode:?}");
    }
}

#[actix_web::test]
async fn test_logout_all_and_sessions() {
    let app = init_app!(state(CsrfMode::Time));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let laptop = Session::from_response(&resp);
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let phone = Session::from_response(&resp);

    let resp = laptop
        .cookies(test::TestRequest::get().uri("/api/user/sessions"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["sessions"].as_array().map(Vec::len), Some(2));
    assert!(body["sessions"][0].get("token").is_none());

    let resp = laptop
        .cookies(test::TestRequest::post().uri("/api/auth/logout-all"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = laptop
        .with_csrf(test::TestRequest::post().uri("/api/auth/logout-all"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["revoked"], 2);

    let resp = phone
        .cookies(test::TestRequest::post().uri("/api/auth/refresh"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_session_bound_csrf_rejects_foreign_token() {
    let app = init_app!(state(CsrfMode::Session));
    test::call_service(&app, register_request(EMAIL, PASSWORD).to_request()).await;
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let victim = Session::from_response(&resp);
    let resp = test::call_service(&app, login_request(EMAIL, PASSWORD).to_request()).await;
    let attacker = Session::from_response(&resp);

    let forged = Session {
        csrf: attacker.csrf.clone(),
        ..victim.clone()
    };
    let resp = forged
        .with_csrf(test::TestRequest::post().uri("/api/auth/logout"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = victim
        .with_csrf(test::TestRequest::post().uri("/api/auth/logout"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}
