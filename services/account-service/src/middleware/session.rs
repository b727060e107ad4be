//! Session guard middleware and session cookies
//!
//! [`AuthGuardLayer`] resolves the `tokenU` cookie against the
//! [`SessionStore`] before a protected route runs. Resolved sessions are
//! placed in the request extensions as [`AuthSession`]; requests without a
//! live session are redirected to the login page.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::Request,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Redirect, Response},
};
use tower::{Layer, Service};

use crate::error::AuthFailure;
use crate::services::session::SessionStore;
use crate::services::token::SessionToken;

/// Cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "tokenU";

/// Cookie carrying the decimal user id.
pub const USER_ID_COOKIE: &str = "tokenID";

/// SameSite cookie policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SameSite {
    /// Strict same-site policy
    Strict,
    /// Lax same-site policy
    #[default]
    Lax,
    /// No same-site restriction (requires Secure)
    None,
}

impl SameSite {
    /// Convert to cookie attribute string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Attributes applied to session cookies.
#[derive(Clone, Debug)]
pub struct CookieSettings {
    /// Cookie path
    pub path: String,
    /// Lifetime of freshly issued cookies
    pub max_age: Duration,
    /// HTTP-only cookie
    pub http_only: bool,
    /// Secure cookie (HTTPS only)
    pub secure: bool,
    /// SameSite policy
    pub same_site: SameSite,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: Duration::from_secs(60 * 60),
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieSettings {
    fn attributes(&self, max_age_secs: u64, expires: SystemTime) -> String {
        let mut attributes = format!(
            "Path={}; Max-Age={}; Expires={}; SameSite={}",
            self.path,
            max_age_secs,
            httpdate::fmt_http_date(expires),
            self.same_site.as_str()
        );

        if self.http_only {
            attributes.push_str("; HttpOnly");
        }

        if self.secure {
            attributes.push_str("; Secure");
        }

        attributes
    }
}

/// A session resolved by [`AuthGuardLayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    /// Token from the request cookie.
    pub token: SessionToken,
    /// Owner of the session.
    pub user_id: i64,
}

/// Resolve the session named by the request cookies.
///
/// # Errors
///
/// [`AuthFailure::MissingSession`] without a token cookie,
/// [`AuthFailure::ExpiredOrUnknownSession`] when the store has no live entry.
pub fn authorize(sessions: &SessionStore, headers: &HeaderMap) -> Result<AuthSession, AuthFailure> {
    let token = read_cookie(headers, TOKEN_COOKIE)
        .map(SessionToken::new)
        .ok_or(AuthFailure::MissingSession)?;

    let user_id = sessions
        .get(&token)
        .ok_or(AuthFailure::ExpiredOrUnknownSession)?;

    Ok(AuthSession { token, user_id })
}

/// Layer guarding routes behind a live session
#[derive(Clone, Debug)]
pub struct AuthGuardLayer {
    sessions: SessionStore,
    login_path: Arc<str>,
}

impl AuthGuardLayer {
    /// Guard with `sessions`, redirecting rejected requests to `login_path`.
    #[must_use]
    pub fn new(sessions: SessionStore, login_path: impl Into<Arc<str>>) -> Self {
        Self {
            sessions,
            login_path: login_path.into(),
        }
    }
}

impl<S> Layer<S> for AuthGuardLayer {
    type Service = AuthGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthGuard {
            inner,
            sessions: self.sessions.clone(),
            login_path: self.login_path.clone(),
        }
    }
}

/// Middleware admitting only requests with a live session
#[derive(Clone, Debug)]
pub struct AuthGuard<S> {
    inner: S,
    sessions: SessionStore,
    login_path: Arc<str>,
}

impl<S> Service<Request> for AuthGuard<S>
where
    S: Service<Request, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let session = authorize(&self.sessions, req.headers());
        let login_path = self.login_path.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match session {
                Ok(session) => {
                    tracing::debug!(user_id = session.user_id, "session admitted");
                    req.extensions_mut().insert(session);
                    inner.call(req).await
                }
                Err(reason) => {
                    tracing::warn!(%reason, path = %req.uri().path(), "session rejected");
                    Ok(Redirect::to(&login_path).into_response())
                }
            }
        })
    }
}

/// Read a cookie from the request, url-decoding its value.
///
/// Empty values count as absent.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .and_then(|value| urlencoding::decode(value).ok())
        .map(std::borrow::Cow::into_owned)
}

/// Names of every cookie on the request.
#[must_use]
pub fn cookie_names(headers: &HeaderMap) -> Vec<String> {
    let mut names: Vec<String> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .map(|(key, _)| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

fn append_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(header_value) = HeaderValue::from_str(cookie) {
        headers.append(SET_COOKIE, header_value);
    }
}

/// Set `tokenU` and `tokenID` with the same expiry.
pub fn set_session_cookies(
    headers: &mut HeaderMap,
    token: &SessionToken,
    user_id: i64,
    settings: &CookieSettings,
) {
    let attributes = settings.attributes(
        settings.max_age.as_secs(),
        SystemTime::now() + settings.max_age,
    );

    for (name, value) in [
        (TOKEN_COOKIE, token.as_str().to_string()),
        (USER_ID_COOKIE, user_id.to_string()),
    ] {
        let cookie = format!("{name}={}; {attributes}", urlencoding::encode(&value));
        append_cookie(headers, &cookie);
    }
}

/// Expire every cookie present on the request, and the session cookies.
pub fn clear_cookies(request: &HeaderMap, response: &mut HeaderMap, settings: &CookieSettings) {
    let attributes = settings.attributes(0, UNIX_EPOCH);

    let mut names = cookie_names(request);
    for name in [TOKEN_COOKIE, USER_ID_COOKIE] {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    for name in names {
        append_cookie(response, &format!("{name}=; {attributes}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing, Router};
    use tower::ServiceExt;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request {
        let mut builder = axum::http::Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn set_cookies(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_read_cookie() {
        let h = headers("theme=dark; tokenU=abc%2Fdef; tokenID=7");
        assert_eq!(read_cookie(&h, TOKEN_COOKIE).as_deref(), Some("abc/def"));
        assert_eq!(read_cookie(&h, USER_ID_COOKIE).as_deref(), Some("7"));
        assert_eq!(read_cookie(&h, "missing"), None);
        assert_eq!(read_cookie(&headers("tokenU="), TOKEN_COOKIE), None);
    }

    #[test]
    fn test_session_cookies_share_expiry() {
        let mut h = HeaderMap::new();
        let token = SessionToken::new("a b".into());
        set_session_cookies(&mut h, &token, 12, &CookieSettings::default());

        let cookies = set_cookies(&h);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("tokenU=a%20b; "));
        assert!(cookies[1].starts_with("tokenID=12; "));
        assert!(cookies.iter().all(|c| c.contains("Max-Age=3600")));
        assert!(cookies.iter().all(|c| c.contains("HttpOnly")));

        let expires = |c: &str| c.split("Expires=").nth(1).unwrap().split(';').next().map(str::to_string);
        assert_eq!(expires(&cookies[0]), expires(&cookies[1]));
    }

    #[test]
    fn test_clear_cookies_expires_everything() {
        let request = headers("theme=dark; tokenU=abc");
        let mut response = HeaderMap::new();
        clear_cookies(&request, &mut response, &CookieSettings::default());

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 3);
        for name in ["theme=;", "tokenU=;", "tokenID=;"] {
            assert!(cookies.iter().any(|c| c.starts_with(name)), "{name} not cleared");
        }
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
        assert!(cookies
            .iter()
            .all(|c| c.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT")));
    }

    #[tokio::test]
    async fn test_authorize() {
        let sessions = SessionStore::new();
        let token = SessionToken::new("live".into());
        sessions.put(&token, 3, Duration::from_secs(60));

        assert_eq!(
            authorize(&sessions, &HeaderMap::new()),
            Err(AuthFailure::MissingSession)
        );
        assert_eq!(
            authorize(&sessions, &headers("tokenU=stale")),
            Err(AuthFailure::ExpiredOrUnknownSession)
        );
        assert_eq!(
            authorize(&sessions, &headers("tokenU=live")),
            Ok(AuthSession { token, user_id: 3 })
        );
    }

    #[tokio::test]
    async fn test_guard_redirects_or_forwards() {
        let sessions = SessionStore::new();
        sessions.put(&SessionToken::new("live".into()), 3, Duration::from_secs(60));

        let app = Router::new()
            .route(
                "/my/main",
                routing::get(|req: Request| async move {
                    req.extensions()
                        .get::<AuthSession>()
                        .map(|s| s.user_id.to_string())
                        .unwrap_or_default()
                }),
            )
            .layer(AuthGuardLayer::new(sessions, "/login"));

        let response = app
            .clone()
            .oneshot(get("/my/main", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login");

        let response = app
            .oneshot(get("/my/main", Some("tokenU=live")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"3");
    }
}
