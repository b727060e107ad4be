//! HTTP middleware.

pub mod session;

pub use session::{
    authorize, clear_cookies, read_cookie, set_session_cookies, AuthGuard, AuthGuardLayer,
    AuthSession, CookieSettings, SameSite, TOKEN_COOKIE, USER_ID_COOKIE,
};
