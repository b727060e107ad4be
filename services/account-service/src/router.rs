//! Route table and shared handler state.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::AccountServiceConfig;
use crate::handlers::{account, auth};
use crate::middleware::session::{AuthGuardLayer, CookieSettings};
use crate::services::session::SessionStore;
use crate::services::token::TokenIssuer;
use crate::store::{Deadlines, SharedAccounts};

/// Route prefix and the redirect targets derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base: String,
}

impl Paths {
    /// Paths under `base`. A trailing slash is ignored; `""` and `"/"` mount
    /// at the root.
    #[must_use]
    pub fn new(base: &str) -> Self {
        let trimmed = base.trim_end_matches('/');
        let base = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Self { base }
    }

    /// Route prefix, empty at the root.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Login page.
    #[must_use]
    pub fn login(&self) -> String {
        format!("{}/login", self.base)
    }

    /// Landing page after login.
    #[must_use]
    pub fn main(&self) -> String {
        format!("{}/my/main", self.base)
    }
}

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Account persistence.
    pub accounts: SharedAccounts,
    /// Live sessions.
    pub sessions: SessionStore,
    /// Token issuer for logins.
    pub tokens: TokenIssuer,
    /// Persistence budgets.
    pub deadlines: Deadlines,
    /// Session lifetime.
    pub session_ttl: Duration,
    /// Session cookie attributes.
    pub cookies: Arc<CookieSettings>,
    /// Route prefix.
    pub paths: Arc<Paths>,
}

impl AppState {
    /// Assemble state from configuration.
    #[must_use]
    pub fn new(accounts: SharedAccounts, config: &AccountServiceConfig) -> Self {
        let session_ttl = config.session.ttl();
        Self {
            accounts,
            sessions: SessionStore::new(),
            tokens: TokenIssuer::new(config.session.token_strategy),
            deadlines: Deadlines::from(&config.deadlines),
            session_ttl,
            cookies: Arc::new(CookieSettings {
                max_age: session_ttl,
                ..CookieSettings::default()
            }),
            paths: Arc::new(Paths::new(&config.service.base_path)),
        }
    }
}

/// Build the service router.
///
/// `/my/main` and `/ownid` sit behind the auth guard; the rest is public.
pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/my/main", get(account::get_secret).put(account::put_secret))
        .route(
            "/ownid",
            get(account::get_profile).put(account::update_profile),
        )
        .route_layer(AuthGuardLayer::new(
            state.sessions.clone(),
            state.paths.login(),
        ));

    let routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", get(auth::logout))
        .merge(guarded);

    let app = if state.paths.base().is_empty() {
        routes
    } else {
        Router::new().nest(state.paths.base(), routes)
    };

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
