//! Signup, login and logout.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use tracing::info;

use crate::error::{AccountError, AccountResult};
use crate::extractors::JsonBody;
use crate::middleware::session::{clear_cookies, read_cookie, set_session_cookies, TOKEN_COOKIE};
use crate::model::{AccountRequest, Direction, Message, UserPayload};
use crate::router::AppState;
use crate::services::token::SessionToken;
use crate::store::Deadline;

fn expect_direction(payload: UserPayload, direction: Direction) -> AccountResult<AccountRequest> {
    if payload.direct != direction as i64 {
        return Err(AccountError::validation("incorrect direction in user data"));
    }
    AccountRequest::try_from(payload)
}

/// `POST /signup`
///
/// # Errors
///
/// Validation errors for a malformed payload, persistence errors otherwise.
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<UserPayload>,
) -> AccountResult<(StatusCode, Json<Message>)> {
    let AccountRequest::Create(account) = expect_direction(payload, Direction::UserCreate)? else {
        return Err(AccountError::validation("incorrect direction in user data"));
    };

    let id = state
        .accounts
        .create_user(&account, Deadline::after(state.deadlines.signup))
        .await?;

    info!(id, login = %account.login, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(Message::new(format!("new user ID={id}"))),
    ))
}

/// `GET /login`
pub async fn login_page() -> Json<Message> {
    Json(Message::new("Enter login and Password"))
}

/// `POST /login`: authenticate, open a session and redirect to the secret
/// page.
///
/// # Errors
///
/// [`AccountError::Auth`] when no account matches the credentials.
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<UserPayload>,
) -> AccountResult<Response> {
    let AccountRequest::Connect(attempt) = expect_direction(payload, Direction::UserConnect)?
    else {
        return Err(AccountError::validation("incorrect direction in user data"));
    };

    let user = state
        .accounts
        .authenticate_user(&attempt, Deadline::after(state.deadlines.login))
        .await?;

    let token = state.tokens.issue(&attempt.login, &attempt.password);
    state.sessions.put(&token, user.id, state.session_ttl);

    let mut response = Redirect::to(&state.paths.main()).into_response();
    set_session_cookies(response.headers_mut(), &token, user.id, &state.cookies);

    info!(id = user.id, "user logged in");
    Ok(response)
}

/// `GET /logout`: drop the session and every cookie.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = read_cookie(&headers, TOKEN_COOKIE) {
        state.sessions.delete(&SessionToken::new(token));
    }

    let mut response = Redirect::to(&state.paths.login()).into_response();
    clear_cookies(&headers, response.headers_mut(), &state.cookies);

    info!("user logged out");
    response
}
