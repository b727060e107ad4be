//! Guarded handlers: the secret page and the profile.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use tracing::{info, warn};

use crate::error::{AccountError, AccountResult};
use crate::extractors::{CurrentSession, JsonBody};
use crate::middleware::session::{clear_cookies, AuthSession};
use crate::model::{AccountRequest, Direction, Message, Mutation, UserPayload};
use crate::router::AppState;
use crate::store::Deadline;

/// Reject a session whose own account no longer exists.
///
/// A login racing an account delete can store its session after the
/// delete purged the cache. Such a session is dropped along with any other
/// session of the user and the request is redirected like any other
/// rejected session.
fn reject_orphan(
    state: &AppState,
    session: &AuthSession,
    err: AccountError,
) -> AccountResult<Response> {
    match err {
        AccountError::UnknownUser(id) if id == session.user_id => {
            let purged = state.sessions.purge_user(id);
            warn!(id, purged, "session outlived its account");
            Ok(Redirect::to(&state.paths.login()).into_response())
        }
        other => Err(other),
    }
}

/// `GET /my/main`
///
/// # Errors
///
/// [`AccountError::NotFound`] while no secret has been stored.
pub async fn get_secret(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AccountResult<Response> {
    match state
        .accounts
        .get_secret(session.user_id, Deadline::after(state.deadlines.secret))
        .await
    {
        Ok(secret) => {
            info!(id = session.user_id, "secret read");
            Ok(Json(Message::new(secret)).into_response())
        }
        Err(err) => reject_orphan(&state, &session, err),
    }
}

/// `PUT /my/main`
///
/// # Errors
///
/// Persistence errors.
pub async fn put_secret(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    JsonBody(body): JsonBody<Message>,
) -> AccountResult<Response> {
    match state
        .accounts
        .set_secret(
            session.user_id,
            &body.message,
            Deadline::after(state.deadlines.secret),
        )
        .await
    {
        Ok(()) => {
            info!(id = session.user_id, "secret uploaded");
            Ok((StatusCode::CREATED, Json(Message::new("upload secret"))).into_response())
        }
        Err(err) => reject_orphan(&state, &session, err),
    }
}

/// `GET /ownid`
///
/// # Errors
///
/// Persistence errors.
pub async fn get_profile(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> AccountResult<Response> {
    match state
        .accounts
        .get_user_by_id(session.user_id, Deadline::after(state.deadlines.profile))
        .await
    {
        Ok(user) => Ok(Json(user).into_response()),
        Err(err) => reject_orphan(&state, &session, err),
    }
}

fn outcome(mutation: &Mutation, id: i64) -> (StatusCode, String) {
    match mutation {
        Mutation::NewLogin(_) => (
            StatusCode::CREATED,
            format!("user login with id={id} updated"),
        ),
        Mutation::NewPassword(_) => (
            StatusCode::CREATED,
            format!("user password with id={id} updated"),
        ),
        Mutation::NewName { .. } => (
            StatusCode::CREATED,
            format!("user Name and Surname with id={id} updated"),
        ),
        Mutation::NewEmail(_) => (
            StatusCode::CREATED,
            format!("user email with id={id} updated"),
        ),
        Mutation::Delete => (StatusCode::OK, format!("user with id={id} deleted")),
    }
}

/// `PUT /ownid`: apply a profile mutation, then end the session.
///
/// After a successful change the current session is removed and every
/// request cookie cleared; a deleted account loses all of its sessions.
/// A delete that times out may still have committed, so its sessions are
/// purged as well.
///
/// # Errors
///
/// Validation errors for the payload, persistence errors otherwise. The
/// session survives any other failed mutation.
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<UserPayload>,
) -> AccountResult<Response> {
    let direct = payload.direct;
    if let Ok(Direction::UserCreate | Direction::UserConnect) = Direction::try_from(direct) {
        return Err(AccountError::UnsupportedOperation(direct));
    }
    let AccountRequest::Change(mutation) = AccountRequest::try_from(payload)? else {
        return Err(AccountError::UnsupportedOperation(direct));
    };

    let id = session.user_id;
    let applied = state
        .accounts
        .apply(id, &mutation, Deadline::after(state.deadlines.profile))
        .await;

    match applied {
        Ok(()) => {}
        Err(err @ AccountError::Timeout { .. }) if mutation == Mutation::Delete => {
            let purged = state.sessions.purge_user(id);
            warn!(id, purged, "account delete outcome unknown, sessions purged");
            return Err(err);
        }
        Err(err) => return reject_orphan(&state, &session, err),
    }

    if mutation == Mutation::Delete {
        let purged = state.sessions.purge_user(id);
        info!(id, purged, "account deleted");
    } else {
        state.sessions.delete(&session.token);
        info!(id, direct, "account updated");
    }

    let (status, message) = outcome(&mutation, id);
    let mut response = (status, Json(Message::new(message))).into_response();
    clear_cookies(&headers, response.headers_mut(), &state.cookies);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            outcome(&Mutation::NewEmail("a@b.c".into()), 4),
            (StatusCode::CREATED, "user email with id=4 updated".into())
        );
        assert_eq!(
            outcome(&Mutation::Delete, 4),
            (StatusCode::OK, "user with id=4 deleted".into())
        );
    }
}
