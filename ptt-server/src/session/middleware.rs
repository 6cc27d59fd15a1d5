use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::record::Session;
use crate::infra::AppState;
use crate::infra::errors::AppError;
use crate::views::Viewer;

/// The caller's session, placed in request extensions by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Arc<Session>);

impl CurrentSession {
    pub fn viewer(&self) -> Viewer {
        Viewer {
            username: Some(self.0.username().to_string()),
            project: self.0.project().map(|project| project.name),
        }
    }
}

impl std::ops::Deref for CurrentSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("sign in to continue"))
    }
}

/// Rejects requests without a live session with 401 and re-issues the
/// cookie on the way out for those that have one.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let sessions = &state.sessions;
    let cookie = sessions.cookie();

    let Some(id) = cookie.extract(request.headers()) else {
        return AppError::unauthorized("sign in to continue").into_response();
    };
    let Some(session) = sessions.lookup(&id) else {
        debug!(path = %request.uri().path(), "rejected unknown or expired session");
        let mut response =
            AppError::unauthorized("your session has expired").into_response();
        cookie.apply(response.headers_mut(), &cookie.invalidate(&id));
        return response;
    };

    request.extensions_mut().insert(CurrentSession(session));
    let mut response = next.run(request).await;

    // Sign-out removes the session and sets its own invalidating cookie.
    if sessions.contains(&id) {
        cookie.apply(response.headers_mut(), &cookie.issue(&id));
    }
    response
}
