use axum::{
    Form,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::password;
use crate::db;
use crate::infra::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::session::{CurrentSession, ProjectRef, UserIdentity};
use crate::views::{self, Page, escape};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectProjectForm {
    #[serde(default)]
    pub project_id: String,
}

fn redirect(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn login_page(error: Option<&str>) -> String {
    let notice = error
        .map(|message| format!("<p class=\"error\">{}</p>\n", escape(message)))
        .unwrap_or_default();
    let body = format!(
        "<h1>Sign in</h1>\n{notice}<form method=\"post\" action=\"/login\">\n\
         <label>Username <input name=\"username\" autocomplete=\"username\" required></label>\n\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\" required></label>\n\
         <button type=\"submit\">Sign in</button>\n</form>"
    );
    views::render(Page {
        title: "Sign in",
        body: &body,
        ..Page::default()
    })
}

pub async fn login_form(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    let signed_in = state
        .sessions
        .cookie()
        .extract(&headers)
        .is_some_and(|id| state.sessions.lookup(&id).is_some());
    if signed_in {
        return redirect("/");
    }
    Html(login_page(None)).into_response()
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let rejected = || {
        (
            StatusCode::UNAUTHORIZED,
            Html(login_page(Some("Invalid username or password"))),
        )
            .into_response()
    };

    let Some(user) = db::find_user_by_username(&state.pool, &form.username).await? else {
        info!(username = %form.username.to_lowercase(), "login for unknown user");
        return Ok(rejected());
    };

    let hash = user.hash.clone();
    let verified = tokio::task::spawn_blocking(move || password::verify_password(&form.password, &hash))
        .await
        .map_err(|err| AppError::internal(format!("password check failed: {err}")))?
        .map_err(|err| {
            warn!(username = %user.username, error = %err, "stored password hash is unreadable");
            AppError::internal("password check failed")
        })?;
    if !verified {
        info!(username = %user.username, "login with wrong password");
        return Ok(rejected());
    }

    let session = state.sessions.create(UserIdentity {
        user_id: user.id,
        username: user.username,
        is_admin: user.is_admin,
    });
    let cookie = state.sessions.cookie();
    let mut response = redirect("/");
    cookie.apply(response.headers_mut(), &cookie.issue(session.id()));
    Ok(response)
}

pub async fn sign_out(State(state): State<AppState>, session: CurrentSession) -> Response {
    state.sessions.delete(session.id());
    info!(username = %session.username(), "signed out");

    let cookie = state.sessions.cookie();
    let mut response = redirect("/login");
    cookie.apply(response.headers_mut(), &cookie.invalidate(session.id()));
    response
}

/// An empty `project_id` clears the selection.
pub async fn select_project(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<SelectProjectForm>,
) -> AppResult<Response> {
    let project_id = form.project_id.trim();
    if project_id.is_empty() {
        session.set_project(None);
        return Ok(redirect("/"));
    }

    let project = db::find_project(&state.pool, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("no such project"))?;
    info!(username = %session.username(), project = %project.name, "project selected");
    session.set_project(Some(ProjectRef {
        id: project.id,
        name: project.name,
    }));
    Ok(redirect("/"))
}
