use std::fmt::Write;

use axum::{Json, extract::State, response::Html};
use ptt_contracts::{Category, Metadata};
use serde::Serialize;

use crate::db;
use crate::infra::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::session::CurrentSession;
use crate::views::{self, Page, escape};

/// One loaded module as listed on the index page and by `/api/modules`.
#[derive(Debug, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: Category,
    pub category_label: &'static str,
    pub metadata: Vec<Metadata>,
    pub root_path: String,
}

fn summaries(state: &AppState) -> Vec<ModuleSummary> {
    state
        .plugins
        .iter()
        .map(|handle| {
            let info = handle.info();
            ModuleSummary {
                id: info.id.clone(),
                name: info.name.clone(),
                version: info.version.clone(),
                category: info.category,
                category_label: info.category.label(),
                metadata: info.metadata.clone(),
                root_path: handle.root_path(),
            }
        })
        .collect()
}

pub async fn modules_json(State(state): State<AppState>) -> Json<Vec<ModuleSummary>> {
    Json(summaries(&state))
}

pub async fn index(
    State(state): State<AppState>,
    session: CurrentSession,
) -> AppResult<Html<String>> {
    let projects = db::list_projects(&state.pool).await?;
    let selected = session.project().map(|project| project.id);

    let mut body = String::from("<h1>Modules</h1>\n");
    let modules = summaries(&state);
    if modules.is_empty() {
        body.push_str("<p>No modules are loaded.</p>\n");
    } else {
        body.push_str("<ul class=\"modules\">\n");
        for module in &modules {
            let _ = write!(
                body,
                "<li><a href=\"{}/index\">{}</a> <small>v{} &middot; {}</small>",
                escape(&module.root_path),
                escape(&module.name),
                escape(&module.version),
                module.category_label,
            );
            if !module.metadata.is_empty() {
                body.push_str("<dl>");
                for pair in &module.metadata {
                    let _ = write!(
                        body,
                        "<dt>{}</dt><dd>{}</dd>",
                        escape(&pair.key),
                        escape(&pair.value)
                    );
                }
                body.push_str("</dl>");
            }
            body.push_str("</li>\n");
        }
        body.push_str("</ul>\n");
    }

    body.push_str(
        "<h2>Project</h2>\n<form method=\"post\" action=\"/project/select\">\n\
         <select name=\"project_id\">\n<option value=\"\">(none)</option>\n",
    );
    for project in &projects {
        let marker = if selected.as_deref() == Some(project.id.as_str()) {
            " selected"
        } else {
            ""
        };
        let _ = writeln!(
            body,
            "<option value=\"{}\"{marker}>{}</option>",
            escape(&project.id),
            escape(&project.name)
        );
    }
    body.push_str("</select>\n<button type=\"submit\">Select</button>\n</form>\n");

    Ok(Html(views::render(Page {
        title: "Modules",
        body: &body,
        viewer: session.viewer(),
        ..Page::default()
    })))
}

/// Dev-mode route for checking the error page.
pub async fn debug_500() -> AppError {
    AppError::internal("debug error triggered")
}

pub async fn not_found() -> AppError {
    AppError::not_found("page not found")
}
