//! Host HTTP surface: sign-in, the module index and every mounted module
//! route.

pub mod auth;
pub mod pages;
pub mod users;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, header},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::infra::AppState;
use crate::proxy;
use crate::session::require_session;

/// Builds the complete router. Module routes are taken from the registry
/// in `state`, which must be fully populated by now.
pub fn create_app(state: AppState) -> Router {
    let mut protected = Router::new()
        .route("/", get(pages::index))
        .route("/api/modules", get(pages::modules_json))
        .route("/sign-out", get(auth::sign_out))
        .route("/project/select", post(auth::select_project))
        .route("/api/users/{user_id}", delete(users::delete_user));
    if state.config.dev_mode {
        protected = protected.route("/debug/500", get(pages::debug_500));
    }
    let protected = protected.route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_session,
    ));

    Router::new()
        .route("/login", get(auth::login_form).post(auth::login))
        .merge(protected)
        .merge(proxy::plugin_routes(&state))
        .fallback(pages::not_found)
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("same-origin"),
    );
    response
}
