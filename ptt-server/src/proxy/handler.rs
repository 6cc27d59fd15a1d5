use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, Method, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
};
use ptt_contracts::model::HEADER_PLUGIN_CSS;
use ptt_contracts::{ContractError, ResponseMessage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::marshal;
use super::relay::spawn_relay;
use crate::infra::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::plugins::PluginHandle;
use crate::session::{CurrentSession, require_session};
use crate::views::{self, Page};

/// One route per declared module route, all behind the session guard.
///
/// Two modules may both declare `GET /index`; their ids keep the mounted
/// paths apart.
pub fn plugin_routes(state: &AppState) -> Router<AppState> {
    let mut paths: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    let mut mounted: HashSet<(String, Method)> = HashSet::new();

    for handle in state.plugins.iter() {
        for route in &handle.info().routes {
            let path = handle.info().mount_path(route);
            let Some((method, filter)) = method_filter(&route.method) else {
                error!(plugin_id = %handle.id(), method = %route.method, "unsupported route method");
                continue;
            };
            if !mounted.insert((path.clone(), method.clone())) {
                error!(plugin_id = %handle.id(), %method, %path, "route already mounted; skipping");
                continue;
            }

            let method_router = paths.remove(&path).unwrap_or_default();
            let target = Arc::clone(handle);
            let method_router = if route.use_sse {
                method_router.on(
                    filter,
                    move |State(state): State<AppState>,
                          session: CurrentSession,
                          request: Request| {
                        proxy_stream(target, state, session, request)
                    },
                )
            } else {
                method_router.on(
                    filter,
                    move |State(state): State<AppState>,
                          session: CurrentSession,
                          request: Request| {
                        proxy_unary(target, state, session, request)
                    },
                )
            };
            paths.insert(path.clone(), method_router);
            debug!(plugin_id = %handle.id(), %method, %path, sse = route.use_sse, "mounted module route");
        }
        info!(plugin_id = %handle.id(), root = %handle.root_path(), "module routes mounted");
    }

    if paths.is_empty() {
        info!("no module routes to mount");
        return Router::new();
    }
    paths
        .into_iter()
        .fold(Router::new(), |router, (path, method_router)| {
            router.route(&path, method_router)
        })
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session))
}

fn method_filter(method: &str) -> Option<(Method, MethodFilter)> {
    let method = Method::from_bytes(method.as_bytes()).ok()?;
    let filter = MethodFilter::try_from(method.clone()).ok()?;
    Some((method, filter))
}

fn module_failure(handle: &PluginHandle, err: ContractError) -> AppError {
    warn!(plugin_id = %handle.id(), error = %err, "module call failed");
    AppError::bad_gateway(format!("module `{}` did not respond", handle.id()))
}

async fn proxy_unary(
    handle: Arc<PluginHandle>,
    state: AppState,
    session: CurrentSession,
    request: Request,
) -> AppResult<Response> {
    let message =
        marshal::request_message(request, &session, state.sessions.cookie().name()).await?;
    let url = message.url.clone();
    let reply = handle
        .module()
        .handle(message)
        .await
        .map_err(|err| module_failure(&handle, err))?;

    if !reply.headers.contains(header::CONTENT_TYPE.as_str()) {
        warn!(plugin_id = %handle.id(), %url, "module response has no Content-Type");
    }
    if !marshal::is_html(&reply.headers) {
        debug!(plugin_id = %handle.id(), %url, status = reply.status, "writing raw module response");
        return Ok(marshal::response_from(&reply, reply.body.clone()));
    }
    Ok(wrap_html(&handle, &session, reply))
}

fn wrap_html(handle: &PluginHandle, session: &CurrentSession, reply: ResponseMessage) -> Response {
    let stylesheets = reply.headers.get_all(HEADER_PLUGIN_CSS).to_vec();
    if !stylesheets.is_empty() {
        debug!(plugin_id = %handle.id(), files = ?stylesheets, "module requested stylesheets");
    }
    let page = views::render(Page {
        title: &handle.info().name,
        body: &reply.body,
        stylesheets: &stylesheets,
        viewer: session.viewer(),
    });
    let mut response = marshal::response_from(&reply, page);
    response.headers_mut().remove(HEADER_PLUGIN_CSS);
    response
}

async fn proxy_stream(
    handle: Arc<PluginHandle>,
    state: AppState,
    session: CurrentSession,
    request: Request,
) -> AppResult<Response> {
    let message =
        marshal::request_message(request, &session, state.sessions.cookie().name()).await?;
    let path = message.path().to_string();
    let stream = handle
        .module()
        .handle_sse(message)
        .await
        .map_err(|err| module_failure(&handle, err))?;
    info!(plugin_id = %handle.id(), %path, username = %session.username(), "event stream opened");

    let sse = &state.config.sse;
    let (frames, body) = mpsc::channel(sse.relay_buffer);
    // Dropping the body, as hyper does when the client disconnects, closes
    // `frames` and ends the relay.
    spawn_relay(handle.id().to_string(), stream, frames, sse.keep_alive);

    let mut response = Body::from_stream(ReceiverStream::new(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_declarable_method_has_a_filter() {
        for method in ptt_contracts::model::SUPPORTED_METHODS {
            assert!(method_filter(method).is_some(), "{method} cannot be mounted");
        }
        assert!(method_filter("BREW").is_none());
    }
}
