use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use ptt_contracts::model::{
    HEADER_PROJECT_ID, HEADER_PROJECT_NAME, HEADER_USER_ID, HEADER_USERNAME,
};
use ptt_contracts::{Headers, RequestMessage, ResponseMessage};
use tracing::{debug, warn};

use crate::infra::errors::AppError;
use crate::session::Session;

/// Largest request body forwarded to a module. Bodies travel base64-encoded
/// inside one RPC frame.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Turns an incoming request into the message a module receives, with the
/// caller's identity attached.
pub async fn request_message(
    request: Request,
    session: &Session,
    session_cookie: &str,
) -> Result<RequestMessage, AppError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"))?;

    let mut headers = headers_from_http(&parts.headers);
    strip_cookie(&mut headers, session_cookie);
    inject_identity(&mut headers, session);

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    Ok(RequestMessage {
        method: parts.method.to_string(),
        url,
        headers,
        body: body.to_vec(),
    })
}

pub fn headers_from_http(source: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in source {
        headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    headers
}

/// Sets the identity headers, replacing anything the client sent under the
/// same names. Project headers are removed when no project is selected.
pub fn inject_identity(headers: &mut Headers, session: &Session) {
    headers.insert(HEADER_USERNAME, session.username());
    headers.insert(HEADER_USER_ID, session.user_id());
    match session.project() {
        Some(project) => {
            headers.insert(HEADER_PROJECT_NAME, project.name);
            headers.insert(HEADER_PROJECT_ID, project.id);
        }
        None => {
            headers.remove(HEADER_PROJECT_NAME);
            headers.remove(HEADER_PROJECT_ID);
        }
    }
}

/// Drops the host session cookie so modules never see the token.
fn strip_cookie(headers: &mut Headers, name: &str) {
    let Some(values) = headers.remove(header::COOKIE.as_str()) else {
        return;
    };
    for value in values {
        let kept: Vec<&str> = value
            .split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .filter(|pair| pair.split_once('=').is_none_or(|(key, _)| key != name))
            .collect();
        if !kept.is_empty() {
            headers.append(header::COOKIE.as_str(), kept.join("; "));
        }
    }
}

/// Status a module asked for; anything outside the HTTP range becomes 502.
pub fn status_of(message: &ResponseMessage) -> StatusCode {
    StatusCode::from_u16(message.status).unwrap_or_else(|_| {
        warn!(status = message.status, "module returned an invalid status code");
        StatusCode::BAD_GATEWAY
    })
}

/// Headers the host owns on the outbound connection.
fn is_transport_header(name: &HeaderName) -> bool {
    name == header::CONTENT_LENGTH
        || name == header::TRANSFER_ENCODING
        || name == header::CONNECTION
}

/// Writes every header in `source` over `target`, replacing existing values
/// of the same name.
pub fn replace_headers(target: &mut HeaderMap, source: &Headers) {
    for (name, values) in source.iter() {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = name, "skipping invalid header name from module");
            continue;
        };
        if is_transport_header(&name) {
            debug!(header = %name, "ignoring transport header from module");
            continue;
        }
        target.remove(&name);
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    target.append(&name, value);
                }
                Err(_) => warn!(header = %name, "skipping invalid header value from module"),
            }
        }
    }
}

/// Whether the module answered with an HTML page the host should wrap.
pub fn is_html(headers: &Headers) -> bool {
    headers
        .get(header::CONTENT_TYPE.as_str())
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/html"))
}

/// A response carrying the module's status, headers and `body` as given.
pub fn response_from(message: &ResponseMessage, body: impl Into<Body>) -> axum::response::Response {
    let mut response = axum::response::Response::new(body.into());
    *response.status_mut() = status_of(message);
    replace_headers(response.headers_mut(), &message.headers);
    response
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::session::{ProjectRef, UserIdentity};

    fn session() -> Session {
        Session::new(
            "sid".into(),
            UserIdentity {
                user_id: "u-1".into(),
                username: "alice".into(),
                is_admin: false,
            },
            Instant::now(),
        )
    }

    #[tokio::test]
    async fn request_carries_identity_and_drops_spoofed_headers() {
        let request = Request::builder()
            .method("POST")
            .uri("/plugin/demo/sum?x=1")
            .header("X-Username", "mallory")
            .header("X-Project-ID", "forged")
            .header("Cookie", "session=sid; theme=dark")
            .header("Accept", "text/html")
            .header("Accept", "application/json")
            .body(Body::from("a=1&b=2"))
            .unwrap();

        let message = request_message(request, &session(), "session").await.unwrap();
        assert_eq!(message.method, "POST");
        assert_eq!(message.url, "/plugin/demo/sum?x=1");
        assert_eq!(message.body, b"a=1&b=2");
        assert_eq!(message.headers.get_all(HEADER_USERNAME), ["alice"]);
        assert_eq!(message.headers.get(HEADER_USER_ID), Some("u-1"));
        assert!(!message.headers.contains(HEADER_PROJECT_ID));
        assert_eq!(message.headers.get_all("cookie"), ["theme=dark"]);
        assert_eq!(message.headers.get_all("accept").len(), 2);
    }

    #[tokio::test]
    async fn selected_project_is_forwarded() {
        let session = session();
        session.set_project(Some(ProjectRef {
            id: "p-9".into(),
            name: "recon".into(),
        }));
        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();

        let message = request_message(request, &session, "session").await.unwrap();
        assert_eq!(message.headers.get(HEADER_PROJECT_NAME), Some("recon"));
        assert_eq!(message.headers.get(HEADER_PROJECT_ID), Some("p-9"));
        assert!(message.body.is_empty());
        assert!(!message.headers.contains("cookie"));
    }

    #[test]
    fn module_headers_replace_existing_values() {
        let mut target = HeaderMap::new();
        target.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let source = ResponseMessage::new(201, "")
            .with_header("Cache-Control", "max-age=60")
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2")
            .with_header("Content-Length", "999")
            .headers;

        replace_headers(&mut target, &source);
        assert_eq!(target.get(header::CACHE_CONTROL).unwrap(), "max-age=60");
        assert_eq!(target.get_all(header::SET_COOKIE).iter().count(), 2);
        assert!(target.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn html_detection_uses_the_media_type() {
        let html = ResponseMessage::html("<p>hi</p>");
        assert!(is_html(&html.headers));
        let with_charset = ResponseMessage::new(200, "")
            .with_header("Content-Type", "Text/HTML; charset=utf-8");
        assert!(is_html(&with_charset.headers));
        assert!(!is_html(&ResponseMessage::text(200, "x").headers));
        assert!(!is_html(&ResponseMessage::new(200, "x").headers));
    }

    #[test]
    fn out_of_range_status_is_bad_gateway() {
        assert_eq!(status_of(&ResponseMessage::new(42, "")), StatusCode::BAD_GATEWAY);
        assert_eq!(status_of(&ResponseMessage::new(418, "")), StatusCode::IM_A_TEAPOT);
    }
}
