use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use tracing::warn;

use crate::infra::config::SessionConfig;

/// Builds and reads the session cookie.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    max_age: Duration,
    secure: bool,
}

impl SessionCookie {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            name: config.cookie_name.clone(),
            max_age: config.idle_timeout,
            secure: config.secure_cookie,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Set-Cookie` value carrying `id` for one idle window.
    pub fn issue(&self, id: &str) -> String {
        self.render(id, self.max_age.as_secs())
    }

    /// `Set-Cookie` value that makes the browser drop its copy.
    pub fn invalidate(&self, id: &str) -> String {
        self.render(id, 0)
    }

    fn render(&self, value: &str, max_age: u64) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={}; Path=/; Max-Age={}{}; HttpOnly; SameSite=Strict",
            self.name, value, max_age, secure
        )
    }

    /// Session id from the request's `Cookie` headers.
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| raw.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.name && !value.is_empty())
            .map(|(_, value)| value.to_string())
    }

    /// Appends `set_cookie` plus the cache headers that keep shared caches
    /// from storing it.
    pub fn apply(&self, headers: &mut HeaderMap, set_cookie: &str) {
        match HeaderValue::from_str(set_cookie) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
                headers.append(header::VARY, HeaderValue::from_static("Cookie"));
                headers.append(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache=\"Set-Cookie\""),
                );
            }
            Err(err) => warn!(error = %err, "session cookie is not a valid header value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie() -> SessionCookie {
        SessionCookie::new(&SessionConfig::default())
    }

    #[test]
    fn issued_cookie_has_hardened_attributes() {
        let value = cookie().issue("abc");
        assert_eq!(
            value,
            "session=abc; Path=/; Max-Age=10800; Secure; HttpOnly; SameSite=Strict"
        );
    }

    #[test]
    fn invalidation_uses_zero_max_age() {
        assert!(cookie().invalidate("abc").contains("Max-Age=0;"));
    }

    #[test]
    fn extract_finds_named_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; session=xyz"));
        assert_eq!(cookie().extract(&headers).as_deref(), Some("xyz"));

        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("sessionx=1; session="));
        assert_eq!(cookie().extract(&headers), None);
    }

    #[test]
    fn apply_sets_cache_guards() {
        let mut headers = HeaderMap::new();
        cookie().apply(&mut headers, &cookie().issue("abc"));
        assert!(headers.get(header::SET_COOKIE).is_some());
        assert_eq!(headers.get(header::VARY).unwrap(), "Cookie");
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            "no-cache=\"Set-Cookie\""
        );
    }
}
