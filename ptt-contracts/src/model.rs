//! Data that crosses the process boundary between host and module.
#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ContractError;

/// Injected by the host on every proxied request.
pub const HEADER_USERNAME: &str = "X-Username";
/// Injected by the host on every proxied request.
pub const HEADER_USER_ID: &str = "X-User-ID";
/// Injected only while the caller has a project selected.
pub const HEADER_PROJECT_NAME: &str = "X-Project-Name";
/// Injected only while the caller has a project selected.
pub const HEADER_PROJECT_ID: &str = "X-Project-ID";
/// Stylesheet URLs a module asks the host page chrome to link.
pub const HEADER_PLUGIN_CSS: &str = "X-Plugin-CSS";

/// Methods a module may declare on a [`Route`].
pub const SUPPORTED_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "TRACE",
    "CONNECT",
];

/// Coarse grouping shown on the console index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Misc,
    Scanner,
    Password,
    Shell,
    Exploit,
    Web,
    SocialEngineering,
    Forensic,
    Reporting,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Misc,
        Category::Scanner,
        Category::Password,
        Category::Shell,
        Category::Exploit,
        Category::Web,
        Category::SocialEngineering,
        Category::Forensic,
        Category::Reporting,
    ];

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            Category::Misc => "Misc",
            Category::Scanner => "Scanner",
            Category::Password => "Password",
            Category::Shell => "Shell",
            Category::Exploit => "Exploit",
            Category::Web => "Web",
            Category::SocialEngineering => "Social Engineering",
            Category::Forensic => "Forensic",
            Category::Reporting => "Reporting",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Free-form key/value pair attached to a [`ModuleInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: String,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A route a module asks the host to mount under its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub use_sse: bool,
}

impl Route {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            use_sse: false,
        }
    }

    /// Same as [`Route::new`] but served through `HandleSSE`.
    pub fn streaming(
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            use_sse: true,
            ..Self::new(method, path)
        }
    }
}

/// Identity and route manifest a module returns from `Register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl ModuleInfo {
    /// URL prefix every route of this module is mounted under.
    pub fn root_path(&self) -> String {
        format!("/plugin/{}", self.id)
    }

    /// Full host path of one of this module's routes.
    pub fn mount_path(&self, route: &Route) -> String {
        format!("{}{}", self.root_path(), route.path)
    }

    /// Parsed semantic version. Only meaningful after [`ModuleInfo::validate`].
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }

    /// Rejects manifests the host cannot mount safely.
    pub fn validate(&self) -> Result<(), ContractError> {
        let invalid = |msg: String| Err(ContractError::InvalidModuleInfo(msg));

        if self.id.is_empty() {
            return invalid("empty module id".into());
        }
        if self.id.starts_with('/') || self.id.ends_with('/') {
            return invalid(format!(
                "module id `{}` must not start or end with '/'",
                self.id
            ));
        }
        if self.id.split('/').any(str::is_empty) {
            return invalid(format!(
                "module id `{}` contains an empty segment",
                self.id
            ));
        }
        if let Some(c) = self.id.chars().find(|c| !is_path_char(*c)) {
            return invalid(format!(
                "module id `{}` contains disallowed character {c:?}",
                self.id
            ));
        }
        if self.name.trim().is_empty() {
            return invalid(format!("module `{}` has an empty name", self.id));
        }
        if let Err(err) = semver::Version::parse(&self.version) {
            return invalid(format!(
                "module `{}` version `{}` is not a semantic version: {err}",
                self.id, self.version
            ));
        }

        let mut seen = HashSet::with_capacity(self.routes.len());
        for route in &self.routes {
            if !SUPPORTED_METHODS.contains(&route.method.as_str()) {
                return invalid(format!(
                    "module `{}` declares unsupported method `{}` for {}",
                    self.id, route.method, route.path
                ));
            }
            if !route.path.starts_with('/') {
                return invalid(format!(
                    "module `{}` route path `{}` must start with '/'",
                    self.id, route.path
                ));
            }
            if route.path.contains("//") {
                return invalid(format!(
                    "module `{}` route path `{}` contains an empty segment",
                    self.id, route.path
                ));
            }
            if let Some(c) = route.path.chars().find(|c| !is_path_char(*c)) {
                return invalid(format!(
                    "module `{}` route path `{}` contains disallowed character {c:?}",
                    self.id, route.path
                ));
            }
            if !seen.insert((route.method.as_str(), route.path.as_str())) {
                return invalid(format!(
                    "module `{}` declares {} {} more than once",
                    self.id, route.method, route.path
                ));
            }
        }
        Ok(())
    }
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '/')
}

/// Multi-valued HTTP header map with case-insensitive names.
///
/// Names are stored lower-cased; values keep their order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>")]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut headers = Headers::default();
        for (name, values) in raw {
            for value in values {
                headers.append(&name, value);
            }
        }
        headers
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replaces every value of `name` with `value`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// `(name, values)` pairs with lower-cased names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// An HTTP request forwarded to a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub method: String,
    /// Path and query as received by the host.
    pub url: String,
    pub headers: Headers,
    /// Always present; an empty body is zero bytes.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl RequestMessage {
    /// Path component of [`RequestMessage::url`].
    pub fn path(&self) -> &str {
        self.url.split(['?', '#']).next().unwrap_or_default()
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        let (_, rest) = self.url.split_once('?')?;
        Some(rest.split('#').next().unwrap_or_default())
    }
}

/// A module's answer to one request, or one event of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub status: u16,
    pub headers: Headers,
    /// Always present; an empty body is the empty string.
    pub body: String,
}

impl Default for ResponseMessage {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Headers::default(),
            body: String::new(),
        }
    }
}

impl ResponseMessage {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::default(),
            body: body.into(),
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::new(200, body).with_header("Content-Type", "text/html")
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body)
            .with_header("Content-Type", "text/plain; charset=utf-8")
    }

    pub fn with_header(
        mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Self {
        self.headers.append(name, value);
        self
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(routes: Vec<Route>) -> ModuleInfo {
        ModuleInfo {
            id: "example".into(),
            name: "Example".into(),
            version: "1.2.0".into(),
            category: Category::Web,
            metadata: vec![Metadata::new("author", "ptt")],
            routes,
        }
    }

    #[test]
    fn valid_manifest_passes() {
        let info = info(vec![
            Route::new("GET", "/index"),
            Route::new("POST", "/index"),
            Route::streaming("GET", "/sse"),
        ]);
        info.validate().unwrap();
        assert_eq!(info.root_path(), "/plugin/example");
        assert_eq!(info.mount_path(&info.routes[2]), "/plugin/example/sse");
    }

    #[test]
    fn every_standard_method_is_accepted() {
        let routes = SUPPORTED_METHODS
            .iter()
            .map(|method| Route::new(*method, "/tunnel"))
            .collect();
        info(routes).validate().unwrap();
        assert!(SUPPORTED_METHODS.contains(&"CONNECT"));
    }

    #[test]
    fn duplicate_method_and_path_is_rejected() {
        let info =
            info(vec![Route::new("GET", "/index"), Route::new("GET", "/index")]);
        let err = info.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn bad_ids_are_rejected() {
        for id in ["", "/lead", "trail/", "a//b", "has space", "x{y}"] {
            let mut info = info(vec![]);
            info.id = id.into();
            assert!(info.validate().is_err(), "id {id:?} should be rejected");
        }
    }

    #[test]
    fn non_semver_version_is_rejected() {
        let mut info = info(vec![]);
        info.version = "v1".into();
        assert!(info.validate().is_err());
    }

    #[test]
    fn unsupported_method_and_relative_path_are_rejected() {
        assert!(info(vec![Route::new("FETCH", "/x")]).validate().is_err());
        assert!(info(vec![Route::new("GET", "x")]).validate().is_err());
        assert!(info(vec![Route::new("GET", "/*rest")]).validate().is_err());
    }

    #[test]
    fn headers_are_case_insensitive_and_multi_valued() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert_eq!(headers.get_all("SET-COOKIE"), ["a=1", "b=2"]);

        headers.insert("Set-Cookie", "c=3");
        assert_eq!(headers.get_all("set-cookie"), ["c=3"]);
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn headers_normalize_names_when_decoded() {
        let headers: Headers =
            serde_json::from_str(r#"{"Content-Type":["text/html"]}"#).unwrap();
        assert_eq!(headers.get("content-type"), Some("text/html"));
    }

    #[test]
    fn empty_body_is_encoded_not_omitted() {
        let json = serde_json::to_value(RequestMessage {
            method: "GET".into(),
            url: "/plugin/x/index?a=1".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["body"], "");

        let response = serde_json::to_value(ResponseMessage::new(204, "")).unwrap();
        assert_eq!(response["body"], "");
    }

    #[test]
    fn request_path_and_query_split() {
        let request = RequestMessage {
            url: "/plugin/x/sum?a=1&b=2".into(),
            ..Default::default()
        };
        assert_eq!(request.path(), "/plugin/x/sum");
        assert_eq!(request.query(), Some("a=1&b=2"));
    }
}
