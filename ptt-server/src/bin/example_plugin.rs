//! Reference module: keeps a running sum per user and project in the host's
//! scoped store and streams a short countdown over SSE.
//!
//! Must be launched by `ptt-server`; started by hand it prints a notice and
//! exits.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ptt_contracts::model::{HEADER_PROJECT_ID, HEADER_PROJECT_NAME, HEADER_USER_ID, HEADER_USERNAME};
use ptt_contracts::serve::{init_plugin_tracing, serve_plugin};
use ptt_contracts::{
    Category, ContractError, Metadata, Module, ModuleInfo, RequestMessage, ResponseMessage,
    ResponseStream, Route, StoreClient, StoreKey,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const PLUGIN_ID: &str = "ptt/example";
const SUM_KEY: &str = "sum";

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct RunningSum {
    total: i64,
    additions: u64,
}

#[derive(Default)]
struct ExamplePlugin {
    store: OnceLock<StoreClient>,
}

impl ExamplePlugin {
    fn root(&self) -> String {
        format!("/plugin/{PLUGIN_ID}")
    }

    fn store(&self) -> Result<&StoreClient, ContractError> {
        self.store.get().ok_or(ContractError::Disconnected)
    }

    fn sum_key(request: &RequestMessage) -> StoreKey {
        StoreKey::new(
            PLUGIN_ID,
            request.headers.get(HEADER_USER_ID).unwrap_or_default(),
            request.headers.get(HEADER_PROJECT_ID).unwrap_or_default(),
            SUM_KEY,
        )
    }

    async fn load_sum(&self, request: &RequestMessage) -> Result<RunningSum, ContractError> {
        Ok(self
            .store()?
            .get_json::<RunningSum>(&Self::sum_key(request))
            .await?
            .unwrap_or_default())
    }

    async fn index(&self, request: &RequestMessage) -> Result<ResponseMessage, ContractError> {
        let sum = self.load_sum(request).await?;
        let who = request.headers.get(HEADER_USERNAME).unwrap_or("someone");
        let project = request
            .headers
            .get(HEADER_PROJECT_NAME)
            .map(|name| format!("project <b>{}</b>", escape(name)))
            .unwrap_or_else(|| "no project".to_string());
        let body = format!(
            "<h1>Example module</h1>\n\
             <p>Signed in as <b>{who}</b>, {project}.</p>\n\
             <p id=\"sum\">Running sum: {total} after {additions} additions</p>\n\
             <form method=\"post\" action=\"{root}/sum\">\n\
             <input name=\"a\" type=\"number\" required> + <input name=\"b\" type=\"number\" required>\n\
             <button type=\"submit\">Add</button>\n</form>\n\
             <p><a href=\"{root}/stats.json\">stats.json</a></p>\n\
             <pre id=\"events\"></pre>\n\
             <script>\n\
             const events = new EventSource(\"{root}/sse\");\n\
             events.onmessage = (e) => {{ document.getElementById(\"events\").textContent += e.data + \"\\n\"; }};\n\
             events.addEventListener(\"stop\", () => events.close());\n\
             </script>",
            who = escape(who),
            total = sum.total,
            additions = sum.additions,
            root = self.root(),
        );
        Ok(ResponseMessage::html(body).with_header("X-Plugin-CSS", format!("{}/style.css", self.root())))
    }

    async fn add(&self, request: &RequestMessage) -> Result<ResponseMessage, ContractError> {
        let form = String::from_utf8_lossy(&request.body);
        let (Some(a), Some(b)) = (form_number(&form, "a"), form_number(&form, "b")) else {
            return Ok(ResponseMessage::text(400, "fields `a` and `b` must be integers"));
        };

        let key = Self::sum_key(request);
        let store = self.store()?;
        let mut sum = store.get_json::<RunningSum>(&key).await?.unwrap_or_default();
        sum.total = sum.total.saturating_add(a).saturating_add(b);
        sum.additions += 1;
        store.set_json(&key, &sum).await?;
        info!(a, b, total = sum.total, scope = ?key.scope(), "sum updated");

        Ok(ResponseMessage::html(format!(
            "<p id=\"sum\">{a} + {b} added; running sum is {}</p>\n<p><a href=\"{}/index\">Back</a></p>",
            sum.total,
            self.root()
        )))
    }

    async fn stats(&self, request: &RequestMessage) -> Result<ResponseMessage, ContractError> {
        let sum = self.load_sum(request).await?;
        let body = serde_json::json!({
            "user_id": request.headers.get(HEADER_USER_ID),
            "project_id": request.headers.get(HEADER_PROJECT_ID),
            "total": sum.total,
            "additions": sum.additions,
        });
        Ok(ResponseMessage::new(200, body.to_string()).with_header("Content-Type", "application/json"))
    }

    fn style() -> ResponseMessage {
        ResponseMessage::new(200, "#sum { font-weight: bold; }\n")
            .with_header("Content-Type", "text/css")
    }
}

#[async_trait]
impl Module for ExamplePlugin {
    async fn register(&self, store_addr: PathBuf) -> Result<ModuleInfo, ContractError> {
        let client = StoreClient::connect(&store_addr).await?;
        if self.store.set(client).is_err() {
            warn!("register called twice; keeping the first store connection");
        }
        info!(store = %store_addr.display(), "registered with host");

        Ok(ModuleInfo {
            id: PLUGIN_ID.to_string(),
            name: "Example".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            category: Category::Misc,
            metadata: vec![
                Metadata::new("Author", "PTT"),
                Metadata::new("Description", "Adds numbers and streams a countdown"),
            ],
            routes: vec![
                Route::new("GET", "/index"),
                Route::new("POST", "/sum"),
                Route::new("GET", "/stats.json"),
                Route::new("GET", "/style.css"),
                Route::streaming("GET", "/sse"),
            ],
        })
    }

    async fn handle(&self, request: RequestMessage) -> Result<ResponseMessage, ContractError> {
        let path = request.path().strip_prefix(&self.root()).unwrap_or_default();
        debug!(method = %request.method, path, "request");
        match (request.method.as_str(), path) {
            ("GET", "/index") => self.index(&request).await,
            ("POST", "/sum") => self.add(&request).await,
            ("GET", "/stats.json") => self.stats(&request).await,
            ("GET", "/style.css") => Ok(Self::style()),
            _ => Ok(ResponseMessage::text(404, "not found")),
        }
    }

    async fn handle_sse(&self, request: RequestMessage) -> Result<ResponseStream, ContractError> {
        let user = request.headers.get(HEADER_USERNAME).unwrap_or_default().to_string();
        debug!(%user, "event stream requested");
        Ok(async_stream::stream! {
            for tick in 1..=3u32 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                yield ResponseMessage::new(200, format!("tick {tick}"))
                    .with_header("X-SSE-ID", tick.to_string());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            yield ResponseMessage::new(200, "stop").with_header("X-SSE-Event", "stop");
            debug!(%user, "event stream finished");
        }
        .boxed())
    }
}

/// Integer value of `name` in an `application/x-www-form-urlencoded` body.
fn form_number(body: &str, name: &str) -> Option<i64> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[tokio::main]
async fn main() {
    init_plugin_tracing();
    if let Err(err) = serve_plugin(ExamplePlugin::default()).await {
        if !matches!(err, ContractError::NotLaunchedByHost) {
            tracing::error!(error = %err, "plugin stopped");
        }
        std::process::exit(1);
    }
}
