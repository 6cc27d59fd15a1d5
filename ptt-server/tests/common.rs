use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::http::{StatusCode, header};
use axum_test::TestServer;
use futures::StreamExt;
use ptt_contracts::model::{HEADER_PROJECT_ID, HEADER_USER_ID, HEADER_USERNAME};
use ptt_contracts::{
    Category, ContractError, Metadata, Module, ModuleInfo, RequestMessage, ResponseMessage,
    ResponseStream, Route,
};
use ptt_server::{
    AppState, create_app, db,
    infra::config::Config,
    plugins::{PluginRegistry, PluginSupervisor},
    session::SessionManager,
    store::{ScopedStore, StoreServer},
};
use tempfile::TempDir;

pub const ROOT_PASSWORD: &str = "root-password-for-tests";

// Code is used by test modules, but not in every one of them
#[allow(unused)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub supervisor: PluginSupervisor,
    pub store_server: StoreServer,
    pub dir: TempDir,
}

#[allow(unused)]
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.plugins.dir = dir.path().join("plugins");
    config.plugins.socket_dir = dir.path().to_path_buf();
    config.plugins.handshake_timeout = Duration::from_secs(10);
    config.sessions.secure_cookie = false;
    config.sse.keep_alive = None;
    config.auth.root_password = ROOT_PASSWORD.to_string();
    config
}

/// App with the given in-process modules registered next to a live store
/// socket.
#[allow(unused)]
pub async fn build_test_app(modules: Vec<Arc<dyn Module>>) -> Result<TestApp> {
    let dir = tempfile::tempdir()?;
    let config = test_config(&dir);
    build_app(dir, config, modules, false).await
}

/// Full startup sequence. With `launch_plugins` the executables in
/// `config.plugins.dir` are started before the in-process modules are added.
#[allow(unused)]
pub async fn build_app(
    dir: TempDir,
    config: Config,
    modules: Vec<Arc<dyn Module>>,
    launch_plugins: bool,
) -> Result<TestApp> {
    let pool = db::connect(&config.database.url).await?;
    db::initialize_schema(&pool).await?;
    db::seed_root_user(&pool, &config.auth.root_password).await?;

    let store = ScopedStore::new(pool.clone());
    let store_server = StoreServer::bind(&config.plugins.socket_dir, store.clone())?;
    let supervisor =
        PluginSupervisor::new(config.plugins.clone(), store_server.path().to_path_buf());
    let mut registry = PluginRegistry::new();
    if launch_plugins {
        supervisor.start_all(&mut registry).await;
    }
    for module in modules {
        registry.register_local(module, store_server.path()).await?;
    }

    let state = AppState {
        sessions: Arc::new(SessionManager::new(&config.sessions)),
        config: Arc::new(config),
        pool,
        plugins: Arc::new(registry),
        store,
    };
    let server = TestServer::new(create_app(state.clone()))
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(TestApp {
        server,
        state,
        supervisor,
        store_server,
        dir,
    })
}

/// Signs in and returns the `Cookie` header value carrying the session.
#[allow(unused)]
pub async fn login(server: &TestServer, username: &str, password: &str) -> Result<String> {
    let response = server
        .post("/login")
        .form(&[("username", username), ("password", password)])
        .await;
    response.assert_status(StatusCode::FOUND);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .context("login did not set a cookie")?
        .to_str()?;
    let pair = set_cookie
        .split(';')
        .next()
        .context("empty Set-Cookie header")?;
    Ok(pair.to_string())
}

#[allow(unused)]
pub async fn login_root(server: &TestServer) -> Result<String> {
    login(server, db::ROOT_USERNAME, ROOT_PASSWORD).await
}

/// In-process module that echoes what it receives.
///
/// `GET /index` answers HTML, `GET /whoami` JSON, `GET /sse` streams `count`
/// numbered events.
#[allow(unused)]
pub struct EchoModule {
    pub id: String,
    pub count: u32,
}

#[allow(unused)]
impl EchoModule {
    pub fn new(id: &str) -> Arc<dyn Module> {
        Arc::new(Self {
            id: id.to_string(),
            count: 3,
        })
    }
}

#[async_trait]
impl Module for EchoModule {
    async fn register(&self, _store_addr: PathBuf) -> Result<ModuleInfo, ContractError> {
        Ok(ModuleInfo {
            id: self.id.clone(),
            name: format!("Echo {}", self.id),
            version: "1.0.0".into(),
            category: Category::Web,
            metadata: vec![Metadata::new("Author", "tests")],
            routes: vec![
                Route::new("GET", "/index"),
                Route::new("GET", "/whoami"),
                Route::new("POST", "/echo"),
                Route::new("GET", "/teapot"),
                Route::streaming("GET", "/sse"),
            ],
        })
    }

    async fn handle(&self, request: RequestMessage) -> Result<ResponseMessage, ContractError> {
        let root = format!("/plugin/{}", self.id);
        let path = request.path().strip_prefix(&root).unwrap_or_default();
        let value_of = |name: &str| request.headers.get(name).unwrap_or_default().to_string();
        Ok(match path {
            "/index" => ResponseMessage::html(format!("<p id=\"owner\">{} index</p>", self.id))
                .with_header("X-Plugin-CSS", format!("{root}/style.css")),
            "/whoami" => ResponseMessage::new(
                200,
                serde_json::json!({
                    "module": self.id,
                    "username": value_of(HEADER_USERNAME),
                    "user_id": value_of(HEADER_USER_ID),
                    "project_id": request.headers.get(HEADER_PROJECT_ID),
                    "cookie": request.headers.get("cookie"),
                    "url": request.url,
                })
                .to_string(),
            )
            .with_header("Content-Type", "application/json"),
            "/echo" => ResponseMessage::text(201, String::from_utf8_lossy(&request.body))
                .with_header("X-Echo", "yes"),
            "/teapot" => ResponseMessage::new(418, "short and stout"),
            _ => ResponseMessage::text(404, "not found"),
        })
    }

    async fn handle_sse(&self, _request: RequestMessage) -> Result<ResponseStream, ContractError> {
        let count = self.count;
        Ok(async_stream::stream! {
            for n in 1..=count {
                yield ResponseMessage::new(200, format!("event {n}"))
                    .with_header("X-SSE-ID", n.to_string());
            }
            yield ResponseMessage::new(200, "done").with_header("X-SSE-Event", "stop");
        }
        .boxed())
    }
}
