use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use futures::stream;
use futures::StreamExt;
use ptt_contracts::model::{HEADER_PROJECT_ID, HEADER_USER_ID};
use ptt_contracts::{
    ContractError, Module, ModuleInfo, RequestMessage, ResponseMessage, ResponseStream, Route,
    StoreClient, StoreKey,
};
use ptt_server::db;

mod common;
use common::{build_test_app, login, login_root};

/// Counts `POST /bump` calls in the host store, scoped to the caller.
#[derive(Default)]
struct CounterModule {
    store: OnceLock<StoreClient>,
}

#[async_trait]
impl Module for CounterModule {
    async fn register(&self, store_addr: PathBuf) -> Result<ModuleInfo, ContractError> {
        let _ = self.store.set(StoreClient::connect(&store_addr).await?);
        Ok(ModuleInfo {
            id: "counter".into(),
            name: "Counter".into(),
            version: "0.2.0".into(),
            category: Default::default(),
            metadata: vec![],
            routes: vec![Route::new("POST", "/bump")],
        })
    }

    async fn handle(&self, request: RequestMessage) -> Result<ResponseMessage, ContractError> {
        let store = self.store.get().ok_or(ContractError::Disconnected)?;
        let key = StoreKey::new(
            "counter",
            request.headers.get(HEADER_USER_ID).unwrap_or_default(),
            request.headers.get(HEADER_PROJECT_ID).unwrap_or_default(),
            "hits",
        );
        let hits = store.get_json::<u64>(&key).await?.unwrap_or_default() + 1;
        store.set_json(&key, &hits).await?;
        Ok(ResponseMessage::text(200, hits.to_string()))
    }

    async fn handle_sse(&self, _request: RequestMessage) -> Result<ResponseStream, ContractError> {
        Ok(stream::empty().boxed())
    }
}

async fn bump(server: &axum_test::TestServer, cookie: &str) -> String {
    let response = server
        .post("/plugin/counter/bump")
        .add_header("Cookie", cookie.to_string())
        .await;
    response.assert_status_ok();
    response.text()
}

#[tokio::test]
async fn values_are_scoped_to_user_and_project() -> Result<()> {
    let app = build_test_app(vec![Arc::new(CounterModule::default())]).await?;
    let root_user = db::find_user_by_username(&app.state.pool, "root")
        .await?
        .context("root user missing")?;
    db::create_user(&app.state.pool, "alice", "alice-pass", false).await?;
    let project = db::create_project(&app.state.pool, "recon", &root_user.id).await?;

    let root = login_root(&app.server).await?;
    let alice = login(&app.server, "alice", "alice-pass").await?;

    assert_eq!(bump(&app.server, &root).await, "1");
    assert_eq!(bump(&app.server, &root).await, "2");
    assert_eq!(bump(&app.server, &alice).await, "1");

    app.server
        .post("/project/select")
        .add_header("Cookie", root.clone())
        .form(&[("project_id", project.id.as_str())])
        .await
        .assert_status(StatusCode::FOUND);
    assert_eq!(bump(&app.server, &root).await, "1");

    app.server
        .post("/project/select")
        .add_header("Cookie", root.clone())
        .form(&[("project_id", "")])
        .await
        .assert_status(StatusCode::FOUND);
    assert_eq!(bump(&app.server, &root).await, "3");

    let stored: u64 = app
        .state
        .store
        .get_value(&StoreKey::new("counter", &root_user.id, "", "hits"))
        .await?
        .map(|bytes| serde_json::from_slice(&bytes))
        .transpose()?
        .context("root counter missing")?;
    assert_eq!(stored, 3);
    Ok(())
}

#[tokio::test]
async fn store_socket_is_removed_on_shutdown() -> Result<()> {
    let mut app = build_test_app(vec![]).await?;
    let socket = app.store_server.path().to_path_buf();
    assert!(socket.exists());

    let client = StoreClient::connect(&socket).await?;
    let key = StoreKey::plugin("direct", "greeting");
    client.set_json(&key, "hello").await?;
    assert_eq!(client.get_json::<String>(&key).await?.as_deref(), Some("hello"));

    app.store_server.shutdown().await;
    assert!(!socket.exists());
    Ok(())
}
