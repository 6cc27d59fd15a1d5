//! The Store contract: plugin is the client, the host the server.
//!
//! Records are keyed by `(plugin, user?, project?, key)`. A missing user or
//! project is its own scope, not a wildcard, so one logical key can hold four
//! independent values.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ContractError;
use crate::rpc::{Reply, RpcClient, RpcService};

/// Which of the four scopes a [`StoreKey`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Private to the plugin.
    Plugin,
    /// One user across every project.
    User,
    /// One project across every user.
    Project,
    /// One user inside one project.
    UserProject,
}

/// Full address of one stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    /// Owning module id.
    pub plugin_id: String,
    /// `None` when the value is not tied to a user.
    pub user_id: Option<String>,
    /// `None` when the value is not tied to a project.
    pub project_id: Option<String>,
    /// Name chosen by the module.
    pub key: String,
}

impl StoreKey {
    /// Empty `user_id` / `project_id` mean "no scope at this level".
    pub fn new(
        plugin_id: impl Into<String>,
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            user_id: non_empty(user_id.into()),
            project_id: non_empty(project_id.into()),
            key: key.into(),
        }
    }

    /// Key shared by every user and project.
    pub fn plugin(plugin_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(plugin_id, "", "", key)
    }

    /// Which of the four scopes the key lives in.
    pub fn scope(&self) -> Scope {
        match (&self.user_id, &self.project_id) {
            (None, None) => Scope::Plugin,
            (Some(_), None) => Scope::User,
            (None, Some(_)) => Scope::Project,
            (Some(_), Some(_)) => Scope::UserProject,
        }
    }

    /// Normalizes empty strings that slipped in through deserialization.
    fn normalized(mut self) -> Self {
        self.user_id = self.user_id.and_then(non_empty);
        self.project_id = self.project_id.and_then(non_empty);
        self
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Scoped key/value persistence offered to plugins.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// `Ok(None)` when the key was never set.
    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, ContractError>;

    /// Inserts or replaces the value at `key`.
    async fn set(&self, key: &StoreKey, value: Vec<u8>) -> Result<(), ContractError>;

    async fn delete(&self, key: &StoreKey) -> Result<(), ContractError>;
}

/// Calls a module makes on the host store.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreCall {
    Get {
        key: StoreKey,
    },
    Set {
        key: StoreKey,
        #[serde(with = "base64_value")]
        value: Vec<u8>,
    },
    Delete {
        key: StoreKey,
    },
}

/// Host answers to [`StoreCall`]s.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreReply {
    Value {
        #[serde(with = "base64_value::option")]
        value: Option<Vec<u8>>,
    },
    Ack,
}

/// [`Store`] implemented by calls to the host.
#[derive(Clone)]
pub struct StoreClient {
    rpc: RpcClient<StoreCall, StoreReply>,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient").field("rpc", &self.rpc).finish()
    }
}

impl StoreClient {
    /// Client over an already connected stream.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            rpc: RpcClient::new(io),
        }
    }

    /// Connects to the store socket passed to `Register`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(Self::new(stream))
    }

    /// Reads a JSON value; `Ok(None)` when unset.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &StoreKey,
    ) -> Result<Option<T>, ContractError> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` as JSON.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &StoreKey,
        value: &T,
    ) -> Result<(), ContractError> {
        self.set(key, serde_json::to_vec(value)?).await
    }
}

#[async_trait]
impl Store for StoreClient {
    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, ContractError> {
        match self.rpc.call(StoreCall::Get { key: key.clone() }).await? {
            StoreReply::Value { value } => Ok(value),
            StoreReply::Ack => Err(ContractError::UnexpectedReply("get")),
        }
    }

    async fn set(&self, key: &StoreKey, value: Vec<u8>) -> Result<(), ContractError> {
        match self
            .rpc
            .call(StoreCall::Set {
                key: key.clone(),
                value,
            })
            .await?
        {
            StoreReply::Ack => Ok(()),
            StoreReply::Value { .. } => Err(ContractError::UnexpectedReply("set")),
        }
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), ContractError> {
        match self.rpc.call(StoreCall::Delete { key: key.clone() }).await? {
            StoreReply::Ack => Ok(()),
            StoreReply::Value { .. } => Err(ContractError::UnexpectedReply("delete")),
        }
    }
}

/// Serves a [`Store`] implementation over RPC.
pub struct StoreService<S> {
    store: Arc<S>,
}

impl<S> fmt::Debug for StoreService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreService").finish_non_exhaustive()
    }
}

impl<S: Store> StoreService<S> {
    /// Serves `store` on every connection this service is attached to.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store> RpcService<StoreCall, StoreReply> for StoreService<S> {
    async fn handle(&self, call: StoreCall) -> Result<Reply<StoreReply>, ContractError> {
        let reply = match call {
            StoreCall::Get { key } => StoreReply::Value {
                value: self.store.get(&key.normalized()).await?,
            },
            StoreCall::Set { key, value } => {
                self.store.set(&key.normalized(), value).await?;
                StoreReply::Ack
            }
            StoreCall::Delete { key } => {
                self.store.delete(&key.normalized()).await?;
                StoreReply::Ack
            }
        };
        Ok(Reply::Unary(reply))
    }
}

mod base64_value {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use memory::MemoryStore;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::rpc::serve_connection;

    mod memory {
        use super::*;
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct MemoryStore {
            pub rows: Mutex<HashMap<StoreKey, Vec<u8>>>,
        }

        #[async_trait]
        impl Store for MemoryStore {
            async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, ContractError> {
                Ok(self.rows.lock().unwrap().get(key).cloned())
            }

            async fn set(&self, key: &StoreKey, value: Vec<u8>) -> Result<(), ContractError> {
                self.rows.lock().unwrap().insert(key.clone(), value);
                Ok(())
            }

            async fn delete(&self, key: &StoreKey) -> Result<(), ContractError> {
                self.rows.lock().unwrap().remove(key);
                Ok(())
            }
        }
    }

    fn connect(store: Arc<MemoryStore>) -> StoreClient {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connection::<_, StoreCall, StoreReply, _>(
            server_io,
            Arc::new(StoreService::new(store)),
            CancellationToken::new(),
        ));
        StoreClient::new(client_io)
    }

    #[test]
    fn empty_scope_ids_become_none() {
        let key = StoreKey::new("p", "", "proj", "k");
        assert_eq!(key.user_id, None);
        assert_eq!(key.project_id.as_deref(), Some("proj"));
        assert_eq!(key.scope(), Scope::Project);
        assert_eq!(StoreKey::plugin("p", "k").scope(), Scope::Plugin);
    }

    #[tokio::test]
    async fn client_reaches_store_and_distinguishes_unset() {
        let store = Arc::new(MemoryStore::default());
        let client = connect(Arc::clone(&store));
        let key = StoreKey::new("example", "u1", "", "sum");

        assert_eq!(client.get(&key).await.unwrap(), None);
        client.set(&key, b"42".to_vec()).await.unwrap();
        assert_eq!(client.get(&key).await.unwrap(), Some(b"42".to_vec()));

        client.set(&key, Vec::new()).await.unwrap();
        assert_eq!(client.get(&key).await.unwrap(), Some(Vec::new()));

        client.delete(&key).await.unwrap();
        assert_eq!(client.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_strings_on_the_wire_are_treated_as_no_scope() {
        let store = Arc::new(MemoryStore::default());
        let client = connect(Arc::clone(&store));
        let sloppy = StoreKey {
            plugin_id: "example".into(),
            user_id: Some(String::new()),
            project_id: None,
            key: "k".into(),
        };
        client.set(&sloppy, b"v".to_vec()).await.unwrap();
        assert!(
            store
                .rows
                .lock()
                .unwrap()
                .contains_key(&StoreKey::plugin("example", "k"))
        );
    }

    #[tokio::test]
    async fn json_helpers_round_trip_typed_values() {
        let client = connect(Arc::new(MemoryStore::default()));
        let key = StoreKey::plugin("example", "counts");
        client.set_json(&key, &vec![1u32, 2, 3]).await.unwrap();
        let counts: Option<Vec<u32>> = client.get_json(&key).await.unwrap();
        assert_eq!(counts, Some(vec![1, 2, 3]));
    }
}
