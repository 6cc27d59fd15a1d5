//! The Module contract: host is the client, the plugin process the server.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::ContractError;
use crate::model::{ModuleInfo, RequestMessage, ResponseMessage};
use crate::rpc::{Reply, RpcClient, RpcService};

/// Event stream returned by [`Module::handle_sse`]. Ends when the module
/// finishes or the connection to it breaks.
pub type ResponseStream = BoxStream<'static, ResponseMessage>;

/// Calls the host makes on a module.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ModuleCall {
    Register { store_addr: PathBuf },
    Handle { request: RequestMessage },
    HandleSse { request: RequestMessage },
}

/// Replies a module sends back. `HandleSse` streams `Response` items.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ModuleReply {
    Registered { info: ModuleInfo },
    Response { response: ResponseMessage },
}

/// What every loadable module implements, in-process or behind RPC.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Called once at startup. `store_addr` is the socket the module can
    /// reach the host's scoped store on.
    async fn register(
        &self,
        store_addr: PathBuf,
    ) -> Result<ModuleInfo, ContractError>;

    async fn handle(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseMessage, ContractError>;

    /// Streaming variant for routes flagged `use_sse`.
    async fn handle_sse(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseStream, ContractError>;
}

/// [`Module`] implemented by calls to a plugin process.
#[derive(Clone)]
pub struct ModuleClient {
    rpc: RpcClient<ModuleCall, ModuleReply>,
}

impl fmt::Debug for ModuleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleClient").field("rpc", &self.rpc).finish()
    }
}

impl ModuleClient {
    /// Client over an already connected stream.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            rpc: RpcClient::new(io),
        }
    }

    /// Connects to a module listening on a Unix socket.
    pub async fn connect(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, ContractError> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(Self::new(stream))
    }

    /// True once the connection to the module is gone.
    pub fn is_closed(&self) -> bool {
        self.rpc.is_closed()
    }

    /// Drops the connection. Calls in flight fail with `Disconnected`.
    pub fn close(&self) {
        self.rpc.close();
    }
}

#[async_trait]
impl Module for ModuleClient {
    async fn register(
        &self,
        store_addr: PathBuf,
    ) -> Result<ModuleInfo, ContractError> {
        match self.rpc.call(ModuleCall::Register { store_addr }).await? {
            ModuleReply::Registered { info } => Ok(info),
            ModuleReply::Response { .. } => {
                Err(ContractError::UnexpectedReply("register"))
            }
        }
    }

    async fn handle(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseMessage, ContractError> {
        match self.rpc.call(ModuleCall::Handle { request }).await? {
            ModuleReply::Response { response } => Ok(response),
            ModuleReply::Registered { .. } => {
                Err(ContractError::UnexpectedReply("handle"))
            }
        }
    }

    async fn handle_sse(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseStream, ContractError> {
        let mut replies =
            self.rpc.call_streaming(ModuleCall::HandleSse { request }).await?;
        let stream = async_stream::stream! {
            while let Some(reply) = replies.next().await {
                match reply {
                    Ok(ModuleReply::Response { response }) => yield response,
                    Ok(ModuleReply::Registered { .. }) => {
                        debug!("unexpected register reply inside event stream");
                        break;
                    }
                    Err(err) => {
                        debug!(error = %err, "module event stream ended with error");
                        break;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Serves a [`Module`] implementation over RPC.
pub struct ModuleService<M> {
    module: Arc<M>,
}

impl<M> fmt::Debug for ModuleService<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleService").finish_non_exhaustive()
    }
}

impl<M: Module> ModuleService<M> {
    /// Serves `module` to whichever connection this service is attached to.
    pub fn new(module: Arc<M>) -> Self {
        Self { module }
    }
}

#[async_trait]
impl<M: Module> RpcService<ModuleCall, ModuleReply> for ModuleService<M> {
    async fn handle(
        &self,
        call: ModuleCall,
    ) -> Result<Reply<ModuleReply>, ContractError> {
        match call {
            ModuleCall::Register { store_addr } => {
                let info = self.module.register(store_addr).await?;
                Ok(Reply::Unary(ModuleReply::Registered { info }))
            }
            ModuleCall::Handle { request } => {
                let response = self.module.handle(request).await?;
                Ok(Reply::Unary(ModuleReply::Response { response }))
            }
            ModuleCall::HandleSse { request } => {
                let events = self.module.handle_sse(request).await?;
                Ok(Reply::Stream(
                    events
                        .map(|response| Ok(ModuleReply::Response { response }))
                        .boxed(),
                ))
            }
        }
    }
}
