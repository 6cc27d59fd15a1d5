use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use futures::future::{AbortHandle, abortable};
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Message;
use super::frame::{Frame, codec, write_frames};
use crate::error::ContractError;

/// What a service hands back for one call.
pub enum Reply<R> {
    /// Single answer.
    Unary(R),
    /// Items forwarded as they arrive, then `End`.
    Stream(BoxStream<'static, Result<R, ContractError>>),
}

impl<R> fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Unary(_) => f.write_str("Reply::Unary"),
            Reply::Stream(_) => f.write_str("Reply::Stream"),
        }
    }
}

/// Server side of a contract.
#[async_trait]
pub trait RpcService<Q, R>: Send + Sync + 'static {
    async fn handle(&self, call: Q) -> Result<Reply<R>, ContractError>;
}

type CallTable = Arc<DashMap<u64, AbortHandle>>;

/// Serves calls from one connection until the peer hangs up or `shutdown`
/// fires. Every call runs on its own task; in-flight calls are aborted when
/// the connection ends.
pub async fn serve_connection<S, Q, R, H>(
    io: S,
    service: Arc<H>,
    shutdown: CancellationToken,
) -> Result<(), ContractError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    Q: Message,
    R: Message,
    H: RpcService<Q, R>,
{
    let (read, write) = tokio::io::split(io);
    let (outbound, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let writer = tokio::spawn(write_frames(write, outbound_rx, shutdown.clone()));
    let calls: CallTable = Arc::new(DashMap::new());
    let mut frames = FramedRead::new(read, codec());

    let result = loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            next = frames.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => break Err(ContractError::Io(err)),
            None => break Ok(()),
        };
        let frame = match Frame::<Q, R>::decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => break Err(err),
        };

        match frame {
            Frame::Call { id, call } => {
                let (task, handle) = abortable(run_call(
                    id,
                    call,
                    Arc::clone(&service),
                    outbound.clone(),
                    Arc::clone(&calls),
                ));
                calls.insert(id, handle);
                tokio::spawn(task);
            }
            Frame::Cancel { id } => {
                if let Some((_, handle)) = calls.remove(&id) {
                    debug!(id, "call cancelled by peer");
                    handle.abort();
                }
            }
            other => warn!(
                id = other.id(),
                kind = other.kind(),
                "client sent a server-side frame; ignoring"
            ),
        }
    };

    let ids: Vec<u64> = calls.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, handle)) = calls.remove(&id) {
            handle.abort();
        }
    }
    drop(outbound);
    let _ = writer.await;
    result
}

async fn run_call<Q, R, H>(
    id: u64,
    call: Q,
    service: Arc<H>,
    outbound: mpsc::UnboundedSender<Bytes>,
    calls: CallTable,
) where
    Q: Message,
    R: Message,
    H: RpcService<Q, R>,
{
    let send = |frame: Frame<Q, R>| -> bool {
        match frame.encode() {
            Ok(bytes) => outbound.send(bytes).is_ok(),
            Err(err) => {
                warn!(id, error = %err, "failed to encode rpc frame");
                false
            }
        }
    };

    match service.handle(call).await {
        Ok(Reply::Unary(reply)) => {
            send(Frame::Reply { id, reply });
        }
        Ok(Reply::Stream(mut items)) => {
            let mut clean = true;
            while let Some(item) = items.next().await {
                let delivered = match item {
                    Ok(reply) => send(Frame::Item { id, reply }),
                    Err(err) => {
                        clean = false;
                        send(Frame::Fault {
                            id,
                            message: err.to_string(),
                        });
                        break;
                    }
                };
                if !delivered {
                    clean = false;
                    break;
                }
            }
            if clean {
                send(Frame::End { id });
            }
        }
        Err(err) => {
            send(Frame::Fault {
                id,
                message: err.to_string(),
            });
        }
    }
    calls.remove(&id);
}

/// Accepts connections on `listener` and serves each with `service` until
/// `shutdown` fires.
pub async fn serve_listener<Q, R, H>(
    listener: UnixListener,
    service: Arc<H>,
    shutdown: CancellationToken,
) where
    Q: Message,
    R: Message,
    H: RpcService<Q, R>,
{
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let service = Arc::clone(&service);
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    if let Err(err) =
                        serve_connection::<_, Q, R, H>(stream, service, token).await
                    {
                        debug!(error = %err, "rpc connection ended with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "rpc accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
