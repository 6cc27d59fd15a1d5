use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Message;
use super::frame::{Frame, codec, write_frames};
use crate::error::ContractError;

enum Pending<R> {
    Unary(oneshot::Sender<Result<R, ContractError>>),
    Stream(mpsc::UnboundedSender<Result<R, ContractError>>),
}

impl<R> Pending<R> {
    fn fail(self, err: ContractError) {
        match self {
            Pending::Unary(tx) => {
                let _ = tx.send(Err(err));
            }
            Pending::Stream(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

struct Inner<R> {
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: DashMap<u64, Pending<R>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl<R> Inner<R> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send_raw(&self, bytes: Bytes) -> Result<(), ContractError> {
        if self.shutdown.is_cancelled() {
            return Err(ContractError::Disconnected);
        }
        self.outbound
            .send(bytes)
            .map_err(|_| ContractError::Disconnected)
    }

    /// Drops the pending entry for `id` and tells the server to stop.
    fn abandon(&self, id: u64, cancel_frame: Option<Bytes>) {
        if self.pending.remove(&id).is_some()
            && let Some(bytes) = cancel_frame
        {
            let _ = self.send_raw(bytes);
        }
    }

    fn dispatch<Q>(&self, frame: Frame<Q, R>) {
        match frame {
            Frame::Reply { id, reply } => match self.pending.remove(&id) {
                Some((_, Pending::Unary(tx))) => {
                    let _ = tx.send(Ok(reply));
                }
                Some((_, Pending::Stream(tx))) => {
                    // Treat a unary answer to a streaming call as a one-item stream.
                    let _ = tx.send(Ok(reply));
                }
                None => debug!(id, "reply for unknown or abandoned call"),
            },
            Frame::Item { id, reply } => match self.pending.get(&id) {
                Some(entry) => match entry.value() {
                    Pending::Stream(tx) => {
                        let _ = tx.send(Ok(reply));
                    }
                    Pending::Unary(_) => {
                        warn!(id, "stream item for a unary call");
                    }
                },
                None => debug!(id, "stream item for unknown or abandoned call"),
            },
            Frame::End { id } => {
                if let Some((_, pending)) = self.pending.remove(&id)
                    && let Pending::Unary(tx) = pending
                {
                    let _ = tx.send(Err(ContractError::UnexpectedReply("unary call")));
                }
            }
            Frame::Fault { id, message } => {
                if let Some((_, pending)) = self.pending.remove(&id) {
                    pending.fail(ContractError::Remote(message));
                }
            }
            Frame::Call { id, .. } | Frame::Cancel { id } => {
                warn!(id, "server sent a client-side frame; ignoring");
            }
        }
    }

    fn fail_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.fail(ContractError::Disconnected);
            }
        }
    }
}

impl<R> Drop for Inner<R> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Client half of an RPC connection. Cheap to clone; every clone shares the
/// same connection and multiplexes calls over it.
pub struct RpcClient<Q, R> {
    inner: Arc<Inner<R>>,
    _calls: PhantomData<fn(Q)>,
}

impl<Q, R> Clone for RpcClient<Q, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _calls: PhantomData,
        }
    }
}

impl<Q, R> fmt::Debug for RpcClient<Q, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("in_flight", &self.inner.pending.len())
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl<Q: Message, R: Message> RpcClient<Q, R> {
    /// Starts the reader and writer tasks for `io`. Must be called inside a
    /// Tokio runtime.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(io);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            outbound,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(write_frames(write, outbound_rx, shutdown.clone()));
        tokio::spawn(read_frames::<_, Q, R>(
            FramedRead::new(read, codec()),
            Arc::downgrade(&inner),
            shutdown,
        ));

        Self {
            inner,
            _calls: PhantomData,
        }
    }

    /// True once the connection is gone. Every later call fails with
    /// [`ContractError::Disconnected`].
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves when the connection closes.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Closes the connection and fails every in-flight call.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.fail_all();
    }

    /// Unary call. Dropping the returned future cancels the call remotely.
    pub async fn call(&self, call: Q) -> Result<R, ContractError> {
        let id = self.inner.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, Pending::Unary(tx));

        let mut guard = CallGuard {
            inner: &self.inner,
            id,
            cancel_frame: Frame::<Q, R>::Cancel { id }.encode().ok(),
            armed: true,
        };
        self.inner.send_raw(Frame::<Q, R>::Call { id, call }.encode()?)?;
        // The reader may have failed every pending call before our insert.
        if self.inner.shutdown.is_cancelled() {
            return Err(ContractError::Disconnected);
        }

        let result = rx.await.unwrap_or(Err(ContractError::Disconnected));
        guard.armed = false;
        result
    }

    /// Streaming call. Items arrive in the order the server produced them;
    /// dropping the stream before it ends cancels the call remotely.
    pub async fn call_streaming(
        &self,
        call: Q,
    ) -> Result<RpcStream<R>, ContractError> {
        let id = self.inner.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.pending.insert(id, Pending::Stream(tx));

        let stream = RpcStream {
            inner: Arc::clone(&self.inner),
            id,
            items: rx,
            cancel_frame: Frame::<Q, R>::Cancel { id }.encode().ok(),
            finished: false,
        };
        self.inner.send_raw(Frame::<Q, R>::Call { id, call }.encode()?)?;
        if self.inner.shutdown.is_cancelled() {
            return Err(ContractError::Disconnected);
        }
        Ok(stream)
    }
}

struct CallGuard<'a, R> {
    inner: &'a Inner<R>,
    id: u64,
    cancel_frame: Option<Bytes>,
    armed: bool,
}

impl<R> Drop for CallGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon(self.id, self.cancel_frame.take());
        }
    }
}

/// Items of one streaming call.
pub struct RpcStream<R> {
    inner: Arc<Inner<R>>,
    id: u64,
    items: mpsc::UnboundedReceiver<Result<R, ContractError>>,
    cancel_frame: Option<Bytes>,
    finished: bool,
}

impl<R> fmt::Debug for RpcStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcStream")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<R> Stream for RpcStream<R> {
    type Item = Result<R, ContractError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let next = this.items.poll_recv(cx);
        if let Poll::Ready(None) = next {
            this.finished = true;
        }
        next
    }
}

impl<R> Drop for RpcStream<R> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.abandon(self.id, self.cancel_frame.take());
        }
    }
}

async fn read_frames<S, Q, R>(
    mut frames: FramedRead<S, tokio_util::codec::LengthDelimitedCodec>,
    inner: Weak<Inner<R>>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + Unpin,
    Q: Message,
    R: Message,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.next() => next,
        };
        let Some(client) = inner.upgrade() else { break };
        match next {
            Some(Ok(bytes)) => match Frame::<Q, R>::decode(&bytes) {
                Ok(frame) => client.dispatch(frame),
                Err(err) => {
                    warn!(error = %err, "undecodable rpc frame; closing connection");
                    break;
                }
            },
            Some(Err(err)) => {
                debug!(error = %err, "rpc read failed");
                break;
            }
            None => break,
        }
    }

    shutdown.cancel();
    if let Some(client) = inner.upgrade() {
        client.fail_all();
    }
}
