use bytes::Bytes;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Message;
use crate::error::ContractError;

/// Upper bound for one encoded frame: 16 MiB.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Envelope for everything exchanged on an RPC connection.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame<Q, R> {
    /// Client → server: start call `id`.
    Call { id: u64, call: Q },
    /// Server → client: single answer to a unary call.
    Reply { id: u64, reply: R },
    /// Server → client: next element of a streaming call.
    Item { id: u64, reply: R },
    /// Server → client: the stream for `id` finished cleanly.
    End { id: u64 },
    /// Server → client: the call failed.
    Fault { id: u64, message: String },
    /// Client → server: the caller is gone, stop working on `id`.
    Cancel { id: u64 },
}

impl<Q, R> Frame<Q, R> {
    /// Call id the frame belongs to.
    pub fn id(&self) -> u64 {
        match self {
            Frame::Call { id, .. }
            | Frame::Reply { id, .. }
            | Frame::Item { id, .. }
            | Frame::End { id }
            | Frame::Fault { id, .. }
            | Frame::Cancel { id } => *id,
        }
    }

    /// Wire tag of the frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Call { .. } => "call",
            Frame::Reply { .. } => "reply",
            Frame::Item { .. } => "item",
            Frame::End { .. } => "end",
            Frame::Fault { .. } => "fault",
            Frame::Cancel { .. } => "cancel",
        }
    }
}

impl<Q: Message, R: Message> Frame<Q, R> {
    /// Serializes the frame body; the codec adds the length prefix.
    pub fn encode(&self) -> Result<Bytes, ContractError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Inverse of [`Frame::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ContractError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Drains already-encoded frames into the write half until the queue closes
/// or `shutdown` fires. A write error cancels `shutdown`.
pub(crate) async fn write_frames<W>(
    writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, codec());
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = outbound.recv() => next,
        };
        let Some(bytes) = next else { break };
        if let Err(err) = sink.send(bytes).await {
            debug!(error = %err, "rpc write failed; closing connection");
            shutdown.cancel();
            break;
        }
    }
    if let Err(err) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!(error = %err, "rpc writer close failed");
    }
}
