//! Multiplexed request/response and request/stream RPC over one byte stream.
//!
//! Each frame is a length-prefixed JSON document. Calls carry a
//! connection-unique id; replies, stream items, stream ends and faults refer
//! back to it, so any number of calls can be in flight on one connection.
//! A caller that loses interest sends `Cancel`, which aborts the call's task
//! on the serving side.

mod client;
mod frame;
mod server;

pub use client::{RpcClient, RpcStream};
pub use frame::{Frame, MAX_FRAME_LEN};
pub use server::{Reply, RpcService, serve_connection, serve_listener};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Anything that can travel inside a frame.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + 'static {}
