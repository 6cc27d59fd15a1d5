//! Contracts shared by the PTT host and its out-of-process modules.
//!
//! A module is a separate executable. The host launches it, reads a single
//! handshake line from its stdout, connects to the Unix socket announced in
//! that line, and from then on talks to it through the [`module::Module`]
//! contract. Modules call back into the host through the [`store::Store`]
//! contract over a second socket whose address arrives with `Register`.
//!
//! Both contracts ride on the same small multiplexed RPC substrate in
//! [`rpc`], so many concurrent calls (including long-lived streams) can share
//! one connection.

pub mod error;
pub mod handshake;
pub mod model;
pub mod module;
pub mod rpc;
pub mod serve;
pub mod store;

pub use error::ContractError;
pub use model::{
    Category, Headers, Metadata, ModuleInfo, RequestMessage, ResponseMessage,
    Route,
};
pub use module::{Module, ModuleClient, ResponseStream};
pub use store::{Store, StoreClient, StoreKey};

/// Frequently used items for host and module crates.
pub mod prelude {
    pub use super::error::ContractError;
    pub use super::model::{
        Category, Headers, Metadata, ModuleInfo, RequestMessage,
        ResponseMessage, Route,
    };
    pub use super::module::{Module, ModuleClient, ResponseStream};
    pub use super::store::{Store, StoreClient, StoreKey};
}
