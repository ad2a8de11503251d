//! Client-side real-time message synchronization for a socket.io chat server.
//!
//! The [`sync`] module holds the core: presence debouncing, conversation
//! routing, message reconciliation and the controller that ties them to a
//! [`transport::TransportSession`] and the REST [`api::client::MessageApi`].

pub mod api;
pub mod app;
pub mod error;
pub mod sync;
pub mod transport;
pub mod utils;

pub use error::{Result, SyncError};
