//! Embedded-client runtime for the host bridge.
//!
//! [`BridgeClient`] keeps a WebSocket session to the backend alive and answers
//! its calls through a [`host_bridge::Dispatcher`]. [`ContentStore`] provides
//! the content handlers when no real host application is attached.

pub mod session;
pub mod store;

pub use session::{BridgeClient, SessionEnd, reconnect_delay};
pub use store::ContentStore;
