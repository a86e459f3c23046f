//! Host Bridge - request/response calls over client-initiated channels
//!
//! The backend cannot dial the embedded client; the client dials out and keeps
//! one duplex channel open. This crate layers correlated calls, timeouts,
//! broadcasts and retries on top of that channel, plus the client-side
//! dispatcher that answers them. It has no HTTP or WebSocket dependencies;
//! transports plug in through an `mpsc::Sender<Envelope>` per connection.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use host_bridge::{Bridge, Envelope};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bridge = Bridge::new();
//!
//!     // A transport registers each channel as it opens...
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//!     let conn_id = bridge.registry().register(tx).await;
//!
//!     // ...and feeds replies back through `resolve`.
//!     let replies = bridge.clone();
//!     tokio::spawn(async move {
//!         while let Some(request) = rx.recv().await {
//!             replies.resolve(Envelope::reply_ok(&request, "pong".into()));
//!         }
//!     });
//!
//!     let pong = bridge
//!         .call(Envelope::new("ping"), Duration::from_secs(1))
//!         .await
//!         .unwrap();
//!     println!("{conn_id}: {pong}");
//! }
//! ```

mod bridge;
mod broadcast;
mod calls;
pub mod content;
mod dispatcher;
mod envelope;
mod error;
mod registry;
mod retry;

pub use bridge::Bridge;
pub use broadcast::Broadcaster;
pub use calls::CallLayer;
pub use dispatcher::Dispatcher;
pub use envelope::{CONNECTED, Envelope, PING, PONG, UNKNOWN_TYPE_ERROR};
pub use error::{BridgeError, HandlerError};
pub use registry::{Connection, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use retry::{MAX_RETRY_DELAY, RetryPolicy, with_retry};
