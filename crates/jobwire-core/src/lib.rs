//! Jobwire - multiplexed JSON-RPC job client.
//!
//! Many concurrent remote jobs share one duplex connection. Each job gets a
//! unique request id, may report progress before it finishes, and can be
//! cancelled by asking the server through a reserved `__cancel__` method.
//! Server failure codes can be classified for presentation with
//! [`classify`].
//!
//! # Example
//!
//! ```rust,ignore
//! use jobwire::{CallOptions, Dispatcher, TcpChannel};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> jobwire::Result<()> {
//!     let (channel, events) = TcpChannel::connect("127.0.0.1:9000".parse().unwrap()).await?;
//!     let dispatcher = Dispatcher::spawn(channel, events);
//!
//!     let sum = dispatcher.call("add", json!([2, 3]))?.await?;
//!     println!("2 + 3 = {}", sum);
//!
//!     let job = dispatcher.call_with(
//!         "longTask",
//!         json!({}),
//!         CallOptions::new().on_progress(|p| println!("{:?}", p.fraction())),
//!     )?;
//!     match job.await {
//!         Ok(value) => println!("done: {}", value),
//!         Err(e) if e.is_cancelled() => println!("cancelled"),
//!         Err(e) => return Err(e),
//!     }
//!
//!     dispatcher.close();
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod table;

// Re-export commonly used types
pub use classify::{
    classify, is_developer_error, is_user_error, Audience, Classification, ErrorCatalog, Intent,
    Presentation,
};
pub use config::{DispatcherConfig, ProtocolConfig};
pub use connection::{
    Channel, ChannelEvent, ChannelEvents, ConnectionEvent, MemoryChannel, MemoryPeer, TcpChannel,
};
pub use dispatcher::{CallHandle, CallOptions, Dispatcher, DispatcherBuilder};
pub use error::{JobwireError, Result};
pub use operation::{JobStatus, ProgressCallback, ResponseTransform};
pub use protocol::{
    MessageCodec, Params, Progress, RequestEnvelope, RequestId, ResponseEnvelope, RpcFailure,
    SentinelPolicy,
};
