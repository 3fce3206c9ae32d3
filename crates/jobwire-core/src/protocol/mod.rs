//! Wire envelopes and the message codec.
//!
//! Every frame is a single JSON object carrying a protocol tag and an id.
//! Requests add `method` and `params`; inbound frames carry exactly one of
//! `response`, `progress`, or `error`.
//!
//! ```text
//! -> {"jsonrpc":"2.0","id":8,"method":"longTask","params":{}}
//! <- {"jsonrpc":"2.0","id":8,"progress":{"worked":1,"total":10}}
//! <- {"jsonrpc":"2.0","id":8,"response":"done"}
//! ```

pub mod codec;
pub mod envelope;
pub mod sentinel;

pub use codec::{FrameError, MessageCodec};
pub use envelope::{Params, Progress, RequestEnvelope, RequestId, ResponseEnvelope, RpcFailure};
pub use sentinel::SentinelPolicy;
