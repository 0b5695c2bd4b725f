//! Wire-parsing and request-routing context core for a memcached proxy.
//!
//! mcrelay multiplexes cache traffic between many clients and many backend
//! cache servers. This crate is the engine room of that proxy: the two
//! tightly coupled subsystems every request passes through.
//!
//! - **The wire parser** ([`Parser`]): an incremental, zero-copy decoder
//!   for a single client connection. It classifies the stream from its
//!   first byte into one of three protocols (ASCII memcached, umbrella
//!   binary, caret binary), manages a growable read buffer across
//!   arbitrarily fragmented reads, and delivers each complete message to a
//!   [`ParserCallback`] exactly once, in wire order.
//! - **The request context** ([`TypedRequestContext`]): tracks one logical
//!   request from arrival, through any number of fan-out sub-requests to
//!   backends, until the last reference drops and stats are recorded. A
//!   recording variant observes route-tree traversal without performing
//!   any I/O.
//!
//! Route-tree traversal, the proxy dispatch loop, configuration loading,
//! and connection I/O are external collaborators reached through the
//! interfaces in [`proxy`](crate::Proxy) and [`ParserCallback`].
//!
//! # Parsing example
//!
//! ```
//! use mcrelay::{Parser, ParserCallback, ParserConfig, ReadBuffer, ReplyResult};
//! use mcrelay::protocol::FrameInfo;
//!
//! struct Session;
//!
//! impl ParserCallback for Session {
//!     fn umbrella_message_ready(&mut self, info: &FrameInfo, frame: &[u8]) -> bool {
//!         assert_eq!(frame.len(), info.total_size());
//!         true
//!     }
//!     fn caret_message_ready(&mut self, _info: &FrameInfo, _frame: &[u8]) -> bool {
//!         true
//!     }
//!     fn handle_ascii(&mut self, buffer: &mut ReadBuffer) {
//!         let n = buffer.pending().len();
//!         buffer.consume_front(n);
//!     }
//!     fn parse_error(&mut self, _result: ReplyResult, _reason: &str) {}
//! }
//!
//! let mut parser = Parser::new(Session, ParserConfig::default());
//! let region = parser.acquire_write_region();
//! region[..9].copy_from_slice(b"get key\r\n");
//! assert!(parser.read_data_available(9));
//! ```

mod access_point;
mod baton;
mod buffer;
mod config;
mod context;
pub mod counter;
mod error;
mod logger;
pub mod metrics;
mod nodump;
mod parser;
mod proxy;
mod reply;

pub use access_point::AccessPoint;
pub use baton::Baton;
pub use buffer::ReadBuffer;
pub use config::{ParserConfig, ParserConfigBuilder};
pub use context::{
    create_request_context, ClientCallback, CompletionHook, ContextHandle, RequestContext,
    ShardSplitCallback, TypedRequestContext,
};
pub use counter::set_thread_shard;
pub use error::Error;
pub use logger::{ProxyRequestLogger, RequestLogger, RequestLoggerContext};
pub use nodump::NodumpRegion;
pub use parser::{Parser, ParserCallback};
pub use proxy::{
    ClientHandle, Proxy, ProxyStats, RequestPriority, RouteHandle, RouterConfig, ShardSplitter,
};
pub use reply::{ReplyLike, ReplyResult, RouteRequest};

/// Wire-format types re-exported from the protocol crate.
pub use umbrella_proto as protocol;
pub use umbrella_proto::{FrameInfo, Protocol};
