//! Transport layer for the KYN chat backend: the [`ChatBackend`] seam, its
//! HTTP and scripted implementations, and the `data: ` frame parser.

pub mod backend;
pub mod demo;
pub mod error;
pub mod http;
pub mod sse;

pub use backend::{ByteStream, ChatBackend};
pub use demo::DemoBackend;
pub use error::TransportError;
pub use http::HttpBackend;
pub use sse::{decode_event_stream, EventParser, EventStream};
