//! Transport to upstream MCP providers

mod http;

pub use self::http::{CallOptions, HttpTransport, RawReply, decode_body};
