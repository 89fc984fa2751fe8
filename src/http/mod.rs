//! HTTP/1.1 message reading and a minimal request client.

mod client;
mod header;
mod reader;
mod request;

pub use client::{HttpClient, ResponseReader};
pub use header::{HeaderEntry, HeaderTable};
pub use reader::{HttpMessage, HttpReader, ReadState, StartLine};
pub use request::{host_header, write_request_head};
