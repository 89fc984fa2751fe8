//! # rswire - blocking HTTP/1.1 and WebSocket client core
//!
//! `rswire` speaks HTTP/1.1 and RFC 6455 WebSocket over plain or TLS sockets,
//! driving every receive through a readiness multiplexer with bounded waits.
//!
//! ## Layers
//!
//! - [`io`]: readiness multiplexing with a bitmap-scan or event-queue backend
//! - [`net`]: TCP/TLS transports, non-blocking connect, readiness-gated reads
//! - [`http`]: incremental HTTP reader (Content-Length and chunked bodies),
//!   header table, and a minimal request client
//! - [`protocol`]: frame codec, masking, client handshake, reassembly
//! - [`session`]: the client session loop and its handler surface
//!
//! ## Quick Start
//!
//! ```no_run
//! use rswire::{Handlers, WebSocketClient};
//!
//! let mut client = WebSocketClient::new();
//! let mut handlers = Handlers::new()
//!     .on_open(|session| {
//!         let _ = session.send_text("ping");
//!     })
//!     .on_message(|session, payload, header| {
//!         println!("{}: {}", header.opcode, String::from_utf8_lossy(payload));
//!         session.close();
//!     });
//! client.run("ws://127.0.0.1:9001/chat", &mut handlers)?;
//! # Ok::<(), rswire::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod io;
pub mod message;
pub mod net;
pub mod protocol;
pub mod session;
pub mod url;

#[cfg(test)]
mod test_support;

pub use config::{Config, Limits, PollerBackend, Timeouts};
pub use error::{Error, Result};
pub use http::{HeaderTable, HttpClient, HttpMessage, HttpReader};
pub use io::{Interest, Multiplexer, Poller, Readiness};
pub use message::{CloseCode, CloseFrame};
pub use protocol::{Frame, FrameHeader, OpCode, WS_GUID, compute_accept_key};
pub use session::{Handler, Handlers, Session, SessionState, WebSocketClient};
pub use url::Url;

#[cfg(feature = "async-tokio")]
pub use session::{ChannelHandler, Event, EventStream, channel};

#[cfg(feature = "tls-rustls")]
pub use net::TlsOptions;
