//! WebSocket client session: connect, upgrade, then dispatch frames to a
//! [`Handler`] until the session closes.

mod client;
mod handler;
mod state;

pub use client::{Session, WebSocketClient};
pub use handler::{Handler, Handlers};
#[cfg(feature = "async-tokio")]
pub use handler::{ChannelHandler, Event, EventStream, channel};
pub use state::SessionState;
