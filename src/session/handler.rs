//! Callbacks invoked by the session loop.
//!
//! Implement [`Handler`] directly, build one from closures with
//! [`Handlers`], or (feature `async-tokio`) forward everything into a
//! channel with [`channel`] and consume it as a stream.

use crate::error::Error;
use crate::protocol::FrameHeader;

use super::client::Session;

/// Receiver of session events.
///
/// Every method defaults to a no-op. All calls happen on the thread running
/// [`WebSocketClient::run`](super::WebSocketClient::run); the [`Session`]
/// argument can be used to send frames or request a close from inside a
/// callback.
pub trait Handler {
    /// The handshake completed and the session is open.
    fn on_open(&mut self, session: &Session) {
        let _ = session;
    }

    /// A frame (or, with reassembly on, a whole message) arrived.
    ///
    /// `header` describes the delivered payload: opcode, FIN bit and length.
    /// Control frames other than CLOSE are delivered here too.
    fn on_message(&mut self, session: &Session, payload: &[u8], header: &FrameHeader) {
        let _ = (session, payload, header);
    }

    /// A step of the session failed. The run aborts after this call.
    fn on_error(&mut self, session: &Session, error: &Error) {
        let _ = (session, error);
    }

    /// The session is shutting down after having been open.
    fn on_close(&mut self, session: &Session) {
        let _ = session;
    }
}

type OpenFn<'a> = Box<dyn FnMut(&Session) + Send + 'a>;
type MessageFn<'a> = Box<dyn FnMut(&Session, &[u8], &FrameHeader) + Send + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(&Session, &Error) + Send + 'a>;
type CloseFn<'a> = Box<dyn FnMut(&Session) + Send + 'a>;

/// [`Handler`] assembled from optional closures.
///
/// ```
/// use rswire::session::Handlers;
///
/// let mut seen = Vec::new();
/// let handlers = Handlers::new()
///     .on_open(|session| { let _ = session.send_text("hello"); })
///     .on_message(|_, payload, _| seen.push(payload.to_vec()));
/// # drop(handlers);
/// ```
#[derive(Default)]
pub struct Handlers<'a> {
    open: Option<OpenFn<'a>>,
    message: Option<MessageFn<'a>>,
    error: Option<ErrorFn<'a>>,
    close: Option<CloseFn<'a>>,
}

impl<'a> Handlers<'a> {
    /// No callbacks registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the open callback.
    #[must_use]
    pub fn on_open(mut self, f: impl FnMut(&Session) + Send + 'a) -> Self {
        self.open = Some(Box::new(f));
        self
    }

    /// Register the message callback.
    #[must_use]
    pub fn on_message(mut self, f: impl FnMut(&Session, &[u8], &FrameHeader) + Send + 'a) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    /// Register the error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&Session, &Error) + Send + 'a) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Register the close callback.
    #[must_use]
    pub fn on_close(mut self, f: impl FnMut(&Session) + Send + 'a) -> Self {
        self.close = Some(Box::new(f));
        self
    }
}

impl Handler for Handlers<'_> {
    fn on_open(&mut self, session: &Session) {
        if let Some(f) = self.open.as_mut() {
            f(session);
        }
    }

    fn on_message(&mut self, session: &Session, payload: &[u8], header: &FrameHeader) {
        if let Some(f) = self.message.as_mut() {
            f(session, payload, header);
        }
    }

    fn on_error(&mut self, session: &Session, error: &Error) {
        if let Some(f) = self.error.as_mut() {
            f(session, error);
        }
    }

    fn on_close(&mut self, session: &Session) {
        if let Some(f) = self.close.as_mut() {
            f(session);
        }
    }
}

impl std::fmt::Debug for Handlers<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("open", &self.open.is_some())
            .field("message", &self.message.is_some())
            .field("error", &self.error.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}

#[cfg(feature = "async-tokio")]
pub use self::channel::{ChannelHandler, Event, EventStream, channel};

#[cfg(feature = "async-tokio")]
mod channel {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures_core::Stream;
    use tokio::sync::mpsc;

    use super::{Handler, Session};
    use crate::error::Error;
    use crate::protocol::FrameHeader;

    /// Session event as delivered through a channel.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        /// Handshake completed.
        Open,
        /// Frame or message payload with its header.
        Message {
            /// Payload bytes.
            payload: Vec<u8>,
            /// Frame metadata.
            header: FrameHeader,
        },
        /// A step failed.
        Error(Error),
        /// The session closed.
        Close,
    }

    /// [`Handler`] that forwards every event into an unbounded channel.
    ///
    /// The blocking session loop runs on its own thread (for example through
    /// `tokio::task::spawn_blocking`) while async code consumes the
    /// [`EventStream`].
    #[derive(Debug, Clone)]
    pub struct ChannelHandler {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl ChannelHandler {
        fn forward(&self, event: Event) {
            // A dropped receiver only means nobody is listening any more.
            if self.tx.send(event).is_err() {
                tracing::trace!("event receiver dropped");
            }
        }
    }

    impl Handler for ChannelHandler {
        fn on_open(&mut self, _session: &Session) {
            self.forward(Event::Open);
        }

        fn on_message(&mut self, _session: &Session, payload: &[u8], header: &FrameHeader) {
            self.forward(Event::Message {
                payload: payload.to_vec(),
                header: header.clone(),
            });
        }

        fn on_error(&mut self, _session: &Session, error: &Error) {
            self.forward(Event::Error(error.clone()));
        }

        fn on_close(&mut self, _session: &Session) {
            self.forward(Event::Close);
        }
    }

    /// Receiving half of [`channel`].
    #[derive(Debug)]
    pub struct EventStream {
        rx: mpsc::UnboundedReceiver<Event>,
    }

    impl EventStream {
        /// Next event, or `None` once the handler has been dropped.
        pub async fn recv(&mut self) -> Option<Event> {
            self.rx.recv().await
        }
    }

    impl Stream for EventStream {
        type Item = Event;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.rx.poll_recv(cx)
        }
    }

    /// Create a connected handler/stream pair.
    #[must_use]
    pub fn channel() -> (ChannelHandler, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelHandler { tx }, EventStream { rx })
    }
}
