//! WebSocket client example.
//!
//! Sends a greeting, prints every message, and closes after the first reply.
//!
//! Run with: cargo run --example ws_client -- ws://127.0.0.1:9001/
//! Set `RUST_LOG=rswire=debug` to see the session trace.

use std::error::Error;
use std::time::Duration;

use rswire::{CloseCode, Config, FrameHeader, Handler, OpCode, Session, WebSocketClient};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://127.0.0.1:9001/";

struct Printer {
    replies: usize,
}

impl Handler for Printer {
    fn on_open(&mut self, session: &Session) {
        println!("Connected, sending greeting");
        if let Err(e) = session.send_text("Hello, WebSocket!") {
            eprintln!("Send failed: {e}");
        }
    }

    fn on_message(&mut self, session: &Session, payload: &[u8], header: &FrameHeader) {
        match header.opcode {
            OpCode::Text => println!("Received: {}", String::from_utf8_lossy(payload)),
            OpCode::Binary => println!("Received binary: {} bytes", payload.len()),
            other => println!("Received {other} ({} bytes)", payload.len()),
        }
        if header.opcode.is_data() {
            self.replies += 1;
            println!("Closing connection...");
            if let Err(e) = session.send_close(CloseCode::Normal, "goodbye") {
                eprintln!("Close failed: {e}");
                session.close();
            }
        }
    }

    fn on_error(&mut self, _session: &Session, error: &rswire::Error) {
        eprintln!("Session error: {error}");
    }

    fn on_close(&mut self, _session: &Session) {
        println!("Connection closed after {} replies", self.replies);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    println!("Connecting to {url}");

    let config = Config::default().with_read_timeout(Some(Duration::from_secs(30)));
    let mut client = WebSocketClient::with_config(config);

    client.run(&url, &mut Printer { replies: 0 })?;
    Ok(())
}
