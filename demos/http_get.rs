//! Minimal HTTP GET example.
//!
//! Run with: cargo run --example http_get -- http://example.com/
//! Set `RUST_LOG=rswire=debug` to see connection and parse events.

use std::error::Error;

use rswire::HttpClient;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://example.com/".to_string());

    let mut client = HttpClient::new(&url)?;
    client.add_header("Accept", "*/*");
    client.add_header("User-Agent", "rswire-http-get");
    client.connect()?;

    let message = client.response()?;
    println!(
        "{} {}",
        message.status_code().unwrap_or_default(),
        message.reason().unwrap_or_default()
    );
    if let Some(headers) = client.response_headers() {
        for (name, value) in headers.pairs() {
            println!("{name}: {value}");
        }
    }
    println!();

    let body = client.read_body()?;
    println!("{}", String::from_utf8_lossy(&body));
    client.close();
    Ok(())
}
