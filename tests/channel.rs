//! Async delivery of session events through a channel.

#![cfg(feature = "async-tokio")]

use std::future::poll_fn;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::pin::Pin;
use std::thread;
use std::time::Duration;

use futures_core::Stream;
use rswire::protocol::{OpCode, compute_accept_key, encode_frame};
use rswire::session::{Event, WebSocketClient, channel};
use rswire::Config;

fn spawn_server(frames: Vec<Vec<u8>>) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://127.0.0.1:{}/", listener.local_addr().unwrap().port());
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).unwrap();
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();
        let key = head
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap();
        write!(
            stream,
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            compute_accept_key(key)
        )
        .unwrap();
        for frame in frames {
            stream.write_all(&frame).unwrap();
        }
    });
    (url, handle)
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let (url, server) = spawn_server(vec![
        encode_frame(true, OpCode::Text, None, b"one").to_vec(),
        encode_frame(true, OpCode::Binary, None, &[2]).to_vec(),
        encode_frame(true, OpCode::Close, None, &[0x03, 0xe8]).to_vec(),
    ]);

    let (mut handler, mut events) = channel();
    let config = Config::default().with_read_timeout(Some(Duration::from_secs(5)));
    let run = tokio::task::spawn_blocking(move || {
        let mut client = WebSocketClient::with_config(config);
        client.run(&url, &mut handler)
    });

    assert_eq!(events.recv().await, Some(Event::Open));
    match events.recv().await {
        Some(Event::Message { payload, header }) => {
            assert_eq!(payload, b"one");
            assert_eq!(header.opcode, OpCode::Text);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The stream interface yields the same sequence.
    let next = poll_fn(|cx| Pin::new(&mut events).poll_next(cx)).await;
    assert!(matches!(next, Some(Event::Message { ref payload, .. }) if payload == &[2]));
    assert_eq!(events.recv().await, Some(Event::Close));

    run.await.unwrap().unwrap();
    assert_eq!(events.recv().await, None);
    server.join().unwrap();
}

#[tokio::test]
async fn test_failure_delivers_error_only() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let (mut handler, mut events) = channel();
    let run = tokio::task::spawn_blocking(move || {
        WebSocketClient::new().run(&format!("ws://127.0.0.1:{port}/"), &mut handler)
    });

    assert!(matches!(events.recv().await, Some(Event::Error(_))));
    assert!(run.await.unwrap().is_err());
    assert_eq!(events.recv().await, None);
}
