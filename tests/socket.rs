//! Loopback tests for the tokio UDP driver.

use std::time::Duration;

use arqx::ArqSocket;
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn pair(conv: u32) -> (ArqSocket, ArqSocket) {
    let sock_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sock_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr_a = sock_a.local_addr().unwrap();
    let addr_b = sock_b.local_addr().unwrap();
    let a = ArqSocket::from_socket(sock_a, addr_b, conv).await.unwrap();
    let b = ArqSocket::from_socket(sock_b, addr_a, conv).await.unwrap();
    (a, b)
}

#[tokio::test]
async fn loopback_roundtrip() {
    let (a, mut b) = pair(42).await;
    a.set_nodelay(true, 10, 2, true).await.unwrap();
    b.set_nodelay(true, 10, 2, true).await.unwrap();

    a.send(b"hello over udp").await.unwrap();
    let message = timeout(Duration::from_secs(5), b.recv())
        .await
        .expect("delivery within timeout")
        .expect("driver alive");
    assert_eq!(&message[..], b"hello over udp");
}

#[tokio::test]
async fn loopback_fragmented_messages_arrive_in_order() {
    let (a, mut b) = pair(77).await;
    a.set_nodelay(true, 10, 2, false).await.unwrap();
    b.set_nodelay(true, 10, 2, false).await.unwrap();

    let big: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    a.send(&big).await.unwrap();
    a.send(b"tail").await.unwrap();

    let first = timeout(Duration::from_secs(10), b.recv())
        .await
        .expect("delivery within timeout")
        .expect("driver alive");
    assert_eq!(&first[..], &big[..]);

    let second = timeout(Duration::from_secs(10), b.recv())
        .await
        .expect("delivery within timeout")
        .expect("driver alive");
    assert_eq!(&second[..], b"tail");

    assert!(!a.is_dead().await);
    assert!(a.stats().await.segments_out >= 5);
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let (mut a, mut b) = pair(7).await;
    a.set_nodelay(true, 10, 2, true).await.unwrap();
    b.set_nodelay(true, 10, 2, true).await.unwrap();

    a.send(b"ping").await.unwrap();
    b.send(b"pong").await.unwrap();

    let at_b = timeout(Duration::from_secs(5), b.recv()).await.unwrap().unwrap();
    let at_a = timeout(Duration::from_secs(5), a.recv()).await.unwrap().unwrap();
    assert_eq!(&at_b[..], b"ping");
    assert_eq!(&at_a[..], b"pong");
}
