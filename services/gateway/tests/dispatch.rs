mod harness;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use harness::{read_to_close, request_json, tls_client_connect, GatewayHandle, TestCert, REQUEST};
use ppedge_gateway::{EchoHandler, GatewayContext, HeaderPolicy, TlsHandoff};
use ppedge_wire::{ProxyHeaderV1, ProxyHeaderV2};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_NAME: &str = "gateway.test";

fn plain_gateway() -> GatewayContext {
    GatewayContext::new(Arc::new(EchoHandler::default()))
}

fn tls_gateway(cert: &TestCert) -> GatewayContext {
    plain_gateway().with_tls(TlsHandoff::new(
        Arc::clone(&cert.server_config),
        Duration::from_secs(2),
    ))
}

#[tokio::test]
async fn plaintext_without_header_is_echoed() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "none");
    assert_eq!(json["connectionSourceIp"], "127.0.0.1");
    assert!(json["proxyProtocolSourceIp"].is_null());
    assert_eq!(json["isTLS"], false);
    assert_eq!(json["http"]["method"], "GET");
    assert_eq!(json["http"]["path"], "/whoami");
    assert_eq!(json["http"]["version"], "HTTP/1.1");
    assert_eq!(json["httpHeaders"]["host"], SERVER_NAME);

    gateway.wait_for(|s| &s.headers_absent, 1).await;
    gateway.wait_for(|s| &s.routed_plaintext, 1).await;
}

#[tokio::test]
async fn v1_header_split_across_writes() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream.write_all(b"PROXY TCP4 192.168.1.1 ").await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(b"10.0.0.1 56324 443\r\n").await.unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "v1");
    assert_eq!(json["proxyProtocolSourceIp"], "192.168.1.1");
    assert_eq!(json["connectionSourceIp"], "127.0.0.1");
    assert_eq!(json["http"]["path"], "/whoami");

    gateway.wait_for(|s| &s.headers_v1, 1).await;
}

#[tokio::test]
async fn v1_header_and_request_in_one_write() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let header = ProxyHeaderV1::new(
        "[2001:db8::1]:5000".parse().unwrap(),
        "[2001:db8::2]:443".parse().unwrap(),
    );
    let mut preface = header.encode().into_bytes();
    preface.extend_from_slice(REQUEST);

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream.write_all(&preface).await.unwrap();

    let mut response = Vec::new();
    timeout(TEST_TIMEOUT, read_to_close(&mut stream, &mut response))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(response).unwrap();
    let (_, body) = text.split_once("\r\n\r\n").unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();

    assert_eq!(json["proxyProtocolVersion"], "v1");
    assert_eq!(json["proxyProtocolSourceIp"], "2001:db8::1");
}

#[tokio::test]
async fn v2_ipv6_header_is_canonicalized() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let src: SocketAddr = "[2001:db8:0:0:0:0:0:1]:4000".parse().unwrap();
    let dst: SocketAddr = "[2001:db8::2]:443".parse().unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream
        .write_all(&ProxyHeaderV2::new(src, dst).encode())
        .await
        .unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "v2");
    assert_eq!(json["proxyProtocolSourceIp"], "2001:db8::1");
    assert_eq!(json["isTLS"], false);

    gateway.wait_for(|s| &s.headers_v2, 1).await;
}

#[tokio::test]
async fn v2_local_header_has_no_source() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream
        .write_all(&ProxyHeaderV2::local().encode())
        .await
        .unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "v2");
    assert!(json["proxyProtocolSourceIp"].is_null());
}

#[tokio::test]
async fn tls_after_v1_header() {
    let cert = TestCert::generate(SERVER_NAME);
    let gateway = GatewayHandle::spawn(tls_gateway(&cert)).await.unwrap();

    let mut stream = timeout(
        TEST_TIMEOUT,
        tls_client_connect(
            gateway.listen_addr,
            SERVER_NAME,
            &cert.cert_der,
            b"PROXY TCP4 198.51.100.7 10.0.0.1 40000 443\r\n",
        ),
    )
    .await
    .unwrap()
    .unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "v1");
    assert_eq!(json["proxyProtocolSourceIp"], "198.51.100.7");
    assert_eq!(json["isTLS"], true);
    assert_eq!(json["http"]["method"], "GET");

    gateway.wait_for(|s| &s.routed_tls, 1).await;
}

#[tokio::test]
async fn tls_without_header() {
    let cert = TestCert::generate(SERVER_NAME);
    let gateway = GatewayHandle::spawn(tls_gateway(&cert)).await.unwrap();

    let mut stream = timeout(
        TEST_TIMEOUT,
        tls_client_connect(gateway.listen_addr, SERVER_NAME, &cert.cert_der, b""),
    )
    .await
    .unwrap()
    .unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "none");
    assert_eq!(json["isTLS"], true);
}

#[tokio::test]
async fn tls_bytes_without_certificate_are_plaintext() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream
        .write_all(&[0x16, 0x03, 0x01, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o'])
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    timeout(TEST_TIMEOUT, read_to_close(&mut stream, &mut response))
        .await
        .unwrap()
        .unwrap();

    // No request head ever arrived, so the echo handler closes silently.
    assert!(response.is_empty());
    gateway.wait_for(|s| &s.routed_plaintext, 1).await;
    assert_eq!(
        gateway
            .stats()
            .routed_tls
            .load(std::sync::atomic::Ordering::Relaxed),
        0
    );
}

#[tokio::test]
async fn malformed_header_is_kept_under_lenient_policy() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream.write_all(b"PROXY TCP4 bad\r\n").await.unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    // The unparsed line reaches the handler as the request line.
    assert_eq!(json["proxyProtocolVersion"], "none");
    assert_eq!(json["http"]["method"], "PROXY");
    assert_eq!(json["http"]["path"], "TCP4");

    gateway.wait_for(|s| &s.headers_ignored, 1).await;
}

#[tokio::test]
async fn v1_line_with_bad_port_is_stripped_under_strict_policy() {
    let gateway = GatewayHandle::spawn(plain_gateway().with_policy(HeaderPolicy::Strict))
        .await
        .unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream
        .write_all(b"PROXY TCP4 203.0.113.9 10.0.0.2 x 2222\r\n")
        .await
        .unwrap();

    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(json["proxyProtocolVersion"], "v1");
    assert_eq!(json["proxyProtocolSourceIp"], "203.0.113.9");
    assert_eq!(json["http"]["method"], "GET");

    gateway.wait_for(|s| &s.headers_v1, 1).await;
}

#[tokio::test]
async fn stalled_request_head_releases_connection() {
    let gateway = GatewayHandle::spawn(GatewayContext::new(Arc::new(EchoHandler::new(
        Duration::from_millis(100),
    ))))
    .await
    .unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream
        .write_all(b"PROXY TCP4 10.0.0.1 10.0.0.2 1111 2222\r\nGET / HTTP/1.1\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(TEST_TIMEOUT, read_to_close(&mut stream, &mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.is_empty());
    gateway.wait_for(|s| &s.handler_failures, 1).await;
    gateway.wait_for(|s| &s.connections_closed, 1).await;
}

#[tokio::test]
async fn malformed_header_closes_under_strict_policy() {
    let gateway = GatewayHandle::spawn(plain_gateway().with_policy(HeaderPolicy::Strict))
        .await
        .unwrap();

    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream.write_all(b"PROXY TCP4 bad\r\n").await.unwrap();
    stream.write_all(REQUEST).await.unwrap();

    let mut response = Vec::new();
    timeout(TEST_TIMEOUT, read_to_close(&mut stream, &mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.is_empty());
    gateway.wait_for(|s| &s.detection_failures, 1).await;

    // The listener keeps serving.
    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(json["proxyProtocolVersion"], "none");
}

#[tokio::test]
async fn failed_handshake_does_not_stop_listener() {
    let cert = TestCert::generate(SERVER_NAME);
    let gateway = GatewayHandle::spawn(tls_gateway(&cert)).await.unwrap();

    // A handshake record whose body is not a ClientHello.
    let mut stream = TcpStream::connect(gateway.listen_addr).await.unwrap();
    stream
        .write_all(&[0x16, 0x03, 0x01, 0x00, 0x04, 0xff, 0x00, 0x00, 0x00])
        .await
        .unwrap();
    let mut discarded = Vec::new();
    timeout(TEST_TIMEOUT, read_to_close(&mut stream, &mut discarded))
        .await
        .unwrap()
        .unwrap();

    gateway.wait_for(|s| &s.handshake_failures, 1).await;

    let mut stream = timeout(
        TEST_TIMEOUT,
        tls_client_connect(gateway.listen_addr, SERVER_NAME, &cert.cert_der, b""),
    )
    .await
    .unwrap()
    .unwrap();
    let json = timeout(TEST_TIMEOUT, request_json(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(json["isTLS"], true);
}

#[tokio::test]
async fn concurrent_connections_keep_their_own_headers() {
    let gateway = GatewayHandle::spawn(plain_gateway()).await.unwrap();
    let addr = gateway.listen_addr;

    let mut tasks = Vec::new();
    for i in 1..=8u8 {
        tasks.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let line = format!("PROXY TCP4 10.1.0.{i} 10.0.0.1 {} 443\r\n", 40000 + i as u16);
            // Split mid-header so reads from different clients interleave.
            let (first, rest) = line.as_bytes().split_at(9);
            stream.write_all(first).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            stream.write_all(rest).await.unwrap();

            let json = request_json(&mut stream).await.unwrap();
            (i, json)
        }));
    }

    for task in tasks {
        let (i, json) = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
        assert_eq!(json["proxyProtocolSourceIp"], format!("10.1.0.{i}"));
    }

    gateway.wait_for(|s| &s.headers_v1, 8).await;
}
