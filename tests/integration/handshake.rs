//! Handshake scenarios exercised over a real TCP socket via
//! `bolt-test-utils::FakeBoltServer` rather than a scripted in-memory
//! channel, so the 20-byte wire layout is actually proven.

use bolt_driver::channel::TcpChannel;
use bolt_driver::protocol::{perform_handshake, propose, Version, HTTP_PREAMBLE};
use bolt_driver::{BoltError, ServerAddress};
use bolt_test_utils::FakeBoltServer;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

#[tokio::test]
async fn negotiates_the_newest_mutually_supported_version() {
    let server = FakeBoltServer::start(Version::new(5, 4), vec![]).await.unwrap();
    let address = ServerAddress::new("127.0.0.1", server.local_addr().port());
    let mut channel = TcpChannel::connect(&address).await.unwrap();

    let proposed = propose(&[Version::new(5, 4), Version::new(5, 0), Version::new(4, 4), Version::new(3, 0)]);
    let negotiated = perform_handshake(&mut channel, proposed).await.unwrap();

    assert_eq!(negotiated, Version::new(5, 4));
}

/// A server that returns the HTTP preamble instead of a version (i.e.
/// this is actually an HTTP port, not the Bolt port) must fail with a
/// message that names the misconfiguration, not a generic I/O error.
#[tokio::test]
async fn http_preamble_response_surfaces_as_a_protocol_error_naming_the_mismatch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut scratch = [0u8; 20];
        use tokio::io::AsyncReadExt;
        let _ = stream.read_exact(&mut scratch).await;
        let _ = stream.write_all(&HTTP_PREAMBLE.to_be_bytes()).await;
    });

    let address = ServerAddress::new("127.0.0.1", addr.port());
    let mut channel = TcpChannel::connect(&address).await.unwrap();
    let proposed = propose(&[Version::new(5, 4)]);
    let err = perform_handshake(&mut channel, proposed).await.unwrap_err();

    match err {
        BoltError::Protocol(message) => {
            assert!(message.contains("HTTP"), "message should call out the HTTP preamble: {message}");
        }
        other => panic!("expected BoltError::Protocol, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_response_means_every_proposed_version_was_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut scratch = [0u8; 20];
        use tokio::io::AsyncReadExt;
        let _ = stream.read_exact(&mut scratch).await;
        let _ = stream.write_all(&0u32.to_be_bytes()).await;
    });

    let address = ServerAddress::new("127.0.0.1", addr.port());
    let mut channel = TcpChannel::connect(&address).await.unwrap();
    let proposed = propose(&[Version::new(5, 4)]);
    let err = perform_handshake(&mut channel, proposed).await.unwrap_err();

    assert!(matches!(err, BoltError::Protocol(_)));
}
