//! Tests for the RCON codec and client.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rstest::rstest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::*;

async fn read_packet(stream: &mut TcpStream, buffer: &mut BytesMut) -> Packet {
    loop {
        if let Some(packet) = decode_packet(buffer).expect("valid packet") {
            return packet;
        }
        let read = stream.read_buf(buffer).await.expect("read from client");
        assert!(read > 0, "client closed early");
    }
}

/// Minimal server: accepts `secret`, replies to any command with the given
/// fragments, then echoes the marker.
async fn spawn_server(fragments: Vec<&'static [u8]>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buffer = BytesMut::new();

        let auth = read_packet(&mut stream, &mut buffer).await;
        let auth_id = if auth.body == "secret" { auth.id } else { -1 };
        stream
            .write_all(&encode_packet(auth.id, SERVERDATA_RESPONSE_VALUE, b""))
            .await
            .expect("write empty value");
        stream
            .write_all(&encode_packet(auth_id, SERVERDATA_AUTH_RESPONSE, b""))
            .await
            .expect("write auth response");
        if auth_id == -1 {
            return;
        }

        let command = read_packet(&mut stream, &mut buffer).await;
        let marker = read_packet(&mut stream, &mut buffer).await;
        for fragment in fragments {
            stream
                .write_all(&encode_packet(command.id, SERVERDATA_RESPONSE_VALUE, fragment))
                .await
                .expect("write fragment");
        }
        stream
            .write_all(&encode_packet(marker.id, SERVERDATA_RESPONSE_VALUE, b""))
            .await
            .expect("write marker");
    });
    port
}

#[rstest]
fn decodes_encoded_packet_and_waits_for_partial_input() {
    let encoded = encode_packet(7, SERVERDATA_EXECCOMMAND, b"status");
    let (head, tail) = encoded.split_at(6);

    let mut buffer = BytesMut::from(head);
    assert_eq!(decode_packet(&mut buffer).expect("partial is fine"), None);

    buffer.extend_from_slice(tail);
    let packet = decode_packet(&mut buffer)
        .expect("decode")
        .expect("complete packet");
    assert_eq!(
        packet,
        Packet {
            id: 7,
            kind: SERVERDATA_EXECCOMMAND,
            body: Bytes::from_static(b"status"),
        }
    );
    assert!(buffer.is_empty());
}

#[rstest]
fn rejects_out_of_range_size() {
    let mut buffer = BytesMut::from(&[0xff_u8, 0xff, 0xff, 0x7f, 0, 0][..]);
    let err = decode_packet(&mut buffer).expect_err("oversized packet");
    assert!(matches!(err, ConsoleError::Protocol { .. }));
}

#[rstest]
#[tokio::test]
async fn query_joins_reply_fragments() {
    let port = spawn_server(vec![&b"hostname: test\n"[..], &b"players : 0 humans\n"[..]]).await;
    let reply = SourceRcon::new()
        .query("127.0.0.1", port, "secret", "status", Duration::from_secs(2))
        .await
        .expect("query succeeds");
    assert_eq!(reply, "hostname: test\nplayers : 0 humans\n");
}

#[rstest]
#[tokio::test]
async fn query_decodes_characters_split_across_fragments() {
    let hostname = "hostname: Café Ω\n".as_bytes();
    let split = hostname
        .iter()
        .position(|byte| *byte == 0xC3)
        .expect("multi-byte character present")
        + 1;
    let (head, tail) = hostname.split_at(split);
    let port = spawn_server(vec![head, tail]).await;

    let reply = SourceRcon::new()
        .query("127.0.0.1", port, "secret", "status", Duration::from_secs(2))
        .await
        .expect("query succeeds");
    assert_eq!(reply, "hostname: Café Ω\n");
}

#[rstest]
#[tokio::test]
async fn query_reports_rejected_password() {
    let port = spawn_server(Vec::new()).await;
    let err = SourceRcon::new()
        .query("127.0.0.1", port, "wrong", "status", Duration::from_secs(2))
        .await
        .expect_err("password should be rejected");
    assert!(matches!(err, ConsoleError::Authentication { .. }));
}

#[rstest]
#[tokio::test]
async fn query_times_out_against_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let _server = tokio::spawn(async move {
        let accepted = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(accepted);
    });

    let err = SourceRcon::new()
        .query("127.0.0.1", port, "secret", "status", Duration::from_millis(100))
        .await
        .expect_err("silent server should time out");
    assert!(matches!(err, ConsoleError::Timeout { .. }));
}
