//! Connection tests against a scripted in-process server.
#![cfg(unix)]
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use bytes::{BufMut, BytesMut};
use pgpoll::{Config, Connection, ErrorKind, PgValue, wait};

fn put_message(buf: &mut BytesMut, msgtype: u8, body: &[u8]) {
    buf.put_u8(msgtype);
    buf.put_u32(4 + body.len() as u32);
    buf.put(body);
}

fn read_startup(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let len = u32::from_be_bytes(len) as usize;
    let mut body = vec![0; len - 4];
    stream.read_exact(&mut body).unwrap();
    body
}

fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).unwrap();
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut body = vec![0; len - 4];
    stream.read_exact(&mut body).unwrap();
    (header[0], body)
}

fn handshake(stream: &mut TcpStream) {
    read_startup(stream);
    let mut buf = BytesMut::new();
    put_message(&mut buf, b'R', &0u32.to_be_bytes());
    put_message(&mut buf, b'S', b"server_version\017.0\0");
    put_message(&mut buf, b'K', &[0, 0, 0, 7, 0, 0, 0, 9]);
    put_message(&mut buf, b'Z', b"I");
    stream.write_all(&buf).unwrap();
}

fn server(script: impl FnOnce(&mut TcpStream) + Send + 'static) -> (Config, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        script(&mut stream);
    });
    (Config::new().host("127.0.0.1").port(port), handle)
}

#[test]
fn query_round_trip() {
    let (config, handle) = server(|stream| {
        handshake(stream);

        let (msgtype, body) = read_message(stream);
        assert_eq!(msgtype, b'Q');
        // parameters arrive interpolated, quotes doubled
        assert_eq!(body, b"SELECT 42, 'it''s'\0");

        let mut buf = BytesMut::new();
        // a notification lands mid-result
        put_message(&mut buf, b'A', b"\x00\x00\x10\x68events\0payload\0");
        let mut desc = BytesMut::new();
        desc.put_u16(1);
        desc.put(&b"n\0"[..]);
        desc.put_u32(0);
        desc.put_u16(0);
        desc.put_u32(23);
        desc.put_i16(4);
        desc.put_i32(-1);
        desc.put_u16(0);
        put_message(&mut buf, b'T', &desc);
        put_message(&mut buf, b'D', b"\x00\x01\x00\x00\x00\x0242");
        put_message(&mut buf, b'C', b"SELECT 1\0");
        put_message(&mut buf, b'Z', b"I");
        stream.write_all(&buf).unwrap();

        let (msgtype, _) = read_message(stream);
        assert_eq!(msgtype, b'X');
    });

    let mut conn = Connection::connect(&config).unwrap();
    wait::drive(&mut conn).unwrap();

    assert_eq!(conn.server_param("server_version"), Some("17.0"));
    assert_eq!(conn.backend_pid(), Some(7));

    conn.execute("SELECT $1, $2", &[&42i32, &"it's"]).unwrap();
    wait::drive(&mut conn).unwrap();

    let rows = conn.take_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(&PgValue::Int(42)));
    assert_eq!(conn.command_tag(), Some("SELECT 1"));
    assert_eq!(conn.result_oid("n"), Some(23));

    let n = conn.pop_notification().unwrap();
    assert_eq!(n.channel, "events");
    assert_eq!(n.payload, "payload");
    assert!(conn.pop_notification().is_none());

    conn.close();
    handle.join().unwrap();
}

#[test]
fn cleartext_authentication() {
    let (config, handle) = server(|stream| {
        read_startup(stream);

        let mut buf = BytesMut::new();
        put_message(&mut buf, b'R', &3u32.to_be_bytes());
        stream.write_all(&buf).unwrap();

        let (msgtype, body) = read_message(stream);
        assert_eq!(msgtype, b'p');
        assert_eq!(body, b"hunter2\0");

        let mut buf = BytesMut::new();
        put_message(&mut buf, b'R', &0u32.to_be_bytes());
        put_message(&mut buf, b'Z', b"I");
        stream.write_all(&buf).unwrap();
    });

    let mut conn = Connection::connect(&config.password("hunter2")).unwrap();
    wait::drive(&mut conn).unwrap();
    assert!(!conn.is_closed());

    handle.join().unwrap();
}

#[test]
fn server_error_leaves_connection_usable() {
    let (config, handle) = server(|stream| {
        handshake(stream);

        let (msgtype, _) = read_message(stream);
        assert_eq!(msgtype, b'Q');
        let mut buf = BytesMut::new();
        put_message(&mut buf, b'E', b"SERROR\0C42P01\0Mno such table\0\0");
        put_message(&mut buf, b'Z', b"I");
        stream.write_all(&buf).unwrap();

        let (msgtype, _) = read_message(stream);
        assert_eq!(msgtype, b'Q');
        let mut buf = BytesMut::new();
        put_message(&mut buf, b'C', b"DELETE 0\0");
        put_message(&mut buf, b'Z', b"I");
        stream.write_all(&buf).unwrap();
    });

    let mut conn = Connection::connect(&config).unwrap();
    wait::drive(&mut conn).unwrap();

    conn.execute("DELETE FROM nope", &[]).unwrap();
    let err = wait::drive(&mut conn).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Database(_)));
    assert!(!conn.is_closed());

    conn.execute("DELETE FROM t", &[]).unwrap();
    wait::drive(&mut conn).unwrap();
    assert_eq!(conn.command_tag(), Some("DELETE 0"));
    assert!(conn.take_rows().is_empty());

    handle.join().unwrap();
}
