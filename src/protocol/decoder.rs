//! Incremental backend message decoding.
use bytes::{Buf, Bytes, BytesMut};

use super::error::ProtocolError;

/// Message type byte plus i32 length.
const HEADER: usize = 1 + 4;

/// Try to split the next complete backend message off `buf`.
///
/// Returns `Ok(None)` when `buf` holds fewer bytes than a whole message;
/// nothing is consumed in that case, the caller appends more socket bytes
/// and re-invokes. On success exactly one message worth of bytes has been
/// consumed and the message body is returned with its type byte.
///
/// A malformed length prefix is unrecoverable; the connection must be
/// closed by the caller.
pub fn next_message(buf: &mut BytesMut) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    let Some(mut header) = buf.get(..HEADER) else {
        return Ok(None);
    };

    let msgtype = header.get_u8();
    let len = header.get_i32();

    // the length count includes itself, but not the message-type byte
    if len < 4 {
        return Err(ProtocolError::bad_length(len));
    }

    let len = len as usize;
    if buf.len() - 1/*msgtype*/ < len {
        buf.reserve(1 + len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER);
    let body = buf.split_to(len - 4).freeze();

    Ok(Some((msgtype, body)))
}

#[cfg(test)]
mod test {
    use super::*;

    fn message(msgtype: u8, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        use bytes::BufMut;
        buf.put_u8(msgtype);
        buf.put_u32(4 + body.len() as u32);
        buf.put(body);
        buf
    }

    #[test]
    fn short_header_consumes_nothing() {
        let mut buf = BytesMut::from(&b"Z\x00\x00"[..]);
        assert!(next_message(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn short_body_consumes_nothing() {
        let mut full = message(b'Z', b"I");
        let mut buf = full.split_to(full.len() - 1);
        let before = buf.len();

        assert!(next_message(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), before);

        // appending the missing byte completes the message
        buf.unsplit(full);
        let (msgtype, body) = next_message(&mut buf).unwrap().unwrap();
        assert_eq!(msgtype, b'Z');
        assert_eq!(&body[..], b"I");
        assert!(buf.is_empty());
    }

    #[test]
    fn exact_message_consumes_exactly_once() {
        let mut buf = message(b'C', b"SELECT 1\0");
        let (msgtype, body) = next_message(&mut buf).unwrap().unwrap();

        assert_eq!(msgtype, b'C');
        assert_eq!(&body[..], b"SELECT 1\0");
        assert!(buf.is_empty());
        assert!(next_message(&mut buf).unwrap().is_none());
    }

    #[test]
    fn two_messages_split_in_order() {
        let mut buf = message(b'1', b"");
        buf.unsplit(message(b'Z', b"I"));

        assert_eq!(next_message(&mut buf).unwrap().unwrap().0, b'1');
        assert_eq!(next_message(&mut buf).unwrap().unwrap().0, b'Z');
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_length_is_fatal() {
        let mut buf = BytesMut::from(&b"Q\x00\x00\x00\x01rest"[..]);
        let err = next_message(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::BadLength { len: 1 }));
    }
}
