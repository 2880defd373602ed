//! Postgres Backend Messages
use bytes::{Buf, Bytes};

use crate::{common::ByteStr, ext::BytesExt};

use super::{Oid, error::ProtocolError};

/// A type that can be decoded from a postgres backend message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterStatus(ParameterStatus),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    CommandComplete,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NegotiateProtocolVersion,
    NoticeResponse,
    NotificationResponse,
    ParameterStatus,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($self:ident,$typ:ident) => {
        if $self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected($self::MSGTYPE, $typ))
        }
    };
}

/// Read a fixed-width field, bailing with [`ProtocolError::Truncated`] when
/// the body ends early. Backend input is untrusted; the panicking `get_*`
/// reads must not be used on it.
macro_rules! try_get {
    ($body:ident.$get:ident(), $name:ident) => {
        $body.$get().map_err(|_| ProtocolError::truncated($name::MSGTYPE))?
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Int32(0) Specifies that the authentication was successful.
    Ok,
    /// Int32(3) Specifies that a clear-text password is required.
    CleartextPassword,
    /// Int32(5) Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Int32(10) Specifies that SASL authentication is required.
    ///
    /// The message body is a list of SASL authentication mechanisms in the
    /// server's order of preference. Not supported by this library.
    Sasl,
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Authentication, msgtype);
        let auth = match try_get!(body.try_get_u32(), Authentication) {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => {
                if body.remaining() < 4 {
                    return Err(ProtocolError::truncated(Authentication::MSGTYPE));
                }
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                Authentication::MD5Password { salt }
            },
            10 => Authentication::Sasl,
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(BackendKeyData, msgtype);
        Ok(Self {
            process_id: try_get!(body.try_get_u32(), BackendKeyData),
            secret_key: try_get!(body.try_get_u32(), BackendKeyData),
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterStatus, msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
///
/// The body has the same field layout as [`ErrorResponse`].
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NoticeResponse, msgtype);
        Ok(NoticeResponse { body })
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order.
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn to_db_error(self) -> Result<super::DbError, ProtocolError> {
        super::DbError::from_fields(self.body)
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ErrorResponse, msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as an asynchronous notification from `NOTIFY`.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The "payload" string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NotificationResponse, msgtype);
        Ok(Self {
            process_id: try_get!(body.try_get_u32(), NotificationResponse),
            channel: body.get_nul_bytestr()?,
            payload: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as a row description.
///
/// Indicates that rows are about to be returned in response to a SELECT,
/// FETCH, etc. query. This will be followed by a [`DataRow`] message for
/// each row being returned.
#[derive(Debug)]
pub struct RowDescription {
    /// Specifies the number of fields in a row (can be zero).
    pub field_len: u16,
    /// Per-field descriptions, decoded lazily via [`fields`][RowDescription::fields].
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';

    /// Iterate over the field descriptions.
    pub fn fields(self) -> FieldIter {
        FieldIter { remaining: self.field_len, body: self.body }
    }
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(RowDescription, msgtype);
        Ok(Self {
            field_len: try_get!(body.try_get_u16(), RowDescription),
            body,
        })
    }
}

/// A single field description within [`RowDescription`].
#[derive(Debug)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: u32,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub attribute_num: u16,
    /// The object ID of the field's data type.
    pub data_type: Oid,
    /// The data type size (see `pg_type.typlen`).
    ///
    /// Note that negative values denote variable-width types.
    pub data_type_size: i16,
    /// The type modifier (see `pg_attribute.atttypmod`).
    pub type_modifier: i32,
    /// The format code being used for the field, zero (text) or one (binary).
    pub format_code: u16,
}

/// Iterator over [`FieldDescription`]s of a [`RowDescription`].
#[derive(Debug)]
pub struct FieldIter {
    remaining: u16,
    body: Bytes,
}

impl FieldIter {
    fn read_field(body: &mut Bytes) -> Result<FieldDescription, ProtocolError> {
        Ok(FieldDescription {
            name: body.get_nul_bytestr()?,
            table_oid: try_get!(body.try_get_u32(), RowDescription),
            attribute_num: try_get!(body.try_get_u16(), RowDescription),
            data_type: try_get!(body.try_get_u32(), RowDescription),
            data_type_size: try_get!(body.try_get_i16(), RowDescription),
            type_modifier: try_get!(body.try_get_i32(), RowDescription),
            format_code: try_get!(body.try_get_u16(), RowDescription),
        })
    }
}

impl Iterator for FieldIter {
    type Item = Result<FieldDescription, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let field = Self::read_field(&mut self.body);
        if field.is_err() {
            self.remaining = 0;
        }
        Some(field)
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    /// Raw column values, decoded lazily via [`columns`][DataRow::columns].
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';

    /// Iterate over the raw column values; `Ok(None)` is a SQL NULL.
    pub fn columns(self) -> ColumnIter {
        ColumnIter { remaining: self.column_len, body: self.body }
    }
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(DataRow, msgtype);
        Ok(Self {
            column_len: try_get!(body.try_get_u16(), DataRow),
            body,
        })
    }
}

/// Iterator over raw column values of a [`DataRow`].
#[derive(Debug)]
pub struct ColumnIter {
    remaining: u16,
    body: Bytes,
}

impl Iterator for ColumnIter {
    type Item = Result<Option<Bytes>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        // The length of the column value, in bytes (this count does not
        // include itself). Can be zero. As a special case, -1 indicates a
        // NULL column value. No value bytes follow in the NULL case.
        let len = match self.body.try_get_i32() {
            Ok(len) => len,
            Err(_) => {
                self.remaining = 0;
                return Some(Err(ProtocolError::truncated(DataRow::MSGTYPE)));
            },
        };

        match len {
            -1 => Some(Ok(None)),
            len if len >= 0 && len as usize <= self.body.remaining() => {
                Some(Ok(Some(self.body.split_to(len as usize))))
            },
            len => {
                self.remaining = 0;
                Some(Err(ProtocolError::bad_length(len)))
            },
        }
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which
    /// SQL command was completed, plus an affected row count where applicable.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandComplete, msgtype);
        Ok(Self { tag: body.get_nul_bytestr()? })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major
    /// protocol version requested by the client.
    pub minor: u32,
    /// Number of protocol options not recognized by the server.
    pub len: u32,
    /// The unrecognized option names.
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NegotiateProtocolVersion, msgtype);
        Ok(Self {
            minor: try_get!(body.try_get_u32(), NegotiateProtocolVersion),
            len: try_get!(body.try_get_u32(), NegotiateProtocolVersion),
            opt_names: body,
        })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend
/// is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator: `I` if idle, `T` if in
    /// a transaction block, `E` if in a failed transaction block.
    pub status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ReadyForQuery, msgtype);
        Ok(Self { status: try_get!(body.try_get_u8(), ReadyForQuery) })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                    assert_msgtype!($name, msgtype);
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_notification_response() {
        const NOTIFICATION_RESPONSE: &[u8] = b"\x34\x20\x10\x02TEST-CHANNEL\0THIS IS A TEST\0";

        let body = Bytes::from_static(NOTIFICATION_RESPONSE);
        let message = NotificationResponse::decode(b'A', body).unwrap();

        assert_eq!(message.process_id, 0x34201002);
        assert_eq!(message.channel, "TEST-CHANNEL");
        assert_eq!(message.payload, "THIS IS A TEST");
    }

    #[test]
    fn decode_data_row_with_null() {
        let body = Bytes::from_static(b"\x00\x02\xff\xff\xff\xff\x00\x00\x00\x022\x31");

        let row = DataRow::decode(b'D', body).unwrap();
        let mut columns = row.columns();

        assert_eq!(columns.next().unwrap().unwrap(), None);
        assert_eq!(columns.next().unwrap().unwrap(), Some(Bytes::from_static(b"21")));
        assert!(columns.next().is_none());
    }

    #[test]
    fn truncated_body_is_protocol_error() {
        let err = BackendKeyData::decode(b'K', Bytes::from_static(&[0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { msgtype: b'K' }));

        // MD5 request missing its salt
        let err = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 5, 1, 2])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { msgtype: b'R' }));

        let err = ReadyForQuery::decode(b'Z', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { msgtype: b'Z' }));
    }

    #[test]
    fn data_row_with_lying_column_length_is_protocol_error() {
        // declares a 100 byte value with 2 bytes present
        let row = DataRow::decode(b'D', Bytes::from_static(b"\x00\x01\x00\x00\x00\x6442")).unwrap();
        let mut columns = row.columns();
        let err = columns.next().unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::BadLength { len: 100 }));
        assert!(columns.next().is_none());

        // any negative length other than -1 is malformed
        let row = DataRow::decode(b'D', Bytes::from_static(b"\x00\x01\xff\xff\xff\xfe")).unwrap();
        let err = row.columns().next().unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::BadLength { len: -2 }));
    }

    #[test]
    fn truncated_field_description_is_protocol_error() {
        let mut body = bytes::BytesMut::new();
        use bytes::BufMut;
        body.put_u16(1);
        body.put(&b"id\0"[..]);
        body.put_u32(0); // body ends mid-field

        let desc = RowDescription::decode(b'T', body.freeze()).unwrap();
        let mut fields = desc.fields();
        assert!(fields.next().unwrap().is_err());
        assert!(fields.next().is_none());
    }

    #[test]
    fn decode_row_description() {
        let mut body = bytes::BytesMut::new();
        use bytes::BufMut;
        body.put_u16(1);
        body.put(&b"id\0"[..]);
        body.put_u32(0); // table oid
        body.put_u16(0); // attribute number
        body.put_u32(23); // int4
        body.put_i16(4);
        body.put_i32(-1);
        body.put_u16(0);

        let desc = RowDescription::decode(b'T', body.freeze()).unwrap();
        let fields = desc.fields().collect::<Result<Vec<_>, _>>().unwrap();

        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "id");
        assert_eq!(fields[0].data_type, 23);
        assert_eq!(fields[0].format_code, 0);
    }

    #[test]
    fn unknown_msgtype_is_protocol_error() {
        let err = BackendMessage::decode(b'?', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Unexpected { found: b'?', .. }));
    }
}
