//! The sans-I/O protocol session.
//!
//! [`Session`] owns everything about a connection except the socket: the
//! buffered wire traffic, the current phase, accumulated rows and the
//! notification queue. [`Connection`][super::Connection] shuttles bytes
//! between the session buffers and the socket; the transition rules live
//! here where they can be exercised without a server.
use std::sync::Arc;

use bytes::BytesMut;

use crate::{
    Result,
    common::ByteStr,
    notify::{Notification, NotificationQueue},
    protocol::{
        BackendMessage, BackendProtocol, DbError, ProtocolError, backend, decoder, frontend,
    },
    row::{Column, Row},
    types::{CastContext, TypeRegistry},
};

use super::{Config, ConcurrentQuery, ConnectionClosed, PollState, UnsupportedAuth};

/// Protocol phase of a connection.
///
/// `Error` is terminal: every subsequent operation fails with
/// [`ConnectionClosed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connecting(Handshake),
    Idle,
    SendingQuery,
    ReceivingResult,
    Error,
}

/// Sub-state of [`Phase::Connecting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handshake {
    /// Startup sent, negotiating authentication.
    Authenticating,
    /// Authentication passed, draining parameter reports until the server
    /// is ready.
    AwaitingReady,
}

#[derive(Debug)]
pub(crate) struct Session {
    phase: Phase,
    registry: Arc<TypeRegistry>,
    pub(crate) write_buf: BytesMut,
    pub(crate) read_buf: BytesMut,

    user: String,
    password: String,

    notifications: NotificationQueue,
    columns: Option<Arc<[Column]>>,
    rows: Vec<Row>,
    command_tag: Option<ByteStr>,
    /// Failure observed mid-result, reported at the terminating
    /// ReadyForQuery so the stream stays consistent.
    deferred: Option<crate::Error>,

    backend_key: Option<backend::BackendKeyData>,
    server_params: Vec<(ByteStr, ByteStr)>,
    transaction_status: u8,
}

impl Session {
    /// Create a session with the startup message already buffered.
    pub(crate) fn new(config: &Config, registry: Arc<TypeRegistry>) -> Session {
        let mut write_buf = BytesMut::with_capacity(1024);
        frontend::Startup {
            user: &config.user,
            database: config.database.as_deref(),
        }
        .write(&mut write_buf);

        Session {
            phase: Phase::Connecting(Handshake::Authenticating),
            registry,
            write_buf,
            read_buf: BytesMut::with_capacity(1024),
            user: config.user.clone(),
            password: config.password.clone().unwrap_or_default(),
            notifications: NotificationQueue::default(),
            columns: None,
            rows: Vec::new(),
            command_tag: None,
            deferred: None,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: 0,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Queue a query for transmission.
    ///
    /// Only one operation may be in flight: submitting while the phase is
    /// not `Idle` fails with [`ConcurrentQuery`] and leaves the
    /// outstanding operation untouched.
    pub(crate) fn submit(&mut self, sql: &str) -> Result<()> {
        match self.phase {
            Phase::Idle => { },
            Phase::Error => return Err(ConnectionClosed.into()),
            _ => return Err(ConcurrentQuery.into()),
        }

        self.rows.clear();
        self.columns = None;
        self.command_tag = None;
        self.deferred = None;

        frontend::write(frontend::Query { sql }, &mut self.write_buf);
        self.phase = Phase::SendingQuery;
        Ok(())
    }

    /// Queue the Terminate message and seal the session.
    pub(crate) fn terminate(&mut self) {
        if self.phase != Phase::Error {
            frontend::write(frontend::Terminate, &mut self.write_buf);
            self.phase = Phase::Error;
        }
    }

    /// Seal the session after a transport failure.
    pub(crate) fn mark_broken(&mut self) {
        self.phase = Phase::Error;
    }

    /// Consume every complete message in `read_buf` and report what the
    /// caller must wait for next.
    ///
    /// Never blocks and performs no I/O. `PollState::Ok` means the current
    /// operation finished: the handshake completed or a query's
    /// terminating ReadyForQuery arrived.
    pub(crate) fn step(&mut self) -> Result<PollState> {
        if self.phase == Phase::Error {
            return Err(ConnectionClosed.into());
        }
        if self.phase == Phase::SendingQuery && self.write_buf.is_empty() {
            // full request handed to the socket
            self.phase = Phase::ReceivingResult;
        }

        loop {
            let next = match decoder::next_message(&mut self.read_buf) {
                Ok(next) => next,
                Err(err) => return Err(self.fail(err)),
            };
            let Some((msgtype, body)) = next else {
                return Ok(self.pending_state());
            };
            let msg = match BackendMessage::decode(msgtype, body) {
                Ok(msg) => msg,
                Err(err) => return Err(self.fail(err)),
            };
            if let Some(state) = self.on_message(msg)? {
                return Ok(state);
            }
        }
    }

    /// What to wait for when no complete message is buffered.
    fn pending_state(&self) -> PollState {
        match self.phase {
            Phase::Idle => PollState::Ok,
            Phase::SendingQuery => PollState::Write,
            Phase::Connecting(_) if !self.write_buf.is_empty() => PollState::Write,
            Phase::Connecting(_) | Phase::ReceivingResult => PollState::Read,
            // step returns early on Error
            Phase::Error => PollState::Ok,
        }
    }

    fn fail(&mut self, err: impl Into<crate::Error>) -> crate::Error {
        self.phase = Phase::Error;
        err.into()
    }

    fn on_message(&mut self, msg: BackendMessage) -> Result<Option<PollState>> {
        use BackendMessage::*;

        // asynchronous messages can be observed in any response stream
        let msg = match msg {
            NoticeResponse(notice) => {
                if let Ok(notice) = DbError::from_fields(notice.body) {
                    log::warn!("{notice}");
                }
                return Ok(None);
            },
            NotificationResponse(n) => {
                log::trace!("notification on channel {:?}", n.channel);
                self.notifications.push(Notification::from(n));
                return Ok(None);
            },
            ParameterStatus(p) => {
                self.set_server_param(p.name, p.value);
                return Ok(None);
            },
            msg => msg,
        };

        match self.phase {
            Phase::Connecting(Handshake::Authenticating) => match msg {
                Authentication(auth) => self.on_authentication(auth).map(|()| None),
                ErrorResponse(err) => Err(self.db_fail(err)),
                NegotiateProtocolVersion(v) => {
                    log::debug!("server negotiated minor protocol version {}", v.minor);
                    Ok(None)
                },
                msg => Err(self.fail(ProtocolError::unexpected_phase(msg.msgtype(), "startup"))),
            },
            Phase::Connecting(Handshake::AwaitingReady) => match msg {
                BackendKeyData(key) => {
                    self.backend_key = Some(key);
                    Ok(None)
                },
                ReadyForQuery(ready) => {
                    self.transaction_status = ready.status;
                    self.phase = Phase::Idle;
                    Ok(Some(PollState::Ok))
                },
                ErrorResponse(err) => Err(self.db_fail(err)),
                msg => Err(self.fail(ProtocolError::unexpected_phase(msg.msgtype(), "startup"))),
            },
            Phase::SendingQuery | Phase::ReceivingResult => match msg {
                RowDescription(desc) => self.on_row_description(desc).map(|()| None),
                DataRow(row) => self.on_data_row(row).map(|()| None),
                CommandComplete(done) => {
                    self.command_tag = Some(done.tag);
                    Ok(None)
                },
                EmptyQueryResponse(_) => Ok(None),
                ErrorResponse(err) => {
                    // the connection stays usable, report at ReadyForQuery
                    let err = match err.to_db_error() {
                        Ok(db) => crate::Error::from(db),
                        Err(proto) => return Err(self.fail(proto)),
                    };
                    self.deferred.get_or_insert(err);
                    Ok(None)
                },
                ReadyForQuery(ready) => {
                    self.transaction_status = ready.status;
                    self.phase = Phase::Idle;
                    match self.deferred.take() {
                        Some(err) => Err(err),
                        None => Ok(Some(PollState::Ok)),
                    }
                },
                msg => Err(self.fail(ProtocolError::unexpected_phase(msg.msgtype(), "query"))),
            },
            Phase::Idle => match msg {
                // an asynchronous ErrorResponse while idle is the server
                // shutting the session down
                ErrorResponse(err) => Err(self.db_fail(err)),
                msg => Err(self.fail(ProtocolError::unexpected_phase(msg.msgtype(), "idle"))),
            },
            Phase::Error => Err(ConnectionClosed.into()),
        }
    }

    fn on_authentication(&mut self, auth: backend::Authentication) -> Result<()> {
        use backend::Authentication;

        match auth {
            Authentication::Ok => {
                self.phase = Phase::Connecting(Handshake::AwaitingReady);
            },
            Authentication::CleartextPassword => {
                frontend::write(
                    frontend::PasswordMessage { password: &self.password },
                    &mut self.write_buf,
                );
            },
            Authentication::MD5Password { salt } => {
                let hashed = md5_password(&self.user, &self.password, salt);
                frontend::write(
                    frontend::PasswordMessage { password: &hashed },
                    &mut self.write_buf,
                );
            },
            Authentication::Sasl => {
                return Err(self.fail(UnsupportedAuth { method: "SASL" }));
            },
        }
        Ok(())
    }

    fn db_fail(&mut self, err: backend::ErrorResponse) -> crate::Error {
        match err.to_db_error() {
            Ok(db) => self.fail(db),
            Err(proto) => self.fail(proto),
        }
    }

    fn on_row_description(&mut self, desc: backend::RowDescription) -> Result<()> {
        let mut columns = Vec::with_capacity(desc.field_len as usize);
        for field in desc.fields() {
            match field {
                Ok(field) => columns.push(Column::from_field(field)),
                Err(err) => return Err(self.fail(err)),
            }
        }
        self.columns = Some(columns.into());
        Ok(())
    }

    fn on_data_row(&mut self, row: backend::DataRow) -> Result<()> {
        let Some(columns) = self.columns.clone() else {
            return Err(self.fail(ProtocolError::unexpected_phase(
                backend::DataRow::MSGTYPE,
                "result without row description",
            )));
        };
        if row.column_len as usize != columns.len() {
            return Err(self.fail(ProtocolError::unexpected_phase(
                backend::DataRow::MSGTYPE,
                "row width mismatch",
            )));
        }

        // once a failure is deferred the remaining rows are drained undecoded
        if self.deferred.is_some() {
            return Ok(());
        }

        let mut values = Vec::with_capacity(columns.len());
        for (raw, column) in row.columns().zip(columns.iter()) {
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => return Err(self.fail(err)),
            };
            let ctx = CastContext { oid: column.oid(), format: column.format() };
            match self.registry.decode(raw.as_ref(), &ctx) {
                Ok(value) => values.push(value),
                Err(err) => {
                    self.deferred = Some(err.into());
                    return Ok(());
                },
            }
        }
        self.rows.push(Row::new(columns, values));
        Ok(())
    }

    fn set_server_param(&mut self, name: ByteStr, value: ByteStr) {
        log::trace!("parameter status {name}={value}");
        match self.server_params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.server_params.push((name, value)),
        }
    }

    // accessors

    pub(crate) fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    pub(crate) fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    pub(crate) fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    pub(crate) fn pop_notification(&mut self) -> Option<Notification> {
        self.notifications.pop()
    }

    pub(crate) fn notification_len(&self) -> usize {
        self.notifications.len()
    }

    pub(crate) fn backend_key(&self) -> Option<backend::BackendKeyData> {
        self.backend_key
    }

    pub(crate) fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| *n == *name)
            .map(|(_, v)| v.as_ref())
    }

    pub(crate) fn transaction_status(&self) -> u8 {
        self.transaction_status
    }
}

/// Hash a password for the MD5 authentication exchange:
/// `"md5" + md5(md5(password + user) + salt)`, hex encoded.
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}"));
    let mut salted = Vec::with_capacity(36);
    salted.extend_from_slice(format!("{inner:x}").as_bytes());
    salted.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(salted))
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;
    use crate::{ErrorKind, types::PgValue};

    fn session() -> Session {
        let config = Config::new();
        let mut session = Session::new(&config, Arc::new(TypeRegistry::with_defaults()));
        // skip the handshake
        session.write_buf.clear();
        session.phase = Phase::Idle;
        session
    }

    fn put_message(buf: &mut BytesMut, msgtype: u8, body: &[u8]) {
        buf.put_u8(msgtype);
        buf.put_u32(4 + body.len() as u32);
        buf.put(body);
    }

    fn ready_for_query() -> BytesMut {
        let mut buf = BytesMut::new();
        put_message(&mut buf, b'Z', b"I");
        buf
    }

    fn int4_row_description() -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u16(1);
        body.put(&b"n\0"[..]);
        body.put_u32(0);
        body.put_u16(0);
        body.put_u32(crate::types::oid::INT4);
        body.put_i16(4);
        body.put_i32(-1);
        body.put_u16(0);

        let mut buf = BytesMut::new();
        put_message(&mut buf, b'T', &body);
        buf
    }

    fn data_row(value: &[u8]) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u16(1);
        body.put_i32(value.len() as i32);
        body.put(value);

        let mut buf = BytesMut::new();
        put_message(&mut buf, b'D', &body);
        buf
    }

    fn notification(channel: &str, payload: &str) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u32(4242);
        body.put(channel.as_bytes());
        body.put_u8(0);
        body.put(payload.as_bytes());
        body.put_u8(0);

        let mut buf = BytesMut::new();
        put_message(&mut buf, b'A', &body);
        buf
    }

    #[test]
    fn second_query_is_rejected() {
        let mut s = session();
        s.submit("SELECT 1").unwrap();
        let buffered = s.write_buf.len();

        let err = s.submit("SELECT 2").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Busy(_)));

        // the outstanding query's progress is unaffected
        assert_eq!(s.write_buf.len(), buffered);
        assert_eq!(s.phase(), Phase::SendingQuery);
    }

    #[test]
    fn partial_ready_keeps_receiving() {
        let mut s = session();
        s.submit("SELECT 1").unwrap();
        s.write_buf.clear();

        let mut ready = ready_for_query();
        let partial = ready.split_to(3);
        s.read_buf.unsplit(partial);

        assert_eq!(s.step().unwrap(), PollState::Read);
        assert_eq!(s.phase(), Phase::ReceivingResult);

        s.read_buf.unsplit(ready);
        assert_eq!(s.step().unwrap(), PollState::Ok);
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn rows_accumulate_until_ready() {
        let mut s = session();
        s.submit("SELECT n").unwrap();
        s.write_buf.clear();

        s.read_buf.unsplit(int4_row_description());
        s.read_buf.unsplit(data_row(b"7"));
        s.read_buf.unsplit(data_row(b"9"));
        let mut done = BytesMut::new();
        put_message(&mut done, b'C', b"SELECT 2\0");
        s.read_buf.unsplit(done);
        s.read_buf.unsplit(ready_for_query());

        assert_eq!(s.step().unwrap(), PollState::Ok);

        let rows = s.take_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0), Some(&PgValue::Int(7)));
        assert_eq!(rows[1].get_named("n"), Some(&PgValue::Int(9)));
        assert_eq!(s.command_tag(), Some("SELECT 2"));
        assert_eq!(rows[0].columns()[0].oid(), crate::types::oid::INT4);
    }

    #[test]
    fn notifications_drain_in_arrival_order() {
        let mut s = session();
        s.submit("LISTEN ch").unwrap();
        s.write_buf.clear();

        s.read_buf.unsplit(notification("ch", "first"));
        s.read_buf.unsplit(notification("ch", "second"));
        s.read_buf.unsplit(ready_for_query());

        assert_eq!(s.step().unwrap(), PollState::Ok);
        assert_eq!(s.notification_len(), 2);

        let first = s.pop_notification().unwrap();
        assert_eq!(first.payload, "first");
        assert_eq!(first.process_id, 4242);
        assert_eq!(s.pop_notification().unwrap().payload, "second");
        assert!(s.pop_notification().is_none());
    }

    #[test]
    fn server_error_reported_at_ready_and_connection_survives() {
        let mut s = session();
        s.submit("SELECT nope").unwrap();
        s.write_buf.clear();

        let mut err = BytesMut::new();
        put_message(&mut err, b'E', b"SERROR\0C42703\0Mno such column\0\0");
        s.read_buf.unsplit(err);
        s.read_buf.unsplit(ready_for_query());

        let err = s.step().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));

        // back to Idle, a new query is accepted
        assert_eq!(s.phase(), Phase::Idle);
        s.submit("SELECT 1").unwrap();
    }

    #[test]
    fn protocol_error_is_terminal() {
        let mut s = session();
        s.submit("SELECT 1").unwrap();
        s.write_buf.clear();

        let mut junk = BytesMut::new();
        put_message(&mut junk, b'?', b"junk");
        s.read_buf.unsplit(junk);

        let err = s.step().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert_eq!(s.phase(), Phase::Error);

        let err = s.submit("SELECT 1").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed(_)));
        let err = s.step().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed(_)));
    }

    #[test]
    fn data_row_with_lying_column_length_is_terminal() {
        let mut s = session();
        s.submit("SELECT n").unwrap();
        s.write_buf.clear();

        s.read_buf.unsplit(int4_row_description());
        // declares a 100 byte value with 2 bytes present
        let mut row = BytesMut::new();
        put_message(&mut row, b'D', b"\x00\x01\x00\x00\x00\x6442");
        s.read_buf.unsplit(row);

        let err = s.step().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert_eq!(s.phase(), Phase::Error);
    }

    #[test]
    fn caster_runs_once_per_column_occurrence() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let registry = TypeRegistry::with_defaults();
        registry.register_caster(&[crate::types::oid::INT4], |raw, ctx| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            crate::types::TypeRegistry::empty().decode(raw, ctx)
        });

        let config = Config::new();
        let mut s = Session::new(&config, Arc::new(registry));
        s.write_buf.clear();
        s.phase = Phase::Idle;

        s.submit("SELECT n").unwrap();
        s.write_buf.clear();
        s.read_buf.unsplit(int4_row_description());
        s.read_buf.unsplit(data_row(b"1"));
        s.read_buf.unsplit(data_row(b"2"));
        s.read_buf.unsplit(ready_for_query());

        assert_eq!(s.step().unwrap(), PollState::Ok);
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(s.take_rows().len(), 2);
    }

    #[test]
    fn handshake_reaches_idle() {
        let config = Config::new();
        let mut s = Session::new(&config, Arc::new(TypeRegistry::with_defaults()));
        assert!(s.step().is_ok());
        assert!(matches!(s.phase(), Phase::Connecting(_)));

        // startup is buffered for the socket
        assert!(!s.write_buf.is_empty());
        s.write_buf.clear();

        let mut buf = BytesMut::new();
        put_message(&mut buf, b'R', &0u32.to_be_bytes());
        put_message(&mut buf, b'S', b"server_version\017.0\0");
        put_message(&mut buf, b'K', &[0, 0, 0, 7, 0, 0, 0, 9]);
        s.read_buf.unsplit(buf);
        s.read_buf.unsplit(ready_for_query());

        assert_eq!(s.step().unwrap(), PollState::Ok);
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.server_param("server_version"), Some("17.0"));
        assert_eq!(s.backend_key().unwrap().process_id, 7);
        assert_eq!(s.transaction_status(), b'I');
    }

    #[test]
    fn md5_password_shape() {
        let hashed = md5_password("user", "secret", [1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 35);
        assert!(hashed[3..].bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
