//! Type adaptation and casting.
//!
//! Two independent directions, both resolved through [`TypeRegistry`]:
//!
//! - **decode**: server oid -> [`Caster`] -> [`PgValue`], applied once per
//!   column occurrence while result rows arrive. Unregistered oids fall
//!   back to the raw representation.
//! - **encode**: runtime type -> [`Adapter`] -> SQL literal fragment,
//!   applied to every bound parameter before the query is framed. An
//!   unregistered type is an [`AdaptationError`].

mod value;
mod cast;
mod adapt;
mod registry;

pub use adapt::{AdaptationError, Adapter, ToSql, quote_literal};
pub use cast::{CastContext, Caster, DecodeError, PgFormat};
pub use registry::TypeRegistry;
pub use value::PgValue;

/// Well-known type oids from the system catalog.
///
/// Stable within a server version; oids for anything beyond the built-in
/// scalars should be learned from live result metadata, see
/// [`Row::columns`][crate::row::Row::columns] and
/// [`Connection::result_oid`][crate::Connection::result_oid].
pub mod oid {
    use crate::protocol::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const NUMERIC: Oid = 1700;
}
