//! The bidirectional type registry.
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::{common::ByteStr, protocol::Oid};

use super::{
    adapt::{self, AdaptationError, Adapter, ToSql},
    cast::{CastContext, Caster, DecodeError},
    oid, PgValue,
};

/// Bidirectional mapping between server type oids and decode functions,
/// and between client runtime types and encode functions.
///
/// Registrations are process-visible through whatever `Arc` the registry is
/// shared by; later registration for the same key overrides earlier. Every
/// [`Connection`][crate::Connection] holds a shared reference; pass
/// [`TypeRegistry::global`] for the conventional one-registry-per-process
/// composition, or a dedicated instance to isolate custom types.
pub struct TypeRegistry {
    casters: RwLock<HashMap<Oid, Caster>>,
    adapters: RwLock<HashMap<TypeId, Adapter>>,
}

impl TypeRegistry {
    /// Create an empty registry with no casters and no adapters.
    pub fn empty() -> TypeRegistry {
        TypeRegistry {
            casters: RwLock::new(HashMap::new()),
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry preloaded with casters and adapters for the
    /// common scalar types.
    pub fn with_defaults() -> TypeRegistry {
        let reg = TypeRegistry::empty();

        reg.register_caster(&[oid::BOOL], |raw, ctx| super::cast::cast_bool(raw, ctx));
        reg.register_caster(&[oid::INT2, oid::INT4, oid::INT8], |raw, ctx| {
            super::cast::cast_int(raw, ctx)
        });
        reg.register_caster(&[oid::FLOAT4, oid::FLOAT8, oid::NUMERIC], |raw, ctx| {
            super::cast::cast_float(raw, ctx)
        });
        reg.register_caster(&[oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME], |raw, ctx| {
            super::cast::cast_text(raw, ctx)
        });
        reg.register_caster(&[oid::BYTEA], |raw, ctx| super::cast::cast_bytea(raw, ctx));

        reg.register_adapter::<bool>(|v, _| Ok(adapt::adapt_bool(v)));
        reg.register_adapter::<i16>(|v, _| Ok(adapt::adapt_int(*v as i64)));
        reg.register_adapter::<i32>(|v, _| Ok(adapt::adapt_int(*v as i64)));
        reg.register_adapter::<i64>(|v, _| Ok(adapt::adapt_int(*v)));
        reg.register_adapter::<f32>(|v, _| Ok(adapt::adapt_float(*v as f64)));
        reg.register_adapter::<f64>(|v, _| Ok(adapt::adapt_float(*v)));
        reg.register_adapter::<&'static str>(|v, _| Ok(adapt::adapt_str(v)));
        reg.register_adapter::<String>(|v, _| Ok(adapt::adapt_str(v)));
        reg.register_adapter::<ByteStr>(|v, _| Ok(adapt::adapt_str(v)));
        reg.register_adapter::<Vec<u8>>(|v, _| Ok(adapt::adapt_bytes(v)));
        reg.register_adapter::<Bytes>(|v, _| Ok(adapt::adapt_bytes(v)));

        macro_rules! opt {
            ($($ty:ty),*) => {$(
                reg.register_adapter::<Option<$ty>>(|v, reg| match v {
                    Some(v) => reg.encode(v),
                    None => Ok(b"NULL".to_vec()),
                });
            )*};
        }
        opt!(bool, i16, i32, i64, f32, f64, &'static str, String, Vec<u8>);

        reg
    }

    /// The process-wide default registry, preloaded with the built-ins.
    ///
    /// Override-last-wins: registrations made here are visible to every
    /// connection composed over it.
    pub fn global() -> &'static Arc<TypeRegistry> {
        static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TypeRegistry::with_defaults()))
    }

    /// Bind one caster to one or more oids, overwriting existing bindings
    /// for those oids.
    pub fn register_caster<F>(&self, oids: &[Oid], caster: F)
    where
        F: Fn(Option<&Bytes>, &CastContext) -> Result<PgValue, DecodeError> + Send + Sync + 'static,
    {
        let caster: Caster = Arc::new(caster);
        let mut casters = write(&self.casters);
        for &oid in oids {
            casters.insert(oid, Arc::clone(&caster));
        }
    }

    /// Bind one adapter to the runtime type `T`, overwriting an existing
    /// binding.
    ///
    /// The adapter receives the registry so composite adapters can
    /// [`encode`][TypeRegistry::encode] their sub-values recursively.
    pub fn register_adapter<T: Any>(
        &self,
        adapter: impl Fn(&T, &TypeRegistry) -> Result<Vec<u8>, AdaptationError> + Send + Sync + 'static,
    ) {
        let adapter: Adapter = Arc::new(move |any, reg| {
            let value = any.downcast_ref::<T>().expect("adapter table is keyed by TypeId");
            adapter(value, reg)
        });
        write(&self.adapters).insert(TypeId::of::<T>(), adapter);
    }

    /// Decode a raw column value.
    ///
    /// The lookup itself never fails: an unregistered oid returns the raw
    /// representation unmodified ([`PgValue::Text`] when utf-8,
    /// [`PgValue::Bytes`] otherwise). A registered caster may still reject
    /// a malformed value.
    pub fn decode(&self, raw: Option<&Bytes>, ctx: &CastContext) -> Result<PgValue, DecodeError> {
        let caster = read(&self.casters).get(&ctx.oid).cloned();
        // the guard is released before the caster runs, so casters are free
        // to decode sub-values through this registry
        match caster {
            Some(caster) => caster(raw, ctx),
            None => Ok(match raw {
                None => PgValue::Null,
                Some(raw) => match ByteStr::from_utf8(raw.clone()) {
                    Ok(text) => PgValue::Text(text),
                    Err(_) => PgValue::Bytes(raw.clone()),
                },
            }),
        }
    }

    /// Encode a value into a SQL literal fragment.
    ///
    /// Resolution is by the value's runtime type; an unregistered type fails
    /// with [`AdaptationError::Unregistered`] naming it. The adapter's
    /// output is returned verbatim, no additional escaping is applied.
    pub fn encode(&self, value: &dyn ToSql) -> Result<Vec<u8>, AdaptationError> {
        let adapter = read(&self.adapters).get(&value.as_any().type_id()).cloned();
        match adapter {
            Some(adapter) => adapter(value.as_any(), self),
            None => Err(AdaptationError::Unregistered { type_name: value.type_name() }),
        }
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("casters", &read(&self.casters).len())
            .field("adapters", &read(&self.adapters).len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::PgFormat;

    fn ctx(oid: Oid) -> CastContext {
        CastContext { oid, format: PgFormat::Text }
    }

    #[test]
    fn unregistered_oid_returns_raw() {
        let reg = TypeRegistry::empty();
        let raw = Bytes::from_static(b"anything");

        let value = reg.decode(Some(&raw), &ctx(999_999)).unwrap();
        assert_eq!(value, PgValue::Text(ByteStr::from_static("anything")));

        let raw = Bytes::from_static(&[0xff, 0xfe]);
        let value = reg.decode(Some(&raw), &ctx(999_999)).unwrap();
        assert_eq!(value, PgValue::Bytes(raw));
    }

    #[test]
    fn later_registration_overrides() {
        let reg = TypeRegistry::with_defaults();
        let raw = Bytes::from_static(b"21");

        assert_eq!(reg.decode(Some(&raw), &ctx(oid::INT4)).unwrap(), PgValue::Int(21));

        reg.register_caster(&[oid::INT4], |_, _| Ok(PgValue::Int(-1)));
        assert_eq!(reg.decode(Some(&raw), &ctx(oid::INT4)).unwrap(), PgValue::Int(-1));
    }

    #[test]
    fn unregistered_type_names_itself() {
        struct Custom;
        let reg = TypeRegistry::with_defaults();

        let err = reg.encode(&Custom).unwrap_err();
        let AdaptationError::Unregistered { type_name } = err else {
            panic!("expected Unregistered, got {err}");
        };
        assert!(type_name.ends_with("Custom"));
    }

    #[test]
    fn adapter_output_is_verbatim() {
        struct Raw;
        let reg = TypeRegistry::empty();
        reg.register_adapter::<Raw>(|_, _| Ok(b"it's not quoted".to_vec()));

        assert_eq!(reg.encode(&Raw).unwrap(), b"it's not quoted");
    }

    #[test]
    fn composite_adapter_recurses() {
        struct Point {
            x: f64,
            y: f64,
        }

        let reg = TypeRegistry::with_defaults();
        reg.register_adapter::<Point>(|p, reg| {
            let mut out = Vec::from(&b"("[..]);
            out.extend_from_slice(&reg.encode(&p.x)?);
            out.extend_from_slice(b", ");
            out.extend_from_slice(&reg.encode(&p.y)?);
            out.push(b')');
            Ok(out)
        });

        let fragment = reg.encode(&Point { x: 1.23, y: 4.56 }).unwrap();
        assert_eq!(fragment, b"(1.23, 4.56)");
    }

    #[test]
    fn option_adapters() {
        let reg = TypeRegistry::with_defaults();
        assert_eq!(reg.encode(&Some(3i32)).unwrap(), b"3");
        assert_eq!(reg.encode(&None::<i32>).unwrap(), b"NULL");
    }
}
