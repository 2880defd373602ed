//! Extension traits for buffer and string operations.
use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, protocol::ProtocolError};

/// Integer signess in postgres docs is awful.
pub(crate) trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `u32`,
    /// this will panic when overflow instead of wrapping.
    fn to_u32(self) -> u32;
}

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for postgres")
    }
}

/// Nul string operation.
pub(crate) trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> u32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1/* nul */
    }
}

/// Nul string operation in [`BufMut`].
pub(crate) trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

/// Nul string operation in [`Bytes`].
pub(crate) trait BytesExt {
    /// Read a nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`].
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let end = self
            .iter()
            .position(|e| matches!(e, b'\0'))
            .ok_or_else(ProtocolError::missing_nul)?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        ByteStr::from_utf8(me).map_err(ProtocolError::non_utf8)
    }
}
