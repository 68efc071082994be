//! Integer-valued properties.
//!
//! The device tree stores integers as big-endian 32-bit cells. Reading one
//! into host order means swapping each 4-byte group on little-endian
//! hosts.

use core::ffi::CStr;

use crate::Phandle;
use crate::client::{Client, EntryPoint};
use crate::error::Result;

/// Converts every complete 4-byte group of `buf` from big-endian to host
/// order. A trailing group shorter than 4 bytes is left as it is.
pub fn normalize_cells(buf: &mut [u8], host_big_endian: bool) {
    if host_big_endian {
        return;
    }
    for group in buf.chunks_exact_mut(4) {
        group.reverse();
    }
}

impl<E: EntryPoint> Client<E> {
    /// Like [`get_property`](Self::get_property), then converts the whole of
    /// `buf` to host order with [`normalize_cells`].
    ///
    /// The conversion covers `buf`, not just the returned length, so pass a
    /// buffer sized to the property.
    ///
    /// # Errors
    ///
    /// Same as [`get_property`](Self::get_property); `buf` is untouched on
    /// failure.
    pub fn get_integer_property(
        &self,
        phandle: Phandle,
        name: &CStr,
        buf: &mut [u8],
    ) -> Result<usize> {
        let len = self.get_property(phandle, name, buf)?;
        normalize_cells(buf, cfg!(target_endian = "big"));
        Ok(len)
    }
}
