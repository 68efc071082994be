//! Rust bindings for the IEEE 1275 (Open Firmware) client interface.
//!
//! A loader running under Open Firmware reaches every firmware service
//! through one entry point. Each request is a frame of machine-word
//! [`Cell`]s: the address of the service name, the argument and return
//! counts, the arguments, then space for the results. Firmware fills in the
//! results and returns a status; -1 means it refused the frame.
//!
//! # Architecture
//!
//! - [`client`] - the entry point seam and [`Client`], which owns it
//! - [`frame`] - call frame layout and return cells
//! - [`tree`] - device tree navigation and properties
//! - [`property`] - integer properties in host byte order
//! - [`instance`] - open, close, read, write and seek on device instances
//! - [`memory`] - physical memory claim and release
//! - [`method`] - `call-method` and the typed device methods built on it
//! - [`error`] - the two-tier error type
//!
//! # Sentinels
//!
//! Firmware signals failure in-band, and not consistently: an invalid
//! phandle is all-ones, an invalid ihandle is zero, `child` and `peer`
//! answer zero for "none", lengths are all-ones when invalid, and methods
//! report a nonzero catch result. Each wrapper checks the sentinel of its
//! own service and maps it to an [`Error`] variant.
//!
//! # Safety
//!
//! Wrappers pass the addresses of caller buffers to firmware. That is sound
//! only if the [`EntryPoint`] honours the lengths passed alongside them,
//! which is why the trait is `unsafe` to implement. Calls are synchronous
//! and must not overlap: firmware is not reentrant.

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

pub mod client;
pub mod error;
pub mod frame;
pub mod handle;
pub mod instance;
pub mod memory;
pub mod method;
pub mod property;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod tree;

pub use client::{Client, EntryPoint, RawEntry, TRANSPORT_FAILED};
pub use error::{Error, Result};
pub use frame::{CallFrame, MAX_CELLS, Returns};
pub use handle::{Ihandle, Phandle};
pub use instance::split_position;
#[cfg(feature = "alloc")]
pub use method::EncodedUnit;
pub use method::{CommandStatus, MethodReturns, UnitAddress};
pub use property::normalize_cells;
pub use tree::{Children, PROP_NAME_LEN, PropName, Properties};

/// A firmware cell: one machine word, as wide as a pointer.
pub type Cell = usize;

/// Allocates `len` zeroed bytes, reporting failure instead of aborting.
#[cfg(feature = "alloc")]
pub(crate) fn try_zeroed(len: usize) -> Result<alloc::vec::Vec<u8>> {
    let mut buf = alloc::vec::Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}
