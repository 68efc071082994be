//! Method dispatch through `call-method`.
//!
//! Every device method shares one frame shape:
//!
//! ```text
//! args: method-name, ihandle, stack args...
//! rets: catch-result, stack results...
//! ```
//!
//! Stack arguments are passed top of stack first, so they appear in the
//! reverse of the method's Forth stack diagram. A nonzero catch result means
//! the method threw inside firmware; the remaining return cells are then
//! meaningless.

use core::ffi::CStr;

use crate::client::{Client, EntryPoint};
use crate::error::{Error, Result};
use crate::frame::{CallFrame, MAX_CELLS, Returns, ptr_cell};
use crate::{Cell, Ihandle};

/// Return cells of a dispatched method.
pub struct MethodReturns {
    method: &'static CStr,
    rets: Returns,
}

impl MethodReturns {
    /// The catch result; zero when the method completed.
    #[must_use]
    pub fn catch_result(&self) -> Cell {
        self.rets.get(0)
    }

    /// Stack result `index`, counting from the first cell after the catch
    /// result.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the requested result count.
    #[must_use]
    pub fn get(&self, index: usize) -> Cell {
        self.rets.get(index + 1)
    }

    /// Passes the results through if the method completed.
    ///
    /// # Errors
    ///
    /// [`Error::Exception`] if the catch result is nonzero.
    pub fn check(self) -> Result<Self> {
        match self.catch_result() {
            0 => Ok(self),
            catch => Err(Error::Exception {
                method: self.method,
                catch,
            }),
        }
    }
}

/// A unit address in the four-cell SCSI representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitAddress {
    /// Low cell of the physical (target) address.
    pub phy_lo: u32,
    /// High cell of the physical (target) address.
    pub phy_hi: u32,
    /// Low cell of the logical unit number.
    pub lun_lo: u32,
    /// High cell of the logical unit number.
    pub lun_hi: u32,
}

/// Text form of a unit address, copied out of firmware memory.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    /// The unit address text.
    pub text: alloc::string::String,
    /// Length firmware reported for the text, including a terminator if
    /// firmware counted one.
    pub size: usize,
}

/// Result of `no-data-command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Catch result of the method call.
    pub catch: Cell,
    /// Nonzero if the command failed after firmware's own retries.
    pub error: Cell,
}

impl<E: EntryPoint> Client<E> {
    /// Invokes `method` on an open instance with `args` as stack arguments,
    /// reserving `nrets` stack results.
    ///
    /// The catch result is preset to 1, so a firmware that never stores it
    /// reads as a throw.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::FrameOverflow`] if the arguments do
    /// not fit. A throwing method is not an error here; see
    /// [`MethodReturns::check`].
    pub fn call_method(
        &self,
        method: &'static CStr,
        ihandle: Ihandle,
        args: &[Cell],
        nrets: usize,
    ) -> Result<MethodReturns> {
        let nargs = args.len() + 2;
        if nargs > MAX_CELLS {
            return Err(Error::FrameOverflow);
        }
        let mut cells = [0; MAX_CELLS];
        cells[0] = ptr_cell(method.as_ptr());
        cells[1] = ihandle.as_raw();
        cells[2..nargs].copy_from_slice(args);

        let nrets = nrets.checked_add(1).ok_or(Error::FrameOverflow)?;
        let frame = CallFrame::new(c"call-method", &cells[..nargs], nrets)?.with_preset(0, 1);
        let rets = self.invoke(frame)?;
        Ok(MethodReturns { method, rets })
    }

    /// Parses the textual unit address `text` with the device's
    /// `decode-unit` method.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::OutOfRange`] if the method threw.
    pub fn decode_unit(&self, ihandle: Ihandle, text: &[u8]) -> Result<UnitAddress> {
        const METHOD: &CStr = c"decode-unit";
        // ( addr len -- phys.lo phys.hi lun.lo lun.hi )
        let rets = self
            .call_method(METHOD, ihandle, &[text.len(), ptr_cell(text.as_ptr())], 4)
            .inspect_err(|e| log::debug!("ieee1275: decode-unit failed: {e}"))?;
        if rets.catch_result() != 0 {
            log::debug!("ieee1275: decode-unit threw {:#x}", rets.catch_result());
            return Err(Error::OutOfRange { method: METHOD });
        }
        Ok(UnitAddress {
            phy_hi: rets.get(0) as u32,
            phy_lo: rets.get(1) as u32,
            lun_hi: rets.get(2) as u32,
            lun_lo: rets.get(3) as u32,
        })
    }

    /// Formats `unit` as text with the device's `encode-unit` method.
    ///
    /// The text lives in firmware memory that the next call may reuse, so it
    /// is copied before this returns.
    ///
    /// # Errors
    ///
    /// Transport failure, [`Error::OutOfRange`] if the method threw, or
    /// [`Error::OutOfMemory`] if the copy could not be allocated.
    #[cfg(feature = "alloc")]
    pub fn encode_unit(&self, ihandle: Ihandle, unit: UnitAddress) -> Result<EncodedUnit> {
        const METHOD: &CStr = c"encode-unit";
        // ( lun.hi lun.lo phys.hi phys.lo -- addr len )
        let args = [
            unit.phy_hi as Cell,
            unit.phy_lo as Cell,
            unit.lun_hi as Cell,
            unit.lun_lo as Cell,
        ];
        let rets = self
            .call_method(METHOD, ihandle, &args, 2)
            .inspect_err(|e| log::debug!("ieee1275: encode-unit failed: {e}"))?;
        if rets.catch_result() != 0 {
            log::debug!("ieee1275: encode-unit threw {:#x}", rets.catch_result());
            return Err(Error::OutOfRange { method: METHOD });
        }

        let size = rets.get(0);
        let addr = rets.get(1);
        let mut text = crate::try_zeroed(size)?;
        if size != 0 {
            // SAFETY: the entry point contract keeps `addr` readable for
            // `size` bytes until the next call.
            let src = unsafe { core::slice::from_raw_parts(addr as *const u8, size) };
            text.copy_from_slice(src);
        }
        // Some firmwares count the terminator in `size`.
        if text.last() == Some(&0) {
            text.pop();
        }
        let text = alloc::string::String::from_utf8(text)
            .unwrap_or_else(|e| alloc::string::String::from_utf8_lossy(e.as_bytes()).into_owned());
        Ok(EncodedUnit { text, size })
    }

    /// Selects the SCSI `target` and `lun` subsequent commands address
    /// (`set-address`, IEEE 1275 SCSI binding). Returns the catch result.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn set_address(&self, ihandle: Ihandle, target: u32, lun: u32) -> Result<Cell> {
        // ( unit# target# -- )
        let rets = self.call_method(
            c"set-address",
            ihandle,
            &[target as Cell, lun as Cell],
            0,
        )?;
        Ok(rets.catch_result())
    }

    /// Runs a 6-byte SCSI command that has no data phase.
    ///
    /// Firmware retries internally; nothing is retried here.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn no_data_command(&self, ihandle: Ihandle, command: &[u8; 6]) -> Result<CommandStatus> {
        // ( cmd-addr -- error? )
        let rets = self.call_method(
            c"no-data-command",
            ihandle,
            &[ptr_cell(command.as_ptr())],
            1,
        )?;
        Ok(CommandStatus {
            catch: rets.catch_result(),
            error: rets.get(0),
        })
    }

    /// Programs palette entry `index` of a framebuffer. Returns the catch
    /// result.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn set_color(&self, ihandle: Ihandle, index: u8, r: u8, g: u8, b: u8) -> Result<Cell> {
        // ( red green blue color# -- )
        let rets = self.call_method(
            c"color!",
            ihandle,
            &[index.into(), b.into(), g.into(), r.into()],
            0,
        )?;
        Ok(rets.catch_result())
    }

    /// Returns the device's block size, or 0 if the method is missing or
    /// threw, leaving the caller to pick a default.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn block_size(&self, ihandle: Ihandle) -> Result<usize> {
        // ( -- block-len )
        let rets = self.call_method(c"block-size", ihandle, &[], 1)?;
        Ok(match rets.catch_result() {
            0 => rets.get(0),
            _ => 0,
        })
    }
}
