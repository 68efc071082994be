//! The firmware entry point and the client that drives it.

use core::ffi::{CStr, c_int, c_void};

use crate::Cell;
use crate::error::{Error, Result};
use crate::frame::{CallFrame, Returns, ptr_cell};

/// Status the entry point returns when it refuses a frame.
pub const TRANSPORT_FAILED: isize = -1;

/// The single client interface entry point.
///
/// # Safety
///
/// Implementors receive raw addresses of caller buffers inside argument
/// cells. They must read exactly `nargs` argument cells, write at most
/// `nrets` return cells, and never access a buffer past the length that
/// accompanies it in the frame. A return cell that carries an address
/// must point at memory readable for the length returned with it until
/// the next call.
pub unsafe trait EntryPoint {
    /// Hands the frame at `frame` to firmware and returns its status.
    ///
    /// # Safety
    ///
    /// `frame` must point at a [`CallFrame`] that stays alive and
    /// unaliased for the duration of the call.
    unsafe fn call(&self, frame: *mut Cell) -> isize;
}

unsafe impl<E: EntryPoint + ?Sized> EntryPoint for &E {
    unsafe fn call(&self, frame: *mut Cell) -> isize {
        // SAFETY: forwarded from the caller.
        unsafe { (**self).call(frame) }
    }
}

/// The entry point address firmware passed to the loader.
#[derive(Clone, Copy)]
pub struct RawEntry(unsafe extern "C" fn(*mut c_void) -> c_int);

impl RawEntry {
    /// Wraps the firmware's client interface handler.
    ///
    /// # Safety
    ///
    /// `entry` must be the handler address supplied by firmware at load
    /// time, and firmware must still own the machine.
    pub unsafe fn new(entry: unsafe extern "C" fn(*mut c_void) -> c_int) -> Self {
        Self(entry)
    }
}

unsafe impl EntryPoint for RawEntry {
    unsafe fn call(&self, frame: *mut Cell) -> isize {
        // SAFETY: the caller guarantees `frame` is a live call frame.
        unsafe { (self.0)(frame.cast()) as isize }
    }
}

/// Client interface to the firmware hosting the loader.
///
/// Every request builds a fresh frame, blocks until firmware returns and
/// keeps nothing afterwards. Nothing is cached: each query reaches
/// firmware.
pub struct Client<E: EntryPoint = RawEntry> {
    entry: E,
}

impl<E: EntryPoint> Client<E> {
    /// Creates a client calling through `entry`.
    pub const fn new(entry: E) -> Self {
        Self { entry }
    }

    /// Returns the underlying entry point.
    pub fn entry(&self) -> &E {
        &self.entry
    }

    /// Hands `frame` to firmware.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the entry point rejects the frame.
    /// The frame is consumed either way, so its return cells are only
    /// reachable through the returned [`Returns`].
    pub fn invoke(&self, mut frame: CallFrame) -> Result<Returns> {
        let service = frame.service();
        log::trace!("ieee1275: {:?} args={:x?}", service, frame.args());

        // SAFETY: `frame` is owned by this stack frame for the whole call.
        let status = unsafe { self.entry.call(frame.as_mut_ptr()) };
        if status == TRANSPORT_FAILED {
            log::warn!("ieee1275: firmware rejected {service:?}");
            return Err(Error::Transport { service });
        }
        Ok(Returns::new(frame))
    }

    /// Builds a frame and invokes it.
    pub(crate) fn call(&self, service: &'static CStr, args: &[Cell], nrets: usize) -> Result<Returns> {
        self.invoke(CallFrame::new(service, args, nrets)?)
    }

    /// Evaluates a Forth command line in firmware and returns its catch
    /// result (zero when the command completed).
    ///
    /// # Errors
    ///
    /// Transport failure only; a throwing command is reported as a nonzero
    /// value.
    pub fn interpret(&self, command: &CStr) -> Result<Cell> {
        let rets = self.call(c"interpret", &[ptr_cell(command.as_ptr())], 1)?;
        Ok(rets.get(0))
    }

    /// Like [`interpret`](Self::interpret), treating a nonzero catch result
    /// as an error.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::Exception`] if the command threw.
    pub fn interpret_checked(&self, command: &CStr) -> Result<()> {
        match self.interpret(command)? {
            0 => Ok(()),
            catch => Err(Error::Exception {
                method: c"interpret",
                catch,
            }),
        }
    }

    /// Drops into the firmware prompt until the user resumes.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn enter(&self) -> Result<()> {
        self.call(c"enter", &[], 0).map(drop)
    }

    /// Returns control to firmware for good.
    pub fn exit(&self) -> ! {
        // Nothing useful can be done if firmware refuses or comes back.
        let _ = self.call(c"exit", &[], 0);
        loop {
            core::hint::spin_loop();
        }
    }

    /// Reads firmware's millisecond counter.
    ///
    /// The counter only increases; callers that need a timeout poll it
    /// themselves.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn milliseconds(&self) -> Result<u32> {
        let rets = self.call(c"milliseconds", &[], 1)?;
        // The counter is a 32-bit quantity even on 64-bit cells.
        Ok(rets.get(0) as u32)
    }
}
