//! Device tree access: node lookup, properties and tree edges.
//!
//! Nodes are addressed by [`Phandle`]. Note the two distinct "nothing"
//! values: lookups that fail answer with the all-ones phandle, while
//! `child` and `peer` answer zero when the relation simply does not exist.

use core::ffi::CStr;
use core::fmt;

use crate::client::{Client, EntryPoint};
use crate::error::{Error, Result};
use crate::frame::{CallFrame, ptr_cell};
use crate::{Cell, Ihandle, Phandle};

/// All-ones cell: invalid phandle, invalid length, `nextprop` error.
pub(crate) const INVALID_CELL: Cell = Cell::MAX;

/// Size of the buffer `nextprop` writes a property name into.
pub const PROP_NAME_LEN: usize = 32;

/// A property name as returned by `nextprop`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PropName {
    buf: [u8; PROP_NAME_LEN],
}

impl PropName {
    const EMPTY: Self = Self {
        buf: [0; PROP_NAME_LEN],
    };

    /// The name as a C string, suitable for feeding back to firmware.
    #[must_use]
    pub fn as_cstr(&self) -> &CStr {
        CStr::from_bytes_until_nul(&self.buf).unwrap_or_default()
    }

    /// The name bytes without the terminator.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.as_cstr().to_bytes()
    }

    /// The name as UTF-8, if it is.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_cstr().to_str().ok()
    }
}

impl fmt::Debug for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_cstr(), f)
    }
}

impl<E: EntryPoint> Client<E> {
    /// Looks up the node at `path` (a full path or an alias).
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidPhandle`] if no node matches.
    pub fn find_device(&self, path: &CStr) -> Result<Phandle> {
        let rets = self.call(c"finddevice", &[ptr_cell(path.as_ptr())], 1)?;
        match rets.get(0) {
            INVALID_CELL => Err(Error::InvalidPhandle),
            raw => Ok(Phandle::from_raw(raw)),
        }
    }

    /// Copies property `name` into `buf` and returns the property's full
    /// length.
    ///
    /// The length is reported even when it exceeds `buf.len()`, in which
    /// case only the first `buf.len()` bytes were copied.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidLength`] if the node or the
    /// property does not exist.
    pub fn get_property(&self, phandle: Phandle, name: &CStr, buf: &mut [u8]) -> Result<usize> {
        let rets = self.call(
            c"getprop",
            &[
                phandle.as_raw(),
                ptr_cell(name.as_ptr()),
                ptr_cell(buf.as_mut_ptr()),
                buf.len(),
            ],
            1,
        )?;
        match rets.get(0) {
            INVALID_CELL => Err(Error::InvalidLength),
            len => Ok(len),
        }
    }

    /// Returns the length of property `name`, for sizing a buffer.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidLength`] if the node or the
    /// property does not exist.
    pub fn get_property_length(&self, phandle: Phandle, name: &CStr) -> Result<usize> {
        let frame = CallFrame::new(
            c"getproplen",
            &[phandle.as_raw(), ptr_cell(name.as_ptr())],
            1,
        )?
        .with_preset(0, INVALID_CELL);
        match self.invoke(frame)?.get(0) {
            INVALID_CELL => Err(Error::InvalidLength),
            len => Ok(len),
        }
    }

    /// Returns the property that follows `prev` on `phandle`, or `None` once
    /// the list is exhausted. An empty `prev` starts from the first property.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::NoSuchProperty`] if the node or
    /// `prev` does not exist.
    pub fn next_property(&self, phandle: Phandle, prev: &CStr) -> Result<Option<PropName>> {
        let mut next = PropName::EMPTY;
        let frame = CallFrame::new(
            c"nextprop",
            &[
                phandle.as_raw(),
                ptr_cell(prev.as_ptr()),
                ptr_cell(next.buf.as_mut_ptr()),
            ],
            1,
        )?
        .with_preset(0, INVALID_CELL);
        match self.invoke(frame)?.get(0) {
            INVALID_CELL => Err(Error::NoSuchProperty),
            0 => Ok(None),
            _ => {
                next.buf[PROP_NAME_LEN - 1] = 0;
                Ok(Some(next))
            }
        }
    }

    /// Iterates over the property names of `phandle`.
    pub fn properties(&self, phandle: Phandle) -> Properties<'_, E> {
        Properties {
            client: self,
            phandle,
            prev: None,
            done: false,
        }
    }

    /// Stores `value` as property `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Transport failure, [`Error::InvalidLength`] if firmware refused the
    /// node, or [`Error::ShortWrite`] if it stored fewer bytes than given.
    pub fn set_property(&self, phandle: Phandle, name: &CStr, value: &[u8]) -> Result<()> {
        let requested = value.len();
        let rets = self.call(
            c"setprop",
            &[
                phandle.as_raw(),
                ptr_cell(name.as_ptr()),
                ptr_cell(value.as_ptr()),
                requested,
            ],
            1,
        )?;
        match rets.get(0) {
            INVALID_CELL => Err(Error::InvalidLength),
            actual if actual == requested => Ok(()),
            actual => Err(Error::ShortWrite { requested, actual }),
        }
    }

    /// Returns the parent of `phandle`. The root's parent is the zero
    /// phandle.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidPhandle`] if firmware answered
    /// all-ones or left the result unwritten.
    pub fn parent(&self, phandle: Phandle) -> Result<Phandle> {
        let frame = CallFrame::new(c"parent", &[phandle.as_raw()], 1)?.with_preset(0, INVALID_CELL);
        match self.invoke(frame)?.get(0) {
            INVALID_CELL => Err(Error::InvalidPhandle),
            raw => Ok(Phandle::from_raw(raw)),
        }
    }

    /// Returns the first child of `phandle`, or `None` if it has none.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidPhandle`] if firmware answered
    /// all-ones or left the result unwritten.
    pub fn child(&self, phandle: Phandle) -> Result<Option<Phandle>> {
        let frame = CallFrame::new(c"child", &[phandle.as_raw()], 1)?.with_preset(0, INVALID_CELL);
        relation(self.invoke(frame)?.get(0))
    }

    /// Returns the next sibling of `phandle`, or `None` if it is the last.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidPhandle`] if firmware answered
    /// all-ones.
    pub fn peer(&self, phandle: Phandle) -> Result<Option<Phandle>> {
        let rets = self.call(c"peer", &[phandle.as_raw()], 1)?;
        relation(rets.get(0))
    }

    /// Iterates over the children of `phandle`.
    pub fn children(&self, phandle: Phandle) -> Children<'_, E> {
        Children {
            client: self,
            parent: Some(phandle),
            current: None,
        }
    }

    /// Returns the node an open instance belongs to.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidPhandle`].
    pub fn instance_to_package(&self, ihandle: Ihandle) -> Result<Phandle> {
        let rets = self.call(c"instance-to-package", &[ihandle.as_raw()], 1)?;
        match rets.get(0) {
            INVALID_CELL => Err(Error::InvalidPhandle),
            raw => Ok(Phandle::from_raw(raw)),
        }
    }

    /// Writes the full path of `phandle` into `buf` and returns the path's
    /// length, which may exceed `buf.len()`.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidLength`].
    pub fn package_to_path(&self, phandle: Phandle, buf: &mut [u8]) -> Result<usize> {
        self.to_path(c"package-to-path", phandle.as_raw(), buf)
    }

    /// Writes the full path of an open instance into `buf` and returns the
    /// path's length, which may exceed `buf.len()`.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidLength`].
    pub fn instance_to_path(&self, ihandle: Ihandle, buf: &mut [u8]) -> Result<usize> {
        self.to_path(c"instance-to-path", ihandle.as_raw(), buf)
    }

    fn to_path(&self, service: &'static CStr, handle: Cell, buf: &mut [u8]) -> Result<usize> {
        let rets = self.call(
            service,
            &[handle, ptr_cell(buf.as_mut_ptr()), buf.len()],
            1,
        )?;
        match rets.get(0) {
            INVALID_CELL => Err(Error::InvalidLength),
            len => Ok(len),
        }
    }
}

#[cfg(feature = "alloc")]
impl<E: EntryPoint> Client<E> {
    /// Reads property `name` into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// As [`get_property`](Self::get_property), plus
    /// [`Error::OutOfMemory`].
    pub fn get_property_vec(&self, phandle: Phandle, name: &CStr) -> Result<alloc::vec::Vec<u8>> {
        let len = self.get_property_length(phandle, name)?;
        let mut buf = crate::try_zeroed(len)?;
        let actual = self.get_property(phandle, name, &mut buf)?;
        buf.truncate(actual);
        Ok(buf)
    }

    /// Returns the full path of `phandle`.
    ///
    /// # Errors
    ///
    /// As [`package_to_path`](Self::package_to_path), plus
    /// [`Error::OutOfMemory`].
    pub fn package_path(&self, phandle: Phandle) -> Result<alloc::string::String> {
        self.owned_path(c"package-to-path", phandle.as_raw())
    }

    /// Returns the full path of an open instance.
    ///
    /// # Errors
    ///
    /// As [`instance_to_path`](Self::instance_to_path), plus
    /// [`Error::OutOfMemory`].
    pub fn instance_path(&self, ihandle: Ihandle) -> Result<alloc::string::String> {
        self.owned_path(c"instance-to-path", ihandle.as_raw())
    }

    fn owned_path(&self, service: &'static CStr, handle: Cell) -> Result<alloc::string::String> {
        let len = self.to_path(service, handle, &mut [])?;
        let mut buf = crate::try_zeroed(len)?;
        let actual = self.to_path(service, handle, &mut buf)?;
        buf.truncate(actual);
        Ok(alloc::string::String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Zero means "no such relation"; all-ones means the query itself failed.
fn relation(raw: Cell) -> Result<Option<Phandle>> {
    match raw {
        0 => Ok(None),
        INVALID_CELL => Err(Error::InvalidPhandle),
        raw => Ok(Some(Phandle::from_raw(raw))),
    }
}

/// Iterator over a node's property names, built on `nextprop`.
pub struct Properties<'c, E: EntryPoint> {
    client: &'c Client<E>,
    phandle: Phandle,
    prev: Option<PropName>,
    done: bool,
}

impl<E: EntryPoint> Iterator for Properties<'_, E> {
    type Item = Result<PropName>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let prev = self.prev.as_ref().map_or(c"", PropName::as_cstr);
        match self.client.next_property(self.phandle, prev) {
            Ok(Some(name)) => {
                self.prev = Some(name);
                Some(Ok(name))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over a node's children, built on `child` and `peer`.
///
/// Ends after the last sibling or after the first error.
pub struct Children<'c, E: EntryPoint> {
    client: &'c Client<E>,
    parent: Option<Phandle>,
    current: Option<Phandle>,
}

impl<E: EntryPoint> Iterator for Children<'_, E> {
    type Item = Result<Phandle>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match (self.parent.take(), self.current) {
            (Some(parent), _) => self.client.child(parent),
            (None, Some(node)) => self.client.peer(node),
            (None, None) => return None,
        };
        match step {
            Ok(next) => {
                self.current = next;
                next.map(Ok)
            }
            Err(e) => {
                self.current = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFirmware;

    fn board() -> (SimFirmware, Phandle, Phandle, Phandle) {
        let sim = SimFirmware::new();
        let cpus = sim.add_node(sim.root(), "cpus");
        let cpu0 = sim.add_node(cpus, "cpu@0");
        let cpu1 = sim.add_node(cpus, "cpu@1");
        sim.set_property(sim.root(), "model", b"IBM,test-board\0");
        sim.set_property(sim.root(), "#address-cells", &2u32.to_be_bytes());
        sim.set_property(cpu0, "device_type", b"cpu\0");
        (sim, cpus, cpu0, cpu1)
    }

    #[test]
    fn find_device_resolves_paths() {
        let (sim, _, cpu0, _) = board();
        let of = Client::new(&sim);
        assert_eq!(of.find_device(c"/cpus/cpu@0"), Ok(cpu0));
        assert_eq!(of.find_device(c"/"), Ok(sim.root()));
        assert_eq!(of.find_device(c"/nope"), Err(Error::InvalidPhandle));
    }

    #[test]
    fn get_property_reports_full_length_when_truncated() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        let mut buf = [0u8; 4];
        assert_eq!(of.get_property(sim.root(), c"model", &mut buf), Ok(15));
        assert_eq!(&buf, b"IBM,");
    }

    #[test]
    fn get_property_missing_is_invalid_length() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        let mut buf = [0u8; 8];
        assert_eq!(
            of.get_property(sim.root(), c"absent", &mut buf),
            Err(Error::InvalidLength)
        );
        assert_eq!(
            of.get_property_length(sim.root(), c"absent"),
            Err(Error::InvalidLength)
        );
    }

    #[test]
    fn get_property_frame_order() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        let mut buf = [0u8; 16];
        of.get_property(sim.root(), c"model", &mut buf).unwrap();
        let call = sim.calls().pop().unwrap();
        assert_eq!(call.service, "getprop");
        assert_eq!(call.args.len(), 4);
        assert_eq!(call.args[0], sim.root().as_raw());
        assert_eq!(call.args[2], buf.as_ptr() as Cell);
        assert_eq!(call.args[3], 16);
    }

    #[test]
    fn get_property_length_and_vec() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        assert_eq!(of.get_property_length(sim.root(), c"model"), Ok(15));
        assert_eq!(
            of.get_property_vec(sim.root(), c"model").unwrap(),
            b"IBM,test-board\0"
        );
    }

    #[test]
    fn property_iteration() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        let names: Vec<String> = of
            .properties(sim.root())
            .map(|p| p.unwrap().as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["model", "#address-cells"]);
    }

    #[test]
    fn next_property_feeds_back_previous_name() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        let first = of.next_property(sim.root(), c"").unwrap().unwrap();
        assert_eq!(first.as_bytes(), b"model");
        let second = of.next_property(sim.root(), first.as_cstr()).unwrap().unwrap();
        assert_eq!(second.as_bytes(), b"#address-cells");
        assert_eq!(of.next_property(sim.root(), second.as_cstr()), Ok(None));
        assert_eq!(
            of.next_property(sim.root(), c"bogus"),
            Err(Error::NoSuchProperty)
        );
    }

    #[test]
    fn set_property_requires_complete_write() {
        let (sim, _, cpu0, _) = board();
        let of = Client::new(&sim);
        assert_eq!(of.set_property(cpu0, c"status", b"okay\0"), Ok(()));
        assert_eq!(sim.property(cpu0, "status").unwrap(), b"okay\0");

        sim.limit_setprop(3);
        assert_eq!(
            of.set_property(cpu0, c"status", b"disabled\0"),
            Err(Error::ShortWrite {
                requested: 9,
                actual: 3
            })
        );
        assert_eq!(
            of.set_property(Phandle::from_raw(0x7), c"status", b"x"),
            Err(Error::InvalidLength)
        );
    }

    #[test]
    fn child_and_peer_use_zero_for_none() {
        let (sim, cpus, cpu0, cpu1) = board();
        let of = Client::new(&sim);
        assert_eq!(of.child(sim.root()), Ok(Some(cpus)));
        assert_eq!(of.child(cpu0), Ok(None));
        assert_eq!(of.peer(cpu0), Ok(Some(cpu1)));
        assert_eq!(of.peer(cpu1), Ok(None));
        assert_eq!(of.parent(cpu1), Ok(cpus));
        assert_eq!(of.parent(sim.root()), Ok(Phandle::from_raw(0)));
    }

    #[test]
    fn unknown_node_relations_are_invalid() {
        let (sim, ..) = board();
        let of = Client::new(&sim);
        let bogus = Phandle::from_raw(0x7);
        assert_eq!(of.child(bogus), Err(Error::InvalidPhandle));
        assert_eq!(of.peer(bogus), Err(Error::InvalidPhandle));
        assert_eq!(of.parent(bogus), Err(Error::InvalidPhandle));

        let kids: Vec<_> = of.children(bogus).collect();
        assert_eq!(kids, [Err(Error::InvalidPhandle)]);
    }

    /// Accepts every frame and writes nothing back.
    struct Silent;

    unsafe impl EntryPoint for Silent {
        unsafe fn call(&self, _frame: *mut Cell) -> isize {
            0
        }
    }

    #[test]
    fn unwritten_results_read_as_failure() {
        let of = Client::new(Silent);
        let node = Phandle::from_raw(0x10);
        assert_eq!(of.child(node), Err(Error::InvalidPhandle));
        assert_eq!(of.parent(node), Err(Error::InvalidPhandle));
        assert_eq!(of.get_property_length(node, c"reg"), Err(Error::InvalidLength));
        assert_eq!(of.next_property(node, c""), Err(Error::NoSuchProperty));
        assert_eq!(of.children(node).count(), 1);
        assert_eq!(of.properties(node).count(), 1);
    }

    #[test]
    fn children_iteration() {
        let (sim, cpus, cpu0, cpu1) = board();
        let of = Client::new(&sim);
        let kids: Vec<Phandle> = of.children(cpus).map(Result::unwrap).collect();
        assert_eq!(kids, [cpu0, cpu1]);
        assert_eq!(of.children(cpu0).count(), 0);
    }

    #[test]
    fn paths_round_trip_through_instances() {
        let (sim, _, cpu0, _) = board();
        let of = Client::new(&sim);
        let mut buf = [0u8; 64];
        let len = of.package_to_path(cpu0, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"/cpus/cpu@0");
        assert_eq!(of.package_path(cpu0).unwrap(), "/cpus/cpu@0");

        let mut short = [0u8; 4];
        assert_eq!(of.package_to_path(cpu0, &mut short), Ok(11));
        assert_eq!(&short, b"/cpu");

        let ih = of.open(c"/cpus/cpu@0").unwrap();
        assert_eq!(of.instance_to_package(ih), Ok(cpu0));
        assert_eq!(of.instance_path(ih).unwrap(), "/cpus/cpu@0");
        assert_eq!(
            of.instance_to_package(Ihandle::from_raw(0x42)),
            Err(Error::InvalidPhandle)
        );
    }

    #[test]
    fn transport_failure_never_reads_scribbled_returns() {
        let (sim, ..) = board();
        let of = Client::new(&sim);

        sim.fail_transport(c"finddevice");
        assert!(of.find_device(c"/cpus").unwrap_err().is_transport());

        sim.fail_transport(c"getprop");
        let mut buf = [0u8; 4];
        assert!(of.get_property(sim.root(), c"model", &mut buf).unwrap_err().is_transport());

        sim.fail_transport(c"setprop");
        assert!(of.set_property(sim.root(), c"x", b"y").unwrap_err().is_transport());

        sim.fail_transport(c"child");
        assert!(of.child(sim.root()).unwrap_err().is_transport());

        sim.fail_transport(c"nextprop");
        let mut props = of.properties(sim.root());
        assert!(props.next().unwrap().unwrap_err().is_transport());
        assert!(props.next().is_none());
    }

    fn rejected(service: &'static CStr) -> Error {
        Error::Transport { service }
    }

    #[test]
    fn transport_failures_on_every_tree_service() {
        let (sim, cpus, cpu0, _) = board();
        let of = Client::new(&sim);
        let ih = of.open(c"/cpus/cpu@0").unwrap();
        let mut buf = [0u8; 32];

        sim.fail_transport(c"getproplen");
        assert_eq!(of.get_property_length(sim.root(), c"model"), Err(rejected(c"getproplen")));
        sim.fail_transport(c"getproplen");
        assert_eq!(of.get_property_vec(sim.root(), c"model"), Err(rejected(c"getproplen")));

        sim.fail_transport(c"parent");
        assert_eq!(of.parent(cpu0), Err(rejected(c"parent")));
        sim.fail_transport(c"peer");
        assert_eq!(of.peer(cpu0), Err(rejected(c"peer")));

        sim.fail_transport(c"peer");
        let mut kids = of.children(cpus);
        assert_eq!(kids.next(), Some(Ok(cpu0)));
        assert_eq!(kids.next(), Some(Err(rejected(c"peer"))));
        assert_eq!(kids.next(), None);

        sim.fail_transport(c"instance-to-package");
        assert_eq!(of.instance_to_package(ih), Err(rejected(c"instance-to-package")));

        sim.fail_transport(c"package-to-path");
        assert_eq!(of.package_to_path(cpu0, &mut buf), Err(rejected(c"package-to-path")));
        sim.fail_transport(c"package-to-path");
        assert_eq!(of.package_path(cpu0), Err(rejected(c"package-to-path")));

        sim.fail_transport(c"instance-to-path");
        assert_eq!(of.instance_to_path(ih, &mut buf), Err(rejected(c"instance-to-path")));
        sim.fail_transport(c"instance-to-path");
        assert_eq!(of.instance_path(ih), Err(rejected(c"instance-to-path")));

        // Nothing was written into the caller's buffer.
        assert_eq!(buf, [0; 32]);
    }
}
