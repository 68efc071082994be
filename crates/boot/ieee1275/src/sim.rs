//! A simulated firmware for exercising the client interface off target.
//!
//! [`SimFirmware`] implements [`EntryPoint`] by decoding real call frames
//! out of memory, exactly as a firmware would: it follows the service-name
//! pointer, honours the declared argument and return counts and writes
//! into caller buffers only up to the lengths passed with them.
//!
//! It models a small device tree, open instances over per-node contents, a
//! first-fit physical memory pool, per-node methods, a millisecond clock and
//! the Forth interpreter's catch results. Every call is recorded so tests
//! can assert on the exact cells a wrapper produced.

use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::ffi::{CStr, c_char};

use crate::client::{EntryPoint, TRANSPORT_FAILED};
use crate::{Cell, Ihandle, Phandle};

/// Catch result of a method that does not exist (Forth `-13`, undefined word).
pub const THROW_UNDEFINED: Cell = (-13isize) as Cell;

/// Value written into every return cell of a frame whose transport is
/// failed on purpose. It passes every sentinel check, so a wrapper that
/// reads it anyway reports success.
pub const SCRIBBLE: Cell = 0x5a5a;

const INVALID: Cell = Cell::MAX;

/// Outcome of a simulated method: return cells, or a nonzero throw code.
pub type MethodResult = core::result::Result<Vec<Cell>, Cell>;

type Method = Rc<dyn Fn(&[Cell]) -> MethodResult>;

/// A call the simulated firmware received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Service name.
    pub service: String,
    /// Argument cells in frame order.
    pub args: Vec<Cell>,
}

struct Node {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    props: Vec<(String, Vec<u8>)>,
    methods: BTreeMap<String, Method>,
    contents: Vec<u8>,
}

struct Instance {
    node: usize,
    position: u64,
}

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    instances: BTreeMap<Cell, Instance>,
    next_ihandle: Cell,
    free: Vec<(Cell, Cell)>,
    clock: u32,
    rejects: Vec<String>,
    setprop_limit: Option<usize>,
    interpret_results: BTreeMap<String, Cell>,
    interpreted: Vec<String>,
    calls: Vec<Call>,
}

/// Simulated IEEE 1275 firmware.
pub struct SimFirmware {
    state: RefCell<State>,
}

impl Default for SimFirmware {
    fn default() -> Self {
        Self::new()
    }
}

fn phandle_of(index: usize) -> Cell {
    (index + 1) << 4
}

fn index_of(phandle: Cell) -> Option<usize> {
    (phandle != 0 && phandle & 0xf == 0).then(|| (phandle >> 4) - 1)
}

/// # Safety
///
/// `cell` must hold the address of a NUL-terminated string.
unsafe fn c_str<'a>(cell: Cell) -> &'a str {
    // SAFETY: guaranteed by the caller.
    let s = unsafe { CStr::from_ptr(cell as *const c_char) };
    s.to_str().unwrap_or("")
}

/// # Safety
///
/// `ptr` must address `len` readable bytes.
unsafe fn bytes<'a>(ptr: Cell, len: Cell) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { core::slice::from_raw_parts(ptr as *const u8, len) }
}

/// # Safety
///
/// `ptr` must address `len` writable bytes.
unsafe fn bytes_mut<'a>(ptr: Cell, len: Cell) -> &'a mut [u8] {
    if len == 0 {
        return &mut [];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) }
}

/// Copies as much of `src` as fits and returns the full source length.
fn copy_out(src: &[u8], dst: &mut [u8]) -> Cell {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    src.len()
}

impl SimFirmware {
    /// Creates a firmware with only the root node and no free memory.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            props: Vec::new(),
            methods: BTreeMap::new(),
            contents: Vec::new(),
        };
        Self {
            state: RefCell::new(State {
                nodes: alloc::vec![root],
                next_ihandle: 0x8000,
                clock: 1000,
                ..State::default()
            }),
        }
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> Phandle {
        Phandle::from_raw(phandle_of(0))
    }

    /// Adds a child named `name` under `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a node of this firmware.
    pub fn add_node(&self, parent: Phandle, name: &str) -> Phandle {
        let mut st = self.state.borrow_mut();
        let parent = st.node_index(parent.as_raw()).expect("unknown parent");
        let index = st.nodes.len();
        st.nodes.push(Node {
            name: name.to_owned(),
            parent: Some(parent),
            children: Vec::new(),
            props: Vec::new(),
            methods: BTreeMap::new(),
            contents: Vec::new(),
        });
        st.nodes[parent].children.push(index);
        Phandle::from_raw(phandle_of(index))
    }

    /// Creates or replaces a property.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of this firmware.
    pub fn set_property(&self, node: Phandle, name: &str, value: &[u8]) {
        let mut st = self.state.borrow_mut();
        let index = st.node_index(node.as_raw()).expect("unknown node");
        st.store_property(index, name, value);
    }

    /// Returns a property's current value.
    #[must_use]
    pub fn property(&self, node: Phandle, name: &str) -> Option<Vec<u8>> {
        let st = self.state.borrow();
        let index = st.node_index(node.as_raw())?;
        st.find_property(index, name).map(<[u8]>::to_vec)
    }

    /// Sets the data `read`, `write` and `seek` operate on for every
    /// instance of `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of this firmware.
    pub fn set_contents(&self, node: Phandle, contents: &[u8]) {
        let mut st = self.state.borrow_mut();
        let index = st.node_index(node.as_raw()).expect("unknown node");
        st.nodes[index].contents = contents.to_vec();
    }

    /// Returns the data behind `node`'s instances.
    #[must_use]
    pub fn contents(&self, node: Phandle) -> Vec<u8> {
        let st = self.state.borrow();
        st.node_index(node.as_raw())
            .map(|i| st.nodes[i].contents.clone())
            .unwrap_or_default()
    }

    /// Registers a method callable on instances of `node`.
    ///
    /// The handler receives the stack arguments in frame order (everything
    /// after the method name and ihandle).
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of this firmware.
    pub fn add_method(
        &self,
        node: Phandle,
        name: &str,
        handler: impl Fn(&[Cell]) -> MethodResult + 'static,
    ) {
        let mut st = self.state.borrow_mut();
        let index = st.node_index(node.as_raw()).expect("unknown node");
        let handler: Box<dyn Fn(&[Cell]) -> MethodResult> = Box::new(handler);
        st.nodes[index].methods.insert(name.to_owned(), Rc::from(handler));
    }

    /// Returns `size` bytes at `base` to the free pool.
    pub fn add_free_memory(&self, base: Cell, size: Cell) {
        self.state.borrow_mut().release(base, size);
    }

    /// The free pool as `(start, end)` ranges.
    #[must_use]
    pub fn free_memory(&self) -> Vec<(Cell, Cell)> {
        self.state.borrow().free.clone()
    }

    /// Makes the next call to `service` fail at the transport level.
    pub fn fail_transport(&self, service: &CStr) {
        let name = service.to_str().unwrap_or("").to_owned();
        self.state.borrow_mut().rejects.push(name);
    }

    /// Caps how many bytes `setprop` stores.
    pub fn limit_setprop(&self, limit: usize) {
        self.state.borrow_mut().setprop_limit = Some(limit);
    }

    /// Sets the catch result `interpret` reports for `command`.
    pub fn set_interpret_result(&self, command: &CStr, catch: Cell) {
        let name = command.to_str().unwrap_or("").to_owned();
        self.state.borrow_mut().interpret_results.insert(name, catch);
    }

    /// Command lines passed to `interpret`, oldest first.
    #[must_use]
    pub fn interpreted(&self) -> Vec<String> {
        self.state.borrow().interpreted.clone()
    }

    /// Every call received, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Returns `true` if `ihandle` names an open instance.
    #[must_use]
    pub fn is_open(&self, ihandle: Ihandle) -> bool {
        self.state.borrow().instances.contains_key(&ihandle.as_raw())
    }

    /// Current position of an open instance.
    #[must_use]
    pub fn position(&self, ihandle: Ihandle) -> Option<u64> {
        let st = self.state.borrow();
        st.instances.get(&ihandle.as_raw()).map(|i| i.position)
    }
}

impl State {
    fn node_index(&self, phandle: Cell) -> Option<usize> {
        index_of(phandle).filter(|&i| i < self.nodes.len())
    }

    fn find_property(&self, node: usize, name: &str) -> Option<&[u8]> {
        self.nodes[node]
            .props
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    fn store_property(&mut self, node: usize, name: &str, value: &[u8]) {
        let props = &mut self.nodes[node].props;
        match props.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_vec(),
            None => props.push((name.to_owned(), value.to_vec())),
        }
    }

    fn resolve(&self, path: &str) -> Option<usize> {
        if !path.starts_with('/') {
            return None;
        }
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(0, |node, component| {
                self.nodes[node]
                    .children
                    .iter()
                    .copied()
                    .find(|&c| self.nodes[c].name == component)
            })
    }

    fn path(&self, node: usize) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(node);
        while let Some(i) = cur {
            if self.nodes[i].parent.is_some() {
                parts.push(self.nodes[i].name.as_str());
            }
            cur = self.nodes[i].parent;
        }
        if parts.is_empty() {
            return "/".to_owned();
        }
        parts.iter().rev().fold(String::new(), |mut acc, p| {
            acc.push('/');
            acc.push_str(p);
            acc
        })
    }

    fn sibling_after(&self, node: usize) -> Option<usize> {
        let parent = self.nodes[node].parent?;
        let siblings = &self.nodes[parent].children;
        let at = siblings.iter().position(|&c| c == node)?;
        siblings.get(at + 1).copied()
    }

    fn instance_node(&self, ihandle: Cell) -> Option<usize> {
        self.instances.get(&ihandle).map(|i| i.node)
    }

    fn claim(&mut self, hint: Cell, size: Cell, align: Cell) -> Cell {
        if size == 0 || (align != 0 && !align.is_power_of_two()) {
            return INVALID;
        }
        let fit = self.free.iter().enumerate().find_map(|(i, &(start, end))| {
            let base = if align == 0 {
                hint
            } else {
                start.checked_add(align - 1)? & !(align - 1)
            };
            let top = base.checked_add(size)?;
            (base >= start && top <= end).then_some((i, base, top))
        });
        let Some((i, base, top)) = fit else {
            return INVALID;
        };
        let (start, end) = self.free.remove(i);
        if top < end {
            self.free.insert(i, (top, end));
        }
        if start < base {
            self.free.insert(i, (start, base));
        }
        base
    }

    fn release(&mut self, base: Cell, size: Cell) {
        let end = base.saturating_add(size);
        self.free.push((base, end));
        self.free.sort_unstable();
        let mut merged: Vec<(Cell, Cell)> = Vec::with_capacity(self.free.len());
        for &(s, e) in &self.free {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.free = merged;
    }

    /// Looks up the handler a `call-method` frame names.
    ///
    /// # Safety
    ///
    /// Argument 0 must be a method name string.
    unsafe fn method(&self, args: &[Cell]) -> Option<Method> {
        let node = self.instance_node(args[1])?;
        // SAFETY: guaranteed by the caller.
        let name = unsafe { c_str(args[0]) };
        self.nodes[node].methods.get(name).cloned()
    }

    /// Services one frame. Returns `false` for an unknown service.
    ///
    /// # Safety
    ///
    /// Pointer-carrying argument cells must be valid for their service.
    #[allow(clippy::too_many_lines)]
    unsafe fn dispatch(&mut self, service: &str, args: &[Cell], rets: &mut [Cell]) -> bool {
        match service {
            "finddevice" => {
                // SAFETY: argument 0 is a path string.
                let path = unsafe { c_str(args[0]) };
                rets[0] = self.resolve(path).map_or(INVALID, phandle_of);
            }
            "getprop" => {
                rets[0] = match self.node_index(args[0]) {
                    // SAFETY: name string, then a buffer of `args[3]` bytes.
                    Some(node) => match self.find_property(node, unsafe { c_str(args[1]) }) {
                        Some(value) => copy_out(value, unsafe { bytes_mut(args[2], args[3]) }),
                        None => INVALID,
                    },
                    None => INVALID,
                };
            }
            "getproplen" => {
                rets[0] = self
                    .node_index(args[0])
                    // SAFETY: argument 1 is a property name.
                    .and_then(|node| self.find_property(node, unsafe { c_str(args[1]) }))
                    .map_or(INVALID, <[u8]>::len);
            }
            "nextprop" => {
                let Some(node) = self.node_index(args[0]) else {
                    rets[0] = INVALID;
                    return true;
                };
                // SAFETY: previous name string.
                let prev = unsafe { c_str(args[1]) };
                let props = &self.nodes[node].props;
                let next = if prev.is_empty() {
                    Some(0)
                } else {
                    props.iter().position(|(n, _)| n == prev).map(|i| i + 1)
                };
                rets[0] = match next {
                    None => INVALID,
                    Some(i) if i >= props.len() => 0,
                    Some(i) => {
                        // SAFETY: 1275 requires a 32-byte name buffer.
                        let buf = unsafe { bytes_mut(args[2], 32) };
                        let name = props[i].0.as_bytes();
                        let n = name.len().min(31);
                        buf[..n].copy_from_slice(&name[..n]);
                        buf[n] = 0;
                        1
                    }
                };
            }
            "setprop" => {
                rets[0] = match self.node_index(args[0]) {
                    Some(node) => {
                        // SAFETY: name string, then `args[3]` readable bytes.
                        let name = unsafe { c_str(args[1]) }.to_owned();
                        let value = unsafe { bytes(args[2], args[3]) };
                        let n = self.setprop_limit.map_or(value.len(), |l| l.min(value.len()));
                        self.store_property(node, &name, &value[..n]);
                        n
                    }
                    None => INVALID,
                };
            }
            "parent" => {
                rets[0] = match self.node_index(args[0]) {
                    Some(node) => self.nodes[node].parent.map_or(0, phandle_of),
                    None => INVALID,
                };
            }
            "child" => {
                rets[0] = match self.node_index(args[0]) {
                    Some(node) => self.nodes[node].children.first().map_or(0, |&c| phandle_of(c)),
                    None => INVALID,
                };
            }
            "peer" => {
                rets[0] = match args[0] {
                    0 => phandle_of(0),
                    ph => match self.node_index(ph) {
                        Some(node) => self.sibling_after(node).map_or(0, phandle_of),
                        None => INVALID,
                    },
                };
            }
            "instance-to-package" => {
                rets[0] = self.instance_node(args[0]).map_or(INVALID, phandle_of);
            }
            "package-to-path" | "instance-to-path" => {
                let node = if service == "package-to-path" {
                    self.node_index(args[0])
                } else {
                    self.instance_node(args[0])
                };
                rets[0] = match node {
                    Some(node) => {
                        let path = self.path(node);
                        // SAFETY: buffer of `args[2]` bytes.
                        copy_out(path.as_bytes(), unsafe { bytes_mut(args[1], args[2]) })
                    }
                    None => INVALID,
                };
            }
            "open" => {
                // SAFETY: argument 0 is a path string.
                rets[0] = match self.resolve(unsafe { c_str(args[0]) }) {
                    Some(node) => {
                        let ihandle = self.next_ihandle;
                        self.next_ihandle += 0x10;
                        self.instances.insert(ihandle, Instance { node, position: 0 });
                        ihandle
                    }
                    None => 0,
                };
            }
            "close" => {
                self.instances.remove(&args[0]);
            }
            "read" | "write" => {
                let Some(inst) = self.instances.get_mut(&args[0]) else {
                    rets[0] = INVALID;
                    return true;
                };
                let data = &mut self.nodes[inst.node].contents;
                let at = usize::try_from(inst.position).unwrap_or(usize::MAX);
                let n = if service == "read" {
                    let avail = data.get(at..).unwrap_or(&[]);
                    // SAFETY: buffer of `args[2]` bytes.
                    let dst = unsafe { bytes_mut(args[1], args[2]) };
                    let n = avail.len().min(dst.len());
                    dst[..n].copy_from_slice(&avail[..n]);
                    n
                } else {
                    // SAFETY: buffer of `args[2]` bytes.
                    let src = unsafe { bytes(args[1], args[2]) };
                    if data.len() < at + src.len() {
                        data.resize(at + src.len(), 0);
                    }
                    data[at..at + src.len()].copy_from_slice(src);
                    src.len()
                };
                inst.position += n as u64;
                rets[0] = n;
            }
            "seek" => {
                let Some(inst) = self.instances.get_mut(&args[0]) else {
                    rets[0] = INVALID;
                    return true;
                };
                let high = (args[1] as u64).checked_shl(Cell::BITS).unwrap_or(0);
                let position = high | args[2] as u64;
                let len = self.nodes[inst.node].contents.len() as u64;
                rets[0] = if position <= len {
                    inst.position = position;
                    0
                } else {
                    INVALID
                };
            }
            "claim" => rets[0] = self.claim(args[0], args[1], args[2]),
            "release" => self.release(args[0], args[1]),
            "interpret" => {
                // SAFETY: argument 0 is a command string.
                let command = unsafe { c_str(args[0]) }.to_owned();
                rets[0] = self.interpret_results.get(&command).copied().unwrap_or(0);
                self.interpreted.push(command);
            }
            "milliseconds" => {
                self.clock += 1;
                rets[0] = self.clock as Cell;
            }
            "enter" | "exit" => {}
            _ => return false,
        }
        true
    }
}

unsafe impl EntryPoint for SimFirmware {
    unsafe fn call(&self, frame: *mut Cell) -> isize {
        // SAFETY: the caller hands over a live frame; its header says how
        // many cells follow.
        let (service, nargs, cells) = unsafe {
            let [name, nargs, nrets] = *frame.cast::<[Cell; 3]>();
            let cells = core::slice::from_raw_parts_mut(frame.add(3), nargs + nrets);
            (c_str(name).to_owned(), nargs, cells)
        };
        let (args, rets) = cells.split_at_mut(nargs);

        let mut st = self.state.borrow_mut();
        st.calls.push(Call {
            service: service.clone(),
            args: args.to_vec(),
        });

        if let Some(i) = st.rejects.iter().position(|s| *s == service) {
            st.rejects.remove(i);
            rets.fill(SCRIBBLE);
            return TRANSPORT_FAILED;
        }

        if service == "call-method" {
            // SAFETY: argument 0 of call-method is the method name.
            let method = unsafe { st.method(args) };
            // Handlers may call back into the simulator.
            drop(st);
            let outcome = match method {
                Some(m) => m(&args[2..]),
                None => Err(THROW_UNDEFINED),
            };
            match outcome {
                Ok(values) => {
                    rets[0] = 0;
                    for (slot, v) in rets[1..].iter_mut().zip(values) {
                        *slot = v;
                    }
                }
                Err(code) => rets[0] = code,
            }
            return 0;
        }

        // SAFETY: wrappers pass valid pointers for each service.
        if unsafe { st.dispatch(&service, args, rets) } {
            0
        } else {
            TRANSPORT_FAILED
        }
    }
}
