//! Test utilities
//!
//! An in-memory [`Host`] with failure injection, and builders for tagged
//! frames. Used by the unit tests and the integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use smoltcp::wire::EthernetAddress;

use crate::device::{IfIndex, MacAddr, PhysicalInterface};
use crate::frame::Frame;
use crate::host::{Host, HostError, ReportHandle};
use crate::tag::{TagScheme, build_tagged};

/// First index handed out to registered interfaces.
pub const FIRST_VIRTUAL_INDEX: u32 = 100;

/// Build a Broadcom-tagged frame.
pub fn tagged_frame(dst: [u8; 6], src: [u8; 6], port: u8, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    build_tagged(
        TagScheme::Broadcom,
        EthernetAddress(dst),
        EthernetAddress(src),
        port,
        ethertype,
        payload,
    )
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub name: String,
    pub mac: MacAddr,
    pub up: bool,
}

#[derive(Default)]
struct State {
    physicals: HashMap<String, PhysicalInterface>,
    link_down: Vec<IfIndex>,
    registered: HashMap<IfIndex, Registered>,
    reports: HashMap<ReportHandle, String>,
    enrolled: Vec<IfIndex>,
    delivered: Vec<Frame>,
    transmitted: Vec<(IfIndex, Frame)>,
}

/// In-memory host networking stack.
#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<State>,
    next_index: AtomicU32,
    next_report: AtomicU64,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
    fail_report: AtomicBool,
    fail_transmit: AtomicBool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            next_index: AtomicU32::new(FIRST_VIRTUAL_INDEX),
            ..Default::default()
        }
    }

    /// Host with a single physical interface `eth0` (index 2).
    pub fn with_eth0() -> Self {
        let host = Self::new();
        host.add_physical("eth0", 2, MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
        host
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_physical(&self, name: &str, index: u32, mac: MacAddr) -> PhysicalInterface {
        let phys = PhysicalInterface {
            index: IfIndex(index),
            name: name.to_string(),
            mac,
        };
        self.state().physicals.insert(name.to_string(), phys.clone());
        phys
    }

    pub fn set_physical_up(&self, index: IfIndex, up: bool) {
        let mut state = self.state();
        state.link_down.retain(|i| *i != index);
        if !up {
            state.link_down.push(index);
        }
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    pub fn fail_report(&self, fail: bool) {
        self.fail_report.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transmit(&self, fail: bool) {
        self.fail_transmit.store(fail, Ordering::SeqCst);
    }

    /// Interfaces currently registered, keyed by index.
    pub fn registered(&self) -> HashMap<IfIndex, Registered> {
        self.state().registered.clone()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .state()
            .registered
            .values()
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn report_entries(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().reports.values().cloned().collect();
        names.sort();
        names
    }

    pub fn enrolled(&self) -> Vec<IfIndex> {
        self.state().enrolled.clone()
    }

    pub fn delivered(&self) -> Vec<Frame> {
        self.state().delivered.clone()
    }

    pub fn transmitted(&self) -> Vec<(IfIndex, Frame)> {
        self.state().transmitted.clone()
    }
}

impl Host for MemoryHost {
    fn resolve(&self, name: &str) -> Option<PhysicalInterface> {
        self.state().physicals.get(name).cloned()
    }

    fn is_up(&self, index: IfIndex) -> bool {
        !self.state().link_down.contains(&index)
    }

    fn register(&self, name: &str, mac: MacAddr) -> Result<IfIndex, HostError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(HostError::Other(format!("registration of {name} refused")));
        }

        let mut state = self.state();
        let taken = state.physicals.contains_key(name)
            || state.registered.values().any(|r| r.name == name);
        if taken {
            return Err(HostError::NameInUse(name.to_string()));
        }

        let index = IfIndex(self.next_index.fetch_add(1, Ordering::SeqCst));
        state.registered.insert(
            index,
            Registered {
                name: name.to_string(),
                mac,
                up: false,
            },
        );
        Ok(index)
    }

    fn unregister(&self, index: IfIndex) -> Result<(), HostError> {
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(HostError::Other(format!("cannot unregister {index}")));
        }
        self.state()
            .registered
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| HostError::NoSuchInterface(index.to_string()))
    }

    fn set_link_state(&self, index: IfIndex, up: bool) -> Result<(), HostError> {
        let mut state = self.state();
        let entry = state
            .registered
            .get_mut(&index)
            .ok_or_else(|| HostError::NoSuchInterface(index.to_string()))?;
        entry.up = up;
        Ok(())
    }

    fn set_mac_address(&self, index: IfIndex, mac: MacAddr) -> Result<(), HostError> {
        let mut state = self.state();
        let entry = state
            .registered
            .get_mut(&index)
            .ok_or_else(|| HostError::NoSuchInterface(index.to_string()))?;
        entry.mac = mac;
        Ok(())
    }

    fn add_report_entry(&self, name: &str) -> Result<Option<ReportHandle>, HostError> {
        if self.fail_report.load(Ordering::SeqCst) {
            return Err(HostError::Other("reporting surface unavailable".to_string()));
        }
        let handle = ReportHandle(self.next_report.fetch_add(1, Ordering::SeqCst));
        self.state().reports.insert(handle, name.to_string());
        Ok(Some(handle))
    }

    fn remove_report_entry(&self, handle: ReportHandle) {
        self.state().reports.remove(&handle);
    }

    fn enroll(&self, physical: &PhysicalInterface, _scheme: TagScheme) -> Result<(), HostError> {
        let mut state = self.state();
        if !state.enrolled.contains(&physical.index) {
            state.enrolled.push(physical.index);
        }
        Ok(())
    }

    fn withdraw(&self, index: IfIndex) {
        self.state().enrolled.retain(|i| *i != index);
    }

    fn deliver(&self, frame: Frame) {
        self.state().delivered.push(frame);
    }

    fn transmit(&self, index: IfIndex, frame: Frame) -> Result<(), HostError> {
        if self.fail_transmit.load(Ordering::SeqCst) {
            return Err(HostError::Io(std::io::Error::from(
                std::io::ErrorKind::WouldBlock,
            )));
        }
        self.state().transmitted.push((index, frame));
        Ok(())
    }
}
