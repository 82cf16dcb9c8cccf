//! Interface objects shared by the datapath and the control plane.
//!
//! - `PhysicalInterface`: the tagged uplink, as resolved from the host
//! - `VirtualInterface`: one software interface per switch port
//! - `Device`: either of the two, behind a common set of capabilities

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VnicError};
use crate::host::{Host, ReportHandle};
use crate::tag::TagScheme;

/// Host interface index.
///
/// Opaque and unbounded: only ever used as a map key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IfIndex(pub u32);

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if#{}", self.0)
    }
}

/// Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = VnicError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(VnicError::InvalidName(format!("invalid MAC address: {s}")));
        }

        let mut mac = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(VnicError::InvalidName(format!("invalid MAC address: {s}")));
            }
            mac[i] = u8::from_str_radix(part, 16)
                .map_err(|_| VnicError::InvalidName(format!("invalid MAC address: {s}")))?;
        }
        Ok(MacAddr(mac))
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl TryFrom<String> for MacAddr {
    type Error = VnicError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A physical interface as resolved from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalInterface {
    pub index: IfIndex,
    pub name: String,
    pub mac: MacAddr,
}

/// Per-interface traffic counters.
///
/// Updated from the datapath with relaxed atomics; readers get a
/// point-in-time [`StatsSnapshot`].
#[derive(Debug, Default)]
pub struct DeviceStats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_errors: AtomicU64,
}

impl DeviceStats {
    pub(crate) fn record_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rx_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DeviceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
}

/// A virtual interface bound to one switch port.
///
/// The owning physical interface and the port never change after creation.
/// Handles are shared as `Arc<VirtualInterface>`; the object is released when
/// the registry, the manager and every in-flight reader have dropped theirs.
#[derive(Debug)]
pub struct VirtualInterface {
    name: String,
    index: IfIndex,
    physical: IfIndex,
    physical_name: String,
    port: u16,
    scheme: TagScheme,
    mac: RwLock<MacAddr>,
    up: AtomicBool,
    stats: DeviceStats,
    report: Mutex<Option<ReportHandle>>,
}

impl VirtualInterface {
    /// Create a virtual interface registered under `index`, inheriting the
    /// hardware address of `physical`.
    pub fn new(
        name: impl Into<String>,
        index: IfIndex,
        physical: &PhysicalInterface,
        port: u16,
        scheme: TagScheme,
    ) -> Self {
        VirtualInterface {
            name: name.into(),
            index,
            physical: physical.index,
            physical_name: physical.name.clone(),
            port,
            scheme,
            mac: RwLock::new(physical.mac),
            up: AtomicBool::new(false),
            stats: DeviceStats::default(),
            report: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index assigned by the host on registration.
    pub fn index(&self) -> IfIndex {
        self.index
    }

    /// Owning physical interface.
    pub fn physical(&self) -> IfIndex {
        self.physical
    }

    pub fn physical_name(&self) -> &str {
        &self.physical_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> TagScheme {
        self.scheme
    }

    pub fn mac(&self) -> MacAddr {
        *self.mac.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub(crate) fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }

    /// Change the hardware address. Only allowed while the interface is down.
    pub(crate) fn set_mac(&self, mac: MacAddr) -> Result<()> {
        if self.is_up() {
            return Err(VnicError::Busy(self.name.clone()));
        }
        *self.mac.write().unwrap_or_else(PoisonError::into_inner) = mac;
        Ok(())
    }

    pub(crate) fn set_report_handle(&self, handle: Option<ReportHandle>) {
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    pub(crate) fn take_report_handle(&self) -> Option<ReportHandle> {
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Either kind of interface, behind the capabilities both share.
///
/// Frames transmitted on a `Physical` device pass straight through to the
/// host; frames on a `Virtual` device go through the remultiplexer
/// (see [`Datapath::transmit_on`](crate::datapath::Datapath::transmit_on)).
#[derive(Debug, Clone)]
pub enum Device {
    Physical(PhysicalInterface),
    Virtual(std::sync::Arc<VirtualInterface>),
}

impl Device {
    pub fn name(&self) -> &str {
        match self {
            Device::Physical(phys) => &phys.name,
            Device::Virtual(vif) => vif.name(),
        }
    }

    pub fn index(&self) -> IfIndex {
        match self {
            Device::Physical(phys) => phys.index,
            Device::Virtual(vif) => vif.index(),
        }
    }

    pub fn mac(&self) -> MacAddr {
        match self {
            Device::Physical(phys) => phys.mac,
            Device::Virtual(vif) => vif.mac(),
        }
    }

    /// Physical link state comes from the host; virtual interfaces track
    /// their own administrative state.
    pub fn is_up<H: Host + ?Sized>(&self, host: &H) -> bool {
        match self {
            Device::Physical(phys) => host.is_up(phys.index),
            Device::Virtual(vif) => vif.is_up(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Device::Virtual(_))
    }
}
