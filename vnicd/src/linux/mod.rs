//! Linux host
//!
//! - Virtual interfaces are TAP devices: writing a frame to the TAP hands it
//!   to the kernel as if received on that interface, and frames the kernel
//!   sends on it are read back and remultiplexed.
//! - Physical interfaces are enrolled with an `AF_PACKET` socket bound to the
//!   scheme's tag EtherType.
//!
//! Both maps are published through `ArcSwap` so the reactor thread never
//! waits for the control plane.

pub mod ifreq;
pub mod packet;
pub mod reactor;
pub mod tap;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, info, trace, warn};

use crate::device::{IfIndex, MacAddr, PhysicalInterface};
use crate::frame::Frame;
use crate::host::{Host, HostError};
use crate::tag::TagScheme;

pub use packet::PacketSocket;
pub use reactor::{ReactorConfig, ReactorHandle};
pub use tap::TapDevice;

pub struct LinuxHost {
    uplinks: ArcSwap<HashMap<IfIndex, Arc<PacketSocket>>>,
    taps: ArcSwap<HashMap<IfIndex, Arc<TapDevice>>>,
    /// Serializes writers of the two maps
    update: Mutex<()>,
}

impl LinuxHost {
    pub fn new() -> Self {
        Self {
            uplinks: ArcSwap::from_pointee(HashMap::new()),
            taps: ArcSwap::from_pointee(HashMap::new()),
            update: Mutex::new(()),
        }
    }

    /// Enrolled physical interfaces.
    pub fn uplinks(&self) -> Vec<Arc<PacketSocket>> {
        self.uplinks.load().values().cloned().collect()
    }

    /// Live TAP devices.
    pub fn taps(&self) -> Vec<Arc<TapDevice>> {
        self.taps.load().values().cloned().collect()
    }

    fn tap(&self, index: IfIndex) -> Result<Arc<TapDevice>, HostError> {
        self.taps
            .load()
            .get(&index)
            .cloned()
            .ok_or_else(|| HostError::NoSuchInterface(index.to_string()))
    }

    fn edit<T>(map: &ArcSwap<HashMap<IfIndex, T>>, f: impl FnOnce(&mut HashMap<IfIndex, T>))
    where
        T: Clone,
    {
        let mut next = (**map.load()).clone();
        f(&mut next);
        map.store(Arc::new(next));
    }
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for LinuxHost {
    fn resolve(&self, name: &str) -> Option<PhysicalInterface> {
        let index = ifreq::index(name).ok()?;
        let mac = match ifreq::hw_addr(name) {
            Ok(mac) => mac,
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to read hardware address");
                return None;
            }
        };
        Some(PhysicalInterface {
            index,
            name: name.to_string(),
            mac,
        })
    }

    fn is_up(&self, index: IfIndex) -> bool {
        ifreq::name(index)
            .and_then(|name| ifreq::is_up(&name))
            .unwrap_or(false)
    }

    fn register(&self, name: &str, mac: MacAddr) -> Result<IfIndex, HostError> {
        if ifreq::index(name).is_ok() {
            return Err(HostError::NameInUse(name.to_string()));
        }

        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        let tap = TapDevice::create(name)?;
        ifreq::set_hw_addr(tap.name(), mac)?;

        let index = tap.index();
        Self::edit(&self.taps, |taps| {
            taps.insert(index, Arc::new(tap));
        });
        debug!(name = %name, index = %index, mac = %mac, "Created TAP device");
        Ok(index)
    }

    fn unregister(&self, index: IfIndex) -> Result<(), HostError> {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.taps.load().contains_key(&index) {
            return Err(HostError::NoSuchInterface(index.to_string()));
        }
        Self::edit(&self.taps, |taps| {
            taps.remove(&index);
        });
        debug!(index = %index, "Released TAP device");
        Ok(())
    }

    fn set_link_state(&self, index: IfIndex, up: bool) -> Result<(), HostError> {
        let tap = self.tap(index)?;
        ifreq::set_up(tap.name(), up)?;
        Ok(())
    }

    fn set_mac_address(&self, index: IfIndex, mac: MacAddr) -> Result<(), HostError> {
        let tap = self.tap(index)?;
        ifreq::set_hw_addr(tap.name(), mac)?;
        Ok(())
    }

    fn enroll(&self, physical: &PhysicalInterface, scheme: TagScheme) -> Result<(), HostError> {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        if self.uplinks.load().contains_key(&physical.index) {
            return Ok(());
        }

        let socket = PacketSocket::bind(physical.index, scheme.ethertype())?;
        Self::edit(&self.uplinks, |uplinks| {
            uplinks.insert(physical.index, Arc::new(socket));
        });
        info!(physical = %physical.name, scheme = scheme.name(), "Listening for tagged frames");
        Ok(())
    }

    fn withdraw(&self, index: IfIndex) {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        Self::edit(&self.uplinks, |uplinks| {
            uplinks.remove(&index);
        });
        info!(physical = %index, "Stopped listening for tagged frames");
    }

    fn deliver(&self, frame: Frame) {
        let Ok(tap) = self.tap(frame.dev()) else {
            trace!(dev = %frame.dev(), "No TAP for delivered frame");
            return;
        };
        if let Err(e) = tap.write_frame(frame.data()) {
            trace!(tap = %tap.name(), error = %e, "Failed to write frame to TAP");
        }
    }

    fn transmit(&self, index: IfIndex, frame: Frame) -> Result<(), HostError> {
        let uplink = self
            .uplinks
            .load()
            .get(&index)
            .cloned()
            .ok_or_else(|| HostError::NoSuchInterface(index.to_string()))?;
        let sent = uplink.send(frame.data())?;
        if sent != frame.len() {
            return Err(HostError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write on {index}: {sent} of {} bytes", frame.len()),
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_loopback() {
        let host = LinuxHost::new();
        let lo = host.resolve("lo").unwrap();
        assert_eq!(lo.name, "lo");
        assert_eq!(lo.mac, MacAddr::default());
        assert!(host.resolve("vnic-nope0").is_none());
    }

    #[test]
    fn test_register_rejects_existing_name() {
        let host = LinuxHost::new();
        let err = host.register("lo", MacAddr::default()).unwrap_err();
        assert!(matches!(err, HostError::NameInUse(ref n) if n == "lo"));
    }

    #[test]
    fn test_unknown_indices() {
        let host = LinuxHost::new();
        assert!(matches!(
            host.unregister(IfIndex(u32::MAX)),
            Err(HostError::NoSuchInterface(_))
        ));
        assert!(matches!(
            host.transmit(IfIndex(u32::MAX), Frame::new(IfIndex(u32::MAX), vec![0u8; 60])),
            Err(HostError::NoSuchInterface(_))
        ));
        assert!(!host.is_up(IfIndex(u32::MAX)));
        assert!(host.uplinks().is_empty());
        assert!(host.taps().is_empty());
    }
}
