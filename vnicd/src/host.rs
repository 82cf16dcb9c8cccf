//! Host networking stack abstraction
//!
//! The core never talks to the operating system directly. Everything it needs
//! from the host goes through the [`Host`] trait:
//! - `LinuxHost`: TAP devices + `AF_PACKET` uplink sockets
//! - `MemoryHost`: in-memory double used by the tests

use std::io;

use thiserror::Error;

use crate::device::{IfIndex, MacAddr, PhysicalInterface};
use crate::frame::Frame;
use crate::tag::TagScheme;

/// Failures reported by the host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("interface name already in use: {0}")]
    NameInUse(String),

    #[error("no such interface: {0}")]
    NoSuchInterface(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Handle to an entry on the host's reporting surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportHandle(pub u64);

/// Operations the core needs from the host networking stack.
///
/// Implementations are shared between the datapath thread and the control
/// plane, so every method takes `&self`.
pub trait Host: Send + Sync {
    /// Resolve a physical interface by name.
    fn resolve(&self, name: &str) -> Option<PhysicalInterface>;

    /// Link state of a host interface.
    fn is_up(&self, index: IfIndex) -> bool;

    /// Register a new interface object with the stack.
    ///
    /// Returns the index the stack assigned to it.
    fn register(&self, name: &str, mac: MacAddr) -> Result<IfIndex, HostError>;

    /// Remove an interface previously returned by [`Host::register`].
    fn unregister(&self, index: IfIndex) -> Result<(), HostError>;

    fn set_link_state(&self, _index: IfIndex, _up: bool) -> Result<(), HostError> {
        Ok(())
    }

    fn set_mac_address(&self, _index: IfIndex, _mac: MacAddr) -> Result<(), HostError> {
        Ok(())
    }

    /// Add a per-interface entry on the reporting surface.
    ///
    /// `Ok(None)` means the host has no reporting surface.
    fn add_report_entry(&self, _name: &str) -> Result<Option<ReportHandle>, HostError> {
        Ok(None)
    }

    fn remove_report_entry(&self, _handle: ReportHandle) {}

    /// Start receiving tagged traffic from a physical interface.
    ///
    /// Called once, when the first virtual interface on `physical` is created.
    fn enroll(&self, _physical: &PhysicalInterface, _scheme: TagScheme) -> Result<(), HostError> {
        Ok(())
    }

    /// Stop receiving from a physical interface that has no virtual
    /// interfaces left.
    fn withdraw(&self, _index: IfIndex) {}

    /// Hand a frame to the stack's normal ingress path, attributed to
    /// `frame.dev()`.
    fn deliver(&self, frame: Frame);

    /// Send a frame out of a physical interface.
    fn transmit(&self, index: IfIndex, frame: Frame) -> Result<(), HostError>;
}
