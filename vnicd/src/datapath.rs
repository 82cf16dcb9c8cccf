//! Per-packet demultiplexing and remultiplexing.
//!
//! Receive: a tagged frame from a physical interface is matched to the
//! virtual interface bound to its ingress port, stripped of the tag and
//! handed to the host attributed to that virtual interface.
//!
//! Transmit: a frame sent on a virtual interface is re-attributed to the
//! owning physical interface and sent unchanged. No tag is added.
//!
//! Nothing here blocks or allocates on the fast path except when a shared
//! buffer has to be copied before the rewrite.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::device::{Device, IfIndex, VirtualInterface};
use crate::frame::Frame;
use crate::host::Host;
use crate::registry::Registry;
use crate::tag::TagScheme;

/// Why a frame was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Too short, or not carrying the scheme's tag
    Malformed,
    /// No virtual interface on the frame's port
    NotFound,
    /// Frame arrived on a different physical interface than the owner
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    Delivered { to: IfIndex },
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Sent { via: IfIndex },
    Dropped(DropReason),
    /// The host refused the frame
    Failed,
}

/// Datapath-wide drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropStats {
    pub malformed: u64,
    pub not_found: u64,
    pub mismatch: u64,
}

#[derive(Debug, Default)]
struct DropCounters {
    malformed: AtomicU64,
    not_found: AtomicU64,
    mismatch: AtomicU64,
}

impl DropCounters {
    fn record(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &self.malformed,
            DropReason::NotFound => &self.not_found,
            DropReason::Mismatch => &self.mismatch,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Datapath<H: Host> {
    registry: Arc<Registry>,
    host: Arc<H>,
    scheme: TagScheme,
    drops: DropCounters,
}

impl<H: Host> Datapath<H> {
    pub fn new(registry: Arc<Registry>, host: Arc<H>, scheme: TagScheme) -> Self {
        Self {
            registry,
            host,
            scheme,
            drops: DropCounters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Demultiplex one received frame.
    ///
    /// `frame.dev()` is the interface the frame was attributed to on receive,
    /// `arrival` the physical interface it actually came in on.
    pub fn receive(&self, mut frame: Frame, arrival: IfIndex) -> RxOutcome {
        frame.make_exclusive();

        let Some(port) = self.scheme.port(frame.data()) else {
            return self.drop_rx(DropReason::Malformed, frame.dev(), None);
        };
        let port = u16::from(port);

        let Some(vif) = self.registry.lookup(frame.dev(), port) else {
            return self.drop_rx(DropReason::NotFound, frame.dev(), Some(port));
        };

        if vif.physical() != arrival {
            vif.stats().record_rx_error();
            return self.drop_rx(DropReason::Mismatch, arrival, Some(port));
        }

        if !self.scheme.strip(&mut frame) {
            return self.drop_rx(DropReason::Malformed, arrival, Some(port));
        }

        vif.stats().record_rx(frame.len());
        frame.set_dev(vif.index());
        trace!(vif = %vif.name(), port, len = frame.len(), "Delivering frame");
        self.host.deliver(frame);

        RxOutcome::Delivered { to: vif.index() }
    }

    /// Send a frame submitted on `vif` out of its physical interface.
    pub fn transmit(&self, vif: &VirtualInterface, mut frame: Frame) -> TxOutcome {
        let len = frame.len();
        vif.stats().record_tx(len);

        let via = vif.physical();
        frame.set_dev(via);
        match self.host.transmit(via, frame) {
            Ok(()) => TxOutcome::Sent { via },
            Err(e) => {
                vif.stats().record_tx_error();
                warn!(vif = %vif.name(), physical = %vif.physical_name(), error = %e, "Transmit failed");
                TxOutcome::Failed
            }
        }
    }

    /// Transmit a frame read from the virtual interface with host index
    /// `index`.
    pub fn transmit_from(&self, index: IfIndex, frame: Frame) -> TxOutcome {
        match self.registry.get(index) {
            Some(vif) => self.transmit(&vif, frame),
            None => {
                debug!(index = %index, "Transmit on unknown interface");
                TxOutcome::Dropped(DropReason::NotFound)
            }
        }
    }

    /// Transmit on either kind of device.
    pub fn transmit_on(&self, device: &Device, mut frame: Frame) -> TxOutcome {
        match device {
            Device::Physical(phys) => {
                frame.set_dev(phys.index);
                match self.host.transmit(phys.index, frame) {
                    Ok(()) => TxOutcome::Sent { via: phys.index },
                    Err(e) => {
                        warn!(physical = %phys.name, error = %e, "Transmit failed");
                        TxOutcome::Failed
                    }
                }
            }
            Device::Virtual(vif) => self.transmit(vif, frame),
        }
    }

    pub fn drop_stats(&self) -> DropStats {
        DropStats {
            malformed: self.drops.malformed.load(Ordering::Relaxed),
            not_found: self.drops.not_found.load(Ordering::Relaxed),
            mismatch: self.drops.mismatch.load(Ordering::Relaxed),
        }
    }

    fn drop_rx(&self, reason: DropReason, dev: IfIndex, port: Option<u16>) -> RxOutcome {
        self.drops.record(reason);
        debug!(dev = %dev, port = ?port, reason = ?reason, "Dropping frame");
        RxOutcome::Dropped(reason)
    }
}
