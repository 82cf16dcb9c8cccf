//! Test harness for datapath and control plane integration tests
//!
//! Wires a `Manager` and a `Datapath` to one shared registry and an
//! in-memory host.

#![allow(dead_code)]

use std::sync::Arc;

use vnicd::test_util::{MemoryHost, tagged_frame};
use vnicd::{Datapath, Frame, IfIndex, MacAddr, Manager, Registry, RxOutcome, TagScheme};

pub const ETH0: IfIndex = IfIndex(2);
pub const ETH1: IfIndex = IfIndex(3);

pub const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0d];
pub const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x05];

pub struct TestBed {
    pub host: Arc<MemoryHost>,
    pub registry: Arc<Registry>,
    pub manager: Arc<Manager<MemoryHost>>,
    pub datapath: Arc<Datapath<MemoryHost>>,
}

impl TestBed {
    /// Host with `eth0` (index 2) and `eth1` (index 3).
    pub fn new() -> Self {
        let host = Arc::new(MemoryHost::with_eth0());
        host.add_physical("eth1", ETH1.0, MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x66]));

        let registry = Arc::new(Registry::new());
        let manager = Arc::new(Manager::new(
            registry.clone(),
            host.clone(),
            TagScheme::Broadcom,
        ));
        let datapath = Arc::new(Datapath::new(
            registry.clone(),
            host.clone(),
            TagScheme::Broadcom,
        ));

        Self {
            host,
            registry,
            manager,
            datapath,
        }
    }

    /// Receive a 64-byte tagged IPv4 frame for `port` on `physical`.
    pub fn receive_on(&self, physical: IfIndex, port: u8) -> RxOutcome {
        let data = tagged_frame(DST_MAC, SRC_MAC, port, 0x0800, &payload());
        self.datapath.receive(Frame::new(physical, data), physical)
    }
}

/// 46-byte payload; with the 18-byte tagged header the frame is 64 bytes.
pub fn payload() -> Vec<u8> {
    (0..46).map(|i| i as u8).collect()
}
