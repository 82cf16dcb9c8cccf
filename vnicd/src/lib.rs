//! Switch-port virtual interfaces over a tagged uplink.
//!
//! A switch ASIC attached to a physical interface tags every frame with the
//! port it came in on. This crate demultiplexes those frames onto one virtual
//! interface per port and sends traffic from the virtual interfaces back out
//! of the physical one.

pub mod config;
pub mod control;
pub mod datapath;
pub mod device;
pub mod error;
pub mod frame;
pub mod host;
pub mod linux;
pub mod manager;
pub mod registry;
pub mod status;
pub mod tag;
pub mod test_util;

pub use datapath::{Datapath, DropReason, RxOutcome, TxOutcome};
pub use device::{Device, IfIndex, MacAddr, PhysicalInterface, VirtualInterface};
pub use error::{Result, VnicError};
pub use frame::Frame;
pub use host::{Host, HostError};
pub use manager::Manager;
pub use registry::{Group, Registry};
pub use tag::TagScheme;
