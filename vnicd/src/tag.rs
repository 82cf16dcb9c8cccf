//! Switch tag wire format.
//!
//! A tagged frame carries a 4-byte header between the source MAC and the
//! original EtherType:
//!
//! ```text
//!  0..6   destination MAC
//!  6..12  source MAC
//! 12..16  tag (12..14 = 0x8874, 15 = ingress port)
//! 16..18  original EtherType
//! 18..    payload
//! ```
//!
//! Stripping the tag yields an ordinary Ethernet II frame four bytes shorter.

use serde::{Deserialize, Serialize};
use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

use crate::frame::Frame;

/// Offset of the tag inside a tagged frame (right after both MACs).
pub const TAG_OFFSET: usize = 12;

const ETH_HEADER_LEN: usize = 14;

/// Supported tagging schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagScheme {
    #[default]
    Broadcom,
}

impl TagScheme {
    pub const fn tag_len(self) -> usize {
        match self {
            TagScheme::Broadcom => 4,
        }
    }

    /// EtherType identifying the tag on the wire.
    pub const fn ethertype(self) -> u16 {
        match self {
            TagScheme::Broadcom => 0x8874,
        }
    }

    /// Offset of the port byte inside the tag.
    pub const fn port_offset(self) -> usize {
        match self {
            TagScheme::Broadcom => 3,
        }
    }

    /// Number of switch ports; valid ports are `0..max_ports()`.
    pub const fn max_ports(self) -> u16 {
        match self {
            TagScheme::Broadcom => 32,
        }
    }

    /// Minimum length of a tagged frame (both MACs, tag, original EtherType).
    pub const fn min_frame_len(self) -> usize {
        ETH_HEADER_LEN + self.tag_len()
    }

    pub fn name(self) -> &'static str {
        match self {
            TagScheme::Broadcom => "broadcom",
        }
    }

    /// Read the ingress port of a tagged frame.
    ///
    /// Returns `None` if the frame is too short or does not carry this
    /// scheme's tag type.
    pub fn port(self, data: &[u8]) -> Option<u8> {
        if data.len() < self.min_frame_len() {
            return None;
        }
        let tag_type = u16::from_be_bytes([data[TAG_OFFSET], data[TAG_OFFSET + 1]]);
        if tag_type != self.ethertype() {
            return None;
        }
        Some(data[TAG_OFFSET + self.port_offset()])
    }

    /// Remove the tag in place and rewrite the Ethernet header in front of
    /// the payload.
    ///
    /// The caller must have validated the frame with [`TagScheme::port`].
    /// Returns `false` if the frame is too short to strip.
    pub fn strip(self, frame: &mut Frame) -> bool {
        let data = frame.data();
        if data.len() < self.min_frame_len() {
            return false;
        }

        let tagged = EthernetFrame::new_unchecked(data);
        let dst = tagged.dst_addr();
        let src = tagged.src_addr();
        let inner = TAG_OFFSET + self.tag_len();
        let ethertype = EthernetProtocol::from(u16::from_be_bytes([data[inner], data[inner + 1]]));

        frame.pull(self.tag_len());
        let mut header = EthernetFrame::new_unchecked(frame.data_mut());
        header.set_dst_addr(dst);
        header.set_src_addr(src);
        header.set_ethertype(ethertype);
        true
    }
}

/// Build a tagged frame. Used by tests and the test host.
pub fn build_tagged(
    scheme: TagScheme,
    dst: EthernetAddress,
    src: EthernetAddress,
    port: u8,
    ethertype: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(scheme.min_frame_len() + payload.len());
    buf.extend_from_slice(&dst.0);
    buf.extend_from_slice(&src.0);

    let mut tag = vec![0u8; scheme.tag_len()];
    tag[..2].copy_from_slice(&scheme.ethertype().to_be_bytes());
    tag[scheme.port_offset()] = port;
    buf.extend_from_slice(&tag);

    buf.extend_from_slice(&ethertype.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}
