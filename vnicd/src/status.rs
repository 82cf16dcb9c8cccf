//! Status rows and per-interface statistics.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::device::{IfIndex, MacAddr, StatsSnapshot, VirtualInterface};

pub const TABLE_HEADER: &str = "VNIC Device Name | VNIC Device ID | Real Device";

/// One live virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub virtual_interface_name: String,
    pub port: u16,
    pub physical_interface_name: String,
}

impl From<&VirtualInterface> for StatusRow {
    fn from(vif: &VirtualInterface) -> Self {
        StatusRow {
            virtual_interface_name: vif.name().to_string(),
            port: vif.port(),
            physical_interface_name: vif.physical_name().to_string(),
        }
    }
}

/// Render rows as the plain-text status table.
pub fn render_table(rows: &[StatusRow]) -> String {
    let mut out = String::new();
    out.push_str(TABLE_HEADER);
    out.push('\n');
    for row in rows {
        let _ = writeln!(
            out,
            "{:<15}| {} | {}",
            row.virtual_interface_name, row.port, row.physical_interface_name
        );
    }
    out
}

/// Counters and state of one virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub name: String,
    pub index: IfIndex,
    pub mac: MacAddr,
    pub up: bool,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
}

impl From<&VirtualInterface> for InterfaceStats {
    fn from(vif: &VirtualInterface) -> Self {
        InterfaceStats {
            name: vif.name().to_string(),
            index: vif.index(),
            mac: vif.mac(),
            up: vif.is_up(),
            counters: vif.stats().snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table() {
        let rows = vec![
            StatusRow {
                virtual_interface_name: "veth2".to_string(),
                port: 2,
                physical_interface_name: "eth0".to_string(),
            },
            StatusRow {
                virtual_interface_name: "lan10".to_string(),
                port: 10,
                physical_interface_name: "eth1".to_string(),
            },
        ];

        let table = render_table(&rows);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines[0], "VNIC Device Name | VNIC Device ID | Real Device");
        assert_eq!(lines[1], "veth2          | 2 | eth0");
        assert_eq!(lines[2], "lan10          | 10 | eth1");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_render_empty_table() {
        assert_eq!(render_table(&[]), format!("{TABLE_HEADER}\n"));
    }

    #[test]
    fn test_interface_stats_flattened_json() {
        let stats = InterfaceStats {
            name: "veth2".to_string(),
            index: IfIndex(100),
            mac: MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            up: true,
            counters: StatsSnapshot {
                rx_packets: 1,
                rx_bytes: 60,
                ..Default::default()
            },
        };

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["index"], 100);
        assert_eq!(value["mac"], "00:11:22:33:44:55");
        assert_eq!(value["rx_packets"], 1);
        assert_eq!(value["rx_bytes"], 60);

        let back: InterfaceStats = serde_json::from_value(value).unwrap();
        assert_eq!(back, stats);
    }
}
