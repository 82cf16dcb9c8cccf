//! Create, receive, transmit and delete through the public API.

mod harness;

use harness::{DST_MAC, ETH0, ETH1, SRC_MAC, TestBed, payload};
use vnicd::datapath::DropStats;
use vnicd::status::render_table;
use vnicd::test_util::tagged_frame;
use vnicd::{DropReason, Frame, IfIndex, RxOutcome, TxOutcome};

#[test]
fn test_tagged_frame_reaches_virtual_interface() {
    let bed = TestBed::new();
    let vif = bed
        .manager
        .create_virtual_interface("eth0", "veth", 2)
        .unwrap();

    let data = tagged_frame(DST_MAC, SRC_MAC, 2, 0x0800, &payload());
    assert_eq!(data.len(), 64);

    let outcome = bed.datapath.receive(Frame::new(ETH0, data), ETH0);
    assert_eq!(outcome, RxOutcome::Delivered { to: vif.index() });

    let delivered = bed.host.delivered();
    assert_eq!(delivered.len(), 1);
    let frame = &delivered[0];
    assert_eq!(frame.dev(), vif.index());
    assert_eq!(frame.len(), 60);

    let mut expected = Vec::new();
    expected.extend_from_slice(&DST_MAC);
    expected.extend_from_slice(&SRC_MAC);
    expected.extend_from_slice(&[0x08, 0x00]);
    expected.extend_from_slice(&payload());
    assert_eq!(frame.data(), expected.as_slice());

    let stats = vif.stats().snapshot();
    assert_eq!((stats.rx_packets, stats.rx_bytes), (1, 60));
}

#[test]
fn test_frame_dropped_after_delete() {
    let bed = TestBed::new();
    bed.manager
        .create_virtual_interface("eth0", "veth", 2)
        .unwrap();
    assert!(matches!(bed.receive_on(ETH0, 2), RxOutcome::Delivered { .. }));

    bed.manager.delete_virtual_interface("veth", 2).unwrap();
    assert!(bed.registry.lookup(ETH0, 2).is_none());

    assert_eq!(
        bed.receive_on(ETH0, 2),
        RxOutcome::Dropped(DropReason::NotFound)
    );
    assert_eq!(
        bed.datapath.drop_stats(),
        DropStats {
            not_found: 1,
            ..Default::default()
        }
    );
    assert_eq!(bed.host.delivered().len(), 1);
}

#[test]
fn test_ports_on_different_uplinks_are_independent() {
    let bed = TestBed::new();
    let a = bed.manager.create_virtual_interface("eth0", "a", 1).unwrap();
    let b = bed.manager.create_virtual_interface("eth1", "b", 1).unwrap();

    assert_eq!(bed.receive_on(ETH0, 1), RxOutcome::Delivered { to: a.index() });
    assert_eq!(bed.receive_on(ETH1, 1), RxOutcome::Delivered { to: b.index() });

    let table = render_table(&bed.manager.status());
    assert_eq!(
        table,
        "VNIC Device Name | VNIC Device ID | Real Device\n\
         a1             | 1 | eth0\n\
         b1             | 1 | eth1\n"
    );
}

#[test]
fn test_spoofed_arrival_is_dropped() {
    let bed = TestBed::new();
    let vif = bed
        .manager
        .create_virtual_interface("eth0", "veth", 2)
        .unwrap();

    // Frame attributed to eth0 but physically received on eth1
    let data = tagged_frame(DST_MAC, SRC_MAC, 2, 0x0800, &payload());
    let outcome = bed.datapath.receive(Frame::new(ETH0, data), ETH1);

    assert_eq!(outcome, RxOutcome::Dropped(DropReason::Mismatch));
    assert_eq!(bed.datapath.drop_stats().mismatch, 1);
    assert_eq!(vif.stats().snapshot().rx_errors, 1);
    assert!(bed.host.delivered().is_empty());
}

#[test]
fn test_transmit_from_virtual_interface() {
    let bed = TestBed::new();
    let vif = bed
        .manager
        .create_virtual_interface("eth0", "veth", 2)
        .unwrap();

    let frame = Frame::new(vif.index(), vec![0xab; 60]);
    assert_eq!(
        bed.datapath.transmit_from(vif.index(), frame),
        TxOutcome::Sent { via: ETH0 }
    );

    let sent = bed.host.transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, ETH0);
    assert_eq!(sent[0].1.data(), &[0xab; 60][..]);

    let stats = vif.stats().snapshot();
    assert_eq!((stats.tx_packets, stats.tx_bytes), (1, 60));

    bed.manager.delete_virtual_interface("veth", 2).unwrap();
    assert_eq!(
        bed.datapath
            .transmit_from(vif.index(), Frame::new(vif.index(), vec![0; 60])),
        TxOutcome::Dropped(DropReason::NotFound)
    );
}

#[test]
fn test_in_flight_handle_survives_delete() {
    let bed = TestBed::new();
    bed.manager
        .create_virtual_interface("eth0", "veth", 2)
        .unwrap();

    let held = bed.registry.lookup(ETH0, 2).unwrap();
    bed.manager.delete_virtual_interface("veth", 2).unwrap();

    assert_eq!(held.name(), "veth2");
    assert_eq!(held.physical(), ETH0);
    assert!(bed.host.registered().get(&held.index()).is_none());
    assert_ne!(held.index(), IfIndex(0));
}
