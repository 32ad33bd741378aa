//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use ipnetwork::IpNetwork;
use parley_bgp::neighbor::PeerType;
use parley_bgp::packet::attribute::{
    Aggregator, AsPath, AsPathSegment, Attrs, ClusterList, CommList,
};
use parley_bgp::packet::consts::AsPathSegmentType;
use parley_bgp::packet::message::{
    DecodeCxt, Message, Negotiated, ReachNlri, UpdateMsg,
};
use parley_bgp::packet::nlri::Nlri;
use parley_utils::bgp::{Comm, ExtComm, LargeComm, Origin};

use super::{negotiated_asn4, test_encode_msg};

fn test_decode_msg_ibgp(bytes: &[u8], msg_expected: &Message) {
    let cxt = DecodeCxt {
        peer_type: PeerType::Internal,
        peer_as: 65000,
        negotiated: negotiated_asn4(),
    };

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}

// Announcement carrying the full set of base attributes plus all four
// community families.
static UPDATE_FULL: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    let mut large_comm = [0u8; 12];
    large_comm[..4].copy_from_slice(&65000u32.to_be_bytes());
    large_comm[4..8].copy_from_slice(&1u32.to_be_bytes());
    large_comm[8..].copy_from_slice(&2u32.to_be_bytes());

    let attrs = Attrs {
        base: parley_bgp::packet::attribute::BaseAttrs {
            origin: Origin::Egp,
            as_path: AsPath {
                segments: [AsPathSegment {
                    seg_type: AsPathSegmentType::Sequence,
                    members: [65001, 65002].into(),
                }]
                .into(),
            },
            as4_path: None,
            nexthop: None,
            ll_nexthop: None,
            med: Some(100),
            local_pref: Some(200),
            aggregator: Some(Aggregator {
                asn: 65003,
                identifier: Ipv4Addr::from_str("10.0.0.9").unwrap(),
            }),
            as4_aggregator: None,
            atomic_aggregate: true,
            originator_id: Some(Ipv4Addr::from_str("10.0.0.1").unwrap()),
            cluster_list: Some(ClusterList(
                [Ipv4Addr::from_str("10.0.0.2").unwrap()].into(),
            )),
        },
        comm: Some(CommList(
            [Comm(0xfde80064), Comm(0xFFFFFF01)].into(),
        )),
        ext_comm: Some(CommList(
            [ExtComm::route_target(65000, 1)].into(),
        )),
        extv6_comm: None,
        large_comm: Some(CommList([LargeComm(large_comm)].into())),
        pmsi_tunnel: None,
        aigp: None,
        prefix_sid: None,
        link_state: None,
        unknown: vec![],
    };

    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x86, 0x02, 0x00, 0x00, 0x00,
            0x6c,
            // ORIGIN
            0x40, 0x01, 0x01, 0x01,
            // AS_PATH
            0x50, 0x02, 0x00, 0x0a, 0x02, 0x02, 0x00, 0x00, 0xfd, 0xe9, 0x00,
            0x00, 0xfd, 0xea,
            // NEXT_HOP
            0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0xfe,
            // MULTI_EXIT_DISC
            0x80, 0x04, 0x04, 0x00, 0x00, 0x00, 0x64,
            // LOCAL_PREF
            0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0xc8,
            // ATOMIC_AGGREGATE
            0x40, 0x06, 0x00,
            // AGGREGATOR
            0xc0, 0x07, 0x08, 0x00, 0x00, 0xfd, 0xeb, 0x0a, 0x00, 0x00, 0x09,
            // COMMUNITIES
            0xd0, 0x08, 0x00, 0x08, 0xfd, 0xe8, 0x00, 0x64, 0xff, 0xff, 0xff,
            0x01,
            // ORIGINATOR_ID
            0x80, 0x09, 0x04, 0x0a, 0x00, 0x00, 0x01,
            // CLUSTER_LIST
            0x90, 0x0a, 0x00, 0x04, 0x0a, 0x00, 0x00, 0x02,
            // EXTENDED COMMUNITIES
            0xd0, 0x10, 0x00, 0x08, 0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00,
            0x01,
            // LARGE_COMMUNITY
            0xd0, 0x20, 0x00, 0x0c, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x02,
            // NLRI
            0x10, 0x0a, 0x01,
        ],
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![Nlri::from(
                    IpNetwork::from_str("10.1.0.0/16").unwrap(),
                )],
                nexthop: Ipv4Addr::from_str("10.0.0.254").unwrap(),
            }),
            unreach: None,
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(attrs),
        }),
    )
});

#[test]
fn test_encode_update_full() {
    let (ref bytes, ref msg) = *UPDATE_FULL;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update_full() {
    let (ref bytes, ref msg) = *UPDATE_FULL;
    test_decode_msg_ibgp(bytes, msg);
}

// A malformed ORIGIN value converts the announced NLRIs into withdrawals
// without resetting the session (RFC 7606).
#[test]
fn test_treat_as_withdraw() {
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x31, 0x02, 0x00, 0x00, 0x00,
        0x15,
        // ORIGIN with an undefined value.
        0x40, 0x01, 0x01, 0x09,
        // AS_PATH
        0x50, 0x02, 0x00, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe8,
        // NEXT_HOP
        0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0xfe,
        // NLRI
        0x20, 0x0a, 0x00, 0x00, 0x01,
    ];

    let cxt = DecodeCxt {
        peer_type: PeerType::External,
        peer_as: 65000,
        negotiated: Negotiated {
            asn4: true,
            ..Default::default()
        },
    };
    let msg = Message::decode(&bytes, &cxt).unwrap();

    // The decode must succeed, with the attributes discarded and the
    // announced prefixes still visible so the caller can withdraw them.
    let Message::Update(msg) = msg else {
        panic!("unexpected message type");
    };
    assert!(msg.attrs.is_none());
    assert!(msg.reach.is_some());
}

// An unknown optional transitive attribute is retained with the Partial
// bit set.
#[test]
fn test_unknown_attribute() {
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x36, 0x02, 0x00, 0x00, 0x00,
        0x1a,
        // ORIGIN
        0x40, 0x01, 0x01, 0x00,
        // AS_PATH
        0x50, 0x02, 0x00, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe8,
        // NEXT_HOP
        0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0xfe,
        // Unassigned optional transitive attribute type 199.
        0xc0, 0xc7, 0x02, 0xbe, 0xef,
        // NLRI
        0x20, 0x0a, 0x00, 0x00, 0x01,
    ];

    let cxt = DecodeCxt {
        peer_type: PeerType::External,
        peer_as: 65000,
        negotiated: Negotiated {
            asn4: true,
            ..Default::default()
        },
    };
    let msg = Message::decode(&bytes, &cxt).unwrap();

    let Message::Update(msg) = msg else {
        panic!("unexpected message type");
    };
    let attrs = msg.attrs.expect("attributes missing");
    assert_eq!(attrs.unknown.len(), 1);
    let unknown = &attrs.unknown[0];
    assert_eq!(unknown.attr_type, 199);
    assert!(
        unknown
            .flags
            .contains(parley_bgp::packet::consts::AttrFlags::PARTIAL)
    );
    assert_eq!(unknown.value.as_ref(), &[0xbe, 0xef]);
}

// AS4_PATH reconciliation (RFC 6793): the trailing AS_TRANS placeholders
// are replaced by the 4-octet path, from right to left.
#[test]
fn test_as4_path_reconcile() {
    let as_path = AsPath {
        segments: [AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: [64512, 23456, 23456].into(),
        }]
        .into(),
    };
    let as4_path = AsPath {
        segments: [AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: [70001, 70002].into(),
        }]
        .into(),
    };

    let merged = as_path.reconcile(&as4_path);
    assert_eq!(merged.iter().collect::<Vec<_>>(), vec![64512, 70001, 70002]);

    // An AS4_PATH longer than the AS_PATH is ignored.
    let short_path = AsPath {
        segments: [AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: [23456].into(),
        }]
        .into(),
    };
    let merged = short_path.reconcile(&as4_path);
    assert_eq!(merged.iter().collect::<Vec<_>>(), vec![23456]);
}
