//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use ipnetwork::IpNetwork;
use parley_bgp::packet::attribute::{AsPath, AsPathSegment, Attrs};
use parley_bgp::packet::consts::AsPathSegmentType;
use parley_bgp::packet::message::{
    Message, MpNexthop, MpReachNlri, ReachNlri, UnreachNlri, UpdateMsg,
};
use parley_bgp::packet::nlri::Nlri;
use parley_utils::bgp::{AfiSafi, Origin};

use super::{test_decode_msg, test_encode_msg};

fn base_attrs(asns: &[u32]) -> Attrs {
    let mut attrs = Attrs::new(Origin::Igp);
    attrs.base.as_path = AsPath {
        segments: [AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: asns.iter().copied().collect(),
        }]
        .into(),
    };
    attrs
}

fn unicast(prefix: &str) -> Nlri {
    Nlri::from(IpNetwork::from_str(prefix).unwrap())
}

// Announcement of 10.0.0.1/32 via 10.0.0.254 with AS_PATH [65000].
static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x31, 0x02, 0x00, 0x00, 0x00,
            0x15, 0x40, 0x01, 0x01, 0x00, 0x50, 0x02, 0x00, 0x06, 0x02, 0x01,
            0x00, 0x00, 0xfd, 0xe8, 0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0xfe,
            0x20, 0x0a, 0x00, 0x00, 0x01,
        ],
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![unicast("10.0.0.1/32")],
                nexthop: Ipv4Addr::from_str("10.0.0.254").unwrap(),
            }),
            unreach: None,
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(base_attrs(&[65000])),
        }),
    )
});

// Withdrawal of two IPv4 prefixes.
static UPDATE2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1f, 0x02, 0x00, 0x08, 0x18,
            0xc0, 0x00, 0x02, 0x18, 0xc6, 0x33, 0x64, 0x00, 0x00,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: Some(UnreachNlri {
                prefixes: vec![
                    unicast("192.0.2.0/24"),
                    unicast("198.51.100.0/24"),
                ],
            }),
            mp_reach: None,
            mp_unreach: None,
            attrs: None,
        }),
    )
});

// IPv6 unicast announcement through MP_REACH_NLRI.
static UPDATE3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x43, 0x02, 0x00, 0x00, 0x00,
            0x2c, 0x90, 0x0e, 0x00, 0x1a, 0x00, 0x02, 0x01, 0x10, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00, 0x20, 0x20, 0x01, 0x0d, 0xb8, 0x40, 0x01,
            0x01, 0x00, 0x50, 0x02, 0x00, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd,
            0xe8,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: Some(MpReachNlri {
                afi_safi: AfiSafi::Ipv6Unicast,
                nexthop: MpNexthop::Ipv6 {
                    global: Ipv6Addr::from_str("2001:db8::1").unwrap(),
                    link_local: None,
                },
                nlri: vec![unicast("2001:db8::/32")],
            }),
            mp_unreach: None,
            attrs: Some(base_attrs(&[65000])),
        }),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_decode_msg(bytes, msg);
}

//
// End-of-RIB markers.
//

#[test]
fn test_eor_ipv4() {
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x02, 0x00, 0x00, 0x00,
        0x00,
    ];
    let msg = Message::Update(UpdateMsg::eor(AfiSafi::Ipv4Unicast));
    test_encode_msg(&bytes, &msg);
    test_decode_msg(&bytes, &msg);

    let Message::Update(msg) = &msg else {
        unreachable!();
    };
    assert_eq!(msg.as_eor(), Some(AfiSafi::Ipv4Unicast));
}

#[test]
fn test_eor_ipv6() {
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1e, 0x02, 0x00, 0x00, 0x00,
        0x07, 0x90, 0x0f, 0x00, 0x03, 0x00, 0x02, 0x01,
    ];
    let msg = Message::Update(UpdateMsg::eor(AfiSafi::Ipv6Unicast));
    test_encode_msg(&bytes, &msg);
    test_decode_msg(&bytes, &msg);

    let Message::Update(msg) = &msg else {
        unreachable!();
    };
    assert_eq!(msg.as_eor(), Some(AfiSafi::Ipv6Unicast));
}

#[test]
fn test_not_eor() {
    let Message::Update(msg) = &UPDATE1.1 else {
        unreachable!();
    };
    assert_eq!(msg.as_eor(), None);
}
