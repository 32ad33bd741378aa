//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use ipnetwork::IpNetwork;
use parley_bgp::packet::error::UpdateMessageError;
use parley_bgp::packet::flowspec::{FlowComponent, FlowOp, FlowspecNlri};
use parley_bgp::packet::nlri::{Nlri, NlriValue};
use parley_utils::assert_eq_hex;
use parley_utils::bgp::AfiSafi;

fn flow_rule() -> Nlri {
    Nlri {
        path_id: None,
        value: NlriValue::Flowspec(FlowspecNlri {
            afi_safi: AfiSafi::Ipv4Flowspec,
            components: vec![
                FlowComponent::DestinationPrefix {
                    prefix: IpNetwork::from_str("192.0.2.0/24").unwrap(),
                    offset: 0,
                },
                FlowComponent::SourcePrefix {
                    prefix: IpNetwork::from_str("10.1.2.0/24").unwrap(),
                    offset: 0,
                },
                FlowComponent::Port(vec![FlowOp::eq(25)]),
            ],
        }),
    }
}

// Rule matching destination 192.0.2.0/24, source 10.1.2.0/24 and port 25.
// Component bytes: 01 18 c00002 | 02 18 0a0102 | 04 81 19, preceded by the
// one-octet length of the component list.
#[test]
fn test_flowspec_encode() {
    let bytes = vec![
        0x0d, 0x01, 0x18, 0xc0, 0x00, 0x02, 0x02, 0x18, 0x0a, 0x01, 0x02,
        0x04, 0x81, 0x19,
    ];
    let nlri = flow_rule();

    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, false);
    assert_eq_hex!(bytes, buf);
}

#[test]
fn test_flowspec_decode() {
    let bytes = vec![
        0x0d, 0x01, 0x18, 0xc0, 0x00, 0x02, 0x02, 0x18, 0x0a, 0x01, 0x02,
        0x04, 0x81, 0x19,
    ];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let nlri = Nlri::decode(AfiSafi::Ipv4Flowspec, &mut buf, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(buf.len(), 0);
    assert_eq!(nlri, flow_rule());
}

// Components must appear in strictly ascending type order.
#[test]
fn test_flowspec_component_order() {
    let bytes = vec![
        0x0d, 0x04, 0x81, 0x19, 0x01, 0x18, 0xc0, 0x00, 0x02, 0x02, 0x18,
        0x0a, 0x01, 0x02,
    ];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let result = Nlri::decode(AfiSafi::Ipv4Flowspec, &mut buf, false, false);
    assert_eq!(result, Err(UpdateMessageError::InvalidNetworkField));
}

// Operator chains: ">=1024&<=65535" is two operators, the second one ANDed
// with the first.
#[test]
fn test_flowspec_operator_chain() {
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::Flowspec(FlowspecNlri {
            afi_safi: AfiSafi::Ipv4Flowspec,
            components: vec![FlowComponent::DestinationPort(vec![
                FlowOp::gte(1024),
                FlowOp::lte(65535).and(),
            ])],
        }),
    };

    // 05 | 13 0400 | d5 ffff
    let bytes = vec![0x07, 0x05, 0x13, 0x04, 0x00, 0xd5, 0xff, 0xff];
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, false);
    assert_eq_hex!(bytes, buf);

    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded = Nlri::decode(AfiSafi::Ipv4Flowspec, &mut buf, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(decoded, nlri);
}

// IPv6 rules carry a pattern offset octet in the prefix components.
#[test]
fn test_flowspec_ipv6_prefix() {
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::Flowspec(FlowspecNlri {
            afi_safi: AfiSafi::Ipv6Flowspec,
            components: vec![FlowComponent::DestinationPrefix {
                prefix: IpNetwork::from_str("2001:db8::/32").unwrap(),
                offset: 0,
            }],
        }),
    };

    let bytes = vec![0x07, 0x01, 0x20, 0x00, 0x20, 0x01, 0x0d, 0xb8];
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, false);
    assert_eq_hex!(bytes, buf);

    let mut buf = Bytes::copy_from_slice(&bytes);
    let decoded = Nlri::decode(AfiSafi::Ipv6Flowspec, &mut buf, false, false)
        .unwrap()
        .unwrap();
    assert_eq!(decoded, nlri);
}
