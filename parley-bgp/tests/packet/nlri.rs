//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use ipnetwork::IpNetwork;
use parley_bgp::packet::nlri::{
    Esi, EvpnNlri, LabeledNlri, Nlri, NlriValue, RouteTargetNlri, VpnNlri,
};
use parley_utils::assert_eq_hex;
use parley_utils::bgp::{
    AfiSafi, ExtComm, Label, Labels, PathId, RouteDistinguisher,
};
use parley_utils::mac_addr::MacAddr;

//
// Helper functions.
//

fn test_encode_nlri(bytes_expected: &[u8], nlri: &Nlri, addpath: bool) {
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, addpath);
    assert_eq_hex!(bytes_expected, buf);
}

fn test_decode_nlri(
    bytes: &[u8],
    nlri_expected: &Nlri,
    withdraw: bool,
    addpath: bool,
) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let nlri_actual =
        Nlri::decode(nlri_expected.afi_safi(), &mut buf, withdraw, addpath)
            .unwrap()
            .unwrap();
    assert_eq!(*nlri_expected, nlri_actual);
    // The decoder must consume the entire encoding.
    assert_eq!(buf.len(), 0);
}

//
// Labeled unicast (RFC 3107).
//

#[test]
fn test_labeled_unicast() {
    let bytes = vec![0x30, 0x00, 0x06, 0x41, 0x0a, 0x00, 0x00];
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::Labeled(LabeledNlri {
            afi_safi: AfiSafi::Ipv4LabeledUnicast,
            prefix: IpNetwork::from_str("10.0.0.0/24").unwrap(),
            labels: Labels(vec![Label(100)]),
        }),
    };
    test_encode_nlri(&bytes, &nlri, false);
    test_decode_nlri(&bytes, &nlri, false, false);
}

// In the withdraw direction the reserved label 0x800000 terminates the
// stack without a bottom-of-stack bit.
#[test]
fn test_labeled_unicast_withdraw_label() {
    let bytes = vec![0x30, 0x80, 0x00, 0x00, 0x0a, 0x00, 0x00];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let nlri = Nlri::decode(
        AfiSafi::Ipv4LabeledUnicast,
        &mut buf,
        true,
        false,
    )
    .unwrap()
    .unwrap();
    assert_eq!(buf.len(), 0);

    let NlriValue::Labeled(labeled) = &nlri.value else {
        panic!("unexpected NLRI kind");
    };
    assert_eq!(labeled.prefix, IpNetwork::from_str("10.0.0.0/24").unwrap());
    assert_eq!(labeled.labels, Labels(vec![Label(0x80000)]));
}

//
// VPN-IPv4 (RFC 4364).
//

#[test]
fn test_vpn_ipv4() {
    let bytes = vec![
        0x70, 0x00, 0x06, 0x41, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00,
        0x01, 0x0a, 0x00, 0x00,
    ];
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::Vpn(VpnNlri {
            afi_safi: AfiSafi::Ipv4Vpn,
            rd: RouteDistinguisher::from_asn(65000, 1),
            labels: Labels(vec![Label(100)]),
            prefix: IpNetwork::from_str("10.0.0.0/24").unwrap(),
        }),
    };
    test_encode_nlri(&bytes, &nlri, false);
    test_decode_nlri(&bytes, &nlri, false, false);
}

//
// Route Target Constraint (RFC 4684).
//

#[test]
fn test_rtc() {
    let bytes = vec![
        0x60, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00,
        0x00, 0x01,
    ];
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::RouteTarget(RouteTargetNlri {
            prefix_len: 96,
            origin_as: 65000,
            route_target: Some(ExtComm::route_target(65000, 1)),
        }),
    };
    test_encode_nlri(&bytes, &nlri, false);
    test_decode_nlri(&bytes, &nlri, false, false);
}

#[test]
fn test_rtc_default() {
    let bytes = vec![0x00];
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::RouteTarget(RouteTargetNlri::DEFAULT),
    };
    test_encode_nlri(&bytes, &nlri, false);
    test_decode_nlri(&bytes, &nlri, false, false);
}

//
// EVPN MAC/IP Advertisement (RFC 7432).
//

#[test]
fn test_evpn_mac_ip() {
    let bytes = vec![
        0x02, 0x25, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x01, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x30, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x20, 0x0a,
        0x00, 0x00, 0x01, 0x00, 0x06, 0x41,
    ];
    let nlri = Nlri {
        path_id: None,
        value: NlriValue::Evpn(EvpnNlri::MacIpAdvertisement {
            rd: RouteDistinguisher::from_asn(65000, 1),
            esi: Esi::default(),
            ethernet_tag: 0,
            mac: MacAddr::from_str("aa:bb:cc:dd:ee:ff").unwrap(),
            ip: Some(IpAddr::from_str("10.0.0.1").unwrap()),
            labels: Labels(vec![Label(100)]),
        }),
    };
    test_encode_nlri(&bytes, &nlri, false);
    test_decode_nlri(&bytes, &nlri, false, false);
}

//
// ADD-PATH (RFC 7911).
//

#[test]
fn test_addpath() {
    let bytes = vec![0x00, 0x00, 0x00, 0x01, 0x20, 0x0a, 0x00, 0x00, 0x01];
    let mut nlri = Nlri::from(IpNetwork::from_str("10.0.0.1/32").unwrap());
    nlri.path_id = Some(PathId(1));
    test_encode_nlri(&bytes, &nlri, true);
    test_decode_nlri(&bytes, &nlri, false, true);
}

// A path identifier of zero is a valid identifier, kept as-is.
#[test]
fn test_addpath_zero() {
    let bytes = vec![0x00, 0x00, 0x00, 0x00, 0x20, 0x0a, 0x00, 0x00, 0x01];
    let mut nlri = Nlri::from(IpNetwork::from_str("10.0.0.1/32").unwrap());
    nlri.path_id = Some(PathId(0));
    test_encode_nlri(&bytes, &nlri, true);
    test_decode_nlri(&bytes, &nlri, false, true);
}

//
// Canonical RIB index.
//

#[test]
fn test_index_roundtrip() {
    let mut nlri = Nlri::from(IpNetwork::from_str("10.0.0.1/32").unwrap());
    nlri.path_id = Some(PathId(7));

    let index = nlri.index();
    let mut buf = index.clone();
    let decoded = Nlri::decode(nlri.afi_safi(), &mut buf, false, true)
        .unwrap()
        .unwrap();
    assert_eq!(nlri, decoded);
    assert_eq!(decoded.index(), index);
}
