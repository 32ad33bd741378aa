//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

use parley_bgp::packet::consts::{
    AddPathMode, Afi, BGP_VERSION, GrAfiSafiFlags, GrFlags, Safi,
};
use parley_bgp::packet::message::{
    AddPathTuple, Capability, GracefulRestart, Message, Negotiated, OpenMsg,
};
use parley_utils::bgp::AfiSafi;

//
// Helper functions.
//

fn open(asn: u16, holdtime: u16, capabilities: BTreeSet<Capability>) -> OpenMsg {
    OpenMsg {
        version: BGP_VERSION,
        my_as: asn,
        holdtime,
        identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
        capabilities,
    }
}

fn mp(afi: Afi, safi: Safi) -> Capability {
    Capability::MultiProtocol { afi, safi }
}

//
// Capability negotiation.
//

// The session families are the intersection of the advertised
// multiprotocol capabilities.
#[test]
fn test_families_intersection() {
    let sent = open(
        1,
        180,
        [
            mp(Afi::Ipv4, Safi::Unicast),
            mp(Afi::Ipv6, Safi::Unicast),
            mp(Afi::Ipv4, Safi::Flowspec),
        ]
        .into(),
    );
    let received = open(
        2,
        180,
        [mp(Afi::Ipv4, Safi::Unicast), mp(Afi::Ipv4, Safi::Flowspec)].into(),
    );

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert_eq!(
        negotiated.families,
        [AfiSafi::Ipv4Unicast, AfiSafi::Ipv4Flowspec].into()
    );
}

// Peers that advertise no multiprotocol capability fall back to the
// implicit IPv4 unicast session.
#[test]
fn test_families_default() {
    let sent = open(1, 180, [mp(Afi::Ipv4, Safi::Unicast)].into());
    let received = open(2, 180, [].into());

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert_eq!(negotiated.families, [AfiSafi::Ipv4Unicast].into());
}

// 4-octet AS numbers apply only when both sides advertise the capability,
// and AS_TRANS in the OPEN is resolved through it.
#[test]
fn test_asn4() {
    let sent = open(
        23456,
        180,
        [Capability::FourOctetAsNumber { asn: 70000 }].into(),
    );
    let received = open(
        23456,
        180,
        [Capability::FourOctetAsNumber { asn: 70001 }].into(),
    );

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert!(negotiated.asn4);
    assert_eq!(negotiated.local_as, 70000);
    assert_eq!(negotiated.peer_as, 70001);

    // One-sided advertisement disables it.
    let received = open(65001, 180, [].into());
    let negotiated = Negotiated::negotiate(&sent, &received);
    assert!(!negotiated.asn4);
    assert_eq!(negotiated.peer_as, 65001);
}

// ADD-PATH is directional: sending requires the local "send" and the
// remote "receive" halves.
#[test]
fn test_addpath_directional() {
    let sent = open(
        1,
        180,
        [Capability::AddPath(
            [AddPathTuple {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
                mode: AddPathMode::Send,
            }]
            .into(),
        )]
        .into(),
    );
    let received = open(
        2,
        180,
        [Capability::AddPath(
            [AddPathTuple {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
                mode: AddPathMode::Receive,
            }]
            .into(),
        )]
        .into(),
    );

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert_eq!(negotiated.addpath_tx, [AfiSafi::Ipv4Unicast].into());
    assert!(negotiated.addpath_rx.is_empty());

    // Symmetric "send/receive" on both sides enables both directions.
    let both = open(
        1,
        180,
        [Capability::AddPath(
            [AddPathTuple {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
                mode: AddPathMode::ReceiveSend,
            }]
            .into(),
        )]
        .into(),
    );
    let negotiated = Negotiated::negotiate(&both, &both.clone());
    assert_eq!(negotiated.addpath_tx, [AfiSafi::Ipv4Unicast].into());
    assert_eq!(negotiated.addpath_rx, [AfiSafi::Ipv4Unicast].into());
}

// The hold-time is the minimum of both offers.
#[test]
fn test_holdtime_min() {
    let sent = open(1, 90, [].into());
    let received = open(2, 30, [].into());

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert_eq!(negotiated.holdtime, 30);
}

// Extended messages raise the per-message size cap to 65535.
#[test]
fn test_extended_message() {
    let sent = open(1, 180, [Capability::ExtendedMessage].into());
    let received = open(2, 180, [Capability::ExtendedMessage].into());

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert_eq!(negotiated.max_msg_size, Message::MAX_LEN_EXT);

    let received = open(2, 180, [].into());
    let negotiated = Negotiated::negotiate(&sent, &received);
    assert_eq!(negotiated.max_msg_size, Message::MAX_LEN);
}

// The Cisco route-refresh variant is accepted interchangeably with the
// RFC one.
#[test]
fn test_route_refresh_variants() {
    let sent = open(1, 180, [Capability::RouteRefresh].into());
    let received = open(2, 180, [Capability::CiscoRouteRefresh].into());

    let negotiated = Negotiated::negotiate(&sent, &received);
    assert!(negotiated.route_refresh);
}

// Graceful restart parameters come from the peer's advertisement.
#[test]
fn test_graceful_restart() {
    let gr = |restart_time, flags| {
        Capability::GracefulRestart(GracefulRestart {
            restart_time,
            flags,
            families: [(
                (Afi::Ipv4, Safi::Unicast),
                GrAfiSafiFlags::FORWARDING,
            )]
            .into(),
        })
    };

    let sent = open(1, 180, [gr(120, GrFlags::empty())].into());
    let received = open(2, 180, [gr(60, GrFlags::RESTART_STATE)].into());

    let negotiated = Negotiated::negotiate(&sent, &received);
    let gr_nego = negotiated.graceful_restart.expect("missing GR parameters");
    assert_eq!(gr_nego.restart_time, 60);
    assert!(gr_nego.restarting);
    assert_eq!(gr_nego.families[&AfiSafi::Ipv4Unicast], true);

    // One-sided advertisement disables it.
    let received = open(2, 180, [].into());
    let negotiated = Negotiated::negotiate(&sent, &received);
    assert!(negotiated.graceful_restart.is_none());
}
