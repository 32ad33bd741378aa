//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::str::FromStr;

use parley_bgp::api::{Command, CommandError};
use parley_bgp::packet::flowspec::{FlowComponent, FlowOp};
use parley_bgp::packet::nlri::NlriValue;
use parley_bgp::rib::Change;
use parley_utils::bgp::{AfiSafi, Comm, Origin, PathId};

//
// Command parsing.
//

#[test]
fn test_announce_route() {
    let command = Command::parse(
        "announce route 10.0.0.0/24 next-hop 192.0.2.1 med 100 \
         as-path [ 65001 65002 ] community [ no-export 65000:100 ] \
         origin egp",
    )
    .unwrap();

    let Command::AnnounceRoute {
        neighbors,
        change,
        watchdog,
    } = command
    else {
        panic!("unexpected command");
    };
    assert!(neighbors.is_empty());
    assert!(watchdog.is_none());

    let Change::Announce { nlri, attrs } = change else {
        panic!("unexpected change");
    };
    assert_eq!(nlri.to_string(), "10.0.0.0/24");
    assert_eq!(nlri.afi_safi(), AfiSafi::Ipv4Unicast);
    assert_eq!(
        attrs.base.nexthop,
        Some(IpAddr::from_str("192.0.2.1").unwrap())
    );
    assert_eq!(attrs.base.med, Some(100));
    assert_eq!(attrs.base.origin, Origin::Egp);
    assert_eq!(
        attrs.base.as_path.iter().collect::<Vec<_>>(),
        vec![65001, 65002]
    );
    let comm = attrs.comm.unwrap();
    assert!(comm.iter().any(|comm| *comm == Comm(0xFFFFFF01)));
    assert!(comm.iter().any(|comm| *comm == Comm(0xfde80064)));
}

#[test]
fn test_withdraw_route() {
    let command =
        Command::parse("withdraw route 10.0.0.0/24 next-hop 192.0.2.1")
            .unwrap();

    let Command::WithdrawRoute { change, .. } = command else {
        panic!("unexpected command");
    };
    assert!(matches!(change, Change::Withdraw { .. }));
}

// The "neighbor <ip>" prefix restricts the fan-out and may be repeated.
#[test]
fn test_neighbor_restriction() {
    let command = Command::parse(
        "neighbor 192.0.2.1 neighbor 192.0.2.2 announce route 10.0.0.0/24 \
         next-hop 192.0.2.254",
    )
    .unwrap();

    let Command::AnnounceRoute { neighbors, .. } = command else {
        panic!("unexpected command");
    };
    assert_eq!(
        neighbors,
        vec![
            IpAddr::from_str("192.0.2.1").unwrap(),
            IpAddr::from_str("192.0.2.2").unwrap(),
        ]
    );
}

// VPN qualifiers switch the family of the announced route.
#[test]
fn test_announce_vpn_route() {
    let command = Command::parse(
        "announce route 10.0.0.0/24 rd 65000:1 label [ 100 ] \
         next-hop 192.0.2.1",
    )
    .unwrap();

    let Command::AnnounceRoute { change, .. } = command else {
        panic!("unexpected command");
    };
    assert_eq!(change.nlri().afi_safi(), AfiSafi::Ipv4Vpn);
}

#[test]
fn test_announce_route_path_information() {
    let command = Command::parse(
        "announce route 10.0.0.1/32 next-hop 192.0.2.1 path-information 7",
    )
    .unwrap();

    let Command::AnnounceRoute { change, .. } = command else {
        panic!("unexpected command");
    };
    assert_eq!(change.nlri().path_id, Some(PathId(7)));
}

// Both the flattened form and the configuration block form of flow rules
// are accepted.
#[test]
fn test_announce_flow() {
    let command = Command::parse(
        "announce flow route { match { source 10.1.2.0/24; \
         destination 192.0.2.0/24; port =25; } then { discard; } }",
    )
    .unwrap();

    let Command::AnnounceFlow { change, .. } = command else {
        panic!("unexpected command");
    };
    let Change::Announce { nlri, attrs } = change else {
        panic!("unexpected change");
    };
    let NlriValue::Flowspec(flow) = &nlri.value else {
        panic!("unexpected NLRI kind");
    };

    // Components are reordered by ascending type.
    assert_eq!(
        flow.components,
        vec![
            FlowComponent::DestinationPrefix {
                prefix: "192.0.2.0/24".parse().unwrap(),
                offset: 0,
            },
            FlowComponent::SourcePrefix {
                prefix: "10.1.2.0/24".parse().unwrap(),
                offset: 0,
            },
            FlowComponent::Port(vec![FlowOp::eq(25)]),
        ]
    );

    // "discard" maps to a zero traffic-rate extended community.
    let ext_comm = attrs.ext_comm.expect("missing extended community");
    assert!(ext_comm.iter().any(|comm| comm.0[1] == 0x06));
}

#[test]
fn test_announce_eor() {
    let command = Command::parse("announce eor ipv6 unicast").unwrap();
    let Command::AnnounceEor { afi_safi, .. } = command else {
        panic!("unexpected command");
    };
    assert_eq!(afi_safi, AfiSafi::Ipv6Unicast);
}

#[test]
fn test_announce_route_refresh() {
    let command =
        Command::parse("announce route-refresh ipv4 unicast").unwrap();
    let Command::AnnounceRouteRefresh { afi_safi, .. } = command else {
        panic!("unexpected command");
    };
    assert_eq!(afi_safi, AfiSafi::Ipv4Unicast);
}

#[test]
fn test_watchdog() {
    for line in ["watchdog announce dns", "announce watchdog dns"] {
        let command = Command::parse(line).unwrap();
        let Command::Watchdog { name, announce, .. } = command else {
            panic!("unexpected command");
        };
        assert_eq!(name, "dns");
        assert!(announce);
    }

    let command = Command::parse("watchdog withdraw dns").unwrap();
    let Command::Watchdog { announce, .. } = command else {
        panic!("unexpected command");
    };
    assert!(!announce);
}

#[test]
fn test_process_commands() {
    assert_eq!(Command::parse("shutdown").unwrap(), Command::Shutdown);
    assert_eq!(Command::parse("restart").unwrap(), Command::Restart);
    assert_eq!(Command::parse("reload").unwrap(), Command::Reload);
    assert_eq!(
        Command::parse("show neighbor summary").unwrap(),
        Command::ShowNeighbor { extensive: false }
    );
    assert_eq!(
        Command::parse("show neighbor extensive").unwrap(),
        Command::ShowNeighbor { extensive: true }
    );
    assert_eq!(Command::parse("show routes").unwrap(), Command::ShowRoutes);
}

//
// Command errors.
//

// The "announce operational" verb is recognized but rejected, as the
// operational-message capability is never negotiated.
#[test]
fn test_announce_operational() {
    assert!(matches!(
        Command::parse("announce operational ADM afi ipv4 safi unicast"),
        Err(CommandError::InvalidArgument(_))
    ));
}

#[test]
fn test_unknown_command() {
    assert!(matches!(
        Command::parse("flush everything"),
        Err(CommandError::UnknownCommand(_))
    ));
}

#[test]
fn test_invalid_argument() {
    assert!(matches!(
        Command::parse("announce route not-a-prefix"),
        Err(CommandError::InvalidArgument(_))
    ));
    assert!(matches!(
        Command::parse("announce route 10.0.0.0/24 next-hop bogus"),
        Err(CommandError::InvalidArgument(_))
    ));
    assert!(matches!(
        Command::parse("announce eor ipv4 bogus"),
        Err(CommandError::InvalidArgument(_))
    ));
}
