//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use parley_utils::bgp::AfiSafi;

use crate::packet::attribute::BaseAttrs;
use crate::packet::consts::{Afi, Safi};
use crate::packet::message::MpNexthop;

// BGP address-family specific code.
//
// Bridges the configurable `AfiSafi` tuples to their wire identifiers and
// to the family-specific encoding rules consulted by the UPDATE generation
// pipeline.
pub trait AfiSafiExt: Sized {
    // Address Family Identifier.
    fn afi(&self) -> Afi;

    // Subsequent Address Family Identifier.
    fn safi(&self) -> Safi;

    // Maps a wire (AFI, SAFI) pair back to the corresponding tuple.
    fn from_pair(afi: Afi, safi: Safi) -> Option<Self>;

    // Whether announcements of this family may use the original RFC 4271
    // encoding (trailing NLRI section plus the NEXT_HOP attribute) instead
    // of MP_REACH_NLRI.
    fn is_legacy_unicast(&self) -> bool;

    // Builds the MP_REACH_NLRI next hop for this family from the route's
    // base attributes.
    fn mp_nexthop(&self, attrs: &BaseAttrs) -> MpNexthop;
}

impl AfiSafiExt for AfiSafi {
    fn afi(&self) -> Afi {
        match self {
            AfiSafi::Ipv4Unicast
            | AfiSafi::Ipv4Multicast
            | AfiSafi::Ipv4LabeledUnicast
            | AfiSafi::Ipv4Vpn
            | AfiSafi::Ipv4Flowspec
            | AfiSafi::Ipv4Mup
            | AfiSafi::Ipv4RouteTarget
            | AfiSafi::Ipv4MulticastVpn => Afi::Ipv4,
            AfiSafi::Ipv6Unicast
            | AfiSafi::Ipv6Multicast
            | AfiSafi::Ipv6LabeledUnicast
            | AfiSafi::Ipv6Vpn
            | AfiSafi::Ipv6Flowspec
            | AfiSafi::Ipv6Mup => Afi::Ipv6,
            AfiSafi::L2VpnVpls | AfiSafi::L2VpnEvpn => Afi::L2vpn,
            AfiSafi::LinkState => Afi::BgpLs,
        }
    }

    fn safi(&self) -> Safi {
        match self {
            AfiSafi::Ipv4Unicast | AfiSafi::Ipv6Unicast => Safi::Unicast,
            AfiSafi::Ipv4Multicast | AfiSafi::Ipv6Multicast => {
                Safi::Multicast
            }
            AfiSafi::Ipv4LabeledUnicast | AfiSafi::Ipv6LabeledUnicast => {
                Safi::LabeledUnicast
            }
            AfiSafi::Ipv4Vpn | AfiSafi::Ipv6Vpn => Safi::LabeledVpn,
            AfiSafi::Ipv4Flowspec | AfiSafi::Ipv6Flowspec => Safi::Flowspec,
            AfiSafi::Ipv4Mup | AfiSafi::Ipv6Mup => Safi::Mup,
            AfiSafi::Ipv4RouteTarget => Safi::RouteTarget,
            AfiSafi::Ipv4MulticastVpn => Safi::MulticastVpn,
            AfiSafi::L2VpnVpls => Safi::Vpls,
            AfiSafi::L2VpnEvpn => Safi::Evpn,
            AfiSafi::LinkState => Safi::BgpLs,
        }
    }

    fn from_pair(afi: Afi, safi: Safi) -> Option<AfiSafi> {
        let afi_safi = match (afi, safi) {
            (Afi::Ipv4, Safi::Unicast) => AfiSafi::Ipv4Unicast,
            (Afi::Ipv4, Safi::Multicast) => AfiSafi::Ipv4Multicast,
            (Afi::Ipv4, Safi::LabeledUnicast) => AfiSafi::Ipv4LabeledUnicast,
            (Afi::Ipv4, Safi::LabeledVpn) => AfiSafi::Ipv4Vpn,
            (Afi::Ipv4, Safi::Flowspec) => AfiSafi::Ipv4Flowspec,
            (Afi::Ipv4, Safi::Mup) => AfiSafi::Ipv4Mup,
            (Afi::Ipv4, Safi::RouteTarget) => AfiSafi::Ipv4RouteTarget,
            (Afi::Ipv4, Safi::MulticastVpn) => AfiSafi::Ipv4MulticastVpn,
            (Afi::Ipv6, Safi::Unicast) => AfiSafi::Ipv6Unicast,
            (Afi::Ipv6, Safi::Multicast) => AfiSafi::Ipv6Multicast,
            (Afi::Ipv6, Safi::LabeledUnicast) => AfiSafi::Ipv6LabeledUnicast,
            (Afi::Ipv6, Safi::LabeledVpn) => AfiSafi::Ipv6Vpn,
            (Afi::Ipv6, Safi::Flowspec) => AfiSafi::Ipv6Flowspec,
            (Afi::Ipv6, Safi::Mup) => AfiSafi::Ipv6Mup,
            (Afi::L2vpn, Safi::Vpls) => AfiSafi::L2VpnVpls,
            (Afi::L2vpn, Safi::Evpn) => AfiSafi::L2VpnEvpn,
            (Afi::BgpLs, Safi::BgpLs) => AfiSafi::LinkState,
            _ => return None,
        };
        Some(afi_safi)
    }

    fn is_legacy_unicast(&self) -> bool {
        *self == AfiSafi::Ipv4Unicast
    }

    fn mp_nexthop(&self, attrs: &BaseAttrs) -> MpNexthop {
        match self {
            AfiSafi::Ipv4Vpn => MpNexthop::VpnIpv4(
                attrs
                    .nexthop
                    .and_then(|addr| match addr {
                        IpAddr::V4(addr) => Some(addr),
                        IpAddr::V6(_) => None,
                    })
                    .unwrap_or(Ipv4Addr::UNSPECIFIED),
            ),
            AfiSafi::Ipv6Vpn => MpNexthop::VpnIpv6(
                attrs
                    .nexthop
                    .and_then(|addr| match addr {
                        IpAddr::V6(addr) => Some(addr),
                        IpAddr::V4(_) => None,
                    })
                    .unwrap_or(Ipv6Addr::UNSPECIFIED),
            ),
            _ => match attrs.nexthop {
                Some(IpAddr::V4(addr)) => MpNexthop::Ipv4(addr),
                Some(IpAddr::V6(addr)) => MpNexthop::Ipv6 {
                    global: addr,
                    link_local: attrs.ll_nexthop,
                },
                // Flow-Spec rules carry no next hop; a zero-length next
                // hop field is not allowed, so advertise the unspecified
                // address of the family.
                None => match self.afi() {
                    Afi::Ipv4 => MpNexthop::Ipv4(Ipv4Addr::UNSPECIFIED),
                    _ => MpNexthop::Ipv6 {
                        global: Ipv6Addr::UNSPECIFIED,
                        link_local: None,
                    },
                },
            },
        }
    }
}
