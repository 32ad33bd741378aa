//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

//! BGP value types shared by the wire codec, the RIB and the API encoder.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::bytes::{BytesExt, BytesMutExt};

// Supported (AFI,SAFI) tuples.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AfiSafi {
    Ipv4Unicast,
    Ipv4Multicast,
    Ipv4LabeledUnicast,
    Ipv4Vpn,
    Ipv4Flowspec,
    Ipv4Mup,
    Ipv6Unicast,
    Ipv6Multicast,
    Ipv6LabeledUnicast,
    Ipv6Vpn,
    Ipv6Flowspec,
    Ipv6Mup,
    Ipv4RouteTarget,
    Ipv4MulticastVpn,
    L2VpnVpls,
    L2VpnEvpn,
    LinkState,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteType {
    Internal,
    External,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comm(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ExtComm(pub [u8; 8]);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Extv6Comm(pub Ipv6Addr, pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LargeComm(pub [u8; 12]);

// BGP Well-known Communities.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-well-known-communities/bgp-well-known-communities.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[repr(u32)]
pub enum WellKnownCommunities {
    Blackhole = 0xFFFF029A,
    NoExport = 0xFFFFFF01,
    NoAdvertise = 0xFFFFFF02,
    NoExportSubconfed = 0xFFFFFF03,
    NoPeer = 0xFFFFFF04,
}

// Route Distinguisher (RFC 4364).
//
// Three type encodings exist (2-byte ASN, IPv4 address and 4-byte ASN
// administrators); anything else is displayed as opaque hexadecimal.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct RouteDistinguisher(pub [u8; 8]);

// A single 20-bit MPLS label.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Label(pub u32);

// An MPLS label stack (RFC 3107).
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Labels(pub Vec<Label>);

// Add-Path path identifier (RFC 7911).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct PathId(pub u32);

// ===== impl AfiSafi =====

impl AfiSafi {
    // All tuples the codec knows how to encode and decode.
    pub const ALL: [AfiSafi; 17] = [
        AfiSafi::Ipv4Unicast,
        AfiSafi::Ipv4Multicast,
        AfiSafi::Ipv4LabeledUnicast,
        AfiSafi::Ipv4Vpn,
        AfiSafi::Ipv4Flowspec,
        AfiSafi::Ipv4Mup,
        AfiSafi::Ipv6Unicast,
        AfiSafi::Ipv6Multicast,
        AfiSafi::Ipv6LabeledUnicast,
        AfiSafi::Ipv6Vpn,
        AfiSafi::Ipv6Flowspec,
        AfiSafi::Ipv6Mup,
        AfiSafi::Ipv4RouteTarget,
        AfiSafi::Ipv4MulticastVpn,
        AfiSafi::L2VpnVpls,
        AfiSafi::L2VpnEvpn,
        AfiSafi::LinkState,
    ];
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AfiSafi::Ipv4Unicast => "ipv4 unicast",
            AfiSafi::Ipv4Multicast => "ipv4 multicast",
            AfiSafi::Ipv4LabeledUnicast => "ipv4 nlri-mpls",
            AfiSafi::Ipv4Vpn => "ipv4 mpls-vpn",
            AfiSafi::Ipv4Flowspec => "ipv4 flow",
            AfiSafi::Ipv4Mup => "ipv4 mup",
            AfiSafi::Ipv6Unicast => "ipv6 unicast",
            AfiSafi::Ipv6Multicast => "ipv6 multicast",
            AfiSafi::Ipv6LabeledUnicast => "ipv6 nlri-mpls",
            AfiSafi::Ipv6Vpn => "ipv6 mpls-vpn",
            AfiSafi::Ipv6Flowspec => "ipv6 flow",
            AfiSafi::Ipv6Mup => "ipv6 mup",
            AfiSafi::Ipv4RouteTarget => "ipv4 rtc",
            AfiSafi::Ipv4MulticastVpn => "ipv4 mcast-vpn",
            AfiSafi::L2VpnVpls => "l2vpn vpls",
            AfiSafi::L2VpnEvpn => "l2vpn evpn",
            AfiSafi::LinkState => "bgp-ls bgp-ls",
        };
        write!(f, "{}", name)
    }
}

// ===== impl Origin =====

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Igp => write!(f, "igp"),
            Origin::Egp => write!(f, "egp"),
            Origin::Incomplete => write!(f, "incomplete"),
        }
    }
}

impl std::str::FromStr for Origin {
    type Err = ();

    fn from_str(s: &str) -> Result<Origin, ()> {
        match s {
            "igp" => Ok(Origin::Igp),
            "egp" => Ok(Origin::Egp),
            "incomplete" => Ok(Origin::Incomplete),
            _ => Err(()),
        }
    }
}

// ===== impl Comm =====

impl std::fmt::Display for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match WellKnownCommunities::from_u32(self.0) {
            Some(WellKnownCommunities::Blackhole) => write!(f, "blackhole"),
            Some(WellKnownCommunities::NoExport) => write!(f, "no-export"),
            Some(WellKnownCommunities::NoAdvertise) => {
                write!(f, "no-advertise")
            }
            Some(WellKnownCommunities::NoExportSubconfed) => {
                write!(f, "no-export-sub-confed")
            }
            Some(WellKnownCommunities::NoPeer) => write!(f, "no-peer"),
            None => write!(f, "{}:{}", self.0 >> 16, self.0 & 0xFFFF),
        }
    }
}

impl std::str::FromStr for Comm {
    type Err = ();

    fn from_str(s: &str) -> Result<Comm, ()> {
        match s {
            "blackhole" => {
                return Ok(Comm(WellKnownCommunities::Blackhole as u32));
            }
            "no-export" => {
                return Ok(Comm(WellKnownCommunities::NoExport as u32));
            }
            "no-advertise" => {
                return Ok(Comm(WellKnownCommunities::NoAdvertise as u32));
            }
            "no-export-sub-confed" => {
                return Ok(Comm(WellKnownCommunities::NoExportSubconfed as u32));
            }
            "no-peer" => {
                return Ok(Comm(WellKnownCommunities::NoPeer as u32));
            }
            _ => {}
        }
        if let Ok(comm) = s.parse::<u32>() {
            return Ok(Comm(comm));
        }
        let (global, local) = s.split_once(':').ok_or(())?;
        let global = global.parse::<u16>().map_err(|_| ())?;
        let local = local.parse::<u16>().map_err(|_| ())?;
        Ok(Comm(((global as u32) << 16) | local as u32))
    }
}

// ===== impl ExtComm =====

impl ExtComm {
    // High-order byte values (type + transitivity).
    pub const TYPE_TRANS_AS2: u8 = 0x00;
    pub const TYPE_TRANS_IPV4: u8 = 0x01;
    pub const TYPE_TRANS_AS4: u8 = 0x02;
    pub const TYPE_TRANS_OPAQUE: u8 = 0x03;
    pub const TYPE_GENERIC_EXPERIMENTAL: u8 = 0x80;
    pub const TYPE_GENERIC_EXPERIMENTAL_2: u8 = 0x81;

    // Low-order type byte (sub-type) values.
    pub const SUBTYPE_ROUTE_TARGET: u8 = 0x02;
    pub const SUBTYPE_ROUTE_ORIGIN: u8 = 0x03;
    pub const SUBTYPE_ENCAPSULATION: u8 = 0x0C;
    pub const SUBTYPE_TRAFFIC_RATE: u8 = 0x06;
    pub const SUBTYPE_TRAFFIC_ACTION: u8 = 0x07;
    pub const SUBTYPE_TRAFFIC_REDIRECT: u8 = 0x08;
    pub const SUBTYPE_TRAFFIC_MARK: u8 = 0x09;

    // Route Target with a 2-byte or 4-byte ASN administrator (RFC 4360).
    pub fn route_target(asn: u32, local: u32) -> ExtComm {
        let mut value = [0; 8];
        if asn > u16::MAX as u32 {
            value[0] = Self::TYPE_TRANS_AS4;
            value[1] = Self::SUBTYPE_ROUTE_TARGET;
            value[2..6].copy_from_slice(&asn.to_be_bytes());
            value[6..8].copy_from_slice(&(local as u16).to_be_bytes());
        } else {
            value[0] = Self::TYPE_TRANS_AS2;
            value[1] = Self::SUBTYPE_ROUTE_TARGET;
            value[2..4].copy_from_slice(&(asn as u16).to_be_bytes());
            value[4..8].copy_from_slice(&local.to_be_bytes());
        }
        ExtComm(value)
    }

    // Route Target with an IPv4 address administrator.
    pub fn route_target_ipv4(addr: Ipv4Addr, local: u16) -> ExtComm {
        let mut value = [0; 8];
        value[0] = Self::TYPE_TRANS_IPV4;
        value[1] = Self::SUBTYPE_ROUTE_TARGET;
        value[2..6].copy_from_slice(&addr.octets());
        value[6..8].copy_from_slice(&local.to_be_bytes());
        ExtComm(value)
    }

    // Route Origin (RFC 4360).
    pub fn route_origin(asn: u16, local: u32) -> ExtComm {
        let mut value = [0; 8];
        value[0] = Self::TYPE_TRANS_AS2;
        value[1] = Self::SUBTYPE_ROUTE_ORIGIN;
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&local.to_be_bytes());
        ExtComm(value)
    }

    // Flow-Spec traffic-rate action (RFC 5575). A rate of zero discards
    // all matching traffic.
    pub fn traffic_rate(asn: u16, rate: f32) -> ExtComm {
        let mut value = [0; 8];
        value[0] = Self::TYPE_GENERIC_EXPERIMENTAL;
        value[1] = Self::SUBTYPE_TRAFFIC_RATE;
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&rate.to_be_bytes());
        ExtComm(value)
    }

    // Flow-Spec traffic-action flags (RFC 5575).
    pub fn traffic_action(sample: bool, terminal: bool) -> ExtComm {
        let mut value = [0; 8];
        value[0] = Self::TYPE_GENERIC_EXPERIMENTAL;
        value[1] = Self::SUBTYPE_TRAFFIC_ACTION;
        value[7] = ((sample as u8) << 1) | terminal as u8;
        ExtComm(value)
    }

    // Flow-Spec redirect to VRF (RFC 5575).
    pub fn redirect(asn: u16, local: u32) -> ExtComm {
        let mut value = [0; 8];
        value[0] = Self::TYPE_GENERIC_EXPERIMENTAL;
        value[1] = Self::SUBTYPE_TRAFFIC_REDIRECT;
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&local.to_be_bytes());
        ExtComm(value)
    }

    // Flow-Spec traffic-marking (RFC 5575). Rewrites the DSCP value.
    pub fn traffic_mark(dscp: u8) -> ExtComm {
        let mut value = [0; 8];
        value[0] = Self::TYPE_GENERIC_EXPERIMENTAL;
        value[1] = Self::SUBTYPE_TRAFFIC_MARK;
        value[7] = dscp & 0x3F;
        ExtComm(value)
    }

    pub fn is_route_target(&self) -> bool {
        matches!(
            self.0[0],
            Self::TYPE_TRANS_AS2 | Self::TYPE_TRANS_IPV4 | Self::TYPE_TRANS_AS4
        ) && self.0[1] == Self::SUBTYPE_ROUTE_TARGET
    }

    pub fn is_transitive(&self) -> bool {
        self.0[0] & 0x40 == 0
    }
}

impl std::fmt::Display for ExtComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = &self.0;
        match (value[0], value[1]) {
            (Self::TYPE_TRANS_AS2, Self::SUBTYPE_ROUTE_TARGET) => {
                let asn = u16::from_be_bytes([value[2], value[3]]);
                let local = u32::from_be_bytes([
                    value[4], value[5], value[6], value[7],
                ]);
                write!(f, "target:{}:{}", asn, local)
            }
            (Self::TYPE_TRANS_AS4, Self::SUBTYPE_ROUTE_TARGET) => {
                let asn = u32::from_be_bytes([
                    value[2], value[3], value[4], value[5],
                ]);
                let local = u16::from_be_bytes([value[6], value[7]]);
                write!(f, "target:{}:{}", asn, local)
            }
            (Self::TYPE_TRANS_IPV4, Self::SUBTYPE_ROUTE_TARGET) => {
                let addr =
                    Ipv4Addr::new(value[2], value[3], value[4], value[5]);
                let local = u16::from_be_bytes([value[6], value[7]]);
                write!(f, "target:{}:{}", addr, local)
            }
            (Self::TYPE_GENERIC_EXPERIMENTAL, Self::SUBTYPE_TRAFFIC_RATE) => {
                let rate = f32::from_be_bytes([
                    value[4], value[5], value[6], value[7],
                ]);
                write!(f, "rate-limit {}", rate)
            }
            _ => {
                write!(
                    f,
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    value[0],
                    value[1],
                    value[2],
                    value[3],
                    value[4],
                    value[5],
                    value[6],
                    value[7]
                )
            }
        }
    }
}

// ===== impl LargeComm =====

impl std::fmt::Display for LargeComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            u32::from_be_bytes(self.0[0..4].try_into().unwrap()),
            u32::from_be_bytes(self.0[4..8].try_into().unwrap()),
            u32::from_be_bytes(self.0[8..12].try_into().unwrap()),
        )
    }
}

impl std::str::FromStr for LargeComm {
    type Err = ();

    fn from_str(s: &str) -> Result<LargeComm, ()> {
        let mut parts = s.split(':');
        let global = parts.next().ok_or(())?.parse::<u32>().map_err(|_| ())?;
        let local1 = parts.next().ok_or(())?.parse::<u32>().map_err(|_| ())?;
        let local2 = parts.next().ok_or(())?.parse::<u32>().map_err(|_| ())?;
        if parts.next().is_some() {
            return Err(());
        }

        let mut comm = [0u8; 12];
        comm[..4].copy_from_slice(&global.to_be_bytes());
        comm[4..8].copy_from_slice(&local1.to_be_bytes());
        comm[8..].copy_from_slice(&local2.to_be_bytes());
        Ok(LargeComm(comm))
    }
}

// ===== impl RouteDistinguisher =====

impl RouteDistinguisher {
    pub const TYPE_AS2_ADMIN: u16 = 0;
    pub const TYPE_IPV4_ADMIN: u16 = 1;
    pub const TYPE_AS4_ADMIN: u16 = 2;
    pub const LENGTH: usize = 8;

    pub fn from_asn(asn: u32, assigned: u32) -> RouteDistinguisher {
        let mut rd = [0; 8];
        if asn > u16::MAX as u32 {
            rd[0..2].copy_from_slice(&Self::TYPE_AS4_ADMIN.to_be_bytes());
            rd[2..6].copy_from_slice(&asn.to_be_bytes());
            rd[6..8].copy_from_slice(&(assigned as u16).to_be_bytes());
        } else {
            rd[0..2].copy_from_slice(&Self::TYPE_AS2_ADMIN.to_be_bytes());
            rd[2..4].copy_from_slice(&(asn as u16).to_be_bytes());
            rd[4..8].copy_from_slice(&assigned.to_be_bytes());
        }
        RouteDistinguisher(rd)
    }

    pub fn from_ipv4(addr: Ipv4Addr, assigned: u16) -> RouteDistinguisher {
        let mut rd = [0; 8];
        rd[0..2].copy_from_slice(&Self::TYPE_IPV4_ADMIN.to_be_bytes());
        rd[2..6].copy_from_slice(&addr.octets());
        rd[6..8].copy_from_slice(&assigned.to_be_bytes());
        RouteDistinguisher(rd)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    pub fn decode(buf: &mut Bytes) -> RouteDistinguisher {
        let mut rd = [0; 8];
        buf.copy_to_slice(&mut rd);
        RouteDistinguisher(rd)
    }
}

impl std::fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rd = &self.0;
        let rd_type = u16::from_be_bytes([rd[0], rd[1]]);
        match rd_type {
            Self::TYPE_AS2_ADMIN => {
                let asn = u16::from_be_bytes([rd[2], rd[3]]);
                let assigned =
                    u32::from_be_bytes([rd[4], rd[5], rd[6], rd[7]]);
                write!(f, "{}:{}", asn, assigned)
            }
            Self::TYPE_IPV4_ADMIN => {
                let addr = Ipv4Addr::new(rd[2], rd[3], rd[4], rd[5]);
                let assigned = u16::from_be_bytes([rd[6], rd[7]]);
                write!(f, "{}:{}", addr, assigned)
            }
            Self::TYPE_AS4_ADMIN => {
                let asn = u32::from_be_bytes([rd[2], rd[3], rd[4], rd[5]]);
                let assigned = u16::from_be_bytes([rd[6], rd[7]]);
                write!(f, "{}:{}", asn, assigned)
            }
            _ => {
                for byte in rd {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl std::str::FromStr for RouteDistinguisher {
    type Err = ();

    fn from_str(s: &str) -> Result<RouteDistinguisher, ()> {
        let (admin, assigned) = s.split_once(':').ok_or(())?;
        if admin.contains('.') {
            let addr = admin.parse::<Ipv4Addr>().map_err(|_| ())?;
            let assigned = assigned.parse::<u16>().map_err(|_| ())?;
            Ok(RouteDistinguisher::from_ipv4(addr, assigned))
        } else {
            let asn = admin.parse::<u32>().map_err(|_| ())?;
            let assigned = assigned.parse::<u32>().map_err(|_| ())?;
            if asn > u16::MAX as u32 && assigned > u16::MAX as u32 {
                return Err(());
            }
            Ok(RouteDistinguisher::from_asn(asn, assigned))
        }
    }
}

// ===== impl Label =====

impl Label {
    pub const MAX: u32 = (1 << 20) - 1;

    // Reserved value signaling a label withdrawal (RFC 3107 as clarified by
    // RFC 8277 - the "Compatibility" value).
    pub const WITHDRAW: u32 = 0x80000;
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ===== impl Labels =====

impl Labels {
    // Encodes the label stack, setting the bottom-of-stack bit on the last
    // entry.
    pub fn encode(&self, buf: &mut BytesMut) {
        for (pos, label) in self.0.iter().enumerate() {
            let mut value = label.0 << 4;
            if pos == self.0.len() - 1 {
                value |= 1;
            }
            buf.put_u24(value);
        }
    }

    // Decodes a label stack, stopping at the bottom-of-stack bit.
    //
    // In the withdraw direction a stack consisting of the single reserved
    // withdraw label (0x800000 on the wire) terminates the stack without a
    // bottom-of-stack bit.
    pub fn decode(buf: &mut Bytes, withdraw: bool) -> Labels {
        let mut labels = Vec::new();
        while buf.remaining() >= 3 {
            let value = buf.get_u24();
            labels.push(Label(value >> 4));
            if value & 0x001 != 0 {
                break;
            }
            if withdraw && value == 0x800000 {
                break;
            }
        }
        Labels(labels)
    }

    // Number of bytes the encoded stack occupies.
    pub fn length(&self) -> usize {
        self.0.len() * 3
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (pos, label) in self.0.iter().enumerate() {
            if pos > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", label)?;
        }
        write!(f, "]")
    }
}

// ===== impl PathId =====

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
