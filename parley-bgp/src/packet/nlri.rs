//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use num_traits::FromPrimitive;
use parley_utils::bgp::{AfiSafi, ExtComm, Labels, PathId, RouteDistinguisher};
use parley_utils::bytes::{BytesExt, BytesMutExt};
use parley_utils::ip::{
    Ipv4AddrExt, Ipv4NetworkExt, Ipv6AddrExt, Ipv6NetworkExt,
};
use parley_utils::mac_addr::MacAddr;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafiExt;
use crate::packet::consts::{
    Afi, EvpnRouteType, LsNlriType, LsProtocolId, LsTlvType, MupRouteType,
    MvpnRouteType,
};
use crate::packet::error::UpdateMessageError;
use crate::packet::flowspec::FlowspecNlri;

//
// One NLRI of any supported address family.
//
// When the ADD-PATH capability has been negotiated for the family, the NLRI
// is preceded on the wire by a 4-octet path identifier:
//
// +--------------------------------+
// | Path Identifier (4 octets)     |
// +--------------------------------+
// | Network Layer Reachability     |
// | Information (variable)         |
// +--------------------------------+
//
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Nlri {
    pub path_id: Option<PathId>,
    pub value: NlriValue,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum NlriValue {
    Unicast(UnicastNlri),
    Labeled(LabeledNlri),
    Vpn(VpnNlri),
    Flowspec(FlowspecNlri),
    Evpn(EvpnNlri),
    Vpls(VplsNlri),
    Mvpn(MvpnNlri),
    RouteTarget(RouteTargetNlri),
    Mup(MupNlri),
    LinkState(LsNlri),
}

// IPv4/IPv6 unicast and multicast prefix (RFC 4271 / RFC 4760).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct UnicastNlri {
    pub afi_safi: AfiSafi,
    pub prefix: IpNetwork,
}

// Labeled unicast prefix (RFC 3107).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LabeledNlri {
    pub afi_safi: AfiSafi,
    pub prefix: IpNetwork,
    pub labels: Labels,
}

// VPN-IPv4/VPN-IPv6 prefix (RFC 4364 / RFC 4659).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct VpnNlri {
    pub afi_safi: AfiSafi,
    pub rd: RouteDistinguisher,
    pub labels: Labels,
    pub prefix: IpNetwork,
}

// Ethernet Segment Identifier (RFC 7432).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Esi(pub [u8; 10]);

//
// EVPN route (RFC 7432).
//
// Encoding format:
//
// +-----------------------------------+
// |    Route Type (1 octet)           |
// +-----------------------------------+
// |     Length (1 octet)              |
// +-----------------------------------+
// | Route Type specific (variable)    |
// +-----------------------------------+
//
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum EvpnNlri {
    EthernetAutoDiscovery {
        rd: RouteDistinguisher,
        esi: Esi,
        ethernet_tag: u32,
        label: u32,
    },
    MacIpAdvertisement {
        rd: RouteDistinguisher,
        esi: Esi,
        ethernet_tag: u32,
        mac: MacAddr,
        ip: Option<IpAddr>,
        labels: Labels,
    },
    InclusiveMulticast {
        rd: RouteDistinguisher,
        ethernet_tag: u32,
        originator: IpAddr,
    },
    EthernetSegment {
        rd: RouteDistinguisher,
        esi: Esi,
        originator: IpAddr,
    },
    IpPrefix {
        rd: RouteDistinguisher,
        esi: Esi,
        ethernet_tag: u32,
        prefix: IpNetwork,
        gateway: IpAddr,
        label: u32,
    },
    Unknown {
        route_type: u8,
        value: Bytes,
    },
}

// VPLS information (RFC 4761).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct VplsNlri {
    pub rd: RouteDistinguisher,
    pub ve_id: u16,
    pub ve_block_offset: u16,
    pub ve_block_size: u16,
    pub label_base: u32,
}

// Multicast VPN route (RFC 6514).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MvpnNlri {
    IntraAsIPmsiAd {
        rd: RouteDistinguisher,
        originator: IpAddr,
    },
    InterAsIPmsiAd {
        rd: RouteDistinguisher,
        source_as: u32,
    },
    SPmsiAd {
        rd: RouteDistinguisher,
        source: IpAddr,
        group: IpAddr,
        originator: IpAddr,
    },
    LeafAd {
        route_key: Bytes,
    },
    SourceActiveAd {
        rd: RouteDistinguisher,
        source: IpAddr,
        group: IpAddr,
    },
    SharedTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: IpAddr,
        group: IpAddr,
    },
    SourceTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: IpAddr,
        group: IpAddr,
    },
    Unknown {
        route_type: u8,
        value: Bytes,
    },
}

// Route Target Constraint (RFC 4684).
//
// A zero prefix length denotes the default route target, used to request
// the full set of VPN routes from the peer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct RouteTargetNlri {
    pub prefix_len: u8,
    pub origin_as: u32,
    pub route_target: Option<ExtComm>,
}

// BGP Mobile User Plane route (draft-mpmz-bess-mup-safi).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MupNlri {
    InterworkSegmentDiscovery {
        rd: RouteDistinguisher,
        prefix: IpNetwork,
    },
    DirectSegmentDiscovery {
        rd: RouteDistinguisher,
        address: IpAddr,
    },
    Type1SessionTransformed {
        rd: RouteDistinguisher,
        prefix: IpNetwork,
        teid: u32,
        qfi: u8,
        endpoint: IpAddr,
    },
    Type2SessionTransformed {
        rd: RouteDistinguisher,
        endpoint_len: u8,
        endpoint: IpAddr,
        teid: u32,
    },
    Unknown {
        arch_type: u8,
        route_type: u16,
        value: Bytes,
    },
}

//
// BGP-LS NLRI (RFC 7752 / RFC 9514).
//
// Encoding format:
//
// +------------------+
// |  NLRI Type (2)   |
// +------------------+
// | Total Length (2) |
// +------------------+
// | Protocol-ID (1)  |
// +------------------+
// | Identifier (8)   |
// +------------------+
// | Descriptor TLVs  |
// +------------------+
//
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsNlri {
    pub protocol_id: LsProtocolId,
    pub identifier: u64,
    pub value: LsNlriValue,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsNlriValue {
    Node {
        local_node: LsNodeDescriptors,
    },
    Link {
        local_node: LsNodeDescriptors,
        remote_node: LsNodeDescriptors,
        link: LsLinkDescriptors,
    },
    Ipv4Prefix {
        local_node: LsNodeDescriptors,
        mt_id: Option<u16>,
        ospf_route_type: Option<u8>,
        prefix: Ipv4Network,
    },
    Ipv6Prefix {
        local_node: LsNodeDescriptors,
        mt_id: Option<u16>,
        ospf_route_type: Option<u8>,
        prefix: Ipv6Network,
    },
    Srv6Sid {
        local_node: LsNodeDescriptors,
        sid: Ipv6Addr,
    },
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsNodeDescriptors {
    pub asn: Option<u32>,
    pub bgp_ls_id: Option<u32>,
    pub ospf_area_id: Option<u32>,
    pub igp_router_id: Bytes,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsLinkDescriptors {
    pub link_ids: Option<(u32, u32)>,
    pub ipv4_interface: Option<Ipv4Addr>,
    pub ipv4_neighbor: Option<Ipv4Addr>,
    pub ipv6_interface: Option<Ipv6Addr>,
    pub ipv6_neighbor: Option<Ipv6Addr>,
    pub mt_id: Option<u16>,
}

// ===== impl Nlri =====

impl Nlri {
    // Decodes a single NLRI of the given address family, consuming exactly
    // the bytes its encoding occupies.
    //
    // Returns `None` for semantically invalid but well-framed entries (e.g.
    // non-routable prefixes), which are skipped without resetting the
    // session.
    pub fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
        withdraw: bool,
        addpath: bool,
    ) -> Result<Option<Nlri>, UpdateMessageError> {
        // Parse path identifier when ADD-PATH is in effect. A path-id of
        // zero is kept verbatim.
        let mut path_id = None;
        if addpath {
            if buf.remaining() < 4 {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            path_id = Some(PathId(buf.get_u32()));
        }

        let value = match afi_safi {
            AfiSafi::Ipv4Unicast
            | AfiSafi::Ipv4Multicast
            | AfiSafi::Ipv6Unicast
            | AfiSafi::Ipv6Multicast => {
                match UnicastNlri::decode(afi_safi, buf)? {
                    Some(nlri) => NlriValue::Unicast(nlri),
                    None => return Ok(None),
                }
            }
            AfiSafi::Ipv4LabeledUnicast | AfiSafi::Ipv6LabeledUnicast => {
                NlriValue::Labeled(LabeledNlri::decode(
                    afi_safi, buf, withdraw,
                )?)
            }
            AfiSafi::Ipv4Vpn | AfiSafi::Ipv6Vpn => {
                NlriValue::Vpn(VpnNlri::decode(afi_safi, buf, withdraw)?)
            }
            AfiSafi::Ipv4Flowspec | AfiSafi::Ipv6Flowspec => {
                NlriValue::Flowspec(FlowspecNlri::decode(afi_safi, buf)?)
            }
            AfiSafi::L2VpnEvpn => NlriValue::Evpn(EvpnNlri::decode(buf)?),
            AfiSafi::L2VpnVpls => NlriValue::Vpls(VplsNlri::decode(buf)?),
            AfiSafi::Ipv4MulticastVpn => {
                NlriValue::Mvpn(MvpnNlri::decode(buf)?)
            }
            AfiSafi::Ipv4RouteTarget => {
                NlriValue::RouteTarget(RouteTargetNlri::decode(buf)?)
            }
            AfiSafi::Ipv4Mup | AfiSafi::Ipv6Mup => {
                NlriValue::Mup(MupNlri::decode(afi_safi, buf)?)
            }
            AfiSafi::LinkState => NlriValue::LinkState(LsNlri::decode(buf)?),
        };

        Ok(Some(Nlri { path_id, value }))
    }

    pub fn encode(&self, buf: &mut BytesMut, addpath: bool) {
        if addpath {
            buf.put_u32(self.path_id.map(|path_id| path_id.0).unwrap_or(0));
        }

        match &self.value {
            NlriValue::Unicast(nlri) => nlri.encode(buf),
            NlriValue::Labeled(nlri) => nlri.encode(buf),
            NlriValue::Vpn(nlri) => nlri.encode(buf),
            NlriValue::Flowspec(nlri) => nlri.encode(buf),
            NlriValue::Evpn(nlri) => nlri.encode(buf),
            NlriValue::Vpls(nlri) => nlri.encode(buf),
            NlriValue::Mvpn(nlri) => nlri.encode(buf),
            NlriValue::RouteTarget(nlri) => nlri.encode(buf),
            NlriValue::Mup(nlri) => nlri.encode(buf),
            NlriValue::LinkState(nlri) => nlri.encode(buf),
        }
    }

    pub fn afi_safi(&self) -> AfiSafi {
        match &self.value {
            NlriValue::Unicast(nlri) => nlri.afi_safi,
            NlriValue::Labeled(nlri) => nlri.afi_safi,
            NlriValue::Vpn(nlri) => nlri.afi_safi,
            NlriValue::Flowspec(nlri) => nlri.afi_safi,
            NlriValue::Evpn(_) => AfiSafi::L2VpnEvpn,
            NlriValue::Vpls(_) => AfiSafi::L2VpnVpls,
            NlriValue::Mvpn(_) => AfiSafi::Ipv4MulticastVpn,
            NlriValue::RouteTarget(_) => AfiSafi::Ipv4RouteTarget,
            NlriValue::Mup(nlri) => match nlri.address_family() {
                Afi::Ipv4 => AfiSafi::Ipv4Mup,
                _ => AfiSafi::Ipv6Mup,
            },
            NlriValue::LinkState(_) => AfiSafi::LinkState,
        }
    }

    // Canonical packed form (path-id plus family-specific body), used as the
    // Adj-RIB key.
    pub fn index(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, self.path_id.is_some());
        buf.freeze()
    }
}

impl std::fmt::Display for Nlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            NlriValue::Unicast(nlri) => write!(f, "{}", nlri.prefix)?,
            NlriValue::Labeled(nlri) => {
                write!(f, "{} label {}", nlri.prefix, nlri.labels)?
            }
            NlriValue::Vpn(nlri) => write!(
                f,
                "{} rd {} label {}",
                nlri.prefix, nlri.rd, nlri.labels
            )?,
            NlriValue::Flowspec(nlri) => write!(f, "{}", nlri)?,
            NlriValue::Evpn(nlri) => write!(f, "evpn {:?}", nlri)?,
            NlriValue::Vpls(nlri) => {
                write!(f, "vpls rd {} ve-id {}", nlri.rd, nlri.ve_id)?
            }
            NlriValue::Mvpn(nlri) => write!(f, "mcast-vpn {:?}", nlri)?,
            NlriValue::RouteTarget(nlri) => match &nlri.route_target {
                Some(rt) => {
                    write!(f, "rtc {} origin-as {}", rt, nlri.origin_as)?
                }
                None => write!(f, "rtc default")?,
            },
            NlriValue::Mup(nlri) => write!(f, "mup {:?}", nlri)?,
            NlriValue::LinkState(nlri) => write!(f, "bgp-ls {:?}", nlri)?,
        }
        if let Some(path_id) = &self.path_id {
            write!(f, " path-information {}", path_id)?;
        }
        Ok(())
    }
}

impl From<IpNetwork> for Nlri {
    fn from(prefix: IpNetwork) -> Nlri {
        let afi_safi = match prefix {
            IpNetwork::V4(_) => AfiSafi::Ipv4Unicast,
            IpNetwork::V6(_) => AfiSafi::Ipv6Unicast,
        };
        Nlri {
            path_id: None,
            value: NlriValue::Unicast(UnicastNlri { afi_safi, prefix }),
        }
    }
}

// ===== impl UnicastNlri =====

impl UnicastNlri {
    fn encode(&self, buf: &mut BytesMut) {
        match self.prefix {
            IpNetwork::V4(prefix) => encode_ipv4_prefix(buf, &prefix),
            IpNetwork::V6(prefix) => encode_ipv6_prefix(buf, &prefix),
        }
    }

    fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
    ) -> Result<Option<UnicastNlri>, UpdateMessageError> {
        let prefix = match afi_safi.afi() {
            Afi::Ipv4 => decode_ipv4_prefix(buf)?.map(IpNetwork::V4),
            _ => decode_ipv6_prefix(buf)?.map(IpNetwork::V6),
        };

        Ok(prefix.map(|prefix| UnicastNlri { afi_safi, prefix }))
    }
}

// ===== impl LabeledNlri =====

impl LabeledNlri {
    fn encode(&self, buf: &mut BytesMut) {
        let plen = self.labels.length() as u8 * 8 + prefix_len(&self.prefix);
        buf.put_u8(plen);
        self.labels.encode(buf);
        encode_prefix_bytes(buf, &self.prefix);
    }

    fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
        withdraw: bool,
    ) -> Result<LabeledNlri, UpdateMessageError> {
        let (labels, _, prefix) =
            decode_labeled_prefix(afi_safi, buf, withdraw, false)?;

        Ok(LabeledNlri {
            afi_safi,
            prefix,
            labels,
        })
    }
}

// ===== impl VpnNlri =====

impl VpnNlri {
    fn encode(&self, buf: &mut BytesMut) {
        let plen = self.labels.length() as u8 * 8
            + RouteDistinguisher::LENGTH as u8 * 8
            + prefix_len(&self.prefix);
        buf.put_u8(plen);
        self.labels.encode(buf);
        self.rd.encode(buf);
        encode_prefix_bytes(buf, &self.prefix);
    }

    fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
        withdraw: bool,
    ) -> Result<VpnNlri, UpdateMessageError> {
        let (labels, rd, prefix) =
            decode_labeled_prefix(afi_safi, buf, withdraw, true)?;

        Ok(VpnNlri {
            afi_safi,
            rd: rd.unwrap_or_default(),
            labels,
            prefix,
        })
    }
}

// ===== impl Esi =====

impl Esi {
    pub const LENGTH: usize = 10;
}

impl std::fmt::Display for Esi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (pos, byte) in self.0.iter().enumerate() {
            if pos > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// ===== impl EvpnNlri =====

impl EvpnNlri {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route_type());

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u8(0);

        match self {
            EvpnNlri::EthernetAutoDiscovery {
                rd,
                esi,
                ethernet_tag,
                label,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                buf.put_u32(*ethernet_tag);
                buf.put_u24(label << 4 | 1);
            }
            EvpnNlri::MacIpAdvertisement {
                rd,
                esi,
                ethernet_tag,
                mac,
                ip,
                labels,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                buf.put_u32(*ethernet_tag);
                buf.put_u8(48);
                buf.put_mac(mac);
                encode_addr_bits(buf, ip.as_ref());
                labels.encode(buf);
            }
            EvpnNlri::InclusiveMulticast {
                rd,
                ethernet_tag,
                originator,
            } => {
                rd.encode(buf);
                buf.put_u32(*ethernet_tag);
                encode_addr_bits(buf, Some(originator));
            }
            EvpnNlri::EthernetSegment {
                rd,
                esi,
                originator,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                encode_addr_bits(buf, Some(originator));
            }
            EvpnNlri::IpPrefix {
                rd,
                esi,
                ethernet_tag,
                prefix,
                gateway,
                label,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                buf.put_u32(*ethernet_tag);
                buf.put_u8(prefix_len(prefix));
                match prefix {
                    IpNetwork::V4(prefix) => buf.put_ipv4(&prefix.ip()),
                    IpNetwork::V6(prefix) => buf.put_ipv6(&prefix.ip()),
                }
                match gateway {
                    IpAddr::V4(addr) => buf.put_ipv4(addr),
                    IpAddr::V6(addr) => buf.put_ipv6(addr),
                }
                buf.put_u24(label << 4 | 1);
            }
            EvpnNlri::Unknown { value, .. } => {
                buf.put_slice(value);
            }
        }

        // Rewrite the length field.
        let len = buf.len() - len_pos - 1;
        buf[len_pos] = len as u8;
    }

    fn decode(buf: &mut Bytes) -> Result<EvpnNlri, UpdateMessageError> {
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let route_type = buf.get_u8();
        let len = buf.get_u8() as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let mut buf = buf.copy_to_bytes(len);

        let nlri = match EvpnRouteType::from_u8(route_type) {
            Some(EvpnRouteType::EthernetAutoDiscovery) => {
                if buf.remaining() != 25 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let esi = decode_esi(&mut buf);
                let ethernet_tag = buf.get_u32();
                let label = buf.get_u24() >> 4;
                EvpnNlri::EthernetAutoDiscovery {
                    rd,
                    esi,
                    ethernet_tag,
                    label,
                }
            }
            Some(EvpnRouteType::MacIpAdvertisement) => {
                if buf.remaining() < 33 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let esi = decode_esi(&mut buf);
                let ethernet_tag = buf.get_u32();
                let mac_len = buf.get_u8();
                if mac_len != 48 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let mac = buf.get_mac();
                let ip = decode_addr_bits(&mut buf)?;
                let labels = Labels::decode(&mut buf, false);
                EvpnNlri::MacIpAdvertisement {
                    rd,
                    esi,
                    ethernet_tag,
                    mac,
                    ip,
                    labels,
                }
            }
            Some(EvpnRouteType::InclusiveMulticast) => {
                if buf.remaining() < 13 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let ethernet_tag = buf.get_u32();
                let originator = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                EvpnNlri::InclusiveMulticast {
                    rd,
                    ethernet_tag,
                    originator,
                }
            }
            Some(EvpnRouteType::EthernetSegment) => {
                if buf.remaining() < 19 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let esi = decode_esi(&mut buf);
                let originator = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                EvpnNlri::EthernetSegment {
                    rd,
                    esi,
                    originator,
                }
            }
            Some(EvpnRouteType::IpPrefix) => {
                // 34 bytes for IPv4, 58 bytes for IPv6.
                let v6 = match buf.remaining() {
                    34 => false,
                    58 => true,
                    _ => {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                };
                let rd = RouteDistinguisher::decode(&mut buf);
                let esi = decode_esi(&mut buf);
                let ethernet_tag = buf.get_u32();
                let plen = buf.get_u8();
                let (prefix, gateway) = if v6 {
                    let prefix = Ipv6Network::new(buf.get_ipv6(), plen)
                        .map_err(|_| {
                            UpdateMessageError::InvalidNetworkField
                        })?;
                    let gateway = IpAddr::V6(buf.get_ipv6());
                    (IpNetwork::V6(prefix.apply_mask()), gateway)
                } else {
                    let prefix = Ipv4Network::new(buf.get_ipv4(), plen)
                        .map_err(|_| {
                            UpdateMessageError::InvalidNetworkField
                        })?;
                    let gateway = IpAddr::V4(buf.get_ipv4());
                    (IpNetwork::V4(prefix.apply_mask()), gateway)
                };
                let label = buf.get_u24() >> 4;
                EvpnNlri::IpPrefix {
                    rd,
                    esi,
                    ethernet_tag,
                    prefix,
                    gateway,
                    label,
                }
            }
            None => EvpnNlri::Unknown {
                route_type,
                value: buf,
            },
        };

        Ok(nlri)
    }

    fn route_type(&self) -> u8 {
        match self {
            EvpnNlri::EthernetAutoDiscovery { .. } => {
                EvpnRouteType::EthernetAutoDiscovery as u8
            }
            EvpnNlri::MacIpAdvertisement { .. } => {
                EvpnRouteType::MacIpAdvertisement as u8
            }
            EvpnNlri::InclusiveMulticast { .. } => {
                EvpnRouteType::InclusiveMulticast as u8
            }
            EvpnNlri::EthernetSegment { .. } => {
                EvpnRouteType::EthernetSegment as u8
            }
            EvpnNlri::IpPrefix { .. } => EvpnRouteType::IpPrefix as u8,
            EvpnNlri::Unknown { route_type, .. } => *route_type,
        }
    }
}

// ===== impl VplsNlri =====

impl VplsNlri {
    const LENGTH: u16 = 17;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(Self::LENGTH);
        self.rd.encode(buf);
        buf.put_u16(self.ve_id);
        buf.put_u16(self.ve_block_offset);
        buf.put_u16(self.ve_block_size);
        buf.put_u24(self.label_base << 4 | 1);
    }

    fn decode(buf: &mut Bytes) -> Result<VplsNlri, UpdateMessageError> {
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let len = buf.get_u16();
        if len != Self::LENGTH || buf.remaining() < len as usize {
            return Err(UpdateMessageError::InvalidNetworkField);
        }

        let rd = RouteDistinguisher::decode(buf);
        let ve_id = buf.get_u16();
        let ve_block_offset = buf.get_u16();
        let ve_block_size = buf.get_u16();
        let label_base = buf.get_u24() >> 4;

        Ok(VplsNlri {
            rd,
            ve_id,
            ve_block_offset,
            ve_block_size,
            label_base,
        })
    }
}

// ===== impl MvpnNlri =====

impl MvpnNlri {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route_type());

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u8(0);

        match self {
            MvpnNlri::IntraAsIPmsiAd { rd, originator } => {
                rd.encode(buf);
                encode_addr(buf, originator);
            }
            MvpnNlri::InterAsIPmsiAd { rd, source_as } => {
                rd.encode(buf);
                buf.put_u32(*source_as);
            }
            MvpnNlri::SPmsiAd {
                rd,
                source,
                group,
                originator,
            } => {
                rd.encode(buf);
                encode_addr_bits(buf, Some(source));
                encode_addr_bits(buf, Some(group));
                encode_addr(buf, originator);
            }
            MvpnNlri::LeafAd { route_key } => {
                buf.put_slice(route_key);
            }
            MvpnNlri::SourceActiveAd { rd, source, group } => {
                rd.encode(buf);
                encode_addr_bits(buf, Some(source));
                encode_addr_bits(buf, Some(group));
            }
            MvpnNlri::SharedTreeJoin {
                rd,
                source_as,
                source,
                group,
            }
            | MvpnNlri::SourceTreeJoin {
                rd,
                source_as,
                source,
                group,
            } => {
                rd.encode(buf);
                buf.put_u32(*source_as);
                encode_addr_bits(buf, Some(source));
                encode_addr_bits(buf, Some(group));
            }
            MvpnNlri::Unknown { value, .. } => {
                buf.put_slice(value);
            }
        }

        // Rewrite the length field.
        let len = buf.len() - len_pos - 1;
        buf[len_pos] = len as u8;
    }

    fn decode(buf: &mut Bytes) -> Result<MvpnNlri, UpdateMessageError> {
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let route_type = buf.get_u8();
        let len = buf.get_u8() as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let mut buf = buf.copy_to_bytes(len);

        let nlri = match MvpnRouteType::from_u8(route_type) {
            Some(MvpnRouteType::IntraAsIPmsiAd) => {
                if buf.remaining() < 12 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let originator = decode_addr(&mut buf)?;
                MvpnNlri::IntraAsIPmsiAd { rd, originator }
            }
            Some(MvpnRouteType::InterAsIPmsiAd) => {
                if buf.remaining() != 12 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let source_as = buf.get_u32();
                MvpnNlri::InterAsIPmsiAd { rd, source_as }
            }
            Some(MvpnRouteType::SPmsiAd) => {
                if buf.remaining() < 18 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let source = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                let group = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                let originator = decode_addr(&mut buf)?;
                MvpnNlri::SPmsiAd {
                    rd,
                    source,
                    group,
                    originator,
                }
            }
            Some(MvpnRouteType::LeafAd) => MvpnNlri::LeafAd {
                route_key: buf,
            },
            Some(MvpnRouteType::SourceActiveAd) => {
                if buf.remaining() < 18 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let source = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                let group = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                MvpnNlri::SourceActiveAd { rd, source, group }
            }
            Some(
                route_type @ (MvpnRouteType::SharedTreeJoin
                | MvpnRouteType::SourceTreeJoin),
            ) => {
                if buf.remaining() < 22 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let source_as = buf.get_u32();
                let source = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                let group = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                if route_type == MvpnRouteType::SharedTreeJoin {
                    MvpnNlri::SharedTreeJoin {
                        rd,
                        source_as,
                        source,
                        group,
                    }
                } else {
                    MvpnNlri::SourceTreeJoin {
                        rd,
                        source_as,
                        source,
                        group,
                    }
                }
            }
            None => MvpnNlri::Unknown {
                route_type,
                value: buf,
            },
        };

        Ok(nlri)
    }

    fn route_type(&self) -> u8 {
        match self {
            MvpnNlri::IntraAsIPmsiAd { .. } => {
                MvpnRouteType::IntraAsIPmsiAd as u8
            }
            MvpnNlri::InterAsIPmsiAd { .. } => {
                MvpnRouteType::InterAsIPmsiAd as u8
            }
            MvpnNlri::SPmsiAd { .. } => MvpnRouteType::SPmsiAd as u8,
            MvpnNlri::LeafAd { .. } => MvpnRouteType::LeafAd as u8,
            MvpnNlri::SourceActiveAd { .. } => {
                MvpnRouteType::SourceActiveAd as u8
            }
            MvpnNlri::SharedTreeJoin { .. } => {
                MvpnRouteType::SharedTreeJoin as u8
            }
            MvpnNlri::SourceTreeJoin { .. } => {
                MvpnRouteType::SourceTreeJoin as u8
            }
            MvpnNlri::Unknown { route_type, .. } => *route_type,
        }
    }
}

// ===== impl RouteTargetNlri =====

impl RouteTargetNlri {
    // Default route target (zero prefix length).
    pub const DEFAULT: RouteTargetNlri = RouteTargetNlri {
        prefix_len: 0,
        origin_as: 0,
        route_target: None,
    };

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.prefix_len);
        if self.prefix_len == 0 {
            return;
        }
        buf.put_u32(self.origin_as);
        if let Some(route_target) = &self.route_target {
            let rt_wire = prefix_wire_len(self.prefix_len - 32);
            buf.put_slice(&route_target.0[..rt_wire]);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<RouteTargetNlri, UpdateMessageError> {
        if buf.remaining() < 1 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let prefix_len = buf.get_u8();
        if prefix_len == 0 {
            return Ok(Self::DEFAULT);
        }
        if prefix_len < 32 || prefix_len > 96 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let wire = prefix_wire_len(prefix_len);
        if wire > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField);
        }

        let origin_as = buf.get_u32();
        let rt_wire = wire - 4;
        let mut rt = [0; 8];
        buf.copy_to_slice(&mut rt[..rt_wire]);

        Ok(RouteTargetNlri {
            prefix_len,
            origin_as,
            route_target: (rt_wire > 0).then_some(ExtComm(rt)),
        })
    }
}

// ===== impl MupNlri =====

impl MupNlri {
    // 3GPP-5G architecture type.
    const ARCH_TYPE: u8 = 1;

    fn address_family(&self) -> Afi {
        match self {
            MupNlri::InterworkSegmentDiscovery { prefix, .. }
            | MupNlri::Type1SessionTransformed { prefix, .. } => match prefix {
                IpNetwork::V4(_) => Afi::Ipv4,
                IpNetwork::V6(_) => Afi::Ipv6,
            },
            MupNlri::DirectSegmentDiscovery { address, .. } => match address {
                IpAddr::V4(_) => Afi::Ipv4,
                IpAddr::V6(_) => Afi::Ipv6,
            },
            MupNlri::Type2SessionTransformed { endpoint, .. } => {
                match endpoint {
                    IpAddr::V4(_) => Afi::Ipv4,
                    IpAddr::V6(_) => Afi::Ipv6,
                }
            }
            MupNlri::Unknown { .. } => Afi::Ipv4,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let (arch_type, route_type) = match self {
            MupNlri::InterworkSegmentDiscovery { .. } => (
                Self::ARCH_TYPE,
                MupRouteType::InterworkSegmentDiscovery as u16,
            ),
            MupNlri::DirectSegmentDiscovery { .. } => (
                Self::ARCH_TYPE,
                MupRouteType::DirectSegmentDiscovery as u16,
            ),
            MupNlri::Type1SessionTransformed { .. } => (
                Self::ARCH_TYPE,
                MupRouteType::Type1SessionTransformed as u16,
            ),
            MupNlri::Type2SessionTransformed { .. } => (
                Self::ARCH_TYPE,
                MupRouteType::Type2SessionTransformed as u16,
            ),
            MupNlri::Unknown {
                arch_type,
                route_type,
                ..
            } => (*arch_type, *route_type),
        };
        buf.put_u8(arch_type);
        buf.put_u16(route_type);

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u8(0);

        match self {
            MupNlri::InterworkSegmentDiscovery { rd, prefix } => {
                rd.encode(buf);
                buf.put_u8(prefix_len(prefix));
                encode_prefix_bytes(buf, prefix);
            }
            MupNlri::DirectSegmentDiscovery { rd, address } => {
                rd.encode(buf);
                encode_addr(buf, address);
            }
            MupNlri::Type1SessionTransformed {
                rd,
                prefix,
                teid,
                qfi,
                endpoint,
            } => {
                rd.encode(buf);
                buf.put_u8(prefix_len(prefix));
                encode_prefix_bytes(buf, prefix);
                buf.put_u32(*teid);
                buf.put_u8(*qfi);
                encode_addr_bits(buf, Some(endpoint));
            }
            MupNlri::Type2SessionTransformed {
                rd,
                endpoint_len,
                endpoint,
                teid,
            } => {
                rd.encode(buf);
                buf.put_u8(*endpoint_len);
                encode_addr(buf, endpoint);
                buf.put_u32(*teid);
            }
            MupNlri::Unknown { value, .. } => {
                buf.put_slice(value);
            }
        }

        // Rewrite the length field.
        let len = buf.len() - len_pos - 1;
        buf[len_pos] = len as u8;
    }

    fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
    ) -> Result<MupNlri, UpdateMessageError> {
        if buf.remaining() < 4 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let arch_type = buf.get_u8();
        let route_type = buf.get_u16();
        let len = buf.get_u8() as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let mut buf = buf.copy_to_bytes(len);

        if arch_type != Self::ARCH_TYPE {
            return Ok(MupNlri::Unknown {
                arch_type,
                route_type,
                value: buf,
            });
        }

        let nlri = match MupRouteType::from_u16(route_type) {
            Some(MupRouteType::InterworkSegmentDiscovery) => {
                if buf.remaining() < 9 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let plen = buf.get_u8();
                let prefix = decode_prefix_bytes(afi_safi.afi(), plen, &mut buf)?;
                MupNlri::InterworkSegmentDiscovery { rd, prefix }
            }
            Some(MupRouteType::DirectSegmentDiscovery) => {
                if buf.remaining() < 12 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let address = decode_addr(&mut buf)?;
                MupNlri::DirectSegmentDiscovery { rd, address }
            }
            Some(MupRouteType::Type1SessionTransformed) => {
                if buf.remaining() < 15 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let plen = buf.get_u8();
                let prefix = decode_prefix_bytes(afi_safi.afi(), plen, &mut buf)?;
                if buf.remaining() < 5 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let teid = buf.get_u32();
                let qfi = buf.get_u8();
                let endpoint = decode_addr_bits(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                MupNlri::Type1SessionTransformed {
                    rd,
                    prefix,
                    teid,
                    qfi,
                    endpoint,
                }
            }
            Some(MupRouteType::Type2SessionTransformed) => {
                if buf.remaining() < 13 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let rd = RouteDistinguisher::decode(&mut buf);
                let endpoint_len = buf.get_u8();
                let endpoint = match afi_safi.afi() {
                    Afi::Ipv4 => IpAddr::V4(buf.get_ipv4()),
                    _ => IpAddr::V6(buf.get_ipv6()),
                };
                if buf.remaining() < 4 {
                    return Err(UpdateMessageError::InvalidNetworkField);
                }
                let teid = buf.get_u32();
                MupNlri::Type2SessionTransformed {
                    rd,
                    endpoint_len,
                    endpoint,
                    teid,
                }
            }
            None => MupNlri::Unknown {
                arch_type,
                route_type,
                value: buf,
            },
        };

        Ok(nlri)
    }
}

// ===== impl LsNlri =====

impl LsNlri {
    fn nlri_type(&self) -> LsNlriType {
        match &self.value {
            LsNlriValue::Node { .. } => LsNlriType::Node,
            LsNlriValue::Link { .. } => LsNlriType::Link,
            LsNlriValue::Ipv4Prefix { .. } => LsNlriType::Ipv4Prefix,
            LsNlriValue::Ipv6Prefix { .. } => LsNlriType::Ipv6Prefix,
            LsNlriValue::Srv6Sid { .. } => LsNlriType::Srv6Sid,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.nlri_type() as u16);

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u16(0);

        buf.put_u8(self.protocol_id as u8);
        buf.put_u64(self.identifier);

        match &self.value {
            LsNlriValue::Node { local_node } => {
                local_node.encode(buf, LsTlvType::LocalNodeDescriptors);
            }
            LsNlriValue::Link {
                local_node,
                remote_node,
                link,
            } => {
                local_node.encode(buf, LsTlvType::LocalNodeDescriptors);
                remote_node.encode(buf, LsTlvType::RemoteNodeDescriptors);
                link.encode(buf);
            }
            LsNlriValue::Ipv4Prefix {
                local_node,
                mt_id,
                ospf_route_type,
                prefix,
            } => {
                local_node.encode(buf, LsTlvType::LocalNodeDescriptors);
                if let Some(mt_id) = mt_id {
                    encode_ls_tlv_u16(buf, LsTlvType::MultiTopologyId, *mt_id);
                }
                if let Some(route_type) = ospf_route_type {
                    encode_ls_tlv_u8(buf, LsTlvType::OspfRouteType, *route_type);
                }
                buf.put_u16(LsTlvType::IpReachability as u16);
                buf.put_u16(1 + prefix_wire_len(prefix.prefix()) as u16);
                encode_ipv4_prefix(buf, prefix);
            }
            LsNlriValue::Ipv6Prefix {
                local_node,
                mt_id,
                ospf_route_type,
                prefix,
            } => {
                local_node.encode(buf, LsTlvType::LocalNodeDescriptors);
                if let Some(mt_id) = mt_id {
                    encode_ls_tlv_u16(buf, LsTlvType::MultiTopologyId, *mt_id);
                }
                if let Some(route_type) = ospf_route_type {
                    encode_ls_tlv_u8(buf, LsTlvType::OspfRouteType, *route_type);
                }
                buf.put_u16(LsTlvType::IpReachability as u16);
                buf.put_u16(1 + prefix_wire_len(prefix.prefix()) as u16);
                encode_ipv6_prefix(buf, prefix);
            }
            LsNlriValue::Srv6Sid { local_node, sid } => {
                local_node.encode(buf, LsTlvType::LocalNodeDescriptors);
                buf.put_u16(LsTlvType::Srv6SidInformation as u16);
                buf.put_u16(16);
                buf.put_ipv6(sid);
            }
        }

        // Rewrite the length field.
        let len = (buf.len() - len_pos - 2) as u16;
        buf[len_pos..len_pos + 2].copy_from_slice(&len.to_be_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<LsNlri, UpdateMessageError> {
        if buf.remaining() < 4 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let nlri_type = buf.get_u16();
        let len = buf.get_u16() as usize;
        if len > buf.remaining() || len < 9 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let mut buf = buf.copy_to_bytes(len);

        let nlri_type = LsNlriType::from_u16(nlri_type)
            .ok_or(UpdateMessageError::InvalidNetworkField)?;
        let protocol_id = LsProtocolId::from_u8(buf.get_u8())
            .ok_or(UpdateMessageError::InvalidNetworkField)?;
        let identifier = buf.get_u64();

        // Parse descriptor TLVs.
        let mut local_node = None;
        let mut remote_node = None;
        let mut link = LsLinkDescriptors::default();
        let mut mt_id = None;
        let mut ospf_route_type = None;
        let mut ipv4_prefix = None;
        let mut ipv6_prefix = None;
        let mut srv6_sid = None;
        while buf.remaining() >= 4 {
            let tlv_type = buf.get_u16();
            let tlv_len = buf.get_u16() as usize;
            if tlv_len > buf.remaining() {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut value = buf.copy_to_bytes(tlv_len);

            match LsTlvType::from_u16(tlv_type) {
                Some(LsTlvType::LocalNodeDescriptors) => {
                    local_node = Some(LsNodeDescriptors::decode(&mut value)?);
                }
                Some(LsTlvType::RemoteNodeDescriptors) => {
                    remote_node = Some(LsNodeDescriptors::decode(&mut value)?);
                }
                Some(LsTlvType::LinkLocalRemoteIdentifiers) => {
                    if value.remaining() != 8 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    link.link_ids = Some((value.get_u32(), value.get_u32()));
                }
                Some(LsTlvType::Ipv4InterfaceAddress) => {
                    if value.remaining() != 4 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    link.ipv4_interface = Some(value.get_ipv4());
                }
                Some(LsTlvType::Ipv4NeighborAddress) => {
                    if value.remaining() != 4 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    link.ipv4_neighbor = Some(value.get_ipv4());
                }
                Some(LsTlvType::Ipv6InterfaceAddress) => {
                    if value.remaining() != 16 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    link.ipv6_interface = Some(value.get_ipv6());
                }
                Some(LsTlvType::Ipv6NeighborAddress) => {
                    if value.remaining() != 16 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    link.ipv6_neighbor = Some(value.get_ipv6());
                }
                Some(LsTlvType::MultiTopologyId) => {
                    if value.remaining() != 2 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    let id = value.get_u16();
                    link.mt_id = Some(id);
                    mt_id = Some(id);
                }
                Some(LsTlvType::OspfRouteType) => {
                    if value.remaining() != 1 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    ospf_route_type = Some(value.get_u8());
                }
                Some(LsTlvType::IpReachability) => match nlri_type {
                    LsNlriType::Ipv4Prefix => {
                        ipv4_prefix = decode_ipv4_prefix(&mut value)?;
                    }
                    LsNlriType::Ipv6Prefix => {
                        ipv6_prefix = decode_ipv6_prefix(&mut value)?;
                    }
                    _ => {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                },
                Some(LsTlvType::Srv6SidInformation) => {
                    if value.remaining() != 16 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    srv6_sid = Some(value.get_ipv6());
                }
                // Ignore unknown TLVs.
                _ => (),
            }
        }

        let local_node =
            local_node.ok_or(UpdateMessageError::InvalidNetworkField)?;
        let value = match nlri_type {
            LsNlriType::Node => LsNlriValue::Node { local_node },
            LsNlriType::Link => LsNlriValue::Link {
                local_node,
                remote_node: remote_node
                    .ok_or(UpdateMessageError::InvalidNetworkField)?,
                link,
            },
            LsNlriType::Ipv4Prefix => LsNlriValue::Ipv4Prefix {
                local_node,
                mt_id,
                ospf_route_type,
                prefix: ipv4_prefix
                    .ok_or(UpdateMessageError::InvalidNetworkField)?,
            },
            LsNlriType::Ipv6Prefix => LsNlriValue::Ipv6Prefix {
                local_node,
                mt_id,
                ospf_route_type,
                prefix: ipv6_prefix
                    .ok_or(UpdateMessageError::InvalidNetworkField)?,
            },
            LsNlriType::Srv6Sid => LsNlriValue::Srv6Sid {
                local_node,
                sid: srv6_sid
                    .ok_or(UpdateMessageError::InvalidNetworkField)?,
            },
        };

        Ok(LsNlri {
            protocol_id,
            identifier,
            value,
        })
    }
}

// ===== impl LsNodeDescriptors =====

impl LsNodeDescriptors {
    fn encode(&self, buf: &mut BytesMut, tlv_type: LsTlvType) {
        buf.put_u16(tlv_type as u16);

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u16(0);

        if let Some(asn) = self.asn {
            buf.put_u16(LsTlvType::AutonomousSystem as u16);
            buf.put_u16(4);
            buf.put_u32(asn);
        }
        if let Some(bgp_ls_id) = self.bgp_ls_id {
            buf.put_u16(LsTlvType::BgpLsIdentifier as u16);
            buf.put_u16(4);
            buf.put_u32(bgp_ls_id);
        }
        if let Some(ospf_area_id) = self.ospf_area_id {
            buf.put_u16(LsTlvType::OspfAreaId as u16);
            buf.put_u16(4);
            buf.put_u32(ospf_area_id);
        }
        if !self.igp_router_id.is_empty() {
            buf.put_u16(LsTlvType::IgpRouterId as u16);
            buf.put_u16(self.igp_router_id.len() as u16);
            buf.put_slice(&self.igp_router_id);
        }

        // Rewrite the length field.
        let len = (buf.len() - len_pos - 2) as u16;
        buf[len_pos..len_pos + 2].copy_from_slice(&len.to_be_bytes());
    }

    fn decode(
        buf: &mut Bytes,
    ) -> Result<LsNodeDescriptors, UpdateMessageError> {
        let mut descriptors = LsNodeDescriptors::default();

        while buf.remaining() >= 4 {
            let tlv_type = buf.get_u16();
            let tlv_len = buf.get_u16() as usize;
            if tlv_len > buf.remaining() {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut value = buf.copy_to_bytes(tlv_len);

            match LsTlvType::from_u16(tlv_type) {
                Some(LsTlvType::AutonomousSystem) => {
                    if value.remaining() != 4 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    descriptors.asn = Some(value.get_u32());
                }
                Some(LsTlvType::BgpLsIdentifier) => {
                    if value.remaining() != 4 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    descriptors.bgp_ls_id = Some(value.get_u32());
                }
                Some(LsTlvType::OspfAreaId) => {
                    if value.remaining() != 4 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    descriptors.ospf_area_id = Some(value.get_u32());
                }
                Some(LsTlvType::IgpRouterId) => {
                    descriptors.igp_router_id = value;
                }
                // Ignore unknown sub-TLVs.
                _ => (),
            }
        }

        Ok(descriptors)
    }
}

// ===== impl LsLinkDescriptors =====

impl LsLinkDescriptors {
    fn encode(&self, buf: &mut BytesMut) {
        if let Some((local, remote)) = self.link_ids {
            buf.put_u16(LsTlvType::LinkLocalRemoteIdentifiers as u16);
            buf.put_u16(8);
            buf.put_u32(local);
            buf.put_u32(remote);
        }
        if let Some(addr) = &self.ipv4_interface {
            buf.put_u16(LsTlvType::Ipv4InterfaceAddress as u16);
            buf.put_u16(4);
            buf.put_ipv4(addr);
        }
        if let Some(addr) = &self.ipv4_neighbor {
            buf.put_u16(LsTlvType::Ipv4NeighborAddress as u16);
            buf.put_u16(4);
            buf.put_ipv4(addr);
        }
        if let Some(addr) = &self.ipv6_interface {
            buf.put_u16(LsTlvType::Ipv6InterfaceAddress as u16);
            buf.put_u16(16);
            buf.put_ipv6(addr);
        }
        if let Some(addr) = &self.ipv6_neighbor {
            buf.put_u16(LsTlvType::Ipv6NeighborAddress as u16);
            buf.put_u16(16);
            buf.put_ipv6(addr);
        }
        if let Some(mt_id) = self.mt_id {
            encode_ls_tlv_u16(buf, LsTlvType::MultiTopologyId, mt_id);
        }
    }
}

// ===== helper functions =====

pub(crate) fn encode_ipv4_prefix(buf: &mut BytesMut, prefix: &Ipv4Network) {
    // Encode prefix length.
    let plen = prefix.prefix();
    buf.put_u8(plen);

    // Encode prefix address (variable length).
    let prefix_bytes = prefix.ip().octets();
    let plen_wire = prefix_wire_len(plen);
    buf.put(&prefix_bytes[0..plen_wire]);
}

pub(crate) fn encode_ipv6_prefix(buf: &mut BytesMut, prefix: &Ipv6Network) {
    // Encode prefix length.
    let plen = prefix.prefix();
    buf.put_u8(plen);

    // Encode prefix address (variable length).
    let prefix_bytes = prefix.ip().octets();
    let plen_wire = prefix_wire_len(plen);
    buf.put(&prefix_bytes[0..plen_wire]);
}

pub fn decode_ipv4_prefix(
    buf: &mut Bytes,
) -> Result<Option<Ipv4Network>, UpdateMessageError> {
    // Parse prefix length.
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let plen = buf.get_u8();
    let plen_wire = prefix_wire_len(plen);
    if plen_wire > buf.remaining() || plen > Ipv4Network::MAX_PREFIXLEN {
        return Err(UpdateMessageError::InvalidNetworkField);
    }

    // Parse prefix address (variable length).
    let mut prefix_bytes = [0; Ipv4Addr::LENGTH];
    buf.copy_to_slice(&mut prefix_bytes[..plen_wire]);
    let prefix = Ipv4Addr::from(prefix_bytes);
    let prefix = Ipv4Network::new(prefix, plen)
        .map(|prefix| prefix.apply_mask())
        .map_err(|_| UpdateMessageError::InvalidNetworkField)?;

    // Ignore semantically incorrect prefix.
    if !prefix.is_routable() {
        return Ok(None);
    }

    Ok(Some(prefix))
}

pub fn decode_ipv6_prefix(
    buf: &mut Bytes,
) -> Result<Option<Ipv6Network>, UpdateMessageError> {
    // Parse prefix length.
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let plen = buf.get_u8();
    let plen_wire = prefix_wire_len(plen);
    if plen_wire > buf.remaining() || plen > Ipv6Network::MAX_PREFIXLEN {
        return Err(UpdateMessageError::InvalidNetworkField);
    }

    // Parse prefix address (variable length).
    let mut prefix_bytes = [0; Ipv6Addr::LENGTH];
    buf.copy_to_slice(&mut prefix_bytes[..plen_wire]);
    let prefix = Ipv6Addr::from(prefix_bytes);
    let prefix = Ipv6Network::new(prefix, plen)
        .map(|prefix| prefix.apply_mask())
        .map_err(|_| UpdateMessageError::InvalidNetworkField)?;

    // Ignore semantically incorrect prefix.
    if !prefix.is_routable() {
        return Ok(None);
    }

    Ok(Some(prefix))
}

// Calculates the number of bytes required to encode a prefix.
pub(crate) fn prefix_wire_len(len: u8) -> usize {
    (len as usize).div_ceil(8)
}

fn prefix_len(prefix: &IpNetwork) -> u8 {
    match prefix {
        IpNetwork::V4(prefix) => prefix.prefix(),
        IpNetwork::V6(prefix) => prefix.prefix(),
    }
}

fn encode_prefix_bytes(buf: &mut BytesMut, prefix: &IpNetwork) {
    match prefix {
        IpNetwork::V4(prefix) => {
            let bytes = prefix.ip().octets();
            buf.put(&bytes[..prefix_wire_len(prefix.prefix())]);
        }
        IpNetwork::V6(prefix) => {
            let bytes = prefix.ip().octets();
            buf.put(&bytes[..prefix_wire_len(prefix.prefix())]);
        }
    }
}

// Decodes the label stack, optional route distinguisher and prefix shared by
// the labeled unicast and VPN encodings. The prefix length octet covers the
// labels, the RD (when present) and the prefix itself.
fn decode_labeled_prefix(
    afi_safi: AfiSafi,
    buf: &mut Bytes,
    withdraw: bool,
    with_rd: bool,
) -> Result<(Labels, Option<RouteDistinguisher>, IpNetwork), UpdateMessageError>
{
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let plen = buf.get_u8() as usize;
    let plen_wire = prefix_wire_len(plen as u8);
    if plen_wire > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let mut blob = buf.copy_to_bytes(plen_wire);

    // Parse label stack.
    let labels = Labels::decode(&mut blob, withdraw);
    let mut consumed_bits = labels.length() * 8;

    // Parse route distinguisher.
    let mut rd = None;
    if with_rd {
        if blob.remaining() < RouteDistinguisher::LENGTH {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        rd = Some(RouteDistinguisher::decode(&mut blob));
        consumed_bits += RouteDistinguisher::LENGTH * 8;
    }

    // The remaining bits form the prefix.
    if plen < consumed_bits {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let host_plen = (plen - consumed_bits) as u8;
    if blob.remaining() != prefix_wire_len(host_plen) {
        return Err(UpdateMessageError::InvalidNetworkField);
    }

    let prefix = match afi_safi.afi() {
        Afi::Ipv4 => {
            if host_plen > Ipv4Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut prefix_bytes = [0; Ipv4Addr::LENGTH];
            blob.copy_to_slice(
                &mut prefix_bytes[..prefix_wire_len(host_plen)],
            );
            let prefix =
                Ipv4Network::new(Ipv4Addr::from(prefix_bytes), host_plen)
                    .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
            IpNetwork::V4(prefix.apply_mask())
        }
        _ => {
            if host_plen > Ipv6Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut prefix_bytes = [0; Ipv6Addr::LENGTH];
            blob.copy_to_slice(
                &mut prefix_bytes[..prefix_wire_len(host_plen)],
            );
            let prefix =
                Ipv6Network::new(Ipv6Addr::from(prefix_bytes), host_plen)
                    .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
            IpNetwork::V6(prefix.apply_mask())
        }
    };

    Ok((labels, rd, prefix))
}

fn decode_esi(buf: &mut Bytes) -> Esi {
    let mut esi = [0; Esi::LENGTH];
    buf.copy_to_slice(&mut esi);
    Esi(esi)
}

// Encodes an IP address preceded by its length in bits.
fn encode_addr_bits(buf: &mut BytesMut, addr: Option<&IpAddr>) {
    match addr {
        None => buf.put_u8(0),
        Some(IpAddr::V4(addr)) => {
            buf.put_u8(32);
            buf.put_ipv4(addr);
        }
        Some(IpAddr::V6(addr)) => {
            buf.put_u8(128);
            buf.put_ipv6(addr);
        }
    }
}

// Decodes an IP address preceded by its length in bits (0, 32 or 128).
fn decode_addr_bits(
    buf: &mut Bytes,
) -> Result<Option<IpAddr>, UpdateMessageError> {
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    match buf.get_u8() {
        0 => Ok(None),
        32 => {
            if buf.remaining() < 4 {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            Ok(Some(IpAddr::V4(buf.get_ipv4())))
        }
        128 => {
            if buf.remaining() < 16 {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            Ok(Some(IpAddr::V6(buf.get_ipv6())))
        }
        _ => Err(UpdateMessageError::InvalidNetworkField),
    }
}

// Encodes an IP address whose length is implied by the enclosing encoding.
fn encode_addr(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(addr) => buf.put_ipv4(addr),
        IpAddr::V6(addr) => buf.put_ipv6(addr),
    }
}

// Decodes an IP address whose length is implied by the remaining buffer
// space (4 or 16 bytes).
fn decode_addr(buf: &mut Bytes) -> Result<IpAddr, UpdateMessageError> {
    match buf.remaining() {
        4 => Ok(IpAddr::V4(buf.get_ipv4())),
        16 => Ok(IpAddr::V6(buf.get_ipv6())),
        _ => Err(UpdateMessageError::InvalidNetworkField),
    }
}

// Decodes a prefix from its bit length and the following bytes.
fn decode_prefix_bytes(
    afi: Afi,
    plen: u8,
    buf: &mut Bytes,
) -> Result<IpNetwork, UpdateMessageError> {
    let plen_wire = prefix_wire_len(plen);
    if plen_wire > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField);
    }

    match afi {
        Afi::Ipv4 => {
            if plen > Ipv4Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut prefix_bytes = [0; Ipv4Addr::LENGTH];
            buf.copy_to_slice(&mut prefix_bytes[..plen_wire]);
            let prefix = Ipv4Network::new(Ipv4Addr::from(prefix_bytes), plen)
                .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
            Ok(IpNetwork::V4(prefix.apply_mask()))
        }
        _ => {
            if plen > Ipv6Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut prefix_bytes = [0; Ipv6Addr::LENGTH];
            buf.copy_to_slice(&mut prefix_bytes[..plen_wire]);
            let prefix = Ipv6Network::new(Ipv6Addr::from(prefix_bytes), plen)
                .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
            Ok(IpNetwork::V6(prefix.apply_mask()))
        }
    }
}

fn encode_ls_tlv_u8(buf: &mut BytesMut, tlv_type: LsTlvType, value: u8) {
    buf.put_u16(tlv_type as u16);
    buf.put_u16(1);
    buf.put_u8(value);
}

fn encode_ls_tlv_u16(buf: &mut BytesMut, tlv_type: LsTlvType, value: u16) {
    buf.put_u16(tlv_type as u16);
    buf.put_u16(2);
    buf.put_u16(value);
}
