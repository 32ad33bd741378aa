//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use num_traits::{FromPrimitive, ToPrimitive};
use parley_utils::bgp::AfiSafi;
use parley_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::af::AfiSafiExt;
use crate::neighbor::PeerType;
use crate::packet::attribute::Attrs;
use crate::packet::consts::{
    AddPathMode, Afi, BGP_VERSION, CapabilityCode, ErrorCode, GrAfiSafiFlags,
    GrFlags, MessageHeaderErrorSubcode, MessageType, OpenMessageErrorSubcode,
    OpenParamType, RouteRefreshErrorSubcode, Safi, UpdateMessageErrorSubcode,
};
use crate::packet::error::{
    DecodeError, DecodeResult, MessageHeaderError, OpenMessageError,
    RouteRefreshMessageError, UpdateMessageError,
};
use crate::packet::nlri::Nlri;

//
// BGP message.
//
// Encoding format (message header):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                                                               +
// |                                                               |
// +                                                               +
// |                           Marker                              |
// +                                                               +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Length               |      Type     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    Open(OpenMsg),
    Update(UpdateMsg),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
    RouteRefresh(RouteRefreshMsg),
}

//
// OPEN Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+
// |    Version    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     My Autonomous System      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Hold Time           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         BGP Identifier                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Opt Parm Len  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// |             Optional Parameters (variable)                    |
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub my_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: BTreeSet<Capability>,
}

//
// Capabilities Optional Parameter.
//
// Encoding format:
//
// +------------------------------+
// | Capability Code (1 octet)    |
// +------------------------------+
// | Capability Length (1 octet)  |
// +------------------------------+
// | Capability Value (variable)  |
// ~                              ~
// +------------------------------+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum Capability {
    MultiProtocol { afi: Afi, safi: Safi },
    RouteRefresh,
    CiscoRouteRefresh,
    EnhancedRouteRefresh,
    ExtendedMessage,
    FourOctetAsNumber { asn: u32 },
    AddPath(BTreeSet<AddPathTuple>),
    GracefulRestart(GracefulRestart),
    Multisession(BTreeSet<u8>),
    Fqdn { hostname: String, domain: String },
    SoftwareVersion(String),
}

// This is a stripped down version of `Capability`, containing only data that
// is relevant in terms of capability negotiation.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum NegotiatedCapability {
    MultiProtocol { afi: Afi, safi: Safi },
    RouteRefresh,
    CiscoRouteRefresh,
    EnhancedRouteRefresh,
    ExtendedMessage,
    FourOctetAsNumber,
    AddPath,
    GracefulRestart,
    Multisession,
    Fqdn,
    SoftwareVersion,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AddPathTuple {
    pub afi: Afi,
    pub safi: Safi,
    pub mode: AddPathMode,
}

// Graceful Restart capability value (RFC 4724).
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct GracefulRestart {
    pub restart_time: u16,
    pub flags: GrFlags,
    pub families: BTreeMap<(Afi, Safi), GrAfiSafiFlags>,
}

//
// UPDATE Message.
//
// Encoding format (message body):
//
// +-----------------------------------------------------+
// |   Withdrawn Routes Length (2 octets)                |
// +-----------------------------------------------------+
// |   Withdrawn Routes (variable)                       |
// +-----------------------------------------------------+
// |   Total Path Attribute Length (2 octets)            |
// +-----------------------------------------------------+
// |   Path Attributes (variable)                        |
// +-----------------------------------------------------+
// |   Network Layer Reachability Information (variable) |
// +-----------------------------------------------------+
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    pub reach: Option<ReachNlri>,
    pub unreach: Option<UnreachNlri>,
    pub mp_reach: Option<MpReachNlri>,
    pub mp_unreach: Option<MpUnreachNlri>,
    pub attrs: Option<Attrs>,
}

// IPv4-unicast announcements carried in the trailing NLRI section, with
// their next hop from the NEXT_HOP attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ReachNlri {
    pub prefixes: Vec<Nlri>,
    pub nexthop: Ipv4Addr,
}

// IPv4-unicast withdrawals carried in the Withdrawn Routes section.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UnreachNlri {
    pub prefixes: Vec<Nlri>,
}

// MP_REACH_NLRI attribute contents (RFC 4760).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpReachNlri {
    pub afi_safi: AfiSafi,
    pub nexthop: MpNexthop,
    pub nlri: Vec<Nlri>,
}

// MP_UNREACH_NLRI attribute contents (RFC 4760).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpUnreachNlri {
    pub afi_safi: AfiSafi,
    pub nlri: Vec<Nlri>,
}

// Next hop forms allowed inside MP_REACH_NLRI. VPN families prepend a zero
// route distinguisher; an IPv6 next hop may carry an additional link-local
// address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MpNexthop {
    Ipv4(Ipv4Addr),
    Ipv6 {
        global: Ipv6Addr,
        link_local: Option<Ipv6Addr>,
    },
    VpnIpv4(Ipv4Addr),
    VpnIpv6(Ipv6Addr),
}

//
// NOTIFICATION Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Error code    | Error subcode |   Data (variable)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

//
// KEEPALIVE Message.
//
// A KEEPALIVE message consists of only the message header and has a length of
// 19 octets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg {}

//
// ROUTE-REFRESH Message.
//
// Encoding format (message body):
//
// 0       7      15      23      31
// +-------+-------+-------+-------+
// |      AFI      | Sub.  | SAFI  |
// +-------+-------+-------+-------+
//
// The second reserved octet carries the RFC 7313 demarcation subtype
// (0 = normal, 1 = BoRR, 2 = EoRR).
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteRefreshMsg {
    pub afi: u16,
    pub subtype: u8,
    pub safi: u8,
}

// Session parameters resulting from the OPEN exchange, frozen for the
// session's lifetime and consulted by every encoder and decoder.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Negotiated {
    pub local_as: u32,
    pub peer_as: u32,
    pub holdtime: u16,
    pub asn4: bool,
    pub families: BTreeSet<AfiSafi>,
    pub addpath_tx: BTreeSet<AfiSafi>,
    pub addpath_rx: BTreeSet<AfiSafi>,
    pub max_msg_size: u16,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub graceful_restart: Option<GrNegotiated>,
    pub multisession: bool,
}

// Negotiated graceful restart parameters (RFC 4724).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct GrNegotiated {
    pub restart_time: u16,
    pub restarting: bool,
    // Families for which the peer preserved forwarding state.
    pub families: BTreeMap<AfiSafi, bool>,
}

// BGP message encoding context.
#[derive(Clone, Debug)]
pub struct EncodeCxt {
    pub negotiated: Negotiated,
}

// BGP message decoding context.
#[derive(Clone, Debug)]
pub struct DecodeCxt {
    pub peer_type: PeerType,
    pub peer_as: u32,
    pub negotiated: Negotiated,
}

// ===== impl Message =====

impl Message {
    pub const MIN_LEN: u16 = 19;
    pub const MAX_LEN: u16 = 4096;
    pub const MAX_LEN_EXT: u16 = u16::MAX;
    const MSG_LEN_POS: std::ops::Range<usize> = 16..18;

    // Encodes BGP message into a bytes buffer.
    pub fn encode(&self, cxt: &EncodeCxt) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Marker field.
            buf.put_u128(u128::MAX);
            // The length field will be initialized later.
            buf.put_u16(0);

            // Message type and body.
            match self {
                Message::Open(msg) => msg.encode(&mut buf),
                Message::Update(msg) => msg.encode(&mut buf, cxt),
                Message::Notification(msg) => msg.encode(&mut buf),
                Message::Keepalive(msg) => msg.encode(&mut buf),
                Message::RouteRefresh(msg) => msg.encode(&mut buf),
            }

            // Rewrite message length.
            let msg_len = buf.len() as u16;
            buf[Self::MSG_LEN_POS].copy_from_slice(&msg_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Decode buffer into a BGP message.
    //
    // This function panics if the provided buffer doesn't contain an entire
    // message.
    pub fn decode(data: &[u8], cxt: &DecodeCxt) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Parse and validate marker.
        let marker = buf.get_u128();
        if marker != u128::MAX {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }

        // Parse and validate message length.
        let msg_len = buf.get_u16();
        if msg_len < Self::MIN_LEN || msg_len > cxt.negotiated.max_msg_size {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        // Parse message type.
        let msg_type = buf.get_u8();
        let Some(msg_etype) = MessageType::from_u8(msg_type) else {
            return Err(MessageHeaderError::BadMessageType(msg_type).into());
        };

        // Parse message body.
        let min_msg_len = match msg_etype {
            MessageType::Open => OpenMsg::MIN_LEN,
            MessageType::Update => UpdateMsg::MIN_LEN,
            MessageType::Notification => NotificationMsg::MIN_LEN,
            MessageType::Keepalive => KeepaliveMsg::LEN,
            MessageType::RouteRefresh => RouteRefreshMsg::LEN,
        };
        if msg_len < min_msg_len {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }
        match msg_etype {
            MessageType::Open => {
                let msg = OpenMsg::decode(&mut buf)?;
                Ok(Message::Open(msg))
            }
            MessageType::Update => {
                let msg = UpdateMsg::decode(&mut buf, cxt)?;
                Ok(Message::Update(msg))
            }
            MessageType::Notification => {
                let msg = NotificationMsg::decode(&mut buf)?;
                Ok(Message::Notification(msg))
            }
            MessageType::Keepalive => {
                if msg_len != KeepaliveMsg::LEN {
                    return Err(MessageHeaderError::BadMessageLength(
                        msg_len,
                    )
                    .into());
                }
                let msg = KeepaliveMsg::decode(&mut buf)?;
                Ok(Message::Keepalive(msg))
            }
            MessageType::RouteRefresh => {
                if msg_len != RouteRefreshMsg::LEN {
                    let error =
                        RouteRefreshMessageError::InvalidMessageLength(msg_len);
                    return Err(error.into());
                }
                let msg = RouteRefreshMsg::decode(&mut buf)?;
                Ok(Message::RouteRefresh(msg))
            }
        }
    }

    // Parses the given buffer to determine if it contains a complete BGP
    // message, and returns the length of the message if successful.
    pub fn get_message_len(data: &[u8]) -> Option<usize> {
        // Validate that the buffer contains sufficient space for at least the
        // message header.
        let buf_size = data.len();
        if buf_size < Self::MIN_LEN as usize {
            return None;
        }

        // Ensure the buffer is big enough to hold the entire message.
        let mut buf = Bytes::copy_from_slice(&data[0..Self::MIN_LEN as usize]);
        let _marker = buf.get_u128();
        let msg_len = buf.get_u16();
        if msg_len < Self::MIN_LEN || msg_len as usize > buf_size {
            return None;
        }

        // Return the message size.
        Some(msg_len as usize)
    }
}

// ===== impl OpenMsg =====

impl OpenMsg {
    const MIN_LEN: u16 = 29;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Open as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        // Capabilities.
        let opt_param_len_pos = buf.len();
        buf.put_u8(0);
        for capability in &self.capabilities {
            buf.put_u8(OpenParamType::Capabilities as u8);

            // The "Parm. Length" field will be initialized later.
            let param_len_pos = buf.len();
            buf.put_u8(0);

            // Encode individual capability.
            capability.encode(buf);

            // Rewrite the "Parm. Length" field.
            let param_len = buf.len() - param_len_pos - 1;
            buf[param_len_pos] = param_len as u8;
        }

        // Rewrite the "Opt Parm Len" field.
        let opt_param_len = buf.len() - opt_param_len_pos - 1;
        buf[opt_param_len_pos] = opt_param_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Parse and validate BGP version.
        let version = buf.get_u8();
        if version != BGP_VERSION {
            return Err(
                OpenMessageError::UnsupportedVersion(BGP_VERSION).into()
            );
        }

        // Parse and validate ASN.
        let my_as = buf.get_u16();
        if my_as == 0 {
            return Err(OpenMessageError::BadPeerAs.into());
        }

        // Parse and validate hold time.
        let holdtime = buf.get_u16();
        if holdtime == 1 || holdtime == 2 {
            return Err(OpenMessageError::UnacceptableHoldTime.into());
        }

        // Parse and validate BGP identifier.
        let identifier = buf.get_ipv4();
        if identifier.is_unspecified()
            || identifier.is_multicast()
            || identifier.is_broadcast()
        {
            return Err(OpenMessageError::BadBgpIdentifier.into());
        }

        // Parse and validate optional parameters.
        let mut capabilities = BTreeSet::new();
        let opt_param_len = buf.get_u8();
        if opt_param_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut buf_opts = buf.copy_to_bytes(opt_param_len as usize);
        while buf_opts.remaining() > 0 {
            if buf_opts.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let param_type = buf_opts.get_u8();
            let param_len = buf_opts.get_u8();
            if param_len as usize > buf_opts.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut buf_param_value =
                buf_opts.copy_to_bytes(param_len as usize);

            // Parse and validate capabilities.
            match OpenParamType::from_u8(param_type) {
                Some(OpenParamType::Capabilities) => {
                    while buf_param_value.remaining() > 0 {
                        if let Some(cap) =
                            Capability::decode(&mut buf_param_value)?
                        {
                            capabilities.insert(cap);
                        }
                    }
                }
                None => {
                    return Err(OpenMessageError::UnsupportedOptParam.into());
                }
            }
        }

        Ok(OpenMsg {
            version,
            my_as,
            holdtime,
            identifier,
            capabilities,
        })
    }

    // Returns the real autonomous system number of the sender, resolving the
    // AS_TRANS placeholder through the 4-octet AS number capability.
    pub fn real_as(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|cap| {
                if let Capability::FourOctetAsNumber { asn } = cap {
                    Some(*asn)
                } else {
                    None
                }
            })
            .unwrap_or(self.my_as as u32)
    }
}

// ===== impl Capability =====

impl Capability {
    fn encode(&self, buf: &mut BytesMut) {
        let start_pos = buf.len();

        match self {
            Capability::MultiProtocol { afi, safi } => {
                buf.put_u8(CapabilityCode::MultiProtocol as u8);
                buf.put_u8(0);
                buf.put_u16(*afi as u16);
                buf.put_u8(0);
                buf.put_u8(*safi as u8);
            }
            Capability::RouteRefresh => {
                buf.put_u8(CapabilityCode::RouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::CiscoRouteRefresh => {
                buf.put_u8(CapabilityCode::CiscoRouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::EnhancedRouteRefresh => {
                buf.put_u8(CapabilityCode::EnhancedRouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::ExtendedMessage => {
                buf.put_u8(CapabilityCode::ExtendedMessage as u8);
                buf.put_u8(0);
            }
            Capability::FourOctetAsNumber { asn } => {
                buf.put_u8(CapabilityCode::FourOctetAsNumber as u8);
                buf.put_u8(0);
                buf.put_u32(*asn);
            }
            Capability::AddPath(tuples) => {
                buf.put_u8(CapabilityCode::AddPath as u8);
                buf.put_u8(0);
                for tuple in tuples {
                    buf.put_u16(tuple.afi as u16);
                    buf.put_u8(tuple.safi as u8);
                    buf.put_u8(tuple.mode as u8);
                }
            }
            Capability::GracefulRestart(gr) => {
                buf.put_u8(CapabilityCode::GracefulRestart as u8);
                buf.put_u8(0);
                buf.put_u16(
                    ((gr.flags.bits() as u16) << 12)
                        | (gr.restart_time & 0x0FFF),
                );
                for ((afi, safi), flags) in &gr.families {
                    buf.put_u16(*afi as u16);
                    buf.put_u8(*safi as u8);
                    buf.put_u8(flags.bits());
                }
            }
            Capability::Multisession(session_ids) => {
                buf.put_u8(CapabilityCode::Multisession as u8);
                buf.put_u8(0);
                for session_id in session_ids {
                    buf.put_u8(*session_id);
                }
            }
            Capability::Fqdn { hostname, domain } => {
                buf.put_u8(CapabilityCode::Fqdn as u8);
                buf.put_u8(0);
                buf.put_u8(hostname.len() as u8);
                buf.put_slice(hostname.as_bytes());
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
            }
            Capability::SoftwareVersion(version) => {
                buf.put_u8(CapabilityCode::SoftwareVersion as u8);
                buf.put_u8(0);
                buf.put_u8(version.len() as u8);
                buf.put_slice(version.as_bytes());
            }
        }

        // Rewrite the "Capability Length" field.
        let cap_len = buf.len() - start_pos - 2;
        buf[start_pos + 1] = cap_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Option<Self>> {
        if buf.remaining() < 2 {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let cap_type = buf.get_u8();
        let cap_len = buf.get_u8();
        if cap_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }

        let mut buf_cap = buf.copy_to_bytes(cap_len as usize);
        let cap = match CapabilityCode::from_u8(cap_type) {
            Some(CapabilityCode::MultiProtocol) => {
                if cap_len != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let afi = buf_cap.get_u16();
                let Some(afi) = Afi::from_u16(afi) else {
                    // Ignore unknown AFI.
                    return Ok(None);
                };
                let _reserved = buf_cap.get_u8();
                let safi = buf_cap.get_u8();
                let Some(safi) = Safi::from_u8(safi) else {
                    // Ignore unknown SAFI.
                    return Ok(None);
                };

                Capability::MultiProtocol { afi, safi }
            }
            Some(CapabilityCode::RouteRefresh) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::RouteRefresh
            }
            Some(CapabilityCode::CiscoRouteRefresh) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::CiscoRouteRefresh
            }
            Some(CapabilityCode::EnhancedRouteRefresh) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::EnhancedRouteRefresh
            }
            Some(CapabilityCode::ExtendedMessage) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::ExtendedMessage
            }
            Some(CapabilityCode::FourOctetAsNumber) => {
                if cap_len != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let asn = buf_cap.get_u32();
                Capability::FourOctetAsNumber { asn }
            }
            Some(CapabilityCode::AddPath) => {
                if cap_len % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let mut tuples = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let Some(afi) = Afi::from_u16(afi) else {
                        // Ignore unknown AFI.
                        return Ok(None);
                    };
                    let safi = buf_cap.get_u8();
                    let Some(safi) = Safi::from_u8(safi) else {
                        // Ignore unknown SAFI.
                        return Ok(None);
                    };
                    let mode = buf_cap.get_u8();
                    let Some(mode) = AddPathMode::from_u8(mode) else {
                        // Ignore unknown value.
                        return Ok(None);
                    };
                    tuples.insert(AddPathTuple { afi, safi, mode });
                }
                Capability::AddPath(tuples)
            }
            Some(CapabilityCode::GracefulRestart) => {
                if cap_len < 2 || (cap_len - 2) % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let value = buf_cap.get_u16();
                let flags = GrFlags::from_bits_truncate((value >> 12) as u8);
                let restart_time = value & 0x0FFF;
                let mut families = BTreeMap::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let safi = buf_cap.get_u8();
                    let af_flags =
                        GrAfiSafiFlags::from_bits_truncate(buf_cap.get_u8());
                    let (Some(afi), Some(safi)) =
                        (Afi::from_u16(afi), Safi::from_u8(safi))
                    else {
                        // Ignore unknown address families.
                        continue;
                    };
                    families.insert((afi, safi), af_flags);
                }
                Capability::GracefulRestart(GracefulRestart {
                    restart_time,
                    flags,
                    families,
                })
            }
            Some(CapabilityCode::Multisession) => {
                let mut session_ids = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    session_ids.insert(buf_cap.get_u8());
                }
                Capability::Multisession(session_ids)
            }
            Some(CapabilityCode::Fqdn) => {
                if cap_len < 2 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let hostname_len = buf_cap.get_u8() as usize;
                if hostname_len > buf_cap.remaining() {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                let hostname = buf_cap.copy_to_bytes(hostname_len);
                if buf_cap.remaining() < 1 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                let domain_len = buf_cap.get_u8() as usize;
                if domain_len > buf_cap.remaining() {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                let domain = buf_cap.copy_to_bytes(domain_len);

                Capability::Fqdn {
                    hostname: String::from_utf8_lossy(&hostname).into_owned(),
                    domain: String::from_utf8_lossy(&domain).into_owned(),
                }
            }
            Some(CapabilityCode::SoftwareVersion) => {
                if cap_len < 1 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let version_len = buf_cap.get_u8() as usize;
                if version_len > buf_cap.remaining() {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                let version = buf_cap.copy_to_bytes(version_len);

                Capability::SoftwareVersion(
                    String::from_utf8_lossy(&version).into_owned(),
                )
            }
            _ => {
                // Ignore unknown capability.
                return Ok(None);
            }
        };

        Ok(Some(cap))
    }

    pub fn code(&self) -> CapabilityCode {
        match self {
            Capability::MultiProtocol { .. } => CapabilityCode::MultiProtocol,
            Capability::RouteRefresh => CapabilityCode::RouteRefresh,
            Capability::CiscoRouteRefresh => {
                CapabilityCode::CiscoRouteRefresh
            }
            Capability::EnhancedRouteRefresh => {
                CapabilityCode::EnhancedRouteRefresh
            }
            Capability::ExtendedMessage => CapabilityCode::ExtendedMessage,
            Capability::FourOctetAsNumber { .. } => {
                CapabilityCode::FourOctetAsNumber
            }
            Capability::AddPath { .. } => CapabilityCode::AddPath,
            Capability::GracefulRestart(_) => CapabilityCode::GracefulRestart,
            Capability::Multisession(_) => CapabilityCode::Multisession,
            Capability::Fqdn { .. } => CapabilityCode::Fqdn,
            Capability::SoftwareVersion(_) => CapabilityCode::SoftwareVersion,
        }
    }

    pub fn as_negotiated(&self) -> NegotiatedCapability {
        match self {
            Capability::MultiProtocol { afi, safi } => {
                NegotiatedCapability::MultiProtocol {
                    afi: *afi,
                    safi: *safi,
                }
            }
            Capability::RouteRefresh => NegotiatedCapability::RouteRefresh,
            Capability::CiscoRouteRefresh => {
                NegotiatedCapability::CiscoRouteRefresh
            }
            Capability::EnhancedRouteRefresh => {
                NegotiatedCapability::EnhancedRouteRefresh
            }
            Capability::ExtendedMessage => {
                NegotiatedCapability::ExtendedMessage
            }
            Capability::FourOctetAsNumber { .. } => {
                NegotiatedCapability::FourOctetAsNumber
            }
            Capability::AddPath { .. } => NegotiatedCapability::AddPath,
            Capability::GracefulRestart(_) => {
                NegotiatedCapability::GracefulRestart
            }
            Capability::Multisession(_) => NegotiatedCapability::Multisession,
            Capability::Fqdn { .. } => NegotiatedCapability::Fqdn,
            Capability::SoftwareVersion(_) => {
                NegotiatedCapability::SoftwareVersion
            }
        }
    }
}

// ===== impl Negotiated =====

impl Negotiated {
    // Computes the session parameters from the two OPEN messages once the
    // exchange completes. The result is immutable for the session's
    // duration.
    pub fn negotiate(sent: &OpenMsg, received: &OpenMsg) -> Negotiated {
        let sent_caps = &sent.capabilities;
        let recv_caps = &received.capabilities;

        // 4-octet AS number support requires both sides to advertise it.
        let asn4 = sent_caps
            .iter()
            .any(|cap| cap.code() == CapabilityCode::FourOctetAsNumber)
            && recv_caps
                .iter()
                .any(|cap| cap.code() == CapabilityCode::FourOctetAsNumber);

        // Negotiated families are the intersection of the advertised
        // multiprotocol capabilities. Peers that don't advertise any revert
        // to the implicit IPv4 unicast session.
        let sent_families = multiprotocol_families(sent_caps);
        let recv_families = multiprotocol_families(recv_caps);
        let families = if sent_families.is_empty() || recv_families.is_empty()
        {
            [AfiSafi::Ipv4Unicast].into()
        } else {
            sent_families
                .intersection(&recv_families)
                .copied()
                .collect()
        };

        // ADD-PATH is directional: we may send paths on a family iff we
        // advertised "send" and the peer advertised "receive", and vice
        // versa.
        let sent_addpath = addpath_tuples(sent_caps);
        let recv_addpath = addpath_tuples(recv_caps);
        let mut addpath_tx = BTreeSet::new();
        let mut addpath_rx = BTreeSet::new();
        for (afi_safi, sent_mode) in &sent_addpath {
            let Some(recv_mode) = recv_addpath.get(afi_safi) else {
                continue;
            };
            let sent_mode = *sent_mode as u8;
            let recv_mode = *recv_mode as u8;
            if sent_mode & AddPathMode::Send as u8 != 0
                && recv_mode & AddPathMode::Receive as u8 != 0
            {
                addpath_tx.insert(*afi_safi);
            }
            if sent_mode & AddPathMode::Receive as u8 != 0
                && recv_mode & AddPathMode::Send as u8 != 0
            {
                addpath_rx.insert(*afi_safi);
            }
        }

        // Extended message support requires both sides to advertise it.
        let max_msg_size = if sent_caps
            .iter()
            .any(|cap| cap.code() == CapabilityCode::ExtendedMessage)
            && recv_caps
                .iter()
                .any(|cap| cap.code() == CapabilityCode::ExtendedMessage)
        {
            Message::MAX_LEN_EXT
        } else {
            Message::MAX_LEN
        };

        // Both route-refresh variants are accepted interchangeably.
        let supports_rr = |caps: &BTreeSet<Capability>| {
            caps.iter().any(|cap| {
                matches!(
                    cap.code(),
                    CapabilityCode::RouteRefresh
                        | CapabilityCode::CiscoRouteRefresh
                )
            })
        };
        let route_refresh = supports_rr(sent_caps) && supports_rr(recv_caps);
        let enhanced_route_refresh = sent_caps
            .iter()
            .any(|cap| cap.code() == CapabilityCode::EnhancedRouteRefresh)
            && recv_caps
                .iter()
                .any(|cap| cap.code() == CapabilityCode::EnhancedRouteRefresh);

        // Graceful restart applies when both sides advertised it; the
        // parameters of interest are the peer's.
        let mut graceful_restart = None;
        if sent_caps
            .iter()
            .any(|cap| cap.code() == CapabilityCode::GracefulRestart)
            && let Some(gr) = recv_caps.iter().find_map(|cap| {
                if let Capability::GracefulRestart(gr) = cap {
                    Some(gr)
                } else {
                    None
                }
            })
        {
            graceful_restart = Some(GrNegotiated {
                restart_time: gr.restart_time,
                restarting: gr.flags.contains(GrFlags::RESTART_STATE),
                families: gr
                    .families
                    .iter()
                    .filter_map(|((afi, safi), flags)| {
                        AfiSafi::from_pair(*afi, *safi).map(|afi_safi| {
                            (
                                afi_safi,
                                flags.contains(GrAfiSafiFlags::FORWARDING),
                            )
                        })
                    })
                    .collect(),
            });
        }

        let multisession = sent_caps
            .iter()
            .any(|cap| cap.code() == CapabilityCode::Multisession)
            && recv_caps
                .iter()
                .any(|cap| cap.code() == CapabilityCode::Multisession);

        Negotiated {
            local_as: sent.real_as(),
            peer_as: received.real_as(),
            holdtime: std::cmp::min(sent.holdtime, received.holdtime),
            asn4,
            families,
            addpath_tx,
            addpath_rx,
            max_msg_size,
            route_refresh,
            enhanced_route_refresh,
            graceful_restart,
            multisession,
        }
    }
}

impl Default for Negotiated {
    fn default() -> Negotiated {
        Negotiated {
            local_as: 0,
            peer_as: 0,
            holdtime: 0,
            asn4: false,
            families: [AfiSafi::Ipv4Unicast].into(),
            addpath_tx: Default::default(),
            addpath_rx: Default::default(),
            max_msg_size: Message::MAX_LEN,
            route_refresh: false,
            enhanced_route_refresh: false,
            graceful_restart: None,
            multisession: false,
        }
    }
}

// ===== impl UpdateMsg =====

impl UpdateMsg {
    pub const MIN_LEN: u16 = 23;

    pub(crate) fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8(MessageType::Update as u8);
        let addpath = cxt
            .negotiated
            .addpath_tx
            .contains(&AfiSafi::Ipv4Unicast);

        // Withdrawn Routes.
        let start_pos = buf.len();
        buf.put_u16(0);
        if let Some(unreach) = &self.unreach {
            // Encode prefixes.
            for prefix in &unreach.prefixes {
                prefix.encode(buf, addpath);
            }

            // Rewrite the "Withdrawn Routes Length" field.
            let len = (buf.len() - start_pos - 2) as u16;
            buf[start_pos..start_pos + 2].copy_from_slice(&len.to_be_bytes());
        }

        // Path Attributes.
        let start_pos = buf.len();
        buf.put_u16(0);
        if self.attrs.is_some() || self.mp_reach.is_some()
            || self.mp_unreach.is_some()
        {
            // Encode path attributes.
            Attrs::encode_all(
                buf,
                self.attrs.as_ref(),
                &self.reach,
                &self.mp_reach,
                &self.mp_unreach,
                cxt,
            );

            // Rewrite the "Total Path Attribute Length" field.
            let len = (buf.len() - start_pos - 2) as u16;
            buf[start_pos..start_pos + 2].copy_from_slice(&len.to_be_bytes());
        }

        // Network Layer Reachability Information.
        if let Some(reach) = &self.reach {
            // Encode prefixes.
            for prefix in &reach.prefixes {
                prefix.encode(buf, addpath);
            }
        }
    }

    pub fn decode(buf: &mut Bytes, cxt: &DecodeCxt) -> DecodeResult<Self> {
        let mut reach = None;
        let mut unreach = None;
        let mut mp_reach = None;
        let mut mp_unreach = None;
        let mut attrs = None;
        let mut nexthop = None;
        let addpath = cxt
            .negotiated
            .addpath_rx
            .contains(&AfiSafi::Ipv4Unicast);

        // Withdrawn Routes Length.
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let wdraw_len = buf.get_u16();
        if wdraw_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }

        // Withdrawn Routes.
        let mut buf_wdraw = buf.copy_to_bytes(wdraw_len as usize);
        let mut prefixes = Vec::new();
        while buf_wdraw.remaining() > 0 {
            if let Some(nlri) = Nlri::decode(
                AfiSafi::Ipv4Unicast,
                &mut buf_wdraw,
                true,
                addpath,
            )? {
                prefixes.push(nlri);
            }
        }
        if !prefixes.is_empty() {
            unreach = Some(UnreachNlri { prefixes });
        }

        // Total Path Attribute Length.
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let attr_len = buf.get_u16();
        if attr_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }

        // Path Attributes.
        if attr_len != 0 {
            let mut buf_attr = buf.copy_to_bytes(attr_len as usize);
            let nlri_present = buf.remaining() > 0;
            attrs = Attrs::decode(
                &mut buf_attr,
                cxt,
                &mut nexthop,
                nlri_present,
                &mut mp_unreach,
                &mut mp_reach,
            )?;
        }

        // Network Layer Reachability Information.
        //
        // All prefixes are ignored if the NEXT_HOP attribute is missing.
        let mut prefixes = Vec::new();
        while buf.remaining() > 0 {
            if let Some(nlri) =
                Nlri::decode(AfiSafi::Ipv4Unicast, buf, false, addpath)?
            {
                prefixes.push(nlri);
            }
        }
        if !prefixes.is_empty()
            && let Some(nexthop) = nexthop
        {
            reach = Some(ReachNlri { prefixes, nexthop });
        }

        Ok(UpdateMsg {
            reach,
            unreach,
            mp_reach,
            mp_unreach,
            attrs,
        })
    }

    // Builds an End-of-RIB marker for the given address family.
    //
    // IPv4 unicast uses the empty UPDATE form; every other family an UPDATE
    // whose only attribute is an empty MP_UNREACH_NLRI.
    pub fn eor(afi_safi: AfiSafi) -> UpdateMsg {
        let mut msg = UpdateMsg::default();
        if !afi_safi.is_legacy_unicast() {
            msg.mp_unreach = Some(MpUnreachNlri {
                afi_safi,
                nlri: vec![],
            });
        }
        msg
    }

    // Checks whether the message is an End-of-RIB marker, returning the
    // address family it applies to.
    pub fn as_eor(&self) -> Option<AfiSafi> {
        if self.reach.is_some()
            || self.unreach.is_some()
            || self.mp_reach.is_some()
            || self.attrs.is_some()
        {
            return None;
        }
        match &self.mp_unreach {
            None => Some(AfiSafi::Ipv4Unicast),
            Some(mp_unreach) if mp_unreach.nlri.is_empty() => {
                Some(mp_unreach.afi_safi)
            }
            Some(_) => None,
        }
    }
}

// ===== impl NotificationMsg =====

impl NotificationMsg {
    const MIN_LEN: u16 = 21;

    pub(crate) fn new(
        error_code: impl ToPrimitive,
        error_subcode: impl ToPrimitive,
    ) -> Self {
        NotificationMsg {
            error_code: error_code.to_u8().unwrap(),
            error_subcode: error_subcode.to_u8().unwrap(),
            data: Default::default(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Notification as u8);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let error_code = buf.get_u8();
        let error_subcode = buf.get_u8();

        Ok(NotificationMsg {
            error_code,
            error_subcode,
            data: buf.to_vec(),
        })
    }
}

impl From<DecodeError> for NotificationMsg {
    fn from(error: DecodeError) -> NotificationMsg {
        let error_code;
        let error_subcode;
        let data = vec![];

        match error {
            DecodeError::ReadOutOfBounds => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = MessageHeaderErrorSubcode::Unspecific as u8;
            }
            DecodeError::MessageHeader(error) => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = match error {
                    MessageHeaderError::ReadOutOfBounds => {
                        MessageHeaderErrorSubcode::Unspecific
                    }
                    MessageHeaderError::ConnectionNotSynchronized => {
                        MessageHeaderErrorSubcode::ConnectionNotSynchronized
                    }
                    MessageHeaderError::BadMessageLength(..) => {
                        MessageHeaderErrorSubcode::BadMessageLength
                    }
                    MessageHeaderError::BadMessageType(..) => {
                        MessageHeaderErrorSubcode::BadMessageType
                    }
                } as u8;
            }
            DecodeError::OpenMessage(error) => {
                error_code = ErrorCode::OpenMessageError as u8;
                error_subcode = match error {
                    OpenMessageError::ReadOutOfBounds => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                    OpenMessageError::UnsupportedVersion(..) => {
                        OpenMessageErrorSubcode::UnsupportedVersionNumber
                    }
                    OpenMessageError::BadPeerAs => {
                        OpenMessageErrorSubcode::BadPeerAs
                    }
                    OpenMessageError::BadBgpIdentifier => {
                        OpenMessageErrorSubcode::BadBgpIdentifier
                    }
                    OpenMessageError::UnsupportedOptParam => {
                        OpenMessageErrorSubcode::UnsupportedOptParam
                    }
                    OpenMessageError::UnacceptableHoldTime => {
                        OpenMessageErrorSubcode::UnacceptableHoldTime
                    }
                    OpenMessageError::UnsupportedCapability => {
                        OpenMessageErrorSubcode::UnsupportedCapability
                    }
                    OpenMessageError::MalformedOptParam => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                } as u8;
            }
            DecodeError::UpdateMessage(error) => {
                error_code = ErrorCode::UpdateMessageError as u8;
                error_subcode = match error {
                    UpdateMessageError::ReadOutOfBounds => {
                        UpdateMessageErrorSubcode::Unspecific
                    }
                    UpdateMessageError::MalformedAttributeList => {
                        UpdateMessageErrorSubcode::MalformedAttributeList
                    }
                    UpdateMessageError::UnrecognizedWellKnownAttribute => {
                        UpdateMessageErrorSubcode::UnrecognizedWellKnownAttribute
                    }
                    UpdateMessageError::OptionalAttributeError => {
                        UpdateMessageErrorSubcode::OptionalAttributeError
                    }
                    UpdateMessageError::InvalidNetworkField => {
                        UpdateMessageErrorSubcode::InvalidNetworkField
                    }
                } as u8;
            }
            DecodeError::RouteRefreshMessage(error) => {
                error_code = ErrorCode::RouteRefreshMessageError as u8;
                error_subcode = match error {
                    RouteRefreshMessageError::InvalidMessageLength(..) => {
                        RouteRefreshErrorSubcode::InvalidMessageLength
                    }
                } as u8;
            }
        }

        NotificationMsg {
            error_code,
            error_subcode,
            data,
        }
    }
}

impl std::fmt::Display for NotificationMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {} subcode {}", self.error_code, self.error_subcode)
    }
}

// ===== impl KeepaliveMsg =====

impl KeepaliveMsg {
    const LEN: u16 = 19;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Keepalive as u8);
    }

    pub fn decode(_buf: &mut Bytes) -> DecodeResult<Self> {
        // A KEEPALIVE message consists of only the message header.
        Ok(KeepaliveMsg {})
    }
}

// ===== impl RouteRefreshMsg =====

impl RouteRefreshMsg {
    const LEN: u16 = 23;

    pub(crate) fn new(afi: u16, safi: u8) -> RouteRefreshMsg {
        RouteRefreshMsg {
            afi,
            subtype: 0,
            safi,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::RouteRefresh as u8);
        buf.put_u16(self.afi);
        buf.put_u8(self.subtype);
        buf.put_u8(self.safi);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.get_u16();
        let subtype = buf.get_u8();
        let safi = buf.get_u8();
        Ok(RouteRefreshMsg { afi, subtype, safi })
    }
}

// ===== helper functions =====

fn multiprotocol_families(
    capabilities: &BTreeSet<Capability>,
) -> BTreeSet<AfiSafi> {
    capabilities
        .iter()
        .filter_map(|cap| {
            if let Capability::MultiProtocol { afi, safi } = cap {
                AfiSafi::from_pair(*afi, *safi)
            } else {
                None
            }
        })
        .collect()
}

fn addpath_tuples(
    capabilities: &BTreeSet<Capability>,
) -> BTreeMap<AfiSafi, AddPathMode> {
    capabilities
        .iter()
        .filter_map(|cap| {
            if let Capability::AddPath(tuples) = cap {
                Some(tuples)
            } else {
                None
            }
        })
        .flatten()
        .filter_map(|tuple| {
            AfiSafi::from_pair(tuple.afi, tuple.safi)
                .map(|afi_safi| (afi_safi, tuple.mode))
        })
        .collect()
}
