//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use num_traits::{FromPrimitive, ToPrimitive};
use parley_utils::bgp::AfiSafi;
use parley_utils::ip::{
    Ipv4AddrExt, Ipv4NetworkExt, Ipv6AddrExt, Ipv6NetworkExt,
};
use serde::{Deserialize, Serialize};

use crate::af::AfiSafiExt;
use crate::packet::consts::{Afi, FlowComponentType};
use crate::packet::error::UpdateMessageError;

// Operator byte flags common to the numeric and bitmask forms (RFC 5575).
const OP_END_OF_LIST: u8 = 0x80;
const OP_AND: u8 = 0x40;
const OP_LEN_MASK: u8 = 0x30;
const OP_LEN_SHIFT: u8 = 4;

// Numeric operator comparison bits.
pub const OP_LT: u8 = 0x04;
pub const OP_GT: u8 = 0x02;
pub const OP_EQ: u8 = 0x01;

// Bitmask operator bits.
pub const OP_NOT: u8 = 0x02;
pub const OP_MATCH: u8 = 0x01;

//
// Flow Specification NLRI (RFC 5575 / RFC 8956).
//
// Encoding format:
//
// +------------------------------+
// |    length (0xnn or 0xfnnn)   |
// +------------------------------+
// |    NLRI value  (variable)    |
// +------------------------------+
//
// Components MUST appear in ascending type order and at most once each.
//
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct FlowspecNlri {
    pub afi_safi: AfiSafi,
    pub components: Vec<FlowComponent>,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum FlowComponent {
    DestinationPrefix { prefix: IpNetwork, offset: u8 },
    SourcePrefix { prefix: IpNetwork, offset: u8 },
    IpProtocol(Vec<FlowOp>),
    Port(Vec<FlowOp>),
    DestinationPort(Vec<FlowOp>),
    SourcePort(Vec<FlowOp>),
    IcmpType(Vec<FlowOp>),
    IcmpCode(Vec<FlowOp>),
    TcpFlags(Vec<FlowOp>),
    PacketLength(Vec<FlowOp>),
    Dscp(Vec<FlowOp>),
    Fragment(Vec<FlowOp>),
    FlowLabel(Vec<FlowOp>),
}

// A single {operator, value} pair. The operator byte is stored with the
// end-of-list bit cleared; it is reinstated on the final pair at encode
// time, preserving the original AND and length bits for exact re-encoding.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct FlowOp {
    pub op: u8,
    pub value: u64,
}

// ===== impl FlowspecNlri =====

impl FlowspecNlri {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        // Encode components into a scratch buffer first since the length
        // prefix width depends on the total size.
        let mut body = BytesMut::new();
        for component in &self.components {
            component.encode(&mut body);
        }

        if body.len() < 0xF0 {
            buf.put_u8(body.len() as u8);
        } else {
            buf.put_u16(0xF000 | body.len() as u16);
        }
        buf.put_slice(&body);
    }

    pub(crate) fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
    ) -> Result<FlowspecNlri, UpdateMessageError> {
        // Parse the one- or two-byte length prefix.
        if buf.remaining() < 1 {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let first = buf.get_u8();
        let len = if first >= 0xF0 {
            if buf.remaining() < 1 {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            ((first as usize & 0x0F) << 8) | buf.get_u8() as usize
        } else {
            first as usize
        };
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField);
        }
        let mut buf = buf.copy_to_bytes(len);

        // Parse components, enforcing the ascending type order.
        let mut components = Vec::new();
        let mut last_type = 0;
        while buf.remaining() > 0 {
            let component_type = buf.get_u8();
            if component_type <= last_type {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            last_type = component_type;

            let component =
                FlowComponent::decode(component_type, afi_safi, &mut buf)?;
            components.push(component);
        }

        Ok(FlowspecNlri {
            afi_safi,
            components,
        })
    }
}

impl std::fmt::Display for FlowspecNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow")?;
        for component in &self.components {
            write!(f, " {}", component)?;
        }
        Ok(())
    }
}

// ===== impl FlowComponent =====

impl FlowComponent {
    pub fn component_type(&self) -> FlowComponentType {
        match self {
            FlowComponent::DestinationPrefix { .. } => {
                FlowComponentType::DestinationPrefix
            }
            FlowComponent::SourcePrefix { .. } => {
                FlowComponentType::SourcePrefix
            }
            FlowComponent::IpProtocol(_) => FlowComponentType::IpProtocol,
            FlowComponent::Port(_) => FlowComponentType::Port,
            FlowComponent::DestinationPort(_) => {
                FlowComponentType::DestinationPort
            }
            FlowComponent::SourcePort(_) => FlowComponentType::SourcePort,
            FlowComponent::IcmpType(_) => FlowComponentType::IcmpType,
            FlowComponent::IcmpCode(_) => FlowComponentType::IcmpCode,
            FlowComponent::TcpFlags(_) => FlowComponentType::TcpFlags,
            FlowComponent::PacketLength(_) => FlowComponentType::PacketLength,
            FlowComponent::Dscp(_) => FlowComponentType::Dscp,
            FlowComponent::Fragment(_) => FlowComponentType::Fragment,
            FlowComponent::FlowLabel(_) => FlowComponentType::FlowLabel,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.component_type().to_u8().unwrap());

        match self {
            FlowComponent::DestinationPrefix { prefix, offset }
            | FlowComponent::SourcePrefix { prefix, offset } => match prefix {
                IpNetwork::V4(prefix) => {
                    let plen = prefix.prefix();
                    buf.put_u8(plen);
                    let bytes = prefix.ip().octets();
                    buf.put(&bytes[..(plen as usize).div_ceil(8)]);
                }
                IpNetwork::V6(prefix) => {
                    let plen = prefix.prefix();
                    buf.put_u8(plen);
                    buf.put_u8(*offset);
                    let bytes = prefix.ip().octets();
                    let first = *offset as usize / 8;
                    let last = (plen as usize).div_ceil(8);
                    buf.put(&bytes[first..last]);
                }
            },
            FlowComponent::IpProtocol(ops)
            | FlowComponent::Port(ops)
            | FlowComponent::DestinationPort(ops)
            | FlowComponent::SourcePort(ops)
            | FlowComponent::IcmpType(ops)
            | FlowComponent::IcmpCode(ops)
            | FlowComponent::TcpFlags(ops)
            | FlowComponent::PacketLength(ops)
            | FlowComponent::Dscp(ops)
            | FlowComponent::Fragment(ops)
            | FlowComponent::FlowLabel(ops) => {
                for (pos, op) in ops.iter().enumerate() {
                    op.encode(buf, pos == ops.len() - 1);
                }
            }
        }
    }

    fn decode(
        component_type: u8,
        afi_safi: AfiSafi,
        buf: &mut Bytes,
    ) -> Result<FlowComponent, UpdateMessageError> {
        let component_type = FlowComponentType::from_u8(component_type)
            .ok_or(UpdateMessageError::InvalidNetworkField)?;

        let component = match component_type {
            FlowComponentType::DestinationPrefix
            | FlowComponentType::SourcePrefix => {
                let (prefix, offset) = decode_flow_prefix(afi_safi, buf)?;
                if component_type == FlowComponentType::DestinationPrefix {
                    FlowComponent::DestinationPrefix { prefix, offset }
                } else {
                    FlowComponent::SourcePrefix { prefix, offset }
                }
            }
            _ => {
                // All remaining components share the {operator, value} list
                // encoding.
                let mut ops = Vec::new();
                loop {
                    if buf.remaining() < 1 {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    let op = buf.get_u8();
                    let value_len =
                        1usize << ((op & OP_LEN_MASK) >> OP_LEN_SHIFT);
                    if buf.remaining() < value_len {
                        return Err(UpdateMessageError::InvalidNetworkField);
                    }
                    let mut value = 0u64;
                    for _ in 0..value_len {
                        value = (value << 8) | buf.get_u8() as u64;
                    }
                    ops.push(FlowOp {
                        op: op & !OP_END_OF_LIST,
                        value,
                    });
                    if op & OP_END_OF_LIST != 0 {
                        break;
                    }
                }

                match component_type {
                    FlowComponentType::IpProtocol => {
                        FlowComponent::IpProtocol(ops)
                    }
                    FlowComponentType::Port => FlowComponent::Port(ops),
                    FlowComponentType::DestinationPort => {
                        FlowComponent::DestinationPort(ops)
                    }
                    FlowComponentType::SourcePort => {
                        FlowComponent::SourcePort(ops)
                    }
                    FlowComponentType::IcmpType => {
                        FlowComponent::IcmpType(ops)
                    }
                    FlowComponentType::IcmpCode => {
                        FlowComponent::IcmpCode(ops)
                    }
                    FlowComponentType::TcpFlags => {
                        FlowComponent::TcpFlags(ops)
                    }
                    FlowComponentType::PacketLength => {
                        FlowComponent::PacketLength(ops)
                    }
                    FlowComponentType::Dscp => FlowComponent::Dscp(ops),
                    FlowComponentType::Fragment => {
                        FlowComponent::Fragment(ops)
                    }
                    FlowComponentType::FlowLabel => {
                        FlowComponent::FlowLabel(ops)
                    }
                    FlowComponentType::DestinationPrefix
                    | FlowComponentType::SourcePrefix => unreachable!(),
                }
            }
        };

        Ok(component)
    }
}

impl std::fmt::Display for FlowComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowComponent::DestinationPrefix { prefix, .. } => {
                write!(f, "destination {}", prefix)
            }
            FlowComponent::SourcePrefix { prefix, .. } => {
                write!(f, "source {}", prefix)
            }
            FlowComponent::IpProtocol(ops) => {
                write!(f, "protocol {}", ops_to_string(ops, false))
            }
            FlowComponent::Port(ops) => {
                write!(f, "port {}", ops_to_string(ops, false))
            }
            FlowComponent::DestinationPort(ops) => {
                write!(f, "destination-port {}", ops_to_string(ops, false))
            }
            FlowComponent::SourcePort(ops) => {
                write!(f, "source-port {}", ops_to_string(ops, false))
            }
            FlowComponent::IcmpType(ops) => {
                write!(f, "icmp-type {}", ops_to_string(ops, false))
            }
            FlowComponent::IcmpCode(ops) => {
                write!(f, "icmp-code {}", ops_to_string(ops, false))
            }
            FlowComponent::TcpFlags(ops) => {
                write!(f, "tcp-flags {}", ops_to_string(ops, true))
            }
            FlowComponent::PacketLength(ops) => {
                write!(f, "packet-length {}", ops_to_string(ops, false))
            }
            FlowComponent::Dscp(ops) => {
                write!(f, "dscp {}", ops_to_string(ops, false))
            }
            FlowComponent::Fragment(ops) => {
                write!(f, "fragment {}", ops_to_string(ops, true))
            }
            FlowComponent::FlowLabel(ops) => {
                write!(f, "flow-label {}", ops_to_string(ops, false))
            }
        }
    }
}

// ===== impl FlowOp =====

impl FlowOp {
    // Builds a numeric "equals" operator for the given value.
    pub fn eq(value: u64) -> FlowOp {
        FlowOp {
            op: OP_EQ | Self::value_len_bits(value),
            value,
        }
    }

    // Builds a numeric "greater than or equal" operator.
    pub fn gte(value: u64) -> FlowOp {
        FlowOp {
            op: OP_GT | OP_EQ | Self::value_len_bits(value),
            value,
        }
    }

    // Builds a numeric "less than or equal" operator.
    pub fn lte(value: u64) -> FlowOp {
        FlowOp {
            op: OP_LT | OP_EQ | Self::value_len_bits(value),
            value,
        }
    }

    // Builds a bitmask "match" operator.
    pub fn bitmask_match(value: u64) -> FlowOp {
        FlowOp {
            op: OP_MATCH | Self::value_len_bits(value),
            value,
        }
    }

    // Marks the operator as ANDed with the previous one in the list.
    pub fn and(mut self) -> FlowOp {
        self.op |= OP_AND;
        self
    }

    fn value_len_bits(value: u64) -> u8 {
        let len_code: u8 = if value <= 0xFF {
            0
        } else if value <= 0xFFFF {
            1
        } else if value <= 0xFFFF_FFFF {
            2
        } else {
            3
        };
        len_code << OP_LEN_SHIFT
    }

    fn encode(&self, buf: &mut BytesMut, last: bool) {
        let mut op = self.op;
        if last {
            op |= OP_END_OF_LIST;
        }
        buf.put_u8(op);

        let value_len = 1usize << ((self.op & OP_LEN_MASK) >> OP_LEN_SHIFT);
        let bytes = self.value.to_be_bytes();
        buf.put_slice(&bytes[8 - value_len..]);
    }
}

// ===== helper functions =====

// Decodes the destination/source prefix component. The IPv6 form carries an
// extra pattern offset octet (RFC 8956).
fn decode_flow_prefix(
    afi_safi: AfiSafi,
    buf: &mut Bytes,
) -> Result<(IpNetwork, u8), UpdateMessageError> {
    match afi_safi.afi() {
        Afi::Ipv4 => {
            if buf.remaining() < 1 {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let plen = buf.get_u8();
            if plen > Ipv4Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let wire = (plen as usize).div_ceil(8);
            if wire > buf.remaining() {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut bytes = [0; Ipv4Addr::LENGTH];
            buf.copy_to_slice(&mut bytes[..wire]);
            let prefix = Ipv4Network::new(Ipv4Addr::from(bytes), plen)
                .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
            Ok((IpNetwork::V4(prefix.apply_mask()), 0))
        }
        _ => {
            if buf.remaining() < 2 {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let plen = buf.get_u8();
            let offset = buf.get_u8();
            if plen > Ipv6Network::MAX_PREFIXLEN || offset >= plen {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let first = offset as usize / 8;
            let last = (plen as usize).div_ceil(8);
            if last - first > buf.remaining() {
                return Err(UpdateMessageError::InvalidNetworkField);
            }
            let mut bytes = [0; Ipv6Addr::LENGTH];
            buf.copy_to_slice(&mut bytes[first..last]);
            let prefix = Ipv6Network::new(Ipv6Addr::from(bytes), plen)
                .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
            Ok((IpNetwork::V6(prefix.apply_mask()), offset))
        }
    }
}

fn ops_to_string(ops: &[FlowOp], bitmask: bool) -> String {
    let mut output = String::new();
    for (pos, op) in ops.iter().enumerate() {
        if pos > 0 {
            output.push_str(if op.op & OP_AND != 0 { "&" } else { " " });
        }
        if bitmask {
            if op.op & OP_NOT != 0 {
                output.push('!');
            }
            output.push_str(&format!("{:#x}", op.value));
        } else {
            match op.op & (OP_LT | OP_GT | OP_EQ) {
                value if value == OP_EQ => output.push('='),
                value if value == OP_LT => output.push('<'),
                value if value == OP_GT => output.push('>'),
                value if value == (OP_LT | OP_EQ) => output.push_str("<="),
                value if value == (OP_GT | OP_EQ) => output.push_str(">="),
                value if value == (OP_LT | OP_GT) => output.push_str("!="),
                _ => (),
            }
            output.push_str(&op.value.to_string());
        }
    }
    output
}
