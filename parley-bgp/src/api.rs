//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::str::FromStr;

use chrono::Utc;
use ipnetwork::IpNetwork;
use parley_utils::bgp::{
    AfiSafi, Comm, ExtComm, LargeComm, Label, Labels, Origin, PathId,
    RouteDistinguisher,
};
use serde_json::{Value, json};

use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, fsm};
use crate::packet::attribute::{
    AsPath, AsPathSegment, Attrs, CommList,
};
use crate::packet::consts::AsPathSegmentType;
use crate::packet::flowspec::{FlowComponent, FlowOp, FlowspecNlri};
use crate::packet::message::{EncodeCxt, Message};
use crate::packet::nlri::{Nlri, NlriValue, UnicastNlri, VpnNlri, LabeledNlri};
use crate::rib::Change;

// A single line received on the API channel.
#[derive(Debug)]
pub struct ApiRequest {
    pub line: String,
}

// Commands understood by the API channel. The verbs mirror the text
// protocol spoken by helper processes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    AnnounceRoute {
        neighbors: Vec<IpAddr>,
        change: Change,
        watchdog: Option<String>,
    },
    WithdrawRoute {
        neighbors: Vec<IpAddr>,
        change: Change,
    },
    AnnounceFlow {
        neighbors: Vec<IpAddr>,
        change: Change,
    },
    WithdrawFlow {
        neighbors: Vec<IpAddr>,
        change: Change,
    },
    AnnounceEor {
        neighbors: Vec<IpAddr>,
        afi_safi: AfiSafi,
    },
    AnnounceRouteRefresh {
        neighbors: Vec<IpAddr>,
        afi_safi: AfiSafi,
    },
    Watchdog {
        neighbors: Vec<IpAddr>,
        name: String,
        announce: bool,
    },
    ShowNeighbor {
        extensive: bool,
    },
    ShowRoutes,
    Shutdown,
    Restart,
    Reload,
}

// API command errors. These are reported back to the caller and never
// affect running sessions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandError {
    UnknownCommand(String),
    InvalidArgument(String),
    UnknownNeighbor(IpAddr),
}

// ===== impl CommandError =====

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::UnknownCommand(command) => {
                write!(f, "unknown command: {command}")
            }
            CommandError::InvalidArgument(arg) => {
                write!(f, "invalid argument: {arg}")
            }
            CommandError::UnknownNeighbor(addr) => {
                write!(f, "unknown neighbor: {addr}")
            }
        }
    }
}

impl std::error::Error for CommandError {}

// ===== impl Command =====

impl Command {
    // Parses one line of the text command protocol.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        // Braces and separators of the flow grammar are treated as plain
        // token boundaries so both the flattened and the block forms are
        // accepted.
        let line = line.replace(['{', '}', ';'], " ");
        let mut tokens = line.split_whitespace().peekable();

        // Optional, repeatable "neighbor <ip>" fan-out restriction.
        let mut neighbors = Vec::new();
        while tokens.peek() == Some(&"neighbor") {
            tokens.next();
            let addr = tokens
                .next()
                .ok_or_else(|| missing_argument("neighbor"))?;
            let addr = addr
                .parse::<IpAddr>()
                .map_err(|_| CommandError::InvalidArgument(addr.to_owned()))?;
            neighbors.push(addr);
        }

        let verb = tokens
            .next()
            .ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        match (verb, tokens.peek().copied()) {
            ("announce", Some("route")) => {
                tokens.next();
                let (change, watchdog) =
                    parse_route(&mut tokens, false)?;
                Ok(Command::AnnounceRoute {
                    neighbors,
                    change,
                    watchdog,
                })
            }
            ("withdraw", Some("route")) => {
                tokens.next();
                let (change, _) = parse_route(&mut tokens, true)?;
                Ok(Command::WithdrawRoute { neighbors, change })
            }
            ("announce", Some("flow")) => {
                tokens.next();
                let change = parse_flow(&mut tokens, false)?;
                Ok(Command::AnnounceFlow { neighbors, change })
            }
            ("withdraw", Some("flow")) => {
                tokens.next();
                let change = parse_flow(&mut tokens, true)?;
                Ok(Command::WithdrawFlow { neighbors, change })
            }
            ("announce", Some("eor")) => {
                tokens.next();
                let afi_safi = parse_afi_safi(&mut tokens)?;
                Ok(Command::AnnounceEor { neighbors, afi_safi })
            }
            ("announce", Some("route-refresh")) => {
                tokens.next();
                let afi_safi = parse_afi_safi(&mut tokens)?;
                Ok(Command::AnnounceRouteRefresh { neighbors, afi_safi })
            }
            ("announce", Some("operational")) => {
                // The operational-message capability is not implemented;
                // the verb is recognized so callers get a proper error
                // reply instead of an unknown-command one.
                Err(CommandError::InvalidArgument(
                    "operational messages are not supported".to_owned(),
                ))
            }
            ("announce", Some("watchdog")) => {
                tokens.next();
                let name = tokens
                    .next()
                    .ok_or_else(|| missing_argument("watchdog"))?;
                Ok(Command::Watchdog {
                    neighbors,
                    name: name.to_owned(),
                    announce: true,
                })
            }
            ("withdraw", Some("watchdog")) => {
                tokens.next();
                let name = tokens
                    .next()
                    .ok_or_else(|| missing_argument("watchdog"))?;
                Ok(Command::Watchdog {
                    neighbors,
                    name: name.to_owned(),
                    announce: false,
                })
            }
            ("watchdog", Some(action @ ("announce" | "withdraw"))) => {
                tokens.next();
                let name = tokens
                    .next()
                    .ok_or_else(|| missing_argument("watchdog"))?;
                Ok(Command::Watchdog {
                    neighbors,
                    name: name.to_owned(),
                    announce: action == "announce",
                })
            }
            ("show", Some("neighbor")) => {
                tokens.next();
                let extensive = matches!(tokens.next(), Some("extensive"));
                Ok(Command::ShowNeighbor { extensive })
            }
            ("show", Some("routes")) => Ok(Command::ShowRoutes),
            ("shutdown", _) => Ok(Command::Shutdown),
            ("restart", _) => Ok(Command::Restart),
            ("reload", _) => Ok(Command::Reload),
            _ => Err(CommandError::UnknownCommand(verb.to_owned())),
        }
    }
}

// ===== command parsing helpers =====

fn missing_argument(what: &str) -> CommandError {
    CommandError::InvalidArgument(format!("missing {what} argument"))
}

// Parses the attribute list of an "announce route" or "withdraw route"
// command and assembles the corresponding route change.
fn parse_route<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    withdraw: bool,
) -> Result<(Change, Option<String>), CommandError> {
    let prefix = tokens.next().ok_or_else(|| missing_argument("prefix"))?;
    let prefix = prefix
        .parse::<IpNetwork>()
        .map_err(|_| CommandError::InvalidArgument(prefix.to_owned()))?;

    let mut attrs = Attrs::new(Origin::Igp);
    let mut labels = Labels::default();
    let mut rd = None;
    let mut path_id = None;
    let mut watchdog = None;

    while let Some(key) = tokens.next() {
        match key {
            "next-hop" => {
                let value = next_value(tokens, key)?;
                if value == "self" {
                    // Resolved at transmission time from the session source
                    // address; left unset here.
                    continue;
                }
                let addr = value.parse::<IpAddr>().map_err(|_| {
                    CommandError::InvalidArgument(value.to_owned())
                })?;
                attrs.base.nexthop = Some(addr);
            }
            "origin" => {
                let value = next_value(tokens, key)?;
                attrs.base.origin = Origin::from_str(value).map_err(|_| {
                    CommandError::InvalidArgument(value.to_owned())
                })?;
            }
            "med" => {
                attrs.base.med = Some(next_number(tokens, key)?);
            }
            "local-preference" => {
                attrs.base.local_pref = Some(next_number(tokens, key)?);
            }
            "as-path" => {
                let members = next_list(tokens, key)?
                    .into_iter()
                    .map(|asn| {
                        asn.parse::<u32>().map_err(|_| {
                            CommandError::InvalidArgument(asn.to_owned())
                        })
                    })
                    .collect::<Result<_, _>>()?;
                attrs.base.as_path = AsPath {
                    segments: [AsPathSegment {
                        seg_type: AsPathSegmentType::Sequence,
                        members,
                    }]
                    .into(),
                };
            }
            "community" => {
                let list = next_list(tokens, key)?
                    .into_iter()
                    .map(|comm| {
                        Comm::from_str(comm).map_err(|_| {
                            CommandError::InvalidArgument(comm.to_owned())
                        })
                    })
                    .collect::<Result<_, _>>()?;
                attrs.comm = Some(CommList(list));
            }
            "large-community" => {
                let list = next_list(tokens, key)?
                    .into_iter()
                    .map(|comm| {
                        LargeComm::from_str(comm).map_err(|_| {
                            CommandError::InvalidArgument(comm.to_owned())
                        })
                    })
                    .collect::<Result<_, _>>()?;
                attrs.large_comm = Some(CommList(list));
            }
            "extended-community" => {
                let list = next_list(tokens, key)?
                    .into_iter()
                    .map(parse_ext_comm)
                    .collect::<Result<_, _>>()?;
                attrs.ext_comm = Some(CommList(list));
            }
            "label" => {
                let list = next_list(tokens, key)?
                    .into_iter()
                    .map(|label| {
                        label.parse::<u32>().map(Label).map_err(|_| {
                            CommandError::InvalidArgument(label.to_owned())
                        })
                    })
                    .collect::<Result<_, _>>()?;
                labels = Labels(list);
            }
            "rd" | "route-distinguisher" => {
                let value = next_value(tokens, key)?;
                rd = Some(RouteDistinguisher::from_str(value).map_err(
                    |_| CommandError::InvalidArgument(value.to_owned()),
                )?);
            }
            "path-information" => {
                path_id = Some(PathId(next_number(tokens, key)?));
            }
            "watchdog" => {
                watchdog = Some(next_value(tokens, key)?.to_owned());
            }
            "withdraw" => {
                // Accepted as a trailing marker for watchdog routes created
                // in the withdrawn state.
            }
            _ => {
                return Err(CommandError::InvalidArgument(key.to_owned()));
            }
        }
    }

    // Pick the address family from the assembled qualifiers.
    let value = if let Some(rd) = rd {
        let afi_safi = match prefix {
            IpNetwork::V4(_) => AfiSafi::Ipv4Vpn,
            IpNetwork::V6(_) => AfiSafi::Ipv6Vpn,
        };
        NlriValue::Vpn(VpnNlri {
            afi_safi,
            rd,
            labels,
            prefix,
        })
    } else if !labels.0.is_empty() {
        let afi_safi = match prefix {
            IpNetwork::V4(_) => AfiSafi::Ipv4LabeledUnicast,
            IpNetwork::V6(_) => AfiSafi::Ipv6LabeledUnicast,
        };
        NlriValue::Labeled(LabeledNlri {
            afi_safi,
            prefix,
            labels,
        })
    } else {
        let afi_safi = match prefix {
            IpNetwork::V4(_) => AfiSafi::Ipv4Unicast,
            IpNetwork::V6(_) => AfiSafi::Ipv6Unicast,
        };
        NlriValue::Unicast(UnicastNlri { afi_safi, prefix })
    };
    let nlri = Nlri { path_id, value };

    let change = if withdraw {
        Change::Withdraw { nlri }
    } else {
        Change::Announce { nlri, attrs }
    };
    Ok((change, watchdog))
}

// Parses an "announce flow" or "withdraw flow" rule.
fn parse_flow<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    withdraw: bool,
) -> Result<Change, CommandError> {
    // Leading "route" and "match" keywords of the configuration grammar.
    while matches!(tokens.peek(), Some(&"route") | Some(&"match")) {
        tokens.next();
    }

    let mut components: Vec<FlowComponent> = Vec::new();
    let mut attrs = Attrs::new(Origin::Igp);
    let mut afi_safi = AfiSafi::Ipv4Flowspec;
    let mut then = false;

    while let Some(key) = tokens.next() {
        if key == "then" {
            then = true;
            continue;
        }
        if !then {
            match key {
                "destination" => {
                    let prefix = next_prefix(tokens, key)?;
                    if prefix.is_ipv6() {
                        afi_safi = AfiSafi::Ipv6Flowspec;
                    }
                    components.push(FlowComponent::DestinationPrefix {
                        prefix,
                        offset: 0,
                    });
                }
                "source" => {
                    let prefix = next_prefix(tokens, key)?;
                    if prefix.is_ipv6() {
                        afi_safi = AfiSafi::Ipv6Flowspec;
                    }
                    components.push(FlowComponent::SourcePrefix {
                        prefix,
                        offset: 0,
                    });
                }
                "protocol" => components
                    .push(FlowComponent::IpProtocol(next_ops(tokens, key)?)),
                "port" => components
                    .push(FlowComponent::Port(next_ops(tokens, key)?)),
                "destination-port" => components.push(
                    FlowComponent::DestinationPort(next_ops(tokens, key)?),
                ),
                "source-port" => components
                    .push(FlowComponent::SourcePort(next_ops(tokens, key)?)),
                "icmp-type" => components
                    .push(FlowComponent::IcmpType(next_ops(tokens, key)?)),
                "icmp-code" => components
                    .push(FlowComponent::IcmpCode(next_ops(tokens, key)?)),
                "tcp-flags" => components
                    .push(FlowComponent::TcpFlags(next_ops(tokens, key)?)),
                "packet-length" => components.push(
                    FlowComponent::PacketLength(next_ops(tokens, key)?),
                ),
                "dscp" => components
                    .push(FlowComponent::Dscp(next_ops(tokens, key)?)),
                "fragment" => components
                    .push(FlowComponent::Fragment(next_ops(tokens, key)?)),
                "flow-label" => components
                    .push(FlowComponent::FlowLabel(next_ops(tokens, key)?)),
                _ => {
                    return Err(CommandError::InvalidArgument(key.to_owned()));
                }
            }
        } else {
            // Actions map to extended communities (RFC 5575).
            let mut ext_comm = attrs
                .ext_comm
                .take()
                .map(|list| list.0)
                .unwrap_or_default();
            match key {
                "discard" => {
                    ext_comm.insert(ExtComm::traffic_rate(0, 0.0));
                }
                "rate-limit" => {
                    let rate = next_value(tokens, key)?;
                    let rate = rate.parse::<f32>().map_err(|_| {
                        CommandError::InvalidArgument(rate.to_owned())
                    })?;
                    ext_comm.insert(ExtComm::traffic_rate(0, rate));
                }
                "redirect" => {
                    let target = next_value(tokens, key)?;
                    let (asn, local) =
                        target.split_once(':').ok_or_else(|| {
                            CommandError::InvalidArgument(target.to_owned())
                        })?;
                    let asn = asn.parse::<u16>().map_err(|_| {
                        CommandError::InvalidArgument(target.to_owned())
                    })?;
                    let local = local.parse::<u32>().map_err(|_| {
                        CommandError::InvalidArgument(target.to_owned())
                    })?;
                    ext_comm.insert(ExtComm::redirect(asn, local));
                }
                "mark" => {
                    let dscp = next_number::<u8>(tokens, key)?;
                    ext_comm.insert(ExtComm::traffic_mark(dscp));
                }
                "community" => {
                    let list = next_list(tokens, key)?
                        .into_iter()
                        .map(|comm| {
                            Comm::from_str(comm).map_err(|_| {
                                CommandError::InvalidArgument(comm.to_owned())
                            })
                        })
                        .collect::<Result<_, _>>()?;
                    attrs.comm = Some(CommList(list));
                }
                _ => {
                    return Err(CommandError::InvalidArgument(key.to_owned()));
                }
            }
            if !ext_comm.is_empty() {
                attrs.ext_comm = Some(CommList(ext_comm));
            }
        }
    }

    // Components are transmitted in ascending type order.
    components.sort_by_key(|component| component.component_type());

    let nlri = Nlri {
        path_id: None,
        value: NlriValue::Flowspec(FlowspecNlri {
            afi_safi,
            components,
        }),
    };
    let change = if withdraw {
        Change::Withdraw { nlri }
    } else {
        Change::Announce { nlri, attrs }
    };
    Ok(change)
}

fn next_value<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    key: &str,
) -> Result<&'a str, CommandError> {
    tokens.next().ok_or_else(|| missing_argument(key))
}

fn next_number<'a, T: FromStr>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    key: &str,
) -> Result<T, CommandError> {
    let value = next_value(tokens, key)?;
    value
        .parse::<T>()
        .map_err(|_| CommandError::InvalidArgument(value.to_owned()))
}

fn next_prefix<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    key: &str,
) -> Result<IpNetwork, CommandError> {
    let value = next_value(tokens, key)?;
    value
        .parse::<IpNetwork>()
        .map_err(|_| CommandError::InvalidArgument(value.to_owned()))
}

// Parses a "[ a b c ]" bracketed list or a single bare token.
fn next_list<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    key: &str,
) -> Result<Vec<&'a str>, CommandError> {
    let first = next_value(tokens, key)?;
    if first != "[" {
        return Ok(vec![first]);
    }
    let mut list = Vec::new();
    for token in tokens.by_ref() {
        if token == "]" {
            return Ok(list);
        }
        list.push(token);
    }
    Err(CommandError::InvalidArgument(format!(
        "unterminated {key} list"
    )))
}

// Parses a numeric operator expression such as "=25", ">=1024&<=65535" or a
// bare value.
fn next_ops<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
    key: &str,
) -> Result<Vec<FlowOp>, CommandError> {
    let values = next_list(tokens, key)?;
    let mut ops = Vec::new();
    for value in values {
        for (pos, part) in value.split('&').enumerate() {
            let (build, number): (fn(u64) -> FlowOp, &str) =
                if let Some(rest) = part.strip_prefix(">=") {
                    (FlowOp::gte, rest)
                } else if let Some(rest) = part.strip_prefix("<=") {
                    (FlowOp::lte, rest)
                } else if let Some(rest) = part.strip_prefix('=') {
                    (FlowOp::eq, rest)
                } else {
                    (FlowOp::eq, part)
                };
            let number = number.parse::<u64>().map_err(|_| {
                CommandError::InvalidArgument(part.to_owned())
            })?;
            let mut op = build(number);
            if pos > 0 {
                op = op.and();
            }
            ops.push(op);
        }
    }
    Ok(ops)
}

// Parses an "<afi> <safi>" pair such as "ipv4 unicast".
fn parse_afi_safi<'a>(
    tokens: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
) -> Result<AfiSafi, CommandError> {
    let afi = next_value(tokens, "afi")?;
    let safi = next_value(tokens, "safi")?;
    let name = format!("{afi} {safi}");
    AfiSafi::ALL
        .iter()
        .find(|afi_safi| afi_safi.to_string() == name)
        .copied()
        .ok_or(CommandError::InvalidArgument(name))
}

fn parse_ext_comm(value: &str) -> Result<ExtComm, CommandError> {
    let Some((kind, rest)) = value.split_once(':') else {
        return Err(CommandError::InvalidArgument(value.to_owned()));
    };
    let (asn, local) = rest
        .split_once(':')
        .ok_or_else(|| CommandError::InvalidArgument(value.to_owned()))?;
    let asn = asn
        .parse::<u32>()
        .map_err(|_| CommandError::InvalidArgument(value.to_owned()))?;
    let local = local
        .parse::<u32>()
        .map_err(|_| CommandError::InvalidArgument(value.to_owned()))?;
    match kind {
        "target" => Ok(ExtComm::route_target(asn, local)),
        "origin" => Ok(ExtComm::route_origin(asn as u16, local)),
        _ => Err(CommandError::InvalidArgument(value.to_owned())),
    }
}

// ===== event encoding =====

// Envelope keyed for drop-in compatibility with existing helper processes.
fn envelope(
    instance: &InstanceUpView<'_>,
    event_type: &str,
    neighbor: Option<Value>,
) -> Value {
    let mut value = json!({
        "exabgp": env!("CARGO_PKG_VERSION"),
        "time": Utc::now().timestamp_millis() as f64 / 1000.0,
        "type": event_type,
    });
    if let Some(hostname) = &instance.config.hostname {
        value["host"] = json!(hostname);
    }
    if let Some(neighbor) = neighbor {
        value["neighbor"] = neighbor;
    }
    value
}

fn neighbor_value(instance: &InstanceUpView<'_>, nbr: &Neighbor) -> Value {
    json!({
        "address": {
            "local": nbr.conn_info.as_ref()
                .map(|conn_info| conn_info.local_addr.to_string()),
            "peer": nbr.remote_addr.to_string(),
        },
        "asn": {
            "local": nbr.config.local_as.unwrap_or(instance.config.asn),
            "peer": nbr.config.peer_as,
        },
    })
}

// Emits a neighbor state-change event ("up", "connected", "down").
pub(crate) fn notify_state_change(
    instance: &mut InstanceUpView<'_>,
    nbr: &Neighbor,
    new_state: fsm::State,
) {
    let state = match new_state {
        fsm::State::Established => "up",
        fsm::State::OpenSent | fsm::State::OpenConfirm => "connected",
        _ if nbr.state == fsm::State::Established => "down",
        _ => return,
    };

    let mut neighbor = neighbor_value(instance, nbr);
    neighbor["state"] = json!(state);
    if state == "down" {
        if let Some((_, notif)) = &nbr.notification_rcvd {
            neighbor["reason"] = json!(format!("notification received ({notif})"));
        } else if let Some((_, notif)) = &nbr.notification_sent {
            neighbor["reason"] = json!(format!("notification sent ({notif})"));
        }
    }
    let event = envelope(instance, "state", Some(neighbor));
    let _ = instance.tx.api_event.send(event);
}

// Emits a parsed-message event for the given direction.
pub(crate) fn notify_message(
    instance: &mut InstanceUpView<'_>,
    nbr: &Neighbor,
    direction: &str,
    msg: &Message,
) {
    let event_type = match msg {
        Message::Open(_) => "open",
        Message::Update(_) => "update",
        Message::Notification(_) => "notification",
        Message::Keepalive(_) => "keepalive",
        Message::RouteRefresh(_) => "refresh",
    };

    let mut neighbor = neighbor_value(instance, nbr);
    neighbor["direction"] = json!(direction);
    neighbor["message"] = serde_json::to_value(msg).unwrap_or(Value::Null);
    let event = envelope(instance, event_type, Some(neighbor));
    let _ = instance.tx.api_event.send(event);
}

// Emits a raw-packet event. The wire form is regenerated from the parsed
// message with the session parameters, which is byte-identical for every
// well-formed message.
pub(crate) fn notify_packet(
    instance: &mut InstanceUpView<'_>,
    nbr: &Neighbor,
    direction: &str,
    msg: &Message,
) {
    let cxt = EncodeCxt {
        negotiated: nbr.negotiated.clone().unwrap_or_default(),
    };
    let bytes = msg.encode(&cxt);
    let to_hex = |bytes: &[u8]| {
        bytes
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<String>()
    };

    let mut neighbor = neighbor_value(instance, nbr);
    neighbor["direction"] = json!(direction);
    neighbor["message"] = json!({
        "header": to_hex(&bytes[..19]),
        "body": to_hex(&bytes[19..]),
    });
    let event = envelope(instance, "packet", Some(neighbor));
    let _ = instance.tx.api_event.send(event);
}

// Emits an answer to a "show" command.
pub(crate) fn notify_answer(instance: &mut InstanceUpView<'_>, answer: Value) {
    let mut event = envelope(instance, "answer", None);
    event["answer"] = answer;
    let _ = instance.tx.api_event.send(event);
}

// Emits a "signal" event asking the embedding process to act (e.g. push a
// fresh configuration).
pub(crate) fn notify_signal(instance: &mut InstanceUpView<'_>, kind: &str) {
    let mut event = envelope(instance, "signal", None);
    event["signal"] = json!(kind);
    let _ = instance.tx.api_event.send(event);
}

// Emits an error reply for an unparseable or unprocessable command.
pub(crate) fn notify_error(
    instance: &mut InstanceUpView<'_>,
    line: &str,
    error: &CommandError,
) {
    let mut event = envelope(instance, "error", None);
    event["command"] = json!(line);
    event["error"] = json!(error.to_string());
    let _ = instance.tx.api_event.send(event);
}

// Builds the "show neighbor" answer.
pub(crate) fn show_neighbor(
    instance: &InstanceUpView<'_>,
    neighbors: &std::collections::BTreeMap<IpAddr, Neighbor>,
    extensive: bool,
) -> Value {
    let list = neighbors
        .values()
        .map(|nbr| {
            let mut value = json!({
                "address": nbr.remote_addr.to_string(),
                "asn": nbr.config.peer_as,
                "state": nbr.state.to_string(),
            });
            if extensive {
                value["local-asn"] =
                    json!(nbr.config.local_as.unwrap_or(instance.config.asn));
                value["identifier"] = json!(
                    nbr.identifier.map(|identifier| identifier.to_string())
                );
                value["hold-time"] = json!(nbr.holdtime_nego);
                value["messages"] = json!({
                    "updates-received": nbr.statistics.msgs_rcvd.updates,
                    "updates-sent": nbr.statistics.msgs_sent.updates,
                });
                if let Some(negotiated) = &nbr.negotiated {
                    value["families"] = json!(
                        negotiated
                            .families
                            .iter()
                            .map(|afi_safi| afi_safi.to_string())
                            .collect::<Vec<_>>()
                    );
                }
            }
            value
        })
        .collect::<Vec<_>>();
    json!(list)
}

// Builds the "show routes" answer from the per-neighbor Adj-RIB-In tables.
pub(crate) fn show_routes(
    neighbors: &std::collections::BTreeMap<IpAddr, Neighbor>,
) -> Value {
    let list = neighbors
        .values()
        .flat_map(|nbr| {
            nbr.adj_rib_in.routes.values().map(|route| {
                json!({
                    "neighbor": nbr.remote_addr.to_string(),
                    "nlri": route.nlri.to_string(),
                    "family": route.nlri.afi_safi().to_string(),
                    "stale": route.stale,
                })
            })
        })
        .collect::<Vec<_>>();
    json!(list)
}
