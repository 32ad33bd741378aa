//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};

use parley_utils::bgp::AfiSafi;
use parley_utils::socket::TcpAoKey;
use serde::{Deserialize, Serialize};

use crate::packet::consts::AddPathMode;
use crate::rib::Change;

// Default timer values, in seconds.
pub const DFLT_HOLDTIME: u16 = 180;
pub const DFLT_CONNECT_RETRY_INTERVAL: u16 = 30;

// Typed configuration consumed by the instance. Producing it (from a
// configuration file, a DSL or anything else) is the caller's business.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Configuration {
    pub asn: u32,
    pub identifier: Option<Ipv4Addr>,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub software_version: Option<String>,
    pub neighbors: BTreeMap<IpAddr, NeighborCfg>,
}

// Per-neighbor configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborCfg {
    pub enabled: bool,
    pub peer_as: u32,
    pub local_as: Option<u32>,
    pub timers: NeighborTimersCfg,
    pub transport: NeighborTransportCfg,
    pub capabilities: NeighborCapabilitiesCfg,
    pub families: BTreeSet<AfiSafi>,
    // Routes injected as soon as the session reaches Established.
    pub static_routes: Vec<Change>,
    pub api: ApiCfg,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborTimersCfg {
    pub connect_retry_interval: u16,
    pub holdtime: u16,
    pub keepalive: Option<u16>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborTransportCfg {
    pub local_addr: Option<IpAddr>,
    pub tcp_mss: Option<u16>,
    pub ebgp_multihop_enabled: bool,
    pub ebgp_multihop_ttl: Option<u8>,
    pub passive_mode: bool,
    pub ttl_security: Option<u8>,
    pub md5_key: Option<String>,
    pub ao_key: Option<TcpAoKey>,
}

// Capabilities offered in the OPEN message. What ends up applying to the
// session is the negotiated intersection.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborCapabilitiesCfg {
    pub asn4: bool,
    pub route_refresh: bool,
    pub cisco_route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    // Restart time in seconds; `None` disables graceful restart.
    pub graceful_restart: Option<u16>,
    pub add_path: BTreeMap<AfiSafi, AddPathMode>,
    pub multisession: bool,
    pub hostname: bool,
    pub software_version: bool,
}

// Which events are forwarded to the API channel for this neighbor.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ApiCfg {
    pub neighbor_changes: bool,
    pub receive_parsed: bool,
    pub receive_packets: bool,
    pub send_parsed: bool,
    pub send_packets: bool,
}

// ===== impl Configuration =====

impl Configuration {
    pub fn new(asn: u32, identifier: Ipv4Addr) -> Configuration {
        Configuration {
            asn,
            identifier: Some(identifier),
            hostname: None,
            domain: None,
            software_version: None,
            neighbors: Default::default(),
        }
    }
}

// ===== impl NeighborCfg =====

impl Default for NeighborCfg {
    fn default() -> NeighborCfg {
        NeighborCfg {
            enabled: true,
            peer_as: 0,
            local_as: None,
            timers: Default::default(),
            transport: Default::default(),
            capabilities: Default::default(),
            families: [AfiSafi::Ipv4Unicast].into(),
            static_routes: vec![],
            api: Default::default(),
        }
    }
}

impl Default for NeighborTimersCfg {
    fn default() -> NeighborTimersCfg {
        NeighborTimersCfg {
            connect_retry_interval: DFLT_CONNECT_RETRY_INTERVAL,
            holdtime: DFLT_HOLDTIME,
            keepalive: None,
        }
    }
}

impl Default for NeighborTransportCfg {
    fn default() -> NeighborTransportCfg {
        NeighborTransportCfg {
            local_addr: None,
            tcp_mss: None,
            ebgp_multihop_enabled: false,
            ebgp_multihop_ttl: None,
            passive_mode: false,
            ttl_security: None,
            md5_key: None,
            ao_key: None,
        }
    }
}

impl Default for NeighborCapabilitiesCfg {
    fn default() -> NeighborCapabilitiesCfg {
        NeighborCapabilitiesCfg {
            asn4: true,
            route_refresh: true,
            cisco_route_refresh: false,
            enhanced_route_refresh: false,
            extended_message: false,
            graceful_restart: None,
            add_path: Default::default(),
            multisession: false,
            hostname: false,
            software_version: false,
        }
    }
}
