//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use parley_utils::bgp::AfiSafi;
use tracing::{debug, debug_span};

use crate::neighbor::fsm;
use crate::packet::consts::AttrType;
use crate::packet::error::AttrError;
use crate::packet::message::Message;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceStop(InstanceInactiveReason),
    InstanceReload,
    NbrFsmEvent(&'a IpAddr, &'a fsm::Event),
    NbrFsmTransition(&'a IpAddr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a IpAddr, &'a Message),
    NbrMsgTx(&'a IpAddr, &'a Message),
    NbrAttrError(AttrType, AttrError),
    NbrCollision(&'a IpAddr, bool),
    NbrEorRcvd(&'a IpAddr, AfiSafi),
    NbrGrStaleSweep(&'a IpAddr, usize),
    ApiCommandRx(&'a str),
}

// Reason why an BGP instance is inactive.
#[derive(Debug)]
pub enum InstanceInactiveReason {
    AdminDown,
    MissingRouterId,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceReload => {
                // Parent span(s): bgp-instance
                debug!("{}", self);
            }
            Debug::InstanceStop(reason) => {
                // Parent span(s): bgp-instance
                debug!(%reason, "{}", self);
            }
            Debug::NbrFsmEvent(addr, event) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    })
                });
            }
            Debug::NbrFsmTransition(addr, old_state, new_state) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::NbrMsgRx(addr, msg) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrMsgTx(addr, msg) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    })
                });
            }
            Debug::NbrAttrError(attr_type, action) => {
                // Parent span(s): bgp-instance
                debug!(?attr_type, ?action, "{}", self);
            }
            Debug::NbrCollision(addr, local_wins) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!(%local_wins, "{}", self);
                });
            }
            Debug::NbrEorRcvd(addr, afi_safi) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!(%afi_safi, "{}", self);
                });
            }
            Debug::NbrGrStaleSweep(addr, removed) => {
                // Parent span(s): bgp-instance
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug!(%removed, "{}", self);
                });
            }
            Debug::ApiCommandRx(line) => {
                // Parent span(s): bgp-instance
                debug_span!("api").in_scope(|| {
                    debug!(%line, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop(..) => {
                write!(f, "stopping instance")
            }
            Debug::InstanceReload => {
                write!(f, "reloading configuration")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) | Debug::NbrMsgTx(..) => {
                write!(f, "message")
            }
            Debug::NbrAttrError(..) => {
                write!(f, "malformed attribute")
            }
            Debug::NbrCollision(..) => {
                write!(f, "connection collision resolved")
            }
            Debug::NbrEorRcvd(..) => {
                write!(f, "end-of-rib received")
            }
            Debug::NbrGrStaleSweep(..) => {
                write!(f, "stale routes removed")
            }
            Debug::ApiCommandRx(..) => {
                write!(f, "command")
            }
        }
    }
}

// ===== impl InstanceInactiveReason =====

impl std::fmt::Display for InstanceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceInactiveReason::AdminDown => {
                write!(f, "administrative status down")
            }
            InstanceInactiveReason::MissingRouterId => {
                write!(f, "missing router-id")
            }
        }
    }
}
