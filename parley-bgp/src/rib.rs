//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parley_utils::bgp::AfiSafi;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafiExt;
use crate::packet::attribute::Attrs;
use crate::packet::message::{
    EncodeCxt, Message, MpReachNlri, MpUnreachNlri, ReachNlri, UnreachNlri,
    UpdateMsg,
};
use crate::packet::nlri::Nlri;

// Key identifying one NLRI within an Adj-RIB: the address family plus the
// canonical packed form of the entry (path-id included when present).
pub type RouteKey = (AfiSafi, Bytes);

// A route pending transmission or received from a peer.
#[derive(Clone, Debug)]
pub struct Route {
    pub nlri: Nlri,
    pub attrs: Arc<AttrSet>,
    pub last_modified: Instant,
    // Kept across a session loss when graceful restart negotiated that
    // forwarding state was preserved; swept on End-of-RIB or timer expiry.
    pub stale: bool,
}

// A route delta produced by the API or configuration and consumed by the
// Adj-RIB-Out. Withdrawals carry no attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Change {
    Announce { nlri: Nlri, attrs: Attrs },
    Withdraw { nlri: Nlri },
}

// Interned attribute set, shared by all routes carrying the same
// attributes.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AttrSet {
    pub index: u64,
    pub value: Attrs,
}

// Process-wide content-addressed map of attribute sets.
#[derive(Debug, Default)]
pub struct AttrSets {
    tree: BTreeMap<Attrs, Arc<AttrSet>>,
    next_index: u64,
}

// Per-peer table of received routes.
#[derive(Debug, Default)]
pub struct AdjRibIn {
    pub routes: BTreeMap<RouteKey, Route>,
}

// Per-peer table of advertised routes plus the queue of changes not yet on
// the wire.
#[derive(Debug, Default)]
pub struct AdjRibOut {
    pub advertised: BTreeMap<RouteKey, Route>,
    pending: BTreeMap<RouteKey, Change>,
}

// ===== impl Change =====

impl Change {
    pub fn nlri(&self) -> &Nlri {
        match self {
            Change::Announce { nlri, .. } => nlri,
            Change::Withdraw { nlri } => nlri,
        }
    }

    pub fn key(&self) -> RouteKey {
        let nlri = self.nlri();
        (nlri.afi_safi(), nlri.index())
    }
}

// ===== impl AttrSets =====

impl AttrSets {
    pub fn get(&mut self, attrs: &Attrs) -> Arc<AttrSet> {
        if let Some(attr_set) = self.tree.get(attrs) {
            Arc::clone(attr_set)
        } else {
            self.next_index += 1;
            let attr_set = Arc::new(AttrSet {
                index: self.next_index,
                value: attrs.clone(),
            });
            self.tree.insert(attrs.clone(), Arc::clone(&attr_set));
            attr_set
        }
    }

    // Drops interned sets no longer referenced by any route.
    pub fn sweep(&mut self) {
        self.tree
            .retain(|_, attr_set| Arc::strong_count(attr_set) > 1);
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

// ===== impl AdjRibIn =====

impl AdjRibIn {
    // Applies one announcement, overwriting any previous entry for the same
    // key (last-write-wins).
    pub fn update(&mut self, nlri: Nlri, attrs: Arc<AttrSet>) {
        let key = (nlri.afi_safi(), nlri.index());
        self.routes.insert(
            key,
            Route {
                nlri,
                attrs,
                last_modified: Instant::now(),
                stale: false,
            },
        );
    }

    // Applies one withdrawal.
    pub fn withdraw(&mut self, nlri: &Nlri) {
        let key = (nlri.afi_safi(), nlri.index());
        self.routes.remove(&key);
    }

    // Marks all routes as stale at the start of a graceful restart.
    pub fn mark_stale(&mut self) {
        for route in self.routes.values_mut() {
            route.stale = true;
        }
    }

    // Removes routes for the family that were not refreshed before the
    // End-of-RIB marker (or the restart timer) and returns how many were
    // dropped.
    pub fn sweep_stale(&mut self, afi_safi: AfiSafi) -> usize {
        let before = self.routes.len();
        self.routes.retain(|(family, _), route| {
            *family != afi_safi || !route.stale
        });
        before - self.routes.len()
    }

    // Removes every route that is still marked stale, regardless of family.
    pub fn sweep_all_stale(&mut self) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| !route.stale);
        before - self.routes.len()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

// ===== impl AdjRibOut =====

impl AdjRibOut {
    // Enqueues a route change. A change pending for the same key is
    // superseded.
    pub fn enqueue(&mut self, change: Change) {
        self.pending.insert(change.key(), change);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // Re-enqueues the entire advertised state, used when a session is
    // re-established or a ROUTE-REFRESH is received.
    pub fn replay(&mut self, afi_safi: Option<AfiSafi>) {
        let changes = self
            .advertised
            .values()
            .filter(|route| match afi_safi {
                Some(afi_safi) => route.nlri.afi_safi() == afi_safi,
                None => true,
            })
            .map(|route| Change::Announce {
                nlri: route.nlri.clone(),
                attrs: route.attrs.value.clone(),
            })
            .collect::<Vec<_>>();
        for change in changes {
            self.enqueue(change);
        }
    }

    pub fn clear(&mut self) {
        self.advertised.clear();
        self.pending.clear();
    }

    // Generates UPDATE messages for all pending changes, grouping
    // announcements that share the same attributes and splitting each group
    // so that no message exceeds the negotiated maximum size.
    pub fn build_updates(
        &mut self,
        attr_sets: &mut AttrSets,
        cxt: &EncodeCxt,
    ) -> Vec<Message> {
        let mut reach = BTreeMap::<(AfiSafi, Attrs), Vec<Nlri>>::new();
        let mut unreach = BTreeMap::<AfiSafi, Vec<Nlri>>::new();

        // Group pending changes by attributes identity, updating the
        // advertised state as we go.
        for (key, change) in std::mem::take(&mut self.pending) {
            match change {
                Change::Announce { nlri, attrs } => {
                    let attr_set = attr_sets.get(&attrs);
                    self.advertised.insert(
                        key,
                        Route {
                            nlri: nlri.clone(),
                            attrs: attr_set,
                            last_modified: Instant::now(),
                            stale: false,
                        },
                    );
                    reach
                        .entry((nlri.afi_safi(), attrs))
                        .or_default()
                        .push(nlri);
                }
                Change::Withdraw { nlri } => {
                    // Only advertised routes need an explicit withdrawal.
                    if self.advertised.remove(&key).is_none() {
                        continue;
                    }
                    unreach.entry(nlri.afi_safi()).or_default().push(nlri);
                }
            }
        }

        let mut msgs = vec![];

        // Withdrawals go out first so that superseded state never outlives
        // replacement announcements within the batch.
        for (afi_safi, nlri_list) in unreach {
            build_unreach_updates(&mut msgs, afi_safi, nlri_list, cxt);
        }
        for ((afi_safi, attrs), nlri_list) in reach {
            build_reach_updates(&mut msgs, afi_safi, attrs, nlri_list, cxt);
        }

        msgs
    }
}

// ===== helper functions =====

// Number of bytes one NLRI occupies on the wire for the session.
fn nlri_wire_len(nlri: &Nlri, addpath: bool) -> usize {
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, addpath);
    buf.len()
}

fn build_reach_updates(
    msgs: &mut Vec<Message>,
    afi_safi: AfiSafi,
    attrs: Attrs,
    nlri_list: Vec<Nlri>,
    cxt: &EncodeCxt,
) {
    use crate::packet::attribute::{ATTR_MIN_LEN_EXT, nexthop};

    let addpath = cxt.negotiated.addpath_tx.contains(&afi_safi);
    let nexthop_v4 = match attrs.base.nexthop {
        Some(IpAddr::V4(addr)) => Some(addr),
        _ => None,
    };
    let legacy = afi_safi.is_legacy_unicast() && nexthop_v4.is_some();

    // Fixed overhead of each generated message.
    let mp_nexthop = afi_safi.mp_nexthop(&attrs.base);
    let overhead = if legacy {
        attrs.length() + nexthop::length()
    } else {
        attrs.length()
            + ATTR_MIN_LEN_EXT
            + MpReachNlri::MIN_LEN
            + mp_nexthop.length() as u16
    };
    let room = (cxt.negotiated.max_msg_size as usize)
        .saturating_sub((UpdateMsg::MIN_LEN + overhead) as usize);

    let mut chunk: Vec<Nlri> = vec![];
    let mut chunk_size = 0;
    let mut flush =
        |msgs: &mut Vec<Message>, chunk: &mut Vec<Nlri>, chunk_size: &mut usize| {
            if chunk.is_empty() {
                return;
            }
            let prefixes = std::mem::take(chunk);
            *chunk_size = 0;
            let msg = if legacy {
                UpdateMsg {
                    reach: Some(ReachNlri {
                        prefixes,
                        nexthop: nexthop_v4.unwrap(),
                    }),
                    unreach: None,
                    mp_reach: None,
                    mp_unreach: None,
                    attrs: Some(attrs.clone()),
                }
            } else {
                UpdateMsg {
                    reach: None,
                    unreach: None,
                    mp_reach: Some(MpReachNlri {
                        afi_safi,
                        nexthop: mp_nexthop,
                        nlri: prefixes,
                    }),
                    mp_unreach: None,
                    attrs: Some(attrs.clone()),
                }
            };
            msgs.push(Message::Update(msg));
        };

    for nlri in nlri_list {
        let len = nlri_wire_len(&nlri, addpath);
        if chunk_size + len > room && !chunk.is_empty() {
            flush(msgs, &mut chunk, &mut chunk_size);
        }
        chunk_size += len;
        chunk.push(nlri);
    }
    flush(msgs, &mut chunk, &mut chunk_size);
}

fn build_unreach_updates(
    msgs: &mut Vec<Message>,
    afi_safi: AfiSafi,
    nlri_list: Vec<Nlri>,
    cxt: &EncodeCxt,
) {
    use crate::packet::attribute::ATTR_MIN_LEN_EXT;

    let addpath = cxt.negotiated.addpath_tx.contains(&afi_safi);
    let legacy = afi_safi.is_legacy_unicast();
    let overhead = if legacy {
        0
    } else {
        ATTR_MIN_LEN_EXT + MpUnreachNlri::MIN_LEN
    };
    let room = (cxt.negotiated.max_msg_size as usize)
        .saturating_sub((UpdateMsg::MIN_LEN + overhead) as usize);

    let mut chunk: Vec<Nlri> = vec![];
    let mut chunk_size = 0;
    let mut flush =
        |msgs: &mut Vec<Message>, chunk: &mut Vec<Nlri>, chunk_size: &mut usize| {
            if chunk.is_empty() {
                return;
            }
            let prefixes = std::mem::take(chunk);
            *chunk_size = 0;
            let msg = if legacy {
                UpdateMsg {
                    reach: None,
                    unreach: Some(UnreachNlri { prefixes }),
                    mp_reach: None,
                    mp_unreach: None,
                    attrs: None,
                }
            } else {
                UpdateMsg {
                    reach: None,
                    unreach: None,
                    mp_reach: None,
                    mp_unreach: Some(MpUnreachNlri {
                        afi_safi,
                        nlri: prefixes,
                    }),
                    attrs: None,
                }
            };
            msgs.push(Message::Update(msg));
        };

    for nlri in nlri_list {
        let len = nlri_wire_len(&nlri, addpath);
        if chunk_size + len > room && !chunk.is_empty() {
            flush(msgs, &mut chunk, &mut chunk_size);
        }
        chunk_size += len;
        chunk.push(nlri);
    }
    flush(msgs, &mut chunk, &mut chunk_size);
}
