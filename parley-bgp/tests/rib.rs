//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use parley_bgp::packet::attribute::{AsPath, AsPathSegment, Attrs};
use parley_bgp::packet::consts::AsPathSegmentType;
use parley_bgp::packet::message::{EncodeCxt, Message, Negotiated};
use parley_bgp::packet::nlri::Nlri;
use parley_bgp::rib::{AdjRibIn, AdjRibOut, AttrSets, Change};
use parley_utils::bgp::{AfiSafi, Origin};

//
// Helper functions.
//

fn unicast(prefix: &str) -> Nlri {
    Nlri::from(IpNetwork::from_str(prefix).unwrap())
}

fn attrs(nexthop: &str, asns: &[u32]) -> Attrs {
    let mut attrs = Attrs::new(Origin::Igp);
    attrs.base.nexthop = Some(IpAddr::from_str(nexthop).unwrap());
    attrs.base.as_path = AsPath {
        segments: [AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: asns.iter().copied().collect(),
        }]
        .into(),
    };
    attrs
}

fn encode_cxt() -> EncodeCxt {
    EncodeCxt {
        negotiated: Negotiated {
            asn4: true,
            ..Default::default()
        },
    }
}

//
// Adj-RIB-In.
//

// After a sequence of announcements and withdrawals for the same key, the
// table reflects the last operation only.
#[test]
fn test_rib_in_last_operation_wins() {
    let mut attr_sets = AttrSets::default();
    let mut rib_in = AdjRibIn::default();
    let nlri = unicast("10.0.0.0/24");

    let first = attr_sets.get(&attrs("192.0.2.1", &[65001]));
    let second = attr_sets.get(&attrs("192.0.2.2", &[65002]));

    rib_in.update(nlri.clone(), first);
    rib_in.update(nlri.clone(), second.clone());
    assert_eq!(rib_in.routes.len(), 1);
    let key = (nlri.afi_safi(), nlri.index());
    assert_eq!(rib_in.routes[&key].attrs.index, second.index);

    rib_in.withdraw(&nlri);
    assert!(rib_in.routes.is_empty());

    // Withdrawing a prefix that was never announced is a no-op.
    rib_in.withdraw(&nlri);
    assert!(rib_in.routes.is_empty());
}

// Graceful restart: stale entries survive until the End-of-RIB sweep for
// their family.
#[test]
fn test_rib_in_stale_sweep() {
    let mut attr_sets = AttrSets::default();
    let mut rib_in = AdjRibIn::default();
    let attr_set = attr_sets.get(&attrs("192.0.2.1", &[65001]));

    rib_in.update(unicast("10.0.0.0/24"), attr_set.clone());
    rib_in.update(unicast("10.0.1.0/24"), attr_set.clone());
    rib_in.update(unicast("2001:db8::/32"), attr_set.clone());
    rib_in.mark_stale();

    // The peer re-announces one of the IPv4 prefixes after reconnecting.
    rib_in.update(unicast("10.0.0.0/24"), attr_set);

    // The IPv4 End-of-RIB drops the IPv4 entry that wasn't refreshed, and
    // only that one.
    assert_eq!(rib_in.sweep_stale(AfiSafi::Ipv4Unicast), 1);
    assert_eq!(rib_in.routes.len(), 2);

    // The restart timer flushes whatever is still stale.
    assert_eq!(rib_in.sweep_all_stale(), 1);
    assert_eq!(rib_in.routes.len(), 1);
}

//
// Adj-RIB-Out.
//

// A change enqueued for a key supersedes the previous pending change for
// the same key.
#[test]
fn test_rib_out_supersede() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();
    let nlri = unicast("10.0.0.0/24");

    rib_out.enqueue(Change::Announce {
        nlri: nlri.clone(),
        attrs: attrs("192.0.2.1", &[65001]),
    });
    rib_out.enqueue(Change::Announce {
        nlri: nlri.clone(),
        attrs: attrs("192.0.2.2", &[65001]),
    });

    let msgs = rib_out.build_updates(&mut attr_sets, &encode_cxt());
    assert_eq!(msgs.len(), 1);
    let Message::Update(msg) = &msgs[0] else {
        panic!("unexpected message type");
    };
    let reach = msg.reach.as_ref().unwrap();
    assert_eq!(reach.nexthop, "192.0.2.2".parse::<std::net::Ipv4Addr>().unwrap());
}

// Announcements sharing the same attributes are batched into one UPDATE.
#[test]
fn test_rib_out_attribute_sharing() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();
    let shared = attrs("192.0.2.1", &[65001]);

    for prefix in ["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"] {
        rib_out.enqueue(Change::Announce {
            nlri: unicast(prefix),
            attrs: shared.clone(),
        });
    }
    rib_out.enqueue(Change::Announce {
        nlri: unicast("10.1.0.0/24"),
        attrs: attrs("192.0.2.2", &[65002]),
    });

    let msgs = rib_out.build_updates(&mut attr_sets, &encode_cxt());
    assert_eq!(msgs.len(), 2);

    // Both attribute sets are interned exactly once.
    assert_eq!(attr_sets.len(), 2);
}

// A withdrawal only goes on the wire for routes that were advertised.
#[test]
fn test_rib_out_withdraw() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();
    let nlri = unicast("10.0.0.0/24");

    // Withdraw before any announcement: nothing to send.
    rib_out.enqueue(Change::Withdraw { nlri: nlri.clone() });
    let msgs = rib_out.build_updates(&mut attr_sets, &encode_cxt());
    assert!(msgs.is_empty());

    // Announce, then withdraw.
    rib_out.enqueue(Change::Announce {
        nlri: nlri.clone(),
        attrs: attrs("192.0.2.1", &[65001]),
    });
    let msgs = rib_out.build_updates(&mut attr_sets, &encode_cxt());
    assert_eq!(msgs.len(), 1);

    rib_out.enqueue(Change::Withdraw { nlri: nlri.clone() });
    let msgs = rib_out.build_updates(&mut attr_sets, &encode_cxt());
    assert_eq!(msgs.len(), 1);
    let Message::Update(msg) = &msgs[0] else {
        panic!("unexpected message type");
    };
    assert!(msg.unreach.is_some());
    assert!(msg.attrs.is_none());
    assert!(rib_out.advertised.is_empty());
}

// Generated messages are split so that none exceeds the negotiated maximum
// message size.
#[test]
fn test_rib_out_message_size_split() {
    let mut attr_sets = AttrSets::default();
    let mut rib_out = AdjRibOut::default();
    let shared = attrs("192.0.2.1", &[65001]);

    for host in 0..255u32 {
        let prefix = format!("10.{}.{}.0/24", host / 256, host % 256);
        rib_out.enqueue(Change::Announce {
            nlri: unicast(&prefix),
            attrs: shared.clone(),
        });
    }

    // Force a tiny message size so the batch needs multiple UPDATEs.
    let cxt = EncodeCxt {
        negotiated: Negotiated {
            asn4: true,
            max_msg_size: 128,
            ..Default::default()
        },
    };
    let msgs = rib_out.build_updates(&mut attr_sets, &cxt);
    assert!(msgs.len() > 1);

    // Every generated message observes the size cap.
    for msg in &msgs {
        let buf = msg.encode(&cxt);
        assert!(buf.len() <= 128);
    }

    // A replay regenerates the full advertised state.
    assert_eq!(rib_out.advertised.len(), 255);
    rib_out.replay(None);
    assert!(rib_out.has_pending());
    let replayed = rib_out.build_updates(&mut attr_sets, &cxt);
    assert_eq!(
        replayed
            .iter()
            .filter_map(|msg| {
                let Message::Update(msg) = msg else {
                    return None;
                };
                msg.reach.as_ref().map(|reach| reach.prefixes.len())
            })
            .sum::<usize>(),
        255,
    );
}

// Interned attribute sets are dropped once no route references them.
#[test]
fn test_attr_sets_sweep() {
    let mut attr_sets = AttrSets::default();
    let mut rib_in = AdjRibIn::default();

    let attr_set = attr_sets.get(&attrs("192.0.2.1", &[65001]));
    rib_in.update(unicast("10.0.0.0/24"), attr_set);
    assert_eq!(attr_sets.len(), 1);

    attr_sets.sweep();
    assert_eq!(attr_sets.len(), 1);

    rib_in.clear();
    attr_sets.sweep();
    assert!(attr_sets.is_empty());
}
