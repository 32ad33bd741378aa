//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

mod attrs;
mod flowspec;
mod keepalive;
mod nlri;
mod notification;
mod open;
mod route_refresh;
mod update;

use parley_bgp::neighbor::PeerType;
use parley_bgp::packet::message::{
    DecodeCxt, EncodeCxt, Message, Negotiated,
};
use parley_utils::assert_eq_hex;

//
// Helper functions.
//

fn negotiated_asn4() -> Negotiated {
    Negotiated {
        asn4: true,
        ..Default::default()
    }
}

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let cxt = EncodeCxt {
        negotiated: negotiated_asn4(),
    };

    let bytes_actual = msg.encode(&cxt);
    assert_eq_hex!(bytes_expected, bytes_actual);
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    let cxt = DecodeCxt {
        peer_type: PeerType::External,
        peer_as: 65000,
        negotiated: negotiated_asn4(),
    };

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}
