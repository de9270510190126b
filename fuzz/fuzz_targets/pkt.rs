// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits arbitrary bytes into packets and checks they re-encode exactly.
//!
//! Also feeds every packet through message parsing, which must not panic.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tuxedo::msg::Message;
use tuxedo::pkt::Packet;

fuzz_target!(|data: &[u8]| {
    let mut left = BytesMut::from(data);
    let mut out = BytesMut::new();
    while let Some(pkt) = Packet::decode(&mut left) {
        let _ = Message::parse(&pkt);
        pkt.encode(&mut out);
    }
    out.extend_from_slice(&left[..]);
    assert_eq!(&out[..], data);
});
