// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tries to build a line from an arbitrary body. If it succeeds, ensure it decodes back.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tuxedo::pkt::{LinePacket, Packet};

fuzz_target!(|body: &[u8]| {
    let pkt = match LinePacket::try_from(body) {
        Ok(p) => Packet::Line(p),
        Err(_) => return,
    };
    let mut buf = BytesMut::new();
    pkt.encode(&mut buf);
    assert_eq!(&Packet::decode(&mut buf).unwrap(), &pkt);
    assert!(buf.is_empty());
});
