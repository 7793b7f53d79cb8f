// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use hdds_rmcast::packet::{decode, encode, peek_type};

fuzz_target!(|data: &[u8]| {
    let peeked = peek_type(data);

    if let Ok(packet) = decode(data) {
        assert_eq!(peeked.ok(), Some(packet.packet_type()));
        // Re-encoding a decoded packet must decode to the same packet.
        let again = decode(&encode(&packet)).expect("re-encoded packet decodes");
        assert_eq!(again, packet);
    }
});
