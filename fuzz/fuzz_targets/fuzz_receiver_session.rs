// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use hdds_rmcast::{Session, SessionConfig, SessionContext, TimerId};

#[derive(Default)]
struct Sink {
    delivered: usize,
}

impl SessionContext for Sink {
    fn transmit(&mut self, _datagram: Vec<u8>) {}
    fn schedule(&mut self, _timer: TimerId, _after: Duration) {}
    fn cancel(&mut self, _timer: TimerId) {}
    fn deliver(&mut self, _message: Vec<u8>) {
        self.delivered += 1;
    }
}

fuzz_target!(|data: &[u8]| {
    let mut sink = Sink::default();
    let mut session = Session::receiver(SessionConfig {
        receiver_buffer_size: 64,
        ..SessionConfig::default()
    });
    let _ = session.start(&mut sink);

    // Length-prefixed datagrams; a zero length fires the retry timer.
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        let (datagram, tail) = tail.split_at(len);
        rest = tail;
        let result = if datagram.is_empty() {
            session.on_timer(TimerId::NackRetry, &mut sink)
        } else {
            session.on_datagram(datagram, &mut sink)
        };
        if result.is_err() {
            break;
        }
    }

    let logic = session.receiver_logic().expect("receiver session");
    assert!(logic.next_deliver() <= logic.expected_next());
    assert!(logic.held_count() <= 65);
});
