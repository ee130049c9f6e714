//! Fuzz target for `SessionStats::parse` plus the error classifier (C3/C4).
//!
//! Arbitrary byte slices, short or long, must never panic parsing, and a
//! successfully parsed payload must classify into exactly one outcome:
//! `Ok` only for `LastError::Success`, `Err` for every other code (§7).

#![no_main]

use libfuzzer_sys::fuzz_target;
use xcoder_core::classify::classify;
use xcoder_proto::stats::{LastError, SessionStats};

fuzz_target!(|bytes: Vec<u8>| {
    let Ok(stats) = SessionStats::parse(&bytes) else {
        return;
    };

    match classify(stats) {
        Ok(classified) => assert_eq!(classified.last_err, LastError::Success),
        Err(_) => assert_ne!(stats.last_err, LastError::Success),
    }
});
