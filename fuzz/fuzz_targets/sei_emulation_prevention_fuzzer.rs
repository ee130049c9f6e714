//! Fuzz target for the Annex B emulation-prevention roundtrip (§8 property
//! 6): `ep_remove(ep_insert(x)) == x` for every byte string, and neither
//! direction may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use xcoder_codec::sei::{ep_insert, ep_remove};

fuzz_target!(|rbsp: Vec<u8>| {
    let inserted = ep_insert(&rbsp);
    assert_eq!(ep_remove(&inserted), rbsp);

    // `ep_remove` must also stay panic-free on bytes that were never
    // produced by `ep_insert` in the first place.
    let _ = ep_remove(&rbsp);
});
