//! Fuzz target for `MetadataTrailer::parse` (§6).
//!
//! Arbitrary byte slices, short or long, under either trailer layout, must
//! never panic — a short read is a malformed-transport condition the
//! caller needs a structured error for, not a crash.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use xcoder_proto::metadata::{MetadataLayout, MetadataTrailer};

#[derive(Debug, Arbitrary)]
struct Input {
    legacy: bool,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let layout = if input.legacy { MetadataLayout::Legacy32 } else { MetadataLayout::Current48 };

    if let Ok(trailer) = MetadataTrailer::parse(&input.bytes, layout) {
        // Any SEI lookup over an arbitrary (possibly empty, possibly
        // garbage) table must also stay panic-free.
        let _ = trailer.hdr10_plus(&input.bytes);
        let _ = trailer.cea_608(&input.bytes);
    }
});
