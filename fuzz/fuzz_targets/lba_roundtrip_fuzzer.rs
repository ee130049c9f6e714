//! Fuzz target for the LBA encode/decode pair (C1).
//!
//! `decode` must never panic on an arbitrary `u32`, and whenever it
//! succeeds, re-encoding the operation it returns under the same
//! session/instance/channel fields must reproduce the original LBA's
//! routing bits (the subtype/subsubtype bits are operation-determined, so
//! this is a roundtrip on the routing fields, not byte equality).

#![no_main]

use libfuzzer_sys::fuzz_target;
use xcoder_proto::lba;

fuzz_target!(|lba: u32| {
    let Ok(decoded) = lba::decode(lba) else {
        return;
    };

    let reencoded = lba::encode(decoded.operation, decoded.session_id, decoded.instance_type, decoded.hw_channel);
    let redecoded = lba::decode(reencoded).expect("an LBA built from a successfully decoded operation must decode");

    assert_eq!(redecoded.operation, decoded.operation);
    assert_eq!(redecoded.session_id, decoded.session_id);
    assert_eq!(redecoded.instance_type, decoded.instance_type);
    assert_eq!(redecoded.hw_channel, decoded.hw_channel);
});
