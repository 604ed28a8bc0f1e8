#![no_main]

use libfuzzer_sys::fuzz_target;
use media_protocol::codec::{decode_message, decode_snapshot};

fuzz_target!(|data: &[u8]| {
    // Arbitrary server input must only ever produce Err, never a panic
    let _ = decode_snapshot(data);
    let _ = decode_message(data);
});
