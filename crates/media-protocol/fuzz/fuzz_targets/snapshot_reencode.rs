#![no_main]

use libfuzzer_sys::fuzz_target;
use media_protocol::codec::{decode_snapshot, encode_local_state};
use media_protocol::snapshot::{LocalParticipantState, LocalStateUpdate};

fuzz_target!(|data: &[u8]| {
    let Ok(snapshot) = decode_snapshot(data) else {
        return;
    };

    // Whatever the server sent as peer connections is echoed back verbatim,
    // so it has to survive encoding.
    let update = LocalStateUpdate {
        participant: LocalParticipantState {
            revision: 1,
            tracks: Vec::new(),
        },
        bandwidth_profile: None,
        peer_connections: snapshot.peer_connections,
    };
    assert!(encode_local_state(&update).is_ok());
});
