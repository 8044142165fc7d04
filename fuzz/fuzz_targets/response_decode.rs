//! Fuzz target for response classification and reply decoding
//!
//! Feeds arbitrary lines to every command's reply decoder.
//!
//! # Invariants
//!
//! - NEVER panic on any line
//! - A LIST payload that parses re-serializes to a payload with the same
//!   entries

#![no_main]

use broker_proto::{CommandKind, Response, format_entries, parse_entries};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);

    for kind in [CommandKind::Auth, CommandKind::Get, CommandKind::Set, CommandKind::List] {
        let _ = kind.decode_reply(Some(&line));
    }

    if let Response::Ok(payload) = Response::decode(&line) {
        if let Ok(entries) = parse_entries(&payload) {
            let reparsed = parse_entries(&format_entries(&entries));
            assert_eq!(reparsed.ok(), Some(entries), "LIST payload did not survive re-encoding");
        }
    }
});
