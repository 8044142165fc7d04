//! Fuzz target for request construction and encoding
//!
//! Builds requests from arbitrary field text, the way caller input reaches
//! the client.
//!
//! # Invariants
//!
//! - A request that constructs encodes to exactly one line, unless it is
//!   over the line length limit
//! - The broker-side parser reads back the same request
//! - A rejected request writes nothing

#![no_main]

use arbitrary::Arbitrary;
use broker_proto::Request;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Auth { caller_id: String, token: String },
    Get { key: String },
    Set { key: String, value: String },
    List,
}

fuzz_target!(|input: Input| {
    let built = match input.clone() {
        Input::Auth { caller_id, token } => Request::auth(caller_id, token),
        Input::Get { key } => Request::get(key),
        Input::Set { key, value } => Request::set(key, value),
        Input::List => Ok(Request::List),
    };

    let Ok(request) = built else {
        let unchecked = match input {
            Input::Auth { caller_id, token } => Request::Auth { caller_id, token },
            Input::Get { key } => Request::Get { key },
            Input::Set { key, value } => Request::Set { key, value },
            Input::List => return,
        };
        let mut buf = Vec::new();
        assert!(unchecked.encode(&mut buf).is_err());
        assert!(buf.is_empty(), "rejected request wrote bytes");
        return;
    };

    let mut buf = Vec::new();
    if request.encode(&mut buf).is_err() {
        // Valid fields, but the line is over the length limit
        assert!(buf.is_empty(), "oversized request wrote bytes");
        return;
    }

    assert_eq!(buf.last(), Some(&b'\n'));
    assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
    assert!(!buf.contains(&b'\r'));

    let line = std::str::from_utf8(&buf[..buf.len() - 1]).expect("encoded line is UTF-8");
    assert_eq!(Request::decode(line).expect("encoded line must parse"), request);
});
