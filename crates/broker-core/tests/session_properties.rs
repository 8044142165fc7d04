//! Property-based tests for the session state machine.
//!
//! Arbitrary event sequences, including out-of-order ones, must never break
//! the session invariants: commands only go out while `Ready`, at most one
//! request awaits a reply, and failures leave the session `Disconnected`.

use broker_core::{Session, SessionAction, SessionError, SessionState};
use broker_proto::{CommandKind, Request};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Event {
    BeginConnect,
    ChannelOpened,
    Authenticate(String),
    AuthReply(Option<String>),
    Command(Request),
    CommandReply(Option<String>),
    TransportFailed,
    Close,
}

fn reply_line() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("OK:".to_string())),
        Just(Some("OK:attestation".to_string())),
        Just(Some("OK:k=v".to_string())),
        Just(Some("ERR:permission denied".to_string())),
        "[ -~]{0,16}".prop_map(Some),
    ]
}

fn request() -> impl Strategy<Value = Request> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|key| Request::Get { key }),
        ("[a-z]{1,8}", "[a-z ]{0,8}[a-z]").prop_map(|(key, value)| Request::Set { key, value }),
        Just(Request::List),
        Just(Request::Get { key: "bad key".to_string() }),
    ]
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::BeginConnect),
        Just(Event::ChannelOpened),
        prop_oneof![Just("abcd".to_string()), Just("bad token".to_string())]
            .prop_map(Event::Authenticate),
        reply_line().prop_map(Event::AuthReply),
        request().prop_map(Event::Command),
        reply_line().prop_map(Event::CommandReply),
        Just(Event::TransportFailed),
        Just(Event::Close),
    ]
}

fn sends_command(actions: &[SessionAction]) -> bool {
    actions
        .iter()
        .any(|action| matches!(action, SessionAction::Send(r) if r.kind() != CommandKind::Auth))
}

proptest! {
    #[test]
    fn prop_session_invariants_hold(events in prop::collection::vec(event(), 0..64)) {
        let mut session = Session::new("com.example.dbapp").unwrap();
        let mut channel_open = false;

        for event in events {
            let before = session.state();
            let in_flight_before = session.in_flight();

            match event {
                Event::BeginConnect => {
                    if session.begin_connect().is_ok() {
                        prop_assert_eq!(before, SessionState::Disconnected);
                    }
                },
                Event::ChannelOpened => {
                    if session.channel_opened().is_ok() {
                        channel_open = true;
                    }
                },
                Event::Authenticate(token) => match session.authenticate(&token) {
                    Ok(actions) => {
                        prop_assert!(!sends_command(&actions));
                        prop_assert_eq!(session.in_flight(), Some(CommandKind::Auth));
                    },
                    Err(SessionError::InvalidArgument(_)) => {
                        prop_assert_eq!(session.state(), SessionState::Disconnected);
                    },
                    Err(_) => prop_assert_eq!(session.state(), before),
                },
                Event::AuthReply(line) => match session.handle_auth_response(line.as_deref()) {
                    Ok(_) => prop_assert!(session.is_ready()),
                    Err(SessionError::InvalidState { .. }) => {
                        prop_assert_eq!(session.state(), before);
                    },
                    Err(_) => prop_assert_eq!(session.state(), SessionState::Disconnected),
                },
                Event::Command(request) => match session.begin_command(request) {
                    Ok(actions) => {
                        prop_assert!(sends_command(&actions));
                        prop_assert_eq!(before, SessionState::Ready);
                        prop_assert_eq!(in_flight_before, None);
                    },
                    Err(_) => {
                        prop_assert_eq!(session.state(), before);
                        prop_assert_eq!(session.in_flight(), in_flight_before);
                    },
                },
                Event::CommandReply(line) => {
                    match session.handle_command_response(line.as_deref()) {
                        Ok(_) => {
                            prop_assert!(session.is_ready());
                            prop_assert_eq!(session.in_flight(), None);
                        },
                        Err(SessionError::InvalidState { .. }) => {
                            prop_assert_eq!(session.state(), before);
                        },
                        Err(_) => prop_assert_eq!(session.state(), SessionState::Disconnected),
                    }
                },
                Event::TransportFailed => {
                    let actions = session.transport_failed("reset");
                    prop_assert_eq!(actions.is_empty(), !channel_open);
                    prop_assert_eq!(session.state(), SessionState::Disconnected);
                },
                Event::Close => {
                    let actions = session.close();
                    prop_assert_eq!(actions.is_empty(), !channel_open);
                    prop_assert_eq!(session.state(), SessionState::Disconnected);
                },
            }

            if session.state() == SessionState::Disconnected {
                prop_assert_eq!(session.in_flight(), None);
                prop_assert!(session.auth_grant().is_none());
                channel_open = false;
            }
            prop_assert_eq!(session.auth_grant().is_some(), session.is_ready());
        }
    }
}
