//! Responses sent by the broker and their typed interpretation.

use std::collections::BTreeMap;

use bitflags::bitflags;
use bytes::BufMut;

use crate::{
    KV_SEPARATOR, LINE_TERMINATOR, OK_PREFIX, PAIR_SEPARATOR,
    errors::{CodecError, Result},
    request::CommandKind,
};

/// Key/value entries returned by `LIST`, ordered by key.
pub type Entries = BTreeMap<String, String>;

/// Raw classification of one response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Line started with `OK:`; holds everything after the prefix.
    Ok(String),
    /// Any other line; holds the whole line as diagnostic detail.
    Failure(String),
}

impl Response {
    /// Classify a response line. A trailing `\r` is ignored.
    pub fn decode(line: &str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.strip_prefix(OK_PREFIX) {
            Some(payload) => Self::Ok(payload.to_string()),
            None => Self::Failure(line.to_string()),
        }
    }

    /// Affirmative response with a payload.
    pub fn ok(payload: impl Into<String>) -> Self {
        Self::Ok(payload.into())
    }

    /// Negative response. The detail should not start with `OK:`.
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::Failure(detail.into())
    }

    /// Render the response line without its terminator (broker side).
    ///
    /// Line terminators inside the payload or detail are replaced with spaces
    /// so the response always occupies exactly one line.
    pub fn to_line(&self) -> String {
        let line = match self {
            Self::Ok(payload) => format!("{OK_PREFIX}{payload}"),
            Self::Failure(detail) if detail.starts_with(OK_PREFIX) => format!("ERR:{detail}"),
            Self::Failure(detail) => detail.clone(),
        };
        line.replace(['\n', '\r'], " ")
    }

    /// Encode as one terminated line (broker side).
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.to_line().as_bytes());
        dst.put_u8(LINE_TERMINATOR);
    }
}

bitflags! {
    /// Authentication layers the broker reports as enforced for a session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AuthLayers: u8 {
        /// Layer 1: attestation token verified.
        const ATTESTATION = 0b01;
        /// Layer 2: permission grant checked against the OS registry.
        const PERMISSION = 0b10;
    }
}

impl AuthLayers {
    /// Wire names of the set layers, in layer order.
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(2);
        if self.contains(Self::ATTESTATION) {
            names.push("attestation");
        }
        if self.contains(Self::PERMISSION) {
            names.push("permission");
        }
        names
    }

    fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "attestation" => Some(Self::ATTESTATION),
            "permission" => Some(Self::PERMISSION),
            _ => None,
        }
    }
}

/// Outcome of a successful `AUTH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    /// Layers the broker enforced. Always contains `ATTESTATION`.
    pub layers: AuthLayers,
    /// Raw detail text after `OK:`
    pub detail: String,
}

impl AuthGrant {
    /// Grant for the given layers, with the matching `layers=` detail.
    pub fn new(layers: AuthLayers) -> Self {
        let layers = layers | AuthLayers::ATTESTATION;
        Self { layers, detail: format!("layers={}", layers.names().join(",")) }
    }

    /// Parse the `AUTH` reply detail.
    ///
    /// Looks for a `layers=<name>[,<name>]` field among whitespace-separated
    /// fields. Unknown layer names are ignored. A broker that reports nothing
    /// is treated as attestation-only, since an `OK:` already proves layer 1
    /// passed.
    pub fn from_detail(detail: &str) -> Self {
        let mut layers = AuthLayers::ATTESTATION;

        let listed = detail.split_whitespace().find_map(|field| field.strip_prefix("layers="));
        if let Some(listed) = listed {
            for name in listed.split(PAIR_SEPARATOR) {
                if let Some(layer) = AuthLayers::from_wire_name(name.trim()) {
                    layers |= layer;
                }
            }
        }

        Self { layers, detail: detail.to_string() }
    }

    /// Whether the broker also checked the permission grant (layer 2).
    pub fn permission_enforced(&self) -> bool {
        self.layers.contains(AuthLayers::PERMISSION)
    }
}

/// Typed reply for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `AUTH` succeeded.
    Authenticated(AuthGrant),
    /// `GET` result; `None` when the broker answered `OK:` with no value.
    Value(Option<String>),
    /// `SET` succeeded.
    Stored,
    /// `LIST` result (possibly empty).
    Entries(Entries),
}

impl CommandKind {
    /// Interpret the reply line for this command.
    ///
    /// `None` means the peer closed the channel before a line arrived.
    ///
    /// # Errors
    ///
    /// - `CodecError::ConnectionClosed` on end-of-stream
    /// - `CodecError::Rejected` for any non-`OK:` line
    /// - `CodecError::MalformedPayload` if a `LIST` payload does not parse
    pub fn decode_reply(self, line: Option<&str>) -> Result<Reply> {
        let Some(line) = line else {
            return Err(CodecError::ConnectionClosed { command: self });
        };

        let payload = match Response::decode(line) {
            Response::Ok(payload) => payload,
            Response::Failure(detail) => {
                return Err(CodecError::Rejected { command: self, detail });
            },
        };

        match self {
            Self::Auth => Ok(Reply::Authenticated(AuthGrant::from_detail(&payload))),
            Self::Get if payload.is_empty() => Ok(Reply::Value(None)),
            Self::Get => Ok(Reply::Value(Some(payload))),
            Self::Set => Ok(Reply::Stored),
            Self::List => parse_entries(&payload).map(Reply::Entries),
        }
    }
}

/// Parse a `LIST` payload (the text after `OK:`).
///
/// Empty or whitespace-only payloads decode to an empty mapping.
///
/// # Errors
///
/// - `CodecError::MalformedPayload` for a pair without `=`, an empty key, or a
///   duplicate key
pub fn parse_entries(payload: &str) -> Result<Entries> {
    let mut entries = Entries::new();

    // Values may end in spaces, so only an all-blank payload is special
    if payload.trim().is_empty() {
        return Ok(entries);
    }

    for pair in payload.split(PAIR_SEPARATOR) {
        let malformed = |reason: String| CodecError::MalformedPayload {
            command: CommandKind::List,
            reason,
        };

        let (key, value) = pair
            .split_once(KV_SEPARATOR)
            .ok_or_else(|| malformed(format!("pair {pair:?} has no {KV_SEPARATOR:?}")))?;

        if key.is_empty() {
            return Err(malformed(format!("pair {pair:?} has an empty key")));
        }

        if entries.insert(key.to_string(), value.to_string()).is_some() {
            return Err(malformed(format!("duplicate key {key:?}")));
        }
    }

    Ok(entries)
}

/// Render entries as a `LIST` payload (broker side).
pub fn format_entries(entries: &Entries) -> String {
    let separator = PAIR_SEPARATOR.to_string();
    entries
        .iter()
        .map(|(key, value)| format!("{key}{KV_SEPARATOR}{value}"))
        .collect::<Vec<_>>()
        .join(separator.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_prefix_is_success() {
        assert_eq!(Response::decode("OK:"), Response::Ok(String::new()));
        assert_eq!(Response::decode("OK:value\r"), Response::Ok("value".into()));
    }

    #[test]
    fn anything_else_is_failure() {
        assert_eq!(Response::decode("ERR:denied"), Response::Failure("ERR:denied".into()));
        assert_eq!(Response::decode("ok:lowercase"), Response::Failure("ok:lowercase".into()));
        assert_eq!(Response::decode(""), Response::Failure(String::new()));
    }

    #[test]
    fn get_empty_payload_is_not_found() {
        assert_eq!(CommandKind::Get.decode_reply(Some("OK:")).unwrap(), Reply::Value(None));
        assert_eq!(
            CommandKind::Get.decode_reply(Some("OK:blue")).unwrap(),
            Reply::Value(Some("blue".into()))
        );
    }

    #[test]
    fn end_of_stream_is_connection_closed() {
        let err = CommandKind::Set.decode_reply(None).unwrap_err();
        assert_eq!(err, CodecError::ConnectionClosed { command: CommandKind::Set });
    }

    #[test]
    fn failure_line_is_rejected_with_detail() {
        let err = CommandKind::Auth.decode_reply(Some("ERR:permission denied")).unwrap_err();
        assert_eq!(
            err,
            CodecError::Rejected {
                command: CommandKind::Auth,
                detail: "ERR:permission denied".into()
            }
        );
    }

    #[test]
    fn empty_list_is_empty_mapping() {
        assert_eq!(
            CommandKind::List.decode_reply(Some("OK:")).unwrap(),
            Reply::Entries(Entries::new())
        );
        assert_eq!(parse_entries("   ").unwrap(), Entries::new());
    }

    #[test]
    fn list_parses_pairs_with_first_separator() {
        let entries = parse_entries("a=1,b=x=y,c=").unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries["a"], "1");
        assert_eq!(entries["b"], "x=y");
        assert_eq!(entries["c"], "");
    }

    #[test]
    fn list_rejects_malformed_pairs() {
        assert!(matches!(parse_entries("a=1,garbage"), Err(CodecError::MalformedPayload { .. })));
        assert!(matches!(parse_entries("=1"), Err(CodecError::MalformedPayload { .. })));
        assert!(matches!(parse_entries("a=1,a=2"), Err(CodecError::MalformedPayload { .. })));
    }

    #[test]
    fn format_entries_round_trips() {
        let mut entries = Entries::new();
        entries.insert("color".into(), "deep blue".into());
        entries.insert("size".into(), "9".into());

        let payload = format_entries(&entries);
        assert_eq!(payload, "color=deep blue,size=9");
        assert_eq!(parse_entries(&payload).unwrap(), entries);
    }

    #[test]
    fn auth_detail_without_layers_is_attestation_only() {
        let grant = AuthGrant::from_detail("");
        assert_eq!(grant.layers, AuthLayers::ATTESTATION);
        assert!(!grant.permission_enforced());

        let grant = AuthGrant::from_detail("welcome");
        assert_eq!(grant.layers, AuthLayers::ATTESTATION);
    }

    #[test]
    fn auth_detail_reports_permission_layer() {
        let grant = AuthGrant::from_detail("session=7 layers=attestation,permission");
        assert!(grant.permission_enforced());
        assert_eq!(grant.layers.names(), vec!["attestation", "permission"]);
    }

    #[test]
    fn auth_detail_ignores_unknown_layers() {
        let grant = AuthGrant::from_detail("layers=quantum,permission");
        assert_eq!(grant.layers, AuthLayers::ATTESTATION | AuthLayers::PERMISSION);
    }

    #[test]
    fn grant_detail_round_trips() {
        let grant = AuthGrant::new(AuthLayers::PERMISSION);
        assert_eq!(grant.detail, "layers=attestation,permission");
        assert_eq!(AuthGrant::from_detail(&grant.detail), grant);
    }

    #[test]
    fn response_encode_keeps_one_line() {
        let mut buf = Vec::new();
        Response::failure("bad\nthing").encode(&mut buf);
        assert_eq!(buf, b"bad thing\n");

        let mut buf = Vec::new();
        Response::failure("OK:spoof").encode(&mut buf);
        assert_eq!(buf, b"ERR:OK:spoof\n");
    }
}
