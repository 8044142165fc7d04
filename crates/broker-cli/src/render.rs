//! Text rendering for command results.
//!
//! Pure functions over client results, so output can be snapshot-tested
//! without a broker.

use std::fmt::Write as _;

use broker_client::{AuthGrant, AuthLayers, ClientError, Entries};
use broker_proto::CodecError;

const RULE: &str = "------------------------------";

/// Connection or authentication failed before the command ran.
pub fn connect_failed() -> String {
    "Failed to connect to Data Broker".to_owned()
}

/// `get` invoked with an empty key.
pub fn missing_key() -> String {
    "Please enter a key".to_owned()
}

/// `set` invoked with an empty key or value.
pub fn missing_key_or_value() -> String {
    "Please enter both key and value".to_owned()
}

/// A key or value the wire format cannot carry.
pub fn invalid_argument(err: &CodecError) -> String {
    format!("Invalid input: {err}")
}

/// `GET` found a value.
pub fn value(key: &str, value: &str) -> String {
    format!("GET {key}:\n{value}")
}

/// `GET` returned nothing. An empty value renders the same way.
pub fn not_found(key: &str) -> String {
    format!("Key '{key}' not found")
}

/// `SET` outcome.
pub fn stored(key: &str, value: &str, success: bool) -> String {
    let status = if success { "Success" } else { "Failed" };
    format!("SET {key}={value}:\n{status}")
}

/// `LIST` failed after connecting.
pub fn list_failed() -> String {
    "Failed to read data from Data Broker".to_owned()
}

/// `LIST` result.
pub fn entries(entries: &Entries) -> String {
    if entries.is_empty() {
        return "No data in Data Broker".to_owned();
    }

    let mut out = format!("All Data ({} entries):\n", entries.len());
    push_entries(&mut out, entries);
    out
}

/// Probe report after a successful `AUTH`.
///
/// `data` is the `LIST` that followed; a failed `LIST` still reports the
/// enforced layers.
pub fn probe_success(grant: &AuthGrant, data: Result<&Entries, &ClientError>) -> String {
    let mut out = String::new();
    push_header(&mut out, "Authentication Success");
    push_layers(&mut out, Some(grant.layers));

    if !grant.detail.is_empty() {
        let _ = writeln!(out, "Broker detail: {}", grant.detail);
    }
    let _ = writeln!(out, "{RULE}");

    match data {
        Ok(entries) if entries.is_empty() => out.push_str("Data Broker: Empty (no data)"),
        Ok(entries) => {
            let _ = writeln!(out, "Data ({} entries):", entries.len());
            push_entries(&mut out, entries);
        },
        Err(err) => {
            let _ = write!(out, "LIST failed: {err}");
        },
    }

    out.trim_end().to_owned()
}

/// Probe report when connecting or authenticating failed.
pub fn probe_failure(err: &ClientError) -> String {
    let mut out = String::new();
    push_header(&mut out, "Connection Failed");
    push_layers(&mut out, None);
    let _ = write!(out, "\nError: {err}");
    out
}

fn push_header(out: &mut String, title: &str) {
    let _ = writeln!(out, "Data Broker probe: {title}");
    let _ = writeln!(out, "{RULE}");
}

/// Layer lines. `None` means the outcome is unknown.
fn push_layers(out: &mut String, layers: Option<AuthLayers>) {
    let mark = |layer| match layers {
        None => "?",
        Some(set) if set.contains(layer) => "ok",
        Some(_) => "not enforced",
    };

    let _ = writeln!(out, "Layer 1: Attestation - {}", mark(AuthLayers::ATTESTATION));
    let _ = writeln!(out, "Layer 2: Permission - {}", mark(AuthLayers::PERMISSION));
}

fn push_entries(out: &mut String, entries: &Entries) {
    out.push('\n');
    for (key, value) in entries {
        let _ = writeln!(out, "{key} = {value}");
    }
    let trimmed = out.trim_end_matches('\n').len();
    out.truncate(trimmed);
}

#[cfg(test)]
mod tests {
    use broker_client::TransportError;
    use insta::assert_snapshot;

    use super::*;

    fn sample() -> Entries {
        Entries::from([
            ("color".to_owned(), "blue".to_owned()),
            ("greeting".to_owned(), "hello world".to_owned()),
        ])
    }

    #[test]
    fn list_renders_sorted_entries() {
        assert_snapshot!(entries(&sample()), @r"
All Data (2 entries):

color = blue
greeting = hello world
");
    }

    #[test]
    fn empty_list() {
        assert_snapshot!(entries(&Entries::new()), @"No data in Data Broker");
    }

    #[test]
    fn get_and_set_messages() {
        assert_snapshot!(value("color", "blue"), @r"
GET color:
blue
");
        assert_snapshot!(not_found("size"), @"Key 'size' not found");
        assert_snapshot!(stored("color", "red", true), @r"
SET color=red:
Success
");
        assert_snapshot!(stored("color", "red", false), @r"
SET color=red:
Failed
");
    }

    #[test]
    fn invalid_argument_names_the_field() {
        let err = broker_proto::Request::get("a b").unwrap_err();
        assert_snapshot!(
            invalid_argument(&err),
            @"Invalid input: invalid key: contains forbidden character ' '"
        );
    }

    #[test]
    fn probe_with_permission_layer() {
        let grant = AuthGrant::new(AuthLayers::PERMISSION);

        assert_snapshot!(probe_success(&grant, Ok(&sample())), @r"
Data Broker probe: Authentication Success
------------------------------
Layer 1: Attestation - ok
Layer 2: Permission - ok
Broker detail: layers=attestation,permission
------------------------------
Data (2 entries):

color = blue
greeting = hello world
");
    }

    #[test]
    fn probe_attestation_only_and_empty() {
        let grant = AuthGrant::from_detail("");

        assert_snapshot!(probe_success(&grant, Ok(&Entries::new())), @r"
Data Broker probe: Authentication Success
------------------------------
Layer 1: Attestation - ok
Layer 2: Permission - not enforced
------------------------------
Data Broker: Empty (no data)
");
    }

    #[test]
    fn probe_list_failure() {
        let grant = AuthGrant::from_detail("");
        let err = ClientError::Protocol("malformed LIST payload".to_owned());

        assert_snapshot!(probe_success(&grant, Err(&err)), @r"
Data Broker probe: Authentication Success
------------------------------
Layer 1: Attestation - ok
Layer 2: Permission - not enforced
------------------------------
LIST failed: protocol error: malformed LIST payload
");
    }

    #[test]
    fn probe_connection_failure() {
        let err = ClientError::Connect(TransportError::Closed);
        let report = probe_failure(&err);

        assert!(report.starts_with("Data Broker probe: Connection Failed"));
        assert!(report.contains("Layer 1: Attestation - ?"));
        assert!(report.contains("Layer 2: Permission - ?"));
        assert!(report.ends_with(&format!("Error: {err}")));
    }
}
