//! Transport topics: `/<prefix>/<recipient>/<sender>`.
//!
//! User ids are percent-encoded so a `/` inside an id can never shift the
//! segment boundaries. Bytes outside `[A-Za-z0-9+._-]` are escaped.

use std::fmt::Write as _;

use crate::error::ProtocolError;

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'.' | b'_' | b'-')
}

pub fn encode_segment(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if is_unreserved(byte) {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

pub fn decode_segment(segment: &str) -> Result<String, ProtocolError> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        ProtocolError::Deserialization(format!("bad escape in topic segment {segment:?}"))
                    })?;
                out.push(hex);
                i += 3;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out)
        .map_err(|_| ProtocolError::Deserialization(format!("topic segment {segment:?} is not UTF-8")))
}

/// Topic a sender publishes to so that `recipient` receives it.
pub fn build_topic(prefix: &str, recipient: &str, sender: &str) -> String {
    format!("/{prefix}/{}/{}", encode_segment(recipient), encode_segment(sender))
}

/// Common prefix of every topic addressed to `recipient`.
pub fn inbox_prefix(prefix: &str, recipient: &str) -> String {
    format!("/{prefix}/{}/", encode_segment(recipient))
}

/// Split a topic back into `(recipient, sender)`.
pub fn parse_topic(prefix: &str, topic: &str) -> Result<(String, String), ProtocolError> {
    let malformed = || ProtocolError::Deserialization(format!("malformed topic {topic:?}"));

    let rest = topic
        .strip_prefix('/')
        .and_then(|t| t.strip_prefix(prefix))
        .and_then(|t| t.strip_prefix('/'))
        .ok_or_else(malformed)?;
    let (recipient, sender) = rest.split_once('/').ok_or_else(malformed)?;
    if recipient.is_empty() || sender.is_empty() || sender.contains('/') {
        return Err(malformed());
    }
    Ok((decode_segment(recipient)?, decode_segment(sender)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_numbers_pass_through() {
        assert_eq!(
            build_topic("khamoshchat", "+911234567890", "+15550001111"),
            "/khamoshchat/+911234567890/+15550001111"
        );
    }

    #[test]
    fn separators_are_escaped() {
        let topic = build_topic("khamoshchat", "bob/evil", "alice smith");
        assert_eq!(topic, "/khamoshchat/bob%2Fevil/alice%20smith");
        assert_eq!(
            parse_topic("khamoshchat", &topic).unwrap(),
            ("bob/evil".to_string(), "alice smith".to_string())
        );
    }

    #[test]
    fn non_ascii_roundtrips() {
        let topic = build_topic("p", "ख़ामोश", "a");
        assert!(topic.is_ascii());
        assert_eq!(parse_topic("p", &topic).unwrap().0, "ख़ामोश");
    }

    #[test]
    fn inbox_prefix_matches_topics() {
        let topic = build_topic("khamoshchat", "bob", "alice");
        assert!(topic.starts_with(&inbox_prefix("khamoshchat", "bob")));
        assert!(!topic.starts_with(&inbox_prefix("khamoshchat", "bo")));
    }

    #[test]
    fn malformed_topics_rejected() {
        for topic in [
            "",
            "/other/bob/alice",
            "/khamoshchat/bob",
            "/khamoshchat/bob/alice/extra",
            "/khamoshchat//alice",
            "/khamoshchat/bob/%zz",
            "/khamoshchat/bob/%2",
        ] {
            assert!(parse_topic("khamoshchat", topic).is_err(), "{topic}");
        }
    }
}
