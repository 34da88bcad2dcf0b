//! Small helpers: time, ids, addresses.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{thread_rng, Rng};

use crate::constants::VALID_ID_LEN;
use crate::mailbox::Mailbox;

/// Unix time in seconds.
pub(crate) fn time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/* timesmearing:
messages within the same second get ascending fake timestamps so that
(timestamp, id) stays a total order per mailbox */

pub(crate) fn smeared_time(mailbox: &Mailbox) -> i64 {
    let mut now = time();
    let last = *mailbox.last_smeared_timestamp.lock().unwrap();
    if last >= now {
        now = last + 1;
    }
    now
}

pub(crate) fn create_smeared_timestamp(mailbox: &Mailbox) -> i64 {
    let now = time();
    let mut ret = now;

    let mut last = mailbox.last_smeared_timestamp.lock().unwrap();
    if ret <= *last {
        ret = *last + 1;
        if ret - now > 5 {
            ret = now + 5;
        }
    }
    if ret > *last {
        *last = ret;
    }

    ret
}

/// Generates a short, random id of [VALID_ID_LEN] base64 characters.
///
/// The id is used as a group id in `Chat-Group-ID:` headers and inside
/// `Gr.<grpid>.<random>@<domain>` message-ids, so it must stay url-safe
/// and must not contain `.`.
pub(crate) fn create_id() -> String {
    let mut rng = thread_rng();
    let buf: [u32; 3] = [rng.gen(), rng.gen(), rng.gen()];

    encode_66bits_as_base64(buf[0], buf[1], buf[2])
}

/// Encode 66 bits as a base64 string.
/// base64 stores 6 bits per character, so 11 characters hold 64 bits plus
/// 2 additional bits; compared to hex this saves 5 characters per id.
fn encode_66bits_as_base64(v1: u32, v2: u32, fill: u32) -> String {
    let mut bytes = [0u8; 9];
    bytes[..4].copy_from_slice(&v1.to_be_bytes());
    bytes[4..8].copy_from_slice(&v2.to_be_bytes());
    bytes[8] = ((fill & 0x3) as u8) << 6;
    let mut res = base64::encode_config(bytes, base64::URL_SAFE);
    // 9 bytes encode to 12 characters, the last one is always `A` padding
    assert_eq!(res.pop(), Some('A'));
    res
}

/// Builds a deterministic Message-ID for mails lacking one.
///
/// Some upload paths (e.g. webmailers that let the SMTP server set the id)
/// deliver mails without a Message-ID; the replacement must not change when
/// the mail is moved between folders, so it is derived from fields that
/// never change.
pub(crate) fn create_incoming_rfc724_mid(
    message_timestamp: i64,
    contact_id_from: u32,
    contact_ids_to: &[u32],
) -> Option<String> {
    if contact_ids_to.is_empty() {
        return None;
    }
    let largest_id_to = contact_ids_to.iter().max().copied().unwrap_or_default();
    Some(format!(
        "{}-{}-{}@stub",
        message_timestamp, contact_id_from, largest_id_to
    ))
}

/// Message-ID for a new outgoing message; globally unique, no private data.
pub(crate) fn create_outgoing_rfc724_mid(grpid: Option<&str>, from_addr: &str) -> String {
    let hostname = from_addr
        .find('@')
        .map(|k| &from_addr[k..])
        .unwrap_or("@nohost");
    match grpid {
        Some(grpid) => format!("Gr.{}.{}{}", grpid, create_id(), hostname),
        None => format!("Mr.{}.{}{}", create_id(), create_id(), hostname),
    }
}

/// Extracts the group id from message-ids of the form
/// `Gr.<grpid>.<random>@<domain>`; the id must have exactly [VALID_ID_LEN]
/// characters, the `Gr.` magic alone is too weak.
pub(crate) fn extract_grpid_from_rfc724_mid(mid: &str) -> Option<&str> {
    let rest = mid.strip_prefix("Gr.")?;
    let grpid_len = rest.find('.')?;
    if grpid_len != VALID_ID_LEN {
        return None;
    }
    rest.get(..grpid_len)
}

pub(crate) fn may_be_valid_addr(addr: &str) -> bool {
    match addr.find('@') {
        Some(at) => at > 0 && addr.len() > at + 1 && addr[at + 1..].contains('.'),
        None => false,
    }
}

/// Returns the canonical form of an email address: trimmed, `mailto:`
/// stripped, lowercased.
pub(crate) fn addr_normalize(addr: &str) -> String {
    let norm = addr.trim();
    let norm = norm.strip_prefix("mailto:").unwrap_or(norm);
    norm.trim().to_lowercase()
}

pub(crate) fn addr_cmp(addr1: &str, addr2: &str) -> bool {
    addr_normalize(addr1) == addr_normalize(addr2)
}

/// Cleans a display name: trims and removes enclosing quotes.
pub(crate) fn normalize_name(name: &str) -> String {
    let norm = name.trim();
    if norm.len() >= 2 {
        let bytes = norm.as_bytes();
        if (bytes[0] == b'\'' && bytes[norm.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[norm.len() - 1] == b'"')
        {
            return norm[1..norm.len() - 1].trim().to_string();
        }
    }
    norm.to_string()
}

/// Shortens text to approximately `approx_chars` characters,
/// appending an ellipsis when cut.
pub(crate) fn truncate(buf: &str, approx_chars: usize) -> String {
    if buf.chars().count() <= approx_chars {
        return buf.to_string();
    }
    let end: String = buf.chars().take(approx_chars).collect();
    match end.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}...", &end[..idx]),
        _ => format!("{}...", end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::dummy_mailbox;

    #[test]
    fn test_create_id() {
        let buf = create_id();
        assert_eq!(buf.len(), 11);
        assert!(!buf.contains('.'));
    }

    #[test]
    fn test_create_id_unique() {
        assert_ne!(create_id(), create_id());
    }

    #[test]
    fn test_extract_grpid_from_rfc724_mid() {
        // at least `Gr.` magic and an 11 character id are required
        assert_eq!(extract_grpid_from_rfc724_mid("foobar"), None);
        assert_eq!(extract_grpid_from_rfc724_mid("Gr.12345678901.morerandom@domain.de"), Some("12345678901"));
        assert_eq!(extract_grpid_from_rfc724_mid("Gr.1234567890.morerandom@domain.de"), None);
        assert_eq!(extract_grpid_from_rfc724_mid("Mr.12345678901.morerandom@domain.de"), None);
    }

    #[test]
    fn test_create_outgoing_rfc724_mid() {
        let mid = create_outgoing_rfc724_mid(Some("abcdefghij1"), "user@domain.de");
        assert!(mid.starts_with("Gr.abcdefghij1."));
        assert!(mid.ends_with("@domain.de"));
        assert_eq!(extract_grpid_from_rfc724_mid(&mid), Some("abcdefghij1"));

        let mid = create_outgoing_rfc724_mid(None, "user@domain.de");
        assert!(mid.starts_with("Mr."));
    }

    #[test]
    fn test_may_be_valid_addr() {
        assert!(!may_be_valid_addr(""));
        assert!(!may_be_valid_addr("user@domain"));
        assert!(!may_be_valid_addr("@domain.de"));
        assert!(may_be_valid_addr("user@domain.de"));
    }

    #[test]
    fn test_addr_normalize() {
        assert_eq!(addr_normalize(" User@Domain.DE "), "user@domain.de");
        assert_eq!(addr_normalize("mailto:user@domain.de"), "user@domain.de");
        assert!(addr_cmp("User@domain.de", "user@Domain.de"));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name(" \"Mr. Smith\" "), "Mr. Smith");
        assert_eq!(normalize_name("Mr. Smith"), "Mr. Smith");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 32), "short");
        let long = "a very long text that has to be cut off somewhere in the middle";
        let cut = truncate(long, 16);
        assert!(cut.ends_with("..."));
        assert!(cut.len() < long.len());
    }

    #[test]
    fn test_smeared_timestamps_ascend() {
        let t = dummy_mailbox();
        let first = create_smeared_timestamp(&t.mailbox);
        let second = create_smeared_timestamp(&t.mailbox);
        let third = create_smeared_timestamp(&t.mailbox);
        assert!(second > first);
        assert!(third > second);
        assert!(smeared_time(&t.mailbox) > third);
    }
}
