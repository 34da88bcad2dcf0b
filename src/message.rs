//! Messages module

use anyhow::Result;
use num_derive::{FromPrimitive, ToPrimitive};
use rusqlite::Connection;

use crate::constants::*;
use crate::param::Params;
use crate::tools::truncate;

/// State of a message in the `msgs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum MessageState {
    /// Initial and unknown state.
    Undefined = 0,

    /// Incoming fresh message: neither seen nor noticed by the user yet.
    InFresh = 10,

    /// Incoming noticed message, e.g. chat opened but message not read.
    InNoticed = 13,

    /// Incoming seen message.
    InSeen = 16,

    /// Outgoing message being queued for sending.
    OutPending = 20,

    /// Outgoing message that could not be sent.
    OutFailed = 24,

    /// Outgoing message successfully handed to the server; a sent mail
    /// appearing on IMAP is recreated in this state.
    OutDelivered = 26,

    /// Outgoing message read by the recipient: an MDN arrived.
    OutMdnRcvd = 28,
}

impl Default for MessageState {
    fn default() -> Self {
        MessageState::Undefined
    }
}

impl_sql_enum!(MessageState);

/// A message as stored in the `msgs` table.
#[derive(Debug, Default, Clone)]
pub struct Message {
    pub id: u32,
    pub rfc724_mid: String,
    pub server_folder: String,
    pub server_uid: u32,
    pub chat_id: u32,
    pub from_id: u32,
    pub to_id: u32,
    pub timestamp: i64,
    pub typ: Viewtype,
    pub state: MessageState,
    pub is_msgrmsg: bool,
    pub text: Option<String>,
    pub param: Params,
    pub bytes: usize,
}

impl Message {
    /// Requires the database lock to be held.
    pub(crate) fn load_from_db(conn: &Connection, msg_id: u32) -> Result<Message> {
        let msg = conn.query_row(
            "SELECT rfc724_mid, server_folder, server_uid, chat_id, from_id, to_id, \
                    timestamp, type, state, msgrmsg, txt, param, bytes \
               FROM msgs WHERE id=?;",
            [msg_id],
            |row| {
                let text = row.get::<_, String>(10)?;
                Ok(Message {
                    id: msg_id,
                    rfc724_mid: row.get(0)?,
                    server_folder: row.get(1)?,
                    server_uid: row.get(2)?,
                    chat_id: row.get(3)?,
                    from_id: row.get(4)?,
                    to_id: row.get(5)?,
                    timestamp: row.get(6)?,
                    typ: row.get(7)?,
                    state: row.get(8)?,
                    is_msgrmsg: row.get::<_, i64>(9)? != 0,
                    text: if text.is_empty() { None } else { Some(text) },
                    param: row.get::<_, String>(11)?.parse().unwrap_or_default(),
                    bytes: row.get::<_, i64>(12)? as usize,
                })
            },
        )?;
        Ok(msg)
    }
}

/// Message-ID of a ghost row, derived from the primary row id so that the
/// original can be found even if it is deleted on the server.
pub(crate) fn ghost_rfc724_mid(orig_msg_id: u32) -> String {
    format!("G@{}", orig_msg_id)
}

/// Checks whether a Message-ID is already recorded and in which folder.
/// Requires the database lock to be held.
pub(crate) fn rfc724_mid_exists(conn: &Connection, rfc724_mid: &str) -> Option<(String, u32)> {
    conn.query_row(
        "SELECT server_folder, server_uid FROM msgs WHERE rfc724_mid=?;",
        [rfc724_mid],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .ok()
}

/// Requires the database lock to be held.
pub(crate) fn update_server_uid(
    conn: &Connection,
    rfc724_mid: &str,
    server_folder: &str,
    server_uid: u32,
) {
    let _ = conn.execute(
        "UPDATE msgs SET server_folder=?, server_uid=? WHERE rfc724_mid=?;",
        rusqlite::params![server_folder, server_uid, rfc724_mid],
    );
}

/// True if the Message-ID belongs to a message in a real chat or was sent
/// by us; used for the reply-to-known-message heuristic.
/// Requires the database lock to be held.
pub(crate) fn is_known_rfc724_mid(conn: &Connection, rfc724_mid: &str) -> bool {
    conn.query_row(
        "SELECT id FROM msgs WHERE rfc724_mid=? AND (chat_id>? OR from_id=?);",
        rusqlite::params![rfc724_mid, CHAT_ID_LAST_SPECIAL, CONTACT_ID_SELF],
        |_row| Ok(()),
    )
    .is_ok()
}

/// Marks the outgoing message referenced by an incoming MDN as read.
///
/// Returns the chat and message id on the first hit so the caller can
/// queue the read event; repeated MDNs for the same message return `None`.
/// Requires the database lock to be held.
pub(crate) fn mdn_from_ext(
    conn: &Connection,
    from_id: u32,
    rfc724_mid: &str,
) -> Option<(u32, u32)> {
    if from_id == CONTACT_ID_UNDEFINED {
        return None;
    }
    let (msg_id, chat_id, state) = conn
        .query_row(
            "SELECT id, chat_id, state FROM msgs \
              WHERE rfc724_mid=? AND from_id=? AND chat_id>?;",
            rusqlite::params![rfc724_mid, CONTACT_ID_SELF, CHAT_ID_LAST_SPECIAL],
            |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, MessageState>(2)?,
                ))
            },
        )
        .ok()?;

    match state {
        MessageState::OutPending | MessageState::OutDelivered => {
            let _ = conn.execute(
                "UPDATE msgs SET state=? WHERE id=?;",
                rusqlite::params![MessageState::OutMdnRcvd, msg_id],
            );
            Some((chat_id, msg_id))
        }
        _ => None,
    }
}

/// Returns a single-line summary of a message, as used by ghost rows and
/// chatlist previews.
pub(crate) fn get_summarytext_by_raw(
    viewtype: Viewtype,
    text: Option<&str>,
    param: &Params,
    approx_chars: usize,
) -> String {
    let prefix = match viewtype {
        Viewtype::Image => Some("Image"),
        Viewtype::Gif => Some("GIF"),
        Viewtype::Video => Some("Video"),
        Viewtype::Audio => Some("Audio"),
        Viewtype::Voice => Some("Voice message"),
        Viewtype::File => Some("File"),
        _ => None,
    };

    let text = text.unwrap_or_default();
    let one_line: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let one_line = one_line.trim();

    match (prefix, one_line.is_empty()) {
        (Some(prefix), true) => prefix.to_string(),
        (Some(prefix), false) => format!("{} \u{2013} {}", prefix, truncate(one_line, approx_chars)),
        (None, _) => truncate(one_line, approx_chars),
    }
    .trim()
    .to_string()
}

/// Requires the database lock to be held.
pub(crate) fn get_real_msg_cnt(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM msgs WHERE id>? AND chat_id>?;",
        [MSG_ID_LAST_SPECIAL, CHAT_ID_LAST_SPECIAL],
        |row| row.get(0),
    )
    .unwrap_or_default()
}

/// Requires the database lock to be held.
pub(crate) fn get_deaddrop_msg_cnt(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM msgs WHERE id>? AND chat_id=?;",
        [MSG_ID_LAST_SPECIAL, CHAT_ID_DEADDROP],
        |row| row.get(0),
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Param;
    use crate::test_utils::dummy_mailbox;

    #[test]
    fn test_state_order() {
        assert!(MessageState::InFresh < MessageState::InSeen);
        assert!(MessageState::OutPending < MessageState::OutDelivered);
        assert!(MessageState::OutDelivered < MessageState::OutMdnRcvd);
    }

    #[test]
    fn test_ghost_rfc724_mid_is_no_grpid_carrier() {
        let mid = ghost_rfc724_mid(123);
        assert_eq!(mid, "G@123");
        assert_eq!(crate::tools::extract_grpid_from_rfc724_mid(&mid), None);
    }

    #[test]
    fn test_summarytext() {
        let params = Params::new();
        assert_eq!(
            get_summarytext_by_raw(Viewtype::Text, Some("foo bar"), &params, 32),
            "foo bar"
        );
        assert_eq!(
            get_summarytext_by_raw(Viewtype::Text, Some("line\nbreak"), &params, 32),
            "line break"
        );
        assert_eq!(
            get_summarytext_by_raw(Viewtype::Image, None, &params, 32),
            "Image"
        );
        let summary = get_summarytext_by_raw(Viewtype::File, Some("paper.pdf"), &params, 32);
        assert!(summary.starts_with("File"));
        assert!(summary.contains("paper.pdf"));
    }

    #[test]
    fn test_mdn_from_ext() {
        let t = dummy_mailbox();
        t.mailbox
            .sql
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO msgs (rfc724_mid, chat_id, from_id, to_id, state, txt) \
                     VALUES ('abc@h', 42, 1, 11, ?, 'hi');",
                    [MessageState::OutDelivered],
                )
                .unwrap();
                let msg_id = conn.last_insert_rowid() as u32;

                let hit = mdn_from_ext(conn, 11, "abc@h");
                assert_eq!(hit, Some((42, msg_id)));
                let msg = Message::load_from_db(conn, msg_id).unwrap();
                assert_eq!(msg.state, MessageState::OutMdnRcvd);

                // the second MDN for the same message is not reported again
                assert_eq!(mdn_from_ext(conn, 11, "abc@h"), None);
                // unknown mids are ignored
                assert_eq!(mdn_from_ext(conn, 11, "unknown@h"), None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_rfc724_mid_exists() {
        let t = dummy_mailbox();
        t.mailbox
            .sql
            .with_conn(|conn| {
                assert_eq!(rfc724_mid_exists(conn, "abc@h"), None);
                conn.execute(
                    "INSERT INTO msgs (rfc724_mid, server_folder, server_uid, chat_id, txt) \
                     VALUES ('abc@h', 'INBOX', 7, 42, 'hi');",
                    [],
                )
                .unwrap();
                assert_eq!(
                    rfc724_mid_exists(conn, "abc@h"),
                    Some(("INBOX".to_string(), 7))
                );

                update_server_uid(conn, "abc@h", "Sent", 8);
                assert_eq!(
                    rfc724_mid_exists(conn, "abc@h"),
                    Some(("Sent".to_string(), 8))
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_message_roundtrip_with_params() {
        let t = dummy_mailbox();
        t.mailbox
            .sql
            .with_conn(|conn| {
                let mut param = Params::new();
                param.set_int(Param::GhostCc, 12);
                conn.execute(
                    "INSERT INTO msgs (rfc724_mid, chat_id, from_id, to_id, type, state, txt, param) \
                     VALUES ('g@1', 42, 1, 11, ?, ?, 'sum', ?);",
                    rusqlite::params![Viewtype::Text, MessageState::OutDelivered, param.to_string()],
                )
                .unwrap();
                let msg = Message::load_from_db(conn, conn.last_insert_rowid() as u32).unwrap();
                assert_eq!(msg.typ, Viewtype::Text);
                assert_eq!(msg.param.get_int(Param::GhostCc), Some(12));
                assert_eq!(msg.text.as_deref(), Some("sum"));
                Ok(())
            })
            .unwrap();
    }
}
