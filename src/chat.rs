//! Chats module

use anyhow::{bail, ensure, Result};
use rusqlite::Connection;

use crate::constants::*;
use crate::contact::Contact;
use crate::mailbox::Mailbox;
use crate::tools::create_smeared_timestamp;

/// A chat as stored in the `chats` table.
#[derive(Debug, Default, Clone)]
pub struct Chat {
    pub id: u32,
    pub typ: Chattype,
    pub name: String,
    pub grpid: String,
    pub draft_timestamp: i64,
    pub draft_text: Option<String>,
}

impl Chat {
    /// Requires the database lock to be held.
    pub(crate) fn load_from_db(conn: &Connection, chat_id: u32) -> Result<Self> {
        let chat = conn.query_row(
            "SELECT type, name, grpid, draft_timestamp, draft_txt FROM chats WHERE id=?;",
            [chat_id],
            |row| {
                let draft_txt = row.get::<_, String>(4)?;
                Ok(Chat {
                    id: chat_id,
                    typ: row.get(0)?,
                    name: row.get(1)?,
                    grpid: row.get(2)?,
                    draft_timestamp: row.get(3)?,
                    draft_text: if draft_txt.is_empty() {
                        None
                    } else {
                        Some(draft_txt)
                    },
                })
            },
        )?;
        Ok(chat)
    }

    pub fn is_group(&self) -> bool {
        self.typ == Chattype::Group
    }
}

/// Requires the database lock to be held.
pub(crate) fn lookup_chat_by_grpid(conn: &Connection, grpid: &str) -> Option<u32> {
    conn.query_row("SELECT id FROM chats WHERE grpid=?;", [grpid], |row| {
        row.get(0)
    })
    .ok()
}

/// Creates a chat row; the caller fills the member list.
/// Requires the database lock to be held.
pub(crate) fn insert_chat(
    conn: &Connection,
    typ: Chattype,
    name: &str,
    grpid: &str,
) -> Result<u32> {
    ensure!(!name.is_empty(), "chats must be named");
    conn.execute(
        "INSERT INTO chats (type, name, grpid) VALUES(?, ?, ?);",
        rusqlite::params![typ, name, grpid],
    )?;
    Ok(conn.last_insert_rowid() as u32)
}

/// Requires the database lock to be held.
pub(crate) fn is_contact_in_chat(conn: &Connection, chat_id: u32, contact_id: u32) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM chats_contacts WHERE chat_id=? AND contact_id=?;",
        [chat_id, contact_id],
        |row| row.get::<_, i64>(0),
    )
    .map(|cnt| cnt > 0)
    .unwrap_or_default()
}

/// Adds a member row; duplicates are the caller's business.
/// Requires the database lock to be held.
pub(crate) fn add_to_chat_contacts_table(conn: &Connection, chat_id: u32, contact_id: u32) {
    let _ = conn.execute(
        "INSERT INTO chats_contacts (chat_id, contact_id) VALUES(?, ?);",
        [chat_id, contact_id],
    );
}

/// Requires the database lock to be held.
pub(crate) fn clear_chat_members(conn: &Connection, chat_id: u32) {
    let _ = conn.execute("DELETE FROM chats_contacts WHERE chat_id=?;", [chat_id]);
}

/// Requires the database lock to be held.
pub(crate) fn get_chat_contact_count(conn: &Connection, chat_id: u32) -> usize {
    conn.query_row(
        "SELECT COUNT(*) FROM chats_contacts WHERE chat_id=?;",
        [chat_id],
        |row| row.get::<_, i64>(0),
    )
    .unwrap_or_default() as usize
}

/// Requires the database lock to be held.
pub(crate) fn group_explicitly_left(conn: &Connection, grpid: &str) -> bool {
    conn.query_row("SELECT id FROM leftgrps WHERE grpid=?;", [grpid], |_row| {
        Ok(())
    })
    .is_ok()
}

/// Requires the database lock to be held.
pub(crate) fn set_group_explicitly_left(conn: &Connection, grpid: &str) -> Result<()> {
    if !group_explicitly_left(conn, grpid) {
        conn.execute("INSERT INTO leftgrps (grpid) VALUES(?);", [grpid])?;
    }
    Ok(())
}

/// Looks up the normal (non-deaddrop) 1:1 chat with the given contact.
/// Requires the database lock to be held.
pub(crate) fn lookup_real_nchat_by_contact_id(conn: &Connection, contact_id: u32) -> u32 {
    if contact_id == CONTACT_ID_UNDEFINED {
        return 0;
    }
    conn.query_row(
        "SELECT c.id FROM chats c \
          INNER JOIN chats_contacts j ON c.id=j.chat_id \
          WHERE c.type=? AND c.id>? AND j.contact_id=?;",
        rusqlite::params![Chattype::Single, CHAT_ID_LAST_SPECIAL, contact_id],
        |row| row.get(0),
    )
    .unwrap_or_default()
}

/// Returns the existing 1:1 chat with the contact or creates it.
/// Requires the database lock to be held.
pub(crate) fn create_or_lookup_nchat_by_contact_id(
    conn: &Connection,
    contact_id: u32,
) -> Result<u32> {
    let chat_id = lookup_real_nchat_by_contact_id(conn, contact_id);
    if chat_id != 0 {
        return Ok(chat_id);
    }
    if contact_id <= CONTACT_ID_LAST_SPECIAL && contact_id != CONTACT_ID_SELF {
        bail!("cannot create chat for special contact {}", contact_id);
    }

    let contact = Contact::load_from_db(conn, contact_id)?;
    let chat_name = contact.get_display_name().to_string();

    conn.execute(
        "INSERT INTO chats (type, name) VALUES(?, ?);",
        rusqlite::params![Chattype::Single, chat_name],
    )?;
    let chat_id = conn.last_insert_rowid() as u32;
    add_to_chat_contacts_table(conn, chat_id, contact_id);

    Ok(chat_id)
}

/// Renames a group chat. Requires the database lock to be held.
pub(crate) fn set_chat_name_raw(conn: &Connection, chat_id: u32, name: &str) -> Result<()> {
    ensure!(!name.is_empty(), "chats must be named");
    conn.execute(
        "UPDATE chats SET name=? WHERE id=?;",
        rusqlite::params![name, chat_id],
    )?;
    Ok(())
}

/// Public operation: add a contact to a group chat.
pub fn add_contact_to_chat(mailbox: &Mailbox, chat_id: u32, contact_id: u32) -> bool {
    if chat_id <= CHAT_ID_LAST_SPECIAL
        || (contact_id <= CONTACT_ID_LAST_SPECIAL && contact_id != CONTACT_ID_SELF)
    {
        return false;
    }
    let res = mailbox.sql.with_conn(|conn| {
        if !is_contact_in_chat(conn, chat_id, contact_id) {
            add_to_chat_contacts_table(conn, chat_id, contact_id);
        }
        Ok(())
    });
    if res.is_ok() {
        info!(mailbox, "Member list of chat {} modified.", chat_id);
        emit_event!(mailbox, crate::Event::ChatModified(chat_id));
        true
    } else {
        false
    }
}

/// Public operation: remove a contact from a group chat.
pub fn remove_contact_from_chat(mailbox: &Mailbox, chat_id: u32, contact_id: u32) -> bool {
    if chat_id <= CHAT_ID_LAST_SPECIAL {
        return false;
    }
    let res = mailbox.sql.with_conn(|conn| {
        let _ = conn.execute(
            "DELETE FROM chats_contacts WHERE chat_id=? AND contact_id=?;",
            [chat_id, contact_id],
        );
        if contact_id == CONTACT_ID_SELF {
            if let Ok(chat) = Chat::load_from_db(conn, chat_id) {
                if chat.is_group() && !chat.grpid.is_empty() {
                    set_group_explicitly_left(conn, &chat.grpid).ok();
                }
            }
        }
        Ok(())
    });
    if res.is_ok() {
        info!(mailbox, "Member list of chat {} modified.", chat_id);
        emit_event!(mailbox, crate::Event::ChatModified(chat_id));
        true
    } else {
        false
    }
}

/// Saves or deletes the draft of a chat.
pub fn set_draft(mailbox: &Mailbox, chat_id: u32, text: Option<&str>) {
    if chat_id <= CHAT_ID_LAST_SPECIAL {
        return;
    }
    let res = match text {
        Some(text) if !text.is_empty() => mailbox.sql.execute(
            "UPDATE chats SET draft_timestamp=?, draft_txt=? WHERE id=?;",
            rusqlite::params![create_smeared_timestamp(mailbox), text, chat_id],
        ),
        _ => mailbox.sql.execute(
            "UPDATE chats SET draft_timestamp=0, draft_txt='' WHERE id=?;",
            [chat_id],
        ),
    };
    if res.is_ok() {
        emit_event!(
            mailbox,
            crate::Event::MsgsChanged {
                chat_id,
                msg_id: 0
            }
        );
    }
}

/// Requires the database lock to be held.
pub(crate) fn get_chat_cnt(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM chats WHERE id>?;",
        [CHAT_ID_LAST_SPECIAL],
        |row| row.get(0),
    )
    .unwrap_or_default()
}
