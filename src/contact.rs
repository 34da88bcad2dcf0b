//! Contacts module

use anyhow::{bail, ensure, Result};
use num_derive::{FromPrimitive, ToPrimitive};
use rusqlite::Connection;

use crate::constants::{impl_sql_enum, CONTACT_ID_LAST_SPECIAL, CONTACT_ID_SELF};
use crate::mailbox::Mailbox;
use crate::param::Params;
use crate::tools::{addr_cmp, addr_normalize, may_be_valid_addr, normalize_name};

/// A contact as stored in the `contacts` table.
#[derive(Debug, Default, Clone)]
pub struct Contact {
    pub id: u32,

    /// Contact name. It is recommended to use `Contact::get_display_name`
    /// to access this field.
    name: String,

    /// E-Mail-Address of the contact; always the canonical lowercase form.
    addr: String,

    /// Blocked state.
    pub blocked: bool,

    /// The origin/source of the contact.
    pub origin: Origin,

    /// Parameters as Param::ProfileImage
    pub param: Params,
}

/// Possible origins of a contact; the values form a rank, an existing
/// contact's origin is only ever raised, never lowered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive,
)]
#[repr(i32)]
pub enum Origin {
    Unknown = 0,

    /// From: of incoming messages of unknown sender
    IncomingUnknownFrom = 0x10,

    /// Cc: of incoming messages of unknown sender
    IncomingUnknownCc = 0x20,

    /// To: of incoming messages of unknown sender
    IncomingUnknownTo = 0x40,

    /// Cc: of incoming message of known sender.
    /// Contacts with at least this origin are known.
    IncomingCc = 0x100,

    /// additional To:'s of incoming message of known sender
    IncomingTo = 0x200,

    /// Reply-To:/predecessor of incoming message of known sender
    IncomingReplyTo = 0x400,

    /// a chat was manually created for this user, but no message yet sent
    CreateChat = 0x800,

    /// message sent by us
    OutgoingBcc = 0x1000,

    /// message sent by us
    OutgoingCc = 0x2000,

    /// message sent by us
    OutgoingTo = 0x4000,

    /// internal use
    Internal = 0x40000,

    /// address is in our address book
    AddressBook = 0x80000,

    /// contact added manually, this should be the largest origin as
    /// otherwise the user cannot modify the names
    ManuallyCreated = 0x0100_0000,
}

impl Default for Origin {
    fn default() -> Self {
        Origin::Unknown
    }
}

impl Origin {
    /// Contacts that came in via accepted contacts or were used for
    /// sending; these are shown in the contact list.
    pub fn is_known(self) -> bool {
        self >= Origin::IncomingCc
    }
}

impl_sql_enum!(Origin);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Modifier {
    None,
    Modified,
    Created,
}

impl Contact {
    /// Requires the database lock to be held.
    pub(crate) fn load_from_db(conn: &Connection, contact_id: u32) -> Result<Self> {
        let mut contact = conn.query_row(
            "SELECT c.name, c.addr, c.origin, c.blocked, c.param \
               FROM contacts c WHERE c.id=?;",
            [contact_id],
            |row| {
                Ok(Contact {
                    id: contact_id,
                    name: row.get(0)?,
                    addr: row.get(1)?,
                    origin: row.get(2)?,
                    blocked: row.get::<_, i64>(3)? != 0,
                    param: row.get::<_, String>(4)?.parse().unwrap_or_default(),
                })
            },
        )?;
        if contact_id == CONTACT_ID_SELF {
            contact.name = "Me".to_string();
        }
        Ok(contact)
    }

    pub fn get_addr(&self) -> &str {
        &self.addr
    }

    /// Name to display in lists: the name if set, the address otherwise.
    pub fn get_display_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        &self.addr
    }
}

/// Adds a contact or updates the existing row for the address.
///
/// The address is normalized; a new contact enters with the given origin,
/// an existing contact's origin is upgraded but never downgraded and the
/// name is only touched by an origin at least as large as the stored one.
/// Requires the database lock to be held.
pub(crate) fn add_or_lookup_contact(
    conn: &Connection,
    name: Option<&str>,
    addr: &str,
    origin: Origin,
) -> Result<(u32, Modifier)> {
    let addr = addr_normalize(addr);
    ensure!(origin != Origin::Unknown, "missing origin");
    if !may_be_valid_addr(&addr) {
        bail!("bad address: {:?}", addr);
    }
    let name = name.map(normalize_name).unwrap_or_default();

    let existing = conn
        .query_row(
            "SELECT id, name, origin FROM contacts WHERE addr=? COLLATE NOCASE;",
            [&addr],
            |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Origin>(2)?,
                ))
            },
        )
        .ok();

    match existing {
        Some((row_id, row_name, row_origin)) => {
            let mut modified = Modifier::None;
            let update_name = !name.is_empty() && name != row_name && origin >= row_origin;
            if update_name {
                conn.execute("UPDATE contacts SET name=? WHERE id=?;", rusqlite::params![name, row_id])?;
                modified = Modifier::Modified;
            }
            if origin > row_origin {
                conn.execute(
                    "UPDATE contacts SET origin=? WHERE id=?;",
                    rusqlite::params![origin, row_id],
                )?;
            }
            Ok((row_id, modified))
        }
        None => {
            conn.execute(
                "INSERT INTO contacts (name, addr, origin) VALUES (?, ?, ?);",
                rusqlite::params![name, addr, origin],
            )?;
            let row_id = conn.last_insert_rowid() as u32;
            Ok((row_id, Modifier::Created))
        }
    }
}

/// Raises the origin of an existing contact; a smaller origin is ignored.
/// Requires the database lock to be held.
pub(crate) fn scaleup_origin(conn: &Connection, contact_id: u32, origin: Origin) -> Result<()> {
    conn.execute(
        "UPDATE contacts SET origin=? WHERE id=? AND origin<?;",
        rusqlite::params![origin, contact_id, origin],
    )?;
    Ok(())
}

/// Returns whether the contact entered the system by an accepted route and
/// whether it is blocked. Requires the database lock to be held.
pub(crate) fn is_known_contact(conn: &Connection, contact_id: u32) -> (bool, bool) {
    match conn.query_row(
        "SELECT origin, blocked FROM contacts WHERE id=?;",
        [contact_id],
        |row| Ok((row.get::<_, Origin>(0)?, row.get::<_, i64>(1)? != 0)),
    ) {
        Ok((origin, blocked)) => (!blocked && origin.is_known(), blocked),
        Err(_) => (false, false),
    }
}

/// Requires the database lock to be held.
pub(crate) fn contact_addr_equals(conn: &Connection, contact_id: u32, addr: &str) -> bool {
    match conn.query_row(
        "SELECT addr FROM contacts WHERE id=?;",
        [contact_id],
        |row| row.get::<_, String>(0),
    ) {
        Ok(row_addr) => addr_cmp(&row_addr, addr),
        Err(_) => false,
    }
}

/// Requires the database lock to be held.
pub(crate) fn get_real_contact_cnt(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM contacts WHERE id>?;",
        [CONTACT_ID_LAST_SPECIAL],
        |row| row.get(0),
    )
    .unwrap_or_default()
}

/// Blocks or unblocks a contact.
pub fn block_contact(mailbox: &Mailbox, contact_id: u32, new_blocking: bool) {
    if contact_id <= CONTACT_ID_LAST_SPECIAL {
        return;
    }
    let res = mailbox.sql.execute(
        "UPDATE contacts SET blocked=? WHERE id=?;",
        rusqlite::params![new_blocking as i64, contact_id],
    );
    if res.is_ok() {
        emit_event!(mailbox, crate::Event::ContactsChanged(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::dummy_mailbox;

    #[test]
    fn test_origin_ranking() {
        // ranks used by ingestion, lowest to highest
        assert!(Origin::IncomingUnknownFrom < Origin::IncomingCc);
        assert!(Origin::IncomingCc < Origin::IncomingTo);
        assert!(Origin::IncomingTo < Origin::IncomingReplyTo);
        assert!(Origin::IncomingReplyTo < Origin::OutgoingBcc);
        assert!(Origin::OutgoingBcc < Origin::OutgoingCc);
        assert!(Origin::OutgoingCc < Origin::OutgoingTo);

        assert!(!Origin::IncomingUnknownFrom.is_known());
        assert!(Origin::IncomingTo.is_known());
        assert!(Origin::OutgoingTo.is_known());
    }

    #[test]
    fn test_add_or_lookup_contact() {
        let t = dummy_mailbox();
        t.mailbox
            .sql
            .with_conn(|conn| {
                let (id, modifier) =
                    add_or_lookup_contact(conn, Some("Bob"), "BOB@example.net", Origin::IncomingTo)
                        .unwrap();
                assert!(id > CONTACT_ID_LAST_SPECIAL);
                assert_eq!(modifier, Modifier::Created);

                let contact = Contact::load_from_db(conn, id).unwrap();
                assert_eq!(contact.get_addr(), "bob@example.net");
                assert_eq!(contact.get_display_name(), "Bob");

                // lookup by a different spelling finds the same row
                let (id2, modifier) =
                    add_or_lookup_contact(conn, None, "bob@example.net", Origin::IncomingCc)
                        .unwrap();
                assert_eq!(id, id2);
                assert_eq!(modifier, Modifier::None);

                // origin is never downgraded
                let contact = Contact::load_from_db(conn, id).unwrap();
                assert_eq!(contact.origin, Origin::IncomingTo);

                // a lower origin must not overwrite the name
                let (_, _) = add_or_lookup_contact(
                    conn,
                    Some("Not Bob"),
                    "bob@example.net",
                    Origin::IncomingUnknownFrom,
                )
                .unwrap();
                let contact = Contact::load_from_db(conn, id).unwrap();
                assert_eq!(contact.get_display_name(), "Bob");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_add_or_lookup_contact_bad_addr() {
        let t = dummy_mailbox();
        t.mailbox
            .sql
            .with_conn(|conn| {
                assert!(add_or_lookup_contact(conn, None, "no-addr", Origin::IncomingTo).is_err());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_is_known_contact_and_block() {
        let t = dummy_mailbox();
        let id = t
            .mailbox
            .sql
            .with_conn(|conn| {
                let (id, _) =
                    add_or_lookup_contact(conn, None, "bob@example.net", Origin::IncomingUnknownFrom)
                        .unwrap();
                let (known, blocked) = is_known_contact(conn, id);
                assert!(!known);
                assert!(!blocked);

                scaleup_origin(conn, id, Origin::IncomingReplyTo).unwrap();
                let (known, _) = is_known_contact(conn, id);
                assert!(known);
                Ok(id)
            })
            .unwrap();

        block_contact(&t.mailbox, id, true);
        t.mailbox
            .sql
            .with_conn(|conn| {
                let (known, blocked) = is_known_contact(conn, id);
                assert!(!known);
                assert!(blocked);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_contact_addr_equals() {
        let t = dummy_mailbox();
        t.mailbox
            .sql
            .with_conn(|conn| {
                let (id, _) =
                    add_or_lookup_contact(conn, None, "bob@example.net", Origin::IncomingTo)
                        .unwrap();
                assert!(contact_addr_equals(conn, id, "Bob@Example.net"));
                assert!(!contact_addr_equals(conn, id, "other@example.net"));
                Ok(())
            })
            .unwrap();
    }
}
