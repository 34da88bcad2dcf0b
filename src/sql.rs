//! # SQLite wrapper
//!
//! A single mailbox-wide mutex guards the connection; all database access
//! happens while it is held. The mutex is not reentrant, so helper
//! routines that expect the caller to hold the lock take a
//! `&rusqlite::Connection` (or the transaction that derefs to one)
//! instead of locking themselves.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags};

use crate::constants::*;
use crate::mailbox::Mailbox;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("database is not opened")]
    SqlNoConnection,
    #[error("migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The current database scheme; bumped with every released migration.
const DBVERSION: i32 = 1;

#[derive(Debug, Default)]
pub struct Sql {
    conn: Mutex<Option<Connection>>,
}

impl Sql {
    pub fn new() -> Sql {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }

    /// Takes the mailbox-wide database lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap()
    }

    /// Runs `f` with the open connection, holding the lock for the duration.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(Error::SqlNoConnection)?;
        f(conn)
    }

    pub fn close(&self) {
        let mut guard = self.lock();
        if let Some(conn) = guard.take() {
            drop(conn);
        }
    }

    /// Opens the database file, creating or migrating the schema as needed.
    pub fn open(&self, mailbox: &Mailbox, dbfile: &Path) -> Result<()> {
        let mut guard = self.lock();
        if guard.is_some() {
            // log outside the lock, the callback may want the database
            drop(guard);
            error!(mailbox, "cannot open, database already opened");
            return Err(Error::SqlNoConnection);
        }

        let conn = Connection::open_with_flags(
            dbfile,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "secure_delete", "ON")?;

        open_or_create_tables(&conn)?;

        *guard = Some(conn);
        drop(guard);

        info!(mailbox, "opened {:?}", dbfile);
        Ok(())
    }

    pub fn execute<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(sql, params)?))
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| Ok(conn.query_row(sql, params, f)?))
    }

    /// Returns a single value or `None` if the query returns no row.
    pub fn query_get_value<T, P>(&self, sql: &str, params: P) -> Result<Option<T>>
    where
        P: rusqlite::Params,
        T: rusqlite::types::FromSql,
    {
        match self.query_row(sql, params, |row| row.get::<_, T>(0)) {
            Ok(res) => Ok(Some(res)),
            Err(Error::Sql(rusqlite::Error::QueryReturnedNoRows)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn exists<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<bool> {
        let count: i64 = self.query_row(sql, params, |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn get_raw_config(&self, key: &str) -> Option<String> {
        self.with_conn(|conn| Ok(get_raw_config(conn, key))).ok()?
    }

    pub fn set_raw_config(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.with_conn(|conn| set_raw_config(conn, key, value))
    }

    pub fn get_raw_config_int(&self, key: &str) -> Option<i32> {
        self.get_raw_config(key).and_then(|s| s.parse().ok())
    }

    pub fn set_raw_config_int(&self, key: &str, value: i32) -> Result<()> {
        self.set_raw_config(key, Some(&format!("{}", value)))
    }
}

/// Reads a config value; requires the database lock to be held.
pub(crate) fn get_raw_config(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM config WHERE keyname=?;",
        [key],
        |row| row.get::<_, String>(0),
    )
    .ok()
}

pub(crate) fn get_raw_config_int(conn: &Connection, key: &str) -> Option<i32> {
    get_raw_config(conn, key).and_then(|s| s.parse().ok())
}

pub(crate) fn set_raw_config(conn: &Connection, key: &str, value: Option<&str>) -> Result<()> {
    if let Some(value) = value {
        let exists = conn
            .query_row("SELECT COUNT(*) FROM config WHERE keyname=?;", [key], |row| {
                row.get::<_, i64>(0)
            })?
            > 0;
        if exists {
            conn.execute("UPDATE config SET value=? WHERE keyname=?;", [value, key])?;
        } else {
            conn.execute(
                "INSERT INTO config (keyname, value) VALUES (?, ?);",
                [key, value],
            )?;
        }
    } else {
        conn.execute("DELETE FROM config WHERE keyname=?;", [key])?;
    }
    Ok(())
}

fn open_or_create_tables(conn: &Connection) -> Result<()> {
    let config_exists = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='config';",
            [],
            |_row| Ok(()),
        )
        .is_ok();

    if !config_exists {
        return create_tables(conn);
    }

    let dbversion = get_raw_config_int(conn, "dbversion").unwrap_or(0);
    if dbversion > DBVERSION {
        return Err(Error::Migration(format!(
            "database version {} is newer than this build supports ({})",
            dbversion, DBVERSION
        )));
    }
    if dbversion < DBVERSION {
        // migration hooks go here as the scheme evolves
        set_raw_config(conn, "dbversion", Some(&format!("{}", DBVERSION)))?;
    }

    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE config (id INTEGER PRIMARY KEY AUTOINCREMENT, keyname TEXT, value TEXT);
         CREATE INDEX config_index1 ON config (keyname);

         CREATE TABLE contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT DEFAULT '',
            addr TEXT DEFAULT '' COLLATE NOCASE,
            origin INTEGER DEFAULT 0,
            blocked INTEGER DEFAULT 0,
            last_seen INTEGER DEFAULT 0,
            param TEXT DEFAULT '');
         CREATE INDEX contacts_index1 ON contacts (addr);

         CREATE TABLE chats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type INTEGER DEFAULT 0,
            name TEXT DEFAULT '',
            draft_timestamp INTEGER DEFAULT 0,
            draft_txt TEXT DEFAULT '',
            grpid TEXT DEFAULT '',
            param TEXT DEFAULT '');
         CREATE INDEX chats_index1 ON chats (grpid);

         CREATE TABLE chats_contacts (chat_id INTEGER, contact_id INTEGER);
         CREATE INDEX chats_contacts_index1 ON chats_contacts (chat_id);

         CREATE TABLE msgs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rfc724_mid TEXT DEFAULT '',
            server_folder TEXT DEFAULT '',
            server_uid INTEGER DEFAULT 0,
            chat_id INTEGER DEFAULT 0,
            from_id INTEGER DEFAULT 0,
            to_id INTEGER DEFAULT 0,
            timestamp INTEGER DEFAULT 0,
            type INTEGER DEFAULT 0,
            state INTEGER DEFAULT 0,
            msgrmsg INTEGER DEFAULT 0,
            txt TEXT DEFAULT '',
            txt_raw TEXT DEFAULT '',
            param TEXT DEFAULT '',
            bytes INTEGER DEFAULT 0);
         CREATE INDEX msgs_index1 ON msgs (rfc724_mid);
         CREATE INDEX msgs_index2 ON msgs (chat_id);
         CREATE INDEX msgs_index3 ON msgs (timestamp);
         CREATE INDEX msgs_index4 ON msgs (state);

         CREATE TABLE jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            added_timestamp INTEGER,
            desired_timestamp INTEGER DEFAULT 0,
            action INTEGER,
            foreign_id INTEGER,
            param TEXT DEFAULT '',
            tries INTEGER DEFAULT 0);
         CREATE INDEX jobs_index1 ON jobs (action);

         CREATE TABLE leftgrps (id INTEGER PRIMARY KEY AUTOINCREMENT, grpid TEXT DEFAULT '');
         CREATE INDEX leftgrps_index1 ON leftgrps (grpid);

         CREATE TABLE keypairs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            addr TEXT DEFAULT '' COLLATE NOCASE,
            is_default INTEGER DEFAULT 0,
            private_key BLOB,
            public_key BLOB,
            created INTEGER DEFAULT 0);

         CREATE TABLE acpeerstates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            addr TEXT DEFAULT '' COLLATE NOCASE,
            last_seen INTEGER DEFAULT 0,
            last_seen_autocrypt INTEGER DEFAULT 0,
            public_key BLOB,
            prefer_encrypted INTEGER DEFAULT 0);
         CREATE INDEX acpeerstates_index1 ON acpeerstates (addr);",
    )?;

    // reserve the ids below *_LAST_SPECIAL so that they are never taken
    // by real rows
    conn.execute(
        "INSERT INTO contacts (id,name,origin) VALUES \
         (1,'self',262144), (2,'rsvd',262144), (3,'rsvd',262144), \
         (4,'rsvd',262144), (5,'rsvd',262144), (6,'rsvd',262144), \
         (7,'rsvd',262144), (8,'rsvd',262144), (9,'rsvd',262144);",
        [],
    )?;
    conn.execute(
        "INSERT INTO chats (id,type,name) VALUES \
         (1,120,'deaddrop'), (2,120,'todeaddrop'), (3,120,'trash'), \
         (4,120,'msgs_in_creation'), (5,120,'starred'), (6,120,'archivedlink'), \
         (7,100,'rsvd'), (8,100,'rsvd'), (9,100,'rsvd');",
        [],
    )?;
    conn.execute(
        "INSERT INTO msgs (id,msgrmsg,txt) VALUES \
         (1,0,'marker1'), (2,0,'rsvd'), (3,0,'rsvd'), (4,0,'rsvd'), (5,0,'rsvd'), \
         (6,0,'rsvd'), (7,0,'rsvd'), (8,0,'rsvd'), (9,0,'daymarker');",
        [],
    )?;

    set_raw_config(conn, "dbversion", Some(&format!("{}", DBVERSION)))?;

    debug_assert_eq!(CHAT_ID_DEADDROP, 1);
    debug_assert_eq!(CHAT_ID_LAST_SPECIAL, 9);
    debug_assert_eq!(CONTACT_ID_SELF, 1);
    debug_assert_eq!(MSG_ID_LAST_SPECIAL, 9);

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::dummy_mailbox;

    #[test]
    fn test_open_creates_schema() {
        let t = dummy_mailbox();
        let sql = &t.mailbox.sql;
        assert!(sql.is_open());
        assert!(sql
            .exists("SELECT COUNT(*) FROM contacts WHERE id=1;", [])
            .unwrap());
        assert_eq!(sql.get_raw_config_int("dbversion"), Some(super::DBVERSION));
    }

    #[test]
    fn test_raw_config_roundtrip() {
        let t = dummy_mailbox();
        let sql = &t.mailbox.sql;
        assert_eq!(sql.get_raw_config("probe"), None);
        sql.set_raw_config("probe", Some("value")).unwrap();
        assert_eq!(sql.get_raw_config("probe").as_deref(), Some("value"));
        sql.set_raw_config("probe", Some("value2")).unwrap();
        assert_eq!(sql.get_raw_config("probe").as_deref(), Some("value2"));
        sql.set_raw_config("probe", None).unwrap();
        assert_eq!(sql.get_raw_config("probe"), None);

        sql.set_raw_config_int("probe_int", 42).unwrap();
        assert_eq!(sql.get_raw_config_int("probe_int"), Some(42));
    }
}
