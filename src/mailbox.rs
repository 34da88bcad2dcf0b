//! Mailbox module
//!
//! A [Mailbox] represents a single account: one IMAP/SMTP mailbox backed
//! by one SQLite file. The object is shared between the caller thread and
//! the network threads; the database is guarded by one coarse lock.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use anyhow::{ensure, Result};

use crate::config::Config;
use crate::constants::*;
use crate::contact;
use crate::events::{Callback, Event};
use crate::key;
use crate::login_param::LoginParam;
use crate::message;
use crate::pgp;
use crate::receive_imf::receive_imf;
use crate::sql::Sql;
use crate::tools;
use crate::{chat, sql};

/// The interface the network collaborator drives ingestion through.
///
/// IMAP and SMTP clients are external; they are handed a reference to
/// this sink instead of a raw back-pointer, so there is no ownership
/// cycle between the mailbox and its transports.
pub trait ImfSink {
    fn get_config_int(&self, key: &str, def: i32) -> i32;
    fn set_config_int(&self, key: &str, value: i32);
    fn receive_imf(&self, imf_raw: &[u8], server_folder: &str, server_uid: u32, flags: u32);
}

pub struct Mailbox {
    pub(crate) sql: Sql,
    dbfile: RwLock<Option<PathBuf>>,
    blobdir: RwLock<Option<PathBuf>>,
    cb: Box<Callback>,
    wake_lock: Mutex<i32>,
    connected: Mutex<bool>,
    pub(crate) last_smeared_timestamp: Mutex<i64>,
    /// Avoids generating the key for the user more than once.
    pub(crate) generating_key_mutex: Mutex<()>,
    /// Entropy pool fed by [pgp::rand_seed].
    pub(crate) rng_pool: Mutex<[u8; 32]>,
    creation_time: SystemTime,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("dbfile", &*self.dbfile.read().unwrap())
            .field("blobdir", &*self.blobdir.read().unwrap())
            .finish()
    }
}

impl Mailbox {
    /// Creates a new mailbox object; the database is opened separately
    /// with [Mailbox::open].
    pub fn new(cb: Box<Callback>) -> Mailbox {
        let mailbox = Mailbox {
            sql: Sql::new(),
            dbfile: RwLock::new(None),
            blobdir: RwLock::new(None),
            cb,
            wake_lock: Mutex::new(0),
            connected: Mutex::new(false),
            last_smeared_timestamp: Mutex::new(0),
            generating_key_mutex: Mutex::new(()),
            rng_pool: Mutex::new([0u8; 32]),
            creation_time: SystemTime::now(),
        };

        // an additional seed with more random data is done just before key
        // generation; the timespan between the two calls is itself random
        let mut seed = Vec::with_capacity(5 * 8);
        seed.extend_from_slice(&tools::time().to_ne_bytes());
        seed.extend_from_slice(&((&seed as *const Vec<u8>) as usize).to_ne_bytes());
        seed.extend_from_slice(&((&mailbox as *const Mailbox) as usize).to_ne_bytes());
        seed.extend_from_slice(format!("{:?}", std::thread::current().id()).as_bytes());
        seed.extend_from_slice(&std::process::id().to_ne_bytes());
        pgp::rand_seed(&mailbox, &seed);

        mailbox
    }

    pub fn call_cb(&self, event: Event) -> libc::uintptr_t {
        (self.cb)(self, event)
    }

    /// Opens (or creates) the database and the blob directory.
    ///
    /// Without an explicit blobdir, `<dbfile>-blobs` next to the database
    /// is used.
    pub fn open(&self, dbfile: &Path, blobdir: Option<&Path>) -> bool {
        match self.open_inner(dbfile, blobdir) {
            Ok(()) => true,
            Err(err) => {
                error!(self, "cannot open mailbox: {:#}", err);
                false
            }
        }
    }

    fn open_inner(&self, dbfile: &Path, blobdir: Option<&Path>) -> Result<()> {
        ensure!(!self.is_open(), "already opened");

        let blobdir = match blobdir {
            Some(dir) => dir.to_path_buf(),
            None => {
                let mut fname = dbfile.as_os_str().to_os_string();
                fname.push("-blobs");
                PathBuf::from(fname)
            }
        };
        if !blobdir.exists() {
            std::fs::create_dir_all(&blobdir)?;
        }

        self.sql.open(self, dbfile)?;

        *self.dbfile.write().unwrap() = Some(dbfile.to_path_buf());
        *self.blobdir.write().unwrap() = Some(blobdir);
        Ok(())
    }

    pub fn close(&self) {
        self.sql.close();
        *self.dbfile.write().unwrap() = None;
        *self.blobdir.write().unwrap() = None;
    }

    pub fn is_open(&self) -> bool {
        self.sql.is_open()
    }

    pub fn get_dbfile(&self) -> Option<PathBuf> {
        self.dbfile.read().unwrap().clone()
    }

    pub fn get_blobdir(&self) -> Option<PathBuf> {
        self.blobdir.read().unwrap().clone()
    }

    // configuration

    pub fn set_config(&self, key: Config, value: Option<&str>) -> crate::sql::Result<()> {
        self.sql.set_raw_config(key.as_ref(), value)
    }

    pub fn get_config(&self, key: Config) -> Option<String> {
        self.sql
            .get_raw_config(key.as_ref())
            .or_else(|| key.get_default().map(|s| s.to_string()))
    }

    pub fn set_config_int(&self, key: Config, value: i32) -> crate::sql::Result<()> {
        self.sql.set_raw_config_int(key.as_ref(), value)
    }

    pub fn get_config_int(&self, key: Config) -> i32 {
        self.get_config(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn get_config_bool(&self, key: Config) -> bool {
        self.get_config_int(key) != 0
    }

    pub fn is_configured(&self) -> bool {
        self.get_config_bool(Config::Configured)
    }

    // connectivity; the actual clients live outside and consume [ImfSink]

    /// Marks the mailbox ready for its network collaborators.
    ///
    /// Without a completed configuration this logs an error and stays a
    /// no-op; there is nothing to throw at the caller.
    pub fn connect(&self) {
        if !self.is_configured() {
            error!(self, "Not configured.");
            return;
        }
        *self.connected.lock().unwrap() = true;
        info!(self, "Connected.");
    }

    /// Cooperative teardown; in-flight operations finish on their own.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
        info!(self, "Disconnected.");
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    // wake-lock; guarded by its own mutex independent of the db lock

    pub fn wake_lock(&self) {
        let mut cnt = self.wake_lock.lock().unwrap();
        *cnt += 1;
        if *cnt == 1 {
            emit_event!(self, Event::WakeLock(true));
        }
    }

    pub fn wake_unlock(&self) {
        let mut cnt = self.wake_lock.lock().unwrap();
        if *cnt == 1 {
            emit_event!(self, Event::WakeLock(false));
        }
        *cnt -= 1;
    }

    /// Feeds a stored RFC 5322 file through the reception pipeline,
    /// mainly for testing and import.
    pub fn import_eml_file(&self, filename: &Path) -> bool {
        match std::fs::read(filename) {
            Ok(data) => {
                receive_imf(self, &data, "import", 0, 0);
                true
            }
            Err(err) => {
                error!(self, "cannot import {}: {}", filename.display(), err);
                false
            }
        }
    }

    /// Deletes rows of the given groups: 1=jobs, 2=peerstates+keypairs,
    /// 8=rest but keep the reserved rows.
    pub fn empty_tables(&self, bits: i32) {
        info!(self, "Resetting tables ({})...", bits);
        let res = self.sql.with_conn(|conn| {
            if bits & 1 != 0 {
                conn.execute("DELETE FROM jobs;", [])?;
            }
            if bits & 2 != 0 {
                conn.execute("DELETE FROM acpeerstates;", [])?;
                conn.execute("DELETE FROM keypairs;", [])?;
            }
            if bits & 8 != 0 {
                conn.execute(
                    "DELETE FROM contacts WHERE id>?;",
                    [CONTACT_ID_LAST_SPECIAL],
                )?;
                conn.execute("DELETE FROM chats WHERE id>?;", [CHAT_ID_LAST_SPECIAL])?;
                conn.execute("DELETE FROM chats_contacts;", [])?;
                conn.execute("DELETE FROM msgs WHERE id>?;", [MSG_ID_LAST_SPECIAL])?;
                conn.execute(
                    "DELETE FROM config WHERE keyname LIKE 'imap.%' OR keyname LIKE 'configured%';",
                    [],
                )?;
                conn.execute("DELETE FROM leftgrps;", [])?;
            }
            Ok(())
        });
        if res.is_ok() {
            info!(self, "Tables reset.");
            emit_event!(
                self,
                Event::MsgsChanged {
                    chat_id: 0,
                    msg_id: 0
                }
            );
        }
    }

    /// Returns a multi-line overview of the mailbox state.
    pub fn get_info(&self) -> String {
        let unset = "0";

        let res = self.sql.with_conn(|conn| {
            let l = LoginParam::from_database(conn, "");
            let l2 = LoginParam::from_database(conn, "configured_");
            let displayname = sql::get_raw_config(conn, "displayname");
            let chats = chat::get_chat_cnt(conn);
            let real_msgs = message::get_real_msg_cnt(conn);
            let deaddrop_msgs = message::get_deaddrop_msg_cnt(conn);
            let contacts = contact::get_real_contact_cnt(conn);
            let is_configured = sql::get_raw_config_int(conn, "configured").unwrap_or(0);
            let dbversion = sql::get_raw_config_int(conn, "dbversion").unwrap_or(0);
            let e2ee_enabled =
                sql::get_raw_config_int(conn, "e2ee_enabled").unwrap_or(E2EE_DEFAULT_ENABLED);
            let mdns_enabled =
                sql::get_raw_config_int(conn, "mdns_enabled").unwrap_or(MDNS_DEFAULT_ENABLED);
            let prv_key_cnt: i64 = conn
                .query_row("SELECT COUNT(*) FROM keypairs;", [], |row| row.get(0))
                .unwrap_or_default();
            let pub_key_cnt: i64 = conn
                .query_row("SELECT COUNT(*) FROM acpeerstates;", [], |row| row.get(0))
                .unwrap_or_default();
            let fingerprint = key::load_self_public_key_no_gen(conn)
                .map(|k| k.formatted_fingerprint())
                .unwrap_or_else(|| "<not yet calculated>".to_string());
            Ok((
                l,
                l2,
                displayname,
                chats,
                real_msgs,
                deaddrop_msgs,
                contacts,
                is_configured,
                dbversion,
                e2ee_enabled,
                mdns_enabled,
                prv_key_cnt,
                pub_key_cnt,
                fingerprint,
            ))
        });

        let (
            l,
            l2,
            displayname,
            chats,
            real_msgs,
            deaddrop_msgs,
            contacts,
            is_configured,
            dbversion,
            e2ee_enabled,
            mdns_enabled,
            prv_key_cnt,
            pub_key_cnt,
            fingerprint,
        ) = match res {
            Ok(info) => info,
            Err(_) => return "database is not opened".to_string(),
        };

        let uptime = self
            .creation_time
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or_default();

        format!(
            "Chats: {}\n\
             Chat messages: {}\n\
             Messages in mailbox: {}\n\
             Contacts: {}\n\
             Database={}, dbversion={}, Blobdir={}\n\
             \n\
             displayname={}\n\
             configured={}\n\
             config0={}\n\
             config1={}\n\
             mdns_enabled={}\n\
             e2ee_enabled={}\n\
             Private keys={}, public keys={}, fingerprint=\n{}\n\
             \n\
             Using letterbox core v{}, SQLite {}, uptime {}s.",
            chats,
            real_msgs,
            deaddrop_msgs,
            contacts,
            self.get_dbfile()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| unset.into()),
            dbversion,
            self.get_blobdir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| unset.into()),
            displayname.unwrap_or_else(|| unset.into()),
            is_configured,
            l,
            l2,
            mdns_enabled,
            e2ee_enabled,
            prv_key_cnt,
            pub_key_cnt,
            fingerprint,
            &*LB_VERSION_STR,
            rusqlite::version(),
            uptime,
        )
    }

    /// Saves or reads a draft; see [chat::set_draft].
    pub fn set_draft(&self, chat_id: u32, text: Option<&str>) {
        chat::set_draft(self, chat_id, text);
    }
}

impl ImfSink for Mailbox {
    fn get_config_int(&self, key: &str, def: i32) -> i32 {
        self.sql.get_raw_config_int(key).unwrap_or(def)
    }

    fn set_config_int(&self, key: &str, value: i32) {
        let _ = self.sql.set_raw_config_int(key, value);
    }

    fn receive_imf(&self, imf_raw: &[u8], server_folder: &str, server_uid: u32, flags: u32) {
        receive_imf(self, imf_raw, server_folder, server_uid, flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_open_close() {
        let t = dummy_mailbox();
        assert!(t.mailbox.is_open());
        assert!(t.mailbox.get_dbfile().is_some());
        assert!(t.mailbox.get_blobdir().map(|p| p.is_dir()).unwrap_or(false));

        t.mailbox.close();
        assert!(!t.mailbox.is_open());
    }

    #[test]
    fn test_double_open_fails() {
        let t = dummy_mailbox();
        let dbfile = t.mailbox.get_dbfile().unwrap();
        assert!(!t.mailbox.open(&dbfile, None));
    }

    #[test]
    fn test_config_defaults() {
        let t = dummy_mailbox();
        assert_eq!(t.mailbox.get_config_int(Config::E2eeEnabled), 1);
        assert_eq!(t.mailbox.get_config_int(Config::MdnsEnabled), 1);
        assert_eq!(t.mailbox.get_config_int(Config::ShowDeaddrop), 0);
        assert_eq!(t.mailbox.get_config(Config::Addr), None);
    }

    #[test]
    fn test_config_roundtrip_and_int_coercion() {
        let t = dummy_mailbox();
        t.mailbox
            .set_config(Config::Displayname, Some("Alice"))
            .unwrap();
        assert_eq!(
            t.mailbox.get_config(Config::Displayname).as_deref(),
            Some("Alice")
        );

        t.mailbox.set_config(Config::MailPort, Some("993")).unwrap();
        assert_eq!(t.mailbox.get_config_int(Config::MailPort), 993);

        t.mailbox.set_config_int(Config::ShowDeaddrop, 1).unwrap();
        assert!(t.mailbox.get_config_bool(Config::ShowDeaddrop));
    }

    #[test]
    fn test_connect_requires_configuration() {
        let t = dummy_mailbox();
        t.mailbox.connect();
        assert!(!t.mailbox.is_connected());
        // the failure is logged through the event funnel
        assert!(t
            .events()
            .iter()
            .any(|ev| matches!(ev, Event::Error(msg) if msg.contains("Not configured"))));

        t.mailbox.set_config_int(Config::Configured, 1).unwrap();
        t.mailbox.connect();
        assert!(t.mailbox.is_connected());
        t.mailbox.disconnect();
        assert!(!t.mailbox.is_connected());
    }

    #[test]
    fn test_wake_lock_is_counted() {
        let t = dummy_mailbox();
        t.mailbox.wake_lock();
        t.mailbox.wake_lock();
        t.mailbox.wake_unlock();
        t.mailbox.wake_unlock();

        let wake_events: Vec<bool> = t
            .events()
            .iter()
            .filter_map(|ev| match ev {
                Event::WakeLock(on) => Some(*on),
                _ => None,
            })
            .collect();
        // only the edges are reported
        assert_eq!(wake_events, vec![true, false]);
    }

    #[test]
    fn test_get_info_smoke() {
        let t = configured_mailbox();
        let info = t.mailbox.get_info();
        assert!(info.contains("Chats: 0"));
        assert!(info.contains("configured=1"));
        assert!(info.contains("e2ee_enabled=1"));
    }

    #[test]
    fn test_empty_tables() {
        let t = configured_mailbox();
        t.mailbox
            .sql
            .execute(
                "INSERT INTO contacts (name, addr, origin) VALUES ('x', 'x@example.org', 16);",
                [],
            )
            .unwrap();
        t.mailbox.empty_tables(8);
        let cnt = t
            .mailbox
            .sql
            .query_get_value::<i64, _>(
                "SELECT COUNT(*) FROM contacts WHERE id>9;",
                [],
            )
            .unwrap()
            .unwrap();
        assert_eq!(cnt, 0);
        // the reserved rows stay
        let cnt = t
            .mailbox
            .sql
            .query_get_value::<i64, _>("SELECT COUNT(*) FROM contacts;", [])
            .unwrap()
            .unwrap();
        assert_eq!(cnt, 9);
    }

    #[test]
    fn test_import_eml_file() {
        let t = configured_mailbox();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.eml");
        std::fs::write(
            &path,
            b"Return-Path: <x@example.com>\n\
              From: x@example.com\n\
              To: alice@example.org\n\
              Message-ID: <imported@example.com>\n\
              Content-Type: text/plain\n\
              \n\
              imported\n",
        )
        .unwrap();

        assert!(t.mailbox.import_eml_file(&path));
        let cnt = t
            .mailbox
            .sql
            .query_get_value::<i64, _>(
                "SELECT COUNT(*) FROM msgs WHERE rfc724_mid='imported@example.com';",
                [],
            )
            .unwrap()
            .unwrap();
        assert_eq!(cnt, 1);
        assert!(!t.mailbox.import_eml_file(&dir.path().join("missing.eml")));
    }
}
