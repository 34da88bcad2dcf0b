//! # Login parameters

use std::fmt;

use rusqlite::Connection;

use crate::sql;

/// IMAP/SMTP account settings as entered (`prefix=""`) or as finally used
/// (`prefix="configured_"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginParam {
    pub addr: String,
    pub mail_server: String,
    pub mail_user: String,
    pub mail_pw: String,
    pub mail_port: i32,
    pub send_server: String,
    pub send_user: String,
    pub send_pw: String,
    pub send_port: i32,
    pub server_flags: i32,
}

impl LoginParam {
    /// Reads the settings below the given prefix; requires the database
    /// lock to be held.
    pub(crate) fn from_database(conn: &Connection, prefix: &str) -> LoginParam {
        let key = |name: &str| format!("{}{}", prefix, name);
        let s = |name: &str| sql::get_raw_config(conn, &key(name)).unwrap_or_default();
        let i = |name: &str| sql::get_raw_config_int(conn, &key(name)).unwrap_or_default();

        LoginParam {
            addr: s("addr"),
            mail_server: s("mail_server"),
            mail_user: s("mail_user"),
            mail_pw: s("mail_pw"),
            mail_port: i("mail_port"),
            send_server: s("send_server"),
            send_user: s("send_user"),
            send_pw: s("send_pw"),
            send_port: i("send_port"),
            server_flags: i("server_flags"),
        }
    }

    /// Saves the settings below the given prefix; requires the database
    /// lock to be held.
    pub(crate) fn save_to_database(&self, conn: &Connection, prefix: &str) -> sql::Result<()> {
        let key = |name: &str| format!("{}{}", prefix, name);
        sql::set_raw_config(conn, &key("addr"), Some(&self.addr))?;
        sql::set_raw_config(conn, &key("mail_server"), Some(&self.mail_server))?;
        sql::set_raw_config(conn, &key("mail_user"), Some(&self.mail_user))?;
        sql::set_raw_config(conn, &key("mail_pw"), Some(&self.mail_pw))?;
        sql::set_raw_config(conn, &key("mail_port"), Some(&format!("{}", self.mail_port)))?;
        sql::set_raw_config(conn, &key("send_server"), Some(&self.send_server))?;
        sql::set_raw_config(conn, &key("send_user"), Some(&self.send_user))?;
        sql::set_raw_config(conn, &key("send_pw"), Some(&self.send_pw))?;
        sql::set_raw_config(conn, &key("send_port"), Some(&format!("{}", self.send_port)))?;
        sql::set_raw_config(conn, &key("server_flags"), Some(&format!("{}", self.server_flags)))?;
        Ok(())
    }
}

impl fmt::Display for LoginParam {
    /// A readable form without the passwords, for `get_info`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unset = "0";
        let pw = "***";

        write!(
            f,
            "{} {}:{}:{}:{} {}:{}:{}:{} flags={}",
            if self.addr.is_empty() { unset } else { &self.addr },
            if self.mail_user.is_empty() { unset } else { &self.mail_user },
            if self.mail_pw.is_empty() { unset } else { pw },
            if self.mail_server.is_empty() { unset } else { &self.mail_server },
            self.mail_port,
            if self.send_user.is_empty() { unset } else { &self.send_user },
            if self.send_pw.is_empty() { unset } else { pw },
            if self.send_server.is_empty() { unset } else { &self.send_server },
            self.send_port,
            self.server_flags,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::dummy_mailbox;

    #[test]
    fn test_save_and_load() {
        let t = dummy_mailbox();
        let param = LoginParam {
            addr: "alice@example.org".into(),
            mail_server: "imap.example.org".into(),
            mail_user: "alice".into(),
            mail_pw: "secret".into(),
            mail_port: 993,
            send_server: "smtp.example.org".into(),
            send_user: "alice".into(),
            send_pw: "secret".into(),
            send_port: 465,
            server_flags: 0,
        };
        t.mailbox
            .sql
            .with_conn(|conn| {
                param.save_to_database(conn, "configured_")?;
                let loaded = LoginParam::from_database(conn, "configured_");
                assert_eq!(loaded, param);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_display_hides_password() {
        let mut param = LoginParam::default();
        param.addr = "alice@example.org".into();
        param.mail_pw = "secret".into();
        let s = param.to_string();
        assert!(!s.contains("secret"));
    }
}
