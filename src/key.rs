//! Cryptographic key module

use std::collections::BTreeMap;
use std::io::Cursor;

use pgp::composed::Deserializable;
use pgp::ser::Serialize;
use pgp::types::{KeyTrait, SecretKeyTrait};

use crate::config::Config;
use crate::constants::KeyType;
use crate::mailbox::Mailbox;
use crate::pgp::KeyPair;
use crate::sql;
use crate::tools::time;

// Re-export rPGP key types, they are used all over the crypto code.
pub use pgp::composed::{SignedPublicKey, SignedSecretKey};

/// Error type for key handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("rPGP error: {0}")]
    Pgp(#[from] pgp::errors::Error),
    #[error("failed to generate PGP key: {0}")]
    Keygen(String),
    #[error("failed to load key: {0}")]
    LoadKey(#[from] sql::Error),
    #[error("no address configured")]
    NoConfiguredAddr,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cryptographic key
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Key {
    Public(SignedPublicKey),
    Secret(SignedSecretKey),
}

impl From<SignedPublicKey> for Key {
    fn from(key: SignedPublicKey) -> Self {
        Key::Public(key)
    }
}

impl From<SignedSecretKey> for Key {
    fn from(key: SignedSecretKey) -> Self {
        Key::Secret(key)
    }
}

impl std::convert::TryFrom<Key> for SignedSecretKey {
    type Error = ();

    fn try_from(value: Key) -> std::result::Result<Self, Self::Error> {
        match value {
            Key::Public(_) => Err(()),
            Key::Secret(key) => Ok(key),
        }
    }
}

impl std::convert::TryFrom<Key> for SignedPublicKey {
    type Error = ();

    fn try_from(value: Key) -> std::result::Result<Self, Self::Error> {
        match value {
            Key::Public(key) => Ok(key),
            Key::Secret(_) => Err(()),
        }
    }
}

impl Key {
    pub fn is_public(&self) -> bool {
        match self {
            Key::Public(_) => true,
            Key::Secret(_) => false,
        }
    }

    pub fn is_secret(&self) -> bool {
        !self.is_public()
    }

    /// Parses binary key material; `None` if the bytes do not parse or do
    /// not match the declared kind.
    pub fn from_slice(bytes: &[u8], key_type: KeyType) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let res: std::result::Result<Key, _> = match key_type {
            KeyType::Public => SignedPublicKey::from_bytes(Cursor::new(bytes)).map(Into::into),
            KeyType::Private => SignedSecretKey::from_bytes(Cursor::new(bytes)).map(Into::into),
        };

        res.ok()
    }

    pub fn from_armored_string(
        data: &str,
        key_type: KeyType,
    ) -> Option<(Self, BTreeMap<String, String>)> {
        let bytes = data.as_bytes();
        let res: std::result::Result<(Key, _), _> = match key_type {
            KeyType::Public => SignedPublicKey::from_armor_single(Cursor::new(bytes))
                .map(|(k, h)| (Into::into(k), h)),
            KeyType::Private => SignedSecretKey::from_armor_single(Cursor::new(bytes))
                .map(|(k, h)| (Into::into(k), h)),
        };

        res.ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Key::Public(k) => k.to_bytes().unwrap_or_default(),
            Key::Secret(k) => k.to_bytes().unwrap_or_default(),
        }
    }

    pub fn verify(&self) -> bool {
        match self {
            Key::Public(k) => k.verify().is_ok(),
            Key::Secret(k) => k.verify().is_ok(),
        }
    }

    pub fn to_base64(&self) -> String {
        base64::encode(self.to_bytes())
    }

    pub fn to_armored_string(
        &self,
        headers: Option<&BTreeMap<String, String>>,
    ) -> pgp::errors::Result<String> {
        match self {
            Key::Public(k) => k.to_armored_string(headers),
            Key::Secret(k) => k.to_armored_string(headers),
        }
    }

    /// Armored export with an optional single header line.
    /// Each header line must be terminated by `\r\n`.
    pub fn to_asc(&self, header: Option<(&str, &str)>) -> String {
        let headers = header.map(|(key, value)| {
            let mut m = BTreeMap::new();
            m.insert(key.to_string(), value.to_string());
            m
        });

        self.to_armored_string(headers.as_ref())
            .expect("failed to serialize key")
    }

    /// The raw fingerprint; 20 bytes for the v4 keys this crate creates.
    pub fn fingerprint_bytes(&self) -> Vec<u8> {
        match self {
            Key::Public(k) => k.fingerprint(),
            Key::Secret(k) => k.fingerprint(),
        }
    }

    /// The fingerprint as uppercase hex.
    pub fn fingerprint(&self) -> String {
        hex::encode_upper(self.fingerprint_bytes())
    }

    pub fn formatted_fingerprint(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }

    /// For a secret key, the signed public half embedded in it.
    pub fn split_key(&self) -> Option<Key> {
        match self {
            Key::Public(_) => None,
            Key::Secret(k) => {
                let pub_key = k.public_key();
                pub_key.sign(k, || "".into()).map(Key::Public).ok()
            }
        }
    }
}

/// Make a fingerprint human-readable, in hex format.
pub fn format_fingerprint(fingerprint: &str) -> String {
    // split into chunks of 4 with a space, and a newline after 20
    let mut res = String::new();

    for (i, c) in fingerprint.chars().enumerate() {
        if i > 0 && i % 20 == 0 {
            res += "\n";
        } else if i > 0 && i % 4 == 0 {
            res += " ";
        }

        res.push(c);
    }

    res
}

/// Bring a human-readable or otherwise formatted fingerprint back to the
/// 40-characters-uppercase-hex form.
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.to_uppercase()
        .chars()
        .filter(|&c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        .collect()
}

/// Store the keypair as the owned keypair for `addr` in the database.
///
/// If either half of the pair is already present, the old row is removed
/// first; saving the same key again therefore overwrites it. Requires the
/// database lock to be held.
pub(crate) fn store_self_keypair(
    conn: &rusqlite::Connection,
    keypair: &KeyPair,
) -> sql::Result<()> {
    let public_key = Key::from(keypair.public.clone()).to_bytes();
    let secret_key = Key::from(keypair.secret.clone()).to_bytes();
    conn.execute(
        "DELETE FROM keypairs WHERE public_key=? OR private_key=?;",
        rusqlite::params![public_key, secret_key],
    )?;
    conn.execute("UPDATE keypairs SET is_default=0;", [])?;
    conn.execute(
        "INSERT INTO keypairs (addr, is_default, public_key, private_key, created) \
         VALUES (?,?,?,?,?);",
        rusqlite::params![keypair.addr, 1, public_key, secret_key, time()],
    )?;
    Ok(())
}

/// Loads the stored default public key without triggering key generation.
/// Requires the database lock to be held.
pub(crate) fn load_self_public_key_no_gen(conn: &rusqlite::Connection) -> Option<Key> {
    load_keypair_parts(conn).and_then(|(public, _)| Key::from_slice(&public, KeyType::Public))
}

fn load_keypair_parts(conn: &rusqlite::Connection) -> Option<(Vec<u8>, Vec<u8>)> {
    conn.query_row(
        "SELECT public_key, private_key \
           FROM keypairs \
          WHERE addr=(SELECT value FROM config WHERE keyname='configured_addr') \
            AND is_default=1;",
        [],
        |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
    )
    .ok()
}

/// Loads the default public key, generating a keypair if there is none yet.
///
/// Care is taken to generate only one key per mailbox even when multiple
/// threads call this concurrently.
pub fn load_self_public_key(mailbox: &Mailbox) -> Result<Key> {
    if let Some((public, _)) = mailbox.sql.with_conn(|conn| Ok(load_keypair_parts(conn)))? {
        return Key::from_slice(&public, KeyType::Public)
            .ok_or_else(|| Error::Keygen("stored public key is unreadable".to_string()));
    }
    let keypair = generate_keypair(mailbox)?;
    Ok(Key::Public(keypair.public))
}

/// Loads the default secret key, generating a keypair if there is none yet.
pub fn load_self_secret_key(mailbox: &Mailbox) -> Result<Key> {
    if let Some((_, secret)) = mailbox.sql.with_conn(|conn| Ok(load_keypair_parts(conn)))? {
        return Key::from_slice(&secret, KeyType::Private)
            .ok_or_else(|| Error::Keygen("stored secret key is unreadable".to_string()));
    }
    let keypair = generate_keypair(mailbox)?;
    Ok(Key::Secret(keypair.secret))
}

fn generate_keypair(mailbox: &Mailbox) -> Result<KeyPair> {
    let addr = mailbox
        .get_config(Config::ConfiguredAddr)
        .ok_or(Error::NoConfiguredAddr)?;
    let _guard = mailbox.generating_key_mutex.lock().unwrap();

    // Check if the key appeared while we were waiting on the lock.
    if let Some((public, secret)) = mailbox.sql.with_conn(|conn| Ok(load_keypair_parts(conn)))? {
        let public = SignedPublicKey::from_bytes(Cursor::new(&public[..]))?;
        let secret = SignedSecretKey::from_bytes(Cursor::new(&secret[..]))?;
        return Ok(KeyPair {
            addr,
            public,
            secret,
        });
    }

    let start = std::time::Instant::now();
    info!(mailbox, "Generating keypair with {} bits, e={} ...", 2048, 65537);
    crate::pgp::rand_seed(mailbox, addr.as_bytes());
    let keypair =
        crate::pgp::create_keypair(&addr).map_err(|err| Error::Keygen(format!("{:#}", err)))?;
    mailbox
        .sql
        .with_conn(|conn| store_self_keypair(conn, &keypair))?;
    info!(
        mailbox,
        "Keypair generated in {:.3}s.",
        start.elapsed().as_secs()
    );
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use once_cell::sync::Lazy;

    use super::*;
    use crate::test_utils::*;

    static KEYPAIR: Lazy<KeyPair> = Lazy::new(alice_keypair);

    #[test]
    fn test_normalize_fingerprint() {
        let fingerprint = normalize_fingerprint(" 1234  567890 \n AbcD abcdef ABCDEF ");
        assert_eq!(fingerprint, "1234567890ABCDABCDEFABCDEF");
    }

    #[test]
    fn test_format_fingerprint() {
        let fingerprint = format_fingerprint("1234567890ABCDABCDEFABCDEF1234567890ABCD");
        assert_eq!(
            fingerprint,
            "1234 5678 90AB CDAB CDEF\nABCD EF12 3456 7890 ABCD"
        );
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let public_key = Key::from(KEYPAIR.public.clone());
        let private_key = Key::from(KEYPAIR.secret.clone());

        let binary = public_key.to_bytes();
        let public_key2 = Key::from_slice(&binary, KeyType::Public).expect("invalid public key");
        assert_eq!(public_key, public_key2);

        let binary = private_key.to_bytes();
        let private_key2 = Key::from_slice(&binary, KeyType::Private).expect("invalid private key");
        assert_eq!(private_key, private_key2);
    }

    #[test]
    fn test_from_slice_bad_data() {
        let mut bad_data: [u8; 4096] = [0; 4096];
        for (i, b) in bad_data.iter_mut().enumerate() {
            *b = (i & 0xff) as u8;
        }
        for j in 0..20 {
            let bad_key = Key::from_slice(
                &bad_data[j..j + 2048],
                if 0 != j & 1 {
                    KeyType::Public
                } else {
                    KeyType::Private
                },
            );
            assert!(bad_key.is_none());
        }
    }

    #[test]
    fn test_from_slice_wrong_kind() {
        let public_bytes = Key::from(KEYPAIR.public.clone()).to_bytes();
        assert!(Key::from_slice(&public_bytes, KeyType::Private).is_none());
    }

    #[test]
    fn test_ascii_roundtrip() {
        let public_key = Key::from(KEYPAIR.public.clone());
        let private_key = Key::from(KEYPAIR.secret.clone());

        let s = public_key.to_armored_string(None).unwrap();
        let (public_key2, _) =
            Key::from_armored_string(&s, KeyType::Public).expect("invalid public key");
        assert_eq!(public_key, public_key2);

        let s = private_key.to_armored_string(None).unwrap();
        let (private_key2, _) =
            Key::from_armored_string(&s, KeyType::Private).expect("invalid private key");
        assert_eq!(private_key, private_key2);
    }

    #[test]
    fn test_fingerprint() {
        let private_key = Key::from(KEYPAIR.secret.clone());
        let public_key = Key::from(KEYPAIR.public.clone());

        // a private key fingerprint is computed on its public half
        assert_eq!(private_key.fingerprint_bytes().len(), 20);
        assert_eq!(private_key.fingerprint(), public_key.fingerprint());
        assert_eq!(private_key.fingerprint().len(), 40);
        assert!(private_key
            .fingerprint()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_split_key() {
        let private_key = Key::from(KEYPAIR.secret.clone());
        let public_wrapped = private_key.split_key().unwrap();
        assert!(public_wrapped.is_public());
        let public = SignedPublicKey::try_from(public_wrapped).unwrap();
        assert_eq!(public.primary_key, KEYPAIR.public.primary_key);
        assert!(Key::from(KEYPAIR.public.clone()).split_key().is_none());
    }

    #[test]
    fn test_save_self_key_twice() {
        // saving the same key twice must result in only one row
        let t = dummy_mailbox();
        let nrows = || {
            t.mailbox
                .sql
                .query_get_value::<u32, _>("SELECT COUNT(*) FROM keypairs;", [])
                .unwrap()
                .unwrap()
        };
        assert_eq!(nrows(), 0);
        t.mailbox
            .sql
            .with_conn(|conn| {
                store_self_keypair(conn, &KEYPAIR).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(nrows(), 1);
        t.mailbox
            .sql
            .with_conn(|conn| {
                store_self_keypair(conn, &KEYPAIR).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(nrows(), 1);
    }

    #[test]
    fn test_load_self_existing() {
        let t = dummy_mailbox();
        let addr = configure_alice_keypair(&t.mailbox);
        assert_eq!(addr, "alice@example.org");
        let public = load_self_public_key(&t.mailbox).unwrap();
        assert_eq!(public, Key::from(KEYPAIR.public.clone()));
        let secret = load_self_secret_key(&t.mailbox).unwrap();
        assert_eq!(secret, Key::from(KEYPAIR.secret.clone()));
    }

    #[test]
    #[ignore] // generating keys is expensive
    fn test_load_self_generate() {
        let t = dummy_mailbox();
        t.mailbox
            .set_config(Config::ConfiguredAddr, Some("alice@example.com"))
            .unwrap();
        let key = load_self_public_key(&t.mailbox);
        assert!(key.is_ok());
    }
}
