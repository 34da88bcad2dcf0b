//! OpenPGP helper module using [rPGP facilities](https://github.com/rpgp/rpgp).
//!
//! Also holds the ASCII-armor splitter used for Autocrypt Setup Messages.

use std::collections::HashSet;
use std::io;
use std::io::Cursor;

use anyhow::{bail, ensure, Context as _, Result};
use pgp::composed::{
    Deserializable, KeyType as PgpKeyType, Message, SecretKeyParamsBuilder, SignedPublicKey,
    SignedPublicSubKey, SignedSecretKey, SubkeyParamsBuilder,
};
use pgp::crypto::{HashAlgorithm, SymmetricKeyAlgorithm};
use pgp::types::{
    CompressionAlgorithm, KeyTrait, Mpi, PublicKeyTrait, SecretKeyTrait, StringToKey,
};
use rand::{thread_rng, CryptoRng, Rng};
use sha2::{Digest, Sha256};
use smallvec::smallvec;

use crate::keyring::Keyring;
use crate::mailbox::Mailbox;

pub const HEADER_AUTOCRYPT: &str = "autocrypt-prefer-encrypt";
pub const HEADER_SETUPCODE: &str = "passphrase-begin";

/// A PGP keypair.
///
/// This has its own struct to be able to keep the public and secret keys
/// together as they are one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub addr: String,
    pub public: SignedPublicKey,
    pub secret: SignedSecretKey,
}

/// The slices of an ASCII-armored block, pointing into the scanned buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct SplitArmored<'a> {
    /// The `-----BEGIN X-----` line.
    pub headerline: &'a str,
    /// Value of the `Passphrase-Begin` armor header, if any.
    pub setupcodebegin: Option<&'a str>,
    /// Value of the `Autocrypt-Prefer-Encrypt` armor header, if any.
    pub preferencrypt: Option<&'a str>,
    /// The base64 body between the headers and the END line.
    pub base64: &'a str,
}

/// Splits armored data according to RFC 4880 §6.2.
///
/// Carriage returns are removed from the buffer in place; the returned
/// slices borrow the buffer, nothing is copied. The parse is tolerant: a
/// header line without a colon terminates the header block and is itself
/// the first base64 line, unknown headers are skipped.
///
/// Returns `None` if there is no matching BEGIN/END pair or the base64
/// body would be empty.
pub fn split_armored_data(buf: &mut String) -> Option<SplitArmored<'_>> {
    buf.retain(|c| c != '\r');
    let s = buf.as_str();

    let mut headerline: Option<(usize, usize)> = None;
    let mut setupcodebegin = None;
    let mut preferencrypt = None;
    let mut base64_start = None;

    let mut pos = 0;
    for line in s.split('\n') {
        let line_start = pos;
        pos += line.len() + 1;
        let trimmed = line.trim();

        if headerline.is_none() {
            if trimmed.starts_with("-----BEGIN ") && trimmed.ends_with("-----") {
                let off = line_start + (line.len() - line.trim_start().len());
                headerline = Some((off, off + trimmed.len()));
            }
            continue;
        }

        if trimmed.is_empty() {
            // blank line terminates the headers, base64 follows
            base64_start = Some(pos);
            break;
        }
        match line.find(':') {
            None => {
                // tolerant parse: no colon means the headers are over and
                // this line already belongs to the body
                base64_start = Some(line_start);
                break;
            }
            Some(colon) => {
                let name = line[..colon].trim();
                let value = line[colon + 1..].trim();
                let off = line_start + colon + 1 + (line[colon + 1..].len() - line[colon + 1..].trim_start().len());
                if name.eq_ignore_ascii_case("Passphrase-Begin") {
                    setupcodebegin = Some((off, off + value.len()));
                } else if name.eq_ignore_ascii_case("Autocrypt-Prefer-Encrypt") {
                    preferencrypt = Some((off, off + value.len()));
                }
            }
        }
    }

    let (hl_start, hl_end) = headerline?;
    let base64_start = base64_start?;
    if base64_start > s.len() {
        return None;
    }

    let rest = &s[base64_start..];
    let end_off = rest.find("-----END ")?;
    let end_tag = &rest[end_off + 9..];
    // the END tag must repeat everything after "-----BEGIN ", including the
    // trailing dashes
    if !end_tag.starts_with(&s[hl_start + 11..hl_end]) {
        return None;
    }

    let body = rest[..end_off].trim();
    if body.is_empty() {
        return None;
    }
    let body_start = base64_start + (rest.len() - rest.trim_start().len());

    Some(SplitArmored {
        headerline: &s[hl_start..hl_end],
        setupcodebegin: setupcodebegin.map(|(a, b)| &s[a..b]),
        preferencrypt: preferencrypt.map(|(a, b)| &s[a..b]),
        base64: &s[body_start..body_start + body.len()],
    })
}

/// Folds caller-provided entropy into the mailbox seed pool.
///
/// Key generation itself draws from the OS RNG through rPGP; the pool
/// keeps the construction-time entropy contract of the mailbox.
pub(crate) fn rand_seed(mailbox: &Mailbox, buf: &[u8]) {
    let mut pool = mailbox.rng_pool.lock().unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&*pool);
    hasher.update(buf);
    pool.copy_from_slice(&hasher.finalize());
}

/// Create a new key pair.
///
/// Both keys consist of an RSA 2048 signing+certifying primary key with
/// the user id `<addr>` and an RSA 2048 encryption subkey, as the
/// Autocrypt Level 1 standard expects. SHA-1 is deliberately the last
/// entry in the hash preference list.
pub(crate) fn create_keypair(addr: &str) -> Result<KeyPair> {
    let user_id = format!("<{}>", addr);
    let key_params = SecretKeyParamsBuilder::default()
        .key_type(PgpKeyType::Rsa(2048))
        .can_create_certificates(true)
        .can_sign(true)
        .primary_user_id(user_id)
        .passphrase(None)
        .preferred_symmetric_algorithms(smallvec![
            SymmetricKeyAlgorithm::AES256,
            SymmetricKeyAlgorithm::AES128,
            SymmetricKeyAlgorithm::CAST5,
            SymmetricKeyAlgorithm::TripleDES,
            SymmetricKeyAlgorithm::IDEA,
        ])
        .preferred_hash_algorithms(smallvec![
            HashAlgorithm::SHA2_256,
            HashAlgorithm::SHA2_384,
            HashAlgorithm::SHA2_512,
            HashAlgorithm::SHA2_224,
            HashAlgorithm::SHA1,
        ])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
        .subkey(
            SubkeyParamsBuilder::default()
                .key_type(PgpKeyType::Rsa(2048))
                .can_encrypt(true)
                .passphrase(None)
                .build()
                .map_err(|err| anyhow::format_err!("invalid subkey params: {}", err))?,
        )
        .build()
        .map_err(|err| anyhow::format_err!("invalid key params: {}", err))?;

    let key = key_params.generate().context("failed to generate key")?;
    let secret = key.sign(|| "".into()).context("failed to sign secret key")?;

    let public = secret.public_key();
    let public = public
        .sign(&secret, || "".into())
        .context("failed to sign public key")?;

    secret.verify().context("invalid secret key generated")?;
    public.verify().context("invalid public key generated")?;

    Ok(KeyPair {
        addr: addr.to_string(),
        public,
        secret,
    })
}

/// Select public key or subkey to use for encryption.
///
/// Prefers the first encryption subkey, falls back to the primary key if
/// it is marked for encryption itself.
fn select_pk_for_encryption(key: &SignedPublicKey) -> Option<SignedPublicKeyOrSubkey> {
    key.public_subkeys
        .iter()
        .find(|subkey| subkey.is_encryption_key())
        .map_or_else(
            || {
                if key.is_encryption_key() {
                    Some(SignedPublicKeyOrSubkey::Key(key))
                } else {
                    None
                }
            },
            |subkey| Some(SignedPublicKeyOrSubkey::Subkey(subkey)),
        )
}

/// A wrapper for rPGP public key types
#[derive(Debug)]
enum SignedPublicKeyOrSubkey<'a> {
    Key(&'a SignedPublicKey),
    Subkey(&'a SignedPublicSubKey),
}

impl<'a> KeyTrait for SignedPublicKeyOrSubkey<'a> {
    fn fingerprint(&self) -> Vec<u8> {
        match self {
            Self::Key(k) => k.fingerprint(),
            Self::Subkey(k) => k.fingerprint(),
        }
    }

    fn key_id(&self) -> pgp::types::KeyId {
        match self {
            Self::Key(k) => k.key_id(),
            Self::Subkey(k) => k.key_id(),
        }
    }

    fn algorithm(&self) -> pgp::crypto::PublicKeyAlgorithm {
        match self {
            Self::Key(k) => k.algorithm(),
            Self::Subkey(k) => k.algorithm(),
        }
    }
}

impl<'a> PublicKeyTrait for SignedPublicKeyOrSubkey<'a> {
    fn verify_signature(
        &self,
        hash: HashAlgorithm,
        data: &[u8],
        sig: &[Mpi],
    ) -> pgp::errors::Result<()> {
        match self {
            Self::Key(k) => k.verify_signature(hash, data, sig),
            Self::Subkey(k) => k.verify_signature(hash, data, sig),
        }
    }

    fn encrypt<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
        plain: &[u8],
    ) -> pgp::errors::Result<Vec<Mpi>> {
        match self {
            Self::Key(k) => k.encrypt(rng, plain),
            Self::Subkey(k) => k.encrypt(rng, plain),
        }
    }

    fn to_writer_old(&self, writer: &mut impl io::Write) -> pgp::errors::Result<()> {
        match self {
            Self::Key(k) => k.to_writer_old(writer),
            Self::Subkey(k) => k.to_writer_old(writer),
        }
    }
}

/// Encrypts `plain` text using `public_keys_for_encryption` and signs it
/// using `private_key_for_signing`, if given.
///
/// The output is always ASCII-armored, matching the Autocrypt wire format.
pub fn pk_encrypt(
    plain: &[u8],
    public_keys_for_encryption: &Keyring<SignedPublicKey>,
    private_key_for_signing: Option<&SignedSecretKey>,
) -> Result<String> {
    ensure!(!plain.is_empty(), "nothing to encrypt");
    ensure!(
        !public_keys_for_encryption.is_empty(),
        "no recipient keys given"
    );

    let lit_msg = Message::new_literal_bytes("", plain);
    let pkeys: Vec<SignedPublicKeyOrSubkey> = public_keys_for_encryption
        .keys()
        .iter()
        .filter_map(select_pk_for_encryption)
        .collect();
    ensure!(!pkeys.is_empty(), "no valid recipient encryption keys");
    let pkeys_refs: Vec<&SignedPublicKeyOrSubkey> = pkeys.iter().collect();

    let mut rng = thread_rng();

    let encrypted_msg = if let Some(skey) = private_key_for_signing {
        lit_msg
            .sign(skey, || "".into(), Default::default())
            .and_then(|msg| msg.compress(CompressionAlgorithm::ZLIB))
            .and_then(|msg| msg.encrypt_to_keys(&mut rng, Default::default(), &pkeys_refs))
    } else {
        lit_msg.encrypt_to_keys(&mut rng, Default::default(), &pkeys_refs)
    };

    let msg = encrypted_msg.context("pk_encrypt failed")?;
    let encoded_msg = msg.to_armored_string(None)?;

    Ok(encoded_msg)
}

/// Decrypts the message with keys from the private keyring.
///
/// After decryption, embedded signatures are verified against
/// `public_keys_for_validation`; the uppercase-hex fingerprint of every
/// valid signer is added to `ret_signature_fingerprints`. A signature
/// that fails to verify does not fail decryption, the signer is simply
/// not recorded.
pub fn pk_decrypt(
    ctext: &[u8],
    private_keys_for_decryption: &Keyring<SignedSecretKey>,
    public_keys_for_validation: &Keyring<SignedPublicKey>,
    ret_signature_fingerprints: Option<&mut HashSet<String>>,
) -> Result<Vec<u8>> {
    ensure!(
        !private_keys_for_decryption.is_empty(),
        "no decryption keys given"
    );

    let (msg, _headers) = match Message::from_armor_single(Cursor::new(ctext)) {
        Ok(res) => res,
        Err(_) => (Message::from_bytes(Cursor::new(ctext))?, Default::default()),
    };

    let skeys: Vec<&SignedSecretKey> = private_keys_for_decryption.keys().iter().collect();

    let (decryptor, _) = msg.decrypt(|| "".into(), || "".into(), &skeys[..])?;
    let msgs = decryptor.collect::<pgp::errors::Result<Vec<_>>>()?;
    ensure!(!msgs.is_empty(), "no valid messages found");

    let dec_msg = &msgs[0];

    if let Some(ret_signature_fingerprints) = ret_signature_fingerprints {
        if !public_keys_for_validation.is_empty() {
            for pkey in public_keys_for_validation.keys() {
                if dec_msg.verify(&pkey.primary_key).is_ok() {
                    let fp = hex::encode_upper(pkey.fingerprint());
                    ret_signature_fingerprints.insert(fp);
                }
            }
        }
    }

    match dec_msg.get_content()? {
        Some(content) => Ok(content),
        None => bail!("decrypted message is empty"),
    }
}

/// Symmetric encryption as used for the Autocrypt Setup Message payload.
///
/// The session key is derived from the passphrase with an
/// iterated+salted S2K over SHA-256; the data itself is AES-128 encrypted
/// inside an integrity protected packet. The result is armored.
pub fn symm_encrypt(passphrase: &str, plain: &[u8]) -> Result<String> {
    let mut rng = thread_rng();
    let s2k = StringToKey::new_default(&mut rng);

    let msg = Message::new_literal_bytes("", plain);
    let encrypted_msg = msg.encrypt_with_password(&mut rng, s2k, Default::default(), || {
        passphrase.to_string()
    })?;

    let encoded_msg = encrypted_msg.to_armored_string(None)?;

    Ok(encoded_msg)
}

/// Inverse of [symm_encrypt]; the input may be armored or raw packets.
pub fn symm_decrypt(passphrase: &str, ctext: &[u8]) -> Result<Vec<u8>> {
    let enc_msg = match Message::from_armor_single(Cursor::new(ctext)) {
        Ok((msg, _headers)) => msg,
        Err(_) => Message::from_bytes(Cursor::new(ctext))?,
    };

    let decryptor = enc_msg.decrypt_with_password(|| passphrase.to_string())?;
    let msgs = decryptor.collect::<pgp::errors::Result<Vec<_>>>()?;
    ensure!(!msgs.is_empty(), "no valid messages found");

    match msgs[0].get_content()? {
        Some(content) => Ok(content),
        None => bail!("decrypted message is empty"),
    }
}
