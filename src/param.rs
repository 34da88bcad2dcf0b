use std::collections::BTreeMap;
use std::fmt;
use std::str;

use anyhow::{bail, Error};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Available param keys.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Hash, PartialOrd, Ord, num_derive::FromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Param {
    /// For messages: file attached to the message
    File = b'f',

    /// For messages
    Width = b'w',

    /// For messages
    Height = b'h',

    /// For messages
    Duration = b'd',

    /// For messages: mime type of an attachment
    MimeType = b'm',

    /// For messages: guarantee E2EE or the message is not sent
    GuaranteeE2ee = b'c',

    /// For messages: decrypted with validation errors; if neither 'c' nor 'e'
    /// is present, the message is only transport encrypted
    ErroneousE2ee = b'e',

    /// For messages: an incoming message which requests an MDN (aka read receipt)
    WantsMdn = b'r',

    /// For messages: ghost row, the value is the original message id
    GhostCc = b'G',

    /// For groups and contacts
    ProfileImage = b'i',

    /// For messages: system command
    Cmd = b'S',

    /// For messages: system command argument
    Arg = b'E',
}

/// An object for handling key=value parameter lists.
///
/// The structure is packed as `"k=v\nk=v"`; keys are single characters,
/// values must not contain a line feed. Serialized by calling
/// `to_string()`, parsed with `str::parse()`.
///
/// Only for library-internal use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Params {
    inner: BTreeMap<Param, String>,
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.inner.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}={}", *key as u8 as char, value)?;
        }
        Ok(())
    }
}

impl str::FromStr for Params {
    type Err = Error;

    /// Parse a raw string to Params.
    ///
    /// Unknown keys are ignored silently: they may come from a downgrade
    /// (a newer version added a key) or from an upgrade (a key was dropped
    /// but used in the past).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = BTreeMap::new();
        for line in s.lines() {
            if line.is_empty() {
                continue;
            }
            if let [key, value] = line.splitn(2, '=').collect::<Vec<_>>()[..] {
                if let Some(key) = key.as_bytes().first().and_then(|key| Param::from_u8(*key)) {
                    inner.insert(key, value.trim_end().to_string());
                }
            } else {
                bail!("not a key-value pair: {:?}", line);
            }
        }
        Ok(Params { inner })
    }
}

impl Params {
    /// Create new empty params.
    pub fn new() -> Self {
        Default::default()
    }

    /// Get the value of the given key, return `None` if no value is set.
    pub fn get(&self, key: Param) -> Option<&str> {
        self.inner.get(&key).map(|s| s.as_str())
    }

    /// Check if the given key is set.
    pub fn exists(&self, key: Param) -> bool {
        self.inner.contains_key(&key)
    }

    /// Set the given key to the passed in value.
    pub fn set(&mut self, key: Param, value: impl ToString) -> &mut Self {
        self.inner.insert(key, value.to_string());
        self
    }

    /// Removes the given key, if it exists.
    pub fn remove(&mut self, key: Param) -> &mut Self {
        self.inner.remove(&key);
        self
    }

    /// Check if there are any values in this.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns how many key-value pairs are set.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Get the given parameter and parse as `i32`.
    pub fn get_int(&self, key: Param) -> Option<i32> {
        self.get(key).and_then(|s| s.parse().ok())
    }

    /// Set the given parameter to the passed in `i32`.
    pub fn set_int(&mut self, key: Param, value: i32) -> &mut Self {
        self.set(key, format!("{}", value));
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_params() {
        let mut p1: Params = "r=1\nw=2\nc=3".parse().unwrap();

        assert_eq!(p1.get_int(Param::WantsMdn), Some(1));
        assert_eq!(p1.get_int(Param::Width), Some(2));
        assert_eq!(p1.get_int(Param::Height), None);
        assert!(!p1.exists(Param::Height));

        p1.set_int(Param::Duration, 4);
        assert_eq!(p1.get_int(Param::Duration), Some(4));

        let mut p1 = Params::new();
        p1.set(Param::WantsMdn, "foo")
            .set_int(Param::Width, 2)
            .remove(Param::GuaranteeE2ee)
            .set_int(Param::Duration, 4);

        assert_eq!(p1.to_string(), "d=4\nr=foo\nw=2");

        p1.remove(Param::Width);
        assert_eq!(p1.to_string(), "d=4\nr=foo");
        assert_eq!(p1.len(), 2);

        p1.remove(Param::WantsMdn);
        p1.remove(Param::Duration);
        assert_eq!(p1.to_string(), "");
        assert!(p1.is_empty());
        assert_eq!(p1.len(), 0)
    }

    #[test]
    fn test_roundtrip() {
        let mut params = Params::new();
        params.set(Param::GhostCc, "12");
        params.set_int(Param::Width, 640);
        assert_eq!(params.to_string().parse::<Params>().unwrap(), params);
    }

    #[test]
    fn test_unknown_key_is_ignored() {
        // 'Z' is known to be unused; such keys are skipped silently
        let p: Params = "w=12\nZ=13\nh=14".parse().unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.get(Param::Width), Some("12"));
        assert_eq!(p.get(Param::Height), Some("14"));
    }
}
