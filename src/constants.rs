//! # Constants

use num_derive::{FromPrimitive, ToPrimitive};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static LB_VERSION_STR: Lazy<String> = Lazy::new(|| env!("CARGO_PKG_VERSION").to_string());

// some defaults
pub const E2EE_DEFAULT_ENABLED: i32 = 1;
pub const MDNS_DEFAULT_ENABLED: i32 = 1;

/// Length of a group id as embedded in `Gr.<id>.<random>@<domain>` message-ids.
pub const VALID_ID_LEN: usize = 11;

/// Flag for `receive_imf`: the message was already marked seen on the server.
pub const IMAP_SEEN: u32 = 0x0001;

/// virtual chat showing all messages from unknown senders
pub const CHAT_ID_DEADDROP: u32 = 1;
/// outgoing messages without a matching chat are filed here
pub const CHAT_ID_TO_DEADDROP: u32 = 2;
/// messages that must be recorded but never shown get this chat id
pub const CHAT_ID_TRASH: u32 = 3;
/// a message is just in creation but not yet assigned to a chat
pub const CHAT_ID_MSGS_IN_CREATION: u32 = 4;
/// virtual chat showing all starred messages
pub const CHAT_ID_STARRED: u32 = 5;
/// only an indicator in a chatlist
pub const CHAT_ID_ARCHIVED_LINK: u32 = 6;
/// larger chat ids are "real" chats, their messages are "real" messages
pub const CHAT_ID_LAST_SPECIAL: u32 = 9;

pub const CONTACT_ID_UNDEFINED: u32 = 0;
pub const CONTACT_ID_SELF: u32 = 1;
pub const CONTACT_ID_LAST_SPECIAL: u32 = 9;

pub const MSG_ID_MARKER1: u32 = 1;
pub const MSG_ID_DAYMARKER: u32 = 9;
pub const MSG_ID_LAST_SPECIAL: u32 = 9;

/// approx. number of characters taken over into a message summary
pub const APPROX_SUBJECT_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[repr(u32)]
pub enum Chattype {
    Undefined = 0,
    Single = 100,
    Group = 120,
}

impl Default for Chattype {
    fn default() -> Self {
        Chattype::Undefined
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[repr(i32)]
pub enum Viewtype {
    Unknown = 0,

    /// Text message.
    Text = 10,

    /// Image message.
    Image = 20,

    /// Animated GIF message.
    Gif = 21,

    /// Message containing an audio file.
    Audio = 40,

    /// A voice message that was directly recorded by the user.
    Voice = 41,

    /// Video message.
    Video = 50,

    /// Message containing any file, eg. a PDF.
    File = 60,
}

impl Default for Viewtype {
    fn default() -> Self {
        Viewtype::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum KeyType {
    Public = 0,
    Private = 1,
}

/// Expands to the `ToSql`/`FromSql` pair for an integer-backed enum.
macro_rules! impl_sql_enum {
    ($name:ident) => {
        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                let num = num_traits::ToPrimitive::to_i64(self).expect("enum out of i64 range");
                Ok(rusqlite::types::ToSqlOutput::from(num))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                <i64 as rusqlite::types::FromSql>::column_result(value)
                    .map(|val| num_traits::FromPrimitive::from_i64(val).unwrap_or_default())
            }
        }
    };
}

impl_sql_enum!(Chattype);
impl_sql_enum!(Viewtype);

pub(crate) use impl_sql_enum;
