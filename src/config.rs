//! # Key-value configuration management

use strum::{EnumProperty, IntoEnumIterator};
use strum_macros::{AsRefStr, Display, EnumIter, EnumProperty, EnumString};

/// The available configuration keys.
///
/// The string form of a key is its snake_case name, this is also the
/// value stored in the `config` table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, EnumIter, EnumProperty,
)]
#[strum(serialize_all = "snake_case")]
pub enum Config {
    Addr,
    MailServer,
    MailUser,
    MailPw,
    MailPort,
    SendServer,
    SendUser,
    SendPw,
    SendPort,
    ServerFlags,

    Displayname,
    Selfstatus,

    #[strum(props(default = "1"))]
    E2eeEnabled,

    #[strum(props(default = "1"))]
    MdnsEnabled,

    #[strum(props(default = "0"))]
    ShowDeaddrop,

    ConfiguredAddr,
    ConfiguredMailServer,
    ConfiguredMailUser,
    ConfiguredMailPw,
    ConfiguredMailPort,
    ConfiguredSendServer,
    ConfiguredSendUser,
    ConfiguredSendPw,
    ConfiguredSendPort,
    ConfiguredServerFlags,
    Configured,
}

impl Config {
    /// Default value from the enum props, if any.
    pub fn get_default(self) -> Option<&'static str> {
        self.get_str("default")
    }

    /// All keys, for `get_info` style dumps.
    pub fn all_keys() -> impl Iterator<Item = Config> {
        Config::iter()
    }
}
