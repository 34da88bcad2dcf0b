use strum_macros::Display;

/// Email headers the core reads or writes.
///
/// The string form is the lowercased header name; the mimeparser stores
/// all header names lowercased, so lookups go through [HeaderDef::get_headername].
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
#[allow(dead_code)]
pub enum HeaderDef {
    MessageId,
    Subject,
    Date,
    From_,
    To,
    Cc,
    Bcc,
    ReturnPath,
    InReplyTo,
    References,
    Disposition,
    OriginalMessageId,

    /// Messenger messages carry this header; its presence marks a mail as
    /// sent by a cooperating chat client.
    ChatVersion,
    ChatGroupId,
    ChatGroupName,
    ChatGroupNameChanged,
    ChatGroupMemberAdded,
    ChatGroupMemberRemoved,
    ChatPredecessor,
    ChatDispositionNotificationTo,
    Autocrypt,

    /// Legacy spellings of the chat headers; still accepted on reception.
    #[strum(serialize = "x-mrmsg")]
    XMrMsg,
    #[strum(serialize = "x-mrgrpid")]
    XMrGrpId,
    #[strum(serialize = "x-mrgrpname")]
    XMrGrpName,
    #[strum(serialize = "x-mrgrpnamechanged")]
    XMrGrpNameChanged,
    #[strum(serialize = "x-mraddtogrp")]
    XMrAddToGrp,
    #[strum(serialize = "x-mrremovefromgrp")]
    XMrRemoveFromGrp,
    #[strum(serialize = "x-mrpredecessor")]
    XMrPredecessor,

    _TestHeader,
}

impl HeaderDef {
    /// Returns the header name for map lookups.
    pub fn get_headername(&self) -> String {
        self.to_string()
    }
}
