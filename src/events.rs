//! # Events and the callback funnel
//!
//! Everything the core wants to tell the host (new messages, state
//! changes, log lines) goes through a single callback given to
//! [crate::mailbox::Mailbox::new].

use strum::EnumProperty;

use crate::mailbox::Mailbox;

/// Callback function as given to [Mailbox::new].
///
/// The callback receives the mailbox the event belongs to and the event
/// itself; the numeric code of an event is available via [Event::as_id].
/// Return 0 for unhandled events.
pub type Callback = dyn Fn(&Mailbox, Event) -> libc::uintptr_t + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::EnumProperty)]
pub enum Event {
    /// The library-user may write an informational string to the log.
    /// This event should not be reported to the end-user using a popup or so.
    #[strum(props(id = "100"))]
    Info(String),

    /// The library-user should write a warning string to the log.
    #[strum(props(id = "300"))]
    Warning(String),

    /// The library-user should report an error to the end-user.
    ///
    /// As most things are asynchronous, things may go wrong at any time and
    /// the user should not be disturbed by a dialog; use a bubble or so.
    #[strum(props(id = "400"))]
    Error(String),

    /// An action cannot be performed because there is no network available.
    /// Network errors may come in a sequence, it is not useful to raise
    /// each and every one to the user.
    #[strum(props(id = "401"))]
    ErrorNetwork(String),

    /// Messages or chats changed. One or more messages or chats changed
    /// for various reasons in the database: messages sent, received or
    /// removed, chats created, deleted or archived, a draft has been set.
    #[strum(props(id = "2000"))]
    MsgsChanged { chat_id: u32, msg_id: u32 },

    /// There is a fresh message. Typically the user will show a
    /// notification on this event. No extra [Event::MsgsChanged] is sent
    /// together with this event.
    #[strum(props(id = "2005"))]
    IncomingMsg { chat_id: u32, msg_id: u32 },

    /// A single message is read by the receiver; its state changed from
    /// `OutDelivered` to `OutMdnRcvd`.
    #[strum(props(id = "2015"))]
    MsgRead { chat_id: u32, msg_id: u32 },

    /// Chat changed: the name of a group was changed or members were
    /// added or removed.
    #[strum(props(id = "2020"))]
    ChatModified(u32),

    /// Contact(s) created, renamed, blocked or deleted. If set, the value
    /// is the contact id of an added contact that should be selected.
    #[strum(props(id = "2030"))]
    ContactsChanged(Option<u32>),

    /// The first wake-lock was taken (`true`) or the last one was
    /// released (`false`); the host should adjust its platform wake-lock.
    #[strum(props(id = "2100"))]
    WakeLock(bool),
}

impl Event {
    /// Returns the numeric event id as passed over the callback.
    pub fn as_id(&self) -> i32 {
        self.get_str("id")
            .expect("missing id")
            .parse()
            .expect("invalid id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids() {
        assert_eq!(Event::Info("".into()).as_id(), 100);
        assert_eq!(
            Event::IncomingMsg {
                chat_id: 1,
                msg_id: 2
            }
            .as_id(),
            2005
        );
        assert_eq!(Event::WakeLock(true).as_id(), 2100);
    }
}
