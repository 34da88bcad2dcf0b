//! # Letterbox core
//!
//! The core of an end-to-end encrypted chat client that piggy-backs on
//! ordinary email: messages travel over IMAP/SMTP as RFC 5322 mails with
//! a few extra headers, chats, contacts and keys live in a local SQLite
//! file, and encryption follows the Autocrypt Level 1 standard.
//!
//! The entry point is [mailbox::Mailbox]; the network clients are
//! external collaborators that feed raw mails into
//! [receive_imf::receive_imf] through the [mailbox::ImfSink] seam.

#![deny(clippy::correctness)]
#![warn(clippy::all, clippy::perf)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
mod log;

pub mod chat;
pub mod config;
pub mod constants;
pub mod contact;
pub mod events;
pub mod headerdef;
pub mod key;
pub mod keyring;
pub mod login_param;
pub mod mailbox;
pub mod message;
mod mimeparser;
pub mod param;
pub mod pgp;
pub mod receive_imf;
pub mod sql;
mod tools;

pub use crate::events::{Callback, Event};
pub use crate::mailbox::{ImfSink, Mailbox};

#[cfg(test)]
mod test_utils;
