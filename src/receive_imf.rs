//! Internet Message Format reception pipeline.
//!
//! Takes a raw RFC 5322 blob from the network collaborator, decides which
//! chat it belongs to, writes all rows in one transaction and fires the
//! queued events after the commit.

use anyhow::{format_err, Context as _, Result};
use rusqlite::Connection;

use crate::chat;
use crate::constants::*;
use crate::contact::{self, Origin};
use crate::events::Event;
use crate::headerdef::HeaderDef;
use crate::mailbox::Mailbox;
use crate::message::{self, MessageState};
use crate::mimeparser::{parse_message_id_list, Addr, MimeMessage};
use crate::param::{Param, Params};
use crate::sql;
use crate::tools;

/// Reads a raw Internet Message Format blob into the database.
///
/// This is the single entry point for everything arriving from IMAP; it
/// never performs network I/O. Malformed input is dropped silently after
/// a rollback, duplicates update the server location of the stored row.
pub fn receive_imf(
    mailbox: &Mailbox,
    imf_raw: &[u8],
    server_folder: &str,
    server_uid: u32,
    flags: u32,
) {
    match receive_imf_inner(mailbox, imf_raw, server_folder, server_uid, flags) {
        Ok(events) => {
            // events are emitted in commit order, after the lock is gone
            for event in events {
                mailbox.call_cb(event);
            }
        }
        Err(err) => {
            info!(mailbox, "receive_imf: message dropped: {:#}", err);
        }
    }
}

enum Outcome {
    Inserted(Vec<Event>),
    Duplicate {
        rfc724_mid: String,
        needs_update: bool,
    },
}

fn receive_imf_inner(
    mailbox: &Mailbox,
    imf_raw: &[u8],
    server_folder: &str,
    server_uid: u32,
    flags: u32,
) -> Result<Vec<Event>> {
    let mime = MimeMessage::from_bytes(imf_raw)?;
    if !mime.has_headers() {
        // nothing to key the message on, not even an empty record helps
        return Ok(Vec::new());
    }

    let mut guard = mailbox.sql.lock();
    let conn = guard
        .as_mut()
        .ok_or_else(|| format_err!("database is not opened"))?;

    let tx = conn.transaction()?;
    let outcome = receive_imf_tx(mailbox, &tx, &mime, server_folder, server_uid, flags)?;

    match outcome {
        Outcome::Inserted(events) => {
            tx.commit()?;
            Ok(events)
        }
        Outcome::Duplicate {
            rfc724_mid,
            needs_update,
        } => {
            // we may get a mail twice, eg. if it is moved between folders
            tx.rollback()?;
            if needs_update {
                message::update_server_uid(conn, &rfc724_mid, server_folder, server_uid);
            }
            Ok(Vec::new())
        }
    }
}

fn receive_imf_tx(
    mailbox: &Mailbox,
    conn: &Connection,
    mime: &MimeMessage,
    server_folder: &str,
    server_uid: u32,
    flags: u32,
) -> Result<Outcome> {
    let self_addr = sql::get_raw_config(conn, "configured_addr").unwrap_or_default();

    // `Return-Path:` is assumed to be never present if the message was
    // sent by us; `From:` alone is no good criterion as mailboxes may use
    // different sending-addresses over the years
    let mut incoming = mime.has_return_path;
    let mut incoming_from_known_sender = false;
    let mut from_id: u32 = CONTACT_ID_UNDEFINED;
    let mut from_id_blocked = false;

    if incoming {
        let mut from_list = Vec::new();
        let check_self = add_or_lookup_contacts_by_address_list(
            conn,
            &self_addr,
            &mime.from,
            Origin::IncomingUnknownFrom,
            &mut from_list,
        );
        if check_self {
            // an outgoing message that came back to us; the `Return-Path:`
            // check above cannot catch these
            incoming = false;
        } else if let Some(&first) = from_list.first() {
            // if there is no From: at all, from_id stays 0; such messages
            // are still written to avoid a re-download from the server
            from_id = first;
            let (known, blocked) = contact::is_known_contact(conn, from_id);
            from_id_blocked = blocked;
            if known {
                incoming_from_known_sender = true;
            }
        }
    }
    let outgoing = !incoming;

    // for outgoing or incoming-from-known-sender, collect the recipients;
    // To: first, so that to_list[0] is the primary recipient
    let mut to_list: Vec<u32> = Vec::new();
    if outgoing || incoming_from_known_sender {
        add_or_lookup_contacts_by_address_list(
            conn,
            &self_addr,
            &mime.to,
            if outgoing {
                Origin::OutgoingTo
            } else {
                Origin::IncomingTo
            },
            &mut to_list,
        );
        add_or_lookup_contacts_by_address_list(
            conn,
            &self_addr,
            &mime.cc,
            if outgoing {
                Origin::OutgoingCc
            } else {
                Origin::IncomingCc
            },
            &mut to_list,
        );
        if outgoing {
            add_or_lookup_contacts_by_address_list(
                conn,
                &self_addr,
                &mime.bcc,
                Origin::OutgoingBcc,
                &mut to_list,
            );
        }
    }

    let mut events: Vec<Event> = Vec::new();
    let mut created_db_entries: Vec<(u32, u32)> = Vec::new();
    let mut create_event_to_send = Some(CreateEvent::MsgsChanged);

    if !mime.parts.is_empty() {
        let mut chat_id = 0;
        let mut to_id = CONTACT_ID_UNDEFINED;
        let mut is_group = false;
        let state;

        if incoming {
            state = if flags & IMAP_SEEN != 0 {
                MessageState::InSeen
            } else {
                MessageState::InFresh
            };
            to_id = CONTACT_ID_SELF;

            chat_id = lookup_chat_by_group_id(
                conn,
                mime,
                incoming_from_known_sender && mime.is_send_by_messenger,
                from_id,
                &to_list,
                &self_addr,
                &mut events,
            )?;
            if chat_id != 0 {
                is_group = true;
            } else {
                chat_id = chat::lookup_real_nchat_by_contact_id(conn, from_id);
                if chat_id == 0 && from_id > CONTACT_ID_LAST_SPECIAL {
                    if incoming_from_known_sender && mime.is_send_by_messenger {
                        chat_id = chat::create_or_lookup_nchat_by_contact_id(conn, from_id)?;
                    } else if is_reply_to_known_message(conn, mime) {
                        contact::scaleup_origin(conn, from_id, Origin::IncomingReplyTo)?;
                        chat_id = chat::create_or_lookup_nchat_by_contact_id(conn, from_id)?;
                    }
                }
                if chat_id == 0 {
                    chat_id = CHAT_ID_DEADDROP;
                }
            }
        } else {
            // the mail is on the server, so it is at least delivered;
            // other states (read, error) cannot be recreated
            state = MessageState::OutDelivered;
            from_id = CONTACT_ID_SELF;

            if let Some(&first_to) = to_list.first() {
                to_id = first_to;

                chat_id = lookup_chat_by_group_id(
                    conn,
                    mime,
                    true,
                    from_id,
                    &to_list,
                    &self_addr,
                    &mut events,
                )?;
                if chat_id != 0 {
                    is_group = true;
                } else {
                    chat_id = chat::lookup_real_nchat_by_contact_id(conn, to_id);
                    if chat_id == 0 && mime.is_send_by_messenger {
                        let (_, blocked) = contact::is_known_contact(conn, to_id);
                        if !blocked {
                            chat_id = chat::create_or_lookup_nchat_by_contact_id(conn, to_id)?;
                        }
                    }
                }
            }

            if chat_id == 0 {
                chat_id = CHAT_ID_TO_DEADDROP;
            }
        }

        // the timestamp cannot be corrected earlier as from_id must be set
        let message_timestamp = correct_bad_timestamp(
            mailbox,
            conn,
            chat_id,
            from_id,
            mime.get_timestamp_sent(),
            flags & IMAP_SEEN == 0,
        );

        let rfc724_mid = match mime.get_rfc724_mid() {
            Some(mid) => mid,
            None => tools::create_incoming_rfc724_mid(message_timestamp, from_id, &to_list)
                .context("cannot synthesize a message id without recipients")?,
        };

        if let Some((old_folder, old_uid)) = message::rfc724_mid_exists(conn, &rfc724_mid) {
            // already recorded; possibly the mail was moved on the server
            let needs_update = old_folder != server_folder || old_uid != server_uid;
            return Ok(Outcome::Duplicate {
                rfc724_mid,
                needs_update,
            });
        }

        // split the message into simple parts usable as "short messages";
        // mails sent by cooperating clients result in exactly one part,
        // others may result in several (eg. one per attachment)
        let mut first_dblocal_id = 0;
        for part in &mime.parts {
            let txt_raw = if part.typ == Viewtype::Text {
                format!(
                    "{}\n\n{}",
                    mime.subject.as_deref().unwrap_or(""),
                    part.msg_raw.as_deref().unwrap_or("")
                )
            } else {
                String::new()
            };

            conn.execute(
                "INSERT INTO msgs \
                 (rfc724_mid,server_folder,server_uid,chat_id,from_id, \
                  to_id,timestamp,type,state,msgrmsg,txt,txt_raw,param,bytes) \
                 VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?);",
                rusqlite::params![
                    rfc724_mid,
                    server_folder,
                    server_uid,
                    chat_id,
                    from_id,
                    to_id,
                    message_timestamp,
                    part.typ,
                    state,
                    mime.is_send_by_messenger as i32,
                    part.msg.as_deref().unwrap_or(""),
                    txt_raw,
                    part.param.to_string(),
                    part.bytes as i64,
                ],
            )?;
            let dblocal_id = conn.last_insert_rowid() as u32;
            if first_dblocal_id == 0 {
                first_dblocal_id = dblocal_id;
            }
            created_db_entries.push((chat_id, dblocal_id));
        }

        // create "ghost messages" for the additional To:/Cc:/Bcc: receivers
        // of outgoing non-group mails, so every 1:1 view shows the copy as
        // a conventional mail client would
        if outgoing && !is_group && to_list.len() > 1 && first_dblocal_id != 0 {
            let ghost_rfc724_mid = message::ghost_rfc724_mid(first_dblocal_id);
            let mut ghost_param = Params::new();
            ghost_param.set_int(Param::GhostCc, first_dblocal_id as i32);
            let ghost_txt = {
                let part = &mime.parts[0];
                message::get_summarytext_by_raw(
                    part.typ,
                    part.msg.as_deref(),
                    &part.param,
                    APPROX_SUBJECT_CHARS,
                )
            };

            for &ghost_to_id in &to_list[1..] {
                let mut ghost_chat_id = chat::lookup_real_nchat_by_contact_id(conn, ghost_to_id);
                if ghost_chat_id == 0 {
                    ghost_chat_id = CHAT_ID_TO_DEADDROP;
                }
                conn.execute(
                    "INSERT INTO msgs \
                     (rfc724_mid,server_folder,server_uid,chat_id,from_id, \
                      to_id,timestamp,type,state,msgrmsg,txt,txt_raw,param,bytes) \
                     VALUES (?,'',0,?,?,?,?,?,?,?,?,'',?,0);",
                    rusqlite::params![
                        ghost_rfc724_mid,
                        ghost_chat_id,
                        from_id,
                        ghost_to_id,
                        message_timestamp,
                        Viewtype::Text,
                        state,
                        mime.is_send_by_messenger as i32,
                        ghost_txt,
                        ghost_param.to_string(),
                    ],
                )?;
                created_db_entries.push((ghost_chat_id, conn.last_insert_rowid() as u32));
            }
        }

        // decide which event the created entries produce
        if chat_id == CHAT_ID_TRASH {
            // recorded only to suppress a re-download; never shown
            create_event_to_send = None;
        } else if incoming && state == MessageState::InFresh {
            if from_id_blocked {
                create_event_to_send = None;
            } else if chat_id == CHAT_ID_DEADDROP {
                if sql::get_raw_config_int(conn, "show_deaddrop").unwrap_or(0) != 0 {
                    create_event_to_send = Some(CreateEvent::IncomingMsg);
                }
            } else {
                create_event_to_send = Some(CreateEvent::IncomingMsg);
            }
        }
    }

    // handle reports (mainly MDNs); not shown as messages themselves
    if !mime.reports.is_empty()
        && sql::get_raw_config_int(conn, "mdns_enabled").unwrap_or(MDNS_DEFAULT_ENABLED) != 0
    {
        for report in &mime.reports {
            if let Some(mid) = &report.original_message_id {
                if let Some((chat_id, msg_id)) = message::mdn_from_ext(conn, from_id, mid) {
                    events.push(Event::MsgRead { chat_id, msg_id });
                }
            }
        }
    }

    let mut all_events = Vec::new();
    if let Some(kind) = create_event_to_send {
        for (chat_id, msg_id) in created_db_entries {
            all_events.push(match kind {
                CreateEvent::MsgsChanged => Event::MsgsChanged { chat_id, msg_id },
                CreateEvent::IncomingMsg => Event::IncomingMsg { chat_id, msg_id },
            });
        }
    }
    all_events.append(&mut events);

    Ok(Outcome::Inserted(all_events))
}

#[derive(Debug, Clone, Copy)]
enum CreateEvent {
    MsgsChanged,
    IncomingMsg,
}

/// Adds every non-self address to the contacts table and collects the ids
/// into `ids` (deduplicated, order preserved). Returns whether one of the
/// addresses was our own.
fn add_or_lookup_contacts_by_address_list(
    conn: &Connection,
    self_addr: &str,
    addrs: &[Addr],
    origin: Origin,
    ids: &mut Vec<u32>,
) -> bool {
    let mut check_self = false;
    for addr in addrs {
        if !self_addr.is_empty() && tools::addr_cmp(self_addr, &addr.addr) {
            check_self = true;
            continue;
        }
        if let Ok((id, _modified)) =
            contact::add_or_lookup_contact(conn, addr.display_name.as_deref(), &addr.addr, origin)
        {
            if id != CONTACT_ID_UNDEFINED && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    check_self
}

/// Checks if the message is a reply to a message we know.
///
/// Replies are identified by the `Chat-Predecessor:` header (cooperating
/// clients) or by `In-Reply-To:`/`References:` (all other clients).
fn is_reply_to_known_message(conn: &Connection, mime: &MimeMessage) -> bool {
    if let Some(value) =
        mime.get_first_header(&[HeaderDef::ChatPredecessor, HeaderDef::XMrPredecessor])
    {
        if message::is_known_rfc724_mid(conn, &crate::mimeparser::parse_message_id(value)) {
            return true;
        }
    }
    for headerdef in [HeaderDef::InReplyTo, HeaderDef::References] {
        if let Some(value) = mime.get_header(headerdef) {
            if parse_message_id_list(value)
                .iter()
                .any(|mid| message::is_known_rfc724_mid(conn, mid))
            {
                return true;
            }
        }
    }
    false
}

/// Corrects the claimed `Date:` of a message.
///
/// For fresh messages the last message of another user in the chat is the
/// minimum; messages from restores or synchronisation may pop up wherever.
/// The (smeared) current time is always the maximum.
fn correct_bad_timestamp(
    mailbox: &Mailbox,
    conn: &Connection,
    chat_id: u32,
    from_id: u32,
    desired_timestamp: i64,
    is_fresh_msg: bool,
) -> i64 {
    let mut desired_timestamp = desired_timestamp;

    if is_fresh_msg {
        let last_msg_time: Option<i64> = conn
            .query_row(
                "SELECT MAX(timestamp) FROM msgs WHERE chat_id=? AND from_id!=? AND timestamp>=?;",
                rusqlite::params![chat_id, from_id, desired_timestamp],
                |row| row.get(0),
            )
            .unwrap_or_default();
        if let Some(last_msg_time) = last_msg_time {
            if last_msg_time > 0 && desired_timestamp <= last_msg_time {
                // several messages may get the same
                // one-second-after-the-last-message timestamp; ordering by
                // id is the second criterion, so this is fine
                desired_timestamp = last_msg_time + 1;
            }
        }
    }

    if desired_timestamp >= tools::smeared_time(mailbox) {
        desired_timestamp = tools::create_smeared_timestamp(mailbox);
    }

    desired_timestamp
}

/// Resolves the group of a message, creating the chat if needed.
///
/// Returns 0 if the message belongs to no group; the message is then
/// routed to a 1:1 chat. [CHAT_ID_TRASH] is returned for messages of
/// explicitly left groups, they are recorded but never shown.
fn lookup_chat_by_group_id(
    conn: &Connection,
    mime: &MimeMessage,
    create_as_needed: bool,
    from_id: u32,
    to_list: &[u32],
    self_addr: &str,
    events: &mut Vec<Event>,
) -> Result<u32> {
    // the explicit header is preferred over ids carried in Message-ID,
    // In-Reply-To and References, in this order
    let grpid_from_header = mime
        .get_first_header(&[HeaderDef::ChatGroupId, HeaderDef::XMrGrpId])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let grpid_from_mid = mime
        .get_rfc724_mid()
        .and_then(|mid| tools::extract_grpid_from_rfc724_mid(&mid).map(str::to_string));
    let grpid_from_in_reply_to = first_grpid_from_mid_list(mime.get_header(HeaderDef::InReplyTo));
    let grpid_from_references = first_grpid_from_mid_list(mime.get_header(HeaderDef::References));

    let grpid = match grpid_from_header
        .or(grpid_from_mid)
        .or(grpid_from_in_reply_to)
        .or(grpid_from_references)
    {
        Some(grpid) => grpid,
        None => return Ok(0),
    };

    let grpname = mime
        .get_first_header(&[HeaderDef::ChatGroupName, HeaderDef::XMrGrpName])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let removed_addr = mime
        .get_first_header(&[HeaderDef::ChatGroupMemberRemoved, HeaderDef::XMrRemoveFromGrp])
        .map(|s| s.trim().to_string());
    let added_addr = mime
        .get_first_header(&[HeaderDef::ChatGroupMemberAdded, HeaderDef::XMrAddToGrp])
        .map(|s| s.trim().to_string());
    let grpname_changed = mime
        .get_first_header(&[HeaderDef::ChatGroupNameChanged, HeaderDef::XMrGrpNameChanged])
        .is_some();

    let mut chat_id = chat::lookup_chat_by_grpid(conn, &grpid).unwrap_or(0);

    // if the sender is not a member of an existing group, the message
    // goes to the normal chat with the sender instead
    if chat_id != 0 && !chat::is_contact_in_chat(conn, chat_id, from_id) {
        return Ok(0);
    }

    let group_explicitly_left = chat::group_explicitly_left(conn, &grpid);
    let mut recreate_member_list = false;

    // a group that does not exist yet is only created if the mail names
    // it, does not remove a member (otherwise a pending "quit" message
    // would resurrect it) and, for explicitly left groups, re-adds us
    if chat_id == 0
        && create_as_needed
        && grpname.is_some()
        && removed_addr.is_none()
        && (!group_explicitly_left
            || added_addr
                .as_deref()
                .map(|added| tools::addr_cmp(self_addr, added))
                .unwrap_or_default())
    {
        chat_id = chat::insert_chat(
            conn,
            Chattype::Group,
            grpname.as_deref().unwrap_or_default(),
            &grpid,
        )?;
        recreate_member_list = true;
    }

    if chat_id <= CHAT_ID_LAST_SPECIAL {
        return Ok(if group_explicitly_left {
            CHAT_ID_TRASH
        } else {
            0
        });
    }

    // execute group commands
    if added_addr.is_some() || removed_addr.is_some() {
        recreate_member_list = true;
    } else if grpname_changed {
        if let Some(grpname) = &grpname {
            if grpname.len() < 200 {
                chat::set_chat_name_raw(conn, chat_id, grpname)?;
                events.push(Event::ChatModified(chat_id));
            }
        }
    }

    if recreate_member_list {
        let skip = removed_addr.as_deref();

        chat::clear_chat_members(conn, chat_id);

        if !skip.map(|s| tools::addr_cmp(self_addr, s)).unwrap_or_default() {
            chat::add_to_chat_contacts_table(conn, chat_id, CONTACT_ID_SELF);
        }
        if from_id > CONTACT_ID_LAST_SPECIAL
            && !contact::contact_addr_equals(conn, from_id, self_addr)
            && !skip
                .map(|s| contact::contact_addr_equals(conn, from_id, s))
                .unwrap_or_default()
        {
            chat::add_to_chat_contacts_table(conn, chat_id, from_id);
        }
        for &to_id in to_list {
            // to_list is deduplicated and contains no special ids
            if !contact::contact_addr_equals(conn, to_id, self_addr)
                && !skip
                    .map(|s| contact::contact_addr_equals(conn, to_id, s))
                    .unwrap_or_default()
            {
                chat::add_to_chat_contacts_table(conn, chat_id, to_id);
            }
        }
        events.push(Event::ChatModified(chat_id));
    }

    // check the number of receivers: the critical situation is a user
    // hitting "Reply" instead of "Reply all" in a non-messenger client.
    // to_list does not contain us, so everything up to 3 members is fine.
    if to_list.len() == 1
        && !mime.is_send_by_messenger
        && chat::get_chat_contact_count(conn, chat_id) > 3
    {
        return Ok(0);
    }

    Ok(chat_id)
}

fn first_grpid_from_mid_list(value: Option<&str>) -> Option<String> {
    parse_message_id_list(value?)
        .iter()
        .find_map(|mid| tools::extract_grpid_from_rfc724_mid(mid).map(str::to_string))
}
