//! # MIME message parsing module.
//!
//! Wraps `mailparse` into the structure the ingestion pipeline works on:
//! a header map, a flat list of displayable parts and the contained
//! disposition-notification reports.

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use mailparse::{MailAddr, MailHeaderMap, ParsedMail};

use crate::constants::Viewtype;
use crate::headerdef::HeaderDef;
use crate::param::{Param, Params};

/// A parsed MIME message.
///
/// The original message may contain a lot more information; this
/// representation keeps what the ingestion pipeline needs.
#[derive(Debug)]
pub(crate) struct MimeMessage {
    /// Displayable parts, in order of appearance.
    pub parts: Vec<Part>,

    /// Message headers, names lowercased; the first occurrence wins.
    headers: HashMap<String, String>,

    /// Parsed `From:` mailboxes.
    pub from: Vec<Addr>,
    /// Parsed `To:` addresses.
    pub to: Vec<Addr>,
    /// Parsed `Cc:` addresses.
    pub cc: Vec<Addr>,
    /// Parsed `Bcc:` addresses.
    pub bcc: Vec<Addr>,

    /// A `Return-Path:` header was present in any spelling.
    pub has_return_path: bool,

    /// The mail was sent by a cooperating chat client.
    pub is_send_by_messenger: bool,

    /// Decoded `Subject:`.
    pub subject: Option<String>,

    /// Disposition-notification reports (read receipts).
    pub reports: Vec<Report>,
}

/// One address from an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Addr {
    pub display_name: Option<String>,
    pub addr: String,
}

/// One displayable part of a message.
#[derive(Debug, Default)]
pub(crate) struct Part {
    pub typ: Viewtype,
    /// Text shown in the chat; for attachments the file name.
    pub msg: Option<String>,
    /// The undecorated text of the first text part.
    pub msg_raw: Option<String>,
    pub bytes: usize,
    pub param: Params,
}

/// An already unpacked `message/disposition-notification`.
#[derive(Debug)]
pub(crate) struct Report {
    /// `Original-Message-ID:` of the inner notification, angle brackets
    /// removed.
    pub original_message_id: Option<String>,
}

impl MimeMessage {
    pub(crate) fn from_bytes(body: &[u8]) -> Result<MimeMessage> {
        let mail = mailparse::parse_mail(body).context("failed to parse mime message")?;

        let mut headers: HashMap<String, String> = HashMap::new();
        let mut has_return_path = false;
        for header in &mail.headers {
            let key = header.get_key().to_lowercase();
            if key == HeaderDef::ReturnPath.get_headername() {
                has_return_path = true;
            }
            headers.entry(key).or_insert_with(|| header.get_value());
        }

        let from = parse_addr_header(&headers, HeaderDef::From_);
        let to = parse_addr_header(&headers, HeaderDef::To);
        let cc = parse_addr_header(&headers, HeaderDef::Cc);
        let bcc = parse_addr_header(&headers, HeaderDef::Bcc);

        let is_send_by_messenger = headers.contains_key(&HeaderDef::ChatVersion.get_headername())
            || headers.contains_key(&HeaderDef::XMrMsg.get_headername());
        let subject = headers.get(&HeaderDef::Subject.get_headername()).cloned();

        let mut parser = MimeMessage {
            parts: Vec::new(),
            headers,
            from,
            to,
            cc,
            bcc,
            has_return_path,
            is_send_by_messenger,
            subject,
            reports: Vec::new(),
        };

        parser.parse_mime_recursive(&mail)?;
        if parser.parts.is_empty() && parser.reports.is_empty() {
            // mails without a displayable part still get an empty text
            // part so that a row is written and the mail is not fetched
            // over and over again
            parser.parts.push(Part {
                typ: Viewtype::Text,
                ..Default::default()
            });
        }

        Ok(parser)
    }

    /// The decoded value of a header, name given as [HeaderDef].
    pub fn get_header(&self, headerdef: HeaderDef) -> Option<&str> {
        self.headers
            .get(&headerdef.get_headername())
            .map(|s| s.as_str())
    }

    /// The value of the first set header out of `defs`; used for header
    /// pairs where a legacy spelling is still accepted.
    pub fn get_first_header(&self, defs: &[HeaderDef]) -> Option<&str> {
        defs.iter()
            .find_map(|def| self.get_header(def.clone()))
    }

    /// Whether any header at all was present.
    pub fn has_headers(&self) -> bool {
        !self.headers.is_empty()
    }

    /// `Message-ID:` without the angle brackets.
    pub fn get_rfc724_mid(&self) -> Option<String> {
        self.get_header(HeaderDef::MessageId)
            .map(parse_message_id)
    }

    /// Parsed `Date:` as unix timestamp, 0 if missing or unparsable.
    pub fn get_timestamp_sent(&self) -> i64 {
        self.get_header(HeaderDef::Date)
            .and_then(|value| mailparse::dateparse(value).ok())
            .unwrap_or_default()
    }

    fn parse_mime_recursive(&mut self, mail: &ParsedMail) -> Result<()> {
        let mimetype = mail.ctype.mimetype.to_lowercase();

        match mimetype.as_str() {
            "multipart/report" => {
                // the first part is for humans, the second for machines
                if mail
                    .ctype
                    .params
                    .get("report-type")
                    .map(|rt| rt == "disposition-notification")
                    .unwrap_or_default()
                    && mail.subparts.len() >= 2
                {
                    if let Some(report) = parse_report(mail) {
                        self.reports.push(report);
                    }
                } else {
                    // other report types (eg. delivery-status) are handled
                    // like any other multipart
                    for part in &mail.subparts {
                        self.parse_mime_recursive(part)?;
                    }
                }
            }
            "multipart/alternative" => {
                // prefer the plain text representation
                if let Some(part) = mail
                    .subparts
                    .iter()
                    .find(|part| part.ctype.mimetype.to_lowercase() == "text/plain")
                {
                    self.parse_mime_recursive(part)?;
                } else if let Some(part) = mail.subparts.first() {
                    self.parse_mime_recursive(part)?;
                }
            }
            _ if mimetype.starts_with("multipart/") => {
                for part in &mail.subparts {
                    self.parse_mime_recursive(part)?;
                }
            }
            _ => self.add_single_part(mail, &mimetype)?,
        }

        Ok(())
    }

    fn add_single_part(&mut self, mail: &ParsedMail, mimetype: &str) -> Result<()> {
        if mimetype.starts_with("text/") {
            let decoded = mail.get_body().unwrap_or_default();
            let bytes = mail.get_body_raw().map(|b| b.len()).unwrap_or_default();
            let msg = decoded.trim_end().to_string();
            self.parts.push(Part {
                typ: Viewtype::Text,
                msg: Some(msg),
                msg_raw: Some(decoded),
                bytes,
                param: Params::new(),
            });
            return Ok(());
        }

        let typ = match mimetype.split('/').next().unwrap_or_default() {
            "image" => {
                if mimetype == "image/gif" {
                    Viewtype::Gif
                } else {
                    Viewtype::Image
                }
            }
            "video" => Viewtype::Video,
            "audio" => Viewtype::Audio,
            _ => Viewtype::File,
        };

        let body = mail.get_body_raw().unwrap_or_default();
        let filename = mail
            .get_content_disposition()
            .params
            .get("filename")
            .cloned()
            .or_else(|| mail.ctype.params.get("name").cloned());

        let mut param = Params::new();
        param.set(Param::MimeType, mimetype);

        self.parts.push(Part {
            typ,
            msg: filename,
            msg_raw: None,
            bytes: body.len(),
            param,
        });
        Ok(())
    }
}

/// Removes `<`/`>` and surrounding whitespace from a message id.
pub(crate) fn parse_message_id(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix('<').unwrap_or(value);
    let value = value.strip_suffix('>').unwrap_or(value);
    value.trim().to_string()
}

/// Splits a `References:`/`In-Reply-To:`-style header into message ids.
pub(crate) fn parse_message_id_list(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(parse_message_id)
        .filter(|mid| !mid.is_empty())
        .collect()
}

fn parse_addr_header(headers: &HashMap<String, String>, headerdef: HeaderDef) -> Vec<Addr> {
    let mut result = Vec::new();
    let Some(value) = headers.get(&headerdef.get_headername()) else {
        return result;
    };
    let Ok(list) = mailparse::addrparse(value) else {
        return result;
    };
    for entry in list.iter() {
        match entry {
            MailAddr::Single(info) => result.push(Addr {
                display_name: info.display_name.clone(),
                addr: info.addr.clone(),
            }),
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    result.push(Addr {
                        display_name: info.display_name.clone(),
                        addr: info.addr.clone(),
                    });
                }
            }
        }
    }
    result
}

fn parse_report(report_root: &ParsedMail) -> Option<Report> {
    let report_data = report_root.subparts.get(1)?;
    if report_data.ctype.mimetype.to_lowercase() != "message/disposition-notification" {
        return None;
    }

    // although the notification is only a header block, parse it as a
    // complete mail
    let report_body = report_data.get_body().ok()?;
    let inner = mailparse::parse_mail(report_body.as_bytes()).ok()?;

    // Disposition: must be present; if so, we assume a sort of
    // attribution and do not go into details
    inner
        .headers
        .get_first_value(&HeaderDef::Disposition.get_headername())?;

    let original_message_id = inner
        .headers
        .get_first_value(&HeaderDef::OriginalMessageId.get_headername())
        .map(|v| parse_message_id(&v));

    Some(Report {
        original_message_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_message() {
        let raw = b"From: hello@example.org\n\
                    To: bob@example.net\n\
                    Subject: hi\n\
                    Chat-Version: 1.0\n\
                    Chat-Group-ID: abcdefghij1\n\
                    Chat-Group-Name: Delta Dev\n\
                    Message-ID: <123@example.org>\n\
                    Content-Type: text/plain; charset=\"utf-8\"\n\
                    \n\
                    hello\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();

        assert!(mime.is_send_by_messenger);
        assert!(!mime.has_return_path);
        assert_eq!(mime.subject.as_deref(), Some("hi"));
        assert_eq!(mime.get_rfc724_mid().as_deref(), Some("123@example.org"));
        assert_eq!(
            mime.get_header(HeaderDef::ChatGroupId),
            Some("abcdefghij1")
        );
        assert_eq!(mime.from[0].addr, "hello@example.org");
        assert_eq!(mime.to[0].addr, "bob@example.net");
        assert_eq!(mime.parts.len(), 1);
        assert_eq!(mime.parts[0].typ, Viewtype::Text);
        assert_eq!(mime.parts[0].msg.as_deref(), Some("hello"));
    }

    #[test]
    fn test_legacy_headers_accepted() {
        let raw = b"From: hello@example.org\n\
                    To: bob@example.net\n\
                    X-MrMsg: 1.0\n\
                    X-MrGrpId: abcdefghij1\n\
                    Content-Type: text/plain\n\
                    \n\
                    hello\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert!(mime.is_send_by_messenger);
        assert_eq!(
            mime.get_first_header(&[HeaderDef::ChatGroupId, HeaderDef::XMrGrpId]),
            Some("abcdefghij1")
        );
    }

    #[test]
    fn test_rfc2047_subject() {
        let raw = b"From: hello@example.org\n\
                    Subject: =?utf-8?Q?Chat=3A?= hello\n\
                    Content-Type: text/plain\n\
                    \n\
                    body\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert_eq!(mime.subject.as_deref(), Some("Chat: hello"));
    }

    #[test]
    fn test_multipart_alternative_prefers_plain() {
        let raw = b"From: a@b.c\n\
                    Content-Type: multipart/alternative; boundary=\"x\"\n\
                    \n\
                    --x\n\
                    Content-Type: text/html\n\
                    \n\
                    <b>html</b>\n\
                    --x\n\
                    Content-Type: text/plain\n\
                    \n\
                    plain\n\
                    --x--\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert_eq!(mime.parts.len(), 1);
        assert_eq!(mime.parts[0].msg.as_deref(), Some("plain"));
    }

    #[test]
    fn test_attachment_becomes_file_part() {
        let raw = b"From: a@b.c\n\
                    Content-Type: multipart/mixed; boundary=\"x\"\n\
                    \n\
                    --x\n\
                    Content-Type: text/plain\n\
                    \n\
                    see attachment\n\
                    --x\n\
                    Content-Type: application/pdf; name=\"paper.pdf\"\n\
                    Content-Transfer-Encoding: base64\n\
                    \n\
                    JVBERi0xLjQ=\n\
                    --x--\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert_eq!(mime.parts.len(), 2);
        assert_eq!(mime.parts[0].typ, Viewtype::Text);
        assert_eq!(mime.parts[1].typ, Viewtype::File);
        assert_eq!(mime.parts[1].msg.as_deref(), Some("paper.pdf"));
        assert_eq!(
            mime.parts[1].param.get(Param::MimeType),
            Some("application/pdf")
        );
        assert!(mime.parts[1].bytes > 0);
    }

    #[test]
    fn test_mdn_report() {
        let raw = b"From: bob@example.net\n\
                    To: alice@example.org\n\
                    Content-Type: multipart/report; report-type=disposition-notification; boundary=\"x\"\n\
                    \n\
                    --x\n\
                    Content-Type: text/plain\n\
                    \n\
                    The message was displayed.\n\
                    --x\n\
                    Content-Type: message/disposition-notification\n\
                    \n\
                    Reporting-UA: letterbox\n\
                    Original-Recipient: rfc822;bob@example.net\n\
                    Final-Recipient: rfc822;bob@example.net\n\
                    Original-Message-ID: <abc@h>\n\
                    Disposition: manual-action/MDN-sent-manually; displayed\n\
                    \n\
                    --x--\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert!(mime.parts.is_empty());
        assert_eq!(mime.reports.len(), 1);
        assert_eq!(
            mime.reports[0].original_message_id.as_deref(),
            Some("abc@h")
        );
    }

    #[test]
    fn test_empty_mail_still_yields_one_part() {
        let raw = b"From: a@b.c\nSubject: void\n\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert_eq!(mime.parts.len(), 1);
    }

    #[test]
    fn test_message_id_helpers() {
        assert_eq!(parse_message_id(" <abc@h> "), "abc@h");
        assert_eq!(parse_message_id("abc@h"), "abc@h");
        assert_eq!(
            parse_message_id_list("<a@h> <b@h>"),
            vec!["a@h".to_string(), "b@h".to_string()]
        );
    }

    #[test]
    fn test_return_path_detected() {
        let raw = b"Return-Path: <bob@example.net>\n\
                    From: bob@example.net\n\
                    To: alice@example.org\n\
                    Content-Type: text/plain\n\
                    \n\
                    hi\n";
        let mime = MimeMessage::from_bytes(&raw[..]).unwrap();
        assert!(mime.has_return_path);
    }
}
