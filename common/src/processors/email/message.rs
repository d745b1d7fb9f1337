// Parsed email record and filter matching

use mail_parser::{Address, MessageParser, MimeHeaders};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentInfo {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
}

/// Structured view of one message, as delivered in the firing payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailRecord {
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub body: String,
    pub attachments: Vec<AttachmentInfo>,
}

/// Substring filters; unset filters always pass. Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MessageFilter {
    pub fn matches(&self, record: &EmailRecord) -> bool {
        let from_ok = self
            .from
            .as_deref()
            .map_or(true, |f| record.from.as_deref().is_some_and(|from| contains_ci(from, f)));
        let subject_ok = self.subject.as_deref().map_or(true, |s| {
            record
                .subject
                .as_deref()
                .is_some_and(|subject| contains_ci(subject, s))
        });
        let body_ok = self
            .body
            .as_deref()
            .map_or(true, |b| contains_ci(&record.body, b));

        from_ok && subject_ok && body_ok
    }
}

fn addresses(address: Option<&Address>) -> Vec<String> {
    address
        .map(|list| {
            list.iter()
                .filter_map(|addr| {
                    let email = addr.address()?;
                    Some(match addr.name() {
                        Some(name) if !name.is_empty() => format!("{} <{}>", name, email),
                        _ => email.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse raw RFC 5322 bytes. Returns `None` for data that is not a message.
pub fn parse_message(raw: &[u8]) -> Option<EmailRecord> {
    let message = MessageParser::default().parse(raw)?;

    let attachments = message
        .attachments()
        .map(|part| AttachmentInfo {
            filename: part.attachment_name().map(str::to_string),
            content_type: part.content_type().map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            }),
            size: part.len(),
        })
        .collect();

    Some(EmailRecord {
        from: addresses(message.from()).into_iter().next(),
        to: addresses(message.to()),
        cc: addresses(message.cc()),
        bcc: addresses(message.bcc()),
        subject: message.subject().map(str::to_string),
        date: message.date().map(|d| d.to_rfc3339()),
        message_id: message.message_id().map(str::to_string),
        body: message
            .body_text(0)
            .map(|body| body.into_owned())
            .unwrap_or_default(),
        attachments,
    })
}
