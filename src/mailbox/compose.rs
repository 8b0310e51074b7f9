//! Reply composition: threaded subject, marker header and MIME rendering.

use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;

use crate::error::MailboxError;
use crate::mailbox::Message;

/// Header stamped on every reply the engine sends. Its presence on an
/// inbound message means the engine wrote it.
pub const AUTO_REPLY_HEADER: &str = "X-Auto-Reply";

/// An outbound reply, ready to hand to [`crate::mailbox::MessageStore::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReply {
    /// Recipient, in the original message's `From` form.
    pub to: String,
    pub subject: String,
    pub body: String,
    /// `Message-ID` of the message being answered.
    pub in_reply_to: Option<String>,
}

impl ComposedReply {
    /// Build a reply to `original` carrying `body`.
    pub fn reply_to(original: &Message, body: impl Into<String>) -> Self {
        Self {
            to: original.from_address.clone(),
            subject: reply_subject(&original.subject),
            body: body.into(),
            in_reply_to: original.message_id_header().map(str::to_string),
        }
    }

    /// Render as an RFC 5322 message from `from`, including the marker header.
    pub fn render(&self, from: &str) -> Result<Vec<u8>, MailboxError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| MailboxError::Compose(format!("Invalid from address: {e}")))?;
        let to = parse_recipient(&self.to)?;

        let mut builder = lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .header(AutoReplyMarker);

        if let Some(ref id) = self.in_reply_to {
            builder = builder.in_reply_to(id.clone()).references(id.clone());
        }

        let message = builder
            .body(self.body.clone())
            .map_err(|e| MailboxError::Compose(format!("Failed to build reply: {e}")))?;

        Ok(message.formatted())
    }
}

/// Prefix `Re: ` unless the subject already carries it.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Parse the recipient, falling back to the bare address when the display
/// form does not parse (e.g. unquoted commas in the name).
fn parse_recipient(to: &str) -> Result<Mailbox, MailboxError> {
    if let Ok(mailbox) = to.parse::<Mailbox>() {
        return Ok(mailbox);
    }
    crate::mailbox::extract_address(to)
        .parse::<Mailbox>()
        .map_err(|e| MailboxError::Compose(format!("Invalid recipient {to}: {e}")))
}

/// `X-Auto-Reply: true`
#[derive(Debug, Clone, Copy)]
struct AutoReplyMarker;

impl Header for AutoReplyMarker {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(AUTO_REPLY_HEADER)
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "true".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> Message {
        Message {
            id: "m1".into(),
            thread_id: "t1".into(),
            subject: "Website quote".into(),
            from_address: "Alice <alice@example.com>".into(),
            body_text: "How much for a website?".into(),
            labels: vec!["INBOX".into()],
            headers: vec![("Message-ID".into(), "<abc@example.com>".into())],
        }
    }

    #[test]
    fn reply_subject_prefixes_once() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("Re: Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
        assert_eq!(reply_subject(""), "Re: ");
    }

    #[test]
    fn reply_subject_handles_multibyte_start() {
        assert_eq!(reply_subject("😀 Pricing"), "Re: 😀 Pricing");
        assert_eq!(reply_subject("ñé precio"), "Re: ñé precio");
        assert_eq!(reply_subject("é"), "Re: é");
        assert_eq!(reply_subject("re:ñ"), "re:ñ");
    }

    #[test]
    fn reply_to_threads_on_message_id() {
        let reply = ComposedReply::reply_to(&original(), "Thanks!");
        assert_eq!(reply.to, "Alice <alice@example.com>");
        assert_eq!(reply.subject, "Re: Website quote");
        assert_eq!(reply.in_reply_to.as_deref(), Some("<abc@example.com>"));
    }

    #[test]
    fn rendered_reply_carries_marker_and_threading() {
        let reply = ComposedReply::reply_to(&original(), "Our pricing starts at $99.");
        let raw = String::from_utf8(reply.render("owner@example.com").unwrap()).unwrap();
        assert!(raw.contains("X-Auto-Reply: true"));
        assert!(raw.contains("Subject: Re: Website quote"));
        assert!(raw.contains("In-Reply-To:"));
        assert!(raw.contains("alice@example.com"));
        assert!(raw.contains("Our pricing starts at $99."));
    }

    #[test]
    fn render_rejects_invalid_sender() {
        let reply = ComposedReply::reply_to(&original(), "hi");
        assert!(matches!(
            reply.render("not an address"),
            Err(MailboxError::Compose(_))
        ));
    }
}
