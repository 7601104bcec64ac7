use crate::model::{excerpt, Message, MessageId};

/// Characters of the target's text kept for the compose-box preview.
pub const PREVIEW_CHARS: usize = 100;
/// Characters of the target's text kept for the inline quote on a reply.
pub const QUOTE_CHARS: usize = 50;

/// Everything needed to display and submit a pending reply without
/// re-fetching the target: who wrote it, a short excerpt, and the segment
/// the outgoing post is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub id: MessageId,
    pub author: String,
    pub excerpt: String,
    pub pinned_segment: String,
}

/// At most one reply is ever pending; choosing a new target replaces the
/// old one, and cancel or a successful post returns to `Idle`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReplyContext {
    #[default]
    Idle,
    Pending(ReplyTarget),
}

impl ReplyContext {
    /// Starts (or replaces) a pending reply against `target`, pinning the
    /// target's segment for the eventual post.
    pub fn begin(&mut self, target: &Message) {
        *self = ReplyContext::Pending(ReplyTarget {
            id: target.id.clone(),
            author: target.author.clone(),
            excerpt: excerpt(&target.text, PREVIEW_CHARS),
            pinned_segment: target.segment.clone(),
        });
    }

    /// Returns to `Idle`. Idempotent; reports whether a reply was pending.
    pub fn cancel(&mut self) -> bool {
        let was_pending = self.is_pending();
        *self = ReplyContext::Idle;
        was_pending
    }

    /// Clears the context after the reply was accepted by the store.
    pub fn complete(&mut self) {
        *self = ReplyContext::Idle;
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReplyContext::Pending(_))
    }

    pub fn pending(&self) -> Option<&ReplyTarget> {
        match self {
            ReplyContext::Idle => None,
            ReplyContext::Pending(target) => Some(target),
        }
    }

    /// The `reply_to` value an outgoing post must carry.
    pub fn outgoing_target(&self) -> Option<MessageId> {
        self.pending().map(|target| target.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn message(id: &str, author: &str, text: &str, segment: &str) -> Message {
        Message {
            id: MessageId::new(id),
            author: author.to_string(),
            text: text.to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            reply_to: None,
            segment: segment.to_string(),
            attachment: None,
            readers: Vec::new(),
        }
    }

    #[test]
    fn begin_captures_target_summary_and_segment() {
        let mut ctx = ReplyContext::default();
        assert!(!ctx.is_pending());

        ctx.begin(&message("7", "mara", "let's ship it", "product"));
        let target = ctx.pending().unwrap();
        assert_eq!(target.id, MessageId::new("7"));
        assert_eq!(target.author, "mara");
        assert_eq!(target.excerpt, "let's ship it");
        assert_eq!(target.pinned_segment, "product");
        assert_eq!(ctx.outgoing_target(), Some(MessageId::new("7")));
    }

    #[test]
    fn long_target_text_is_excerpted() {
        let mut ctx = ReplyContext::default();
        let long = "x".repeat(300);
        ctx.begin(&message("1", "devin", &long, "general"));
        let target = ctx.pending().unwrap();
        assert_eq!(target.excerpt.chars().count(), PREVIEW_CHARS + 3);
        assert!(target.excerpt.ends_with("..."));
    }

    #[test]
    fn reselecting_replaces_the_pending_target() {
        let mut ctx = ReplyContext::default();
        ctx.begin(&message("1", "mara", "first", "general"));
        ctx.begin(&message("2", "devin", "second", "product"));
        let target = ctx.pending().unwrap();
        assert_eq!(target.id, MessageId::new("2"));
        assert_eq!(target.pinned_segment, "product");
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut ctx = ReplyContext::default();
        ctx.begin(&message("1", "mara", "hello", "general"));
        assert!(ctx.cancel());
        assert!(!ctx.cancel());
        assert_eq!(ctx.outgoing_target(), None);
    }

    #[test]
    fn complete_returns_to_idle() {
        let mut ctx = ReplyContext::default();
        ctx.begin(&message("1", "mara", "hello", "general"));
        ctx.complete();
        assert!(!ctx.is_pending());
    }
}
