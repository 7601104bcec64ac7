use crate::model::SegmentFilter;
use crate::reply::ReplyContext;

/// Fallback bucket for posts made while the "all" filter is active.
pub const DEFAULT_SEGMENT: &str = "general";

/// Current team membership, credentials, and display filter, with defined
/// reset points instead of ambient globals. The generation counter bumps
/// on every join and leave so responses issued against a previous session
/// can be recognized and dropped.
#[derive(Debug, Clone, Default)]
pub struct Session {
    team: String,
    key: String,
    pub active_filter: SegmentFilter,
    generation: u64,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn join(&mut self, team: impl Into<String>, key: impl Into<String>) {
        self.team = team.into();
        self.key = key.into();
        self.active_filter = SegmentFilter::All;
        self.generation += 1;
    }

    pub fn leave(&mut self) {
        self.team.clear();
        self.key.clear();
        self.active_filter = SegmentFilter::All;
        self.generation += 1;
    }

    pub fn is_joined(&self) -> bool {
        !self.team.is_empty()
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Segment an outgoing post should carry: the pinned segment while a
    /// reply is pending, otherwise the active filter (or the default bucket
    /// when viewing everything).
    pub fn compose_segment(&self, reply: &ReplyContext) -> String {
        if let Some(target) = reply.pending() {
            return target.pinned_segment.clone();
        }
        match &self.active_filter {
            SegmentFilter::All => DEFAULT_SEGMENT.to_string(),
            SegmentFilter::Only(name) => name.clone(),
        }
    }

    /// Segment name the selector should display: locked to the pinned
    /// segment while a reply is pending.
    pub fn displayed_segment(&self, reply: &ReplyContext) -> String {
        match reply.pending() {
            Some(target) => target.pinned_segment.clone(),
            None => self.active_filter.wire_value().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::{Message, MessageId};

    fn target(segment: &str) -> Message {
        Message {
            id: MessageId::new("42"),
            author: "mara".to_string(),
            text: "pinned".to_string(),
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            reply_to: None,
            segment: segment.to_string(),
            attachment: None,
            readers: Vec::new(),
        }
    }

    #[test]
    fn join_and_leave_bump_the_generation_and_reset_the_filter() {
        let mut session = Session::new();
        let g0 = session.generation();
        session.join("alpha", "sesame");
        assert!(session.is_joined());
        assert_eq!(session.team(), "alpha");
        assert!(session.generation() > g0);

        session.active_filter = SegmentFilter::Only("design".to_string());
        let g1 = session.generation();
        session.leave();
        assert!(!session.is_joined());
        assert_eq!(session.active_filter, SegmentFilter::All);
        assert!(session.generation() > g1);
    }

    #[test]
    fn pinned_segment_wins_over_the_active_filter() {
        let mut session = Session::new();
        session.join("alpha", "");
        session.active_filter = SegmentFilter::Only("x".to_string());

        let mut reply = ReplyContext::default();
        reply.begin(&target("x"));

        // Filter changes while the reply is pending; the post stays pinned.
        session.active_filter = SegmentFilter::Only("y".to_string());
        assert_eq!(session.compose_segment(&reply), "x");
        assert_eq!(session.displayed_segment(&reply), "x");

        reply.cancel();
        assert_eq!(session.compose_segment(&reply), "y");
        assert_eq!(session.displayed_segment(&reply), "y");
    }

    #[test]
    fn all_filter_falls_back_to_the_default_bucket() {
        let mut session = Session::new();
        session.join("alpha", "");
        let reply = ReplyContext::default();
        assert_eq!(session.compose_segment(&reply), DEFAULT_SEGMENT);
    }
}
