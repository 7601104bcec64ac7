use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::model::{Message, MessageId};

/// One display row: a root message or a reply indented under its thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRow {
    pub message: Message,
    pub is_reply: bool,
}

/// Ordered, reply-aware rendition of one snapshot, plus an id lookup so
/// renderers can quote `reply_to` targets without re-scanning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadView {
    pub rows: Vec<ThreadRow>,
    pub by_id: HashMap<MessageId, Message>,
}

impl ThreadView {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn resolve(&self, id: &MessageId) -> Option<&Message> {
        self.by_id.get(id)
    }
}

/// Rebuilds the threaded view from a flat snapshot.
///
/// Roots (no `reply_to`, or a `reply_to` that points outside the snapshot)
/// come out oldest-first; each root is followed by every message reachable
/// through the reply relation, flattened and sorted oldest-first. Traversal
/// is guarded by a visited set, so reply cycles terminate; messages only
/// reachable through a cycle are appended afterwards as their own roots so
/// every input message appears exactly once. Ties at equal timestamps keep
/// their snapshot order.
pub fn build_thread_view(snapshot: &[Message]) -> ThreadView {
    let mut by_id: HashMap<MessageId, Message> = HashMap::with_capacity(snapshot.len());
    for message in snapshot {
        by_id.insert(message.id.clone(), message.clone());
    }

    let mut ordered: Vec<&Message> = snapshot.iter().collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    // Replies grouped under their target, already oldest-first.
    let mut replies: HashMap<&MessageId, Vec<&Message>> = HashMap::new();
    for &message in &ordered {
        if let Some(target) = &message.reply_to {
            if by_id.contains_key(target) {
                replies.entry(target).or_default().push(message);
            }
        }
    }

    let mut rows = Vec::with_capacity(snapshot.len());
    let mut visited: HashSet<&MessageId> = HashSet::with_capacity(snapshot.len());

    for &message in &ordered {
        let is_root = match &message.reply_to {
            None => true,
            Some(target) => !by_id.contains_key(target),
        };
        if is_root && visited.insert(&message.id) {
            emit_thread(message, &replies, &mut visited, &mut rows);
        }
    }

    // Anything left is only reachable through a reply cycle. Survive it:
    // promote the oldest unvisited message and flatten from there.
    for &message in &ordered {
        if visited.insert(&message.id) {
            warn!(id = %message.id, "message reachable only through a reply cycle");
            emit_thread(message, &replies, &mut visited, &mut rows);
        }
    }

    ThreadView { rows, by_id }
}

fn emit_thread<'a>(
    root: &'a Message,
    replies: &HashMap<&'a MessageId, Vec<&'a Message>>,
    visited: &mut HashSet<&'a MessageId>,
    rows: &mut Vec<ThreadRow>,
) {
    rows.push(ThreadRow {
        message: root.clone(),
        is_reply: false,
    });
    let mut thread: Vec<&Message> = Vec::new();
    let mut stack = vec![&root.id];
    while let Some(id) = stack.pop() {
        for &reply in replies.get(id).into_iter().flatten() {
            if visited.insert(&reply.id) {
                thread.push(reply);
                stack.push(&reply.id);
            }
        }
    }
    thread.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    rows.extend(thread.into_iter().map(|message| ThreadRow {
        message: message.clone(),
        is_reply: true,
    }));
}
