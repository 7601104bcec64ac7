use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AttachmentRef, Message, MessageId, SegmentFilter, TeamInfo};

/// Correlation id for one in-flight request. Issued by the store, echoed
/// back on the matching event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Named operations the remote store understands. One request, one reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StoreOp {
    GetTeams,
    CheckTeamAuth {
        team: String,
    },
    VerifyTeamAccess {
        team: String,
        key: String,
    },
    CreateTeam {
        team_name: String,
        team_key: String,
    },
    GetMessages {
        team: String,
        key: String,
        segment: SegmentFilter,
    },
    PostMessage {
        team: String,
        key: String,
        author: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
        segment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<AttachmentRef>,
    },
    DeleteMessage {
        team: String,
        key: String,
        message_id: MessageId,
    },
    MarkAsRead {
        team: String,
        key: String,
        message_id: MessageId,
        reader_name: String,
    },
    GetSegments {
        team: String,
        key: String,
    },
    CreateSegment {
        team: String,
        key: String,
        segment_name: String,
    },
    DeleteSegment {
        team: String,
        key: String,
        segment_name: String,
    },
}

/// Successful reply payloads, mirroring the operations above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StoreReply {
    Teams { teams: Vec<TeamInfo> },
    TeamAuth { is_protected: bool },
    Access { authorized: bool },
    Messages { messages: Vec<Message> },
    Segments { segments: Vec<String> },
    Ack,
}

/// Failure taxonomy for store interactions. Every failure is terminal for
/// its cycle; nothing here retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store no longer accepts this session's credentials for reads;
    /// the session layer must force a logout.
    #[error("team credentials are no longer valid")]
    AuthRequired,
    /// Transport or parse failure; the current render stays untouched.
    #[error("request failed: {0}")]
    Transport(String),
    /// The store processed the request and said no.
    #[error("{0}")]
    Rejected(String),
}

/// Completion of one earlier `submit`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub request: RequestId,
    pub result: Result<StoreReply, StoreError>,
}

/// Abstract asynchronous channel to the remote store. `submit` never
/// blocks; completions surface later through `poll`, drained by the frame
/// loop. A request may never complete (there are no timeouts).
pub trait MessageStore {
    fn submit(&mut self, op: StoreOp) -> RequestId;
    fn poll(&mut self) -> Vec<StoreEvent>;
}

/// One request as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub seq: u64,
    #[serde(flatten)]
    pub op: StoreOp,
}

/// One reply as it crosses the wire: `status` is `ok`, `error`, or
/// `auth_required`, in the store's original idiom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub seq: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<StoreReply>,
}

impl WireResponse {
    pub fn ok(seq: u64, reply: StoreReply) -> Self {
        WireResponse {
            seq,
            status: "ok".to_string(),
            message: None,
            reply: Some(reply),
        }
    }

    pub fn error(seq: u64, message: impl Into<String>) -> Self {
        WireResponse {
            seq,
            status: "error".to_string(),
            message: Some(message.into()),
            reply: None,
        }
    }

    pub fn auth_required(seq: u64) -> Self {
        WireResponse {
            seq,
            status: "auth_required".to_string(),
            message: None,
            reply: None,
        }
    }

    pub fn into_result(self) -> Result<StoreReply, StoreError> {
        match self.status.as_str() {
            "ok" => match self.reply {
                Some(reply) => Ok(reply),
                None => Ok(StoreReply::Ack),
            },
            "auth_required" => Err(StoreError::AuthRequired),
            "error" => Err(StoreError::Rejected(
                self.message
                    .unwrap_or_else(|| "operation rejected".to_string()),
            )),
            other => Err(StoreError::Transport(format!(
                "unrecognized reply status {other:?}"
            ))),
        }
    }
}

/// In-memory store double: records what was submitted and hands back
/// whatever completions the test scripted.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    next_seq: u64,
    pub submitted: Vec<(RequestId, StoreOp)>,
    queued: Vec<StoreEvent>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        ScriptedStore::default()
    }

    pub fn complete(&mut self, request: RequestId, result: Result<StoreReply, StoreError>) {
        self.queued.push(StoreEvent { request, result });
    }

    pub fn last_submitted(&self) -> Option<&(RequestId, StoreOp)> {
        self.submitted.last()
    }
}

impl MessageStore for ScriptedStore {
    fn submit(&mut self, op: StoreOp) -> RequestId {
        self.next_seq += 1;
        let id = RequestId(self.next_seq);
        self.submitted.push((id, op));
        id
    }

    fn poll(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.queued)
    }
}
