use std::collections::HashMap;

use tracing::{debug, warn};

use crate::session::Session;
use crate::store::{MessageStore, RequestId, StoreError, StoreOp, StoreReply};
use crate::thread_view::{build_thread_view, ThreadView};
use crate::viewport::{self, ViewportMetrics};

/// Why a refresh was requested; decides the scroll outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// First load after joining a team.
    Initial,
    /// Timer-driven poll, or the follow-up after a delete or mark-read.
    Periodic,
    /// Follow-up after the user's own post was acknowledged.
    AfterPost,
}

/// What the renderer should do with the scroll position after a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    ToEnd,
    Preserve,
}

/// Result of feeding one store completion through the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Replace the rendered list with `view` and apply `scroll`.
    Applied {
        view: ThreadView,
        scroll: ScrollAction,
    },
    /// Credentials were refused; the session layer must force a leave.
    AuthRequired,
    /// The cycle failed; surface the error and keep the stale render.
    Failed(StoreError),
    /// Response from a dead session or an unknown request; ignore it.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct PendingCycle {
    kind: RefreshKind,
    generation: u64,
}

/// Orchestrates refresh cycles. Cycles may overlap freely; the last
/// response to be applied wins, but responses that outlive their session
/// generation are dropped before they can touch the display.
#[derive(Debug, Default)]
pub struct RefreshController {
    pending: HashMap<RequestId, PendingCycle>,
    loaded_once: bool,
}

impl RefreshController {
    pub fn new() -> Self {
        RefreshController::default()
    }

    /// Issues a `get_messages` request for the session's team and filter
    /// and remembers it for correlation.
    pub fn request_refresh(
        &mut self,
        store: &mut dyn MessageStore,
        session: &Session,
        kind: RefreshKind,
    ) -> RequestId {
        let request = store.submit(StoreOp::GetMessages {
            team: session.team().to_string(),
            key: session.key().to_string(),
            segment: session.active_filter.clone(),
        });
        debug!(?request, ?kind, "refresh requested");
        self.pending.insert(
            request,
            PendingCycle {
                kind,
                generation: session.generation(),
            },
        );
        request
    }

    /// Whether `request` belongs to a refresh cycle (as opposed to some
    /// other operation the caller issued itself).
    pub fn owns(&self, request: RequestId) -> bool {
        self.pending.contains_key(&request)
    }

    /// Completes one cycle. `viewport` must describe the list as rendered
    /// right now, before any mutation, so the at-end decision predates the
    /// rebuild.
    pub fn handle_response(
        &mut self,
        request: RequestId,
        result: Result<StoreReply, StoreError>,
        session: &Session,
        viewport: ViewportMetrics,
    ) -> RefreshOutcome {
        let Some(cycle) = self.pending.remove(&request) else {
            return RefreshOutcome::Stale;
        };
        if cycle.generation != session.generation() {
            debug!(?request, "dropping refresh response from a previous session");
            return RefreshOutcome::Stale;
        }

        let messages = match result {
            Ok(StoreReply::Messages { messages }) => messages,
            Ok(other) => {
                warn!(?request, ?other, "refresh reply had an unexpected shape");
                return RefreshOutcome::Failed(StoreError::Transport(
                    "unexpected reply to get_messages".to_string(),
                ));
            }
            Err(StoreError::AuthRequired) => return RefreshOutcome::AuthRequired,
            Err(err) => return RefreshOutcome::Failed(err),
        };

        let was_at_end = viewport::is_at_end(viewport);
        let view = build_thread_view(&messages);
        let forced = !self.loaded_once
            || matches!(cycle.kind, RefreshKind::Initial | RefreshKind::AfterPost);
        let scroll = if forced || was_at_end {
            ScrollAction::ToEnd
        } else {
            ScrollAction::Preserve
        };
        self.loaded_once = true;
        RefreshOutcome::Applied { view, scroll }
    }

    /// Forgets all in-flight cycles and the first-load marker. Called when
    /// the session ends; anything still outstanding becomes `Stale`.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.loaded_once = false;
    }
}
