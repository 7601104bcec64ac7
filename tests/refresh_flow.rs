//! End-to-end refresh cycles against a scripted in-memory store: join,
//! poll, reply, post, and leave, checking the scroll and reply-pinning
//! contracts along the way.

use chrono::{TimeZone, Utc};

use kaiwa::model::{Message, MessageId, SegmentFilter};
use kaiwa::refresh::{RefreshController, RefreshKind, RefreshOutcome, ScrollAction};
use kaiwa::reply::ReplyContext;
use kaiwa::session::Session;
use kaiwa::store::{MessageStore, ScriptedStore, StoreError, StoreOp, StoreReply};
use kaiwa::viewport::ViewportMetrics;

fn message(id: &str, ts: i64, reply_to: Option<&str>, segment: &str) -> Message {
    Message {
        id: MessageId::new(id),
        author: "mara".to_string(),
        text: format!("message {id}"),
        timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        reply_to: reply_to.map(MessageId::new),
        segment: segment.to_string(),
        attachment: None,
        readers: Vec::new(),
    }
}

fn snapshot(messages: Vec<Message>) -> Result<StoreReply, StoreError> {
    Ok(StoreReply::Messages { messages })
}

fn reading_position() -> ViewportMetrics {
    ViewportMetrics {
        content_height: 4000.0,
        viewport_height: 700.0,
        scroll_offset: 500.0,
        row_count: 30,
    }
}

fn bottom_position() -> ViewportMetrics {
    ViewportMetrics {
        content_height: 4000.0,
        viewport_height: 700.0,
        scroll_offset: 3290.0,
        row_count: 30,
    }
}

#[test]
fn join_poll_post_and_leave_cycle() {
    let mut store = ScriptedStore::new();
    let mut session = Session::new();
    let mut controller = RefreshController::new();
    let mut reply = ReplyContext::default();

    // Join: first load forces the scroll to the end of the thread view.
    session.join("alpha", "sesame");
    let initial = controller.request_refresh(&mut store, &session, RefreshKind::Initial);
    store.complete(
        initial,
        snapshot(vec![
            message("1", 10, None, "general"),
            message("2", 20, Some("1"), "general"),
            message("3", 5, None, "general"),
        ]),
    );
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, reading_position());
    let view = match outcome {
        RefreshOutcome::Applied { view, scroll } => {
            assert_eq!(scroll, ScrollAction::ToEnd);
            view
        }
        other => panic!("unexpected outcome {other:?}"),
    };
    let order: Vec<_> = view.rows.iter().map(|r| r.message.id.as_str()).collect();
    assert_eq!(order, vec!["3", "1", "2"]);

    // Mid-scroll periodic poll leaves the reading position alone.
    let periodic = controller.request_refresh(&mut store, &session, RefreshKind::Periodic);
    store.complete(
        periodic,
        snapshot(vec![
            message("1", 10, None, "general"),
            message("2", 20, Some("1"), "general"),
            message("3", 5, None, "general"),
            message("4", 30, None, "general"),
        ]),
    );
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, reading_position());
    assert!(matches!(
        outcome,
        RefreshOutcome::Applied {
            scroll: ScrollAction::Preserve,
            ..
        }
    ));

    // Reply to a root, then drift the filter: the post stays pinned.
    let target = view.resolve(&MessageId::new("1")).unwrap().clone();
    reply.begin(&target);
    session.active_filter = SegmentFilter::Only("random".to_string());
    let post = store.submit(StoreOp::PostMessage {
        team: session.team().to_string(),
        key: session.key().to_string(),
        author: "you".to_string(),
        text: "on it".to_string(),
        reply_to: reply.outgoing_target(),
        segment: session.compose_segment(&reply),
        attachment: None,
    });
    match &store.submitted.last().unwrap().1 {
        StoreOp::PostMessage {
            reply_to, segment, ..
        } => {
            assert_eq!(reply_to, &Some(MessageId::new("1")));
            assert_eq!(segment, "general");
        }
        other => panic!("unexpected op {other:?}"),
    }

    // Ack arrives: the reply context resets and the follow-up refresh
    // forces the scroll even from the bottom-reading position.
    store.complete(post, Ok(StoreReply::Ack));
    assert!(store.poll().pop().unwrap().result.is_ok());
    reply.complete();
    assert!(!reply.is_pending());
    assert_eq!(session.compose_segment(&reply), "random");

    let after_post = controller.request_refresh(&mut store, &session, RefreshKind::AfterPost);
    store.complete(
        after_post,
        snapshot(vec![
            message("1", 10, None, "general"),
            message("5", 40, Some("1"), "general"),
        ]),
    );
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, reading_position());
    assert!(matches!(
        outcome,
        RefreshOutcome::Applied {
            scroll: ScrollAction::ToEnd,
            ..
        }
    ));

    // Leave with a poll still in flight: its late response is ignored.
    let in_flight = controller.request_refresh(&mut store, &session, RefreshKind::Periodic);
    session.leave();
    controller.reset();
    store.complete(in_flight, snapshot(vec![message("9", 90, None, "general")]));
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, bottom_position());
    assert_eq!(outcome, RefreshOutcome::Stale);
}

#[test]
fn auth_loss_mid_session_forces_a_leave() {
    let mut store = ScriptedStore::new();
    let mut session = Session::new();
    let mut controller = RefreshController::new();

    session.join("alpha", "stale-key");
    let request = controller.request_refresh(&mut store, &session, RefreshKind::Periodic);
    store.complete(request, Err(StoreError::AuthRequired));
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, bottom_position());
    assert_eq!(outcome, RefreshOutcome::AuthRequired);

    // The session layer reacts by leaving; later completions of anything
    // issued before the leave are stale.
    let stale = controller.request_refresh(&mut store, &session, RefreshKind::Periodic);
    session.leave();
    store.complete(stale, snapshot(vec![]));
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, bottom_position());
    assert_eq!(outcome, RefreshOutcome::Stale);
}

#[test]
fn failed_poll_keeps_the_previous_view() {
    let mut store = ScriptedStore::new();
    let mut session = Session::new();
    let mut controller = RefreshController::new();

    session.join("alpha", "");
    let first = controller.request_refresh(&mut store, &session, RefreshKind::Initial);
    store.complete(first, snapshot(vec![message("1", 10, None, "general")]));
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, bottom_position());
    assert!(matches!(outcome, RefreshOutcome::Applied { .. }));

    let flaky = controller.request_refresh(&mut store, &session, RefreshKind::Periodic);
    store.complete(
        flaky,
        Err(StoreError::Transport("connection reset by peer".to_string())),
    );
    let event = store.poll().pop().unwrap();
    let outcome =
        controller.handle_response(event.request, event.result, &session, bottom_position());
    // Failed means: surface it, keep rendering the stale view.
    match outcome {
        RefreshOutcome::Failed(err) => {
            assert!(err.to_string().contains("connection reset"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
