use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message as WsMessage, WebSocket};
use url::Url;

use crate::store::{
    MessageStore, RequestId, StoreError, StoreEvent, StoreOp, WireRequest, WireResponse,
};

/// `MessageStore` over a websocket. A worker thread owns the socket;
/// requests go out over a channel, replies come back over another, and the
/// frame loop drains them with `poll`. There are no per-request timeouts:
/// a request already in flight when the connection dies never completes,
/// but anything submitted after the worker has exited completes
/// immediately as a transport failure.
pub struct RemoteStore {
    requests: mpsc::Sender<WireRequest>,
    replies: mpsc::Receiver<StoreEvent>,
    reply_tx: mpsc::Sender<StoreEvent>,
    next_seq: u64,
}

impl RemoteStore {
    pub fn connect(server: &Url) -> Result<Self, StoreError> {
        let (mut socket, _response) = tungstenite::connect(server.as_str())
            .map_err(|err| StoreError::Transport(format!("connect {server}: {err}")))?;
        if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream
                .set_nonblocking(true)
                .map_err(|err| StoreError::Transport(format!("set_nonblocking: {err}")))?;
        }
        debug!(%server, "connected to message store");

        let (request_tx, request_rx) = mpsc::channel::<WireRequest>();
        let (reply_tx, reply_rx) = mpsc::channel::<StoreEvent>();
        let worker_tx = reply_tx.clone();
        thread::spawn(move || socket_worker(socket, request_rx, worker_tx));

        Ok(RemoteStore {
            requests: request_tx,
            replies: reply_rx,
            reply_tx,
            next_seq: 0,
        })
    }
}

impl MessageStore for RemoteStore {
    fn submit(&mut self, op: StoreOp) -> RequestId {
        self.next_seq += 1;
        let seq = self.next_seq;
        if self.requests.send(WireRequest { seq, op }).is_err() {
            // Worker is gone; complete the request as failed so the
            // disconnect surfaces instead of leaving the view silently
            // stale.
            warn!(seq, "message store connection is down");
            fail(&self.reply_tx, seq, "connection closed".to_string());
        }
        RequestId(seq)
    }

    fn poll(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.replies.try_recv() {
            events.push(event);
        }
        events
    }
}

fn socket_worker(
    mut socket: WebSocket<MaybeTlsStream<TcpStream>>,
    requests: mpsc::Receiver<WireRequest>,
    replies: mpsc::Sender<StoreEvent>,
) {
    loop {
        loop {
            match requests.try_recv() {
                Ok(request) => {
                    let seq = request.seq;
                    let text = match serde_json::to_string(&request) {
                        Ok(text) => text,
                        Err(err) => {
                            fail(&replies, seq, format!("encode request: {err}"));
                            continue;
                        }
                    };
                    if let Err(err) = socket.send(WsMessage::Text(text)) {
                        fail(&replies, seq, format!("send request: {err}"));
                        warn!(%err, "websocket send failed; closing worker");
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                // Owner dropped the store: session teardown.
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match socket.read() {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<WireResponse>(&text) {
                Ok(response) => {
                    let event = StoreEvent {
                        request: RequestId(response.seq),
                        result: response.into_result(),
                    };
                    if replies.send(event).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    // No seq to correlate with; the request it answered
                    // will hang, which the contract tolerates.
                    warn!(%err, "undecodable message from store");
                }
            },
            Ok(WsMessage::Close(_)) => {
                warn!("message store closed the connection");
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err)) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => {
                warn!(%err, "websocket read failed; closing worker");
                return;
            }
        }

        thread::sleep(Duration::from_millis(8));
    }
}

fn fail(replies: &mpsc::Sender<StoreEvent>, seq: u64, message: String) {
    let _ = replies.send(StoreEvent {
        request: RequestId(seq),
        result: Err(StoreError::Transport(message)),
    });
}
