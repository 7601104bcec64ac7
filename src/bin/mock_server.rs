use std::{
    net::TcpListener,
    sync::{Arc, Mutex},
    thread,
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tungstenite::{accept, Message as WsMessage};

use kaiwa::config::{server_db_path, server_listen_addr};
use kaiwa::model::{AttachmentRef, Message, MessageId, SegmentFilter, TeamInfo};
use kaiwa::session::DEFAULT_SEGMENT;
use kaiwa::store::{StoreOp, StoreReply, WireRequest, WireResponse};

fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teams (
            name TEXT PRIMARY KEY,
            key TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team TEXT NOT NULL,
            author TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            reply_to TEXT,
            segment TEXT NOT NULL,
            attachment_name TEXT,
            attachment_kind TEXT,
            attachment_locator TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS readers (
            message_id INTEGER NOT NULL,
            reader TEXT NOT NULL,
            UNIQUE(message_id, reader)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS segments (
            team TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE(team, name)
        )",
        [],
    )?;
    Ok(())
}

fn seed_if_empty(conn: &Connection) -> Result<(), rusqlite::Error> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM teams", [], |row| row.get(0))?;
    if count == 0 {
        conn.execute("INSERT INTO teams (name, key) VALUES ('lobby', '')", [])?;
        for segment in [DEFAULT_SEGMENT, "random"] {
            conn.execute(
                "INSERT INTO segments (team, name) VALUES ('lobby', ?1)",
                params![segment],
            )?;
        }
    }
    Ok(())
}

fn team_key(conn: &Connection, team: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT key FROM teams WHERE name = ?1",
        params![team],
        |row| row.get(0),
    )
    .optional()
}

enum Access {
    Granted,
    UnknownTeam,
    BadKey,
}

fn check_access(conn: &Connection, team: &str, key: &str) -> Result<Access, rusqlite::Error> {
    match team_key(conn, team)? {
        None => Ok(Access::UnknownTeam),
        Some(expected) if expected.is_empty() || expected == key => Ok(Access::Granted),
        Some(_) => Ok(Access::BadKey),
    }
}

fn load_messages(
    conn: &Connection,
    team: &str,
    segment: &SegmentFilter,
) -> Result<Vec<Message>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, author, body, sent_at, reply_to, segment,
                attachment_name, attachment_kind, attachment_locator
         FROM messages WHERE team = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![team], |row| {
        let id: i64 = row.get(0)?;
        let sent_at: String = row.get(3)?;
        let attachment_name: Option<String> = row.get(6)?;
        let attachment_kind: Option<String> = row.get(7)?;
        let attachment_locator: Option<String> = row.get(8)?;
        Ok((
            id,
            Message {
                id: MessageId::new(id.to_string()),
                author: row.get(1)?,
                text: row.get(2)?,
                timestamp: parse_timestamp(&sent_at),
                reply_to: row.get::<_, Option<String>>(4)?.map(MessageId::new),
                segment: row.get(5)?,
                attachment: attachment_name.map(|name| AttachmentRef {
                    name,
                    kind: attachment_kind.unwrap_or_default(),
                    locator: attachment_locator.unwrap_or_default(),
                }),
                readers: Vec::new(),
            },
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (id, mut message) = row?;
        if !segment.matches(&message.segment) {
            continue;
        }
        message.readers = load_readers(conn, id)?;
        messages.push(message);
    }
    Ok(messages)
}

fn load_readers(conn: &Connection, message_id: i64) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT reader FROM readers WHERE message_id = ?1 ORDER BY rowid ASC")?;
    let rows = stmt.query_map(params![message_id], |row| row.get(0))?;
    rows.collect()
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(err) => {
            warn!(%raw, %err, "stored timestamp is unreadable; substituting now");
            Utc::now()
        }
    }
}

fn handle_request(conn: &Connection, request: WireRequest) -> WireResponse {
    let seq = request.seq;
    match try_handle(conn, request) {
        Ok(response) => response,
        Err(err) => {
            error!(%err, seq, "storage error");
            WireResponse::error(seq, "storage error")
        }
    }
}

fn try_handle(conn: &Connection, request: WireRequest) -> Result<WireResponse, rusqlite::Error> {
    let seq = request.seq;
    let response = match request.op {
        StoreOp::GetTeams => {
            let mut stmt = conn.prepare("SELECT name, key FROM teams ORDER BY name ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(TeamInfo {
                    name: row.get(0)?,
                    is_protected: !row.get::<_, String>(1)?.is_empty(),
                })
            })?;
            let teams = rows.collect::<Result<Vec<_>, _>>()?;
            WireResponse::ok(seq, StoreReply::Teams { teams })
        }
        StoreOp::CheckTeamAuth { team } => match team_key(conn, &team)? {
            Some(key) => WireResponse::ok(
                seq,
                StoreReply::TeamAuth {
                    is_protected: !key.is_empty(),
                },
            ),
            None => WireResponse::error(seq, "unknown team"),
        },
        StoreOp::VerifyTeamAccess { team, key } => match team_key(conn, &team)? {
            Some(expected) => WireResponse::ok(
                seq,
                StoreReply::Access {
                    authorized: expected.is_empty() || expected == key,
                },
            ),
            None => WireResponse::error(seq, "unknown team"),
        },
        StoreOp::CreateTeam { team_name, team_key } => {
            let name = team_name.trim();
            if name.is_empty() {
                WireResponse::error(seq, "team name cannot be empty")
            } else if self::team_key(conn, name)?.is_some() {
                WireResponse::error(seq, "team already exists")
            } else {
                conn.execute(
                    "INSERT INTO teams (name, key) VALUES (?1, ?2)",
                    params![name, team_key],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO segments (team, name) VALUES (?1, ?2)",
                    params![name, DEFAULT_SEGMENT],
                )?;
                WireResponse::ok(seq, StoreReply::Ack)
            }
        }
        StoreOp::GetMessages { team, key, segment } => match check_access(conn, &team, &key)? {
            Access::Granted => WireResponse::ok(
                seq,
                StoreReply::Messages {
                    messages: load_messages(conn, &team, &segment)?,
                },
            ),
            Access::BadKey => WireResponse::auth_required(seq),
            Access::UnknownTeam => WireResponse::error(seq, "unknown team"),
        },
        StoreOp::PostMessage {
            team,
            key,
            author,
            text,
            reply_to,
            segment,
            attachment,
        } => match check_access(conn, &team, &key)? {
            Access::Granted => {
                if author.trim().is_empty() || text.trim().is_empty() {
                    WireResponse::error(seq, "author and text are required")
                } else {
                    let (name, kind, locator) = match &attachment {
                        Some(a) => (
                            Some(a.name.as_str()),
                            Some(a.kind.as_str()),
                            Some(a.locator.as_str()),
                        ),
                        None => (None, None, None),
                    };
                    conn.execute(
                        "INSERT INTO messages
                            (team, author, body, sent_at, reply_to, segment,
                             attachment_name, attachment_kind, attachment_locator)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            team,
                            author,
                            text,
                            Utc::now().to_rfc3339(),
                            reply_to.as_ref().map(MessageId::as_str),
                            segment,
                            name,
                            kind,
                            locator
                        ],
                    )?;
                    conn.execute(
                        "INSERT OR IGNORE INTO segments (team, name) VALUES (?1, ?2)",
                        params![team, segment],
                    )?;
                    WireResponse::ok(seq, StoreReply::Ack)
                }
            }
            _ => WireResponse::error(seq, "invalid team key"),
        },
        StoreOp::DeleteMessage {
            team,
            key,
            message_id,
        } => match check_access(conn, &team, &key)? {
            Access::Granted => {
                let removed = conn.execute(
                    "DELETE FROM messages WHERE team = ?1 AND id = ?2",
                    params![team, message_id.as_str()],
                )?;
                if removed == 0 {
                    WireResponse::error(seq, "no such message")
                } else {
                    conn.execute(
                        "DELETE FROM readers WHERE message_id = ?1",
                        params![message_id.as_str()],
                    )?;
                    WireResponse::ok(seq, StoreReply::Ack)
                }
            }
            _ => WireResponse::error(seq, "invalid team key"),
        },
        StoreOp::MarkAsRead {
            team,
            key,
            message_id,
            reader_name,
        } => match check_access(conn, &team, &key)? {
            Access::Granted => {
                if reader_name.trim().is_empty() {
                    WireResponse::error(seq, "reader name is required")
                } else {
                    let exists: Option<i64> = conn
                        .query_row(
                            "SELECT id FROM messages WHERE team = ?1 AND id = ?2",
                            params![team, message_id.as_str()],
                            |row| row.get(0),
                        )
                        .optional()?;
                    match exists {
                        Some(id) => {
                            conn.execute(
                                "INSERT OR IGNORE INTO readers (message_id, reader)
                                 VALUES (?1, ?2)",
                                params![id, reader_name.trim()],
                            )?;
                            WireResponse::ok(seq, StoreReply::Ack)
                        }
                        None => WireResponse::error(seq, "no such message"),
                    }
                }
            }
            _ => WireResponse::error(seq, "invalid team key"),
        },
        StoreOp::GetSegments { team, key } => match check_access(conn, &team, &key)? {
            Access::Granted => {
                let mut stmt =
                    conn.prepare("SELECT name FROM segments WHERE team = ?1 ORDER BY name ASC")?;
                let rows = stmt.query_map(params![team], |row| row.get(0))?;
                WireResponse::ok(
                    seq,
                    StoreReply::Segments {
                        segments: rows.collect::<Result<Vec<_>, _>>()?,
                    },
                )
            }
            _ => WireResponse::error(seq, "invalid team key"),
        },
        StoreOp::CreateSegment {
            team,
            key,
            segment_name,
        } => match check_access(conn, &team, &key)? {
            Access::Granted => {
                let name = segment_name.trim();
                if name.is_empty() {
                    WireResponse::error(seq, "segment name cannot be empty")
                } else {
                    conn.execute(
                        "INSERT OR IGNORE INTO segments (team, name) VALUES (?1, ?2)",
                        params![team, name],
                    )?;
                    WireResponse::ok(seq, StoreReply::Ack)
                }
            }
            _ => WireResponse::error(seq, "invalid team key"),
        },
        StoreOp::DeleteSegment {
            team,
            key,
            segment_name,
        } => match check_access(conn, &team, &key)? {
            Access::Granted => {
                conn.execute(
                    "DELETE FROM segments WHERE team = ?1 AND name = ?2",
                    params![team, segment_name],
                )?;
                WireResponse::ok(seq, StoreReply::Ack)
            }
            _ => WireResponse::error(seq, "invalid team key"),
        },
    };
    Ok(response)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let db_path = server_db_path();
    let conn = Connection::open(&db_path)?;
    ensure_schema(&conn)?;
    seed_if_empty(&conn)?;
    let db = Arc::new(Mutex::new(conn));

    let addr = server_listen_addr();
    let listener = TcpListener::bind(&addr)?;
    info!(%addr, %db_path, "store server listening");

    for stream in listener.incoming() {
        let stream = stream?;
        let mut socket = match accept(stream) {
            Ok(socket) => socket,
            Err(err) => {
                warn!(%err, "handshake failed");
                continue;
            }
        };
        let db = Arc::clone(&db);

        thread::spawn(move || loop {
            let text = match socket.read() {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => return,
                Ok(_) => continue,
                Err(err) => {
                    warn!(%err, "connection dropped");
                    return;
                }
            };
            let response = match serde_json::from_str::<WireRequest>(&text) {
                Ok(request) => {
                    let conn = match db.lock() {
                        Ok(conn) => conn,
                        Err(_) => return,
                    };
                    handle_request(&conn, request)
                }
                Err(err) => {
                    warn!(%err, "undecodable request");
                    WireResponse::error(0, "unreadable request")
                }
            };
            match serde_json::to_string(&response) {
                Ok(text) => {
                    if socket.send(WsMessage::Text(text)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    error!(%err, "failed to encode response");
                    return;
                }
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use kaiwa::model::ALL_SEGMENT;

    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("memory db");
        ensure_schema(&conn).expect("schema");
        seed_if_empty(&conn).expect("seed");
        conn
    }

    fn post(conn: &Connection, seq: u64, text: &str, reply_to: Option<&str>) -> WireResponse {
        handle_request(
            conn,
            WireRequest {
                seq,
                op: StoreOp::PostMessage {
                    team: "lobby".to_string(),
                    key: String::new(),
                    author: "mara".to_string(),
                    text: text.to_string(),
                    reply_to: reply_to.map(MessageId::new),
                    segment: DEFAULT_SEGMENT.to_string(),
                    attachment: None,
                },
            },
        )
    }

    fn get_messages(conn: &Connection, seq: u64, segment: SegmentFilter) -> Vec<Message> {
        let response = handle_request(
            conn,
            WireRequest {
                seq,
                op: StoreOp::GetMessages {
                    team: "lobby".to_string(),
                    key: String::new(),
                    segment,
                },
            },
        );
        match response.into_result() {
            Ok(StoreReply::Messages { messages }) => messages,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn posted_messages_come_back_with_reply_links() {
        let conn = test_db();
        assert_eq!(post(&conn, 1, "first", None).status, "ok");
        let first_id = get_messages(&conn, 2, SegmentFilter::All)[0].id.clone();
        assert_eq!(post(&conn, 3, "reply", Some(first_id.as_str())).status, "ok");

        let messages = get_messages(&conn, 4, SegmentFilter::All);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].reply_to, Some(first_id));
    }

    #[test]
    fn segment_filter_narrows_the_snapshot() {
        let conn = test_db();
        post(&conn, 1, "general note", None);
        handle_request(
            &conn,
            WireRequest {
                seq: 2,
                op: StoreOp::PostMessage {
                    team: "lobby".to_string(),
                    key: String::new(),
                    author: "devin".to_string(),
                    text: "design note".to_string(),
                    reply_to: None,
                    segment: "design".to_string(),
                    attachment: None,
                },
            },
        );
        assert_eq!(get_messages(&conn, 3, SegmentFilter::All).len(), 2);
        let design = get_messages(&conn, 4, SegmentFilter::Only("design".to_string()));
        assert_eq!(design.len(), 1);
        assert_eq!(design[0].text, "design note");
        // Posting into a new segment registers it.
        let response = handle_request(
            &conn,
            WireRequest {
                seq: 5,
                op: StoreOp::GetSegments {
                    team: "lobby".to_string(),
                    key: String::new(),
                },
            },
        );
        match response.into_result() {
            Ok(StoreReply::Segments { segments }) => {
                assert!(segments.contains(&"design".to_string()));
                assert!(!segments.contains(&ALL_SEGMENT.to_string()));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn duplicate_readers_are_suppressed() {
        let conn = test_db();
        post(&conn, 1, "hello", None);
        let id = get_messages(&conn, 2, SegmentFilter::All)[0].id.clone();
        for seq in 3..5 {
            let response = handle_request(
                &conn,
                WireRequest {
                    seq,
                    op: StoreOp::MarkAsRead {
                        team: "lobby".to_string(),
                        key: String::new(),
                        message_id: id.clone(),
                        reader_name: "devin".to_string(),
                    },
                },
            );
            assert_eq!(response.status, "ok");
        }
        let messages = get_messages(&conn, 5, SegmentFilter::All);
        assert_eq!(messages[0].readers, vec!["devin".to_string()]);
    }

    #[test]
    fn segments_can_be_created_and_deleted() {
        let conn = test_db();
        for (seq, op) in [
            (
                1,
                StoreOp::CreateSegment {
                    team: "lobby".to_string(),
                    key: String::new(),
                    segment_name: "design".to_string(),
                },
            ),
            (
                2,
                StoreOp::DeleteSegment {
                    team: "lobby".to_string(),
                    key: String::new(),
                    segment_name: "random".to_string(),
                },
            ),
        ] {
            let response = handle_request(&conn, WireRequest { seq, op });
            assert_eq!(response.status, "ok");
        }
        let response = handle_request(
            &conn,
            WireRequest {
                seq: 3,
                op: StoreOp::GetSegments {
                    team: "lobby".to_string(),
                    key: String::new(),
                },
            },
        );
        match response.into_result() {
            Ok(StoreReply::Segments { segments }) => {
                assert_eq!(segments, vec!["design".to_string(), "general".to_string()]);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn wrong_key_reads_get_auth_required_and_writes_are_rejected() {
        let conn = test_db();
        handle_request(
            &conn,
            WireRequest {
                seq: 1,
                op: StoreOp::CreateTeam {
                    team_name: "secret".to_string(),
                    team_key: "sesame".to_string(),
                },
            },
        );
        let read = handle_request(
            &conn,
            WireRequest {
                seq: 2,
                op: StoreOp::GetMessages {
                    team: "secret".to_string(),
                    key: "wrong".to_string(),
                    segment: SegmentFilter::All,
                },
            },
        );
        assert_eq!(read.status, "auth_required");

        let write = handle_request(
            &conn,
            WireRequest {
                seq: 3,
                op: StoreOp::PostMessage {
                    team: "secret".to_string(),
                    key: "wrong".to_string(),
                    author: "eve".to_string(),
                    text: "hi".to_string(),
                    reply_to: None,
                    segment: DEFAULT_SEGMENT.to_string(),
                    attachment: None,
                },
            },
        );
        assert_eq!(write.status, "error");
    }

    #[test]
    fn deleting_a_message_leaves_its_replies_dangling() {
        let conn = test_db();
        post(&conn, 1, "root", None);
        let root_id = get_messages(&conn, 2, SegmentFilter::All)[0].id.clone();
        post(&conn, 3, "reply", Some(root_id.as_str()));

        let response = handle_request(
            &conn,
            WireRequest {
                seq: 4,
                op: StoreOp::DeleteMessage {
                    team: "lobby".to_string(),
                    key: String::new(),
                    message_id: root_id.clone(),
                },
            },
        );
        assert_eq!(response.status, "ok");

        let messages = get_messages(&conn, 5, SegmentFilter::All);
        assert_eq!(messages.len(), 1);
        // The reply still points at the deleted root; clients render it
        // as a root-like item.
        assert_eq!(messages[0].reply_to, Some(root_id));
    }
}
