//! Core of the kaiwa team chat client: thread reconstruction from polled
//! snapshots, scroll restoration, reply tracking, and the remote store
//! contract. Everything here is UI-free and exercised by the binaries in
//! `src/main.rs` and `src/bin/mock_server.rs`.

pub mod config;
pub mod model;
pub mod poll;
pub mod refresh;
pub mod reply;
pub mod session;
pub mod store;
pub mod thread_view;
pub mod transport;
pub mod viewport;
