//! # Teacher Voice Backend
//!
//! Realtime voice bridge for the teacher-support app: each client opens one
//! WebSocket session, the bridge opens one live connection to the speech
//! backend, primes it with the teacher's profile, timetable, and recent
//! reflections, and then relays audio and text both ways until either side
//! hangs up.
//!
//! ## Application Architecture:
//! - **config**: Configuration management (TOML files + environment variables)
//! - **error**: Error types shared by HTTP handlers, pipelines, and the client
//! - **state**: Shared application state, metrics, and the session registry
//! - **protocol**: JSON envelopes of the client ↔ bridge speak channel
//! - **context**: Teacher context types and system instruction assembly
//! - **storage**: Context reads from the main application (HTTP or in-memory)
//! - **live**: Backend live-session connection and its wire protocol
//! - **session**: Server-side session phases, registry, and limits
//! - **websocket**: The `/ws/speak` bridge actor
//! - **audio**: Codec, device seams, capture and playback pipelines
//! - **client**: Native client state machine, controller, and socket pump
//! - **health / handlers / middleware**: HTTP surface around the bridge
//!
//! The library is shared by two binaries: the server (`main.rs`) and the
//! terminal client (`src/bin/speak_client.rs`).

pub mod audio;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod health;
pub mod live;
pub mod middleware;
pub mod protocol;
pub mod session;
pub mod state;
pub mod storage;
pub mod websocket;
