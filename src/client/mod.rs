//! # Native Voice Client
//!
//! Everything the terminal client needs to hold a conversation through the
//! bridge: the session state machine (`state`) and the controller plus
//! socket pump (`controller`). The binary in `src/bin/speak_client.rs` is a
//! thin keyboard layer over `run`.

pub mod controller;
pub mod state;

pub use controller::{run, ClientCommand, VoiceClient};
pub use state::SessionStateMachine;
