//! The voice pipeline: frame types, turn state, the Turn Controller, and
//! the runtime that drives one session's turns end-to-end.

pub mod controller;
pub mod messages;
pub mod runtime;
pub mod turn;
