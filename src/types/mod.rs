//! Core types shared by the runner, orchestrator and session.

pub mod decision;
pub mod event;
pub mod message;
pub mod turn;

pub use decision::*;
pub use event::*;
pub use message::*;
pub use turn::*;
