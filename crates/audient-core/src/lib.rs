//! Core engine for the Audient assistant widget.
//!
//! The widget lets an end user manipulate a host application's audience
//! selection through chat. This crate contains the pieces with real
//! invariants: the streaming turn state machine, the reconnection
//! controller, the plan decomposer, and the session store. Rendering,
//! element packaging, and the host screen itself live elsewhere and talk
//! to this crate through the types in [`events`] and [`transport`].

pub mod actions;
pub mod chat;
pub mod connection;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod transport;

pub use engine::{EngineBuilder, WidgetEngine};
pub use error::{Error, Result};
