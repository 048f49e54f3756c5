//! Conversation history: the active message list, archived sessions, and
//! the pluggable storage behind them.

pub mod persistence;
pub mod store;

pub use persistence::{JsonFileBackend, MemoryBackend, PersistenceBackend, PersistenceError};
pub use store::SessionStore;
