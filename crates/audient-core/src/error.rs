use thiserror::Error;

use crate::actions::ActionError;
use crate::chat::TurnError;
use crate::connection::ConnectionError;
use crate::session::PersistenceError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
