use session_backend::ConnectionState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageLogError {
    #[error("cannot clear the message log while the transport is {state}")]
    TransportActive { state: ConnectionState },

    #[error("cannot seed a message log that already holds {len} messages")]
    NotEmpty { len: usize },
}
