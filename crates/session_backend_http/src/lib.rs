//! REST and WebSocket implementation of the `session_backend` contract.
//!
//! This adapter translates `session_api` wire payloads and socket frames into
//! the domain types consumed by the sync core.

mod backend;
mod convert;
mod socket;

pub use backend::HttpSessionBackend;
pub use convert::{envelope_from_frame, map_api_error, message_from_history, session_from_payload};
pub use socket::{WsConnector, DEFAULT_CONNECT_TIMEOUT};
