//! Transport-only client primitives for the session REST API and socket wire.
//!
//! This crate owns request building, response decoding, URL derivation and
//! socket frame normalization. It holds no session state and knows nothing
//! about the sync core's domain types; adapters translate its payloads.

pub mod client;
pub mod config;
pub mod error;
pub mod frames;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod timestamp;
pub mod url;

pub use client::SessionApiClient;
pub use config::SessionApiConfig;
pub use error::SessionApiError;
pub use frames::{parse_socket_frame, SocketFrame};
pub use url::{normalize_base_url, socket_url};
