//! Core types shared across the server

pub mod chat;
pub mod ids;
pub mod track;

pub use chat::ChatMessage;
pub use ids::{ClientId, ConnId, IdError, SessionId};
pub use track::{Track, TrackMetadata};
