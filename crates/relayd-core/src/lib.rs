pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hardware;
pub mod registry;
pub mod sequence;
pub mod status;
pub mod store;

pub use error::{RelayError, Result};
