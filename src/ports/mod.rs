//! Port traits for the collaborators the core consumes.

pub mod cache_port;
pub mod config_port;
pub mod data_port;
