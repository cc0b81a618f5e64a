//! Home Assistant REST client

pub mod client;
pub mod states;
