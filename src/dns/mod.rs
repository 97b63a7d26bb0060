//! The dns module implements the DNS protocol and the related functions

pub mod buffer;
pub mod client;
pub mod context;
pub mod hints;
pub mod protocol;
pub mod resolve;
pub mod server;
