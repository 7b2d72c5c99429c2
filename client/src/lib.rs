//! Library surface for `subway-client`, exposed so integration tests can
//! drive the tunnel agent in-process instead of spawning the binary.

pub mod agent;
pub mod config;
