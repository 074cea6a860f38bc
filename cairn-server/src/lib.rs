//! Reference object server for the Cairn HTTP backend.

pub mod config;
pub mod server;
pub mod storage;
