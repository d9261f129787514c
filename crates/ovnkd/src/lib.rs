//! ovnkd library - exposes modules for testing.

pub mod config;
pub mod debug_pod;
pub mod executor;
pub mod offline;
pub mod rpc_handler;
pub mod rpc_server;
pub mod runner;
pub mod tools;
