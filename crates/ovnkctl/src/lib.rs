//! ovnkctl library - socket client and parameter assembly.

pub mod client;
pub mod params;
