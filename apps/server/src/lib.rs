pub mod config;
pub mod telluric_client;
mod main_lib;

pub use main_lib::{build_orchestrator, init_tracing, Orchestrator};
