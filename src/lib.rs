//! Root binary crate: layers the admin RPC surface (spec §6) and process
//! configuration (figment) on top of `syrah-core` (sans-I/O types) and
//! `syrah-proxy` (the running engine).

pub mod admin;
pub mod config;
pub mod har;
pub mod state;

pub use config::AppConfig;
pub use state::AppState;
