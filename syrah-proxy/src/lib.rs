//! Async proxy engine: drives the live sockets, TLS, pooling, throttling,
//! and breakpoint machinery around the sans-I/O types in `syrah-core`.

pub mod breakpoint;
pub mod config;
pub mod connection;
pub mod drain;
pub mod engine;
pub mod error;
pub mod eventbus;
pub mod http_io;
pub mod pipeline;
pub mod pool;
pub mod store;
pub mod throttle;
pub mod tls;

pub use config::ProxyConfig;
pub use engine::ProxyEngine;
pub use error::{ProxyError, ProxyResult};
pub use eventbus::{EventBus, FlowEvent, StatusEvent};
pub use store::FlowStore;
