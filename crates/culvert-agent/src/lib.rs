//! Culvert agent library
//!
//! The client side of the tunnel: connects out to the server, accepts
//! multiplexed sub-streams, dials the requested local targets and pumps
//! bytes. The binary in `main.rs` adds signal handling and the reconnect
//! loop; the e2e crate drives [`runtime`] directly.

pub mod config;
pub mod retry;
pub mod runtime;

pub use config::AgentConfig;
pub use retry::RetryPolicy;
