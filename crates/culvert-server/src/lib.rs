//! Culvert tunnel server library
//!
//! Core components of the reverse-tunnel server: the session runtime, the
//! process-wide session manager, the control channel and the transport
//! accept planes. The binary in `main.rs` wires these together; the e2e
//! crate embeds them directly.

mod auth;
mod config;
mod control;
mod framed_plane;
mod manager;
mod session;
mod ws_plane;

pub use auth::{AuthError, Authenticator};
pub use config::{ServerConfig, TlsConfig};
pub use control::ControlChannel;
pub use framed_plane::FramedPlane;
pub use manager::SessionManager;
pub use session::{attach_session, ClientSession};
pub use ws_plane::WsPlane;
