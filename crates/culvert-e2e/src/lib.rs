//! End-to-end test utilities for the culvert tunnel system
//!
//! Provides a harness that runs a complete server over an in-memory
//! catalog, a real agent driven by the production runtime, and a mock TCP
//! service standing in for the tunneled target.

pub mod harness;
pub mod mock_tcp_service;

pub use harness::{alloc_exposed_port, wait_for, TestAgent, TestServer, TEST_SECRET};
pub use mock_tcp_service::{MockTcpService, TcpServiceMode};
