//! Persistent catalog of clients and port mappings.
//!
//! The catalog is the authoritative record of which client owns which public
//! port and where traffic should land on the client side. The server treats
//! it as read-only at runtime (last-seen updates aside); the operator CLI is
//! the write path.

mod error;
mod records;
mod store;

pub use error::{CatalogError, ValidateError};
pub use records::{ClientRecord, ClientStatus, ClientSummary, PortMapping};
pub use store::{hash_secret, Catalog};
