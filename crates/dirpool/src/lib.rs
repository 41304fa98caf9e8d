//! dirpool — bounded pool of bound directory (LDAP-style) connections.
//!
//! Provides:
//! - **pool**: `ConnectionManager`, scoped acquisition with reuse, rebind,
//!   capacity backpressure, lazy lifetime expiry and endpoint failover
//! - **connector**: `Connector`, one connection plus its bind bookkeeping
//! - **directory**: capability traits the underlying client library implements
//! - **config**: `PoolConfig` and its TOML form
//! - **error**: `PoolError` / `DirectoryError`

pub mod config;
pub mod connector;
pub mod directory;
pub mod error;
pub mod pool;

#[cfg(test)]
mod testing;

pub use config::{PoolConfig, PoolSettings};
pub use connector::{Connector, ConnectorInfo};
pub use directory::{
    ConnectOptions, ConnectionFactory, DirectoryConnection, Entry, Modification, ModifyOp,
    Operation, Response, Scope,
};
pub use error::{DirectoryError, PoolError, PoolResult};
pub use pool::{ConnectionManager, PooledConnection};
