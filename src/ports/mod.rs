//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) and boundary message types that the
//! domain/usecases layer requires from the outside world. Adapters
//! implement these traits.
//!
//! Port categories:
//! - `Transport`: typed message delivery to one or all connections
//! - `LedgerStore`: durable append-only transaction log

pub mod repository;
pub mod transport;
