//! Domain layer for the event-sourcing system.
//!
//! This crate provides the core domain abstractions including:
//! - AggregateRoot trait with a single event application path
//! - HandlerRegistry for explicit, per-type event handler tables
//! - EventConverter for upgrading stored events to their current schema
//! - AggregateRootLoader for rebuilding aggregates from history
//! - DomainRepository for loading, saving and publishing aggregates

pub mod aggregate;
pub mod config;
pub mod converter;
pub mod error;
pub mod handler;
pub mod loader;
pub mod repository;

pub use aggregate::{AggregateCore, AggregateRoot, DomainEvent};
pub use config::RepositoryConfig;
pub use converter::{
    ConversionFailure, ConversionResult, ConvertEvent, DEFAULT_MAX_CONVERSION_DEPTH,
    EventConverter,
};
pub use error::{DomainError, Result};
pub use handler::{CatchAllHandler, HandlerRegistry, ResolvedHandler};
pub use loader::{AggregateRootLoader, ReplayLoader};
pub use repository::DomainRepository;
