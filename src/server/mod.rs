//! HTTP server implementations.

/// Gateway HTTP surface (publish trigger, health, metrics)
pub mod gateway;

/// Graceful shutdown handling
pub mod shutdown;
