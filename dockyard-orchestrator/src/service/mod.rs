//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers and the build engine.

pub mod build;
pub mod container;

// Re-export for convenience
pub use build as build_service;
pub use container as container_service;
