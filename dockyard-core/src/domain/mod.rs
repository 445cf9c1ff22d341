//! Core domain types
//!
//! This module contains the domain structures shared by the runner (which
//! executes builds and tracks containers) and the orchestrator (which accepts
//! requests and exposes the results over HTTP).

pub mod build;
pub mod container;
pub mod log;
