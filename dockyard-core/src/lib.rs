//! Dockyard Core
//!
//! Core types shared by the Dockyard build-and-deploy services.
//!
//! This crate contains:
//! - Domain types: build requests and configuration, log lines, container records
//! - DTOs: shapes exchanged over the HTTP surface

pub mod domain;
pub mod dto;
