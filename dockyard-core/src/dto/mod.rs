//! Data Transfer Objects for the HTTP surface
//!
//! DTOs are lightweight representations of domain entities shaped for the
//! wire. Requests reuse the domain `BuildRequest` directly.

pub mod build;
