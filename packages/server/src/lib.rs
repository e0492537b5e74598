//! HTTP front end for the render job scheduler.
//!
//! Exposes config, state, error handling, routes and the command-backed
//! inference collaborator so the binary and integration tests share them.

pub mod config;
pub mod error;
pub mod inference;
pub mod router;
pub mod routes;
pub mod state;
