//! Shared test utilities for logpond integration harnesses.
//!
//! Import everything you need via `mod common; use common::*;` at the top of
//! each harness file. Time-dependent helpers work with paused tokio time.

#![allow(dead_code, unused_imports)]

pub mod assertions;
pub mod builders;
pub mod fake_repository;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fake_repository::*;
pub use fixtures::*;
