//! Core types and trait definitions for the TCRB normalization engine.
//!
//! This crate has no database dependency. It owns the
//! canonical domain model, payload coercion, the per-record resolution chain
//! and the batch driver; storage backends (e.g. `tcrb-store-sqlite`) plug in
//! through the traits in [`store`].

pub mod chain;
pub mod driver;
pub mod entity;
pub mod error;
pub mod payload;
pub mod refs;
pub mod score;
pub mod store;

pub use error::{Error, Result};
