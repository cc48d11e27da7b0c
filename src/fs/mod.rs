//! Filesystem utilities for onelane.
//!
//! All shared state lives in small files under the project's state
//! directory. This module provides the two primitives every other module
//! builds on: atomic replacement of whole files, and advisory-locked critical
//! sections for read-modify-write cycles across processes.

pub mod atomic;
mod section;

pub use atomic::{atomic_write, read_json, remove_if_exists, write_json};
pub use section::{SectionLock, with_section};
