#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for weld.
//!
//! Pure helpers with no logging dependencies. Logging is owned by the CLI.

pub mod fs;
pub mod hash;
pub mod path;
