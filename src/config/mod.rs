//! Scenario configuration.
//!
//! Loads and validates YAML scenario files and compiles their contracts
//! into condition trees.

pub mod build;
pub mod loader;
pub mod schema;
pub mod validation;

pub use build::{build_contract, build_tracker};
pub use loader::{ConfigLimits, ConfigLoader, ConfigWarning, LoadResult, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator, suggest};
