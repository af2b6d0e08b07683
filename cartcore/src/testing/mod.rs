//! Testing utilities for cartcore.
//!
//! Available to the crate's own tests and, with the `testing` feature, to
//! downstream crates:
//!
//! - [`generators`]: `proptest` strategies for identifiers and line items
//! - [`fixtures`]: ready-made products and users
//! - [`chaos`]: a store wrapper that injects failures

pub mod chaos;
pub mod fixtures;
pub mod generators;

/// Import everything with `use cartcore::testing::prelude::*;`.
pub mod prelude {
    pub use super::chaos::*;
    pub use super::fixtures::*;
    pub use super::generators::*;
}
