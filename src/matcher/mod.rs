//! Value-level matching primitives shared by the compiler and the engine.
//!
//! - [`filters`]: key-type registry and the validators bound to output keys
//! - [`coordinate`]: conversions between geo coordinate systems
//! - [`wildcard`]: glob matching for wildcard host and URL lookups

pub mod coordinate;
pub mod filters;
pub mod wildcard;

pub use coordinate::{convert, convert_str, CoordinateSystem};
pub use filters::{FilterFn, KeyType};
pub use wildcard::wildcard_match;
