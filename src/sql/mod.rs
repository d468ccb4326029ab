//! Safe SQL builder: identifiers from the catalog only, values as parameters.

mod builder;
pub mod cursor;
pub mod params;
pub use builder::*;
pub use params::*;
