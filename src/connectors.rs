//! Connector definitions and their versioned, encrypted storage form.

pub mod definition;
pub mod version;

pub use definition::*;
pub use version::*;
