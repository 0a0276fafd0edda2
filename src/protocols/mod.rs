//! Built-in handler implementations.
//!
//! - `echo`: returns every inbound chunk unchanged
//! - `line`: line-framed echo that strips surrounding whitespace

pub mod echo;
pub mod line;
