//! Line-framed echo protocol.
//!
//! Input is split on `\n`. Every complete line is echoed back with
//! surrounding whitespace removed and a single `\n` appended:
//!
//! ```text
//! Request:  "  hello world \r\n"
//! Response: "hello world\n"
//! ```
//!
//! Partial lines are buffered across reads until their newline arrives.
//! Lines longer than `MAX_LINE_LENGTH` or not valid UTF-8 are a handler
//! failure and close the connection.

pub mod handler;
pub mod parser;

pub use handler::LineEcho;
