//! Echo protocol implementation.
//!
//! The simplest possible handler: every chunk of bytes read from the
//! client is queued back to it unchanged. No framing is applied, so the
//! server's read size decides how the stream is chunked.
//!
//! ## Use Cases
//!
//! 1. **Throughput testing**: Measure how fast the event loop moves bytes
//!    with no handler overhead.
//!
//! 2. **Correctness validation**: Verify data integrity by comparing
//!    echoed data against sent data.

pub mod handler;

pub use handler::Echo;
