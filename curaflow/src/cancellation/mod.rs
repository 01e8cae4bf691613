//! Cooperative cancellation for stage invocations.

mod token;

pub use token::CancellationToken;
