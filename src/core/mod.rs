//! Core module: primitives used by the listener
//!
//! - `WaitGroup`: counter yang ditunggu saat shutdown (drain)
//! - `Backoff`: exponential backoff untuk accept error transient

mod backoff;
mod wait_group;

pub use backoff::{Backoff, INITIAL_DELAY};
pub use wait_group::{WaitGroup, WaitGuard};
