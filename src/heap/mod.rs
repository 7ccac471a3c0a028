//! Boundary-tag heap allocator over a growable arena.

pub(crate) mod bins;
pub mod block;
pub mod check;
pub mod engine;
pub mod grow;
pub mod stats;

#[cfg(test)]
mod trace;
