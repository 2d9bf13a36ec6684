//! Shared utility modules used across Lyra components.

pub mod id;
pub mod simd;
