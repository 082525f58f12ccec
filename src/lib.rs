//! Carousel - Fixed-Capacity Lock-Free MPMC Circular Buffer
//!
//! Arsitektur:
//! - [`ring`]: buffer dengan tiga cursor atomic (read, reserve, publish)
//! - [`harness`]: driver multi-producer/multi-consumer untuk stress dan benchmark

pub mod harness;
pub mod ring;

pub use ring::CircularBuffer;
