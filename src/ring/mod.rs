//! Ring module: Lock-Free Circular Buffer
//!
//! Prinsip desain:
//! - Lock-Free: Hanya atomic CAS pada cursor, tidak ada Mutex/RwLock
//! - No-Allocation: Backing array dialokasikan sekali saat init
//! - Ordered: Urutan pop mengikuti urutan reservasi push

mod capacity;
mod circular;

pub use capacity::next_power_of_two;
pub use circular::CircularBuffer;
