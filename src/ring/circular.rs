//! Lock-Free Multi-Producer Multi-Consumer (MPMC) Circular Buffer
//!
//! Tiga cursor monotonic, semuanya absolute count (bukan index yang sudah di-mask):
//! - `read`: slot berikutnya yang akan di-claim consumer
//! - `reserve`: slot berikutnya yang akan di-reserve producer
//! - `publish`: batas slot yang sudah selesai ditulis dan boleh dibaca consumer
//!
//! Invariant: `read <= publish <= reserve`, dan `reserve - read <= capacity - 1`.
//! Satu slot selalu dikorbankan supaya "penuh" bisa dibedakan dari "kosong".
//!
//! Producer menulis ke slot masing-masing secara paralel, lalu publish
//! berurutan sesuai urutan reservasi. Urutan pop global = urutan reservasi.
//! Tidak ada Mutex di jalur push/pop.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use super::capacity::next_power_of_two;

/// Satu cell dalam backing array.
type Slot<T> = UnsafeCell<MaybeUninit<T>>;

/// Lock-Free MPMC Circular Buffer dengan kapasitas tetap.
///
/// Kapasitas dibulatkan ke power of 2; yang bisa terisi bersamaan hanya
/// `capacity - 1` elemen. `push` dan `pop` tidak pernah menunggu slot
/// kosong/terisi: keduanya langsung melapor `false`/`None`.
///
/// ```
/// use carousel::ring::CircularBuffer;
///
/// let rb = CircularBuffer::new(4);
/// assert!(rb.push(7u32));
/// assert_eq!(rb.pop(), Some(7));
/// assert_eq!(rb.pop(), None);
/// ```
pub struct CircularBuffer<T> {
    // Consumer side
    read: CachePadded<AtomicUsize>,
    // Producer side: reservasi slot
    reserve: CachePadded<AtomicUsize>,
    // Producer side: slot yang sudah visible untuk consumer
    publish: CachePadded<AtomicUsize>,
    // Hint occupancy untuk is_empty(); bisa sesaat negatif
    occupancy: CachePadded<AtomicIsize>,
    // Satu alokasi kontigu, dibuat sekali di new()
    slots: Box<[Slot<T>]>,
    mask: usize,
}

// SAFETY: Akses ke slot dikoordinasi oleh CAS pada cursor:
// - Slot hanya ditulis oleh producer yang memegang reservasinya
// - Nilai hasil baca hanya dipakai consumer yang memenangkan CAS `read`
// - T: Copy, jadi tidak ada drop yang perlu dilacak per slot
unsafe impl<T: Send> Send for CircularBuffer<T> {}
unsafe impl<T: Send> Sync for CircularBuffer<T> {}

impl<T: Copy> CircularBuffer<T> {
    /// Membuat buffer baru dengan kapasitas `requested` dibulatkan ke power of 2.
    ///
    /// `0` diperlakukan sebagai `1` (buffer yang selalu penuh).
    /// Alokasi hanya terjadi sekali di sini.
    pub fn new(requested: usize) -> Self {
        let capacity = next_power_of_two(requested);

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        log::debug!(
            "circular buffer allocated: requested={} capacity={} usable={}",
            requested,
            capacity,
            capacity - 1
        );

        Self {
            read: CachePadded::new(AtomicUsize::new(0)),
            reserve: CachePadded::new(AtomicUsize::new(0)),
            publish: CachePadded::new(AtomicUsize::new(0)),
            occupancy: CachePadded::new(AtomicIsize::new(0)),
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
        }
    }

    /// Push elemen ke buffer (producer side, boleh banyak producer).
    ///
    /// Returns `true` jika berhasil, `false` jika buffer penuh. Saat penuh
    /// tidak ada state yang berubah.
    ///
    /// Setelah slot ditulis, producer menunggu (spin lalu yield) sampai semua
    /// reservasi sebelumnya sudah publish. Producer yang berhenti di tengah
    /// reservasi akan menahan publish semua producer setelahnya.
    #[inline]
    pub fn push(&self, value: T) -> bool {
        let ticket = loop {
            // Baca `read` dulu supaya snapshot tidak pernah melihat read > reserve
            let read = self.read.load(Ordering::Acquire);
            let reserve = self.reserve.load(Ordering::Acquire);

            if reserve.wrapping_sub(read) >= self.mask {
                return false;
            }

            if self
                .reserve
                .compare_exchange(
                    reserve,
                    reserve.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break reserve;
            }
        };

        let slot = &self.slots[ticket & self.mask];

        // SAFETY: `ticket` unik untuk producer ini, dan slot-nya sudah
        // di-claim consumer sebelumnya (dicek lewat `read` di atas).
        unsafe {
            (*slot.get()).write(value);
        }

        // Publish sesuai urutan reservasi: CAS hanya sukses jika semua
        // ticket sebelumnya sudah publish.
        let backoff = Backoff::new();
        while self
            .publish
            .compare_exchange_weak(
                ticket,
                ticket.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            backoff.snooze();
        }

        self.occupancy.fetch_add(1, Ordering::Release);
        true
    }

    /// Pop elemen dari buffer (consumer side, boleh banyak consumer).
    ///
    /// Returns `Some(T)` jika ada elemen yang sudah publish, `None` jika kosong.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        loop {
            let read = self.read.load(Ordering::Acquire);
            let publish = self.publish.load(Ordering::Acquire);

            if read == publish {
                return None;
            }

            let slot = &self.slots[read & self.mask];

            // SAFETY: Baca spekulatif ke MaybeUninit. Kalau CAS di bawah gagal,
            // slot ini mungkin sedang ditimpa producer yang sudah wrap-around,
            // jadi hasilnya dibuang tanpa assume_init.
            let value = unsafe { ptr::read_volatile(slot.get()) };

            if self
                .read
                .compare_exchange(
                    read,
                    read.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                self.occupancy.fetch_sub(1, Ordering::Release);
                // SAFETY: read < publish saat snapshot, dan CAS sukses berarti
                // tidak ada consumer lain yang melewati slot ini.
                return Some(unsafe { value.assume_init() });
            }
        }
    }
}

impl<T> CircularBuffer<T> {
    /// Cek apakah buffer kosong (hint, bukan sinkronisasi).
    ///
    /// Push/pop concurrent bisa mengubah isi buffer segera setelah ini dibaca.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupancy.load(Ordering::Acquire) <= 0
    }

    /// Jumlah elemen menurut occupancy counter (hint).
    #[inline]
    pub fn len(&self) -> usize {
        self.occupancy.load(Ordering::Acquire).max(0) as usize
    }

    /// Cek apakah push saat ini akan gagal (snapshot).
    #[inline]
    pub fn is_full(&self) -> bool {
        let read = self.read.load(Ordering::Acquire);
        let reserve = self.reserve.load(Ordering::Acquire);
        reserve.wrapping_sub(read) >= self.mask
    }

    /// Kapasitas buffer setelah pembulatan
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Jumlah elemen maksimal yang bisa terisi bersamaan
    #[inline]
    pub fn usable_capacity(&self) -> usize {
        self.mask
    }
}

impl<T> fmt::Debug for CircularBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read.load(Ordering::Relaxed))
            .field("publish", &self.publish.load(Ordering::Relaxed))
            .field("reserve", &self.reserve.load(Ordering::Relaxed))
            .field("occupancy", &self.occupancy.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_push_pop() {
        let rb: CircularBuffer<u64> = CircularBuffer::new(16);

        assert!(rb.is_empty());
        assert!(!rb.is_full());

        assert!(rb.push(42));
        assert!(!rb.is_empty());
        assert_eq!(rb.len(), 1);

        assert_eq!(rb.pop(), Some(42));
        assert!(rb.is_empty());
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn test_sequence_preserved() {
        let rb: CircularBuffer<u32> = CircularBuffer::new(8);

        for i in 0..7 {
            assert!(rb.push(i * 10));
        }
        let drained: Vec<u32> = std::iter::from_fn(|| rb.pop()).collect();
        assert_eq!(drained, vec![0, 10, 20, 30, 40, 50, 60]);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_full_buffer() {
        let rb: CircularBuffer<u64> = CircularBuffer::new(4);

        assert!(rb.push(1));
        assert!(rb.push(2));
        assert!(rb.push(3));

        assert!(rb.is_full());
        assert!(!rb.push(4)); // Should fail - one slot is sacrificed
        assert_eq!(rb.len(), 3);

        assert_eq!(rb.pop(), Some(1));
        assert!(rb.push(4)); // Now should succeed
        assert_eq!(rb.pop(), Some(2));
        assert_eq!(rb.pop(), Some(3));
        assert_eq!(rb.pop(), Some(4));
    }

    #[test]
    fn test_capacity_rounding() {
        let cases = [
            (0, 1),
            (1, 1),
            (2, 2),
            (3, 4),
            (5, 8),
            (1024, 1024),
            (1025, 2048),
        ];
        for (requested, expected) in cases {
            let rb: CircularBuffer<u8> = CircularBuffer::new(requested);
            assert_eq!(rb.capacity(), expected);
            assert_eq!(rb.usable_capacity(), expected - 1);
        }
    }

    #[test]
    fn test_capacity_respected() {
        for requested in [2usize, 3, 8, 100] {
            let rb: CircularBuffer<usize> = CircularBuffer::new(requested);
            let cap = rb.capacity();

            for i in 0..cap - 1 {
                assert!(rb.push(i), "push {i} of {cap}");
            }
            assert!(!rb.push(usize::MAX), "push {cap} must report full");
            assert_eq!(rb.len(), cap - 1);
        }
    }

    #[test]
    fn test_zero_capacity_always_full() {
        let rb: CircularBuffer<u8> = CircularBuffer::new(0);

        assert_eq!(rb.capacity(), 1);
        assert!(rb.is_full());
        assert!(!rb.push(1));
        assert_eq!(rb.pop(), None);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_empty_toggle() {
        let rb: CircularBuffer<i32> = CircularBuffer::new(2);

        assert!(rb.is_empty());
        assert!(rb.push(-1));
        assert!(!rb.is_empty());
        assert!(!rb.push(-2));
        assert_eq!(rb.pop(), Some(-1));
        assert!(rb.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let rb: CircularBuffer<u64> = CircularBuffer::new(4);

        // Fill and drain many times so cursors pass the mask repeatedly
        for round in 0..100 {
            for i in 0..3 {
                assert!(rb.push(round * 3 + i));
            }
            for i in 0..3 {
                assert_eq!(rb.pop(), Some(round * 3 + i));
            }
        }
        assert!(rb.is_empty());
    }

    #[test]
    fn test_interleaved_push_pop() {
        let rb: CircularBuffer<u16> = CircularBuffer::new(2);

        for i in 0..1000u16 {
            assert!(rb.push(i));
            assert!(!rb.push(i));
            assert_eq!(rb.pop(), Some(i));
        }
    }

    #[test]
    fn test_non_integer_payload() {
        #[derive(Clone, Copy, Debug, PartialEq)]
        struct Tick {
            id: u32,
            price: f64,
        }

        let rb = CircularBuffer::new(4);
        assert!(rb.push(Tick { id: 1, price: 10.5 }));
        assert!(rb.push(Tick { id: 2, price: 11.0 }));
        assert_eq!(rb.pop(), Some(Tick { id: 1, price: 10.5 }));
        assert_eq!(rb.pop(), Some(Tick { id: 2, price: 11.0 }));
    }

    #[test]
    fn test_debug_shows_cursors() {
        let rb: CircularBuffer<u8> = CircularBuffer::new(4);
        rb.push(1);
        rb.push(2);
        rb.pop();

        let out = format!("{rb:?}");
        assert!(out.contains("capacity: 4"));
        assert!(out.contains("read: 1"));
        assert!(out.contains("publish: 2"));
        assert!(out.contains("reserve: 2"));
    }

    #[test]
    fn test_spsc_threads() {
        const COUNT: u64 = 100_000;
        let rb = Arc::new(CircularBuffer::new(64));

        let producer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                let mut i = 0;
                while i < COUNT {
                    if rb.push(i) {
                        i += 1;
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < COUNT {
            if let Some(v) = rb.pop() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }

        producer.join().unwrap();
        assert!(rb.is_empty());
    }
}
