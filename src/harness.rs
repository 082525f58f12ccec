//! Producer/Consumer Harness
//!
//! Menjalankan N producer dan M consumer di atas satu [`CircularBuffer`]:
//! - Producer `p` push range nilai `[p * items, (p + 1) * items)` dalam busy loop
//! - Consumer pop terus sampai flag "producer selesai" aktif DAN buffer kosong
//! - Buffer tidak punya primitive close; shutdown dikoordinasi lewat flag eksternal
//!
//! Hasil setiap consumer dikumpulkan supaya bisa diverifikasi: tidak ada nilai
//! yang hilang, tidak ada duplikat, dan urutan per producer tetap terjaga.

use std::io::{self, Write};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use thiserror::Error;

use crate::ring::{next_power_of_two, CircularBuffer};

/// Error dari konfigurasi atau verifikasi harness.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error("at least one consumer is required to drain {items} items")]
    NoConsumers { items: u64 },

    #[error("capacity {requested} rounds to {rounded} slot(s), leaving no usable slot")]
    CapacityTooSmall { requested: usize, rounded: usize },

    #[error("{producers} producers x {items_per_producer} items does not fit in memory")]
    TooManyItems {
        producers: usize,
        items_per_producer: u64,
    },

    #[error("{role} {id} panicked")]
    WorkerPanicked { role: &'static str, id: usize },

    #[error("{count} value(s) never popped, first missing value is {first}")]
    Lost { count: u64, first: u64 },

    #[error("value {value} popped more than once")]
    Duplicated { value: u64 },

    #[error("value {value} popped but never pushed")]
    Unexpected { value: u64 },

    #[error("consumer {consumer} saw producer {producer} value {value} after {previous}")]
    OrderViolation {
        consumer: usize,
        producer: u64,
        previous: u64,
        value: u64,
    },
}

/// Konfigurasi harness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Kapasitas yang diminta (dibulatkan ke power of 2 oleh buffer)
    pub capacity: usize,
    pub producers: usize,
    pub items_per_producer: u64,
    pub consumers: usize,
    /// Print setiap nilai yang di-pop ke stdout
    pub echo: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            producers: 3,
            items_per_producer: 500_000,
            consumers: 5,
            echo: false,
        }
    }
}

impl HarnessConfig {
    /// Total nilai yang akan di-push semua producer.
    pub fn total_items(&self) -> Result<u64, HarnessError> {
        let too_many = || HarnessError::TooManyItems {
            producers: self.producers,
            items_per_producer: self.items_per_producer,
        };
        let total = (self.producers as u64)
            .checked_mul(self.items_per_producer)
            .ok_or_else(too_many)?;
        usize::try_from(total).map_err(|_| too_many())?;
        Ok(total)
    }

    /// Tolak konfigurasi yang membuat producer spin selamanya.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let total = self.total_items()?;
        if total == 0 {
            return Ok(());
        }

        if self.consumers == 0 {
            return Err(HarnessError::NoConsumers { items: total });
        }

        let rounded = next_power_of_two(self.capacity);
        if rounded < 2 {
            return Err(HarnessError::CapacityTooSmall {
                requested: self.capacity,
                rounded,
            });
        }

        Ok(())
    }

    fn producer_range(&self, producer: usize) -> Range<u64> {
        let start = producer as u64 * self.items_per_producer;
        start..start + self.items_per_producer
    }
}

/// Hasil satu run harness
#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub capacity: usize,
    pub producers: usize,
    pub items_per_producer: u64,
    /// Nilai yang di-pop, per consumer, sesuai urutan pop
    pub per_consumer: Vec<Vec<u64>>,
    /// Berapa kali push ditolak karena buffer penuh
    pub full_retries: u64,
    pub elapsed: Duration,
}

impl HarnessReport {
    pub fn pushed(&self) -> u64 {
        self.producers as u64 * self.items_per_producer
    }

    pub fn popped(&self) -> u64 {
        self.per_consumer.iter().map(|v| v.len() as u64).sum()
    }

    /// Elemen per detik yang melewati buffer
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.popped() as f64 / secs
    }

    /// Multiset nilai yang di-pop harus sama persis dengan range yang di-push.
    pub fn verify(&self) -> Result<(), HarnessError> {
        let total = self.pushed();
        let mut seen = vec![false; total as usize];

        for &value in self.per_consumer.iter().flatten() {
            let Some(mark) = seen.get_mut(value as usize).filter(|_| value < total) else {
                return Err(HarnessError::Unexpected { value });
            };
            if *mark {
                return Err(HarnessError::Duplicated { value });
            }
            *mark = true;
        }

        let mut missing = seen
            .iter()
            .enumerate()
            .filter(|&(_, &hit)| !hit)
            .map(|(value, _)| value as u64);
        if let Some(first) = missing.next() {
            return Err(HarnessError::Lost {
                count: 1 + missing.count() as u64,
                first,
            });
        }

        Ok(())
    }

    /// Setiap consumer harus melihat nilai dari satu producer secara naik.
    ///
    /// Producer push range-nya berurutan, dan pop mengikuti urutan reservasi,
    /// jadi urutan per producer tidak boleh terbalik di consumer mana pun.
    pub fn check_producer_order(&self) -> Result<(), HarnessError> {
        if self.items_per_producer == 0 {
            return Ok(());
        }

        for (consumer, values) in self.per_consumer.iter().enumerate() {
            let mut last = vec![None::<u64>; self.producers];
            for &value in values {
                let producer = value / self.items_per_producer;
                let Some(slot) = last.get_mut(producer as usize) else {
                    return Err(HarnessError::Unexpected { value });
                };
                if let Some(previous) = *slot {
                    if value <= previous {
                        return Err(HarnessError::OrderViolation {
                            consumer,
                            producer,
                            previous,
                            value,
                        });
                    }
                }
                *slot = Some(value);
            }
        }

        Ok(())
    }
}

/// Jalankan satu round harness sampai semua producer dan consumer selesai.
pub fn run(config: &HarnessConfig) -> Result<HarnessReport, HarnessError> {
    config.validate()?;

    let buffer = CircularBuffer::<u64>::new(config.capacity);
    let done = AtomicBool::new(false);

    log::info!(
        "harness start: capacity={} producers={} items/producer={} consumers={}",
        buffer.capacity(),
        config.producers,
        config.items_per_producer,
        config.consumers
    );

    let start = Instant::now();

    let (full_retries, per_consumer) = thread::scope(|s| {
        let producers: Vec<_> = (0..config.producers)
            .map(|id| {
                let buffer = &buffer;
                let range = config.producer_range(id);
                s.spawn(move || produce(buffer, range))
            })
            .collect();

        let consumers: Vec<_> = (0..config.consumers)
            .map(|_| {
                let buffer = &buffer;
                let done = &done;
                let echo = config.echo;
                s.spawn(move || consume(buffer, done, echo))
            })
            .collect();

        let mut failure = None;
        let mut full_retries = 0;

        for (id, handle) in producers.into_iter().enumerate() {
            match handle.join() {
                Ok(retries) => {
                    log::debug!("producer {} done ({} full retries)", id, retries);
                    full_retries += retries;
                }
                Err(_) => {
                    failure.get_or_insert(HarnessError::WorkerPanicked {
                        role: "producer",
                        id,
                    });
                }
            }
        }

        // Semua push sudah publish; consumer boleh berhenti begitu buffer kosong
        done.store(true, Ordering::Release);

        let mut per_consumer = Vec::with_capacity(config.consumers);
        for (id, handle) in consumers.into_iter().enumerate() {
            match handle.join() {
                Ok(values) => {
                    log::debug!("consumer {} done ({} values)", id, values.len());
                    per_consumer.push(values);
                }
                Err(_) => {
                    failure.get_or_insert(HarnessError::WorkerPanicked {
                        role: "consumer",
                        id,
                    });
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok((full_retries, per_consumer)),
        }
    })?;

    let report = HarnessReport {
        capacity: buffer.capacity(),
        producers: config.producers,
        items_per_producer: config.items_per_producer,
        per_consumer,
        full_retries,
        elapsed: start.elapsed(),
    };

    log::info!(
        "harness finished: popped={} in {:.3}s",
        report.popped(),
        report.elapsed.as_secs_f64()
    );

    Ok(report)
}

/// Push semua nilai di `range`, retry selama buffer penuh.
fn produce(buffer: &CircularBuffer<u64>, range: Range<u64>) -> u64 {
    let mut full_retries = 0;
    let backoff = Backoff::new();

    for value in range {
        while !buffer.push(value) {
            full_retries += 1;
            backoff.snooze();
        }
        backoff.reset();
    }

    full_retries
}

/// Pop sampai `done` aktif dan buffer melaporkan kosong.
fn consume(buffer: &CircularBuffer<u64>, done: &AtomicBool, echo: bool) -> Vec<u64> {
    let mut values = Vec::new();
    let backoff = Backoff::new();

    while !done.load(Ordering::Acquire) || !buffer.is_empty() {
        match buffer.pop() {
            Some(value) => {
                if echo {
                    // Broken pipe dll. tidak menghentikan drain
                    writeln!(io::stdout().lock(), "{}", value).ok();
                }
                values.push(value);
                backoff.reset();
            }
            None => backoff.snooze(),
        }
    }

    values
}
