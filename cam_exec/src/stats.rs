//! # Pipeline statistics and runtime settings
//!
//! Counters are plain atomics updated with relaxed ordering, they are only ever read as a
//! snapshot for reporting.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use comms_if::eqpt::cam::StatsReport;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Counters shared by the producer, the stream clients and the command channel.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_published: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub dropped_slot_busy: AtomicU64,
    pub capture_failures: AtomicU64,
    pub encode_failures: AtomicU64,
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub clients_served: AtomicU64,
    pub clients_active: AtomicU64,
    pub commands_handled: AtomicU64,
    pub commands_unknown: AtomicU64,
    pub commands_malformed: AtomicU64,
}

/// Settings which can be changed at runtime through the command channel.
#[derive(Debug)]
pub struct CameraSettings {
    name: RwLock<String>,
    quality: AtomicU8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("Quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters alongside the current settings.
    pub fn snapshot(&self, settings: &CameraSettings) -> StatsReport {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);

        StatsReport {
            timestamp: Utc::now(),
            camera_name: settings.name(),
            quality: settings.quality(),
            frames_captured: get(&self.frames_captured),
            frames_encoded: get(&self.frames_encoded),
            frames_published: get(&self.frames_published),
            dropped_queue_full: get(&self.dropped_queue_full),
            dropped_slot_busy: get(&self.dropped_slot_busy),
            capture_failures: get(&self.capture_failures),
            encode_failures: get(&self.encode_failures),
            frames_sent: get(&self.frames_sent),
            bytes_sent: get(&self.bytes_sent),
            clients_served: get(&self.clients_served),
            clients_active: get(&self.clients_active),
            commands_handled: get(&self.commands_handled),
            commands_unknown: get(&self.commands_unknown),
            commands_malformed: get(&self.commands_malformed),
        }
    }
}

impl CameraSettings {
    /// Create the settings. `quality` is clamped into 1..=100.
    pub fn new(name: &str, quality: u8) -> Self {
        Self {
            name: RwLock::new(name.to_string()),
            quality: AtomicU8::new(quality.max(1).min(100)),
        }
    }

    pub fn name(&self) -> String {
        match self.name.read() {
            Ok(n) => n.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_name(&self, name: &str) {
        match self.name.write() {
            Ok(mut n) => *n = name.to_string(),
            Err(poisoned) => *poisoned.into_inner() = name.to_string(),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    pub fn set_quality(&self, quality: u8) -> Result<(), SettingsError> {
        if quality == 0 || quality > 100 {
            return Err(SettingsError::InvalidQuality(quality));
        }

        self.quality.store(quality, Ordering::Relaxed);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
