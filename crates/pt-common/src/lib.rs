use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub mod logging;

/// Timestamp layout used in metric records (ISO local date-time, millisecond precision)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Column order of the metric record series. Consumers parse records by position,
/// so this order is part of the external contract.
pub const METRIC_RECORD_HEADER: &str = "timestamp,config_min_core,config_max_core,config_max_queue,\
current_core,current_max,active_threads,queue_size,queue_capacity,queue_utilization,idle_ratio";

const METRIC_RECORD_FIELDS: usize = 11;

// ============================================================================
// Pool Configuration Types
// ============================================================================

/// Configured bounds of a pool. Fixed once the pool is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolBounds {
    pub min_core: u32,
    pub max_core: u32,
    pub max_queue: u32,
}

impl PoolBounds {
    pub fn new(min_core: u32, max_core: u32, max_queue: u32) -> Self {
        Self { min_core, max_core, max_queue }
    }

    pub fn is_valid(&self) -> bool {
        self.min_core <= self.max_core
    }

    /// Clamp a requested core/max pair into these bounds.
    ///
    /// Core is clamped to `[min_core, max_core]` first; max is then clamped to
    /// `[core, max_core]`, so its floor is the already-clamped core rather than
    /// the requested one. For valid bounds the result always satisfies
    /// `min_core <= core <= max <= max_core`.
    pub fn clamp(&self, requested_core: i64, requested_max: i64) -> PoolSizing {
        let min_core = i64::from(self.min_core);
        let max_core = i64::from(self.max_core);

        let core = min_core.max(requested_core.min(max_core));
        let max = core.max(requested_max.min(max_core));

        PoolSizing {
            core: core as u32,
            max: max as u32,
        }
    }
}

/// Core/max worker targets applied to a live pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PoolSizing {
    pub core: u32,
    pub max: u32,
}

impl PoolSizing {
    pub fn new(core: u32, max: u32) -> Self {
        Self { core, max }
    }
}

impl std::fmt::Display for PoolSizing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "core={} max={}", self.core, self.max)
    }
}

// ============================================================================
// Observed State
// ============================================================================

/// Point-in-time view of a registered pool, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub name: String,
    pub bounds: PoolBounds,
    pub current_core: u32,
    pub current_max: u32,
    /// Live worker count (may lag the configured sizing)
    pub pool_size: u32,
    pub active_workers: u32,
    pub queue_size: usize,
    pub queue_capacity: usize,
    /// `min(1, queue_size / queue_capacity)`, 0 when capacity is 0
    pub queue_utilization: f64,
    /// `(pool_size - active_workers) / pool_size`, 0 when the pool has no workers
    pub idle_ratio: f64,
}

impl PoolSnapshot {
    pub fn sizing(&self) -> PoolSizing {
        PoolSizing::new(self.current_core, self.current_max)
    }
}

/// One historical sample of a pool.
///
/// Serialized field names match the CSV header so both encodings describe the
/// series with the same vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricRecord {
    #[schema(value_type = String)]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "config_min_core")]
    pub min_core: u32,
    #[serde(rename = "config_max_core")]
    pub max_core: u32,
    #[serde(rename = "config_max_queue")]
    pub max_queue: u32,
    pub current_core: u32,
    pub current_max: u32,
    #[serde(rename = "active_threads")]
    pub active_workers: u32,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub queue_utilization: f64,
    pub idle_ratio: f64,
}

/// Error raised when a persisted record line cannot be decoded
#[derive(Error, Debug, PartialEq)]
pub enum RecordParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("invalid value '{value}' in column {column}")]
    InvalidValue { column: &'static str, value: String },
}

impl MetricRecord {
    pub fn from_snapshot(snapshot: &PoolSnapshot, timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            min_core: snapshot.bounds.min_core,
            max_core: snapshot.bounds.max_core,
            max_queue: snapshot.bounds.max_queue,
            current_core: snapshot.current_core,
            current_max: snapshot.current_max,
            active_workers: snapshot.active_workers,
            queue_size: snapshot.queue_size,
            queue_capacity: snapshot.queue_capacity,
            queue_utilization: snapshot.queue_utilization,
            idle_ratio: snapshot.idle_ratio,
        }
    }

    pub fn bounds(&self) -> PoolBounds {
        PoolBounds::new(self.min_core, self.max_core, self.max_queue)
    }

    /// Encode as one comma-separated line in `METRIC_RECORD_HEADER` order
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{:.4},{:.4}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.min_core,
            self.max_core,
            self.max_queue,
            self.current_core,
            self.current_max,
            self.active_workers,
            self.queue_size,
            self.queue_capacity,
            self.queue_utilization,
            self.idle_ratio,
        )
    }

    /// Decode a line produced by [`MetricRecord::to_csv_line`]
    pub fn parse_csv_line(line: &str) -> Result<Self, RecordParseError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != METRIC_RECORD_FIELDS {
            return Err(RecordParseError::FieldCount {
                expected: METRIC_RECORD_FIELDS,
                found: fields.len(),
            });
        }

        let timestamp = NaiveDateTime::parse_from_str(fields[0], "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|_| RecordParseError::InvalidValue {
                column: "timestamp",
                value: fields[0].to_string(),
            })?;

        Ok(Self {
            timestamp,
            min_core: parse_field(fields[1], "config_min_core")?,
            max_core: parse_field(fields[2], "config_max_core")?,
            max_queue: parse_field(fields[3], "config_max_queue")?,
            current_core: parse_field(fields[4], "current_core")?,
            current_max: parse_field(fields[5], "current_max")?,
            active_workers: parse_field(fields[6], "active_threads")?,
            queue_size: parse_field(fields[7], "queue_size")?,
            queue_capacity: parse_field(fields[8], "queue_capacity")?,
            queue_utilization: parse_field(fields[9], "queue_utilization")?,
            idle_ratio: parse_field(fields[10], "idle_ratio")?,
        })
    }
}

fn parse_field<T: std::str::FromStr>(value: &str, column: &'static str) -> Result<T, RecordParseError> {
    value.parse().map_err(|_| RecordParseError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

// ============================================================================
// Recommendation Types
// ============================================================================

/// Raw sizing suggestion from a recommendation source. Untrusted: always passed
/// through [`PoolBounds::clamp`] before being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Recommendation {
    pub core: i64,
    pub max: i64,
}

impl Recommendation {
    pub fn new(core: i64, max: i64) -> Self {
        Self { core, max }
    }
}
