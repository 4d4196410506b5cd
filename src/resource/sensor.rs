//! Sensor resource: recent timestamped readings of one measurement.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Resource, ResourceError, ResourceKind};
use crate::task::TaskNature;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Keeps the latest `capacity` readings and answers with their statistics.
pub struct SensorResource {
    unique_name: String,
    unit: String,
    capacity: usize,
    readings: Mutex<VecDeque<Reading>>,
}

impl SensorResource {
    pub fn new(unique_name: impl Into<String>, unit: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            unique_name: unique_name.into(),
            unit: unit.into(),
            capacity,
            readings: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, value: f64) {
        self.record_at(Utc::now(), value);
    }

    /// Append a reading, evicting the oldest when full.
    pub fn record_at(&self, at: DateTime<Utc>, value: f64) {
        let mut readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        if readings.len() == self.capacity {
            readings.pop_front();
        }
        readings.push_back(Reading { at, value });
    }

    pub fn readings(&self) -> Vec<Reading> {
        let readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        readings.iter().copied().collect()
    }

    fn describe(&self) -> Option<String> {
        let readings = self.readings();
        let latest = readings.last()?;
        let count = readings.len();
        let (min, max, sum) = readings.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), r| (min.min(r.value), max.max(r.value), sum + r.value),
        );
        let first = readings.first().map(|r| r.at).unwrap_or(latest.at);
        Some(format!(
            "Latest reading {latest_value} {unit} at {latest_at}. Over {count} readings since {first}: \
             min {min} {unit}, max {max} {unit}, mean {mean:.3} {unit}.",
            latest_value = latest.value,
            unit = self.unit,
            latest_at = latest.at.to_rfc3339(),
            first = first.to_rfc3339(),
            mean = sum / count as f64,
        ))
    }
}

#[async_trait]
impl Resource for SensorResource {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Sensor
    }

    fn supports(&self, nature: TaskNature) -> bool {
        !matches!(nature, TaskNature::Assessment)
    }

    async fn answer(&self, _question: &str, _n_words: usize) -> Result<String, ResourceError> {
        Ok(self.describe().unwrap_or_else(|| {
            format!(
                "Sensor {} has not recorded any readings yet.",
                self.unique_name
            )
        }))
    }

    async fn summarize(&self) -> Result<String, ResourceError> {
        Ok(format!(
            "Sensor {} measuring in {}, keeping the latest {} readings.",
            self.unique_name, self.unit, self.capacity
        ))
    }
}
