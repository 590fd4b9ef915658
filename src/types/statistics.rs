//! Derived history aggregates: StatisticsSnapshot, HourlyBucket

use serde::{Deserialize, Serialize};

use super::{DefectClass, HistoryRecord};

/// Aggregate over a time window. Computed on demand, never stored.
///
/// Rates and `avg_confidence` are percentages. An empty window yields
/// the all-zero snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total: usize,
    pub normal: usize,
    pub defect: usize,
    pub normal_rate: f64,
    pub defect_rate: f64,
    pub avg_confidence: f64,
}

impl StatisticsSnapshot {
    pub fn from_records(records: &[HistoryRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let total = records.len();
        let defect = records
            .iter()
            .filter(|r| r.predicted_class == DefectClass::Defective)
            .count();
        let normal = total - defect;
        let confidence_sum: f64 = records.iter().map(|r| r.confidence).sum();

        let total_f = total as f64;
        Self {
            total,
            normal,
            defect,
            normal_rate: normal as f64 / total_f * 100.0,
            defect_rate: defect as f64 / total_f * 100.0,
            avg_confidence: confidence_sum / total_f * 100.0,
        }
    }

    pub const fn count(&self, class: DefectClass) -> usize {
        match class {
            DefectClass::Normal => self.normal,
            DefectClass::Defective => self.defect,
        }
    }
}

/// Inspections per hour of day (UTC), split by class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HourlyBucket {
    /// Hour of day, 0-23.
    pub hour: u32,
    pub normal: usize,
    pub defect: usize,
}

impl HourlyBucket {
    pub const fn total(&self) -> usize {
        self.normal + self.defect
    }
}

/// Group records by hour of day. Only hours with at least one record are
/// returned, in ascending hour order.
pub fn hourly_breakdown(records: &[HistoryRecord]) -> Vec<HourlyBucket> {
    use chrono::Timelike;

    let mut buckets = [HourlyBucket::default(); 24];
    for (hour, bucket) in buckets.iter_mut().enumerate() {
        bucket.hour = hour as u32;
    }

    for record in records {
        let bucket = &mut buckets[record.timestamp.hour() as usize];
        match record.predicted_class {
            DefectClass::Normal => bucket.normal += 1,
            DefectClass::Defective => bucket.defect += 1,
        }
    }

    buckets.into_iter().filter(|b| b.total() > 0).collect()
}
