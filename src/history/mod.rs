//! Inspection History Store
//!
//! Append-only log of [`HistoryRecord`]s in Sled DB, with time-windowed
//! read paths and aggregates derived on demand.
//!
//! Key layout: `timestamp_nanos (u64 BE) ‖ sequence (u64 BE)`. Keys sort
//! chronologically, and records sharing a timestamp keep insertion order.
//! Value: JSON-serialized `HistoryRecord`.
//!
//! Appends are serialized behind a mutex so sequence allocation and insert
//! commit as one unit. Reads iterate Sled directly and never take that lock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ClassLabels;
use crate::types::{hourly_breakdown, HistoryRecord, HourlyBucket, InspectionResult, StatisticsSnapshot};

const KEY_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("timestamp {0} cannot be encoded as a history key")]
    Timestamp(DateTime<Utc>),
}

/// Durable, append-only inspection history.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<sled::Db>,
    append_lock: Arc<Mutex<()>>,
    flush_on_append: bool,
}

impl HistoryStore {
    /// Open or create the history store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P, flush_on_append: bool) -> Result<Self, HistoryError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        info!(path = %path_ref.display(), records = db.len(), "Inspection history opened");

        Ok(Self {
            db: Arc::new(db),
            append_lock: Arc::new(Mutex::new(())),
            flush_on_append,
        })
    }

    /// Persist the durable projection of `result`.
    pub fn append(&self, result: &InspectionResult) -> Result<(), HistoryError> {
        self.append_record(&HistoryRecord::from(result))
    }

    /// Persist one record as a single atomic insert.
    pub fn append_record(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let value = serde_json::to_vec(record)?;
        let nanos = timestamp_key(record.timestamp)?;

        {
            let _guard = self.append_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let seq = self.db.generate_id()?;
            self.db.insert(encode_key(nanos, seq), value)?;
        }

        if self.flush_on_append {
            self.db.flush()?;
        }

        debug!(
            id = %record.id,
            timestamp = %record.timestamp,
            class = %record.predicted_class,
            confidence = record.confidence,
            "History record appended"
        );
        Ok(())
    }

    /// Records with `timestamp >= now - window`, oldest first. A window
    /// reaching past the representable range returns the whole log.
    pub fn query(&self, window: Duration) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.query_since(window_cutoff(window))
    }

    /// Records with `timestamp >= cutoff`, oldest first.
    pub fn query_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<HistoryRecord>, HistoryError> {
        let start = match cutoff.timestamp_nanos_opt() {
            Some(n) if n > 0 => encode_key(n as u64, 0),
            Some(_) => encode_key(0, 0),
            // Beyond the representable range: nothing can be that recent
            None if cutoff > Utc::now() => return Ok(Vec::new()),
            None => encode_key(0, 0),
        };

        let mut records = Vec::new();
        for item in self.db.range(start..) {
            let (_key, value) = item?;
            if let Some(record) = decode_record(&value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Aggregate over `query(window)`.
    pub fn statistics(&self, window: Duration) -> Result<StatisticsSnapshot, HistoryError> {
        Ok(StatisticsSnapshot::from_records(&self.query(window)?))
    }

    /// Aggregate over `query_since(cutoff)`.
    pub fn statistics_since(&self, cutoff: DateTime<Utc>) -> Result<StatisticsSnapshot, HistoryError> {
        Ok(StatisticsSnapshot::from_records(&self.query_since(cutoff)?))
    }

    /// Per hour-of-day counts over `query(window)`.
    pub fn hourly_breakdown(&self, window: Duration) -> Result<Vec<HourlyBucket>, HistoryError> {
        Ok(hourly_breakdown(&self.query(window)?))
    }

    /// The most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut records = Vec::with_capacity(limit.min(1024));
        for item in self.db.iter().rev() {
            if records.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            if let Some(record) = decode_record(&value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Write `query(window)` as CSV:
    /// `timestamp,prediction,class_name,confidence,normal_prob,defect_prob`.
    pub fn export_csv<W: Write>(&self, window: Duration, labels: &ClassLabels, out: &mut W) -> Result<usize, HistoryError> {
        let records = self.query(window)?;
        let mut writer = csv::Writer::from_writer(out);
        for r in &records {
            writer.serialize(CsvRow {
                timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                prediction: r.predicted_class.index(),
                class_name: labels.label(r.predicted_class),
                confidence: r.confidence,
                normal_prob: r.class_probabilities.normal,
                defect_prob: r.class_probabilities.defective,
            })?;
        }
        if records.is_empty() {
            writer.write_record(CSV_HEADER)?;
        }
        writer.flush()?;
        Ok(records.len())
    }

    /// Total number of stored records.
    pub fn count(&self) -> usize {
        self.db.len()
    }

    /// Database size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), HistoryError> {
        self.db.flush()?;
        Ok(())
    }
}

const CSV_HEADER: [&str; 6] = ["timestamp", "prediction", "class_name", "confidence", "normal_prob", "defect_prob"];

/// One exported row; field order is the column order.
#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    prediction: usize,
    class_name: &'a str,
    confidence: f64,
    normal_prob: f64,
    defect_prob: f64,
}

/// `now - window`, saturating at the representable range.
fn window_cutoff(window: Duration) -> DateTime<Utc> {
    Utc::now().checked_sub_signed(window).unwrap_or(if window > Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

fn timestamp_key(ts: DateTime<Utc>) -> Result<u64, HistoryError> {
    ts.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or(HistoryError::Timestamp(ts))
}

fn encode_key(nanos: u64, seq: u64) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..8].copy_from_slice(&nanos.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn decode_record(value: &[u8]) -> Option<HistoryRecord> {
    match serde_json::from_slice::<HistoryRecord>(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping undecodable history record: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassProbabilities, DefectClass};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn open_temp() -> (tempfile::TempDir, HistoryStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(temp_dir.path().join("history.db"), true).unwrap();
        (temp_dir, store)
    }

    fn record(ts: DateTime<Utc>, class: DefectClass, confidence: f64) -> HistoryRecord {
        let other = 1.0 - confidence;
        HistoryRecord {
            id: Uuid::new_v4(),
            timestamp: ts,
            predicted_class: class,
            confidence,
            class_probabilities: match class {
                DefectClass::Normal => ClassProbabilities { normal: confidence, defective: other },
                DefectClass::Defective => ClassProbabilities { normal: other, defective: confidence },
            },
        }
    }

    #[test]
    fn test_open_empty() {
        let (_dir, store) = open_temp();
        assert_eq!(store.count(), 0);
        assert!(store.query(Duration::days(1)).unwrap().is_empty());
    }

    #[test]
    fn test_append_roundtrip_exact() {
        let (_dir, store) = open_temp();
        let r = record(Utc::now(), DefectClass::Defective, 0.912_345_678_901_234_5);
        store.append_record(&r).unwrap();

        let back = store.query(Duration::days(1)).unwrap();
        assert_eq!(back, vec![r]);
    }

    #[test]
    fn test_query_window_filters_old_records() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        store.append_record(&record(now - Duration::days(3), DefectClass::Normal, 0.9)).unwrap();
        store.append_record(&record(now - Duration::hours(2), DefectClass::Normal, 0.8)).unwrap();

        assert_eq!(store.query(Duration::days(1)).unwrap().len(), 1);
        assert_eq!(store.query(Duration::days(7)).unwrap().len(), 2);
    }

    #[test]
    fn test_chronological_order_and_equal_timestamps() {
        let (_dir, store) = open_temp();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let a = record(base + Duration::seconds(20), DefectClass::Normal, 0.7);
        let b = record(base, DefectClass::Normal, 0.6);
        let c = record(base, DefectClass::Defective, 0.9);
        store.append_record(&a).unwrap();
        store.append_record(&b).unwrap();
        store.append_record(&c).unwrap();

        let all = store.query_since(base - Duration::seconds(1)).unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, c.id, a.id]);
    }

    #[test]
    fn test_statistics_scenario() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        store.append_record(&record(now - Duration::minutes(30), DefectClass::Normal, 0.99)).unwrap();
        store.append_record(&record(now - Duration::minutes(20), DefectClass::Defective, 0.97)).unwrap();
        store.append_record(&record(now - Duration::minutes(10), DefectClass::Normal, 0.60)).unwrap();

        let stats = store.statistics(Duration::days(1)).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.normal, 2);
        assert_eq!(stats.defect, 1);
        assert!((stats.normal_rate - 66.7).abs() < 0.05);
        assert!((stats.defect_rate - 33.3).abs() < 0.05);
        assert!((stats.avg_confidence - 85.33).abs() < 0.01);
    }

    #[test]
    fn test_statistics_empty_window() {
        let (_dir, store) = open_temp();
        store
            .append_record(&record(Utc::now() - Duration::days(10), DefectClass::Defective, 0.9))
            .unwrap();

        let stats = store.statistics(Duration::days(1)).unwrap();
        assert_eq!(stats, StatisticsSnapshot::default());
        assert!(stats.normal_rate.is_finite() && stats.avg_confidence.is_finite());
    }

    #[test]
    fn test_wider_window_never_counts_fewer() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        for h in [1, 5, 30, 80, 200] {
            store
                .append_record(&record(now - Duration::hours(h), DefectClass::Normal, 0.9))
                .unwrap();
        }

        let windows = [Duration::hours(2), Duration::days(1), Duration::days(3), Duration::days(30)];
        let totals: Vec<usize> = windows
            .iter()
            .map(|w| store.statistics(*w).unwrap().total)
            .collect();
        assert!(totals.windows(2).all(|pair| pair[1] >= pair[0]), "{:?}", totals);
        assert_eq!(totals, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_concurrent_appends_each_appear_once() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        let r1 = record(now, DefectClass::Normal, 0.9);
        let r2 = record(now + Duration::milliseconds(1), DefectClass::Defective, 0.8);

        std::thread::scope(|s| {
            let h1 = s.spawn(|| store.append_record(&r1));
            let h2 = s.spawn(|| store.append_record(&r2));
            h1.join().unwrap().unwrap();
            h2.join().unwrap().unwrap();
        });

        let all = store.query_since(now - Duration::seconds(1)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, r1.id);
        assert_eq!(all[1].id, r2.id);
    }

    #[test]
    fn test_recent_newest_first() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        for i in 0..5 {
            store
                .append_record(&record(now - Duration::minutes(10 - i), DefectClass::Normal, 0.5 + i as f64 / 10.0))
                .unwrap();
        }

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
        assert!((recent[0].confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_undecodable_record_is_skipped() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        store.append_record(&record(now, DefectClass::Normal, 0.9)).unwrap();
        let nanos = timestamp_key(now).unwrap();
        store.db.insert(encode_key(nanos, u64::MAX), b"garbage".to_vec()).unwrap();

        assert_eq!(store.count(), 2);
        assert_eq!(store.query(Duration::days(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_export_csv() {
        let (_dir, store) = open_temp();
        let ts = Utc::now() - Duration::minutes(5);
        store.append_record(&record(ts, DefectClass::Defective, 0.75)).unwrap();

        let mut out = Vec::new();
        let labels = ClassLabels {
            normal: "OK".to_string(),
            defective: "NG, rejected".to_string(),
        };
        let written = store.export_csv(Duration::days(1), &labels, &mut out).unwrap();
        assert_eq!(written, 1);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,prediction,class_name,confidence,normal_prob,defect_prob");
        assert!(lines[1].contains(",1,\"NG, rejected\",0.75,"));
    }

    #[test]
    fn test_export_csv_quotes_line_breaks() {
        let (_dir, store) = open_temp();
        store.append_record(&record(Utc::now(), DefectClass::Defective, 0.9)).unwrap();
        store.append_record(&record(Utc::now(), DefectClass::Normal, 0.8)).unwrap();

        let labels = ClassLabels {
            normal: "OK\nline".to_string(),
            defective: "NG\rbad".to_string(),
        };
        let mut out = Vec::new();
        assert_eq!(store.export_csv(Duration::days(1), &labels, &mut out).unwrap(), 2);

        let mut reader = csv::Reader::from_reader(out.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "NG\rbad");
        assert_eq!(&rows[1][2], "OK\nline");
        assert!(rows.iter().all(|r| r.len() == 6));
    }

    #[test]
    fn test_export_csv_empty_window_writes_header() {
        let (_dir, store) = open_temp();
        let mut out = Vec::new();
        assert_eq!(store.export_csv(Duration::days(1), &ClassLabels::default(), &mut out).unwrap(), 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,prediction,class_name,confidence,normal_prob,defect_prob\n"
        );
    }

    #[test]
    fn test_unbounded_window_returns_everything() {
        let (_dir, store) = open_temp();
        let old = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap();
        store.append_record(&record(old, DefectClass::Normal, 0.9)).unwrap();
        store.append_record(&record(Utc::now(), DefectClass::Defective, 0.8)).unwrap();

        assert_eq!(store.query(Duration::max_value()).unwrap().len(), 2);
        assert_eq!(store.statistics(Duration::max_value()).unwrap().total, 2);
        let hourly: usize = store.hourly_breakdown(Duration::max_value()).unwrap().iter().map(|b| b.total()).sum();
        assert_eq!(hourly, 2);
        assert!(store.query(Duration::min_value()).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_preserves_records() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("history.db");
        let r = record(Utc::now(), DefectClass::Normal, 0.95);
        {
            let store = HistoryStore::open(&path, true).unwrap();
            store.append_record(&r).unwrap();
        }
        let store = HistoryStore::open(&path, true).unwrap();
        assert_eq!(store.query(Duration::days(1)).unwrap(), vec![r]);
    }
}
