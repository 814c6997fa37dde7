//! Telemetry cache
//!
//! The subscription updater is the only writer. Each report produces a new
//! snapshot that replaces the old one in a single pointer swap, so readers
//! always observe one whole record.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Record served by `/heartbeat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Battery state of charge, percent
    pub charge: f64,
    pub temperature: f64,
    pub voltage: f64,
    /// Reports received since the gateway started; reconnects keep counting
    pub live_count: u64,
    pub object_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub record: TelemetryRecord,
    /// `None` until the first report arrives
    pub last_update: Option<DateTime<Utc>>,
    pub received_at: Option<Instant>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BmsState {
    pub soc: Option<f64>,
}

/// Low-state report as published on the robot's state topic
///
/// Only the fields the gateway reads are modelled; anything else is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct LowStateReport {
    #[serde(default)]
    pub bms_state: BmsState,
    pub temperature_ntc1: Option<f64>,
    pub power_v: Option<f64>,
    pub object_count: Option<u64>,
}

pub struct TelemetryCache {
    current: ArcSwap<TelemetrySnapshot>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TelemetrySnapshot::default()),
        }
    }

    /// Non-blocking read of the latest snapshot
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.current.load_full()
    }

    pub fn record(&self) -> TelemetryRecord {
        self.current.load().record
    }

    /// Fold one report into the cache
    ///
    /// Fields missing from the report keep their previous value.
    pub fn apply(&self, report: &LowStateReport) {
        let previous = self.current.load();
        let mut record = previous.record;

        if let Some(soc) = report.bms_state.soc {
            record.charge = soc;
        }
        if let Some(temperature) = report.temperature_ntc1 {
            record.temperature = temperature;
        }
        if let Some(voltage) = report.power_v {
            record.voltage = voltage;
        }
        if let Some(objects) = report.object_count {
            record.object_count = objects;
        }
        record.live_count += 1;

        self.current.store(Arc::new(TelemetrySnapshot {
            record,
            last_update: Some(Utc::now()),
            received_at: Some(Instant::now()),
        }));
    }
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn report(value: f64) -> LowStateReport {
        LowStateReport {
            bms_state: BmsState { soc: Some(value) },
            temperature_ntc1: Some(value),
            power_v: Some(value),
            object_count: None,
        }
    }

    #[test]
    fn test_zero_record_before_first_report() {
        let cache = TelemetryCache::new();
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.record, TelemetryRecord::default());
        assert!(snapshot.last_update.is_none());
    }

    #[test]
    fn test_report_mapping_keeps_missing_fields() {
        let cache = TelemetryCache::new();
        let first: LowStateReport = serde_json::from_str(
            r#"{"bms_state":{"soc":87.0},"temperature_ntc1":41.5,"power_v":48.2,"object_count":3,"tick":99}"#,
        )
        .unwrap();
        cache.apply(&first);

        let second: LowStateReport = serde_json::from_str(r#"{"power_v":47.9}"#).unwrap();
        cache.apply(&second);

        let record = cache.record();
        assert_eq!(record.charge, 87.0);
        assert_eq!(record.temperature, 41.5);
        assert_eq!(record.voltage, 47.9);
        assert_eq!(record.object_count, 3);
        assert_eq!(record.live_count, 2);
        assert!(cache.snapshot().last_update.is_some());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let json = serde_json::to_value(TelemetryRecord::default()).unwrap();
        assert!(json.get("liveCount").is_some());
        assert!(json.get("objectCount").is_some());
    }

    #[test]
    fn test_concurrent_reads_see_whole_records() {
        let cache = Arc::new(TelemetryCache::new());

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 1..=2000 {
                    cache.apply(&report(i as f64));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let r = cache.record();
                        assert_eq!(r.charge, r.temperature);
                        assert_eq!(r.temperature, r.voltage);
                        assert_eq!(r.voltage, r.live_count as f64);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cache.record().live_count, 2000);
    }
}
