//! Multi-device presence timelines.
//!
//! Readings are partitioned by device, then each device's stream is split into
//! maximal online runs (sessions) and maximal offline runs (gaps). Every
//! reading lands in exactly one of the two.

use super::classifier::DEEP_SLEEP_THRESHOLD_MS;
use super::risk::PrivacyRisk;
use crate::sampler::Sample;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Offline run length, in readings, above which the period counts as sustained.
pub const DEFAULT_OFFLINE_GAP_THRESHOLD: usize = 20;

/// One online/offline observation of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceReading {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub online: bool,
}

/// A contiguous run of readings with the same presence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    /// Index of the first reading of the run within the device's readings
    pub start_index: usize,
    /// Number of readings in the run
    pub length: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Aggregate metrics for one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineSummary {
    pub no_data: bool,
    pub total_readings: usize,
    pub online_readings: usize,
    pub session_count: usize,
    pub online_percentage: f64,
    pub longest_offline_gap: usize,
    pub average_session_length: f64,
    pub sustained_offline_period: bool,
    /// Risk graded from `online_percentage`
    pub availability_risk: PrivacyRisk,
}

/// Segmented presence history of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceTimeline {
    pub device_id: String,
    pub readings: Vec<PresenceReading>,
    pub sessions: Vec<Span>,
    pub offline_gaps: Vec<Span>,
    pub summary: TimelineSummary,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub offline_gap_threshold: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            offline_gap_threshold: DEFAULT_OFFLINE_GAP_THRESHOLD,
        }
    }
}

/// Partition `readings` by device and segment each device independently.
/// Relative order within a device is preserved.
pub fn track(readings: &[PresenceReading], config: &TrackerConfig) -> BTreeMap<String, DeviceTimeline> {
    let mut by_device: BTreeMap<String, Vec<PresenceReading>> = BTreeMap::new();
    for reading in readings {
        by_device
            .entry(reading.device_id.clone())
            .or_default()
            .push(reading.clone());
    }

    by_device
        .into_iter()
        .map(|(device_id, readings)| {
            let timeline = track_device(&device_id, readings, config);
            (device_id, timeline)
        })
        .collect()
}

/// Segment one device's readings, already in order.
pub fn track_device(device_id: &str, readings: Vec<PresenceReading>, config: &TrackerConfig) -> DeviceTimeline {
    let mut sessions: Vec<Span> = Vec::new();
    let mut offline_gaps: Vec<Span> = Vec::new();

    // Open run: (online, start index)
    let mut open: Option<(bool, usize)> = None;

    for (i, reading) in readings.iter().enumerate() {
        match open {
            Some((online, _)) if online == reading.online => {}
            Some((online, start)) => {
                close_run(&readings, online, start, i, &mut sessions, &mut offline_gaps);
                open = Some((reading.online, i));
            }
            None => open = Some((reading.online, i)),
        }
    }
    if let Some((online, start)) = open {
        close_run(&readings, online, start, readings.len(), &mut sessions, &mut offline_gaps);
    }

    let summary = summarize(readings.len(), &sessions, &offline_gaps, config);

    DeviceTimeline {
        device_id: device_id.to_string(),
        readings,
        sessions,
        offline_gaps,
        summary,
    }
}

fn close_run(
    readings: &[PresenceReading],
    online: bool,
    start: usize,
    end: usize,
    sessions: &mut Vec<Span>,
    offline_gaps: &mut Vec<Span>,
) {
    let span = Span {
        start_index: start,
        length: end - start,
        started_at: readings[start].timestamp,
        ended_at: readings[end - 1].timestamp,
    };
    if online {
        sessions.push(span);
    } else {
        offline_gaps.push(span);
    }
}

fn summarize(total: usize, sessions: &[Span], offline_gaps: &[Span], config: &TrackerConfig) -> TimelineSummary {
    if total == 0 {
        return TimelineSummary {
            no_data: true,
            ..Default::default()
        };
    }

    let online_readings: usize = sessions.iter().map(|s| s.length).sum();
    let longest_offline_gap = offline_gaps.iter().map(|g| g.length).max().unwrap_or(0);
    let average_session_length = if sessions.is_empty() {
        0.0
    } else {
        online_readings as f64 / sessions.len() as f64
    };

    let online_percentage = online_readings as f64 / total as f64 * 100.0;

    TimelineSummary {
        no_data: false,
        total_readings: total,
        online_readings,
        session_count: sessions.len(),
        online_percentage,
        availability_risk: PrivacyRisk::from_online_percentage(online_percentage),
        longest_offline_gap,
        average_session_length,
        sustained_offline_period: longest_offline_gap > config.offline_gap_threshold,
    }
}

/// Derive presence readings from a probe session's samples.
///
/// A `Sent` sample faster than the deep-sleep threshold counts as online;
/// deep-sleep latencies and lost ticks count as offline.
pub fn readings_from_samples(device_id: &str, samples: &[Sample]) -> Vec<PresenceReading> {
    samples
        .iter()
        .map(|s| PresenceReading {
            timestamp: s.timestamp,
            device_id: device_id.to_string(),
            online: s.latency().is_some_and(|rtt| rtt < DEEP_SLEEP_THRESHOLD_MS),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn readings(device: &str, pattern: &[bool]) -> Vec<PresenceReading> {
        let base = Utc::now();
        pattern
            .iter()
            .enumerate()
            .map(|(i, online)| PresenceReading {
                timestamp: base + Duration::seconds(i as i64),
                device_id: device.to_string(),
                online: *online,
            })
            .collect()
    }

    fn lengths(spans: &[Span]) -> Vec<usize> {
        spans.iter().map(|s| s.length).collect()
    }

    #[test]
    fn test_empty_is_no_data() {
        let timeline = track_device("phone", Vec::new(), &TrackerConfig::default());
        assert!(timeline.summary.no_data);
        assert_eq!(timeline.summary.online_percentage, 0.0);
        assert_eq!(timeline.summary.average_session_length, 0.0);
        assert!(timeline.sessions.is_empty() && timeline.offline_gaps.is_empty());
        assert!(track(&[], &TrackerConfig::default()).is_empty());
    }

    #[test]
    fn test_mixed_scenario() {
        let r = readings("phone", &[true, true, false, false, false, true]);
        let timeline = track_device("phone", r, &TrackerConfig::default());

        assert_eq!(timeline.sessions[0].length, 2);
        // The trailing online reading is closed at stream end
        assert_eq!(lengths(&timeline.sessions), vec![2, 1]);
        assert_eq!(lengths(&timeline.offline_gaps), vec![3]);
        assert!((timeline.summary.online_percentage - 50.0).abs() < 1e-9);
        assert_eq!(timeline.summary.longest_offline_gap, 3);
        assert_eq!(timeline.summary.session_count, 2);
        assert!(!timeline.summary.sustained_offline_period);
    }

    #[test]
    fn test_alternating_readings() {
        for n in [2usize, 7, 10, 31] {
            let pattern: Vec<bool> = (0..n).map(|i| i % 2 == 1).collect();
            let timeline = track_device("phone", readings("phone", &pattern), &TrackerConfig::default());
            assert_eq!(timeline.summary.session_count, n / 2, "n = {}", n);
            assert_eq!(timeline.summary.average_session_length, 1.0);
        }
    }

    #[test]
    fn test_starting_online_counts_as_session() {
        let timeline = track_device("phone", readings("phone", &[true, true, true]), &TrackerConfig::default());
        assert_eq!(timeline.summary.session_count, 1);
        assert_eq!(timeline.summary.online_percentage, 100.0);
        assert_eq!(timeline.summary.longest_offline_gap, 0);
    }

    #[test]
    fn test_spans_partition_readings() {
        let pattern = [false, true, true, false, true, false, false, true, true, true];
        let timeline = track_device("phone", readings("phone", &pattern), &TrackerConfig::default());

        let mut covered = vec![0u32; pattern.len()];
        for span in timeline.sessions.iter() {
            for i in span.start_index..span.start_index + span.length {
                assert!(pattern[i]);
                covered[i] += 1;
            }
        }
        for span in timeline.offline_gaps.iter() {
            for i in span.start_index..span.start_index + span.length {
                assert!(!pattern[i]);
                covered[i] += 1;
            }
        }
        assert!(covered.iter().all(|c| *c == 1));
    }

    #[test]
    fn test_span_timestamps() {
        let r = readings("phone", &[false, true, true, true]);
        let first = r[1].timestamp;
        let last = r[3].timestamp;
        let timeline = track_device("phone", r, &TrackerConfig::default());
        assert_eq!(timeline.sessions[0].started_at, first);
        assert_eq!(timeline.sessions[0].ended_at, last);
    }

    #[test]
    fn test_availability_risk() {
        let timeline = track_device("phone", readings("phone", &[true; 9]), &TrackerConfig::default());
        assert_eq!(timeline.summary.availability_risk, PrivacyRisk::Critical);

        let mut pattern = vec![true; 3];
        pattern.extend(vec![false; 7]);
        let timeline = track_device("phone", readings("phone", &pattern), &TrackerConfig::default());
        assert_eq!(timeline.summary.availability_risk, PrivacyRisk::Medium);

        let timeline = track_device("phone", Vec::new(), &TrackerConfig::default());
        assert_eq!(timeline.summary.availability_risk, PrivacyRisk::Low);
    }

    #[test]
    fn test_sustained_offline_period() {
        let mut pattern = vec![true; 3];
        pattern.extend(vec![false; 21]);
        pattern.push(true);
        let timeline = track_device("phone", readings("phone", &pattern), &TrackerConfig::default());
        assert!(timeline.summary.sustained_offline_period);

        let strict = TrackerConfig {
            offline_gap_threshold: 21,
        };
        let timeline = track_device("phone", readings("phone", &pattern), &strict);
        assert!(!timeline.summary.sustained_offline_period);
    }

    #[test]
    fn test_partition_by_device() {
        let mut all = readings("phone", &[true, false, true]);
        all.extend(readings("laptop", &[false, false]));
        all.extend(readings("phone", &[true]));

        let timelines = track(&all, &TrackerConfig::default());
        assert_eq!(timelines.len(), 2);

        let phone = &timelines["phone"];
        assert_eq!(phone.summary.total_readings, 4);
        assert_eq!(lengths(&phone.sessions), vec![1, 2]);

        let laptop = &timelines["laptop"];
        assert_eq!(laptop.summary.session_count, 0);
        assert_eq!(laptop.summary.longest_offline_gap, 2);
    }

    #[test]
    fn test_readings_from_samples() {
        let now = Utc::now();
        let samples = vec![
            Sample::sent(0, now, 120.0),
            Sample::sent(1, now, 2500.0),
            Sample::lost(2, now),
            Sample::sent(3, now, 1999.0),
        ];
        let online: Vec<bool> = readings_from_samples("phone", &samples)
            .iter()
            .map(|r| r.online)
            .collect();
        assert_eq!(online, vec![true, false, false, true]);
    }
}
