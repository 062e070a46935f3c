// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Resolution of events that describe the same release twice, e.g. when an
//! event straddles two intervals or a tail is re-detected as its own event.

use log::debug;

use crate::features::SparkRecord;

// `later` starts within `earlier` and ends before it does, at an x position
// inside `earlier`'s full width.
fn superseded(later: &SparkRecord, earlier: &SparkRecord) -> bool {
    let half = earlier.full_width_um / 2.0;
    let x = later.x_position_um;
    let (t, end) = (later.time_position_ms,
                    later.time_position_ms + later.full_duration_ms);
    x >= earlier.x_position_um - half && x <= earlier.x_position_um + half
        && t >= earlier.time_position_ms
        && end < earlier.time_position_ms + earlier.full_duration_ms
}

// `later` starts no later than `earlier` and its half-maximum duration
// reaches `earlier`'s start, at an x position inside `earlier`'s FWHM.
fn contains(later: &SparkRecord, earlier: &SparkRecord) -> bool {
    let half = earlier.half_width_um / 2.0;
    let x = later.x_position_um;
    x >= earlier.x_position_um - half && x <= earlier.x_position_um + half
        && later.time_position_ms <= earlier.time_position_ms
        && later.time_position_ms + later.half_duration_ms >= earlier.time_position_ms
}

/// Tombstones redundant records in place; records are visited in detection
/// order and compared with every earlier record still valid. A record that
/// is superseded by an earlier one is dropped. Otherwise, each earlier
/// record it contains is dropped instead.
pub fn deduplicate(records: &mut [SparkRecord]) {
    for i in 0..records.len() {
        if !records[i].valid {
            continue;
        }
        let (earlier, rest) = records.split_at_mut(i);
        let current = &mut rest[0];
        if earlier.iter().any(|j| j.valid && superseded(current, j)) {
            debug!("Dropping event {} superseded by an earlier event", i);
            current.valid = false;
            continue;
        }
        for (index, j) in earlier.iter_mut().enumerate() {
            if j.valid && contains(current, j) {
                debug!("Dropping event {} contained in event {}", index, i);
                j.valid = false;
            }
        }
    }
}

/// Removes tombstoned records and numbers the survivors 1, 2, ... in
/// detection order.
pub fn compact(records: Vec<SparkRecord>) -> Vec<SparkRecord> {
    records.into_iter()
        .filter(|r| r.valid)
        .enumerate()
        .map(|(i, mut r)| {
            r.number = i as u32 + 1;
            r
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::rect::Rect;

    fn record(x: f32, t: f32, width: f32, duration: f32) -> SparkRecord {
        SparkRecord{
            number: 0,
            interval: 0,
            amplitude: 1.0,
            half_width_um: width / 2.0,
            half_duration_ms: duration / 2.0,
            full_width_um: width,
            full_duration_ms: duration,
            x_position_um: x,
            time_position_ms: t,
            time_to_peak_ms: 0.0,
            tau_ms: None,
            max_rise_rate: None,
            bounding_box: Rect::at(0, 0).of_size(1, 1),
            valid: true,
        }
    }

    #[test]
    fn test_contained_event_after_container() {
        let mut records = vec![record(10.0, 100.0, 4.0, 60.0),
                               record(10.5, 110.0, 2.0, 20.0)];
        deduplicate(&mut records);
        assert!(records[0].valid);
        assert!(!records[1].valid);
    }

    #[test]
    fn test_container_after_contained_event() {
        // The container is detected second and starts earlier.
        let mut records = vec![record(10.5, 110.0, 2.0, 20.0),
                               record(10.0, 100.0, 4.0, 60.0)];
        deduplicate(&mut records);
        assert!(!records[0].valid);
        assert!(records[1].valid);
    }

    #[test]
    fn test_separate_events_kept() {
        let mut records = vec![record(10.0, 100.0, 4.0, 60.0),
                               record(30.0, 100.0, 4.0, 60.0),
                               record(10.0, 400.0, 4.0, 60.0)];
        deduplicate(&mut records);
        assert!(records.iter().all(|r| r.valid));
    }

    #[test]
    fn test_tombstoned_records_ignored() {
        // The middle record is dropped by the first; the third would only
        // collide with the middle one.
        let mut records = vec![record(10.0, 100.0, 4.0, 60.0),
                               record(11.0, 120.0, 20.0, 30.0),
                               record(18.0, 125.0, 2.0, 10.0)];
        deduplicate(&mut records);
        assert!(records[0].valid);
        assert!(!records[1].valid);
        assert!(records[2].valid);
    }

    #[test]
    fn test_compact_and_idempotent() {
        let mut records = vec![record(10.0, 100.0, 4.0, 60.0),
                               record(10.5, 110.0, 2.0, 20.0),
                               record(30.0, 100.0, 4.0, 60.0),
                               record(29.0, 90.0, 4.0, 40.0),
                               record(50.0, 300.0, 4.0, 60.0)];
        deduplicate(&mut records);
        let first = compact(records);
        let numbers: Vec<u32> = first.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(first[1].x_position_um, 29.0);

        let mut again = first.clone();
        deduplicate(&mut again);
        assert_eq!(compact(again), first);
    }
}  // mod tests.
