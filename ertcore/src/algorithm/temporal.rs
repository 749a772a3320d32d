use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A time-axis query: an exact or nearby timestamp, its textual form, a
/// column index, or a sequence of any of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TimeQuery {
    Timestamp(NaiveDateTime),
    Text(String),
    Index(usize),
    Sequence(Vec<TimeQuery>),
}

impl From<usize> for TimeQuery {
    fn from(index: usize) -> Self {
        TimeQuery::Index(index)
    }
}

impl From<NaiveDateTime> for TimeQuery {
    fn from(timestamp: NaiveDateTime) -> Self {
        TimeQuery::Timestamp(timestamp)
    }
}

impl From<&str> for TimeQuery {
    fn from(text: &str) -> Self {
        TimeQuery::Text(text.to_string())
    }
}

impl From<Vec<usize>> for TimeQuery {
    fn from(indices: Vec<usize>) -> Self {
        TimeQuery::Sequence(indices.into_iter().map(TimeQuery::Index).collect())
    }
}

/// Result of resolving a query: one column index or an ordered list.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedTimes {
    Single(usize),
    Many(Vec<usize>),
}

impl ResolvedTimes {
    pub fn into_vec(self) -> Vec<usize> {
        match self {
            ResolvedTimes::Single(index) => vec![index],
            ResolvedTimes::Many(indices) => indices,
        }
    }
}

const TEXT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 timestamp. Accepts `T` or space as the date/time
/// separator, optional seconds and fractions, and bare dates (midnight).
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let trimmed = text.trim();
    for format in TEXT_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(t);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(CoreError::TimeParse { text: trimmed.to_string() })
}

/// Resolve a query against a time axis.
///
/// Timestamps and text map to the index with the smallest absolute time
/// difference (linear scan, first occurrence wins ties), integer indices
/// pass through unchanged, sequences resolve element-wise in order.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use ertcore::algorithm::temporal::{resolve, ResolvedTimes, TimeQuery};
///
/// let times: Vec<_> = (1..=3)
///     .map(|d| {
///         NaiveDate::from_ymd_opt(2024, 5, d)
///             .unwrap()
///             .and_hms_opt(12, 0, 0)
///             .unwrap()
///     })
///     .collect();
///
/// let hit = resolve(&times, &TimeQuery::from("2024-05-02 11:00")).unwrap();
/// assert_eq!(hit, ResolvedTimes::Single(1));
/// ```
pub fn resolve(times: &[NaiveDateTime], query: &TimeQuery) -> Result<ResolvedTimes> {
    match query {
        TimeQuery::Index(index) => Ok(ResolvedTimes::Single(*index)),
        TimeQuery::Timestamp(timestamp) => Ok(ResolvedTimes::Single(nearest(times, *timestamp)?)),
        TimeQuery::Text(text) => {
            let timestamp = parse_timestamp(text)?;
            Ok(ResolvedTimes::Single(nearest(times, timestamp)?))
        }
        TimeQuery::Sequence(queries) => {
            let mut indices = Vec::with_capacity(queries.len());
            for q in queries {
                indices.extend(resolve(times, q)?.into_vec());
            }
            Ok(ResolvedTimes::Many(indices))
        }
    }
}

/// Resolve a query that must denote exactly one timestep.
pub fn resolve_single(times: &[NaiveDateTime], query: &TimeQuery) -> Result<usize> {
    match resolve(times, query)? {
        ResolvedTimes::Single(index) => Ok(index),
        ResolvedTimes::Many(indices) => Err(CoreError::NotScalar { count: indices.len() }),
    }
}

fn nearest(times: &[NaiveDateTime], target: NaiveDateTime) -> Result<usize> {
    if times.is_empty() {
        return Err(CoreError::EmptyTimeAxis);
    }
    let mut best = 0;
    let mut best_delta = i64::MAX;
    for (index, time) in times.iter().enumerate() {
        let delta = (*time - target).num_milliseconds().abs();
        if delta < best_delta {
            best = index;
            best_delta = delta;
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_axis(days: u32) -> Vec<NaiveDateTime> {
        (1..=days)
            .map(|d| {
                NaiveDate::from_ymd_opt(2024, 3, d)
                    .unwrap()
                    .and_hms_opt(8, 0, 0)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_index_passes_through() {
        let times = day_axis(3);
        // No bounds check here; out-of-range indices fail downstream.
        assert_eq!(resolve(&times, &TimeQuery::Index(7)).unwrap(), ResolvedTimes::Single(7));
    }

    #[test]
    fn test_timestamp_resolves_to_nearest() {
        let times = day_axis(4);
        let target = NaiveDate::from_ymd_opt(2024, 3, 3)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        // 2024-03-03 02:00 is 6 h before day 3's sample and 18 h after day 2's.
        assert_eq!(resolve(&times, &target.into()).unwrap(), ResolvedTimes::Single(2));
    }

    #[test]
    fn test_tie_prefers_first_occurrence() {
        let times = day_axis(2);
        let midpoint = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        assert_eq!(resolve(&times, &midpoint.into()).unwrap(), ResolvedTimes::Single(0));
    }

    #[test]
    fn test_text_formats() {
        let times = day_axis(4);
        for text in ["2024-03-02T08:00:00", "2024-03-02 08:00", "2024-03-02"] {
            assert_eq!(
                resolve(&times, &TimeQuery::from(text)).unwrap(),
                ResolvedTimes::Single(1),
                "failed for {text}"
            );
        }
    }

    #[test]
    fn test_unparseable_text_fails() {
        let times = day_axis(2);
        let err = resolve(&times, &TimeQuery::from("yesterday")).unwrap_err();
        assert!(matches!(err, CoreError::TimeParse { .. }));
    }

    #[test]
    fn test_sequence_resolves_element_wise() {
        let times = day_axis(4);
        let query = TimeQuery::Sequence(vec![
            TimeQuery::Index(3),
            TimeQuery::from("2024-03-01"),
            TimeQuery::Index(1),
        ]);
        assert_eq!(
            resolve(&times, &query).unwrap(),
            ResolvedTimes::Many(vec![3, 0, 1])
        );
    }

    #[test]
    fn test_resolve_single_rejects_sequence() {
        let times = day_axis(2);
        let err = resolve_single(&times, &TimeQuery::from(vec![0, 1])).unwrap_err();
        assert!(matches!(err, CoreError::NotScalar { count: 2 }));
    }

    #[test]
    fn test_empty_axis_fails_for_timestamps() {
        let err = resolve(&[], &TimeQuery::from("2024-03-01")).unwrap_err();
        assert!(matches!(err, CoreError::EmptyTimeAxis));
    }
}
