//! Retrieval window selection over the remote day directories.
//!
//! Day directories are labelled `YYYY.MM.DD`. The format is fixed width and
//! zero padded, so label order and date order coincide and every comparison
//! here is a plain string comparison.

use crate::error::SyncError;
use chrono::{Duration, NaiveDate};

const DAY_FORMAT: &str = "%Y.%m.%d";

/// Formats a date as a day directory label.
pub fn day_label(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// Parses a day directory label, returning `None` for anything else.
pub fn parse_day_label(label: &str) -> Option<NaiveDate> {
    if label.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(label, DAY_FORMAT).ok()
}

/// Keeps the day labels of a directory listing, newest first.
pub fn day_labels<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut labels: Vec<String> = entries
        .into_iter()
        .map(Into::into)
        .filter(|name| parse_day_label(name).is_some())
        .collect();
    labels.sort_unstable();
    labels.reverse();
    labels.dedup();
    labels
}

/// Selects the day directories of one session.
///
/// `labels` must be sorted newest first. The window starts at the first label
/// at or before `today` and holds at most `delta` labels. `end`, when given,
/// drops the labels strictly older than it; it never extends the window.
pub fn resolve_window(
    labels: &[String],
    today: NaiveDate,
    delta: usize,
    end: Option<NaiveDate>,
) -> Result<Vec<String>, SyncError> {
    if delta == 0 {
        return Err(SyncError::InvalidWindow(
            "delta must be at least one day".to_string(),
        ));
    }
    let today_label = day_label(today);
    let start = labels
        .iter()
        .position(|label| label.as_str() <= today_label.as_str())
        .ok_or(SyncError::NoDataAvailable(today_label))?;

    let window = labels[start..].iter().take(delta);
    let days = match end {
        Some(end) => {
            let end_label = day_label(end);
            window
                .take_while(|label| label.as_str() >= end_label.as_str())
                .cloned()
                .collect()
        }
        None => window.cloned().collect(),
    };
    Ok(days)
}

/// Reports the days of `[today - delta, today)` absent from `window`.
///
/// Returns nothing when the window already holds `delta` days; 8 and 16 day
/// composites legitimately leave gaps.
pub fn missing_days(window: &[String], today: NaiveDate, delta: usize) -> Vec<String> {
    if window.len() == delta {
        return Vec::new();
    }
    (1..=delta as i64)
        .filter_map(|i| today.checked_sub_signed(Duration::days(i)))
        .map(day_label)
        .filter(|label| !window.contains(label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Daily labels from `first` to `last` inclusive, newest first.
    fn daily(first: NaiveDate, last: NaiveDate) -> Vec<String> {
        let mut labels = Vec::new();
        let mut day = last;
        while day >= first {
            labels.push(day_label(day));
            day = day.pred_opt().unwrap();
        }
        labels
    }

    #[test]
    fn test_day_labels_keeps_dates_newest_first() {
        let labels = day_labels(vec![
            "2020.01.01",
            "README",
            "2020.01.03",
            "2020.1.2",
            "2020.01.02",
            "2020.13.01",
        ]);
        assert_eq!(labels, vec!["2020.01.03", "2020.01.02", "2020.01.01"]);
    }

    #[test]
    fn test_window_starts_at_first_label_not_after_today() {
        let labels = daily(date(2020, 1, 1), date(2020, 1, 31));
        for (today, delta) in [(date(2020, 1, 20), 5), (date(2020, 1, 3), 10), (date(2020, 3, 1), 31)] {
            let window = resolve_window(&labels, today, delta, None).unwrap();
            let start = labels
                .iter()
                .position(|l| l.as_str() <= day_label(today).as_str())
                .unwrap();
            assert_eq!(window.len(), delta.min(labels.len() - start));
            assert_eq!(window.as_slice(), &labels[start..start + window.len()]);
        }
    }

    #[test]
    fn test_window_skips_gaps_in_composite_products() {
        let labels: Vec<String> = ["2020.01.17", "2020.01.09", "2020.01.01"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let window = resolve_window(&labels, date(2020, 1, 15), 10, None).unwrap();
        assert_eq!(window, vec!["2020.01.09", "2020.01.01"]);
    }

    #[test]
    fn test_end_date_truncates_ten_day_window_to_four() {
        let labels = daily(date(2020, 1, 1), date(2020, 1, 31));
        let full = resolve_window(&labels, date(2020, 1, 20), 10, None).unwrap();
        assert_eq!(full.len(), 10);

        // 5th entry is 2020.01.16, earlier than the end date
        let truncated =
            resolve_window(&labels, date(2020, 1, 20), 10, Some(date(2020, 1, 17))).unwrap();
        assert_eq!(truncated, vec!["2020.01.20", "2020.01.19", "2020.01.18", "2020.01.17"]);
        assert!(truncated.len() <= full.len());
    }

    #[test]
    fn test_end_date_never_extends_window() {
        let labels = daily(date(2020, 1, 1), date(2020, 1, 31));
        let window = resolve_window(&labels, date(2020, 1, 20), 3, Some(date(2020, 1, 2))).unwrap();
        assert_eq!(window, vec!["2020.01.20", "2020.01.19", "2020.01.18"]);
    }

    #[test]
    fn test_end_date_newer_than_today_empties_window() {
        let labels = daily(date(2020, 1, 1), date(2020, 1, 31));
        let window = resolve_window(&labels, date(2020, 1, 20), 5, Some(date(2020, 1, 25))).unwrap();
        assert!(window.is_empty());
    }

    #[test]
    fn test_window_shorter_than_delta_is_not_an_error() {
        let labels = daily(date(2020, 1, 1), date(2020, 1, 3));
        let window = resolve_window(&labels, date(2020, 1, 3), 10, None).unwrap();
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_no_label_before_today_is_fatal() {
        let labels = daily(date(2020, 1, 10), date(2020, 1, 31));
        let err = resolve_window(&labels, date(2020, 1, 5), 10, None).unwrap_err();
        assert!(matches!(err, SyncError::NoDataAvailable(ref day) if day == "2020.01.05"));

        let err = resolve_window(&[], date(2020, 1, 5), 10, None).unwrap_err();
        assert!(matches!(err, SyncError::NoDataAvailable(_)));
    }

    #[test]
    fn test_zero_delta_is_rejected() {
        let labels = daily(date(2020, 1, 1), date(2020, 1, 3));
        assert!(matches!(
            resolve_window(&labels, date(2020, 1, 3), 0, None),
            Err(SyncError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_missing_days() {
        let window = vec!["2020.01.09".to_string(), "2020.01.07".to_string()];
        let missing = missing_days(&window, date(2020, 1, 10), 3);
        assert_eq!(missing, vec!["2020.01.08"]);

        let complete = vec!["2020.01.09".to_string(), "2020.01.08".to_string()];
        assert!(missing_days(&complete, date(2020, 1, 10), 2).is_empty());
    }
}
