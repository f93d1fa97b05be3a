use chrono::{Datelike, Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DATE_FMT: &str = "%Y-%m-%d";

/// One logged study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub date: String,
    pub hours: f64,
    pub logged_at: String,
}

/// The learning-stats file. Unknown keys are kept in `extra` so that
/// updating the goal never drops fields written by other versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_goal_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_week_start: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learning_sessions: Vec<Session>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StatsRecord {
    /// Sessions on or after the given `YYYY-MM-DD` date. Zero-padded
    /// dates compare correctly as strings.
    pub fn sessions_since<'a>(&'a self, start: &str) -> Vec<&'a Session> {
        self.learning_sessions
            .iter()
            .filter(|s| s.date.as_str() >= start)
            .collect()
    }

    pub fn hours_since(&self, start: &str) -> f64 {
        // Not `.sum()`: since Rust 1.84 the empty float sum is `-0.0`,
        // which would render as "-0.0 hours" in the reports.
        self.sessions_since(start)
            .iter()
            .map(|s| s.hours)
            .fold(0.0, |total, hours| total + hours)
    }
}

/// Monday of the week the given date falls in.
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

pub fn current_week_start() -> NaiveDate {
    week_start_of(Local::now().date_naive())
}

pub fn today_string() -> String {
    Local::now().format(DATE_FMT).to_string()
}

pub fn now_timestamp() -> String {
    Local::now().to_rfc3339()
}

/// Days left in the current week, counting today. Monday gives 7,
/// Sunday gives 1.
pub fn days_remaining_in_week(date: NaiveDate) -> u32 {
    7 - date.weekday().num_days_from_monday()
}

/// Persists the stats record as pretty-printed JSON.
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// None when the file does not exist yet. A file that exists but
    /// cannot be parsed is also treated as absent, with a warning.
    pub fn load(&self) -> Option<StatsRecord> {
        if !self.path.exists() {
            return None;
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(
                        "Could not parse {}, treating as empty: {}",
                        self.path.display(),
                        e
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Error reading {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, record: &StatsRecord) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(record)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn week_start_lands_on_monday() {
        // 2025-10-22 is a Wednesday
        let wednesday = NaiveDate::from_ymd_opt(2025, 10, 22).unwrap();
        assert_eq!(
            week_start_of(wednesday),
            NaiveDate::from_ymd_opt(2025, 10, 20).unwrap()
        );

        let monday = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        assert_eq!(week_start_of(monday), monday);

        let sunday = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
        assert_eq!(
            week_start_of(sunday),
            NaiveDate::from_ymd_opt(2025, 10, 20).unwrap()
        );
    }

    #[test]
    fn days_remaining_counts_today() {
        let monday = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        assert_eq!(days_remaining_in_week(monday), 7);
        let sunday = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
        assert_eq!(days_remaining_in_week(sunday), 1);
    }

    #[test]
    fn week_filter_includes_monday_and_drops_older_sessions() {
        let record = StatsRecord {
            learning_sessions: vec![
                Session {
                    date: "2025-10-20".to_string(),
                    hours: 1.5,
                    logged_at: "2025-10-20T09:00:00+00:00".to_string(),
                },
                Session {
                    date: "2025-10-19".to_string(),
                    hours: 4.0,
                    logged_at: "2025-10-19T09:00:00+00:00".to_string(),
                },
                Session {
                    date: "2025-09-20".to_string(),
                    hours: 2.0,
                    logged_at: "2025-09-20T09:00:00+00:00".to_string(),
                },
            ],
            ..Default::default()
        };

        let this_week = record.sessions_since("2025-10-20");
        assert_eq!(this_week.len(), 1);
        assert_eq!(this_week[0].date, "2025-10-20");
        assert_eq!(record.hours_since("2025-10-20"), 1.5);
        assert_eq!(record.hours_since("2025-09-01"), 7.5);
    }

    #[test]
    fn unknown_keys_survive_a_goal_update() {
        let dir = tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));

        let seeded: StatsRecord = serde_json::from_value(json!({
            "weekly_goal_hours": 3.0,
            "some_future_field": {"nested": true},
            "notes": "imported"
        }))
        .unwrap();
        store.save(&seeded).unwrap();

        let mut record = store.load().unwrap();
        record.weekly_goal_hours = Some(6.0);
        record.goal_updated_at = Some(now_timestamp());
        store.save(&record).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.weekly_goal_hours, Some(6.0));
        assert_eq!(reloaded.extra["some_future_field"], json!({"nested": true}));
        assert_eq!(reloaded.extra["notes"], json!("imported"));
    }

    #[test]
    fn missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        assert!(store.load().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn corrupt_file_treated_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "][").unwrap();
        assert!(StatsStore::new(&path).load().is_none());
    }

    #[test]
    fn goal_only_record_serializes_without_session_key() {
        let record = StatsRecord {
            weekly_goal_hours: Some(5.0),
            ..Default::default()
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("learning_sessions").is_none());
        assert_eq!(value["weekly_goal_hours"], json!(5.0));
    }
}
