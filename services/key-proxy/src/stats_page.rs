//! HTML rendering of the daily usage report
//!
//! The page is an askama template at `templates/stats.html`; this module
//! shapes the report into view rows so the template only prints fields.

use askama::Template;
use key_pool::{KeyUsage, StatsReport};

/// Usage bar colour: green below 50%, yellow below 80%, red above.
fn bar_class(percent: f64) -> &'static str {
    if percent >= 80.0 {
        "bar-high"
    } else if percent >= 50.0 {
        "bar-medium"
    } else {
        "bar-low"
    }
}

/// Error ratio band: <10%, <30%, higher.
pub fn error_class(ratio: f64) -> &'static str {
    if ratio < 0.10 {
        "error-low"
    } else if ratio < 0.30 {
        "error-medium"
    } else {
        "error-high"
    }
}

/// Count against a limit. Without a limit the template prints "Unlimited".
pub struct Progress {
    pub count: u64,
    pub limited: bool,
    pub limit: u64,
    pub percent: String,
    pub bar_class: &'static str,
}

impl Progress {
    fn new(count: u64, limit: Option<u64>, percent: Option<f64>) -> Self {
        match (limit, percent) {
            (Some(limit), Some(percent)) => Self {
                count,
                limited: true,
                limit,
                percent: format!("{percent:.2}"),
                bar_class: bar_class(percent),
            },
            _ => Self {
                count,
                limited: false,
                limit: 0,
                percent: String::new(),
                bar_class: "",
            },
        }
    }
}

pub struct TotalView {
    pub model: String,
    pub progress: Progress,
}

pub struct RowView {
    pub model: String,
    pub progress: Progress,
    pub error_class: &'static str,
    pub error_count: u64,
    pub error_percent: String,
    pub banned: bool,
    pub last_used: String,
}

impl From<&KeyUsage> for RowView {
    fn from(row: &KeyUsage) -> Self {
        Self {
            model: row.model.clone(),
            progress: Progress::new(row.count, row.daily_quota, row.usage_percent),
            error_class: error_class(row.error_ratio),
            error_count: row.error_count,
            error_percent: format!("{:.1}", row.error_ratio * 100.0),
            banned: row.banned,
            last_used: row
                .last_used_local
                .clone()
                .unwrap_or_else(|| "Never".to_string()),
        }
    }
}

/// All rows for one key, rendered under a single spanning key cell.
pub struct KeyGroup {
    pub key: String,
    pub rows: Vec<RowView>,
}

#[derive(Template)]
#[template(path = "stats.html")]
pub struct StatsPage {
    pub day: String,
    pub time_zone: String,
    pub totals: Vec<TotalView>,
    pub groups: Vec<KeyGroup>,
}

impl From<&StatsReport> for StatsPage {
    fn from(report: &StatsReport) -> Self {
        // Group rows by key, keeping first-seen order.
        let mut groups: Vec<KeyGroup> = Vec::new();
        for row in &report.keys {
            match groups.iter_mut().find(|g| g.key == row.key) {
                Some(group) => group.rows.push(row.into()),
                None => groups.push(KeyGroup {
                    key: row.key.clone(),
                    rows: vec![row.into()],
                }),
            }
        }

        Self {
            day: report.day.clone(),
            time_zone: report.time_zone.clone(),
            totals: report
                .models
                .iter()
                .map(|t| TotalView {
                    model: t.model.clone(),
                    progress: Progress::new(t.count, t.combined_quota, t.usage_percent),
                })
                .collect(),
            groups,
        }
    }
}

/// Render the report as a standalone HTML page, one row group per key.
pub fn render(report: &StatsReport) -> askama::Result<String> {
    StatsPage::from(report).render()
}
