use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Pages ──────────────────────────────────────────────────────────────────

/// A creator's public bio-link page from the `pages` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub slug: String,
    pub display_name: Option<String>,
    pub created_at: NaiveDateTime,
}

// ── Schedules ──────────────────────────────────────────────────────────────

/// A time-based visibility rule attached to a link, stored as a JSON object
/// tagged by `type`. Every variant carries the timezone captured when the
/// rule was created; evaluation nonetheless uses the server's local clock
/// (see the `schedule` module).
///
/// An absent schedule, or any unrecognized `type`, means always visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Visible only on the listed weekdays (0 = Sunday .. 6 = Saturday).
    SpecificDays {
        days: Option<Vec<u32>>,
        timezone: Option<String>,
    },
    /// Visible only while the local time-of-day falls inside
    /// `[start_time, end_time]` inclusive ("HH:MM", 24-hour, zero-padded).
    TimeRange {
        start_time: Option<String>,
        end_time: Option<String>,
        timezone: Option<String>,
    },
    /// Visible only while the local date falls inside
    /// `[start_date, end_date]` inclusive ("YYYY-MM-DD").
    OneTime {
        start_date: Option<String>,
        end_date: Option<String>,
        timezone: Option<String>,
    },
    /// Catch-all: an explicit "always" rule or any unknown type.
    #[serde(other, rename = "always")]
    Always,
}

// ── A/B testing ────────────────────────────────────────────────────────────

/// The two competing title texts in an A/B test. A is the pre-existing
/// title, B is the challenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }

    pub fn from_db(s: &str) -> Option<Variant> {
        match s {
            "A" => Some(Variant::A),
            "B" => Some(Variant::B),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Running,
    Completed,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Running => "running",
            TestStatus::Completed => "completed",
        }
    }

    pub fn from_db(s: &str) -> Option<TestStatus> {
        match s {
            "running" => Some(TestStatus::Running),
            "completed" => Some(TestStatus::Completed),
            _ => None,
        }
    }
}

/// A/B test state assembled from a link's `test_*` columns. Present whenever
/// `test_status` is non-null, i.e. for both running and archived tests.
#[derive(Debug, Clone)]
pub struct TestData {
    pub variant_b_title: String,
    pub clicks_a: i64,
    pub clicks_b: i64,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub status: TestStatus,
    pub winner: Option<Variant>,
}

// ── Links ──────────────────────────────────────────────────────────────────

/// A single entry on a bio-link page, from the `links` table.
///
/// The A/B test state lives in flat `test_*` columns so the click counters
/// can be incremented atomically in SQL instead of read-modify-write on a
/// JSON blob.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub page_id: i64,
    pub title: String,
    pub url: String,
    pub icon: Option<String>,
    pub position: i64,
    pub pinned: bool,
    pub is_active: bool,
    pub schedule: Option<String>,
    pub test_variant: Option<String>,
    pub original_title: Option<String>,
    pub test_b_title: Option<String>,
    pub test_clicks_a: i64,
    pub test_clicks_b: i64,
    pub test_started_at: Option<NaiveDateTime>,
    pub test_ended_at: Option<NaiveDateTime>,
    pub test_status: Option<String>,
    pub test_winner: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Link {
    /// Parse the stored schedule JSON. Unparseable or absent JSON yields
    /// `None`, which the evaluator treats as always visible (fail-open).
    pub fn parsed_schedule(&self) -> Option<Schedule> {
        self.schedule
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Assemble the A/B test state from the flat columns, if any test has
    /// been started and not fully cleared.
    pub fn test_data(&self) -> Option<TestData> {
        let status = TestStatus::from_db(self.test_status.as_deref()?)?;
        Some(TestData {
            variant_b_title: self.test_b_title.clone().unwrap_or_default(),
            clicks_a: self.test_clicks_a,
            clicks_b: self.test_clicks_b,
            started_at: self.test_started_at,
            ended_at: self.test_ended_at,
            status,
            winner: self.test_winner.as_deref().and_then(Variant::from_db),
        })
    }

    /// `true` while a test is actively collecting clicks on this link.
    pub fn has_running_test(&self) -> bool {
        self.test_variant.is_some()
            && self.test_status.as_deref() == Some(TestStatus::Running.as_str())
    }

    /// The variant currently served to visitors. Always A while a test runs:
    /// the displayed `title` is left at the original text for every render.
    pub fn served_variant(&self) -> Option<Variant> {
        self.has_running_test().then_some(Variant::A)
    }

    /// The display text of a given variant.
    pub fn variant_title(&self, variant: Variant) -> &str {
        match variant {
            Variant::A => self.original_title.as_deref().unwrap_or(&self.title),
            Variant::B => self.test_b_title.as_deref().unwrap_or(&self.title),
        }
    }
}

// ── Click events ───────────────────────────────────────────────────────────

/// A single click event from the `clicks` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClickEvent {
    pub id: i64,
    pub page_id: i64,
    pub link_id: i64,
    pub visitor_id: Option<String>,
    pub variant: Option<String>,
    pub clicked_at: NaiveDateTime,
}

// ── Analytics ──────────────────────────────────────────────────────────────

/// Aggregated engagement numbers for a single page.
#[derive(Debug, Clone)]
pub struct PageAnalytics {
    pub total_clicks: i64,
    pub total_views: i64,
    /// Click counts bucketed by hour of day (index 0 = the midnight hour).
    pub clicks_by_hour: [i64; 24],
    /// The most recent individual click events, newest first.
    pub recent_clicks: Vec<ClickEvent>,
}

impl PageAnalytics {
    /// Clicks divided by views; 0.0 when no views were recorded.
    pub fn click_through_rate(&self) -> f64 {
        if self.total_views > 0 {
            self.total_clicks as f64 / self.total_views as f64
        } else {
            0.0
        }
    }

    /// The hour of day with the most clicks, or `None` with no clicks at all.
    pub fn peak_hour(&self) -> Option<u32> {
        let (hour, count) = self
            .clicks_by_hour
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)?;
        (*count > 0).then_some(hour as u32)
    }
}
