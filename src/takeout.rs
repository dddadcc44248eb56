//! Location-history export ingestion.
//!
//! Reads the "semantic location history" JSON produced by Google Takeout on
//! mobile devices: a top-level array of timeline entries, each holding a
//! `visit`, an `activity`, or something this crate ignores (`timelinePath`).
//!
//! ```json
//! [
//!   {
//!     "startTime": "2024-03-01T08:15:00.000-05:00",
//!     "endTime": "2024-03-01T16:40:00.000-05:00",
//!     "visit": {
//!       "hierarchyLevel": "0",
//!       "probability": "0.91",
//!       "topCandidate": {
//!         "placeID": "ChIJ...",
//!         "semanticType": "WORK",
//!         "probability": "0.87",
//!         "placeLocation": "geo:38.033600,-78.508000"
//!       }
//!     }
//!   }
//! ]
//! ```
//!
//! Entries are decoded one at a time, so a single malformed entry is skipped
//! and counted instead of failing the whole export.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::{GpsPoint, LocationSample};

// ============================================================================
// Raw export shape
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    start_time: Option<String>,
    end_time: Option<String>,
    visit: Option<RawVisit>,
    activity: Option<RawActivity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVisit {
    #[serde(default, deserialize_with = "lenient_f64")]
    probability: Option<f64>,
    top_candidate: Option<RawVisitCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVisitCandidate {
    #[serde(rename = "placeID")]
    place_id: Option<String>,
    semantic_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    probability: Option<f64>,
    place_location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActivity {
    start: Option<String>,
    end: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    distance_meters: Option<f64>,
    top_candidate: Option<RawActivityCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawActivityCandidate {
    #[serde(rename = "type")]
    activity_type: Option<String>,
}

/// Takeout writes most numbers as strings ("0.91"); accept either form.
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ============================================================================
// Parsed records
// ============================================================================

/// A stay at one place.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub location: GpsPoint,
    pub place_id: Option<String>,
    /// Provider hint such as `HOME`, `INFERRED_WORK`, `UNKNOWN`
    pub semantic_type: Option<String>,
    /// Confidence of the top candidate (0-1)
    pub probability: Option<f64>,
}

impl Visit {
    pub fn duration_hours(&self) -> Option<f64> {
        duration_hours(self.start_time.as_ref(), self.end_time.as_ref())
    }
}

/// A movement between two places.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub start: GpsPoint,
    pub end: GpsPoint,
    /// Transport mode, e.g. `in passenger vehicle`, `walking`
    pub activity_type: Option<String>,
    pub distance_meters: Option<f64>,
}

impl Activity {
    pub fn duration_hours(&self) -> Option<f64> {
        duration_hours(self.start_time.as_ref(), self.end_time.as_ref())
    }
}

fn duration_hours(
    start: Option<&DateTime<FixedOffset>>,
    end: Option<&DateTime<FixedOffset>>,
) -> Option<f64> {
    let (start, end) = (start?, end?);
    Some((*end - *start).num_seconds() as f64 / 3600.0)
}

/// One side of a [`DateRange`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateBound {
    /// An exact instant; entries are compared across offsets
    Instant(DateTime<FixedOffset>),
    /// A wall-clock time; entries are compared by their own local time
    Local(NaiveDateTime),
}

impl DateBound {
    /// Where `time` falls relative to this bound.
    fn compare(&self, time: &DateTime<FixedOffset>) -> Ordering {
        match self {
            DateBound::Instant(bound) => time.cmp(bound),
            DateBound::Local(bound) => time.naive_local().cmp(bound),
        }
    }
}

/// Half-open time window `[start, end)`; either side may be open.
///
/// Entries without a timestamp always pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRange {
    pub start: Option<DateBound>,
    pub end: Option<DateBound>,
}

impl DateRange {
    /// Unbounded range that keeps everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, time: Option<&DateTime<FixedOffset>>) -> bool {
        let Some(time) = time else {
            return true;
        };
        if let Some(start) = &self.start {
            if start.compare(time) == Ordering::Less {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if end.compare(time) != Ordering::Less {
                return false;
            }
        }
        true
    }
}

/// All usable entries of an export.
#[derive(Debug, Clone, Default)]
pub struct Export {
    pub visits: Vec<Visit>,
    pub activities: Vec<Activity>,
    /// Entries that looked like visits/activities but could not be decoded
    pub skipped: usize,
}

impl Export {
    /// Flatten visits (and optionally activity endpoints) into location samples.
    pub fn samples(&self, range: &DateRange, include_activities: bool) -> Vec<LocationSample> {
        let mut samples: Vec<LocationSample> = self
            .visits
            .iter()
            .filter(|v| range.contains(v.start_time.as_ref()))
            .map(|v| LocationSample {
                point: v.location,
                start_time: v.start_time,
                end_time: v.end_time,
                semantic_type: v.semantic_type.clone(),
            })
            .collect();

        if include_activities {
            for a in self.activities.iter().filter(|a| range.contains(a.start_time.as_ref())) {
                samples.push(LocationSample {
                    point: a.start,
                    start_time: a.start_time,
                    end_time: a.start_time,
                    semantic_type: None,
                });
                samples.push(LocationSample {
                    point: a.end,
                    start_time: a.end_time,
                    end_time: a.end_time,
                    semantic_type: None,
                });
            }
        }

        debug!(
            "[Takeout] {} samples from {} visits / {} activities",
            samples.len(),
            self.visits.len(),
            self.activities.len()
        );
        samples
    }

    /// Copy of this export keeping only entries that start inside `range`.
    pub fn filtered(&self, range: &DateRange) -> Export {
        Export {
            visits: self
                .visits
                .iter()
                .filter(|v| range.contains(v.start_time.as_ref()))
                .cloned()
                .collect(),
            activities: self
                .activities
                .iter()
                .filter(|a| range.contains(a.start_time.as_ref()))
                .cloned()
                .collect(),
            skipped: self.skipped,
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a `geo:lat,lng` location string.
///
/// The older `"38.0336°, -78.508°"` form is accepted as well.
///
/// ```
/// use visit_clusters::takeout::parse_geo_uri;
///
/// let p = parse_geo_uri("geo:38.033600,-78.508000").unwrap();
/// assert_eq!(p.latitude, 38.0336);
/// assert!(parse_geo_uri("geo:not-a-point").is_none());
/// ```
pub fn parse_geo_uri(value: &str) -> Option<GpsPoint> {
    let trimmed = value.trim();
    let body = trimmed.strip_prefix("geo:").unwrap_or(trimmed);
    let (lat, lng) = body.split_once(',')?;
    let lat: f64 = lat.trim().trim_end_matches('°').parse().ok()?;
    let lng: f64 = lng.trim().trim_end_matches('°').parse().ok()?;
    let point = GpsPoint::new(lat, lng);
    point.is_valid().then_some(point)
}

/// Parse an export timestamp.
///
/// RFC 3339 with offset is the normal form; a bare `YYYY-MM-DDTHH:MM:SS`
/// prefix is read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t);
    }
    let prefix = value.get(..19)?;
    let naive = NaiveDateTime::parse_from_str(prefix, "%Y-%m-%dT%H:%M:%S").ok()?;
    FixedOffset::east_opt(0)?.from_local_datetime(&naive).single()
}

/// Parse a date-range bound.
///
/// A full RFC 3339 timestamp is an exact instant. A bare `YYYY-MM-DD` date
/// (midnight) or `YYYY-MM-DDTHH:MM:SS` is a wall-clock time, matched against
/// each entry's local time the way the export's own dates read.
pub fn parse_date_bound(value: &str) -> Result<DateBound> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(DateBound::Instant(t));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateBound::Local(naive));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::InvalidParameters(format!("bad date '{}': {}", value, e)))?;
    date.and_hms_opt(0, 0, 0)
        .map(DateBound::Local)
        .ok_or_else(|| Error::InvalidParameters(format!("bad date '{}'", value)))
}

fn parse_time_field(field: Option<&String>, skipped_reason: &mut Option<String>) -> Option<DateTime<FixedOffset>> {
    let raw = field?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        *skipped_reason = Some(format!("bad timestamp '{}'", raw));
    }
    parsed
}

fn decode_entry(raw: RawEntry, export: &mut Export, index: usize) {
    let mut problem = None;
    let start_time = parse_time_field(raw.start_time.as_ref(), &mut problem);
    let end_time = parse_time_field(raw.end_time.as_ref(), &mut problem);

    if let Some(visit) = raw.visit {
        let candidate = visit.top_candidate;
        let location = candidate
            .as_ref()
            .and_then(|c| c.place_location.as_deref())
            .and_then(parse_geo_uri);

        match (location, problem) {
            (Some(location), None) => {
                let candidate = candidate.unwrap_or(RawVisitCandidate {
                    place_id: None,
                    semantic_type: None,
                    probability: None,
                    place_location: None,
                });
                export.visits.push(Visit {
                    start_time,
                    end_time,
                    location,
                    place_id: candidate.place_id,
                    semantic_type: candidate.semantic_type,
                    probability: candidate.probability.or(visit.probability),
                });
            }
            (_, problem) => {
                warn!(
                    "[Takeout] Skipping visit #{}: {}",
                    index,
                    problem.unwrap_or_else(|| "missing or malformed placeLocation".to_string())
                );
                export.skipped += 1;
            }
        }
    } else if let Some(activity) = raw.activity {
        let start = activity.start.as_deref().and_then(parse_geo_uri);
        let end = activity.end.as_deref().and_then(parse_geo_uri);

        match (start, end, problem) {
            (Some(start), Some(end), None) => export.activities.push(Activity {
                start_time,
                end_time,
                start,
                end,
                activity_type: activity.top_candidate.and_then(|c| c.activity_type),
                distance_meters: activity.distance_meters,
            }),
            (_, _, problem) => {
                warn!(
                    "[Takeout] Skipping activity #{}: {}",
                    index,
                    problem.unwrap_or_else(|| "missing or malformed start/end".to_string())
                );
                export.skipped += 1;
            }
        }
    }
}

/// Parse an export from its JSON text.
pub fn parse_export(json: &str) -> Result<Export> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let serde_json::Value::Array(entries) = value else {
        return Err(Error::InvalidExport(
            "expected a top-level JSON array of timeline entries".to_string(),
        ));
    };

    let mut export = Export::default();
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<RawEntry>(entry) {
            Ok(raw) => decode_entry(raw, &mut export, index),
            Err(e) => {
                warn!("[Takeout] Skipping entry #{}: {}", index, e);
                export.skipped += 1;
            }
        }
    }

    info!(
        "[Takeout] Parsed {} visits, {} activities ({} skipped)",
        export.visits.len(),
        export.activities.len(),
        export.skipped
    );
    Ok(export)
}

/// Read and parse an export file.
pub fn load_export(path: &Path) -> Result<Export> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_export(&text)
}
