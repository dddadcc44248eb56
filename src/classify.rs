//! Coarse place categories for clusters.
//!
//! Three signals are combined, strongest first:
//! 1. the export's own semantic hint (`HOME`, `INFERRED_WORK`, ...)
//! 2. the late-night heuristic: the cluster with the most overnight visits
//!    is home, if enough of its visits are overnight
//! 3. a keyword table matched against the looked-up address, business name,
//!    place name and place types

use std::fmt;
use std::str::FromStr;

use chrono::Timelike;
use log::debug;

use crate::cluster::ClusterSummary;
use crate::config::ClassifyConfig;
use crate::LocationSample;

/// Coarse place category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaceCategory {
    Home,
    Work,
    School,
    Business,
    Other,
}

impl PlaceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceCategory::Home => "Home",
            PlaceCategory::Work => "Work",
            PlaceCategory::School => "School",
            PlaceCategory::Business => "Business",
            PlaceCategory::Other => "Other",
        }
    }

    /// Map marker colour as a CSS hex string.
    pub fn color_hex(&self) -> &'static str {
        match self {
            PlaceCategory::Home => "#d62728",     // red
            PlaceCategory::Work => "#1f77b4",     // blue
            PlaceCategory::School => "#2ca02c",   // green
            PlaceCategory::Business => "#ff7f0e", // orange
            PlaceCategory::Other => "#9467bd",    // purple
        }
    }

    pub fn color_rgb(&self) -> (u8, u8, u8) {
        match self {
            PlaceCategory::Home => (0xd6, 0x27, 0x28),
            PlaceCategory::Work => (0x1f, 0x77, 0xb4),
            PlaceCategory::School => (0x2c, 0xa0, 0x2c),
            PlaceCategory::Business => (0xff, 0x7f, 0x0e),
            PlaceCategory::Other => (0x94, 0x67, 0xbd),
        }
    }
}

impl fmt::Display for PlaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" => Ok(PlaceCategory::Home),
            "work" => Ok(PlaceCategory::Work),
            "school" => Ok(PlaceCategory::School),
            "business" => Ok(PlaceCategory::Business),
            "other" => Ok(PlaceCategory::Other),
            other => Err(format!("unknown place category '{}'", other)),
        }
    }
}

/// What a lookup API said about a centroid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceInfo {
    pub name: Option<String>,
    pub types: Vec<String>,
    pub address: Option<String>,
    /// Point-of-interest name from reverse geocoding
    pub business_name: Option<String>,
}

impl PlaceInfo {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.types.is_empty() && self.address.is_none() && self.business_name.is_none()
    }

    /// Best display name: place name, then business name, then address.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.business_name.as_deref())
            .or(self.address.as_deref())
    }
}

// Checked in this order; the first table with a hit wins.
const KEYWORD_TABLE: &[(PlaceCategory, &[&str])] = &[
    (PlaceCategory::School, &["school", "university", "college", "academy", "institute"]),
    (
        PlaceCategory::Business,
        &["restaurant", "store", "shop", "cafe", "hotel", "mall", "company", "corporation"],
    ),
    (PlaceCategory::Work, &["office", "corporate", "headquarters", "firm"]),
];

/// Classify from looked-up text alone, by case-insensitive substring match.
///
/// ```
/// use visit_clusters::{PlaceCategory, PlaceInfo, classify::classify_keywords};
///
/// let info = PlaceInfo {
///     address: Some("85 Engineer's Way, University of Virginia".to_string()),
///     ..PlaceInfo::default()
/// };
/// assert_eq!(classify_keywords(Some(&info)), PlaceCategory::School);
/// assert_eq!(classify_keywords(None), PlaceCategory::Other);
/// ```
pub fn classify_keywords(info: Option<&PlaceInfo>) -> PlaceCategory {
    let Some(info) = info.filter(|i| !i.is_empty()) else {
        return PlaceCategory::Other;
    };

    let mut haystack = String::new();
    for part in [&info.address, &info.business_name, &info.name].into_iter().flatten() {
        haystack.push_str(&part.to_lowercase());
        haystack.push('\n');
    }
    for t in &info.types {
        haystack.push_str(&t.to_lowercase());
        haystack.push('\n');
    }

    KEYWORD_TABLE
        .iter()
        .find(|(_, words)| words.iter().any(|w| haystack.contains(w)))
        .map_or(PlaceCategory::Other, |(category, _)| *category)
}

/// Map an export semantic type to a category, if it names one.
pub fn category_from_hint(hint: &str) -> Option<PlaceCategory> {
    match hint.to_ascii_uppercase().as_str() {
        "HOME" | "INFERRED_HOME" => Some(PlaceCategory::Home),
        "WORK" | "INFERRED_WORK" => Some(PlaceCategory::Work),
        _ => None,
    }
}

/// True when a visit starts inside the night window (local time) or ends on a
/// later local date than it starts.
///
/// The window wraps midnight as `[night_start_hour, 24) ∪ [0, night_end_hour)`
/// when start > end. Otherwise it is the same-day span `[start, end)`, and equal
/// hours give an empty window.
pub fn is_overnight(sample: &LocationSample, config: &ClassifyConfig) -> bool {
    let Some(start) = sample.start_time else {
        return false;
    };

    if let Some(end) = sample.end_time {
        if end.date_naive() > start.date_naive() {
            return true;
        }
    }

    let hour = start.hour();
    let (from, to) = (config.night_start_hour, config.night_end_hour);
    if from > to {
        hour >= from || hour < to
    } else {
        hour >= from && hour < to
    }
}

/// Pick the home cluster by the late-night heuristic.
///
/// The cluster with the most overnight visits wins if at least
/// `home_night_fraction` of its visits are overnight. Ties go to the lower
/// cluster id.
pub fn pick_home(clusters: &[ClusterSummary], config: &ClassifyConfig) -> Option<usize> {
    let mut best: Option<&ClusterSummary> = None;
    for c in clusters.iter().filter(|c| c.overnight_visits > 0) {
        if best.map_or(true, |b| c.overnight_visits > b.overnight_visits) {
            best = Some(c);
        }
    }

    let home = best.filter(|c| c.overnight_fraction() >= config.home_night_fraction)?;
    debug!(
        "[Classify] Home candidate: cluster {} ({}/{} overnight)",
        home.cluster_id, home.overnight_visits, home.visits
    );
    Some(home.cluster_id)
}

/// Classify one cluster.
///
/// `home_cluster` is the result of [`pick_home`] over the whole run.
pub fn classify_place(
    cluster: &ClusterSummary,
    info: Option<&PlaceInfo>,
    home_cluster: Option<usize>,
    config: &ClassifyConfig,
) -> PlaceCategory {
    if config.use_semantic_hints {
        if let Some(category) = cluster.semantic_hint.as_deref().and_then(category_from_hint) {
            return category;
        }
    }
    if home_cluster == Some(cluster.cluster_id) {
        return PlaceCategory::Home;
    }
    classify_keywords(info)
}
