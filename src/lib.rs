//! # Visit Clusters
//!
//! Find the places that matter in a personal location-history export.
//!
//! This library provides:
//! - Parsing of Google Takeout semantic location history
//! - DBSCAN clustering of visit points with a haversine radius
//! - Place lookups against the Google Places / Geocoding APIs with rate limiting
//! - Home / Work / School / Business classification
//! - CSV, GeoJSON, HTML and SVG output
//!
//! ## Features
//!
//! - **`parallel`** - Parallel neighbour search with rayon
//! - **`http`** - HTTP client for place lookups
//! - **`cli`** - The `visit-clusters` binary
//!
//! ## Quick Start
//!
//! ```rust
//! use visit_clusters::{GpsPoint, LocationSample, ClusterConfig, ClassifyConfig, cluster};
//!
//! // Six visits to the same coffee shop, one trip elsewhere
//! let mut samples: Vec<LocationSample> = (0..6)
//!     .map(|i| LocationSample::at(GpsPoint::new(38.0336 + i as f64 * 0.00001, -78.5080)))
//!     .collect();
//! samples.push(LocationSample::at(GpsPoint::new(40.7128, -74.0060)));
//!
//! let config = ClusterConfig::default();
//! let points: Vec<GpsPoint> = samples.iter().map(|s| s.point).collect();
//! let labels = cluster::dbscan(&points, config.eps_meters, config.min_samples);
//! let clusters = cluster::summarize_clusters(&samples, &labels, &ClassifyConfig::default());
//!
//! assert_eq!(clusters.len(), 1);
//! assert_eq!(clusters[0].visits, 6);
//! ```

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod geo_utils;

pub mod takeout;
pub use takeout::{DateBound, DateRange, Export, Visit, Activity, load_export, parse_export};

pub mod cluster;
pub use cluster::{ClusterSummary, dbscan, significant, summarize_clusters};

pub mod classify;
pub use classify::{PlaceCategory, PlaceInfo, classify_place};

pub mod config;
pub use config::{Config, ClusterConfig, ClassifyConfig, PlacesConfig, PlacesProvider};

pub mod pipeline;
pub use pipeline::{Analysis, LabeledPlace, label_places};

pub mod report;
pub use report::PlaceRecord;
pub mod render;

// HTTP module for place lookups
#[cfg(feature = "http")]
pub mod places;

#[cfg(feature = "http")]
pub use places::{PlaceLookup, PlaceRequest, PlacesClient};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use visit_clusters::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Grow every side by `degrees`.
    pub fn padded(&self, degrees: f64) -> Bounds {
        Bounds {
            min_lat: self.min_lat - degrees,
            max_lat: self.max_lat + degrees,
            min_lng: self.min_lng - degrees,
            max_lng: self.max_lng + degrees,
        }
    }
}

/// One raw GPS observation from the export.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub point: GpsPoint,
    /// When the visit started (activity endpoints use the endpoint time)
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
    /// Provider semantic hint, if any (`HOME`, `WORK`, ...)
    pub semantic_type: Option<String>,
}

impl LocationSample {
    /// A sample with no time or semantic information.
    pub fn at(point: GpsPoint) -> Self {
        Self {
            point,
            start_time: None,
            end_time: None,
            semantic_type: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
