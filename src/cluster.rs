//! # DBSCAN Visit Clustering
//!
//! Groups visit points that lie within a haversine radius of each other into
//! clusters, then summarizes each cluster as a candidate "place".
//!
//! ## Algorithm
//! 1. Index all valid points in an R-tree (`[lng, lat]` in degrees)
//! 2. For each point, query a degree box sized from `eps_meters`, then keep
//!    candidates whose haversine distance is `<= eps_meters`
//! 3. Core points have at least `min_samples` neighbours (self included)
//! 4. Expand clusters from core points in input order; a border point keeps
//!    the first cluster that reaches it
//! 5. Everything else is noise (`None`)
//!
//! Cluster ids are assigned 0.. in discovery order, so the same input always
//! gives the same labels.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use log::{debug, info};
use rstar::{RTree, RTreeObject, AABB};

use crate::classify::is_overnight;
use crate::config::ClassifyConfig;
use crate::geo_utils::{compute_center, haversine_distance, meters_to_degrees};
use crate::{GpsPoint, LocationSample};

// =============================================================================
// R-tree Indexed Point for Spatial Queries
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

fn build_index(points: &[GpsPoint]) -> RTree<IndexedPoint> {
    let indexed: Vec<IndexedPoint> = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_valid())
        .map(|(idx, p)| IndexedPoint { idx, lat: p.latitude, lng: p.longitude })
        .collect();
    RTree::bulk_load(indexed)
}

/// All point indices within `eps_meters` of `points[i]`, including `i` itself.
fn region_query(tree: &RTree<IndexedPoint>, points: &[GpsPoint], i: usize, eps_meters: f64) -> Vec<usize> {
    let center = &points[i];
    if !center.is_valid() {
        return vec![];
    }

    let half = meters_to_degrees(eps_meters, center.latitude);
    let search = AABB::from_corners(
        [center.longitude - half, center.latitude - half],
        [center.longitude + half, center.latitude + half],
    );

    let mut neighbors: Vec<usize> = tree
        .locate_in_envelope_intersecting(&search)
        .filter(|c| haversine_distance(center, &points[c.idx]) <= eps_meters)
        .map(|c| c.idx)
        .collect();
    neighbors.sort_unstable();
    neighbors
}

#[cfg(feature = "parallel")]
fn all_neighbors(tree: &RTree<IndexedPoint>, points: &[GpsPoint], eps_meters: f64) -> Vec<Vec<usize>> {
    use rayon::prelude::*;

    (0..points.len())
        .into_par_iter()
        .map(|i| region_query(tree, points, i, eps_meters))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn all_neighbors(tree: &RTree<IndexedPoint>, points: &[GpsPoint], eps_meters: f64) -> Vec<Vec<usize>> {
    (0..points.len())
        .map(|i| region_query(tree, points, i, eps_meters))
        .collect()
}

// =============================================================================
// DBSCAN
// =============================================================================

/// Cluster points with DBSCAN using great-circle distance.
///
/// Returns one label per input point: `Some(cluster_id)` or `None` for noise.
///
/// # Example
/// ```
/// use visit_clusters::{GpsPoint, cluster::dbscan};
///
/// let points = vec![
///     GpsPoint::new(38.03360, -78.50800),
///     GpsPoint::new(38.03362, -78.50801),
///     GpsPoint::new(38.03361, -78.50803),
///     GpsPoint::new(40.71280, -74.00600), // far away
/// ];
///
/// let labels = dbscan(&points, 50.0, 3);
/// assert_eq!(labels, vec![Some(0), Some(0), Some(0), None]);
/// ```
pub fn dbscan(points: &[GpsPoint], eps_meters: f64, min_samples: usize) -> Vec<Option<usize>> {
    let start = std::time::Instant::now();
    let mut labels: Vec<Option<usize>> = vec![None; points.len()];
    if points.is_empty() {
        return labels;
    }

    let tree = build_index(points);
    let neighbors = all_neighbors(&tree, points, eps_meters);
    let is_core: Vec<bool> = neighbors
        .iter()
        .map(|n| !n.is_empty() && n.len() >= min_samples)
        .collect();

    let mut next_label = 0;
    let mut stack: Vec<usize> = Vec::new();

    for i in 0..points.len() {
        if labels[i].is_some() || !is_core[i] {
            continue;
        }

        labels[i] = Some(next_label);
        stack.push(i);

        while let Some(p) = stack.pop() {
            if !is_core[p] {
                continue;
            }
            for &q in &neighbors[p] {
                if labels[q].is_none() {
                    labels[q] = Some(next_label);
                    if is_core[q] {
                        stack.push(q);
                    }
                }
            }
        }

        next_label += 1;
    }

    let noise = labels.iter().filter(|l| l.is_none()).count();
    info!(
        "[Dbscan] {} points -> {} clusters, {} noise (eps={}m, min_samples={}) in {:?}",
        points.len(),
        next_label,
        noise,
        eps_meters,
        min_samples,
        start.elapsed()
    );

    labels
}

// =============================================================================
// Cluster Summaries
// =============================================================================

/// Aggregate view of one DBSCAN cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    /// Arithmetic mean of member coordinates
    pub centroid: GpsPoint,
    pub visits: u32,
    pub first_visit: Option<DateTime<FixedOffset>>,
    pub last_visit: Option<DateTime<FixedOffset>>,
    /// Sum of member visit durations
    pub dwell_hours: f64,
    /// Visits that start at night or run past midnight
    pub overnight_visits: u32,
    /// Semantic type shared by at least half of the visits
    pub semantic_hint: Option<String>,
}

impl ClusterSummary {
    pub fn overnight_fraction(&self) -> f64 {
        if self.visits == 0 {
            return 0.0;
        }
        self.overnight_visits as f64 / self.visits as f64
    }
}

#[derive(Debug, Default)]
struct ClusterBuilder {
    points: Vec<GpsPoint>,
    first_visit: Option<DateTime<FixedOffset>>,
    last_visit: Option<DateTime<FixedOffset>>,
    dwell_hours: f64,
    overnight_visits: u32,
    semantic_counts: BTreeMap<String, u32>,
}

impl ClusterBuilder {
    fn add(&mut self, sample: &LocationSample, night: &ClassifyConfig) {
        self.points.push(sample.point);

        if let Some(t) = sample.start_time {
            self.first_visit = Some(self.first_visit.map_or(t, |v| v.min(t)));
            self.last_visit = Some(self.last_visit.map_or(t, |v| v.max(t)));
        }
        if let (Some(s), Some(e)) = (sample.start_time, sample.end_time) {
            let hours = (e - s).num_seconds() as f64 / 3600.0;
            if hours > 0.0 {
                self.dwell_hours += hours;
            }
        }
        if is_overnight(sample, night) {
            self.overnight_visits += 1;
        }
        if let Some(kind) = sample.semantic_type.as_deref() {
            if !kind.is_empty() && !kind.eq_ignore_ascii_case("UNKNOWN") {
                *self.semantic_counts.entry(kind.to_ascii_uppercase()).or_insert(0) += 1;
            }
        }
    }

    fn build(self, cluster_id: usize) -> ClusterSummary {
        let visits = self.points.len() as u32;

        // Ties resolve to the alphabetically first hint
        let mut best: Option<(&String, u32)> = None;
        for (kind, &count) in &self.semantic_counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((kind, count));
            }
        }
        let semantic_hint = best
            .filter(|(_, count)| count * 2 >= visits)
            .map(|(kind, _)| kind.clone());

        ClusterSummary {
            cluster_id,
            centroid: compute_center(&self.points),
            visits,
            first_visit: self.first_visit,
            last_visit: self.last_visit,
            dwell_hours: self.dwell_hours,
            overnight_visits: self.overnight_visits,
            semantic_hint,
        }
    }
}

/// Build one summary per cluster, sorted by cluster id. Noise is dropped.
pub fn summarize_clusters(
    samples: &[LocationSample],
    labels: &[Option<usize>],
    night: &ClassifyConfig,
) -> Vec<ClusterSummary> {
    let mut builders: BTreeMap<usize, ClusterBuilder> = BTreeMap::new();

    for (sample, label) in samples.iter().zip(labels) {
        if let Some(id) = label {
            builders.entry(*id).or_default().add(sample, night);
        }
    }

    let summaries: Vec<ClusterSummary> = builders
        .into_iter()
        .map(|(id, b)| b.build(id))
        .collect();

    debug!("[Dbscan] Summarized {} clusters", summaries.len());
    summaries
}

/// Keep clusters visited at least `min_visits` times.
pub fn significant(clusters: &[ClusterSummary], min_visits: u32) -> Vec<ClusterSummary> {
    clusters
        .iter()
        .filter(|c| c.visits >= min_visits)
        .cloned()
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::takeout::parse_timestamp;

    /// `n` points in a tight ring (~1m apart) around a center.
    fn blob(lat: f64, lng: f64, n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(lat + i as f64 * 0.00001, lng - i as f64 * 0.00001))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(dbscan(&[], 50.0, 5).is_empty());
    }

    #[test]
    fn test_two_blobs_and_noise() {
        let mut points = blob(38.0336, -78.5080, 6);
        points.extend(blob(38.0500, -78.4800, 5));
        points.push(GpsPoint::new(38.2000, -78.1000));

        let labels = dbscan(&points, 50.0, 5);
        assert!(labels[..6].iter().all(|l| *l == Some(0)));
        assert!(labels[6..11].iter().all(|l| *l == Some(1)));
        assert_eq!(labels[11], None);
    }

    #[test]
    fn test_too_small_group_is_noise() {
        let points = blob(38.0336, -78.5080, 4);
        let labels = dbscan(&points, 50.0, 5);
        assert!(labels.iter().all(|l| l.is_none()));
    }

    #[test]
    fn test_radius_is_inclusive_in_meters() {
        // Two points ~55.6m apart: together at 60m, apart at 50m
        let points = vec![GpsPoint::new(38.0, -78.5), GpsPoint::new(38.0005, -78.5)];
        assert_eq!(dbscan(&points, 60.0, 2), vec![Some(0), Some(0)]);
        assert_eq!(dbscan(&points, 50.0, 2), vec![None, None]);
    }

    #[test]
    fn test_radius_edge_east_west() {
        // 0.00057 deg of longitude at 38N is ~49.95m, just inside 50m
        let a = GpsPoint::new(38.0, -78.5);
        let b = GpsPoint::new(38.0, -78.5 + 0.00057);
        let d = haversine_distance(&a, &b);
        assert!(d > 49.9 && d < 50.0, "got {}", d);

        assert_eq!(dbscan(&[a, b], 50.0, 2), vec![Some(0), Some(0)]);
        assert_eq!(dbscan(&[a, b], 49.9, 2), vec![None, None]);
    }

    #[test]
    fn test_min_samples_one_makes_every_point_a_cluster() {
        let points = vec![GpsPoint::new(10.0, 10.0), GpsPoint::new(20.0, 20.0)];
        assert_eq!(dbscan(&points, 10.0, 1), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_border_point_joins_chain() {
        // A chain of points 40m apart: with min_samples=2 the chain is one cluster
        let points: Vec<GpsPoint> = (0..5)
            .map(|i| GpsPoint::new(38.0 + i as f64 * 0.00036, -78.5))
            .collect();
        let labels = dbscan(&points, 45.0, 2);
        assert!(labels.iter().all(|l| *l == Some(0)));

        // With min_samples=3 the endpoints are border points of the same cluster
        let labels = dbscan(&points, 45.0, 3);
        assert!(labels.iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn test_invalid_points_are_noise() {
        let mut points = blob(38.0, -78.5, 5);
        points.push(GpsPoint::new(f64::NAN, -78.5));
        points.push(GpsPoint::new(38.0, 200.0));
        let labels = dbscan(&points, 50.0, 5);
        assert_eq!(labels[5], None);
        assert_eq!(labels[6], None);
        assert!(labels[..5].iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn test_labels_are_deterministic() {
        let mut points = blob(51.5074, -0.1278, 7);
        points.extend(blob(48.8566, 2.3522, 7));
        let a = dbscan(&points, 30.0, 5);
        let b = dbscan(&points, 30.0, 5);
        assert_eq!(a, b);
        assert_eq!(a[0], Some(0));
        assert_eq!(a[7], Some(1));
    }

    fn timed(point: GpsPoint, start: &str, end: &str, semantic: Option<&str>) -> LocationSample {
        LocationSample {
            point,
            start_time: parse_timestamp(start),
            end_time: parse_timestamp(end),
            semantic_type: semantic.map(str::to_string),
        }
    }

    #[test]
    fn test_summarize_clusters() {
        let p = GpsPoint::new(38.0, -78.5);
        let q = GpsPoint::new(38.0002, -78.5002);
        let samples = vec![
            timed(p, "2024-03-01T23:00:00-05:00", "2024-03-02T07:00:00-05:00", Some("HOME")),
            timed(q, "2024-03-02T12:00:00-05:00", "2024-03-02T13:30:00-05:00", Some("HOME")),
            timed(p, "2024-03-03T09:00:00-05:00", "2024-03-03T10:00:00-05:00", None),
            LocationSample::at(GpsPoint::new(0.0, 0.0)),
        ];
        let labels = vec![Some(0), Some(0), Some(0), None];

        let clusters = summarize_clusters(&samples, &labels, &ClassifyConfig::default());
        assert_eq!(clusters.len(), 1);

        let c = &clusters[0];
        assert_eq!(c.cluster_id, 0);
        assert_eq!(c.visits, 3);
        assert!((c.dwell_hours - 10.5).abs() < 1e-9);
        assert_eq!(c.overnight_visits, 1);
        assert_eq!(c.semantic_hint.as_deref(), Some("HOME"));
        assert_eq!(c.first_visit, parse_timestamp("2024-03-01T23:00:00-05:00"));
        assert_eq!(c.last_visit, parse_timestamp("2024-03-03T09:00:00-05:00"));
        assert!((c.centroid.latitude - (38.0 + 0.0002 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_minority_hint_is_ignored() {
        let p = GpsPoint::new(38.0, -78.5);
        let samples = vec![
            timed(p, "2024-03-01T09:00:00Z", "2024-03-01T10:00:00Z", Some("WORK")),
            LocationSample::at(p),
            LocationSample::at(p),
        ];
        let clusters = summarize_clusters(&samples, &[Some(0), Some(0), Some(0)], &ClassifyConfig::default());
        assert_eq!(clusters[0].semantic_hint, None);
    }

    #[test]
    fn test_significant_filter() {
        let base = ClusterSummary {
            cluster_id: 0,
            centroid: GpsPoint::new(0.0, 0.0),
            visits: 6,
            first_visit: None,
            last_visit: None,
            dwell_hours: 0.0,
            overnight_visits: 0,
            semantic_hint: None,
        };
        let small = ClusterSummary { cluster_id: 1, visits: 5, ..base.clone() };
        let kept = significant(&[base, small], 6);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].cluster_id, 0);
    }
}
