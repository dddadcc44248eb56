//! End-to-end analysis: export → samples → DBSCAN → significant clusters →
//! labeled places.
//!
//! Place lookups happen between [`Analysis::run`] and [`label_places`] so the
//! network step can be skipped (offline mode) or replaced in tests.

use std::collections::HashMap;

use log::info;

use crate::classify::{classify_place, pick_home, PlaceCategory, PlaceInfo};
use crate::cluster::{dbscan, significant, summarize_clusters, ClusterSummary};
use crate::config::{ClassifyConfig, Config};
use crate::error::Result;
use crate::takeout::Export;
use crate::{GpsPoint, LocationSample};

/// Clustering results for one run.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub samples: Vec<LocationSample>,
    /// One label per sample; `None` is noise
    pub labels: Vec<Option<usize>>,
    /// Every cluster, sorted by id
    pub clusters: Vec<ClusterSummary>,
    /// Clusters with at least `min_visits` visits
    pub significant: Vec<ClusterSummary>,
    /// Cluster chosen by the late-night heuristic
    pub home_cluster: Option<usize>,
}

impl Analysis {
    /// Filter, sample, and cluster an export.
    pub fn run(export: &Export, config: &Config) -> Result<Self> {
        let range = config.input.date_range()?;
        let samples = export.samples(&range, config.clustering.include_activities);
        Ok(Self::from_samples(samples, config))
    }

    /// Cluster already-extracted samples.
    pub fn from_samples(samples: Vec<LocationSample>, config: &Config) -> Self {
        let points: Vec<GpsPoint> = samples.iter().map(|s| s.point).collect();
        let labels = dbscan(&points, config.clustering.eps_meters, config.clustering.min_samples);
        let clusters = summarize_clusters(&samples, &labels, &config.classify);
        let significant = significant(&clusters, config.clustering.min_visits);
        let home_cluster = pick_home(&significant, &config.classify);

        info!(
            "[Pipeline] {} samples -> {} clusters ({} significant, {} noise points)",
            samples.len(),
            clusters.len(),
            significant.len(),
            labels.iter().filter(|l| l.is_none()).count()
        );

        Self { samples, labels, clusters, significant, home_cluster }
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_none()).count()
    }

    /// Lookup requests for every significant centroid.
    #[cfg(feature = "http")]
    pub fn place_requests(&self) -> Vec<crate::places::PlaceRequest> {
        self.significant
            .iter()
            .map(|c| crate::places::PlaceRequest { cluster_id: c.cluster_id, location: c.centroid })
            .collect()
    }
}

/// A significant cluster with its lookup and category.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPlace {
    pub cluster: ClusterSummary,
    pub place: Option<PlaceInfo>,
    pub category: PlaceCategory,
}

/// Collect successful lookups by cluster id.
#[cfg(feature = "http")]
pub fn lookups_by_cluster(lookups: Vec<crate::places::PlaceLookup>) -> HashMap<usize, PlaceInfo> {
    lookups
        .into_iter()
        .filter_map(|l| Some((l.cluster_id, l.place?)))
        .collect()
}

/// Join lookups to clusters and classify each one, keeping cluster order.
pub fn label_places(
    clusters: &[ClusterSummary],
    places: &HashMap<usize, PlaceInfo>,
    home_cluster: Option<usize>,
    config: &ClassifyConfig,
) -> Vec<LabeledPlace> {
    let labeled: Vec<LabeledPlace> = clusters
        .iter()
        .map(|c| {
            let place = places.get(&c.cluster_id).cloned();
            let category = classify_place(c, place.as_ref(), home_cluster, config);
            LabeledPlace { cluster: c.clone(), place, category }
        })
        .collect();

    let mut counts: HashMap<PlaceCategory, usize> = HashMap::new();
    for p in &labeled {
        *counts.entry(p.category).or_insert(0) += 1;
    }
    let mut summary: Vec<_> = counts.into_iter().collect();
    summary.sort();
    info!("[Pipeline] Labeled {} places: {:?}", labeled.len(), summary);

    labeled
}
