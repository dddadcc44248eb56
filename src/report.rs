//! Tabular and GeoJSON output.
//!
//! Every table is a flat CSV with a header row. The places table doubles as
//! the input for `map` and `review`, so it round-trips through [`read_places_csv`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use log::info;
use serde::{Deserialize, Serialize};

use crate::classify::PlaceCategory;
use crate::cluster::ClusterSummary;
use crate::error::{Error, Result};
use crate::pipeline::LabeledPlace;
use crate::takeout::Export;
use crate::LocationSample;

fn fmt_time(t: &Option<DateTime<FixedOffset>>) -> Option<String> {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// ============================================================================
// Row types
// ============================================================================

/// One row of the labeled places table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub cluster: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub visits: u32,
    pub first_visit: Option<String>,
    pub last_visit: Option<String>,
    pub dwell_hours: f64,
    pub place_name: Option<String>,
    /// Comma-joined place types
    pub place_types: Option<String>,
    pub address: Option<String>,
    pub business_name: Option<String>,
    pub category: String,
}

impl PlaceRecord {
    /// Parsed category; unknown text reads as Other.
    pub fn category(&self) -> PlaceCategory {
        self.category.parse().unwrap_or(PlaceCategory::Other)
    }

    /// Name shown on maps and in review output.
    pub fn label(&self) -> &str {
        self.place_name
            .as_deref()
            .or(self.business_name.as_deref())
            .or(self.address.as_deref())
            .unwrap_or("Unknown")
    }
}

impl From<&LabeledPlace> for PlaceRecord {
    fn from(p: &LabeledPlace) -> Self {
        let c = &p.cluster;
        let place = p.place.as_ref();
        PlaceRecord {
            cluster: c.cluster_id,
            latitude: c.centroid.latitude,
            longitude: c.centroid.longitude,
            visits: c.visits,
            first_visit: fmt_time(&c.first_visit),
            last_visit: fmt_time(&c.last_visit),
            dwell_hours: c.dwell_hours,
            place_name: place.and_then(|i| i.name.clone()),
            place_types: place.filter(|i| !i.types.is_empty()).map(|i| i.types.join(", ")),
            address: place.and_then(|i| i.address.clone()),
            business_name: place.and_then(|i| i.business_name.clone()),
            category: p.category.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClusterRecord<'a> {
    cluster: usize,
    latitude: f64,
    longitude: f64,
    visits: u32,
    first_visit: Option<String>,
    last_visit: Option<String>,
    dwell_hours: f64,
    overnight_visits: u32,
    semantic_hint: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct VisitRecord<'a> {
    start_time: Option<String>,
    end_time: Option<String>,
    duration_hours: Option<f64>,
    latitude: f64,
    longitude: f64,
    place_id: Option<&'a str>,
    semantic_type: Option<&'a str>,
    probability: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ActivityRecord<'a> {
    start_time: Option<String>,
    end_time: Option<String>,
    duration_hours: Option<f64>,
    latitude_start: f64,
    longitude_start: f64,
    latitude_end: f64,
    longitude_end: f64,
    activity_type: Option<&'a str>,
    distance_meters: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DailyCount {
    date: NaiveDate,
    visits: u32,
}

// ============================================================================
// Writers
// ============================================================================

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    Ok(())
}

fn write_records<T: Serialize>(path: &Path, records: impl IntoIterator<Item = T>) -> Result<usize> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    let mut count = 0;
    for record in records {
        writer.serialize(record)?;
        count += 1;
    }
    writer.flush().map_err(|e| Error::io(path, e))?;
    info!("[Report] Wrote {} rows to {}", count, path.display());
    Ok(count)
}

pub fn write_places_csv(path: &Path, places: &[LabeledPlace]) -> Result<usize> {
    write_records(path, places.iter().map(PlaceRecord::from))
}

pub fn write_clusters_csv(path: &Path, clusters: &[ClusterSummary]) -> Result<usize> {
    write_records(
        path,
        clusters.iter().map(|c| ClusterRecord {
            cluster: c.cluster_id,
            latitude: c.centroid.latitude,
            longitude: c.centroid.longitude,
            visits: c.visits,
            first_visit: fmt_time(&c.first_visit),
            last_visit: fmt_time(&c.last_visit),
            dwell_hours: c.dwell_hours,
            overnight_visits: c.overnight_visits,
            semantic_hint: c.semantic_hint.as_deref(),
        }),
    )
}

pub fn write_visits_csv(path: &Path, export: &Export) -> Result<usize> {
    write_records(
        path,
        export.visits.iter().map(|v| VisitRecord {
            start_time: fmt_time(&v.start_time),
            end_time: fmt_time(&v.end_time),
            duration_hours: v.duration_hours(),
            latitude: v.location.latitude,
            longitude: v.location.longitude,
            place_id: v.place_id.as_deref(),
            semantic_type: v.semantic_type.as_deref(),
            probability: v.probability,
        }),
    )
}

pub fn write_activities_csv(path: &Path, export: &Export) -> Result<usize> {
    write_records(
        path,
        export.activities.iter().map(|a| ActivityRecord {
            start_time: fmt_time(&a.start_time),
            end_time: fmt_time(&a.end_time),
            duration_hours: a.duration_hours(),
            latitude_start: a.start.latitude,
            longitude_start: a.start.longitude,
            latitude_end: a.end.latitude,
            longitude_end: a.end.longitude,
            activity_type: a.activity_type.as_deref(),
            distance_meters: a.distance_meters,
        }),
    )
}

/// Visits per local calendar day. Samples without a time are not counted.
pub fn daily_visit_counts(samples: &[LocationSample]) -> BTreeMap<NaiveDate, u32> {
    let mut counts = BTreeMap::new();
    for t in samples.iter().filter_map(|s| s.start_time) {
        *counts.entry(t.date_naive()).or_insert(0) += 1;
    }
    counts
}

pub fn write_daily_counts_csv(path: &Path, samples: &[LocationSample]) -> Result<usize> {
    write_records(
        path,
        daily_visit_counts(samples)
            .into_iter()
            .map(|(date, visits)| DailyCount { date, visits }),
    )
}

pub fn read_places_csv(path: &Path) -> Result<Vec<PlaceRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<std::result::Result<Vec<PlaceRecord>, _>>()?;
    Ok(records)
}

// ============================================================================
// GeoJSON
// ============================================================================

/// Places as a FeatureCollection of Points carrying the table columns.
pub fn places_geojson(records: &[PlaceRecord]) -> FeatureCollection {
    let features = records
        .iter()
        .map(|r| {
            let mut properties = JsonObject::new();
            properties.insert("cluster".to_string(), r.cluster.into());
            properties.insert("visits".to_string(), r.visits.into());
            properties.insert("category".to_string(), r.category.clone().into());
            properties.insert("label".to_string(), r.label().into());
            properties.insert("dwell_hours".to_string(), r.dwell_hours.into());
            for (key, value) in [
                ("place_name", &r.place_name),
                ("place_types", &r.place_types),
                ("address", &r.address),
                ("business_name", &r.business_name),
                ("first_visit", &r.first_visit),
                ("last_visit", &r.last_visit),
            ] {
                if let Some(v) = value {
                    properties.insert(key.to_string(), v.clone().into());
                }
            }

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![r.longitude, r.latitude]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection { bbox: None, features, foreign_members: None }
}

pub fn write_geojson(path: &Path, records: &[PlaceRecord]) -> Result<()> {
    ensure_parent(path)?;
    let text = serde_json::to_string_pretty(&places_geojson(records))?;
    fs::write(path, text).map_err(|e| Error::io(path, e))?;
    info!("[Report] Wrote {} features to {}", records.len(), path.display());
    Ok(())
}

// ============================================================================
// Review
// ============================================================================

/// The `n` most-visited places, for spot-checking labels by hand.
pub fn review_sample(records: &[PlaceRecord], n: usize) -> Vec<&PlaceRecord> {
    let mut sorted: Vec<&PlaceRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.visits.cmp(&a.visits).then(a.cluster.cmp(&b.cluster)));
    sorted.truncate(n);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PlaceInfo;
    use crate::takeout::{parse_export, parse_timestamp};
    use crate::GpsPoint;
    use tempfile::tempdir;

    fn labeled(id: usize, visits: u32, category: PlaceCategory, place: Option<PlaceInfo>) -> LabeledPlace {
        LabeledPlace {
            cluster: ClusterSummary {
                cluster_id: id,
                centroid: GpsPoint::new(38.0 + id as f64 * 0.01, -78.5),
                visits,
                first_visit: parse_timestamp("2024-03-01T08:00:00-05:00"),
                last_visit: None,
                dwell_hours: 12.5,
                overnight_visits: 0,
                semantic_hint: None,
            },
            place,
            category,
        }
    }

    #[test]
    fn test_places_csv_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/places.csv");

        let places = vec![
            labeled(
                0,
                12,
                PlaceCategory::Business,
                Some(PlaceInfo {
                    name: Some("Grit, Coffee".to_string()),
                    types: vec!["cafe".to_string(), "food".to_string()],
                    ..PlaceInfo::default()
                }),
            ),
            labeled(1, 7, PlaceCategory::Other, None),
        ];

        assert_eq!(write_places_csv(&path, &places).unwrap(), 2);
        let records = read_places_csv(&path).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].place_name.as_deref(), Some("Grit, Coffee"));
        assert_eq!(records[0].place_types.as_deref(), Some("cafe, food"));
        assert_eq!(records[0].first_visit.as_deref(), Some("2024-03-01T08:00:00-05:00"));
        assert_eq!(records[0].category(), PlaceCategory::Business);
        assert_eq!(records[1].place_name, None);
        assert_eq!(records[1].label(), "Unknown");
        assert_eq!(records[1].category(), PlaceCategory::Other);
    }

    #[test]
    fn test_export_tables() {
        let export = parse_export(
            r#"[
                {"startTime": "2024-03-01T08:00:00Z", "endTime": "2024-03-01T10:00:00Z",
                 "visit": {"topCandidate": {"placeLocation": "geo:38.1,-78.2", "semanticType": "WORK"}}},
                {"startTime": "2024-03-01T10:00:00Z", "endTime": "2024-03-01T10:30:00Z",
                 "activity": {"start": "geo:38.1,-78.2", "end": "geo:38.2,-78.3",
                              "topCandidate": {"type": "walking"}}}
            ]"#,
        )
        .unwrap();

        let dir = tempdir().unwrap();
        let visits = dir.path().join("visits.csv");
        let activities = dir.path().join("activities.csv");
        assert_eq!(write_visits_csv(&visits, &export).unwrap(), 1);
        assert_eq!(write_activities_csv(&activities, &export).unwrap(), 1);

        let text = fs::read_to_string(&visits).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("start_time,end_time,duration_hours,latitude,longitude,place_id,semantic_type,probability")
        );
        assert!(lines.next().unwrap().contains(",2.0,38.1,-78.2,,WORK,"));

        let text = fs::read_to_string(&activities).unwrap();
        assert!(text.contains("walking"));
        assert!(text.contains("0.5"));
    }

    #[test]
    fn test_daily_counts() {
        let sample = |t: &str| LocationSample {
            point: GpsPoint::new(0.0, 0.0),
            start_time: parse_timestamp(t),
            end_time: None,
            semantic_type: None,
        };
        let samples = vec![
            sample("2024-03-01T08:00:00-05:00"),
            sample("2024-03-01T22:00:00-05:00"),
            sample("2024-03-03T09:00:00-05:00"),
            LocationSample::at(GpsPoint::new(0.0, 0.0)),
        ];
        let counts = daily_visit_counts(&samples);
        assert_eq!(counts.len(), 2);
        // 22:00 local stays on the 1st even though it is the 2nd in UTC
        assert_eq!(counts[&NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()], 2);

        let dir = tempdir().unwrap();
        let path = dir.path().join("daily.csv");
        assert_eq!(write_daily_counts_csv(&path, &samples).unwrap(), 2);
        assert!(fs::read_to_string(&path).unwrap().contains("2024-03-03,1"));
    }

    #[test]
    fn test_geojson_features() {
        let records: Vec<PlaceRecord> = vec![PlaceRecord::from(&labeled(3, 9, PlaceCategory::Home, None))];
        let fc = places_geojson(&records);
        assert_eq!(fc.features.len(), 1);

        let feature = &fc.features[0];
        match &feature.geometry.as_ref().unwrap().value {
            Value::Point(coords) => {
                assert_eq!(coords[0], -78.5);
                assert!((coords[1] - 38.03).abs() < 1e-9);
            }
            other => panic!("expected a point, got {:?}", other),
        }
        let props = feature.properties.as_ref().unwrap();
        assert_eq!(props["category"], "Home");
        assert_eq!(props["visits"], 9);
        assert!(!props.contains_key("address"));

        let dir = tempdir().unwrap();
        let path = dir.path().join("places.geojson");
        write_geojson(&path, &records).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
    }

    #[test]
    fn test_review_sample_orders_by_visits() {
        let records: Vec<PlaceRecord> = [(0, 5), (1, 20), (2, 9), (3, 20)]
            .iter()
            .map(|&(id, visits)| PlaceRecord::from(&labeled(id, visits, PlaceCategory::Other, None)))
            .collect();
        let picked: Vec<usize> = review_sample(&records, 3).iter().map(|r| r.cluster).collect();
        assert_eq!(picked, vec![1, 3, 2]);
        assert_eq!(review_sample(&records, 10).len(), 4);
    }
}
