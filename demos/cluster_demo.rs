//! Cluster a synthetic month of visits and label the places offline.
//!
//! Run with: cargo run --example cluster_demo

use std::collections::HashMap;

use visit_clusters::report::{review_sample, PlaceRecord};
use visit_clusters::{label_places, parse_export, render, Analysis, Config, PlaceInfo};

fn entry(day: u32, hour: u32, lat: f64, lng: f64, semantic: &str) -> String {
    format!(
        r#"{{"startTime": "2024-05-{day:02}T{hour:02}:05:00.000-04:00",
            "endTime": "2024-05-{day:02}T{hour:02}:55:00.000-04:00",
            "visit": {{"topCandidate": {{"semanticType": "{semantic}",
                                        "placeLocation": "geo:{lat:.6},{lng:.6}"}}}}}}"#
    )
}

fn main() {
    // Charlottesville area: an apartment, an office, a cafe, one trip to Richmond
    let mut entries = Vec::new();
    for day in 1..=28 {
        let jitter = (day % 5) as f64 * 0.00002;
        entries.push(entry(day, 23, 38.0293 + jitter, -78.4767, "UNKNOWN"));
        if day % 7 < 5 {
            entries.push(entry(day, 9, 38.0336 + jitter, -78.5080, "INFERRED_WORK"));
        }
        if day % 3 == 0 {
            entries.push(entry(day, 15, 38.0310, -78.4820 + jitter, "UNKNOWN"));
        }
    }
    entries.push(entry(14, 12, 37.5407, -77.4360, "UNKNOWN"));
    let json = format!("[{}]", entries.join(","));

    let export = parse_export(&json).unwrap();
    let config = Config::default();
    let analysis = Analysis::run(&export, &config).unwrap();

    println!("Clustering\n");
    println!(
        "eps={}m, min_samples={}, min_visits={}",
        config.clustering.eps_meters, config.clustering.min_samples, config.clustering.min_visits
    );
    println!(
        "{} samples -> {} clusters, {} significant, {} noise\n",
        analysis.samples.len(),
        analysis.clusters.len(),
        analysis.significant.len(),
        analysis.noise_count()
    );

    // Stand-in for a places API response
    let mut lookups = HashMap::new();
    let cafe = analysis
        .significant
        .iter()
        .find(|c| c.semantic_hint.is_none() && Some(c.cluster_id) != analysis.home_cluster);
    if let Some(cafe) = cafe {
        lookups.insert(
            cafe.cluster_id,
            PlaceInfo {
                name: Some("Grit Coffee".to_string()),
                types: vec!["cafe".to_string(), "food".to_string()],
                ..PlaceInfo::default()
            },
        );
    }

    let places = label_places(&analysis.significant, &lookups, analysis.home_cluster, &config.classify);
    let records: Vec<PlaceRecord> = places.iter().map(PlaceRecord::from).collect();

    println!("Places\n");
    for r in review_sample(&records, 10) {
        println!(
            "  cluster {:>2}: {:<8} {:<12} {:>3} visits at {:.5},{:.5}",
            r.cluster,
            r.category,
            r.label(),
            r.visits,
            r.latitude,
            r.longitude
        );
    }

    let svg = render::render_svg_map(&records).unwrap();
    println!("\nSVG map: {} bytes", svg.len());
}
