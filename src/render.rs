//! Map rendering: an interactive Leaflet page and a static SVG scatter map.

use std::fs;
use std::path::Path;

use log::info;
use plotters::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::geo_utils::{compute_bounds, compute_center};
use crate::report::PlaceRecord;
use crate::GpsPoint;

const SVG_SIZE: (u32, u32) = (1024, 768);
const EXTENT_PADDING_DEG: f64 = 0.02;
const MAX_MARKER_RADIUS: f64 = 30.0;

/// Marker radius in pixels; grows with the square root of the visit count.
pub fn marker_radius(visits: u32) -> u32 {
    (3.0 + (visits as f64).sqrt() * 1.5).min(MAX_MARKER_RADIUS) as u32
}

fn points(records: &[PlaceRecord]) -> Vec<GpsPoint> {
    records.iter().map(|r| GpsPoint::new(r.latitude, r.longitude)).collect()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Serialize)]
struct Marker {
    lat: f64,
    lng: f64,
    color: &'static str,
    radius: u32,
    popup: String,
}

/// Popup text: `<category> - <name> - <n> visits`, HTML-escaped.
pub fn popup_text(record: &PlaceRecord) -> String {
    escape_html(&format!("{} - {} - {} visits", record.category(), record.label(), record.visits))
}

// ============================================================================
// HTML
// ============================================================================

/// Self-contained Leaflet page with one circle marker per place.
pub fn render_html_map(records: &[PlaceRecord]) -> Result<String> {
    if records.is_empty() {
        return Err(Error::Render("no places to draw".to_string()));
    }

    let center = compute_center(&points(records));
    let markers: Vec<Marker> = records
        .iter()
        .map(|r| Marker {
            lat: r.latitude,
            lng: r.longitude,
            color: r.category().color_hex(),
            radius: marker_radius(r.visits),
            popup: popup_text(r),
        })
        .collect();

    // "</" inside the script body would end the element early
    let data = serde_json::to_string(&markers)?.replace("</", "<\\/");

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Visited places</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map('map').setView([{lat}, {lng}], 12);
L.tileLayer('https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png', {{
  maxZoom: 19,
  attribution: '&copy; OpenStreetMap contributors'
}}).addTo(map);
var markers = {data};
markers.forEach(function (m) {{
  L.circleMarker([m.lat, m.lng], {{
    radius: m.radius, color: m.color, fillColor: m.color, fillOpacity: 0.6, weight: 1
  }}).bindPopup(m.popup).addTo(map);
}});
</script>
</body>
</html>
"#,
        lat = center.latitude,
        lng = center.longitude,
        data = data,
    ))
}

pub fn write_html_map(path: &Path, records: &[PlaceRecord]) -> Result<()> {
    let html = render_html_map(records)?;
    fs::write(path, html).map_err(|e| Error::io(path, e))?;
    info!("[Render] Wrote HTML map with {} markers to {}", records.len(), path.display());
    Ok(())
}

// ============================================================================
// SVG
// ============================================================================

fn render_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Render(e.to_string())
}

/// Static scatter map as SVG markup. Longitude on x, latitude on y.
pub fn render_svg_map(records: &[PlaceRecord]) -> Result<String> {
    let bounds = compute_bounds(&points(records))
        .ok_or_else(|| Error::Render("no places to draw".to_string()))?
        .padded(EXTENT_PADDING_DEG);

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, SVG_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(bounds.min_lng..bounds.max_lng, bounds.min_lat..bounds.max_lat)
            .map_err(render_err)?;

        // Largest first so small markers stay visible on top
        let mut ordered: Vec<&PlaceRecord> = records.iter().collect();
        ordered.sort_by(|a, b| b.visits.cmp(&a.visits));

        chart
            .draw_series(ordered.iter().map(|r| {
                let (red, green, blue) = r.category().color_rgb();
                Circle::new(
                    (r.longitude, r.latitude),
                    marker_radius(r.visits),
                    RGBColor(red, green, blue).mix(0.7).filled(),
                )
            }))
            .map_err(render_err)?;

        root.present().map_err(render_err)?;
    }
    Ok(svg)
}

pub fn write_svg_map(path: &Path, records: &[PlaceRecord]) -> Result<()> {
    let svg = render_svg_map(records)?;
    fs::write(path, svg).map_err(|e| Error::io(path, e))?;
    info!("[Render] Wrote SVG map with {} markers to {}", records.len(), path.display());
    Ok(())
}
