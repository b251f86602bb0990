// src/export.rs
//! Activity export to GPX and GeoJSON

use crate::activity::Activity;
use crate::error::{RecorderError, Result};
use crate::recording::segment::SegmentKind;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Gpx,
    GeoJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &str {
        match self {
            ExportFormat::Gpx => "gpx",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ExportFormat::Gpx => "GPX (GPS Exchange)",
            ExportFormat::GeoJson => "GeoJSON",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gpx" => Ok(ExportFormat::Gpx),
            "geojson" | "json" => Ok(ExportFormat::GeoJson),
            other => Err(RecorderError::Parse(format!(
                "Unknown export format '{}'",
                other
            ))),
        }
    }
}

/// Write `activity` to `path` in the given format
pub fn export_activity(activity: &Activity, format: ExportFormat, path: &Path) -> Result<()> {
    let content = render(activity, format)?;

    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;

    tracing::info!(
        id = %activity.id,
        format = format.display_name(),
        path = %path.display(),
        "Activity exported"
    );
    Ok(())
}

/// Render without touching the filesystem
pub fn render(activity: &Activity, format: ExportFormat) -> Result<String> {
    let segments = activity.display_segments();
    if segments.iter().all(|s| s.coordinates.is_empty()) {
        return Err(RecorderError::Other(format!(
            "Activity '{}' has no coordinates to export",
            activity.name
        )));
    }

    match format {
        ExportFormat::Gpx => Ok(to_gpx(activity)),
        ExportFormat::GeoJson => to_geojson(activity),
    }
}

pub fn to_gpx(activity: &Activity) -> String {
    let mut gpx = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Activity Recorder" xmlns="http://www.topografix.com/GPX/1/1">
"#,
    );

    gpx.push_str(&format!(
        "  <metadata>\n    <name>{}</name>\n    <time>{}</time>\n  </metadata>\n",
        escape_xml(&activity.name),
        activity.start_date.to_rfc3339()
    ));
    gpx.push_str("  <trk>\n");
    gpx.push_str(&format!("    <name>{}</name>\n", escape_xml(&activity.name)));
    gpx.push_str(&format!("    <type>{}</type>\n", activity.sport_type));

    for segment in activity.display_segments() {
        gpx.push_str("    <trkseg>\n");
        if segment.kind == SegmentKind::Pause {
            gpx.push_str("      <extensions><type>pause</type></extensions>\n");
        }
        for point in &segment.coordinates {
            gpx.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\"/>\n",
                point.latitude, point.longitude
            ));
        }
        gpx.push_str("    </trkseg>\n");
    }

    gpx.push_str("  </trk>\n</gpx>\n");
    gpx
}

pub fn to_geojson(activity: &Activity) -> Result<String> {
    let features: Vec<serde_json::Value> = activity
        .display_segments()
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let coordinates: Vec<[f64; 2]> = segment
                .coordinates
                .iter()
                .map(|c| [c.longitude, c.latitude])
                .collect();

            serde_json::json!({
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": coordinates
                },
                "properties": {
                    "kind": segment.kind,
                    "index": index,
                    "lengthMeters": segment.length_meters(),
                }
            })
        })
        .collect();

    let feature_collection = serde_json::json!({
        "type": "FeatureCollection",
        "properties": {
            "id": activity.id,
            "name": activity.name,
            "date": activity.start_date.to_rfc3339(),
            "sportType": activity.sport_type,
            "distance": activity.total_distance_meters,
            "duration": activity.total_duration_seconds,
            "avgSpeed": activity.average_speed_kph,
        },
        "features": features
    });

    Ok(serde_json::to_string_pretty(&feature_collection)?)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
