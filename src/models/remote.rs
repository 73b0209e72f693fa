use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use super::record::{
    Classification, CropDetails, CropType, Location, Polygon, Record, RecordStatus, SyncState,
};
use super::serde_helpers::{deserialize_id, deserialize_point};
use crate::geo::{self, Coordinate};

// ===== TABLE NAMES =====

pub const RECORDS_TABLE: &str = "burn_records";
pub const POLYGONS_TABLE: &str = "burn_polygons";
pub const PHOTOS_TABLE: &str = "burn_photos";

/// Select clause that embeds a record's children.
pub const RECORD_WITH_CHILDREN: &str = "*,burn_polygons(*),burn_photos(*)";

// ===== INSERT SHAPES =====

/// Record header row. Location is WKT, longitude first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordInsert {
    pub user_id: String,
    pub record_type: String,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub local_id: String,
}

impl RecordInsert {
    pub fn from_record(owner_id: &str, record: &Record) -> Self {
        Self {
            user_id: owner_id.to_string(),
            record_type: record.crop_type().as_str().to_string(),
            notes: record.remarks.clone().filter(|r| !r.trim().is_empty()),
            location: record
                .location
                .as_ref()
                .map(|l| geo::format_point(l.coordinate())),
            local_id: record.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl GeoJsonPolygon {
    pub fn from_points(points: &[Coordinate]) -> Self {
        Self {
            kind: "Polygon".to_string(),
            coordinates: vec![geo::to_closed_ring(points)],
        }
    }

    /// Outer ring, back in `(lat, lng)` order without the closing vertex.
    pub fn outer_ring(&self) -> Vec<Coordinate> {
        self.coordinates
            .first()
            .map(|ring| geo::from_ring(ring))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonInsert {
    pub record_id: String,
    pub geometry: GeoJsonPolygon,
    pub area_sqm: f64,
    pub polygon_type: String,
}

impl PolygonInsert {
    pub fn from_polygon(record_id: &str, polygon: &Polygon) -> Self {
        Self {
            record_id: record_id.to_string(),
            geometry: GeoJsonPolygon::from_points(&polygon.points),
            area_sqm: polygon.area,
            polygon_type: polygon.classification.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoInsert {
    pub record_id: String,
    pub storage_path: String,
    pub file_size: usize,
    pub mime_type: String,
}

// ===== SELECT SHAPES =====

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub record_type: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "deserialize_point")]
    pub location: Option<Coordinate>,
    #[serde(default)]
    pub local_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub burn_polygons: Vec<PolygonRow>,
    #[serde(default)]
    pub burn_photos: Vec<PhotoRow>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolygonRow {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub geometry: Option<GeoJsonPolygon>,
    #[serde(default)]
    pub area_sqm: Option<f64>,
    #[serde(default)]
    pub polygon_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhotoRow {
    pub storage_path: String,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Row returned by the `get_records_near` RPC.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NearbyRecordRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
}

impl RecordRow {
    /// Rebuilds the app record. `photo_urls` replace the stored paths.
    pub fn into_record(self, photo_urls: Vec<String>) -> Record {
        let crop = CropType::from_remote(&self.record_type).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown record_type '{}' on remote record {}, assuming rice",
                self.record_type,
                self.id
            );
            CropType::Rice
        });
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let observed = created_at.with_timezone(&Local);

        let polygons = self
            .burn_polygons
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| row.into_polygon(crop, index))
            .collect();

        Record {
            id: self.local_id.clone().unwrap_or_else(|| self.id.clone()),
            crop: CropDetails::empty(crop),
            date: observed.format("%Y-%m-%d").to_string(),
            time: observed.format("%H:%M").to_string(),
            location: self.location.map(|c| Location::new(c.lat, c.lng, None)),
            polygons,
            remarks: self.notes,
            photos: photo_urls,
            created_at,
            status: RecordStatus::Saved,
            sync: SyncState {
                synced: true,
                remote_id: Some(self.id),
            },
        }
    }
}

impl PolygonRow {
    fn into_polygon(self, crop: CropType, index: usize) -> Option<Polygon> {
        let points = self.geometry.as_ref()?.outer_ring();
        if points.len() < 3 {
            return None;
        }
        let classification = self
            .polygon_type
            .as_deref()
            .map(Classification::from)
            .unwrap_or(Classification::Burn);
        let id = match self.id {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => format!("remote-{index}"),
        };
        Some(Polygon {
            id,
            area: self.area_sqm.unwrap_or_else(|| geo::area_sq_meters(&points)),
            points,
            classification,
            display_color: classification.display_color(crop).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_insert_is_lng_lat_closed_ring() {
        let polygon = Polygon::from_points(
            vec![
                Coordinate::new(14.0, 100.0),
                Coordinate::new(14.0, 100.01),
                Coordinate::new(14.01, 100.01),
            ],
            Classification::NonBurn,
            "#10b981",
        )
        .unwrap();
        let insert = PolygonInsert::from_polygon("rec-1", &polygon);
        let json = serde_json::to_value(&insert).unwrap();

        assert_eq!(json["geometry"]["type"], "Polygon");
        let ring = json["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[0], serde_json::json!([100.0, 14.0]));
        assert_eq!(ring[1], serde_json::json!([100.01, 14.0]));
        assert_eq!(ring[3], ring[0]);
        assert_eq!(json["polygon_type"], "non-burn");
    }

    #[test]
    fn test_record_insert_location_is_lng_first() {
        let mut record = Record::new_draft(CropType::Sugarcane, "2024-01-01", "08:00");
        record.location = Some(Location::new(14.25, 100.75, Some(5.0)));
        record.remarks = Some("  ".into());
        let insert = RecordInsert::from_record("user-1", &record);
        assert_eq!(insert.location.as_deref(), Some("POINT(100.75 14.25)"));
        assert_eq!(insert.record_type, "sugarcane");
        assert_eq!(insert.notes, None);
        assert_eq!(insert.local_id, record.id);
    }

    #[test]
    fn test_row_into_record() {
        let json = r#"{
            "id": "7f1c",
            "user_id": "user-1",
            "record_type": "อ้อย",
            "notes": "windy",
            "location": "POINT(100.5 14.0)",
            "local_id": "1717000000000",
            "created_at": "2024-05-29T07:30:00+00:00",
            "burn_polygons": [
                {"id": "g1", "geometry": {"type": "Polygon", "coordinates": [[[100.0,14.0],[100.01,14.0],[100.01,14.01],[100.0,14.0]]]}, "area_sqm": 1600.0, "polygon_type": "burn"},
                {"id": "g2", "geometry": null}
            ],
            "burn_photos": [{"storage_path": "user-1/7f1c/photo_0_1.jpeg"}]
        }"#;
        let row: RecordRow = serde_json::from_str(json).unwrap();
        let record = row.into_record(vec!["https://signed/url".into()]);

        assert_eq!(record.id, "1717000000000");
        assert_eq!(record.crop_type(), CropType::Sugarcane);
        assert_eq!(record.status, RecordStatus::Saved);
        assert_eq!(record.sync.remote_id.as_deref(), Some("7f1c"));
        assert!(record.sync.synced);
        assert_eq!(record.location.as_ref().map(|l| l.lat), Some(14.0));
        assert_eq!(record.polygons.len(), 1);
        assert_eq!(record.polygons[0].points.len(), 3);
        assert_eq!(record.polygons[0].points[0], Coordinate::new(14.0, 100.0));
        assert_eq!(record.polygons[0].display_color, "#ef4444");
        assert_eq!(record.photos, vec!["https://signed/url".to_string()]);
    }
}
