use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{self, Coordinate};

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropType {
    Rice,
    Sugarcane,
}

impl CropType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CropType::Rice => "rice",
            CropType::Sugarcane => "sugarcane",
        }
    }

    /// Parses the remote `record_type` column, which older clients wrote as Thai labels.
    pub fn from_remote(s: &str) -> Option<Self> {
        match s.trim() {
            "rice" | "ข้าว" => Some(CropType::Rice),
            "sugarcane" | "อ้อย" => Some(CropType::Sugarcane),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "burn")]
    Burn,
    #[serde(rename = "non-burn")]
    NonBurn,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Burn => "burn",
            Classification::NonBurn => "non-burn",
        }
    }

    pub fn display_color(&self, crop: CropType) -> &'static str {
        match (self, crop) {
            (Classification::Burn, CropType::Rice) => "#f59e0b",
            (Classification::Burn, CropType::Sugarcane) => "#ef4444",
            (Classification::NonBurn, _) => "#10b981",
        }
    }
}

impl From<&str> for Classification {
    fn from(s: &str) -> Self {
        match s {
            "non-burn" | "non_burn" | "nonburn" => Classification::NonBurn,
            _ => Classification::Burn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Saved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiceFieldType {
    Dry,
    Wet,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurnTiming {
    #[serde(rename = "before")]
    BeforeHarvest,
    #[serde(rename = "after")]
    AfterHarvest,
    #[default]
    #[serde(rename = "unspecified")]
    Unspecified,
}

// ===== DATA STRUCTURES =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(
        rename = "accuracy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub accuracy_meters: Option<f64>,
}

impl Location {
    pub fn new(lat: f64, lng: f64, accuracy_meters: Option<f64>) -> Self {
        Self {
            lat,
            lng,
            accuracy_meters,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// A finalized plot boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub id: String,
    pub points: Vec<Coordinate>,
    pub area: f64,
    #[serde(rename = "type")]
    pub classification: Classification,
    #[serde(rename = "color")]
    pub display_color: String,
}

impl Polygon {
    /// Builds a polygon from drawn vertices. Returns `None` below three points.
    pub fn from_points(
        points: Vec<Coordinate>,
        classification: Classification,
        display_color: impl Into<String>,
    ) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        Some(Self {
            id: new_local_id(),
            area: geo::area_sq_meters(&points),
            points,
            classification,
            display_color: display_color.into(),
        })
    }

    pub fn area_rai(&self) -> f64 {
        geo::sq_meters_to_rai(self.area)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activities {
    #[serde(rename = "plowing", default)]
    pub plowed: bool,
    #[serde(rename = "collecting", default)]
    pub residue_collected: bool,
    #[serde(default)]
    pub other: bool,
    #[serde(rename = "otherText", default, skip_serializing_if = "Option::is_none")]
    pub other_text: Option<String>,
}

/// Crop-specific form fields, tagged by the record's `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CropDetails {
    Rice {
        #[serde(rename = "riceFieldType", default)]
        field_type: RiceFieldType,
        #[serde(rename = "riceVariety", default, skip_serializing_if = "Option::is_none")]
        variety: Option<String>,
    },
    Sugarcane {
        #[serde(rename = "burnType", default)]
        burn_timing: BurnTiming,
        #[serde(default)]
        activities: Activities,
    },
}

impl CropDetails {
    pub fn empty(crop: CropType) -> Self {
        match crop {
            CropType::Rice => CropDetails::Rice {
                field_type: RiceFieldType::Unspecified,
                variety: None,
            },
            CropType::Sugarcane => CropDetails::Sugarcane {
                burn_timing: BurnTiming::Unspecified,
                activities: Activities::default(),
            },
        }
    }

    pub fn crop_type(&self) -> CropType {
        match self {
            CropDetails::Rice { .. } => CropType::Rice,
            CropDetails::Sugarcane { .. } => CropType::Sugarcane,
        }
    }
}

/// Remote write state. `remote_id` is only ever set together with `synced = true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub synced: bool,
    #[serde(rename = "supabaseId", default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

/// One field-visit observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub crop: CropDetails,
    pub date: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub polygons: Vec<Polygon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    /// Base64 data URLs until synced; signed URLs on records fetched from the backend.
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub status: RecordStatus,
    #[serde(flatten)]
    pub sync: SyncState,
}

impl Record {
    /// Starts a draft stamped with the current time.
    pub fn new_draft(crop: CropType, date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id: new_local_id(),
            crop: CropDetails::empty(crop),
            date: date.into(),
            time: time.into(),
            location: None,
            polygons: Vec::new(),
            remarks: None,
            photos: Vec::new(),
            created_at: Utc::now(),
            status: RecordStatus::Draft,
            sync: SyncState::default(),
        }
    }

    pub fn crop_type(&self) -> CropType {
        self.crop.crop_type()
    }

    pub fn is_draft(&self) -> bool {
        self.status == RecordStatus::Draft
    }

    pub fn is_synced(&self) -> bool {
        self.sync.synced
    }

    /// Saved and not yet written remotely.
    pub fn is_sync_eligible(&self) -> bool {
        self.status == RecordStatus::Saved && !self.sync.synced
    }

    pub fn total_area_sq_meters(&self) -> f64 {
        self.polygons.iter().map(|p| p.area).sum()
    }

    pub fn area_sq_meters_by(&self, classification: Classification) -> f64 {
        self.polygons
            .iter()
            .filter(|p| p.classification == classification)
            .map(|p| p.area)
            .sum()
    }

    /// Applies the one-way Draft -> Saved transition. Saved never reverts.
    pub fn apply_status(&mut self, status: RecordStatus) -> bool {
        match (self.status, status) {
            (RecordStatus::Draft, RecordStatus::Saved) => {
                self.status = RecordStatus::Saved;
                true
            }
            _ => false,
        }
    }

    /// Records a successful remote write. Only a Saved, unsynced record accepts it.
    pub fn mark_synced(&mut self, remote_id: String) -> bool {
        if !self.is_sync_eligible() {
            return false;
        }
        self.sync = SyncState {
            synced: true,
            remote_id: Some(remote_id),
        };
        true
    }
}

static LOCAL_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Time-based client identifier, unique within the process.
pub fn new_local_id() -> String {
    let seq = LOCAL_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}{:03}", Utc::now().timestamp_millis(), seq % 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_json_shape() {
        let json = r##"{
            "id": "1717000000000",
            "type": "sugarcane",
            "date": "2024-05-29",
            "time": "14:30",
            "location": {"lat": 14.1, "lng": 100.6, "accuracy": 12.5},
            "polygons": [{
                "id": "p1",
                "points": [[14.1, 100.6], [14.1, 100.61], [14.11, 100.61]],
                "area": 1234.5,
                "type": "non-burn",
                "color": "#10b981"
            }],
            "burnType": "after",
            "activities": {"plowing": true, "collecting": false, "other": true, "otherText": "mulch"},
            "photos": ["data:image/png;base64,AAAA"],
            "createdAt": "2024-05-29T07:30:00.000Z",
            "status": "saved",
            "synced": true,
            "supabaseId": "abc-123"
        }"##;

        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.crop_type(), CropType::Sugarcane);
        assert_eq!(record.status, RecordStatus::Saved);
        assert_eq!(record.sync.remote_id.as_deref(), Some("abc-123"));
        assert_eq!(record.polygons[0].classification, Classification::NonBurn);
        assert_eq!(record.polygons[0].points[0], Coordinate::new(14.1, 100.6));
        match &record.crop {
            CropDetails::Sugarcane {
                burn_timing,
                activities,
            } => {
                assert_eq!(*burn_timing, BurnTiming::AfterHarvest);
                assert!(activities.plowed);
                assert_eq!(activities.other_text.as_deref(), Some("mulch"));
            }
            other => panic!("unexpected crop details {other:?}"),
        }

        let back: Record = serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_missing_sync_fields_default_to_unsynced() {
        let json = r#"{"id":"1","type":"rice","date":"d","time":"t",
            "createdAt":"2024-01-01T00:00:00Z","status":"draft"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert!(!record.is_synced());
        assert!(record.location.is_none());
        assert_eq!(
            record.crop,
            CropDetails::Rice {
                field_type: RiceFieldType::Unspecified,
                variety: None
            }
        );
    }

    #[test]
    fn test_status_is_one_way() {
        let mut record = Record::new_draft(CropType::Rice, "2024-01-01", "09:00");
        assert!(record.apply_status(RecordStatus::Saved));
        assert!(!record.apply_status(RecordStatus::Draft));
        assert_eq!(record.status, RecordStatus::Saved);
    }

    #[test]
    fn test_drafts_cannot_be_marked_synced() {
        let mut record = Record::new_draft(CropType::Rice, "2024-01-01", "09:00");
        assert!(!record.mark_synced("r1".into()));
        assert_eq!(record.sync, SyncState::default());

        record.apply_status(RecordStatus::Saved);
        assert!(record.mark_synced("r1".into()));
        assert!(!record.mark_synced("r2".into()));
        assert_eq!(record.sync.remote_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_polygon_needs_three_points() {
        let two = vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)];
        assert!(Polygon::from_points(two, Classification::Burn, "#f00").is_none());
    }

    #[test]
    fn test_local_ids_are_unique() {
        let a = new_local_id();
        let b = new_local_id();
        assert_ne!(a, b);
    }
}
