//! Row-per-record projection consumed by spreadsheet and document renderers.

use std::collections::HashSet;

use serde::Serialize;

use crate::geo::sq_meters_to_rai;
use crate::models::{BurnTiming, Classification, CropDetails, CropType, Record, RecordStatus, RiceFieldType};

const ABSENT: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub crop_type: String,
    pub status: String,
    pub total_area_rai: String,
    pub burn_area_rai: String,
    pub non_burn_area_rai: String,
    pub polygon_count: usize,
    pub latitude: String,
    pub longitude: String,
    pub accuracy: String,
    pub rice_field_type: String,
    pub rice_variety: String,
    pub burn_type: String,
    pub plowing: String,
    pub collecting: String,
    pub other_activities: String,
    pub remarks: String,
    pub photo_count: usize,
}

impl ExportRow {
    pub fn from_record(record: &Record) -> Self {
        let rai = |sq_m: f64| format!("{:.2}", sq_meters_to_rai(sq_m));
        let text_or_absent = |text: Option<&str>| {
            text.filter(|t| !t.trim().is_empty())
                .unwrap_or(ABSENT)
                .to_string()
        };

        let (rice_field_type, rice_variety, burn_type, plowing, collecting, other_activities) =
            match &record.crop {
                CropDetails::Rice { field_type, variety } => (
                    match field_type {
                        RiceFieldType::Dry => "dry",
                        RiceFieldType::Wet => "wet",
                        RiceFieldType::Unspecified => ABSENT,
                    }
                    .to_string(),
                    text_or_absent(variety.as_deref()),
                    ABSENT.to_string(),
                    yes_no(false),
                    yes_no(false),
                    ABSENT.to_string(),
                ),
                CropDetails::Sugarcane {
                    burn_timing,
                    activities,
                } => (
                    ABSENT.to_string(),
                    ABSENT.to_string(),
                    match burn_timing {
                        BurnTiming::BeforeHarvest => "before",
                        BurnTiming::AfterHarvest => "after",
                        BurnTiming::Unspecified => ABSENT,
                    }
                    .to_string(),
                    yes_no(activities.plowed),
                    yes_no(activities.residue_collected),
                    text_or_absent(activities.other_text.as_deref()),
                ),
            };

        let location = record.location.as_ref();

        Self {
            date: record.date.clone(),
            time: record.time.clone(),
            crop_type: match record.crop_type() {
                CropType::Rice => "rice",
                CropType::Sugarcane => "sugarcane",
            }
            .to_string(),
            status: match record.status {
                RecordStatus::Draft => "draft",
                RecordStatus::Saved => "saved",
            }
            .to_string(),
            total_area_rai: rai(record.total_area_sq_meters()),
            burn_area_rai: rai(record.area_sq_meters_by(Classification::Burn)),
            non_burn_area_rai: rai(record.area_sq_meters_by(Classification::NonBurn)),
            polygon_count: record.polygons.len(),
            latitude: location.map_or_else(|| ABSENT.to_string(), |l| format!("{:.6}", l.lat)),
            longitude: location.map_or_else(|| ABSENT.to_string(), |l| format!("{:.6}", l.lng)),
            accuracy: location
                .and_then(|l| l.accuracy_meters)
                .filter(|a| *a > 0.0)
                .map_or_else(|| ABSENT.to_string(), |a| a.to_string()),
            rice_field_type,
            rice_variety,
            burn_type,
            plowing,
            collecting,
            other_activities,
            remarks: text_or_absent(record.remarks.as_deref()),
            photo_count: record.photos.len(),
        }
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

/// Rows for the selected ids, in the order the records are listed.
pub fn export_rows(records: &[Record], selected_ids: &HashSet<String>) -> Vec<ExportRow> {
    records
        .iter()
        .filter(|r| selected_ids.contains(&r.id))
        .map(ExportRow::from_record)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::models::{Activities, Location, Polygon};

    fn polygon(area: f64, classification: Classification) -> Polygon {
        let mut polygon = Polygon::from_points(
            vec![
                Coordinate::new(14.0, 100.0),
                Coordinate::new(14.0, 100.001),
                Coordinate::new(14.001, 100.001),
            ],
            classification,
            "#ef4444",
        )
        .unwrap();
        polygon.area = area;
        polygon
    }

    #[test]
    fn test_sugarcane_row() {
        let mut record = Record::new_draft(CropType::Sugarcane, "2024-02-10", "07:45");
        record.crop = CropDetails::Sugarcane {
            burn_timing: BurnTiming::AfterHarvest,
            activities: Activities {
                plowed: true,
                residue_collected: false,
                other: true,
                other_text: Some("baling".into()),
            },
        };
        record.location = Some(Location::new(14.123456789, 100.5, None));
        record.polygons = vec![
            polygon(3200.0, Classification::Burn),
            polygon(1600.0, Classification::NonBurn),
        ];
        record.photos = vec!["data:image/jpeg;base64,AA==".into()];

        let row = ExportRow::from_record(&record);
        assert_eq!(row.crop_type, "sugarcane");
        assert_eq!(row.status, "draft");
        assert_eq!(row.total_area_rai, "3.00");
        assert_eq!(row.burn_area_rai, "2.00");
        assert_eq!(row.non_burn_area_rai, "1.00");
        assert_eq!(row.polygon_count, 2);
        assert_eq!(row.latitude, "14.123457");
        assert_eq!(row.longitude, "100.500000");
        assert_eq!(row.accuracy, "-");
        assert_eq!(row.rice_field_type, "-");
        assert_eq!(row.burn_type, "after");
        assert_eq!(row.plowing, "yes");
        assert_eq!(row.collecting, "no");
        assert_eq!(row.other_activities, "baling");
        assert_eq!(row.remarks, "-");
        assert_eq!(row.photo_count, 1);
    }

    #[test]
    fn test_selection_keeps_list_order() {
        let first = Record::new_draft(CropType::Rice, "2024-01-01", "08:00");
        let second = Record::new_draft(CropType::Rice, "2024-01-02", "08:00");
        let third = Record::new_draft(CropType::Rice, "2024-01-03", "08:00");
        let records = vec![first.clone(), second, third.clone()];

        let selected: HashSet<String> = [third.id.clone(), first.id.clone()].into_iter().collect();
        let rows = export_rows(&records, &selected);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "2024-01-01");
        assert_eq!(rows[1].date, "2024-01-03");
    }
}
