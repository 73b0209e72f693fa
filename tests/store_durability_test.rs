use burnmap_rs::models::{Classification, CropType, Record, RecordStatus};
use burnmap_rs::geo::Coordinate;
use burnmap_rs::models::Polygon;
use burnmap_rs::{OwnerId, RecordStore};

fn drawn_polygon() -> Polygon {
    Polygon::from_points(
        vec![
            Coordinate::new(16.4, 102.8),
            Coordinate::new(16.4, 102.801),
            Coordinate::new(16.401, 102.801),
            Coordinate::new(16.401, 102.8),
        ],
        Classification::Burn,
        Classification::Burn.display_color(CropType::Sugarcane),
    )
    .unwrap()
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("burnmap.db");
    let owner = OwnerId::user("user-1");

    let mut record = Record::new_draft(CropType::Sugarcane, "2024-04-01", "16:20");
    record.polygons.push(drawn_polygon());
    record.photos.push("data:image/png;base64,aGVsbG8=".to_string());

    {
        let store = RecordStore::open(&path).unwrap();
        assert!(store.upsert(&owner, record.clone()));
        assert!(store.set_status(&owner, &record.id, RecordStatus::Saved));
    }

    let store = RecordStore::open(&path).unwrap();
    let reloaded = store.get(&owner, &record.id).unwrap();
    assert_eq!(reloaded.status, RecordStatus::Saved);
    assert_eq!(reloaded.polygons, record.polygons);
    assert_eq!(reloaded.photos, record.photos);
    assert_eq!(reloaded.created_at, record.created_at);
    assert!(store.get_all(&OwnerId::Guest).is_empty());
}

#[test]
fn test_clear_all_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("burnmap.db");

    {
        let store = RecordStore::open(&path).unwrap();
        store.upsert(&OwnerId::user("a"), Record::new_draft(CropType::Rice, "2024-04-01", "08:00"));
        store.upsert(&OwnerId::Guest, Record::new_draft(CropType::Rice, "2024-04-01", "08:00"));
        assert!(store.clear_all());
    }

    let store = RecordStore::open(&path).unwrap();
    assert!(store.get_all(&OwnerId::user("a")).is_empty());
    assert!(store.get_all(&OwnerId::Guest).is_empty());
}
