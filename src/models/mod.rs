pub mod record;
pub mod remote;
pub mod serde_helpers;

// Local aggregate at the top level; wire shapes stay under `remote`.
pub use record::{
    new_local_id, Activities, BurnTiming, Classification, CropDetails, CropType, Location,
    Polygon, Record, RecordStatus, RiceFieldType, SyncState,
};
