/// Catalog item identifiers (photos, rolls) are assigned by the server.
pub type ItemId = i64;

/// Job handles are generated client-side, one per submitted batch.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
