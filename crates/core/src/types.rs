/// Primary keys are time-ordered UUIDs so ids sort by creation.
pub type DbId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new primary key.
pub fn new_id() -> DbId {
    uuid::Uuid::now_v7()
}
