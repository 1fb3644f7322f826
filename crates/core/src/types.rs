/// Caller-side owner identifiers are PostgreSQL BIGINTs.
pub type DbId = i64;

/// Batches are keyed by UUID v7 so they sort by creation time.
pub type BatchId = uuid::Uuid;

/// Jobs are keyed by UUID v7; the id survives retries.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
