/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of the record a generation job is attached to (a journal
/// entry for text jobs, a poem for audio jobs). Opaque to the tracker.
pub type EntityId = String;
