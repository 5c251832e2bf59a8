/// Opaque job identifier, assigned once at submission.
pub type JobId = String;

/// Identifier of the user that owns a job or a connection.
pub type UserId = String;

/// Identifier of a single physical delivery channel.
pub type ConnectionId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
