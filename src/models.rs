use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Completion status values shared by SCORM and H5P attempts.
/// Completion and success are independent axes.
pub mod completion {
    pub const NOT_ATTEMPTED: &str = "not_attempted";
    pub const INCOMPLETE: &str = "incomplete";
    pub const COMPLETED: &str = "completed";
    pub const UNKNOWN: &str = "unknown";
}

pub mod success {
    pub const PASSED: &str = "passed";
    pub const FAILED: &str = "failed";
    pub const UNKNOWN: &str = "unknown";
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ScormPackage {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Storage path of the uploaded archive.
    pub package_file: String,
    /// Directory name under the SCORM content prefix; empty until extraction
    /// has succeeded for the current archive.
    pub extracted_path: String,
    pub launch_url: String,
    pub version: String,
    pub manifest_data: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct H5pActivity {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub package_file: String,
    pub extracted_path: String,
    pub main_library: String,
    pub h5p_json: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub scorm_package_id: Option<i64>,
    pub live: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub live: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub enrolled_at: DateTime<Utc>,
    /// Monotonic: set once by the completion propagator, never cleared.
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct LessonCompletion {
    pub id: i64,
    pub user_id: i64,
    pub lesson_id: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ScormAttempt {
    pub id: i64,
    pub user_id: i64,
    pub package_id: i64,
    pub started_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub completion_status: String,
    pub success_status: String,
    pub score_raw: Option<f64>,
    pub score_min: Option<f64>,
    pub score_max: Option<f64>,
    pub score_scaled: Option<f64>,
    pub total_time: Option<String>,
    pub location: String,
    pub suspend_data: String,
}

/// One generic cmi.* key/value row, unique per (attempt, key).
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ScormDataPoint {
    pub id: i64,
    pub attempt_id: i64,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct H5pAttempt {
    pub id: i64,
    pub user_id: i64,
    pub activity_id: i64,
    pub started_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub completion_status: String,
    pub success_status: String,
    pub score_raw: Option<f64>,
    pub score_min: Option<f64>,
    pub score_max: Option<f64>,
    pub score_scaled: Option<f64>,
}

/// Append-only audit log of raw xAPI statements.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct XapiStatementRow {
    pub id: i64,
    pub attempt_id: i64,
    pub verb: String,
    pub verb_display: String,
    pub statement: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// H5P resume state, unique per (attempt, data_type, sub_content_id).
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ContentUserData {
    pub id: i64,
    pub attempt_id: i64,
    pub data_type: String,
    pub sub_content_id: i64,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
