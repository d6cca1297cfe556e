//! xAPI statement ingestion for H5P activities: validation, audit-log
//! persistence, verb-to-state mapping and completion propagation.

use serde_json::Value;
use sqlx::types::Json;

use crate::completion;
use crate::db::Db;
use crate::models::{completion as completion_status, success, H5pAttempt};
use crate::repo;

pub const VERB_COMPLETED: &str = "http://adlnet.gov/expapi/verbs/completed";
pub const VERB_PASSED: &str = "http://adlnet.gov/expapi/verbs/passed";
pub const VERB_MASTERED: &str = "http://adlnet.gov/expapi/verbs/mastered";
pub const VERB_FAILED: &str = "http://adlnet.gov/expapi/verbs/failed";
pub const VERB_ANSWERED: &str = "http://adlnet.gov/expapi/verbs/answered";
pub const VERB_SCORED: &str = "http://adlnet.gov/expapi/verbs/scored";
/// Activity-streams "consume", emitted by non-trackable informational
/// content types.
pub const VERB_CONSUMED: &str = "http://activitystrea.ms/schema/1.0/consume";

const SCORE_VERBS: &[&str] = &[
    VERB_COMPLETED,
    VERB_PASSED,
    VERB_MASTERED,
    VERB_FAILED,
    VERB_ANSWERED,
    VERB_SCORED,
    VERB_CONSUMED,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StatementError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Statement must be a JSON object")]
    NotAnObject,
    #[error("Invalid verb")]
    InvalidVerb,
    #[error("Invalid result")]
    InvalidResult,
}

/// Validate a raw request body as an xAPI statement.
///
/// The body must be a JSON object whose `verb` is a JSON object (not null,
/// not a scalar) and whose `result`, when present, is a JSON object.
pub fn validate_statement(body: &[u8]) -> Result<Value, StatementError> {
    let statement: Value =
        serde_json::from_slice(body).map_err(|_| StatementError::InvalidJson)?;
    if !statement.is_object() {
        return Err(StatementError::NotAnObject);
    }
    match statement.get("verb") {
        Some(verb) if verb.is_object() => {}
        _ => return Err(StatementError::InvalidVerb),
    }
    if let Some(result) = statement.get("result") {
        if !result.is_object() {
            return Err(StatementError::InvalidResult);
        }
    }
    Ok(statement)
}

/// A statement is top-level unless its context names a non-empty parent
/// activity. Child-question statements inside container activities
/// (question sets, interactive video) carry a parent and must not trigger
/// completion on their own; only the container's terminal verb does.
pub fn is_top_level(statement: &Value) -> bool {
    match statement
        .pointer("/context/contextActivities/parent")
    {
        None | Some(Value::Null) => true,
        Some(Value::Array(parents)) => parents.is_empty(),
        Some(Value::Object(parent)) => parent.is_empty(),
        Some(_) => true,
    }
}

/// Extract verb IRI and a human-readable label (first value of the display
/// language map, empty when absent or malformed).
fn verb_metadata(statement: &Value) -> (String, String) {
    let verb = &statement["verb"];
    let id = verb
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let display = verb
        .get("display")
        .and_then(|d| d.as_object())
        .and_then(|map| map.values().next())
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    (id, display)
}

/// Accept a float from a JSON number or a numeric string; anything else is
/// ignored.
fn score_component(score: &Value, key: &str) -> Option<f64> {
    match score.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Ingest a validated statement for (user, activity): lazily create the
/// attempt, append the statement to the audit log, fold the verb into the
/// attempt's state, and propagate completion where the verb calls for it.
pub async fn ingest(
    pool: &Db,
    user_id: i64,
    activity_id: i64,
    statement: Value,
) -> Result<H5pAttempt, sqlx::Error> {
    let (verb_id, verb_display) = verb_metadata(&statement);
    let top_level = is_top_level(&statement);

    let mut tx = pool.begin().await?;
    let attempt = repo::get_or_create_h5p_attempt(&mut tx, user_id, activity_id).await?;

    sqlx::query(
        "INSERT INTO xapi_statements (attempt_id, verb, verb_display, statement, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(attempt.id)
    .bind(&verb_id)
    .bind(&verb_display)
    .bind(Json(&statement))
    .bind(chrono::Utc::now())
    .execute(&mut *tx)
    .await?;

    let triggers_completion = apply_verb(&mut tx, &attempt, &statement, &verb_id, top_level).await?;
    tx.commit().await?;

    if triggers_completion {
        completion::propagate_h5p_completion(pool, user_id, activity_id).await?;
    }

    let mut conn = pool.acquire().await?;
    repo::get_or_create_h5p_attempt(&mut conn, user_id, activity_id).await
}

/// Fold one verb into the attempt's completion/success/score fields.
/// Returns whether the verb triggers completion propagation.
async fn apply_verb(
    tx: &mut sqlx::SqliteConnection,
    attempt: &H5pAttempt,
    statement: &Value,
    verb_id: &str,
    top_level: bool,
) -> Result<bool, sqlx::Error> {
    let (new_completion, new_success) = match verb_id {
        VERB_COMPLETED | VERB_CONSUMED => (Some(completion_status::COMPLETED), None),
        VERB_PASSED | VERB_MASTERED => {
            (Some(completion_status::COMPLETED), Some(success::PASSED))
        }
        VERB_FAILED => (Some(completion_status::COMPLETED), Some(success::FAILED)),
        // A child question's "answered" must not complete the container.
        VERB_ANSWERED if top_level => (Some(completion_status::COMPLETED), None),
        _ => (None, None),
    };

    if let Some(status) = new_completion {
        sqlx::query("UPDATE h5p_attempts SET completion_status = ?, last_accessed = ? WHERE id = ?")
            .bind(status)
            .bind(chrono::Utc::now())
            .bind(attempt.id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(status) = new_success {
        sqlx::query("UPDATE h5p_attempts SET success_status = ? WHERE id = ?")
            .bind(status)
            .bind(attempt.id)
            .execute(&mut *tx)
            .await?;
    }

    if SCORE_VERBS.contains(&verb_id) {
        if let Some(score) = statement.pointer("/result/score") {
            for (column, key) in [
                ("score_raw", "raw"),
                ("score_max", "max"),
                ("score_min", "min"),
                ("score_scaled", "scaled"),
            ] {
                if let Some(value) = score_component(score, key) {
                    sqlx::query(&format!("UPDATE h5p_attempts SET {column} = ? WHERE id = ?"))
                        .bind(value)
                        .bind(attempt.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
    }

    Ok(new_completion.is_some())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::*;

    fn statement(verb: &str, display: &str) -> Value {
        json!({
            "actor": {"name": "learner", "mbox": "mailto:l@example.com"},
            "verb": {"id": verb, "display": {"en-US": display}},
            "object": {"id": "http://example.com/activity"}
        })
    }

    #[test]
    fn validation_rejects_malformed_bodies() {
        assert_eq!(validate_statement(b"{").unwrap_err(), StatementError::InvalidJson);
        assert_eq!(validate_statement(b"[1,2]").unwrap_err(), StatementError::NotAnObject);
        assert_eq!(validate_statement(b"\"str\"").unwrap_err(), StatementError::NotAnObject);
        assert_eq!(
            validate_statement(br#"{"verb": "not-an-object"}"#).unwrap_err(),
            StatementError::InvalidVerb
        );
        assert_eq!(
            validate_statement(br#"{"verb": null}"#).unwrap_err(),
            StatementError::InvalidVerb
        );
        assert_eq!(
            validate_statement(br#"{"actor": {}}"#).unwrap_err(),
            StatementError::InvalidVerb
        );
        assert_eq!(
            validate_statement(br#"{"verb": {}, "result": 5}"#).unwrap_err(),
            StatementError::InvalidResult
        );
    }

    #[test]
    fn validation_accepts_wellformed_statement() {
        let body = statement(VERB_COMPLETED, "completed").to_string();
        assert!(validate_statement(body.as_bytes()).is_ok());
    }

    #[test]
    fn top_level_detection() {
        assert!(is_top_level(&statement(VERB_ANSWERED, "answered")));

        let mut child = statement(VERB_ANSWERED, "answered");
        child["context"] = json!({
            "contextActivities": {"parent": [{"id": "http://example.com/container"}]}
        });
        assert!(!is_top_level(&child));

        let mut empty_parent = statement(VERB_ANSWERED, "answered");
        empty_parent["context"] = json!({"contextActivities": {"parent": []}});
        assert!(is_top_level(&empty_parent));
    }

    #[tokio::test]
    async fn completed_verb_sets_status_and_logs_statement() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;

        let attempt = ingest(&pool, 10, 1, statement(VERB_COMPLETED, "completed"))
            .await
            .unwrap();
        assert_eq!(attempt.completion_status, completion_status::COMPLETED);
        assert_eq!(attempt.success_status, success::UNKNOWN);

        let row = sqlx::query_as::<_, crate::models::XapiStatementRow>(
            "SELECT * FROM xapi_statements WHERE attempt_id = ?",
        )
        .bind(attempt.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.verb, VERB_COMPLETED);
        assert_eq!(row.verb_display, "completed");
        assert_eq!(row.statement.0["verb"]["id"], VERB_COMPLETED);
    }

    #[tokio::test]
    async fn passed_and_failed_set_both_axes() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;
        seed_h5p_activity(&pool, 2).await;

        let attempt = ingest(&pool, 10, 1, statement(VERB_PASSED, "passed"))
            .await
            .unwrap();
        assert_eq!(attempt.completion_status, completion_status::COMPLETED);
        assert_eq!(attempt.success_status, success::PASSED);

        let attempt = ingest(&pool, 10, 2, statement(VERB_FAILED, "failed"))
            .await
            .unwrap();
        assert_eq!(attempt.completion_status, completion_status::COMPLETED);
        assert_eq!(attempt.success_status, success::FAILED);
    }

    #[tokio::test]
    async fn mastered_counts_as_passed() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;

        let attempt = ingest(&pool, 10, 1, statement(VERB_MASTERED, "mastered"))
            .await
            .unwrap();
        assert_eq!(attempt.completion_status, completion_status::COMPLETED);
        assert_eq!(attempt.success_status, success::PASSED);
    }

    #[tokio::test]
    async fn answered_with_parent_context_does_not_complete() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;

        let mut child = statement(VERB_ANSWERED, "answered");
        child["context"] = json!({
            "contextActivities": {"parent": [{"id": "http://example.com/qs"}]}
        });
        let attempt = ingest(&pool, 10, 1, child).await.unwrap();
        assert_eq!(attempt.completion_status, completion_status::NOT_ATTEMPTED);

        let attempt = ingest(&pool, 10, 1, statement(VERB_ANSWERED, "answered"))
            .await
            .unwrap();
        assert_eq!(attempt.completion_status, completion_status::COMPLETED);
    }

    #[tokio::test]
    async fn scores_extracted_from_result() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;

        let mut scored = statement(VERB_SCORED, "scored");
        scored["result"] = json!({
            "score": {"raw": 75, "max": 100, "min": 0, "scaled": 0.75}
        });
        let attempt = ingest(&pool, 10, 1, scored).await.unwrap();
        assert_eq!(attempt.score_raw, Some(75.0));
        assert_eq!(attempt.score_max, Some(100.0));
        assert_eq!(attempt.score_min, Some(0.0));
        assert_eq!(attempt.score_scaled, Some(0.75));
        // scored alone never flips completion.
        assert_eq!(attempt.completion_status, completion_status::NOT_ATTEMPTED);
    }

    #[tokio::test]
    async fn unparsable_score_values_are_ignored() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;

        let mut scored = statement(VERB_SCORED, "scored");
        scored["result"] = json!({"score": {"raw": "ninety", "max": "100"}});
        let attempt = ingest(&pool, 10, 1, scored).await.unwrap();
        assert_eq!(attempt.score_raw, None);
        assert_eq!(attempt.score_max, Some(100.0));
    }

    #[tokio::test]
    async fn completion_propagates_to_enrollment() {
        let (pool, _dir) = test_pool().await;
        seed_h5p_activity(&pool, 1).await;
        seed_course(&pool, 1, None).await;
        seed_lesson(&pool, 1, 1).await;
        attach_activity(&pool, 1, 1).await;
        seed_enrollment(&pool, 10, 1).await;

        ingest(&pool, 10, 1, statement(VERB_PASSED, "passed")).await.unwrap();

        let completed: Option<chrono::DateTime<chrono::Utc>> =
            sqlx::query_scalar("SELECT completed_at FROM enrollments WHERE user_id = 10 AND course_id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(completed.is_some());
    }
}
