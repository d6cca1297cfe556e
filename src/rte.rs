//! SCORM Run-Time Environment API over the stored cmi data model.
//!
//! One stateless remote call per request: `{"method": ..., "parameters":
//! [...]}` in, `{"result": ..., "errorCode": ...}` out, always HTTP 200.
//! Protocol errors are result codes, never transport failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion;
use crate::config::RetryPolicy;
use crate::db::Db;
use crate::models::ScormAttempt;
use crate::repo;

/// Generic argument error: malformed body, missing parameters, unknown
/// method.
pub const ERROR_ARGUMENT: &str = "201";

/// The eight RTE methods. Closed set, matched exhaustively; anything else is
/// an argument error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RteMethod {
    Initialize,
    Terminate,
    GetValue,
    SetValue,
    Commit,
    GetErrorString,
    GetLastError,
    GetDiagnostic,
}

impl RteMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Initialize" => Some(Self::Initialize),
            "Terminate" => Some(Self::Terminate),
            "GetValue" => Some(Self::GetValue),
            "SetValue" => Some(Self::SetValue),
            "Commit" => Some(Self::Commit),
            "GetErrorString" => Some(Self::GetErrorString),
            "GetLastError" => Some(Self::GetLastError),
            "GetDiagnostic" => Some(Self::GetDiagnostic),
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct RteRequest {
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Value>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct RteResponse {
    pub result: String,
    #[serde(rename = "errorCode")]
    pub error_code: String,
}

impl RteResponse {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error_code: "0".to_string(),
        }
    }

    pub fn argument_error() -> Self {
        Self {
            result: "false".to_string(),
            error_code: ERROR_ARGUMENT.to_string(),
        }
    }
}

/// Dispatch one RTE call against an attempt. `student_name` comes from the
/// authentication collaborator and only feeds the GetValue default.
///
/// Protocol violations (malformed body, unknown method, missing parameters)
/// come back as argument-error responses; storage failures, including an
/// exhausted retry budget, propagate to the caller as fatal.
pub async fn dispatch(
    pool: &Db,
    retry: &RetryPolicy,
    attempt: &ScormAttempt,
    student_name: &str,
    body: &[u8],
) -> Result<RteResponse, sqlx::Error> {
    let request: RteRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(_) => return Ok(RteResponse::argument_error()),
    };
    let Some(method) = request.method.as_deref().and_then(RteMethod::from_name) else {
        return Ok(RteResponse::argument_error());
    };

    match method {
        RteMethod::Initialize | RteMethod::Commit => Ok(RteResponse::ok("true")),
        RteMethod::Terminate => {
            terminate(pool, attempt).await?;
            Ok(RteResponse::ok("true"))
        }
        RteMethod::GetValue => {
            let key = param_str(&request.parameters, 0);
            let value = get_value(pool, attempt, student_name, &key).await?;
            Ok(RteResponse::ok(value))
        }
        RteMethod::SetValue => {
            if request.parameters.len() < 2 {
                return Ok(RteResponse::argument_error());
            }
            let key = param_str(&request.parameters, 0);
            let value = param_str(&request.parameters, 1);
            set_value(pool, retry, attempt, &key, &value).await?;
            Ok(RteResponse::ok("true"))
        }
        RteMethod::GetErrorString => {
            let code = if request.parameters.is_empty() {
                "0".to_string()
            } else {
                param_str(&request.parameters, 0)
            };
            Ok(RteResponse::ok(error_string(&code)))
        }
        RteMethod::GetLastError => Ok(RteResponse::ok("0")),
        RteMethod::GetDiagnostic => Ok(RteResponse::ok("")),
    }
}

fn param_str(parameters: &[Value], index: usize) -> String {
    match parameters.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

async fn terminate(pool: &Db, attempt: &ScormAttempt) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    repo::touch_scorm_attempt(&mut conn, attempt.id).await
}

/// Stored value for the key, else a synthesized default for the well-known
/// cmi.core.* elements, else empty string.
pub async fn get_value(
    pool: &Db,
    attempt: &ScormAttempt,
    student_name: &str,
    key: &str,
) -> Result<String, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    if let Some(stored) = repo::get_data_point(&mut conn, attempt.id, key).await? {
        return Ok(stored);
    }

    let value = match key {
        "cmi.core.lesson_status" => attempt.completion_status.clone(),
        "cmi.core.student_id" => attempt.user_id.to_string(),
        "cmi.core.student_name" => student_name.to_string(),
        "cmi.core.credit" => "credit".to_string(),
        "cmi.core.entry" => "ab-initio".to_string(),
        "cmi.core.lesson_mode" => "normal".to_string(),
        "cmi.core.exit" => String::new(),
        "cmi.core.session_time" => String::new(),
        "cmi.core.total_time" => attempt
            .total_time
            .clone()
            .unwrap_or_else(|| "0000:00:00.00".to_string()),
        "cmi.core.lesson_location" => attempt.location.clone(),
        "cmi.suspend_data" => attempt.suspend_data.clone(),
        "cmi.core.score.raw" => format_score(attempt.score_raw),
        "cmi.core.score.max" => format_score(attempt.score_max),
        "cmi.core.score.min" => format_score(attempt.score_min),
        _ => String::new(),
    };
    Ok(value)
}

fn format_score(score: Option<f64>) -> String {
    score.map(|s| s.to_string()).unwrap_or_default()
}

/// Promote well-known keys to typed attempt fields and upsert the raw string
/// into the generic store, atomically. Retried on transient lock contention:
/// SCORM content issues rapid concurrent calls and SQLite rejects concurrent
/// writers with "database is locked".
pub async fn set_value(
    pool: &Db,
    retry: &RetryPolicy,
    attempt: &ScormAttempt,
    key: &str,
    value: &str,
) -> Result<(), sqlx::Error> {
    retry_on_busy(retry, move || async move {
        let mut tx = pool.begin().await?;

        match key {
            "cmi.core.lesson_status" => {
                sqlx::query("UPDATE scorm_attempts SET completion_status = ? WHERE id = ?")
                    .bind(value)
                    .bind(attempt.id)
                    .execute(&mut *tx)
                    .await?;
            }
            "cmi.core.lesson_location" => {
                sqlx::query("UPDATE scorm_attempts SET location = ? WHERE id = ?")
                    .bind(value)
                    .bind(attempt.id)
                    .execute(&mut *tx)
                    .await?;
            }
            "cmi.suspend_data" => {
                sqlx::query("UPDATE scorm_attempts SET suspend_data = ? WHERE id = ?")
                    .bind(value)
                    .bind(attempt.id)
                    .execute(&mut *tx)
                    .await?;
            }
            "cmi.core.score.raw" | "cmi.core.score.max" | "cmi.core.score.min" => {
                // Unparsable numeric input is ignored: no error, no field
                // mutation, but the raw value still lands in the data store.
                if let Ok(score) = value.parse::<f64>() {
                    let column = match key {
                        "cmi.core.score.raw" => "score_raw",
                        "cmi.core.score.max" => "score_max",
                        _ => "score_min",
                    };
                    sqlx::query(&format!("UPDATE scorm_attempts SET {column} = ? WHERE id = ?"))
                        .bind(score)
                        .bind(attempt.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            _ => {}
        }

        repo::upsert_data_point(&mut tx, attempt.id, key, value).await?;
        tx.commit().await
    })
    .await?;

    if key == "cmi.core.lesson_status" && matches!(value, "completed" | "passed") {
        completion::mark_scorm_enrollment_complete(pool, attempt.user_id, attempt.package_id)
            .await?;
    }
    Ok(())
}

/// Retry an operation on transient lock contention with exponential backoff.
/// Any other error, or exhausting the attempt budget, re-raises immediately.
/// Backends with row-level locking simply never take the retry branch.
pub async fn retry_on_busy<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay_ms = policy.initial_delay_ms as f64;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_busy_error(&e) {
                    return Err(e);
                }
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                delay_ms *= policy.backoff_factor;
            }
        }
    }
}

fn is_busy_error(e: &sqlx::Error) -> bool {
    e.to_string().to_lowercase().contains("database is locked")
}

/// SCORM 1.2 error code table.
pub fn error_string(code: &str) -> &'static str {
    match code {
        "0" => "No error",
        "101" => "General exception",
        "102" => "General initialization failure",
        "103" => "Already initialized",
        "104" => "Content instance terminated",
        "111" => "General termination failure",
        "112" => "Termination before initialization",
        "113" => "Termination after termination",
        "122" => "Retrieve data before initialization",
        "123" => "Retrieve data after termination",
        "132" => "Store data before initialization",
        "133" => "Store data after termination",
        "142" => "Commit before initialization",
        "143" => "Commit after termination",
        "201" => "General argument error",
        "301" => "General get failure",
        "401" => "General set failure",
        "402" => "General argument error",
        "403" => "Element cannot have children",
        "404" => "Element not an array - cannot have count",
        "405" => "Element is not an array - cannot have count",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::models::completion as completion_status;
    use crate::testutil::*;

    async fn attempt_fixture(pool: &Db) -> ScormAttempt {
        seed_scorm_package(pool, 1).await;
        let mut conn = pool.acquire().await.unwrap();
        repo::get_or_create_scorm_attempt(&mut conn, 42, 1).await.unwrap()
    }

    fn call(method: &str, parameters: serde_json::Value) -> Vec<u8> {
        serde_json::json!({ "method": method, "parameters": parameters })
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (pool, _dir) = test_pool().await;
        let attempt = attempt_fixture(&pool).await;
        let retry = RetryPolicy::default();

        let resp = dispatch(
            &pool,
            &retry,
            &attempt,
            "",
            &call("SetValue", serde_json::json!(["cmi.core.lesson_location", "page5"])),
        )
        .await
        .unwrap();
        assert_eq!(resp, RteResponse::ok("true"));

        let resp = dispatch(
            &pool,
            &retry,
            &attempt,
            "",
            &call("GetValue", serde_json::json!(["cmi.core.lesson_location"])),
        )
        .await
        .unwrap();
        assert_eq!(resp.result, "page5");
    }

    #[tokio::test]
    async fn fresh_attempt_synthesizes_defaults() {
        let (pool, _dir) = test_pool().await;
        let attempt = attempt_fixture(&pool).await;

        assert_eq!(
            get_value(&pool, &attempt, "Ada", "cmi.core.student_id").await.unwrap(),
            "42"
        );
        assert_eq!(
            get_value(&pool, &attempt, "Ada", "cmi.core.student_name").await.unwrap(),
            "Ada"
        );
        assert_eq!(
            get_value(&pool, &attempt, "", "cmi.core.lesson_status").await.unwrap(),
            completion_status::INCOMPLETE
        );
        assert_eq!(
            get_value(&pool, &attempt, "", "cmi.core.total_time").await.unwrap(),
            "0000:00:00.00"
        );
        assert_eq!(
            get_value(&pool, &attempt, "", "cmi.core.score.raw").await.unwrap(),
            ""
        );
        assert_eq!(get_value(&pool, &attempt, "", "cmi.no_such_key").await.unwrap(), "");
    }

    #[tokio::test]
    async fn unparsable_score_keeps_field_but_stores_raw() {
        let (pool, _dir) = test_pool().await;
        let attempt = attempt_fixture(&pool).await;
        let retry = RetryPolicy::default();

        set_value(&pool, &retry, &attempt, "cmi.core.score.raw", "ninety")
            .await
            .unwrap();

        let score: Option<f64> =
            sqlx::query_scalar("SELECT score_raw FROM scorm_attempts WHERE id = ?")
                .bind(attempt.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(score.is_none());
        assert_eq!(
            get_value(&pool, &attempt, "", "cmi.core.score.raw").await.unwrap(),
            "ninety"
        );
    }

    #[tokio::test]
    async fn lesson_status_promotes_and_completes_enrollment() {
        let (pool, _dir) = test_pool().await;
        let attempt = attempt_fixture(&pool).await;
        seed_course(&pool, 1, Some(1)).await;
        seed_enrollment(&pool, 42, 1).await;
        let retry = RetryPolicy::default();

        set_value(&pool, &retry, &attempt, "cmi.core.lesson_status", "passed")
            .await
            .unwrap();

        let status: String =
            sqlx::query_scalar("SELECT completion_status FROM scorm_attempts WHERE id = ?")
                .bind(attempt.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "passed");

        let completed: Option<chrono::DateTime<chrono::Utc>> =
            sqlx::query_scalar("SELECT completed_at FROM enrollments WHERE user_id = 42")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(completed.is_some());
    }

    #[tokio::test]
    async fn malformed_body_and_unknown_method_are_argument_errors() {
        let (pool, _dir) = test_pool().await;
        let attempt = attempt_fixture(&pool).await;
        let retry = RetryPolicy::default();

        let resp = dispatch(&pool, &retry, &attempt, "", b"not json").await.unwrap();
        assert_eq!(resp, RteResponse::argument_error());

        let resp = dispatch(&pool, &retry, &attempt, "", &call("Launch", serde_json::json!([])))
            .await
            .unwrap();
        assert_eq!(resp, RteResponse::argument_error());

        // SetValue with one parameter is missing its value.
        let resp = dispatch(&pool, &retry, &attempt, "", &call("SetValue", serde_json::json!(["k"])))
            .await
            .unwrap();
        assert_eq!(resp, RteResponse::argument_error());
    }

    #[tokio::test]
    async fn error_string_lookup() {
        assert_eq!(error_string("0"), "No error");
        assert_eq!(error_string("201"), "General argument error");
        assert_eq!(error_string("999"), "Unknown error");
    }

    #[tokio::test]
    async fn retry_recovers_within_budget() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1,
            backoff_factor: 1.0,
        };
        let failures = AtomicU32::new(3);
        let failures = &failures;
        let result = retry_on_busy(&policy, move || async move {
            if failures.fetch_sub(1, Ordering::SeqCst) > 1 {
                Err(sqlx::Error::Protocol("database is locked".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_propagates() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            backoff_factor: 1.0,
        };
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = retry_on_busy(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(sqlx::Error::Protocol("database is locked".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_busy_errors_fail_fast() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = retry_on_busy(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(sqlx::Error::RowNotFound)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
