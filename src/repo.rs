//! Persistence over the runtime data model: attempt get-or-create, keyed
//! upserts for cmi data points and H5P content user data. No business logic.

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::models::{completion, success, H5pAttempt, ScormAttempt};

/// Get or create the single attempt for (user, package).
///
/// Race-safe: the unique constraint absorbs concurrent first calls, the
/// follow-up select returns whichever row won.
pub async fn get_or_create_scorm_attempt(
    conn: &mut SqliteConnection,
    user_id: i64,
    package_id: i64,
) -> Result<ScormAttempt, sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO scorm_attempts (user_id, package_id, started_at, last_accessed, completion_status, success_status)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id, package_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(package_id)
    .bind(now)
    .bind(now)
    .bind(completion::INCOMPLETE)
    .bind(success::UNKNOWN)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, ScormAttempt>(
        "SELECT * FROM scorm_attempts WHERE user_id = ? AND package_id = ?",
    )
    .bind(user_id)
    .bind(package_id)
    .fetch_one(conn)
    .await
}

pub async fn get_scorm_attempt(
    conn: &mut SqliteConnection,
    attempt_id: i64,
) -> Result<Option<ScormAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ScormAttempt>("SELECT * FROM scorm_attempts WHERE id = ?")
        .bind(attempt_id)
        .fetch_optional(conn)
        .await
}

pub async fn touch_scorm_attempt(
    conn: &mut SqliteConnection,
    attempt_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scorm_attempts SET last_accessed = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(attempt_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_or_create_h5p_attempt(
    conn: &mut SqliteConnection,
    user_id: i64,
    activity_id: i64,
) -> Result<H5pAttempt, sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO h5p_attempts (user_id, activity_id, started_at, last_accessed, completion_status, success_status)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id, activity_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(activity_id)
    .bind(now)
    .bind(now)
    .bind(completion::NOT_ATTEMPTED)
    .bind(success::UNKNOWN)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, H5pAttempt>(
        "SELECT * FROM h5p_attempts WHERE user_id = ? AND activity_id = ?",
    )
    .bind(user_id)
    .bind(activity_id)
    .fetch_one(conn)
    .await
}

pub async fn get_data_point(
    conn: &mut SqliteConnection,
    attempt_id: i64,
    key: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT value FROM scorm_data WHERE attempt_id = ? AND key = ?",
    )
    .bind(attempt_id)
    .bind(key)
    .fetch_optional(conn)
    .await
}

/// Upsert one cmi.* data point. Safe under concurrent writers for different
/// keys of the same attempt: the unique constraint keys the conflict target.
pub async fn upsert_data_point(
    conn: &mut SqliteConnection,
    attempt_id: i64,
    key: &str,
    value: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO scorm_data (attempt_id, key, value, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (attempt_id, key)
        DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(attempt_id)
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_content_user_data(
    conn: &mut SqliteConnection,
    attempt_id: i64,
    data_type: &str,
    sub_content_id: i64,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT value FROM content_user_data WHERE attempt_id = ? AND data_type = ? AND sub_content_id = ?",
    )
    .bind(attempt_id)
    .bind(data_type)
    .bind(sub_content_id)
    .fetch_optional(conn)
    .await
}

pub async fn upsert_content_user_data(
    conn: &mut SqliteConnection,
    attempt_id: i64,
    data_type: &str,
    sub_content_id: i64,
    value: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO content_user_data (attempt_id, data_type, sub_content_id, value, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (attempt_id, data_type, sub_content_id)
        DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(attempt_id)
    .bind(data_type)
    .bind(sub_content_id)
    .bind(value)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_content_user_data(
    conn: &mut SqliteConnection,
    attempt_id: i64,
    data_type: &str,
    sub_content_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM content_user_data WHERE attempt_id = ? AND data_type = ? AND sub_content_id = ?",
    )
    .bind(attempt_id)
    .bind(data_type)
    .bind(sub_content_id)
    .execute(conn)
    .await?;
    Ok(())
}
