//! Shared fixtures for unit tests: a migrated temp-file SQLite pool and row
//! seeders for the content-tree tables.

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

use crate::db::Db;

/// Fresh migrated database in a tempdir. Keep the returned `TempDir` alive
/// for the duration of the test.
pub async fn test_pool() -> (Db, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let options = SqliteConnectOptions::from_str(&url)
        .unwrap()
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    (pool, dir)
}

pub async fn seed_scorm_package(pool: &Db, id: i64) {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO scorm_packages (id, title, package_file, extracted_path, launch_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(format!("Package {id}"))
    .bind(format!("scorm_packages/pkg{id}.zip"))
    .bind(format!("package_{id}_pkg{id}"))
    .bind("index.html")
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_h5p_activity(pool: &Db, id: i64) {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO h5p_activities (id, title, package_file, extracted_path, main_library, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(format!("Activity {id}"))
    .bind(format!("h5p_packages/act{id}.h5p"))
    .bind(format!("h5p_{id}_act{id}"))
    .bind("H5P.QuestionSet")
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_course(pool: &Db, id: i64, scorm_package_id: Option<i64>) {
    sqlx::query("INSERT INTO courses (id, title, scorm_package_id, live, created_at) VALUES (?, ?, ?, 1, ?)")
        .bind(id)
        .bind(format!("Course {id}"))
        .bind(scorm_package_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_lesson(pool: &Db, id: i64, course_id: i64) {
    sqlx::query("INSERT INTO lessons (id, course_id, title, live, created_at) VALUES (?, ?, ?, 1, ?)")
        .bind(id)
        .bind(course_id)
        .bind(format!("Lesson {id}"))
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

pub async fn attach_activity(pool: &Db, lesson_id: i64, activity_id: i64) {
    sqlx::query("INSERT INTO lesson_activities (lesson_id, activity_id, position) VALUES (?, ?, 0)")
        .bind(lesson_id)
        .bind(activity_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_enrollment(pool: &Db, user_id: i64, course_id: i64) {
    sqlx::query("INSERT INTO enrollments (user_id, course_id, enrolled_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(course_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}
