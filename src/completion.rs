//! Completion propagation: activity → lesson → course/enrollment.
//!
//! Every level is idempotent. Enrollment completed_at is monotonic: the
//! `completed_at IS NULL` guard means a second pass with the same inputs is
//! a no-op, and an already-completed enrollment is never regressed.

use chrono::Utc;

use crate::db::Db;
use crate::models::completion;

/// SCORM path: the course owning the package has a single deliverable, so a
/// "completed"/"passed" lesson_status completes the enrollment directly.
pub async fn mark_scorm_enrollment_complete(
    pool: &Db,
    user_id: i64,
    package_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE enrollments SET completed_at = ?
        WHERE user_id = ?
          AND completed_at IS NULL
          AND course_id IN (SELECT id FROM courses WHERE scorm_package_id = ?)
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .bind(package_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// H5P path: walk every live lesson embedding the activity (via the
/// structural index) for courses the user is enrolled in; record a
/// LessonCompletion when all of a lesson's activities are completed, then
/// complete the enrollment once every trackable lesson of the course has one.
pub async fn propagate_h5p_completion(
    pool: &Db,
    user_id: i64,
    activity_id: i64,
) -> Result<(), sqlx::Error> {
    let lessons: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT l.id, l.course_id FROM lessons l
        JOIN lesson_activities la ON la.lesson_id = l.id
        JOIN enrollments e ON e.course_id = l.course_id AND e.user_id = ?
        WHERE la.activity_id = ? AND l.live = 1
        "#,
    )
    .bind(user_id)
    .bind(activity_id)
    .fetch_all(pool)
    .await?;

    for (lesson_id, course_id) in lessons {
        let incomplete_activities: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM lesson_activities la
            WHERE la.lesson_id = ?
              AND NOT EXISTS (
                SELECT 1 FROM h5p_attempts a
                WHERE a.activity_id = la.activity_id
                  AND a.user_id = ?
                  AND a.completion_status = ?
              )
            "#,
        )
        .bind(lesson_id)
        .bind(user_id)
        .bind(completion::COMPLETED)
        .fetch_one(pool)
        .await?;

        if incomplete_activities > 0 {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO lesson_completions (user_id, lesson_id, completed_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id, lesson_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        check_course_completion(pool, user_id, course_id).await?;
    }

    Ok(())
}

/// Complete the enrollment when every trackable lesson (live, embedding at
/// least one activity) has a LessonCompletion. Lessons with no activities
/// are informational and never block completion.
pub async fn check_course_completion(
    pool: &Db,
    user_id: i64,
    course_id: i64,
) -> Result<(), sqlx::Error> {
    let incomplete_trackable: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM lessons l
        WHERE l.course_id = ?
          AND l.live = 1
          AND EXISTS (SELECT 1 FROM lesson_activities la WHERE la.lesson_id = l.id)
          AND NOT EXISTS (
            SELECT 1 FROM lesson_completions lc
            WHERE lc.lesson_id = l.id AND lc.user_id = ?
          )
        "#,
    )
    .bind(course_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    if incomplete_trackable == 0 {
        sqlx::query(
            "UPDATE enrollments SET completed_at = ? WHERE user_id = ? AND course_id = ? AND completed_at IS NULL",
        )
        .bind(Utc::now())
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}
