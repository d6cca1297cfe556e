use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::{Form, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Deserialize;
use serde_json::json;
use sqlx::types::Json as SqlJson;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::extract::{self, PackageKind};
use crate::models::*;
use crate::state::AppState;
use crate::uow::Uow;
use crate::{repo, rte, serve, xapi};

/// Characters percent-encoded when embedding a storage path in a URL path.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}');

/// Cap on H5P content-user-data payloads (64 KiB).
const USER_DATA_MAX_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // package and activity management
        .route("/api/scorm-packages", post(upload_scorm_package))
        .route("/api/scorm-packages/:id", delete(delete_scorm_package))
        .route("/api/h5p-activities", post(upload_h5p_activity))
        .route("/api/h5p-activities/:id", delete(delete_h5p_activity))
        .route("/api/h5p-activities/:id/package", post(replace_h5p_package))
        // content tree
        .route("/api/courses", post(create_course))
        .route("/api/courses/:id/lessons", post(create_lesson))
        .route("/api/lessons/:id/activities", post(attach_lesson_activity))
        // learner surface
        .route("/api/courses/:id/enroll", post(enroll_in_course))
        .route("/api/courses/:id/scorm-launch", post(scorm_launch))
        // runtime API
        .route(
            "/lms/scorm-api/:attempt_id",
            post(scorm_api).get(scorm_api_wrong_method),
        )
        .route("/lms/h5p-xapi/:activity_id", post(h5p_xapi))
        .route(
            "/lms/h5p-content-user-data/:activity_id",
            get(content_user_data_get).post(content_user_data_post),
        )
        // extracted content
        .route("/lms/scorm-content/*path", get(serve_scorm_content))
        .route("/lms/h5p-content/*path", get(serve_h5p_content))
        .with_state(state)
}

// --- uploads ---

struct Upload {
    title: String,
    description: String,
    filename: String,
    bytes: Vec<u8>,
}

async fn read_upload(mp: &mut Multipart, default_filename: &str) -> Result<Upload, AppError> {
    let mut title = String::new();
    let mut description = String::new();
    let mut filename = default_filename.to_string();
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => {
                title = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
            }
            "description" => {
                description = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
            }
            "file" => {
                if let Some(name) = field.file_name() {
                    filename = safe_basename(name, default_filename);
                }
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| AppError::BadRequest("file is required".into()))?;
    Ok(Upload {
        title,
        description,
        filename,
        bytes,
    })
}

fn safe_basename(name: &str, fallback: &str) -> String {
    let name = name.replace('\\', "/");
    let base = name.rsplit('/').next().unwrap_or("");
    if base.is_empty() || base == "." || base == ".." {
        fallback.to_string()
    } else {
        base.to_string()
    }
}

#[axum::debug_handler]
async fn upload_scorm_package(
    State(state): State<AppState>,
    user: CurrentUser,
    mut mp: Multipart,
) -> Result<Json<ScormPackage>, AppError> {
    user.require_editor()?;
    let upload = read_upload(&mut mp, "package.zip").await?;
    // Reject unreadable or corrupted archives before anything is persisted.
    extract::validate_archive(&upload.bytes)?;

    // Two-phase: create the record first (the extraction directory name
    // derives from its id), then extract and fill in the derived fields.
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO scorm_packages (title, description, package_file, created_at, updated_at) VALUES (?, ?, '', ?, ?)",
    )
    .bind(&upload.title)
    .bind(&upload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;
    let id = result.last_insert_rowid();

    let package_file = format!("{}/{}_{}", state.config.scorm_upload_path, id, upload.filename);
    state
        .store
        .save(&package_file, &upload.bytes)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let dir_name = extract::extraction_dir_name(PackageKind::Scorm, id, &upload.filename);
    let extracted = extract::extract_package(
        state.store.as_ref(),
        &state.config.scorm_content_path,
        &dir_name,
        &upload.bytes,
        PackageKind::Scorm,
    )
    .await?;

    let manifest = extracted.scorm_manifest.unwrap_or_default();
    let version = if manifest.version.is_empty() {
        "1.2".to_string()
    } else {
        manifest.version.clone()
    };
    let title = if upload.title.is_empty() {
        manifest.title.clone()
    } else {
        upload.title.clone()
    };
    let manifest_data = json!({
        "title": manifest.title,
        "version": version,
        "launch_url": manifest.launch_url,
    });

    sqlx::query(
        r#"
        UPDATE scorm_packages
        SET package_file = ?, extracted_path = ?, launch_url = ?, version = ?,
            manifest_data = ?, title = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&package_file)
    .bind(&dir_name)
    .bind(&manifest.launch_url)
    .bind(&version)
    .bind(SqlJson(&manifest_data))
    .bind(&title)
    .bind(Utc::now())
    .bind(id)
    .execute(&state.pool)
    .await?;

    let package = sqlx::query_as::<_, ScormPackage>("SELECT * FROM scorm_packages WHERE id = ?")
        .bind(id)
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(package))
}

async fn upload_h5p_activity(
    State(state): State<AppState>,
    user: CurrentUser,
    mut mp: Multipart,
) -> Result<Json<H5pActivity>, AppError> {
    user.require_editor()?;
    let upload = read_upload(&mut mp, "activity.h5p").await?;
    extract::validate_archive(&upload.bytes)?;

    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO h5p_activities (title, description, package_file, created_at, updated_at) VALUES (?, ?, '', ?, ?)",
    )
    .bind(&upload.title)
    .bind(&upload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;
    let id = result.last_insert_rowid();

    let package_file = format!("{}/{}_{}", state.config.h5p_upload_path, id, upload.filename);
    state
        .store
        .save(&package_file, &upload.bytes)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let dir_name = extract::extraction_dir_name(PackageKind::H5p, id, &upload.filename);
    let extracted = extract::extract_package(
        state.store.as_ref(),
        &state.config.h5p_content_path,
        &dir_name,
        &upload.bytes,
        PackageKind::H5p,
    )
    .await?;

    let meta = extracted.h5p_meta.unwrap_or_default();
    let title = if upload.title.is_empty() {
        meta.title.clone()
    } else {
        upload.title.clone()
    };

    sqlx::query(
        r#"
        UPDATE h5p_activities
        SET package_file = ?, extracted_path = ?, main_library = ?, h5p_json = ?,
            title = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&package_file)
    .bind(&dir_name)
    .bind(&meta.main_library)
    .bind(SqlJson(&meta.raw))
    .bind(&title)
    .bind(Utc::now())
    .bind(id)
    .execute(&state.pool)
    .await?;

    let activity = sqlx::query_as::<_, H5pActivity>("SELECT * FROM h5p_activities WHERE id = ?")
        .bind(id)
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(activity))
}

/// Replace the archive of an existing H5P activity: re-extract under the
/// freshly computed directory, clean up files the new package no longer
/// contains when the directory name collides, and defer deletion of the
/// superseded archive and tree until the record update commits.
async fn replace_h5p_package(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: CurrentUser,
    mut mp: Multipart,
) -> Result<Json<H5pActivity>, AppError> {
    user.require_editor()?;
    let existing = sqlx::query_as::<_, H5pActivity>("SELECT * FROM h5p_activities WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)?;

    let upload = read_upload(&mut mp, "activity.h5p").await?;
    extract::validate_archive(&upload.bytes)?;

    let new_package_file = format!("{}/{}_{}", state.config.h5p_upload_path, id, upload.filename);
    let new_dir = extract::extraction_dir_name(PackageKind::H5p, id, &upload.filename);

    // Same-path replacement: snapshot the old file list first so files the
    // new package no longer contains can be deleted afterwards.
    let same_path_old_files: Option<HashSet<String>> =
        if !existing.extracted_path.is_empty() && new_dir == existing.extracted_path {
            let prefix = format!("{}/{}", state.config.h5p_content_path, existing.extracted_path);
            match state.store.list_files(&prefix).await {
                Ok(files) => Some(files.into_iter().collect()),
                Err(e) => {
                    tracing::warn!(
                        path = %existing.extracted_path,
                        error = %e,
                        "failed to list old extracted content before re-extracting replacement"
                    );
                    None
                }
            }
        } else {
            None
        };

    state
        .store
        .save(&new_package_file, &upload.bytes)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let extracted = extract::extract_package(
        state.store.as_ref(),
        &state.config.h5p_content_path,
        &new_dir,
        &upload.bytes,
        PackageKind::H5p,
    )
    .await?;
    let meta = extracted.h5p_meta.unwrap_or_default();

    let mut uow = Uow::begin(&state.pool).await?;
    sqlx::query(
        r#"
        UPDATE h5p_activities
        SET package_file = ?, extracted_path = ?, main_library = ?, h5p_json = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&new_package_file)
    .bind(&new_dir)
    .bind(&meta.main_library)
    .bind(SqlJson(&meta.raw))
    .bind(Utc::now())
    .bind(id)
    .execute(uow.tx())
    .await?;

    // Superseded content goes away only after the commit; a rollback keeps
    // the originals intact.
    let old_package = (existing.package_file != new_package_file && !existing.package_file.is_empty())
        .then(|| existing.package_file.clone());
    let old_extracted = (existing.extracted_path != new_dir && !existing.extracted_path.is_empty())
        .then(|| existing.extracted_path.clone());
    if old_package.is_some() || old_extracted.is_some() {
        let store = state.store.clone();
        let content_path = state.config.h5p_content_path.clone();
        uow.on_commit(async move {
            if let Some(path) = old_package {
                if let Err(e) = store.delete(&path).await {
                    tracing::warn!(path = %path, error = %e, "failed to delete replaced package file");
                }
            }
            if let Some(dir) = old_extracted {
                extract::delete_extracted_tree(store.as_ref(), &content_path, &dir).await;
            }
        });
    }
    uow.commit().await?;

    if let Some(old_files) = same_path_old_files {
        extract::cleanup_stale_files(state.store.as_ref(), &old_files, &extracted.file_paths).await;
    }

    let activity = sqlx::query_as::<_, H5pActivity>("SELECT * FROM h5p_activities WHERE id = ?")
        .bind(id)
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(activity))
}

// --- deletion ---

async fn delete_scorm_package(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_editor()?;
    let existing = sqlx::query_as::<_, ScormPackage>("SELECT * FROM scorm_packages WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut uow = Uow::begin(&state.pool).await?;
    sqlx::query("DELETE FROM scorm_packages WHERE id = ?")
        .bind(id)
        .execute(uow.tx())
        .await?;

    let store = state.store.clone();
    let content_path = state.config.scorm_content_path.clone();
    uow.on_commit(async move {
        if !existing.package_file.is_empty() {
            if let Err(e) = store.delete(&existing.package_file).await {
                tracing::warn!(path = %existing.package_file, error = %e, "failed to delete package file");
            }
        }
        if !existing.extracted_path.is_empty() {
            extract::delete_extracted_tree(store.as_ref(), &content_path, &existing.extracted_path)
                .await;
        }
    });
    uow.commit().await?;
    Ok(Json(json!({ "status": "deleted" })))
}

async fn delete_h5p_activity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_editor()?;
    let existing = sqlx::query_as::<_, H5pActivity>("SELECT * FROM h5p_activities WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut uow = Uow::begin(&state.pool).await?;
    sqlx::query("DELETE FROM h5p_activities WHERE id = ?")
        .bind(id)
        .execute(uow.tx())
        .await?;

    let store = state.store.clone();
    let content_path = state.config.h5p_content_path.clone();
    uow.on_commit(async move {
        if !existing.package_file.is_empty() {
            if let Err(e) = store.delete(&existing.package_file).await {
                tracing::warn!(path = %existing.package_file, error = %e, "failed to delete package file");
            }
        }
        if !existing.extracted_path.is_empty() {
            extract::delete_extracted_tree(store.as_ref(), &content_path, &existing.extracted_path)
                .await;
        }
    });
    uow.commit().await?;
    Ok(Json(json!({ "status": "deleted" })))
}

// --- content tree ---

#[derive(Deserialize)]
struct CreateCourseReq {
    title: String,
    scorm_package_id: Option<i64>,
    #[serde(default = "default_live")]
    live: bool,
}

#[derive(Deserialize)]
struct CreateLessonReq {
    title: String,
    #[serde(default = "default_live")]
    live: bool,
}

#[derive(Deserialize)]
struct AttachActivityReq {
    activity_id: i64,
    #[serde(default)]
    position: i64,
}

fn default_live() -> bool {
    true
}

async fn create_course(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateCourseReq>,
) -> Result<Json<Course>, AppError> {
    user.require_editor()?;
    let result = sqlx::query(
        "INSERT INTO courses (title, scorm_package_id, live, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&req.title)
    .bind(req.scorm_package_id)
    .bind(req.live)
    .bind(Utc::now())
    .execute(&state.pool)
    .await?;

    let course = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = ?")
        .bind(result.last_insert_rowid())
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(course))
}

async fn create_lesson(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    user: CurrentUser,
    Json(req): Json<CreateLessonReq>,
) -> Result<Json<Lesson>, AppError> {
    user.require_editor()?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&state.pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound);
    }

    let result =
        sqlx::query("INSERT INTO lessons (course_id, title, live, created_at) VALUES (?, ?, ?, ?)")
            .bind(course_id)
            .bind(&req.title)
            .bind(req.live)
            .bind(Utc::now())
            .execute(&state.pool)
            .await?;

    let lesson = sqlx::query_as::<_, Lesson>("SELECT * FROM lessons WHERE id = ?")
        .bind(result.last_insert_rowid())
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(lesson))
}

async fn attach_lesson_activity(
    State(state): State<AppState>,
    Path(lesson_id): Path<i64>,
    user: CurrentUser,
    Json(req): Json<AttachActivityReq>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require_editor()?;
    let lesson: Option<i64> = sqlx::query_scalar("SELECT id FROM lessons WHERE id = ?")
        .bind(lesson_id)
        .fetch_optional(&state.pool)
        .await?;
    let activity: Option<i64> = sqlx::query_scalar("SELECT id FROM h5p_activities WHERE id = ?")
        .bind(req.activity_id)
        .fetch_optional(&state.pool)
        .await?;
    if lesson.is_none() || activity.is_none() {
        return Err(AppError::NotFound);
    }

    sqlx::query(
        r#"
        INSERT INTO lesson_activities (lesson_id, activity_id, position)
        VALUES (?, ?, ?)
        ON CONFLICT (lesson_id, activity_id) DO UPDATE SET position = excluded.position
        "#,
    )
    .bind(lesson_id)
    .bind(req.activity_id)
    .bind(req.position)
    .execute(&state.pool)
    .await?;
    Ok(Json(json!({ "status": "attached" })))
}

// --- enrollment and launch ---

async fn enroll_in_course(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    user: CurrentUser,
) -> Result<Json<Enrollment>, AppError> {
    let course: Option<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&state.pool)
        .await?;
    if course.is_none() {
        return Err(AppError::NotFound);
    }

    let enrollment = get_or_create_enrollment(&state, user.id, course_id).await?;
    Ok(Json(enrollment))
}

async fn get_or_create_enrollment(
    state: &AppState,
    user_id: i64,
    course_id: i64,
) -> Result<Enrollment, AppError> {
    sqlx::query(
        r#"
        INSERT INTO enrollments (user_id, course_id, enrolled_at)
        VALUES (?, ?, ?)
        ON CONFLICT (user_id, course_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(Utc::now())
    .execute(&state.pool)
    .await?;

    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(enrollment)
}

#[derive(serde::Serialize)]
struct LaunchInfo {
    attempt_id: i64,
    launch_url: String,
}

/// Verify the course's package is ready, enroll (per configuration), and
/// get-or-create the attempt the player's RTE calls will run against.
async fn scorm_launch(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    user: CurrentUser,
) -> Result<Json<LaunchInfo>, AppError> {
    let course = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)?;

    let Some(package_id) = course.scorm_package_id else {
        return Err(AppError::BadRequest(
            "This course doesn't have a SCORM package assigned.".into(),
        ));
    };
    let package = sqlx::query_as::<_, ScormPackage>("SELECT * FROM scorm_packages WHERE id = ?")
        .bind(package_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)?;
    if package.extracted_path.is_empty() || package.launch_url.is_empty() {
        return Err(AppError::BadRequest(
            "SCORM package is not properly extracted or has no launch URL.".into(),
        ));
    }

    let enrolled: Option<i64> =
        sqlx::query_scalar("SELECT id FROM enrollments WHERE user_id = ? AND course_id = ?")
            .bind(user.id)
            .bind(course_id)
            .fetch_optional(&state.pool)
            .await?;
    if enrolled.is_none() {
        if state.config.auto_enroll {
            get_or_create_enrollment(&state, user.id, course_id).await?;
        } else {
            return Err(AppError::Forbidden(
                "You must be enrolled in this course.".into(),
            ));
        }
    }

    let mut conn = state.pool.acquire().await?;
    let attempt = repo::get_or_create_scorm_attempt(&mut conn, user.id, package_id).await?;

    let content_path = format!("{}/{}", package.extracted_path, package.launch_url);
    let launch_url = format!(
        "/lms/scorm-content/{}",
        utf8_percent_encode(&content_path, PATH_ENCODE)
    );
    Ok(Json(LaunchInfo {
        attempt_id: attempt.id,
        launch_url,
    }))
}

// --- SCORM RTE endpoint ---

async fn scorm_api(
    State(state): State<AppState>,
    Path(attempt_id): Path<i64>,
    user: CurrentUser,
    body: Bytes,
) -> Result<Json<rte::RteResponse>, AppError> {
    let mut conn = state.pool.acquire().await?;
    let attempt = repo::get_scorm_attempt(&mut conn, attempt_id)
        .await?
        .filter(|a| a.user_id == user.id)
        .ok_or(AppError::NotFound)?;
    drop(conn);

    let response = rte::dispatch(&state.pool, &state.config.retry, &attempt, &user.name, &body).await?;
    Ok(Json(response))
}

/// RTE clients probe with GET; answer with the protocol-level argument error
/// rather than a transport 405.
async fn scorm_api_wrong_method(_user: CurrentUser) -> Json<rte::RteResponse> {
    Json(rte::RteResponse::argument_error())
}

// --- H5P xAPI endpoint ---

async fn h5p_xapi(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
    user: CurrentUser,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let activity: Option<i64> = sqlx::query_scalar("SELECT id FROM h5p_activities WHERE id = ?")
        .bind(activity_id)
        .fetch_optional(&state.pool)
        .await?;
    if activity.is_none() {
        return Err(AppError::NotFound);
    }

    let statement =
        xapi::validate_statement(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    xapi::ingest(&state.pool, user.id, activity_id, statement).await?;
    Ok(Json(json!({ "status": "ok" })))
}

// --- H5P content user data endpoint ---

fn user_data_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

/// `dataType` is required and capped at 255 chars; `subContentId` defaults
/// to 0 and must be a non-negative integer.
fn parse_user_data_params(params: &HashMap<String, String>) -> Result<(String, i64), Response> {
    let data_type = match params.get("dataType") {
        Some(value) if !value.is_empty() => value.clone(),
        _ => return Err(user_data_error(StatusCode::BAD_REQUEST, "Missing dataType")),
    };
    if data_type.len() > 255 {
        return Err(user_data_error(StatusCode::BAD_REQUEST, "dataType too long"));
    }
    let sub_content_id = match params.get("subContentId") {
        None => 0,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if id >= 0 => id,
            _ => return Err(user_data_error(StatusCode::BAD_REQUEST, "Invalid subContentId")),
        },
    };
    Ok((data_type, sub_content_id))
}

async fn content_user_data_get(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
    user: CurrentUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let (data_type, sub_content_id) = match parse_user_data_params(&params) {
        Ok(parsed) => parsed,
        Err(response) => return Ok(response),
    };

    let mut conn = state.pool.acquire().await?;
    let attempt_id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM h5p_attempts WHERE user_id = ? AND activity_id = ?")
            .bind(user.id)
            .bind(activity_id)
            .fetch_optional(&mut *conn)
            .await?;

    let value = match attempt_id {
        Some(attempt_id) => {
            repo::get_content_user_data(&mut conn, attempt_id, &data_type, sub_content_id).await?
        }
        None => None,
    };

    let data = value.map(serde_json::Value::String).unwrap_or(json!(false));
    Ok(Json(json!({ "success": true, "data": data })).into_response())
}

async fn content_user_data_post(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
    user: CurrentUser,
    Query(params): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let (data_type, sub_content_id) = match parse_user_data_params(&params) {
        Ok(parsed) => parsed,
        Err(response) => return Ok(response),
    };
    let Some(data) = form.get("data") else {
        return Ok(user_data_error(StatusCode::BAD_REQUEST, "Missing data"));
    };

    let activity: Option<i64> = sqlx::query_scalar("SELECT id FROM h5p_activities WHERE id = ?")
        .bind(activity_id)
        .fetch_optional(&state.pool)
        .await?;
    if activity.is_none() {
        return Err(AppError::NotFound);
    }

    let mut conn = state.pool.acquire().await?;
    let attempt = repo::get_or_create_h5p_attempt(&mut conn, user.id, activity_id).await?;

    // The player sends a literal "0" to reset stored state.
    if data == "0" {
        repo::delete_content_user_data(&mut conn, attempt.id, &data_type, sub_content_id).await?;
    } else {
        if data.len() > USER_DATA_MAX_BYTES {
            return Ok(user_data_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "data too large",
            ));
        }
        repo::upsert_content_user_data(&mut conn, attempt.id, &data_type, sub_content_id, data)
            .await?;
    }
    Ok(Json(json!({ "success": true })).into_response())
}

// --- extracted content serving ---

async fn serve_scorm_content(
    State(state): State<AppState>,
    Path(path): Path<String>,
    _user: CurrentUser,
) -> Result<Response, AppError> {
    serve::serve_content(
        state.store.as_ref(),
        &state.config,
        &state.config.scorm_content_path,
        &path,
    )
    .await
}

async fn serve_h5p_content(
    State(state): State<AppState>,
    Path(path): Path<String>,
    _user: CurrentUser,
) -> Result<Response, AppError> {
    serve::serve_content(
        state.store.as_ref(),
        &state.config,
        &state.config.h5p_content_path,
        &path,
    )
    .await
}
