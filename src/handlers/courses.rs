use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::entitlements;
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path};
use crate::models::{Course, CourseWithLessons, CreateCourse, Enrollment, Payment, User};

/// Public catalog: published courses only.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Course>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_published_courses(&conn)?))
}

/// Course detail with its lesson list. Unpublished courses read as
/// missing to the public.
pub async fn get(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<CourseWithLessons>> {
    let conn = state.db.get()?;
    let course = queries::get_course_by_id(&conn, &course_id)?
        .or_not_found(msg::COURSE_NOT_FOUND)?;
    if !course.published {
        return Err(AppError::NotFound(msg::COURSE_NOT_FOUND.into()));
    }
    let lessons = queries::list_lessons(&conn, &course_id)?;
    Ok(Json(CourseWithLessons { course, lessons }))
}

/// Admin: create a course with its lessons.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateCourse>,
) -> Result<(StatusCode, Json<CourseWithLessons>)> {
    if request.title.trim().is_empty() {
        return Err(AppError::BadRequest("Course title is required".into()));
    }
    if !(request.price.is_finite() && request.price >= 0.0) {
        return Err(AppError::BadRequest("Course price must be non-negative".into()));
    }

    let conn = state.db.get()?;
    let course = queries::create_course(&conn, &request)?;
    Ok((StatusCode::CREATED, Json(course)))
}

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub message: String,
    pub enrollment: Enrollment,
    pub payment: Payment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

pub async fn purchase(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(course_id): Path<String>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>)> {
    let outcome =
        entitlements::purchase(&state, &user, &course_id, request.coupon_code.as_deref()).await?;

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            message: "Enrollment created".to_string(),
            enrollment: outcome.enrollment,
            payment: outcome.payment,
            client_secret: outcome.client_secret,
        }),
    ))
}
