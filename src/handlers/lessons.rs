use axum::extract::State;
use axum::Extension;
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::entitlements;
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{Json, Path};
use crate::models::User;

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub message: String,
    pub progress: f64,
    pub completed_lessons: i64,
    pub total_lessons: i64,
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(lesson_id): Path<String>,
) -> Result<Json<CompleteResponse>> {
    let mut conn = state.db.get()?;

    let lesson = queries::get_lesson_by_id(&conn, &lesson_id)?
        .or_not_found(msg::LESSON_NOT_FOUND)?;

    let outcome =
        entitlements::complete_lesson(&mut conn, &user, &lesson.course_id, &lesson_id)?;

    let message = if outcome.already_completed {
        "Lesson already completed".to_string()
    } else {
        "Lesson completed".to_string()
    };

    Ok(Json(CompleteResponse {
        message,
        progress: outcome.enrollment.progress,
        completed_lessons: outcome.completed_lessons,
        total_lessons: outcome.total_lessons,
    }))
}
