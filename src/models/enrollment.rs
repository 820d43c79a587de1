use serde::{Deserialize, Serialize};

/// Unique per (user_id, course_id); created only after a payment row exists.
/// `progress` is derived from lesson completions and recomputed on every
/// completion event, never stored from any other source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub payment_id: String,
    /// 0-100, derived: completions / total lessons * 100.
    pub progress: f64,
    pub last_accessed_at: Option<i64>,
    /// Set exactly when progress reaches 100.
    pub completed_at: Option<i64>,
    pub created_at: i64,
}

/// Append-only: completions accumulate monotonically so progress is a
/// non-decreasing function of time. Unique per (enrollment_id, lesson_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonCompletion {
    pub id: String,
    pub enrollment_id: String,
    pub lesson_id: String,
    pub completed_at: i64,
}
