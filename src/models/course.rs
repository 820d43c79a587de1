use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Base price in major currency units (e.g. 49.99). The amount actually
    /// charged is snapshotted onto the payment row at purchase time; later
    /// edits here never alter past purchases.
    pub price: f64,
    pub published: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub title: String,
    /// 1-based ordering within the course.
    pub position: i32,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub published: bool,
    /// Lesson titles in course order.
    #[serde(default)]
    pub lessons: Vec<String>,
}

/// Catalog view: a course plus its lesson count.
#[derive(Debug, Clone, Serialize)]
pub struct CourseWithLessons {
    #[serde(flatten)]
    pub course: Course,
    pub lessons: Vec<Lesson>,
}
