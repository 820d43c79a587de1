mod coupon;
mod course;
mod enrollment;
mod payment;
mod subscription;
mod user;

pub use coupon::*;
pub use course::*;
pub use enrollment::*;
pub use payment::*;
pub use subscription::*;
pub use user::*;
