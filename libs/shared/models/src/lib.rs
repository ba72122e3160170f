pub mod error;
pub mod party;

pub use error::AppError;
pub use party::{DepartmentRef, DoctorRef, PatientRef};
