use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Patient reference as stored in the `patients` collection. Only the fields
/// the billing and room cells actually read; extra document fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRef {
    pub id: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl PatientRef {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorRef {
    pub id: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub department: Option<DepartmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentRef {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
}
