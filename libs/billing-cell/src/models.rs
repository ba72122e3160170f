// libs/billing-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::party::{DoctorRef, PatientRef};

// ==============================================================================
// CORE INVOICE MODELS
// ==============================================================================

/// One billable entry as stored on an invoice. `total` has already been
/// normalized: it equals `quantity * unit_price` unless the caller explicitly
/// overrode it at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total: f64,
}

/// One billable entry as submitted by a caller. An absent `total` means
/// "derive it from quantity and unit price".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemInput {
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub total: Option<f64>,
}

impl LineItemInput {
    pub fn normalize(&self) -> LineItem {
        LineItem {
            name: self.name.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            total: self
                .total
                .unwrap_or(self.quantity as f64 * self.unit_price),
        }
    }
}

/// Derived monetary fields of an invoice. Produced by the totals calculator;
/// never stored independently of the items/tax/discount they derive from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub sub_total: f64,
    pub tax_amount: f64,
    pub discount_amount: f64,
    pub grand_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    Insurance,
    Other,
}

/// Which payment field drives `amount_paid` in the UI layer. Does not change
/// the storage invariant between amount paid, grand total and balance due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingType {
    Full,
    Admission,
    Discharge,
}

// ==============================================================================
// SNAPSHOT OBJECTS
// ==============================================================================
// Copied onto the invoice at creation time and deliberately not kept in sync
// with their source entities afterwards. Patches replace a snapshot wholesale.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub admission_number: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HospitalDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsuranceDetails {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub policy_number: String,
    #[serde(default)]
    pub coverage_amount: f64,
    #[serde(default)]
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signatures {
    #[serde(default)]
    pub billing_staff: String,
    #[serde(default)]
    pub patient: String,
}

// ==============================================================================
// STORED INVOICE
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub department: String,
    pub patient_details: PatientDetails,
    pub hospital_details: HospitalDetails,
    pub insurance_details: InsuranceDetails,
    pub signatures: Signatures,
    pub items: Vec<LineItem>,
    pub tax: f64,
    pub tax_amount: f64,
    pub discount: f64,
    pub discount_amount: f64,
    pub sub_total: f64,
    pub grand_total: f64,
    pub status: InvoiceStatus,
    pub payment_method: PaymentMethod,
    pub billing_type: BillingType,
    pub admission_payment: f64,
    pub amount_paid: f64,
    pub balance_due: f64,
    pub notes: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Invoice with its patient/doctor references resolved for the caller.
/// The references are optional because a referenced record may have been
/// soft-deleted after the invoice was created; the invoice itself still reads.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub patient: Option<PatientRef>,
    pub doctor: Option<DoctorRef>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    #[serde(default)]
    pub appointment_id: Option<Uuid>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<DateTime<Utc>>,
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub amount_paid: f64,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub billing_type: Option<BillingType>,
    #[serde(default)]
    pub admission_payment: f64,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub patient_details: Option<PatientDetails>,
    #[serde(default)]
    pub hospital_details: Option<HospitalDetails>,
    #[serde(default)]
    pub insurance_details: Option<InsuranceDetails>,
    #[serde(default)]
    pub signatures: Option<Signatures>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Distinguishes an absent field from an explicit `null`: absent deserializes
/// to `None` via the field default, `null` lands here as `Some(None)`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Partial update. Absent fields keep their stored values; supplied snapshot
/// objects replace the stored snapshot wholesale. `invoice_number` is
/// immutable after creation and deliberately has no field here.
///
/// `appointment_id` and `notes` are nullable on the stored invoice, so they
/// take a double option: `Some(None)` (JSON `null`) clears the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoiceRequest {
    #[serde(default)]
    pub items: Option<Vec<LineItemInput>>,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub amount_paid: Option<f64>,
    #[serde(default)]
    pub doctor_id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option")]
    pub appointment_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub billing_type: Option<BillingType>,
    #[serde(default)]
    pub admission_payment: Option<f64>,
    #[serde(default)]
    pub patient_details: Option<PatientDetails>,
    #[serde(default)]
    pub hospital_details: Option<HospitalDetails>,
    #[serde(default)]
    pub insurance_details: Option<InsuranceDetails>,
    #[serde(default)]
    pub signatures: Option<Signatures>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Invoice not found")]
    InvoiceNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Invoice must contain at least one line item")]
    NoLineItems,

    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("Invalid percentage: {0}")]
    InvalidPercentage(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invoice number {0} already exists")]
    DuplicateInvoiceNumber(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvoiceNotFound => AppError::NotFound(err.to_string()),
            BillingError::PatientNotFound
            | BillingError::DoctorNotFound
            | BillingError::NoLineItems
            | BillingError::InvalidLineItem(_)
            | BillingError::InvalidPercentage(_)
            | BillingError::InvalidAmount(_) => AppError::ValidationError(err.to_string()),
            BillingError::DuplicateInvoiceNumber(_) => AppError::Conflict(err.to_string()),
            BillingError::DatabaseError(_) => AppError::Database(err.to_string()),
        }
    }
}
