// libs/billing-cell/src/services/invoicing.rs
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::DocumentStore;
use shared_models::party::{DoctorRef, PatientRef};

use crate::models::{
    BillingError, BillingType, CreateInvoiceRequest, HospitalDetails, Invoice, InvoiceDetail,
    InvoiceStatus, LineItem, LineItemInput, PaymentMethod, UpdateInvoiceRequest,
};
use crate::services::totals::compute_totals;

const INVOICES: &str = "invoices";
const PATIENTS: &str = "patients";
const DOCTORS: &str = "doctors";

pub struct InvoiceService {
    store: Arc<dyn DocumentStore>,
    hospital_defaults: HospitalDetails,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn DocumentStore>, config: &AppConfig) -> Self {
        Self {
            store,
            hospital_defaults: HospitalDetails {
                name: config.hospital_name.clone(),
                address: config.hospital_address.clone(),
                contact: config.hospital_contact.clone(),
            },
        }
    }

    /// Create a new invoice. The patient and doctor must resolve, at least one
    /// valid line item is required, and the invoice number is either the
    /// caller's (uniqueness-checked) or generated from the store-side counter.
    pub async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> Result<InvoiceDetail, BillingError> {
        debug!(
            "Creating invoice for patient {} with doctor {}",
            request.patient_id, request.doctor_id
        );

        validate_items(&request.items)?;
        validate_percent(request.tax, "tax")?;
        validate_percent(request.discount, "discount")?;
        validate_amount(request.amount_paid, "amount_paid")?;
        validate_amount(request.admission_payment, "admission_payment")?;

        let patient = self.fetch_patient(request.patient_id).await?;
        let doctor = self.fetch_doctor(request.doctor_id).await?;

        let invoice_number = self
            .resolve_invoice_number(request.invoice_number.as_deref())
            .await?;
        let department = resolve_department(request.department.as_deref(), &doctor);

        let items: Vec<LineItem> = request.items.iter().map(LineItemInput::normalize).collect();
        let totals = compute_totals(&items, request.tax, request.discount);
        let balance_due = (totals.grand_total - request.amount_paid).max(0.0);

        let mut patient_details = request.patient_details.unwrap_or_default();
        if patient_details.name.trim().is_empty() {
            patient_details.name = patient.full_name();
        }
        if patient_details.contact.trim().is_empty() {
            patient_details.contact = patient.phone.clone().unwrap_or_default();
        }

        let hospital_details = request
            .hospital_details
            .unwrap_or_else(|| self.hospital_defaults.clone());

        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number,
            invoice_date: request.invoice_date.unwrap_or(now),
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            appointment_id: request.appointment_id,
            department,
            patient_details,
            hospital_details,
            insurance_details: request.insurance_details.unwrap_or_default(),
            signatures: request.signatures.unwrap_or_default(),
            items,
            tax: request.tax,
            tax_amount: totals.tax_amount,
            discount: request.discount,
            discount_amount: totals.discount_amount,
            sub_total: totals.sub_total,
            grand_total: totals.grand_total,
            status: InvoiceStatus::Pending,
            payment_method: request.payment_method.unwrap_or(PaymentMethod::Cash),
            billing_type: request.billing_type.unwrap_or(BillingType::Full),
            admission_payment: request.admission_payment,
            amount_paid: request.amount_paid,
            balance_due,
            notes: request.notes,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let doc = to_doc(&invoice)?;
        let stored = self.store.create(INVOICES, doc).await.map_err(db_err)?;
        let invoice: Invoice = from_doc(stored)?;

        info!(
            "Invoice {} created for patient {} (grand total {:.2})",
            invoice.invoice_number, invoice.patient_id, invoice.grand_total
        );

        Ok(InvoiceDetail {
            invoice,
            patient: Some(patient),
            doctor: Some(doctor),
        })
    }

    /// Apply a partial update. Derived monetary fields are recomputed from the
    /// patched values merged over the stored ones and everything lands in a
    /// single document write, so the balance can never lag the totals.
    pub async fn update_invoice(
        &self,
        id: Uuid,
        patch: UpdateInvoiceRequest,
    ) -> Result<InvoiceDetail, BillingError> {
        debug!("Updating invoice {}", id);

        let stored = self.fetch_invoice(id).await?;
        let mut update = Map::new();

        let mut patched_doctor: Option<DoctorRef> = None;
        if let Some(doctor_id) = patch.doctor_id {
            let doctor = self.fetch_doctor(doctor_id).await?;
            update.insert("doctor_id".to_string(), json!(doctor_id));
            update.insert(
                "department".to_string(),
                json!(resolve_department(patch.department.as_deref(), &doctor)),
            );
            patched_doctor = Some(doctor);
        } else if let Some(department) = &patch.department {
            if !department.trim().is_empty() {
                update.insert("department".to_string(), json!(department.trim()));
            }
        }

        let touches_totals =
            patch.items.is_some() || patch.tax.is_some() || patch.discount.is_some();
        let mut grand_total = stored.grand_total;

        if touches_totals {
            let items: Vec<LineItem> = match &patch.items {
                Some(inputs) => {
                    validate_items(inputs)?;
                    inputs.iter().map(LineItemInput::normalize).collect()
                }
                None => stored.items.clone(),
            };
            let tax = patch.tax.unwrap_or(stored.tax);
            let discount = patch.discount.unwrap_or(stored.discount);
            validate_percent(tax, "tax")?;
            validate_percent(discount, "discount")?;

            let totals = compute_totals(&items, tax, discount);

            if patch.items.is_some() {
                update.insert("items".to_string(), json!(items));
            }
            update.insert("tax".to_string(), json!(tax));
            update.insert("discount".to_string(), json!(discount));
            update.insert("sub_total".to_string(), json!(totals.sub_total));
            update.insert("tax_amount".to_string(), json!(totals.tax_amount));
            update.insert("discount_amount".to_string(), json!(totals.discount_amount));
            update.insert("grand_total".to_string(), json!(totals.grand_total));
            grand_total = totals.grand_total;
        }

        if let Some(amount_paid) = patch.amount_paid {
            validate_amount(amount_paid, "amount_paid")?;
            update.insert("amount_paid".to_string(), json!(amount_paid));
        }

        if patch.amount_paid.is_some() || touches_totals {
            let amount_paid = patch.amount_paid.unwrap_or(stored.amount_paid);
            update.insert(
                "balance_due".to_string(),
                json!((grand_total - amount_paid).max(0.0)),
            );
        }

        if let Some(appointment_id) = patch.appointment_id {
            update.insert("appointment_id".to_string(), json!(appointment_id));
        }
        if let Some(status) = &patch.status {
            update.insert("status".to_string(), json!(status));
        }
        if let Some(payment_method) = &patch.payment_method {
            update.insert("payment_method".to_string(), json!(payment_method));
        }
        if let Some(billing_type) = &patch.billing_type {
            update.insert("billing_type".to_string(), json!(billing_type));
        }
        if let Some(admission_payment) = patch.admission_payment {
            validate_amount(admission_payment, "admission_payment")?;
            update.insert("admission_payment".to_string(), json!(admission_payment));
        }
        if let Some(notes) = &patch.notes {
            update.insert("notes".to_string(), json!(notes));
        }

        // Snapshot objects replace wholesale: the supplied typed value is
        // stored exactly as given, unspecified sub-fields take their defaults.
        if let Some(patient_details) = &patch.patient_details {
            update.insert("patient_details".to_string(), json!(patient_details));
        }
        if let Some(hospital_details) = &patch.hospital_details {
            update.insert("hospital_details".to_string(), json!(hospital_details));
        }
        if let Some(insurance_details) = &patch.insurance_details {
            update.insert("insurance_details".to_string(), json!(insurance_details));
        }
        if let Some(signatures) = &patch.signatures {
            update.insert("signatures".to_string(), json!(signatures));
        }

        update.insert("updated_at".to_string(), json!(Utc::now()));

        let updated = self
            .store
            .update_by_id(INVOICES, id, Value::Object(update))
            .await
            .map_err(db_err)?
            .ok_or(BillingError::InvoiceNotFound)?;
        let invoice: Invoice = from_doc(updated)?;

        info!("Invoice {} updated", invoice.invoice_number);

        let patient = self.try_fetch_patient(invoice.patient_id).await?;
        let doctor = match patched_doctor {
            Some(doctor) => Some(doctor),
            None => self.try_fetch_doctor(invoice.doctor_id).await?,
        };

        Ok(InvoiceDetail {
            invoice,
            patient,
            doctor,
        })
    }

    /// Terminal payment transition: forces amount paid up to the grand total
    /// and zeroes the balance regardless of prior payment state. Re-applying
    /// is harmless; there is no inverse operation.
    pub async fn mark_invoice_paid(
        &self,
        id: Uuid,
        method: Option<PaymentMethod>,
    ) -> Result<InvoiceDetail, BillingError> {
        let stored = self.fetch_invoice(id).await?;

        let mut update = Map::new();
        update.insert("status".to_string(), json!(InvoiceStatus::Paid));
        update.insert("amount_paid".to_string(), json!(stored.grand_total));
        update.insert("balance_due".to_string(), json!(0.0));
        if let Some(method) = &method {
            update.insert("payment_method".to_string(), json!(method));
        }
        update.insert("updated_at".to_string(), json!(Utc::now()));

        let updated = self
            .store
            .update_by_id(INVOICES, id, Value::Object(update))
            .await
            .map_err(db_err)?
            .ok_or(BillingError::InvoiceNotFound)?;
        let invoice: Invoice = from_doc(updated)?;

        info!(
            "Invoice {} marked paid ({:.2})",
            invoice.invoice_number, invoice.amount_paid
        );

        let patient = self.try_fetch_patient(invoice.patient_id).await?;
        let doctor = self.try_fetch_doctor(invoice.doctor_id).await?;

        Ok(InvoiceDetail {
            invoice,
            patient,
            doctor,
        })
    }

    pub async fn get_invoice(&self, id: Uuid) -> Result<InvoiceDetail, BillingError> {
        let invoice = self.fetch_invoice(id).await?;

        let patient = self.try_fetch_patient(invoice.patient_id).await?;
        let doctor = self.try_fetch_doctor(invoice.doctor_id).await?;

        Ok(InvoiceDetail {
            invoice,
            patient,
            doctor,
        })
    }

    /// All invoices, newest first, with references resolved.
    pub async fn list_invoices(
        &self,
        include_deleted: bool,
    ) -> Result<Vec<InvoiceDetail>, BillingError> {
        let filter = if include_deleted {
            json!({})
        } else {
            json!({ "is_deleted": false })
        };

        let docs = self.store.find(INVOICES, &filter).await.map_err(db_err)?;

        let mut invoices = docs
            .into_iter()
            .map(from_doc::<Invoice>)
            .collect::<Result<Vec<_>, _>>()?;
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut details = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            let patient = self.try_fetch_patient(invoice.patient_id).await?;
            let doctor = self.try_fetch_doctor(invoice.doctor_id).await?;
            details.push(InvoiceDetail {
                invoice,
                patient,
                doctor,
            });
        }

        Ok(details)
    }

    /// Soft delete: the record stays in the store but disappears from reads.
    pub async fn delete_invoice(&self, id: Uuid) -> Result<(), BillingError> {
        let invoice = self.fetch_invoice(id).await?;

        self.store
            .update_by_id(
                INVOICES,
                id,
                json!({ "is_deleted": true, "updated_at": Utc::now() }),
            )
            .await
            .map_err(db_err)?
            .ok_or(BillingError::InvoiceNotFound)?;

        info!("Invoice {} deleted", invoice.invoice_number);
        Ok(())
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    async fn resolve_invoice_number(
        &self,
        supplied: Option<&str>,
    ) -> Result<String, BillingError> {
        if let Some(number) = supplied.map(str::trim).filter(|n| !n.is_empty()) {
            let existing = self
                .store
                .find(
                    INVOICES,
                    &json!({ "invoice_number": number, "is_deleted": false }),
                )
                .await
                .map_err(db_err)?;

            if !existing.is_empty() {
                warn!("Rejected duplicate invoice number {}", number);
                return Err(BillingError::DuplicateInvoiceNumber(number.to_string()));
            }

            return Ok(number.to_string());
        }

        let sequence = self
            .store
            .next_sequence("invoices")
            .await
            .map_err(db_err)?;
        Ok(format!("INV-{}-{:04}", Utc::now().year(), sequence))
    }

    async fn fetch_invoice(&self, id: Uuid) -> Result<Invoice, BillingError> {
        self.fetch_active(INVOICES, id)
            .await?
            .map(from_doc)
            .transpose()?
            .ok_or(BillingError::InvoiceNotFound)
    }

    async fn fetch_patient(&self, id: Uuid) -> Result<PatientRef, BillingError> {
        self.fetch_active(PATIENTS, id)
            .await?
            .map(from_doc)
            .transpose()?
            .ok_or(BillingError::PatientNotFound)
    }

    async fn fetch_doctor(&self, id: Uuid) -> Result<DoctorRef, BillingError> {
        self.fetch_active(DOCTORS, id)
            .await?
            .map(from_doc)
            .transpose()?
            .ok_or(BillingError::DoctorNotFound)
    }

    async fn try_fetch_patient(&self, id: Uuid) -> Result<Option<PatientRef>, BillingError> {
        Ok(self.fetch_active(PATIENTS, id).await?.map(from_doc).transpose()?)
    }

    async fn try_fetch_doctor(&self, id: Uuid) -> Result<Option<DoctorRef>, BillingError> {
        Ok(self.fetch_active(DOCTORS, id).await?.map(from_doc).transpose()?)
    }

    async fn fetch_active(
        &self,
        collection: &str,
        id: Uuid,
    ) -> Result<Option<Value>, BillingError> {
        let doc = self
            .store
            .find_by_id(collection, id)
            .await
            .map_err(db_err)?;
        Ok(doc.filter(|d| d.get("is_deleted").and_then(Value::as_bool) != Some(true)))
    }
}

/// Department resolution priority: explicit value, then the doctor's
/// department name, then its id, then the doctor's specialization, then
/// the literal "General".
fn resolve_department(explicit: Option<&str>, doctor: &DoctorRef) -> String {
    if let Some(department) = explicit.map(str::trim).filter(|d| !d.is_empty()) {
        return department.to_string();
    }

    if let Some(department) = &doctor.department {
        if let Some(name) = department
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            return name.to_string();
        }
        if let Some(id) = department.id {
            return id.to_string();
        }
    }

    doctor
        .specialization
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "General".to_string())
}

fn validate_items(items: &[LineItemInput]) -> Result<(), BillingError> {
    if items.is_empty() {
        return Err(BillingError::NoLineItems);
    }

    for item in items {
        if item.quantity < 1 {
            return Err(BillingError::InvalidLineItem(format!(
                "{}: quantity must be at least 1",
                item.name
            )));
        }
        if !(item.unit_price >= 0.0) {
            return Err(BillingError::InvalidLineItem(format!(
                "{}: unit price must not be negative",
                item.name
            )));
        }
        if let Some(total) = item.total {
            if !(total >= 0.0) {
                return Err(BillingError::InvalidLineItem(format!(
                    "{}: total must not be negative",
                    item.name
                )));
            }
        }
    }

    Ok(())
}

fn validate_percent(value: f64, field: &str) -> Result<(), BillingError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(BillingError::InvalidPercentage(format!(
            "{} must be between 0 and 100",
            field
        )));
    }
    Ok(())
}

fn validate_amount(value: f64, field: &str) -> Result<(), BillingError> {
    if !(value >= 0.0) {
        return Err(BillingError::InvalidAmount(format!(
            "{} must not be negative",
            field
        )));
    }
    Ok(())
}

fn db_err(err: anyhow::Error) -> BillingError {
    BillingError::DatabaseError(err.to_string())
}

fn to_doc<T: serde::Serialize>(value: &T) -> Result<Value, BillingError> {
    serde_json::to_value(value).map_err(|e| BillingError::DatabaseError(e.to_string()))
}

fn from_doc<T: serde::de::DeserializeOwned>(doc: Value) -> Result<T, BillingError> {
    serde_json::from_value(doc).map_err(|e| BillingError::DatabaseError(e.to_string()))
}
