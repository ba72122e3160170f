pub mod models;
pub mod services;

pub use models::*;
pub use services::invoicing::InvoiceService;
pub use services::totals::compute_totals;
