pub mod invoicing;
pub mod totals;
