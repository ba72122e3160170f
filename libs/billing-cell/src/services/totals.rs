// libs/billing-cell/src/services/totals.rs
use crate::models::{LineItem, Totals};

/// Compute the derived monetary fields for a line-item set.
///
/// The subtotal always derives from `quantity * unit_price`; a caller-supplied
/// per-line `total` override never feeds it. The grand total is not clamped:
/// a discount exceeding subtotal plus tax yields a negative value and the
/// caller clamps downstream where the invariant requires it.
pub fn compute_totals(items: &[LineItem], tax_percent: f64, discount_percent: f64) -> Totals {
    let sub_total: f64 = items
        .iter()
        .map(|item| item.quantity as f64 * item.unit_price)
        .sum();

    let tax_amount = sub_total * tax_percent / 100.0;
    let discount_amount = sub_total * discount_percent / 100.0;
    let grand_total = sub_total + tax_amount - discount_amount;

    Totals {
        sub_total,
        tax_amount,
        discount_amount,
        grand_total,
    }
}
