use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteItem;

/// Derived monetary fields of a quote. `total_amount` may be negative when
/// the discount exceeds subtotal plus VAT; that is preserved, not clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
}

impl QuoteTotals {
    pub fn is_negative(&self) -> bool {
        self.total_amount < Decimal::ZERO
    }
}

pub fn line_subtotal(item: &QuoteItem) -> Decimal {
    item.quantity * item.price
}

/// subtotal = sum(quantity * price); vat = subtotal * pct / 100;
/// total = subtotal + vat - discount.
pub fn quote_totals(items: &[QuoteItem], vat_percentage: Decimal, discount_amount: Decimal) -> QuoteTotals {
    let subtotal: Decimal = items.iter().map(line_subtotal).sum();
    let vat_amount = subtotal * vat_percentage / Decimal::from(100);
    QuoteTotals {
        subtotal,
        vat_amount,
        total_amount: subtotal + vat_amount - discount_amount,
    }
}
