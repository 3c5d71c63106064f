//! # Validation
//!
//! Input checks run before anything touches the store. Each function
//! returns the first problem found.

use crate::error::{ValidationError, ValidationResult};
use crate::totals::RegisterTotals;
use crate::types::{NewExpense, NewPayment, NewSale, NewSaleLine, PaymentCorrection, SaleEdit};
use crate::MAX_SALE_LINES;

/// Longest accepted sale number.
pub const MAX_SALE_NUMBER_LEN: usize = 50;

/// Longest accepted note or expense description.
pub const MAX_TEXT_LEN: usize = 500;

fn required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn max_len(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

fn positive(field: &str, value: i64) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Lines of a new or edited sale.
pub fn validate_sale_lines(lines: &[NewSaleLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }
    if lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }
    for line in lines {
        required("product_name", &line.product_name)?;
        positive("quantity", line.quantity)?;
        non_negative("unit_price", line.unit_price_cents)?;
    }
    Ok(())
}

/// A sale as submitted by a till.
pub fn validate_new_sale(sale: &NewSale) -> ValidationResult<()> {
    required("sale_number", &sale.sale_number)?;
    max_len("sale_number", &sale.sale_number, MAX_SALE_NUMBER_LEN)?;
    if let Some(note) = &sale.note {
        max_len("note", note, MAX_TEXT_LEN)?;
    }
    validate_sale_lines(&sale.lines)
}

/// A direct edit of a sale.
pub fn validate_sale_edit(edit: &SaleEdit) -> ValidationResult<()> {
    if let Some(note) = &edit.note {
        max_len("note", note, MAX_TEXT_LEN)?;
    }
    validate_sale_lines(&edit.lines)
}

/// A payment before it is applied. The outstanding check happens inside
/// the store transaction.
pub fn validate_new_payment(payment: &NewPayment) -> ValidationResult<()> {
    positive("amount", payment.amount_cents)
}

pub fn validate_correction(correction: &PaymentCorrection) -> ValidationResult<()> {
    positive("amount", correction.amount_cents)
}

pub fn validate_new_expense(expense: &NewExpense) -> ValidationResult<()> {
    positive("amount", expense.amount_cents)?;
    required("description", &expense.description)?;
    max_len("description", &expense.description, MAX_TEXT_LEN)
}

/// Totals a closing is about to be written from.
///
/// ## Checks
/// - no negative amount
/// - `collected == cash + other`
/// - the method breakdown adds up to `collected`
pub fn validate_closing_totals(totals: &RegisterTotals) -> ValidationResult<()> {
    non_negative("cash_total", totals.cash_total)?;
    non_negative("other_total", totals.other_total)?;
    non_negative("credit_account_total", totals.credit_account_total)?;
    non_negative("expenses_total", totals.expenses_total)?;
    for entry in &totals.method_breakdown {
        required("method", &entry.method)?;
    }

    let expected = totals.cash_total + totals.other_total;
    if totals.collected_total != expected {
        return Err(ValidationError::Mismatch {
            field: "collected_total".to_string(),
            expected,
            actual: totals.collected_total,
        });
    }

    let breakdown = totals.breakdown_sum().cents();
    if breakdown != totals.collected_total {
        return Err(ValidationError::Mismatch {
            field: "method_breakdown".to_string(),
            expected: totals.collected_total,
            actual: breakdown,
        });
    }
    Ok(())
}

/// Corrected collected total supplied when promoting a closing.
pub fn validate_corrected_total(corrected_total_paid: i64) -> ValidationResult<()> {
    non_negative("corrected_total_paid", corrected_total_paid)
}
