//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Ledger rule violations, missing entities       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  till-db errors (separate crate)                                       │
//! │  └── DbError          - Store failures, wraps CoreError from inside    │
//! │                         transactions                                   │
//! │                                                                         │
//! │  till-sync errors                                                      │
//! │  └── SyncError        - What engines report, classified by kind()      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → caller      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger rule violations and missing entities.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Sale cannot be found.
    #[error("Sale not found: {0}")]
    SaleNotFound(i64),

    /// Payment cannot be found.
    #[error("Payment not found: {0}")]
    PaymentNotFound(i64),

    /// Closing record cannot be found.
    #[error("Closing not found: {0}")]
    ClosingNotFound(i64),

    /// Business referenced by a sale cannot be found.
    #[error("Business not found: {0}")]
    BusinessNotFound(i64),

    /// The payment (or a payment of the sale) is already captured by a
    /// definitive closing of its register.
    ///
    /// ## When This Occurs
    /// ```text
    /// 14:00  closing #7 (closed) for register 2
    ///   ▲
    ///   │  payment #31 at 13:10 is part of closing #7
    ///   │
    /// correct_payment(31, ...) ──► ClosedPeriodViolation
    /// ```
    /// Never retried.
    #[error("Payment {payment_id} is covered by closed closing {closing_id}")]
    ClosedPeriodViolation { payment_id: i64, closing_id: i64 },

    /// A payment larger than what is still owed on the sale.
    #[error("Payment of {amount} exceeds outstanding {outstanding} on sale {sale_id}")]
    PaymentExceedsOutstanding {
        sale_id: i64,
        amount: i64,
        outstanding: i64,
    },

    /// Sale status does not allow the requested transition.
    #[error("Sale {sale_id} is {status}, cannot perform operation")]
    InvalidSaleStatus { sale_id: i64, status: String },

    /// Closing record is already definitive.
    #[error("Closing {0} is already closed")]
    ClosingAlreadyClosed(i64),

    /// Register already has a definitive closing for the local day.
    #[error("Register {register_id} already has closed closing {existing_id} for {date}")]
    DuplicateClosedRecord {
        register_id: i64,
        existing_id: i64,
        date: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// True for the "entity is absent" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::SaleNotFound(_)
                | CoreError::PaymentNotFound(_)
                | CoreError::ClosingNotFound(_)
                | CoreError::BusinessNotFound(_)
        )
    }

    /// True when the operation touched data already captured by a closing.
    pub fn is_closed_period(&self) -> bool {
        matches!(self, CoreError::ClosedPeriodViolation { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., unknown timezone, bad schedule).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two figures that must agree do not.
    #[error("{field} is {actual}, expected {expected}")]
    Mismatch {
        field: String,
        expected: i64,
        actual: i64,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Convenience type alias for Results with ValidationError.
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::PaymentExceedsOutstanding {
            sale_id: 4,
            amount: 700,
            outstanding: 600,
        };
        assert_eq!(
            err.to_string(),
            "Payment of 700 exceeds outstanding 600 on sale 4"
        );

        let err = ValidationError::Required {
            field: "sale_number".to_string(),
        };
        assert_eq!(err.to_string(), "sale_number is required");
    }

    #[test]
    fn test_classification() {
        assert!(CoreError::SaleNotFound(1).is_not_found());
        assert!(CoreError::ClosingNotFound(1).is_not_found());
        assert!(!CoreError::ClosingAlreadyClosed(1).is_not_found());

        let closed = CoreError::ClosedPeriodViolation {
            payment_id: 3,
            closing_id: 9,
        };
        assert!(closed.is_closed_period());
        assert!(!closed.is_not_found());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "amount".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
