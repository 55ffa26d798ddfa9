// Ledger errors
// Everything around the settlement engine reports through this type.
// The engine itself never fails.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Meal not found: {0}")]
    MealNotFound(i64),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },
}

impl LedgerError {
    /// True for errors caused by the caller's input rather than the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_) | LedgerError::Validation(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::MealNotFound(_) | LedgerError::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(LedgerError::Validation("empty name".to_string()).is_client_error());
        assert!(LedgerError::InvalidAmount("NaN".to_string()).is_client_error());
        assert!(!LedgerError::MealNotFound(7).is_client_error());

        assert!(LedgerError::MealNotFound(7).is_not_found());
        assert!(LedgerError::NotFound { entity: "Item", id: 3 }.is_not_found());
        assert!(!LedgerError::Validation("x".to_string()).is_not_found());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(LedgerError::MealNotFound(42).to_string(), "Meal not found: 42");
        assert_eq!(
            LedgerError::NotFound { entity: "Payment", id: 9 }.to_string(),
            "Payment not found: 9"
        );
    }
}
