//! Input validation helpers
//!
//! Fail-fast checks run by the orchestrators on incoming requests, before
//! any entity is built or any storage is touched.

use bigdecimal::BigDecimal;

use crate::sales::NewDocumentLine;
use crate::types::*;

/// Validates that an amount is strictly positive.
pub fn validate_positive_amount(amount: &BigDecimal) -> PostingResult<()> {
    if *amount <= BigDecimal::from(0) {
        return Err(PostingError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Validates that an amount is not negative.
pub fn validate_non_negative_amount(amount: &BigDecimal) -> PostingResult<()> {
    if *amount < BigDecimal::from(0) {
        return Err(PostingError::Validation(
            "amount cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Validates a percentage in the 0–100 range.
pub fn validate_percent(value: &BigDecimal) -> PostingResult<()> {
    if *value < BigDecimal::from(0) || *value > BigDecimal::from(100) {
        return Err(PostingError::Validation(
            "percentage must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

/// Validates a mandatory narrative description.
pub fn validate_description(description: &str) -> PostingResult<()> {
    if description.trim().is_empty() {
        return Err(PostingError::Validation(
            "a description is required".to_string(),
        ));
    }
    if description.len() > 500 {
        return Err(PostingError::Validation(
            "description cannot exceed 500 characters".to_string(),
        ));
    }
    Ok(())
}

/// Validates the requested lines of a new sales document.
pub fn validate_new_lines(lines: &[NewDocumentLine]) -> PostingResult<()> {
    if lines.is_empty() {
        return Err(PostingError::Validation(
            "at least one line is required".to_string(),
        ));
    }
    for line in lines {
        validate_positive_amount(&line.quantity)?;
        validate_non_negative_amount(&line.unit_price)?;
        validate_percent(&line.discount_percent)?;
    }
    Ok(())
}
