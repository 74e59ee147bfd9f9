//! Customers and their credit-control terms

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// A customer with the fields the credit-control gate reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    pub name: String,
    /// Opening balance carried into the system; part of the exposure
    pub previous_balance: BigDecimal,
    /// Maximum allowed exposure; zero disables the limit check
    pub credit_limit: BigDecimal,
    /// Payment terms in days; overdue blocking applies beyond this
    pub days_allowed: Option<u32>,
    /// When set, any posted invoice unpaid past `days_allowed` blocks new sales
    pub blocked_on_overdue: bool,
    pub is_active: bool,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> PostingResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PostingError::Validation(
                "customer name cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            id: 0,
            name: name.trim().to_string(),
            previous_balance: BigDecimal::from(0),
            credit_limit: BigDecimal::from(0),
            days_allowed: None,
            blocked_on_overdue: false,
            is_active: true,
        })
    }

    /// Sets the credit terms used by the posting gate.
    pub fn set_credit_terms(
        &mut self,
        credit_limit: BigDecimal,
        days_allowed: Option<u32>,
        blocked_on_overdue: bool,
    ) -> PostingResult<()> {
        if credit_limit < BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "credit limit cannot be negative".to_string(),
            ));
        }
        self.credit_limit = credit_limit;
        self.days_allowed = days_allowed;
        self.blocked_on_overdue = blocked_on_overdue;
        Ok(())
    }

    /// Replaces the carried-forward opening balance.
    pub fn adjust_previous_balance(&mut self, new_balance: BigDecimal) {
        self.previous_balance = new_balance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_terms_reject_negative_limit() {
        let mut customer = Customer::new("Acme Trading").unwrap();
        assert!(customer
            .set_credit_terms(BigDecimal::from(-1), None, false)
            .is_err());
        customer
            .set_credit_terms(BigDecimal::from(1000), Some(30), true)
            .unwrap();
        assert_eq!(customer.credit_limit, BigDecimal::from(1000));
        assert_eq!(customer.days_allowed, Some(30));
        assert!(customer.blocked_on_overdue);
    }

    #[test]
    fn name_is_required() {
        assert!(Customer::new("  ").is_err());
    }
}
