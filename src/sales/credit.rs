//! Credit control: pre-posting exposure and overdue checks
//!
//! Consulted before customer-facing documents are created, and consulted
//! again at Post time - time has passed since creation and other invoices
//! may have landed in between.

use bigdecimal::BigDecimal;
use chrono::{Days, NaiveDate};

use crate::traits::SalesStore;
use crate::types::*;

/// Rejects a new customer-facing document when the customer is blocked on
/// overdue invoices or the new exposure would exceed their credit limit.
///
/// Exposure = previous balance + Σ(balance due) over posted invoices.
/// A customer that does not exist is skipped: credit control only applies
/// to known customers (POS walk-ins have none of these terms set).
pub async fn check_customer_credit<S: SalesStore + ?Sized>(
    store: &S,
    customer_id: EntityId,
    document_net: &BigDecimal,
    today: NaiveDate,
) -> PostingResult<()> {
    let Some(customer) = store.customer(customer_id).await? else {
        return Ok(());
    };

    let posted = store.posted_invoices_for_customer(customer_id).await?;

    if customer.blocked_on_overdue {
        if let Some(days_allowed) = customer.days_allowed.filter(|d| *d > 0) {
            let cutoff = today
                .checked_sub_days(Days::new(days_allowed as u64))
                .unwrap_or(today);
            let has_overdue = posted.iter().any(|invoice| {
                invoice.invoice_date <= cutoff && invoice.balance_due() > BigDecimal::from(0)
            });
            if has_overdue {
                return Err(PostingError::Precondition(format!(
                    "customer '{}' is blocked: posted invoices are overdue beyond {} days",
                    customer.name, days_allowed
                )));
            }
        }
    }

    if customer.credit_limit > BigDecimal::from(0) {
        let outstanding: BigDecimal = &customer.previous_balance
            + posted
                .iter()
                .map(|invoice| invoice.balance_due())
                .sum::<BigDecimal>();
        let new_exposure = &outstanding + document_net;
        if new_exposure > customer.credit_limit {
            return Err(PostingError::Precondition(format!(
                "credit limit exceeded for customer '{}': outstanding {}, document {}, limit {}",
                customer.name, outstanding, document_net, customer.credit_limit
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::customer::Customer;
    use crate::sales::documents::{SalesInvoice, SalesLine};
    use crate::traits::SalesStore;
    use crate::utils::memory_storage::MemoryStorage;

    fn d(v: i64) -> BigDecimal {
        BigDecimal::from(v)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()
    }

    async fn posted_invoice(
        storage: &mut MemoryStorage,
        customer_id: EntityId,
        number: &str,
        date: NaiveDate,
        amount: i64,
    ) {
        let mut invoice = SalesInvoice::new(number, date, customer_id, 1, None).unwrap();
        invoice
            .add_line(SalesLine::new(1, 1, d(1), d(amount), d(1), d(0), d(0)).unwrap())
            .unwrap();
        invoice.post(1, None).unwrap();
        storage.add_sales_invoice(&invoice).await.unwrap();
    }

    #[tokio::test]
    async fn exposure_over_the_limit_is_rejected() {
        let mut storage = MemoryStorage::new();
        let mut customer = Customer::new("Acme").unwrap();
        customer.adjust_previous_balance(d(200));
        customer.set_credit_terms(d(1000), None, false).unwrap();
        let customer_id = storage.save_customer(&customer).await.unwrap();
        posted_invoice(&mut storage, customer_id, "SI-2026-0001", today(), 300).await;

        // 200 + 300 + 600 = 1100 > 1000
        let err = check_customer_credit(&storage, customer_id, &d(600), today()).await.unwrap_err();
        assert!(matches!(err, PostingError::Precondition(_)));
        assert!(err.to_string().contains("credit limit"));

        // 200 + 300 + 400 = 900 <= 1000
        check_customer_credit(&storage, customer_id, &d(400), today()).await.unwrap();
    }

    #[tokio::test]
    async fn zero_limit_disables_the_check() {
        let mut storage = MemoryStorage::new();
        let mut customer = Customer::new("Unlimited").unwrap();
        customer.adjust_previous_balance(d(100_000));
        let customer_id = storage.save_customer(&customer).await.unwrap();

        check_customer_credit(&storage, customer_id, &d(999_999), today()).await.unwrap();
    }

    #[tokio::test]
    async fn overdue_invoices_block_when_configured() {
        let mut storage = MemoryStorage::new();
        let mut customer = Customer::new("Late Payer").unwrap();
        customer.set_credit_terms(d(0), Some(30), true).unwrap();
        let customer_id = storage.save_customer(&customer).await.unwrap();

        let old_date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        posted_invoice(&mut storage, customer_id, "SI-2026-0002", old_date, 50).await;

        let err = check_customer_credit(&storage, customer_id, &d(10), today()).await.unwrap_err();
        assert!(err.to_string().contains("overdue"));
    }

    #[tokio::test]
    async fn recent_unpaid_invoices_do_not_block() {
        let mut storage = MemoryStorage::new();
        let mut customer = Customer::new("Prompt").unwrap();
        customer.set_credit_terms(d(0), Some(30), true).unwrap();
        let customer_id = storage.save_customer(&customer).await.unwrap();

        let recent = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        posted_invoice(&mut storage, customer_id, "SI-2026-0003", recent, 50).await;

        check_customer_credit(&storage, customer_id, &d(10), today()).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_customer_is_skipped() {
        let storage = MemoryStorage::new();
        check_customer_credit(&storage, 999, &d(10), today()).await.unwrap();
    }
}
