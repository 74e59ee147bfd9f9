//! Sales return lifecycle: Create → Edit → Post → (Cancel)
//!
//! The mirror of invoice posting. Posting restores stock and books:
//!
//! Revenue-return journal:  DR Sales / DR VAT Output  /  CR Receivables
//! COGS-return journal:     DR Inventory  /  CR COGS  (at current WAC)
//!
//! Cancellation re-deducts the stock and reverses both journals.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ledger::fiscal::{resolve_posting_period, resolve_reversal_period, FiscalPeriod, FiscalYear};
use crate::ledger::journal::JournalEntry;
use crate::sales::*;
use crate::traits::{capabilities, ensure_allowed, AllowAll, AuthorizationPolicy, PostingStore};
use crate::types::*;
use crate::utils::validation::validate_new_lines;

/// Request to create a draft sales return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSalesReturn {
    pub return_date: NaiveDate,
    pub customer_id: EntityId,
    pub warehouse_id: EntityId,
    pub original_invoice_id: Option<EntityId>,
    pub notes: Option<String>,
    pub lines: Vec<NewDocumentLine>,
}

/// Orchestrates the sales return document family.
pub struct SalesReturnService<S: PostingStore> {
    store: S,
    authorization: Box<dyn AuthorizationPolicy>,
    codes: GlAccountCodes,
}

impl<S: PostingStore> SalesReturnService<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Box::new(AllowAll), GlAccountCodes::default())
    }

    pub fn with_policy(
        store: S,
        authorization: Box<dyn AuthorizationPolicy>,
        codes: GlAccountCodes,
    ) -> Self {
        Self {
            store,
            authorization,
            codes,
        }
    }

    /// Creates a draft return under a fresh document number, retrying on a
    /// number conflict like invoice creation.
    pub async fn create(
        &mut self,
        input: NewSalesReturn,
        ctx: &PostingContext,
    ) -> PostingResult<SalesReturn> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_CREATE)?;
        validate_new_lines(&input.lines)?;

        if let Some(invoice_id) = input.original_invoice_id {
            let invoice = self
                .store
                .sales_invoice(invoice_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
            if invoice.status != DocumentStatus::Posted {
                return Err(PostingError::Precondition(
                    "a return can only reference a posted invoice".to_string(),
                ));
            }
        }

        let fiscal_year = self
            .store
            .active_fiscal_year()
            .await?
            .ok_or_else(|| PostingError::Precondition("no active fiscal year".to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let number = self
                .store
                .next_code(DocumentType::SalesReturn, fiscal_year.id)
                .await?;

            let mut sales_return = SalesReturn::new(
                number.as_str(),
                input.return_date,
                input.customer_id,
                input.warehouse_id,
                input.original_invoice_id,
                input.notes.clone(),
            )?;
            for line in &input.lines {
                sales_return.add_line(build_line(&self.store, line).await?)?;
            }

            self.store.begin_serializable().await?;
            match self.store.add_sales_return(&sales_return).await {
                Ok(id) => {
                    self.store.commit().await?;
                    sales_return.id = id;
                    info!(sales_return = %sales_return.return_number, "created draft sales return");
                    return Ok(sales_return);
                }
                Err(err @ PostingError::Conflict(_)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    self.store.rollback().await?;
                    warn!(
                        sales_return = %number,
                        attempt,
                        "return number taken by a concurrent writer, retrying: {err}"
                    );
                    backoff(attempt).await;
                }
                Err(err @ PostingError::Conflict(_)) => {
                    self.store.rollback().await?;
                    return Err(PostingError::Conflict(format!(
                        "could not allocate a unique return number after {MAX_NUMBER_ATTEMPTS} attempts: {err}"
                    )));
                }
                Err(err) => {
                    self.store.rollback().await?;
                    return Err(err);
                }
            }
        }
    }

    /// Posts a draft return: fiscal gate, journals, stock restoration with
    /// movements, status flip, atomically.
    pub async fn post(
        &mut self,
        return_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<SalesReturn> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_POST)?;

        let sales_return = self
            .store
            .sales_return(return_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales return {return_id}")))?;
        Self::check_post_preconditions(&sales_return)?;

        self.store.begin_serializable().await?;
        match self.post_in_tx(return_id, ctx).await {
            Ok(sales_return) => {
                self.store.commit().await?;
                info!(sales_return = %sales_return.return_number, "posted sales return");
                Ok(sales_return)
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Cancels a posted return: the restored goods leave stock again
    /// (subject to availability) and both journals are reversed into the
    /// cancellation date's open period.
    pub async fn cancel(&mut self, return_id: EntityId, ctx: &PostingContext) -> PostingResult<()> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_POST)?;

        let sales_return = self
            .store
            .sales_return(return_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales return {return_id}")))?;
        Self::check_cancel_preconditions(&sales_return)?;

        self.store.begin_serializable().await?;
        match self.cancel_in_tx(return_id, ctx).await {
            Ok(()) => {
                self.store.commit().await?;
                info!(sales_return = %sales_return.return_number, "cancelled sales return");
                Ok(())
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Soft-deletes a draft return.
    pub async fn delete_draft(
        &mut self,
        return_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<()> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_CREATE)?;

        let mut sales_return = self
            .store
            .sales_return(return_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales return {return_id}")))?;
        sales_return.soft_delete(&ctx.username, ctx.now)?;
        self.store.update_sales_return(&sales_return).await
    }

    fn check_post_preconditions(sales_return: &SalesReturn) -> PostingResult<()> {
        if sales_return.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(
                "only draft returns can be posted".to_string(),
            ));
        }
        if sales_return.lines.is_empty() {
            return Err(PostingError::Precondition(
                "a return without lines cannot be posted".to_string(),
            ));
        }
        Ok(())
    }

    fn check_cancel_preconditions(sales_return: &SalesReturn) -> PostingResult<()> {
        if sales_return.status != DocumentStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted returns can be cancelled".to_string(),
            ));
        }
        if sales_return.revenue_journal_id.is_none() {
            return Err(PostingError::Precondition(
                "the return carries no journals to reverse".to_string(),
            ));
        }
        Ok(())
    }

    async fn post_in_tx(
        &mut self,
        return_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<SalesReturn> {
        let mut sales_return = self
            .store
            .sales_return(return_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales return {return_id}")))?;
        Self::check_post_preconditions(&sales_return)?;

        let (fiscal_year, period) =
            resolve_posting_period(&self.store, sales_return.return_date).await?;
        let accounts = resolve_posting_accounts(&self.store, &self.codes).await?;

        let revenue_journal_id = self
            .create_return_journal(&sales_return, &fiscal_year, &period, &accounts, ctx)
            .await?;
        let (cogs_journal_id, line_costs) = self
            .create_cogs_return_journal(&sales_return, &fiscal_year, &period, &accounts, ctx)
            .await?;

        for line in &sales_return.lines {
            let unit_cost = line_costs
                .get(&line.line_number)
                .cloned()
                .unwrap_or_else(|| BigDecimal::from(0));
            move_stock(
                &mut self.store,
                sales_return.warehouse_id,
                line,
                MovementType::SalesReturn,
                &unit_cost,
                sales_return.return_date,
                &sales_return.return_number,
                SourceType::SalesReturn,
                sales_return.id,
                Some(format!("Sales return {}", sales_return.return_number)),
            )
            .await?;
        }

        sales_return.post(revenue_journal_id, cogs_journal_id)?;
        self.store.update_sales_return(&sales_return).await?;
        Ok(sales_return)
    }

    async fn cancel_in_tx(&mut self, return_id: EntityId, ctx: &PostingContext) -> PostingResult<()> {
        let mut sales_return = self
            .store
            .sales_return(return_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales return {return_id}")))?;
        Self::check_cancel_preconditions(&sales_return)?;

        let (fiscal_year, period) = resolve_reversal_period(&self.store, ctx.today).await?;

        // The restored goods must still be on hand to leave again.
        validate_stock(&self.store, sales_return.warehouse_id, &sales_return.lines).await?;

        for line in &sales_return.lines {
            let product = self
                .store
                .product(line.product_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("product {}", line.product_id)))?;
            move_stock(
                &mut self.store,
                sales_return.warehouse_id,
                line,
                MovementType::SalesOut,
                &product.weighted_average_cost,
                ctx.today,
                &sales_return.return_number,
                SourceType::SalesReturn,
                sales_return.id,
                Some(format!(
                    "Cancellation of sales return {}",
                    sales_return.return_number
                )),
            )
            .await?;
        }

        let revenue_journal_id = sales_return.revenue_journal_id.ok_or_else(|| {
            PostingError::Precondition("the return carries no journals to reverse".to_string())
        })?;
        reverse_journal(
            &mut self.store,
            revenue_journal_id,
            &format!("Cancellation of sales return {}", sales_return.return_number),
            &fiscal_year,
            &period,
            ctx,
        )
        .await?;
        if let Some(cogs_journal_id) = sales_return.cogs_journal_id {
            reverse_journal(
                &mut self.store,
                cogs_journal_id,
                &format!(
                    "Cancellation of sales return {} (COGS)",
                    sales_return.return_number
                ),
                &fiscal_year,
                &period,
                ctx,
            )
            .await?;
        }

        sales_return.cancel()?;
        self.store.update_sales_return(&sales_return).await
    }

    /// DR Sales and VAT Output, CR Receivables: the exact mirror of the
    /// invoice revenue journal. Zero-amount lines are omitted.
    async fn create_return_journal(
        &mut self,
        sales_return: &SalesReturn,
        fiscal_year: &FiscalYear,
        period: &FiscalPeriod,
        accounts: &PostingAccounts,
        ctx: &PostingContext,
    ) -> PostingResult<EntityId> {
        let zero = BigDecimal::from(0);
        let mut journal = JournalEntry::create_draft(
            sales_return.return_date,
            format!("Sales return {}", sales_return.return_number),
            SourceType::SalesReturn,
            fiscal_year.id,
            period.id,
            Some(sales_return.return_number.clone()),
            Some(sales_return.id),
        )?;

        let sales_amount = round_money(&(&sales_return.subtotal - &sales_return.discount_total));
        let vat_amount = round_money(&sales_return.vat_total);
        let receivable_total = &sales_amount + &vat_amount;

        if sales_amount > zero {
            journal.add_line(
                accounts.sales.id,
                sales_amount.clone(),
                zero.clone(),
                ctx.now,
                Some(format!("Sales - return {}", sales_return.return_number)),
            )?;
        }
        if vat_amount > zero {
            journal.add_line(
                accounts.vat_output.id,
                vat_amount.clone(),
                zero.clone(),
                ctx.now,
                Some(format!("VAT output - return {}", sales_return.return_number)),
            )?;
        }
        journal.add_line(
            accounts.receivables.id,
            zero,
            receivable_total,
            ctx.now,
            Some(format!("Receivable - sales return {}", sales_return.return_number)),
        )?;

        let number = self
            .store
            .next_code(DocumentType::Journal, fiscal_year.id)
            .await?;
        journal.post(&number, &ctx.username, ctx.now)?;
        self.store.add_journal_entry(&journal).await
    }

    /// DR Inventory / CR COGS at the product's current weighted-average
    /// cost. Skipped entirely when the total cost is zero.
    async fn create_cogs_return_journal(
        &mut self,
        sales_return: &SalesReturn,
        fiscal_year: &FiscalYear,
        period: &FiscalPeriod,
        accounts: &PostingAccounts,
        ctx: &PostingContext,
    ) -> PostingResult<(Option<EntityId>, HashMap<u32, BigDecimal>)> {
        let zero = BigDecimal::from(0);
        let mut line_costs = HashMap::new();
        let mut total = BigDecimal::from(0);
        for line in &sales_return.lines {
            let product = self
                .store
                .product(line.product_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("product {}", line.product_id)))?;
            let unit_cost = product.weighted_average_cost.clone();
            total += round_quantity(&(&line.base_quantity * &unit_cost));
            line_costs.insert(line.line_number, unit_cost);
        }

        let total = round_money(&total);
        if total <= zero {
            return Ok((None, line_costs));
        }

        let mut journal = JournalEntry::create_draft(
            sales_return.return_date,
            format!("COGS reversal - sales return {}", sales_return.return_number),
            SourceType::SalesReturn,
            fiscal_year.id,
            period.id,
            Some(sales_return.return_number.clone()),
            Some(sales_return.id),
        )?;
        journal.add_line(
            accounts.inventory.id,
            total.clone(),
            zero.clone(),
            ctx.now,
            Some(format!("Inventory - sales return {}", sales_return.return_number)),
        )?;
        journal.add_line(
            accounts.cogs.id,
            zero,
            total,
            ctx.now,
            Some(format!("COGS - sales return {}", sales_return.return_number)),
        )?;

        let number = self
            .store
            .next_code(DocumentType::Journal, fiscal_year.id)
            .await?;
        journal.post(&number, &ctx.username, ctx.now)?;
        let id = self.store.add_journal_entry(&journal).await?;
        Ok((Some(id), line_costs))
    }
}
