//! Sales invoice lifecycle: Create → Edit → Post → (Cancel)
//!
//! Posting builds two journals and mutates stock in one serializable
//! transaction:
//!
//! Revenue journal:  DR Receivables  /  CR Sales  /  CR VAT Output
//! COGS journal:     DR COGS  /  CR Inventory  (per-line at the
//! weighted-average cost captured before stock moves)

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

/// Request to create a draft sales invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSalesInvoice {
    pub invoice_date: NaiveDate,
    pub customer_id: EntityId,
    pub warehouse_id: EntityId,
    pub notes: Option<String>,
    pub lines: Vec<NewDocumentLine>,
}

/// Request to replace a draft invoice's header and lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSalesInvoice {
    pub id: EntityId,
    pub invoice_date: NaiveDate,
    pub customer_id: EntityId,
    pub warehouse_id: EntityId,
    pub notes: Option<String>,
    pub lines: Vec<NewDocumentLine>,
}

/// Orchestrates the sales invoice document family.
pub struct SalesInvoiceService<S: PostingStore> {
    store: S,
    authorization: Box<dyn AuthorizationPolicy>,
    codes: GlAccountCodes,
}

impl<S: PostingStore> SalesInvoiceService<S> {
    /// Service with an allow-all policy and the default chart codes.
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

    /// Creates a draft invoice under a fresh document number.
    ///
    /// Two concurrent creators can be handed the same number before either
    /// commits; the unique index rejects the loser, which backs off briefly
    /// and retries with a new number up to a fixed budget.
    pub async fn create(
        &mut self,
        input: NewSalesInvoice,
        ctx: &PostingContext,
    ) -> PostingResult<SalesInvoice> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_CREATE)?;
        validate_new_lines(&input.lines)?;

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
                .next_code(DocumentType::SalesInvoice, fiscal_year.id)
                .await?;

            let mut invoice = SalesInvoice::new(
                number.as_str(),
                input.invoice_date,
                input.customer_id,
                input.warehouse_id,
                input.notes.clone(),
            )?;
            for line in &input.lines {
                invoice.add_line(build_line(&self.store, line).await?)?;
            }

            check_customer_credit(&self.store, invoice.customer_id, &invoice.net_total, ctx.today)
                .await?;

            self.store.begin_serializable().await?;
            match self.store.add_sales_invoice(&invoice).await {
                Ok(id) => {
                    self.store.commit().await?;
                    invoice.id = id;
                    info!(invoice = %invoice.invoice_number, "created draft sales invoice");
                    return Ok(invoice);
                }
                Err(err @ PostingError::Conflict(_)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    self.store.rollback().await?;
                    warn!(
                        invoice = %number,
                        attempt,
                        "invoice number taken by a concurrent writer, retrying: {err}"
                    );
                    backoff(attempt).await;
                }
                Err(err @ PostingError::Conflict(_)) => {
                    self.store.rollback().await?;
                    return Err(PostingError::Conflict(format!(
                        "could not allocate a unique invoice number after {MAX_NUMBER_ATTEMPTS} attempts: {err}"
                    )));
                }
                Err(err) => {
                    self.store.rollback().await?;
                    return Err(err);
                }
            }
        }
    }

    /// Replaces the header and lines of a draft invoice. Stock and period
    /// state are not re-checked here; validation happens once, at Post.
    pub async fn update(
        &mut self,
        input: UpdateSalesInvoice,
        ctx: &PostingContext,
    ) -> PostingResult<SalesInvoice> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_CREATE)?;
        validate_new_lines(&input.lines)?;

        let mut invoice = self
            .store
            .sales_invoice(input.id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {}", input.id)))?;
        if invoice.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(
                "a posted or cancelled invoice cannot be edited".to_string(),
            ));
        }

        invoice.update_header(
            input.invoice_date,
            input.customer_id,
            input.warehouse_id,
            input.notes,
        )?;
        let mut lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            lines.push(build_line(&self.store, line).await?);
        }
        invoice.replace_lines(lines)?;

        self.store.update_sales_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Posts a draft invoice: credit re-check, fiscal gate, stock gate,
    /// revenue and COGS journals, stock deduction with movements, status
    /// flip - atomically. A failed attempt leaves the invoice in Draft.
    pub async fn post(
        &mut self,
        invoice_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<SalesInvoice> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_POST)?;

        let invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        Self::check_post_preconditions(&invoice)?;

        // Credit control applies at Post even if it passed at Create.
        check_customer_credit(&self.store, invoice.customer_id, &invoice.net_total, ctx.today)
            .await?;

        self.store.begin_serializable().await?;
        match self.post_in_tx(invoice_id, ctx).await {
            Ok(invoice) => {
                self.store.commit().await?;
                info!(invoice = %invoice.invoice_number, "posted sales invoice");
                Ok(invoice)
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Cancels a posted invoice: reversal journals dated today (gated by
    /// today's own open period), stock restored, status flipped - atomically.
    /// An invoice with applied payments cannot be cancelled out from under
    /// them; the receipts must be reversed first.
    pub async fn cancel(&mut self, invoice_id: EntityId, ctx: &PostingContext) -> PostingResult<()> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_POST)?;

        let invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        Self::check_cancel_preconditions(&invoice)?;

        self.store.begin_serializable().await?;
        match self.cancel_in_tx(invoice_id, ctx).await {
            Ok(()) => {
                self.store.commit().await?;
                info!(invoice = %invoice.invoice_number, "cancelled sales invoice");
                Ok(())
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Soft-deletes a draft invoice.
    pub async fn delete_draft(
        &mut self,
        invoice_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<()> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::SALES_CREATE)?;

        let mut invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        invoice.soft_delete(&ctx.username, ctx.now)?;
        self.store.update_sales_invoice(&invoice).await
    }

    fn check_post_preconditions(invoice: &SalesInvoice) -> PostingResult<()> {
        if invoice.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(
                "only draft invoices can be posted".to_string(),
            ));
        }
        if invoice.lines.is_empty() {
            return Err(PostingError::Precondition(
                "an invoice without lines cannot be posted".to_string(),
            ));
        }
        Ok(())
    }

    fn check_cancel_preconditions(invoice: &SalesInvoice) -> PostingResult<()> {
        if invoice.status != DocumentStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted invoices can be cancelled".to_string(),
            ));
        }
        if invoice.revenue_journal_id.is_none() {
            return Err(PostingError::Precondition(
                "the invoice carries no journals to reverse".to_string(),
            ));
        }
        if invoice.paid_amount > BigDecimal::from(0) {
            return Err(PostingError::Precondition(format!(
                "an invoice with applied payments ({}) cannot be cancelled; reverse the receipts first",
                invoice.paid_amount
            )));
        }
        Ok(())
    }

    async fn post_in_tx(
        &mut self,
        invoice_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<SalesInvoice> {
        // Re-read inside the transaction for a consistent snapshot.
        let mut invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        Self::check_post_preconditions(&invoice)?;

        validate_stock(&self.store, invoice.warehouse_id, &invoice.lines).await?;

        let (fiscal_year, period) =
            resolve_posting_period(&self.store, invoice.invoice_date).await?;
        let accounts = resolve_posting_accounts(&self.store, &self.codes).await?;

        let revenue_journal_id = self
            .create_revenue_journal(&invoice, &fiscal_year, &period, &accounts, ctx)
            .await?;
        let (cogs_journal_id, line_costs) = self
            .create_cogs_journal(&invoice, &fiscal_year, &period, &accounts, ctx)
            .await?;

        for line in &invoice.lines {
            let unit_cost = line_costs
                .get(&line.line_number)
                .cloned()
                .unwrap_or_else(|| BigDecimal::from(0));
            move_stock(
                &mut self.store,
                invoice.warehouse_id,
                line,
                MovementType::SalesOut,
                &unit_cost,
                invoice.invoice_date,
                &invoice.invoice_number,
                SourceType::SalesInvoice,
                invoice.id,
                Some(format!("Sales invoice {}", invoice.invoice_number)),
            )
            .await?;
        }

        invoice.post(revenue_journal_id, cogs_journal_id)?;
        self.store.update_sales_invoice(&invoice).await?;
        Ok(invoice)
    }

    async fn cancel_in_tx(&mut self, invoice_id: EntityId, ctx: &PostingContext) -> PostingResult<()> {
        let mut invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        Self::check_cancel_preconditions(&invoice)?;

        // The cancellation date's own period must independently be open.
        let (fiscal_year, period) = resolve_reversal_period(&self.store, ctx.today).await?;

        for line in &invoice.lines {
            let product = self
                .store
                .product(line.product_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("product {}", line.product_id)))?;
            move_stock(
                &mut self.store,
                invoice.warehouse_id,
                line,
                MovementType::SalesReturn,
                &product.weighted_average_cost,
                ctx.today,
                &invoice.invoice_number,
                SourceType::SalesInvoice,
                invoice.id,
                Some(format!("Cancellation of sales invoice {}", invoice.invoice_number)),
            )
            .await?;
        }

        let revenue_journal_id = invoice.revenue_journal_id.ok_or_else(|| {
            PostingError::Precondition("the invoice carries no journals to reverse".to_string())
        })?;
        reverse_journal(
            &mut self.store,
            revenue_journal_id,
            &format!("Cancellation of sales invoice {}", invoice.invoice_number),
            &fiscal_year,
            &period,
            ctx,
        )
        .await?;
        if let Some(cogs_journal_id) = invoice.cogs_journal_id {
            reverse_journal(
                &mut self.store,
                cogs_journal_id,
                &format!("Cancellation of sales invoice {} (COGS)", invoice.invoice_number),
                &fiscal_year,
                &period,
                ctx,
            )
            .await?;
        }

        invoice.cancel()?;
        self.store.update_sales_invoice(&invoice).await
    }

    /// DR Receivables for the gross total; CR Sales for subtotal − discount;
    /// CR VAT Output for the VAT total. Zero-amount lines are omitted. The
    /// journal is numbered and posted immediately - revenue recognition is
    /// never left in draft.
    async fn create_revenue_journal(
        &mut self,
        invoice: &SalesInvoice,
        fiscal_year: &FiscalYear,
        period: &FiscalPeriod,
        accounts: &PostingAccounts,
        ctx: &PostingContext,
    ) -> PostingResult<EntityId> {
        let zero = BigDecimal::from(0);
        let mut journal = JournalEntry::create_draft(
            invoice.invoice_date,
            format!("Sales invoice {}", invoice.invoice_number),
            SourceType::SalesInvoice,
            fiscal_year.id,
            period.id,
            Some(invoice.invoice_number.clone()),
            Some(invoice.id),
        )?;

        let sales_amount = round_money(&(&invoice.subtotal - &invoice.discount_total));
        let vat_amount = round_money(&invoice.vat_total);
        let receivable_total = &sales_amount + &vat_amount;

        journal.add_line(
            accounts.receivables.id,
            receivable_total,
            zero.clone(),
            ctx.now,
            Some(format!("Receivable - sales invoice {}", invoice.invoice_number)),
        )?;
        if sales_amount > zero {
            journal.add_line(
                accounts.sales.id,
                zero.clone(),
                sales_amount,
                ctx.now,
                Some(format!("Sales - invoice {}", invoice.invoice_number)),
            )?;
        }
        if vat_amount > zero {
            journal.add_line(
                accounts.vat_output.id,
                zero.clone(),
                vat_amount,
                ctx.now,
                Some(format!("VAT output - invoice {}", invoice.invoice_number)),
            )?;
        }

        let number = self
            .store
            .next_code(DocumentType::Journal, fiscal_year.id)
            .await?;
        journal.post(&number, &ctx.username, ctx.now)?;
        self.store.add_journal_entry(&journal).await
    }

    /// DR COGS / CR Inventory for the sum of per-line costs. Each line's
    /// cost is base quantity × the product's weighted-average cost read
    /// before any stock mutation, so COGS reflects the pre-sale basis.
    /// Skipped entirely when the total cost is zero.
    async fn create_cogs_journal(
        &mut self,
        invoice: &SalesInvoice,
        fiscal_year: &FiscalYear,
        period: &FiscalPeriod,
        accounts: &PostingAccounts,
        ctx: &PostingContext,
    ) -> PostingResult<(Option<EntityId>, HashMap<u32, BigDecimal>)> {
        let zero = BigDecimal::from(0);
        let mut line_costs = HashMap::new();
        let mut total = BigDecimal::from(0);
        for line in &invoice.lines {
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
            invoice.invoice_date,
            format!("Cost of goods sold - sales invoice {}", invoice.invoice_number),
            SourceType::SalesInvoice,
            fiscal_year.id,
            period.id,
            Some(invoice.invoice_number.clone()),
            Some(invoice.id),
        )?;
        journal.add_line(
            accounts.cogs.id,
            total.clone(),
            zero.clone(),
            ctx.now,
            Some(format!("COGS - sales invoice {}", invoice.invoice_number)),
        )?;
        journal.add_line(
            accounts.inventory.id,
            zero,
            total,
            ctx.now,
            Some(format!("Inventory - sales invoice {}", invoice.invoice_number)),
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
