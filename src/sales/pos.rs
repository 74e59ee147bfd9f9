//! Point-of-sale: cashier sessions and atomic sale completion
//!
//! A completed sale runs the full invoice posting pattern in one
//! serializable transaction, with the revenue debit split across the
//! settlement accounts by tender:
//!
//! Revenue journal:  DR Cash / Card / Receivables  /  CR Sales  /  CR VAT
//! COGS journal:     DR COGS  /  CR Inventory  (per-line at WAC)
//!
//! Cancellation reverses the journals, restores stock, undoes the payment
//! allocation and backs the sale out of the session totals.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ledger::fiscal::{resolve_posting_period, resolve_reversal_period, FiscalPeriod, FiscalYear};
use crate::ledger::journal::JournalEntry;
use crate::sales::*;
use crate::traits::{capabilities, ensure_allowed, AllowAll, AuthorizationPolicy, PostingStore};
use crate::types::*;
use crate::utils::validation::{validate_new_lines, validate_positive_amount};

/// Request to open a cashier session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosSession {
    pub user_id: EntityId,
    pub cashbox_id: EntityId,
    pub warehouse_id: EntityId,
    pub opening_balance: BigDecimal,
}

/// One tender offered against a POS sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosTender {
    pub method: PaymentMethod,
    pub amount: BigDecimal,
    pub reference: Option<String>,
}

/// Request to complete a POS sale inside an open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosSaleInput {
    pub session_id: EntityId,
    /// Charged customer; defaults to the walk-in customer. Required when
    /// any tender is on-account.
    pub customer_id: Option<EntityId>,
    pub notes: Option<String>,
    pub lines: Vec<NewDocumentLine>,
    pub payments: Vec<PosTender>,
}

/// Per-method tender totals for one sale.
struct TenderBreakdown {
    cash: BigDecimal,
    card: BigDecimal,
    on_account: BigDecimal,
    customer_id: EntityId,
}

impl TenderBreakdown {
    fn total(&self) -> BigDecimal {
        &self.cash + &self.card + &self.on_account
    }
}

/// Orchestrates POS sessions and sales.
pub struct PosService<S: PostingStore> {
    store: S,
    authorization: Box<dyn AuthorizationPolicy>,
    codes: GlAccountCodes,
    /// Customer charged for anonymous counter sales
    walk_in_customer_id: EntityId,
}

impl<S: PostingStore> PosService<S> {
    pub fn new(store: S, walk_in_customer_id: EntityId) -> Self {
        Self::with_policy(
            store,
            Box::new(AllowAll),
            GlAccountCodes::default(),
            walk_in_customer_id,
        )
    }

    pub fn with_policy(
        store: S,
        authorization: Box<dyn AuthorizationPolicy>,
        codes: GlAccountCodes,
        walk_in_customer_id: EntityId,
    ) -> Self {
        Self {
            store,
            authorization,
            codes,
            walk_in_customer_id,
        }
    }

    /// Opens a session for a cashier. A cashier can hold only one open
    /// session at a time.
    pub async fn open_session(
        &mut self,
        input: OpenPosSession,
        ctx: &PostingContext,
    ) -> PostingResult<PosSession> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::POS_ACCESS)?;

        if self
            .store
            .open_session_for_user(input.user_id)
            .await?
            .is_some()
        {
            return Err(PostingError::Precondition(
                "the cashier already has an open session; close it first".to_string(),
            ));
        }

        let fiscal_year = self
            .store
            .active_fiscal_year()
            .await?
            .ok_or_else(|| PostingError::Precondition("no active fiscal year".to_string()))?;
        let number = self
            .store
            .next_code(DocumentType::PosSession, fiscal_year.id)
            .await?;

        let mut session = PosSession::open(
            number,
            input.user_id,
            input.cashbox_id,
            input.warehouse_id,
            input.opening_balance,
            ctx.now,
        )?;
        session.id = self.store.add_pos_session(&session).await?;
        info!(session = %session.session_number, "opened POS session");
        Ok(session)
    }

    /// Closes a session with the counted drawer balance.
    pub async fn close_session(
        &mut self,
        session_id: EntityId,
        actual_closing_balance: BigDecimal,
        notes: Option<String>,
        ctx: &PostingContext,
    ) -> PostingResult<PosSession> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::POS_ACCESS)?;

        let mut session = self
            .store
            .pos_session(session_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("POS session {session_id}")))?;
        session.close(actual_closing_balance, notes, ctx.now)?;
        self.store.update_pos_session(&session).await?;
        info!(session = %session.session_number, variance = %session.variance, "closed POS session");
        Ok(session)
    }

    /// On-hand quantity of a product at a warehouse, for the sale screen.
    pub async fn available_stock(
        &self,
        product_id: EntityId,
        warehouse_id: EntityId,
    ) -> PostingResult<BigDecimal> {
        Ok(self
            .store
            .warehouse_stock(warehouse_id, product_id)
            .await?
            .map(|s| s.quantity)
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    /// Completes a sale atomically: fiscal gate on today's period, stock
    /// gate, draft invoice from the session's warehouse, revenue and COGS
    /// journals, stock deduction, payment rows and session totals. Any
    /// failure rolls the whole sale back.
    pub async fn complete_sale(
        &mut self,
        input: PosSaleInput,
        ctx: &PostingContext,
    ) -> PostingResult<SalesInvoice> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::POS_ACCESS)?;
        validate_new_lines(&input.lines)?;
        let tenders = self.parse_tenders(&input)?;

        let session = self
            .store
            .pos_session(input.session_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("POS session {}", input.session_id)))?;
        if !session.is_open() {
            return Err(PostingError::Precondition(
                "the POS session is closed".to_string(),
            ));
        }

        self.store.begin_serializable().await?;
        match self.complete_sale_in_tx(&input, &tenders, ctx).await {
            Ok(invoice) => {
                self.store.commit().await?;
                info!(invoice = %invoice.invoice_number, "completed POS sale");
                Ok(invoice)
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Cancels a posted POS sale within an open session: reversal journals,
    /// stock restoration, payment reversal and session totals, atomically.
    pub async fn cancel_sale(
        &mut self,
        invoice_id: EntityId,
        session_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<()> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::POS_ACCESS)?;

        let invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        if invoice.status != DocumentStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted sales can be cancelled".to_string(),
            ));
        }
        let session = self
            .store
            .pos_session(session_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("POS session {session_id}")))?;
        if !session.is_open() {
            return Err(PostingError::Precondition(
                "a sale cannot be cancelled in a closed session".to_string(),
            ));
        }

        self.store.begin_serializable().await?;
        match self.cancel_sale_in_tx(invoice_id, session_id, ctx).await {
            Ok(()) => {
                self.store.commit().await?;
                info!(invoice = %invoice.invoice_number, "cancelled POS sale");
                Ok(())
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    fn parse_tenders(&self, input: &PosSaleInput) -> PostingResult<TenderBreakdown> {
        if input.payments.is_empty() {
            return Err(PostingError::Validation(
                "at least one payment is required".to_string(),
            ));
        }

        let mut cash = BigDecimal::from(0);
        let mut card = BigDecimal::from(0);
        let mut on_account = BigDecimal::from(0);
        for tender in &input.payments {
            validate_positive_amount(&tender.amount)?;
            match tender.method {
                PaymentMethod::Cash => cash += &tender.amount,
                PaymentMethod::Card => card += &tender.amount,
                PaymentMethod::OnAccount => on_account += &tender.amount,
            }
        }

        if on_account > BigDecimal::from(0) && input.customer_id.is_none() {
            return Err(PostingError::Validation(
                "an on-account sale requires a customer".to_string(),
            ));
        }

        Ok(TenderBreakdown {
            cash,
            card,
            on_account,
            customer_id: input.customer_id.unwrap_or(self.walk_in_customer_id),
        })
    }

    async fn complete_sale_in_tx(
        &mut self,
        input: &PosSaleInput,
        tenders: &TenderBreakdown,
        ctx: &PostingContext,
    ) -> PostingResult<SalesInvoice> {
        // Re-read inside the transaction for a consistent snapshot.
        let mut session = self
            .store
            .pos_session(input.session_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("POS session {}", input.session_id)))?;
        if !session.is_open() {
            return Err(PostingError::Precondition(
                "the POS session is closed".to_string(),
            ));
        }

        let (fiscal_year, period) = resolve_posting_period(&self.store, ctx.today).await?;

        let number = self
            .store
            .next_code(DocumentType::SalesInvoice, fiscal_year.id)
            .await?;
        let mut invoice = SalesInvoice::new(
            number.as_str(),
            ctx.today,
            tenders.customer_id,
            session.warehouse_id,
            input
                .notes
                .clone()
                .or_else(|| Some(format!("POS session {}", session.session_number))),
        )?;
        for line in &input.lines {
            invoice.add_line(build_line(&self.store, line).await?)?;
        }

        validate_stock(&self.store, session.warehouse_id, &invoice.lines).await?;

        let accounts = resolve_pos_accounts(&self.store, &self.codes).await?;
        let sales_amount = round_money(&(&invoice.subtotal - &invoice.discount_total));
        let vat_amount = round_money(&invoice.vat_total);
        let invoice_total = &sales_amount + &vat_amount;
        if tenders.total() != invoice_total {
            return Err(PostingError::Validation(format!(
                "payments ({}) must equal the invoice total ({})",
                tenders.total(),
                invoice_total
            )));
        }

        invoice.id = self.store.add_sales_invoice(&invoice).await?;

        let revenue_journal_id = self
            .create_revenue_journal(
                &invoice,
                tenders,
                &sales_amount,
                &vat_amount,
                &fiscal_year,
                &period,
                &accounts,
                ctx,
            )
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
                session.warehouse_id,
                line,
                MovementType::SalesOut,
                &unit_cost,
                ctx.today,
                &invoice.invoice_number,
                SourceType::PosSale,
                invoice.id,
                Some(format!("POS session {}", session.session_number)),
            )
            .await?;
        }

        invoice.post(revenue_journal_id, cogs_journal_id)?;

        let paid_now = &tenders.cash + &tenders.card;
        if paid_now > BigDecimal::from(0) {
            invoice.apply_payment(&paid_now)?;
        }
        self.store.update_sales_invoice(&invoice).await?;

        for tender in &input.payments {
            let payment = PosPayment::new(
                invoice.id,
                session.id,
                tender.method,
                tender.amount.clone(),
                ctx.now,
                tender.reference.clone(),
            )?;
            self.store.add_pos_payment(&payment).await?;
        }

        session.record_sale(
            &invoice.net_total,
            &tenders.cash,
            &tenders.card,
            &tenders.on_account,
        )?;
        self.store.update_pos_session(&session).await?;

        Ok(invoice)
    }

    async fn cancel_sale_in_tx(
        &mut self,
        invoice_id: EntityId,
        session_id: EntityId,
        ctx: &PostingContext,
    ) -> PostingResult<()> {
        let mut invoice = self
            .store
            .sales_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("sales invoice {invoice_id}")))?;
        let mut session = self
            .store
            .pos_session(session_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("POS session {session_id}")))?;

        let (fiscal_year, period) = resolve_reversal_period(&self.store, ctx.today).await?;

        if let Some(revenue_journal_id) = invoice.revenue_journal_id {
            reverse_journal(
                &mut self.store,
                revenue_journal_id,
                &format!("Cancellation of POS sale {}", invoice.invoice_number),
                &fiscal_year,
                &period,
                ctx,
            )
            .await?;
        }
        if let Some(cogs_journal_id) = invoice.cogs_journal_id {
            reverse_journal(
                &mut self.store,
                cogs_journal_id,
                &format!("Cancellation of POS sale {} (COGS)", invoice.invoice_number),
                &fiscal_year,
                &period,
                ctx,
            )
            .await?;
        }

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
                SourceType::PosSale,
                invoice.id,
                Some(format!(
                    "Cancellation of POS sale in session {}",
                    session.session_number
                )),
            )
            .await?;
        }

        let payments = self.store.pos_payments_for_invoice(invoice.id).await?;
        let sum_for = |method: PaymentMethod| -> BigDecimal {
            payments
                .iter()
                .filter(|p| p.method == method)
                .map(|p| &p.amount)
                .sum()
        };
        let cash = sum_for(PaymentMethod::Cash);
        let card = sum_for(PaymentMethod::Card);
        let on_account = sum_for(PaymentMethod::OnAccount);

        if invoice.paid_amount > BigDecimal::from(0) {
            let paid = invoice.paid_amount.clone();
            invoice.reverse_payment(&paid)?;
        }
        invoice.cancel()?;
        self.store.update_sales_invoice(&invoice).await?;

        session.reverse_sale(&invoice.net_total, &cash, &card, &on_account)?;
        self.store.update_pos_session(&session).await
    }

    /// Revenue split across the settlement accounts by tender, credited to
    /// Sales and VAT Output. Zero-amount lines are omitted.
    #[allow(clippy::too_many_arguments)]
    async fn create_revenue_journal(
        &mut self,
        invoice: &SalesInvoice,
        tenders: &TenderBreakdown,
        sales_amount: &BigDecimal,
        vat_amount: &BigDecimal,
        fiscal_year: &FiscalYear,
        period: &FiscalPeriod,
        accounts: &PosAccounts,
        ctx: &PostingContext,
    ) -> PostingResult<EntityId> {
        let zero = BigDecimal::from(0);
        let mut journal = JournalEntry::create_draft(
            invoice.invoice_date,
            format!("POS sale {}", invoice.invoice_number),
            SourceType::PosSale,
            fiscal_year.id,
            period.id,
            Some(invoice.invoice_number.clone()),
            Some(invoice.id),
        )?;

        if tenders.cash > zero {
            journal.add_line(
                accounts.cash.id,
                tenders.cash.clone(),
                zero.clone(),
                ctx.now,
                Some(format!("Cash - POS {}", invoice.invoice_number)),
            )?;
        }
        if tenders.card > zero {
            journal.add_line(
                accounts.card.id,
                tenders.card.clone(),
                zero.clone(),
                ctx.now,
                Some(format!("Card - POS {}", invoice.invoice_number)),
            )?;
        }
        if tenders.on_account > zero {
            journal.add_line(
                accounts.base.receivables.id,
                tenders.on_account.clone(),
                zero.clone(),
                ctx.now,
                Some(format!("On account - POS {}", invoice.invoice_number)),
            )?;
        }
        if *sales_amount > zero {
            journal.add_line(
                accounts.base.sales.id,
                zero.clone(),
                sales_amount.clone(),
                ctx.now,
                Some(format!("Sales - POS {}", invoice.invoice_number)),
            )?;
        }
        if *vat_amount > zero {
            journal.add_line(
                accounts.base.vat_output.id,
                zero.clone(),
                vat_amount.clone(),
                ctx.now,
                Some(format!("VAT output - POS {}", invoice.invoice_number)),
            )?;
        }

        let number = self
            .store
            .next_code(DocumentType::Journal, fiscal_year.id)
            .await?;
        journal.post(&number, &ctx.username, ctx.now)?;
        self.store.add_journal_entry(&journal).await
    }

    /// DR COGS / CR Inventory at the pre-sale weighted-average cost.
    /// Skipped entirely when the total cost is zero.
    async fn create_cogs_journal(
        &mut self,
        invoice: &SalesInvoice,
        fiscal_year: &FiscalYear,
        period: &FiscalPeriod,
        accounts: &PosAccounts,
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
            format!("COGS - POS sale {}", invoice.invoice_number),
            SourceType::PosSale,
            fiscal_year.id,
            period.id,
            Some(invoice.invoice_number.clone()),
            Some(invoice.id),
        )?;
        journal.add_line(
            accounts.base.cogs.id,
            total.clone(),
            zero.clone(),
            ctx.now,
            Some(format!("COGS - POS {}", invoice.invoice_number)),
        )?;
        journal.add_line(
            accounts.base.inventory.id,
            zero,
            total,
            ctx.now,
            Some(format!("Inventory - POS {}", invoice.invoice_number)),
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
