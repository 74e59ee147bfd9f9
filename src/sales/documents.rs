//! Sales documents: invoices, returns, and POS sessions
//!
//! All three families share the same line math and the same
//! Draft → Posted → Cancelled lifecycle. Posting and cancellation are
//! orchestrated by the services in this module's siblings; the documents
//! themselves only guard their own state transitions.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::*;

/// One line of a sales document.
///
/// All monetary figures are computed at construction (4 decimal places) and
/// never change afterwards; editing a line means removing and re-adding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesLine {
    /// Sequential position within the document (1, 2, 3, …)
    pub line_number: u32,
    pub product_id: EntityId,
    pub unit_id: EntityId,
    /// Quantity in the selected unit
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    /// Snapshot of the product-unit conversion factor at document time
    pub conversion_factor: BigDecimal,
    /// `quantity` × `conversion_factor`; drives stock and COGS
    pub base_quantity: BigDecimal,
    /// Discount percentage, 0–100
    pub discount_percent: BigDecimal,
    pub discount_amount: BigDecimal,
    /// `quantity` × `unit_price`, before discount and VAT
    pub sub_total: BigDecimal,
    /// `sub_total` − `discount_amount`
    pub net_total: BigDecimal,
    /// VAT percentage snapshot from the product
    pub vat_rate: BigDecimal,
    pub vat_amount: BigDecimal,
    /// `net_total` + `vat_amount`
    pub total_with_vat: BigDecimal,
}

impl SalesLine {
    pub fn new(
        product_id: EntityId,
        unit_id: EntityId,
        quantity: BigDecimal,
        unit_price: BigDecimal,
        conversion_factor: BigDecimal,
        discount_percent: BigDecimal,
        vat_rate: BigDecimal,
    ) -> PostingResult<Self> {
        let zero = BigDecimal::from(0);
        let hundred = BigDecimal::from(100);

        if product_id <= 0 {
            return Err(PostingError::Validation("a product is required".to_string()));
        }
        if unit_id <= 0 {
            return Err(PostingError::Validation("a unit is required".to_string()));
        }
        if quantity <= zero {
            return Err(PostingError::Validation(
                "quantity must be greater than zero".to_string(),
            ));
        }
        if unit_price < zero {
            return Err(PostingError::Validation(
                "unit price cannot be negative".to_string(),
            ));
        }
        if conversion_factor <= zero {
            return Err(PostingError::Validation(
                "conversion factor must be greater than zero".to_string(),
            ));
        }
        if discount_percent < zero || discount_percent > hundred {
            return Err(PostingError::Validation(
                "discount percent must be between 0 and 100".to_string(),
            ));
        }
        if vat_rate < zero || vat_rate > hundred {
            return Err(PostingError::Validation(
                "VAT rate must be between 0 and 100".to_string(),
            ));
        }

        let base_quantity = round_quantity(&(&quantity * &conversion_factor));
        let sub_total = round_quantity(&(&quantity * &unit_price));
        let discount_amount = round_quantity(&(&sub_total * &discount_percent / &hundred));
        let net_total = &sub_total - &discount_amount;
        let vat_amount = round_quantity(&(&net_total * &vat_rate / &hundred));
        let total_with_vat = &net_total + &vat_amount;

        Ok(Self {
            line_number: 0,
            product_id,
            unit_id,
            quantity,
            unit_price,
            conversion_factor,
            base_quantity,
            discount_percent,
            discount_amount,
            sub_total,
            net_total,
            vat_rate,
            vat_amount,
            total_with_vat,
        })
    }
}

/// Header totals recomputed from lines; shared by invoices and returns.
fn sum_lines(lines: &[SalesLine]) -> (BigDecimal, BigDecimal, BigDecimal, BigDecimal) {
    let subtotal: BigDecimal = lines.iter().map(|l| &l.sub_total).sum();
    let discount_total: BigDecimal = lines.iter().map(|l| &l.discount_amount).sum();
    let vat_total: BigDecimal = lines.iter().map(|l| &l.vat_amount).sum();
    let net_total: BigDecimal = lines.iter().map(|l| &l.total_with_vat).sum();
    (subtotal, discount_total, vat_total, net_total)
}

fn push_line(lines: &mut Vec<SalesLine>, mut line: SalesLine) {
    line.line_number = lines.len() as u32 + 1;
    lines.push(line);
}

fn remove_line_at(lines: &mut Vec<SalesLine>, line_number: u32) -> PostingResult<()> {
    let idx = lines
        .iter()
        .position(|l| l.line_number == line_number)
        .ok_or_else(|| PostingError::NotFound(format!("document line {line_number}")))?;
    lines.remove(idx);
    for (i, line) in lines.iter_mut().enumerate() {
        line.line_number = i as u32 + 1;
    }
    Ok(())
}

/// A sales invoice. Lifecycle: Draft (lines mutable) → Posted (journals
/// exist, stock deducted, immutable) → Cancelled (reversal journals exist,
/// stock restored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesInvoice {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    /// Unique sequential document number (`SI-YYYY-####`)
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub customer_id: EntityId,
    /// Warehouse delivering the goods
    pub warehouse_id: EntityId,
    pub notes: Option<String>,
    pub status: DocumentStatus,
    pub subtotal: BigDecimal,
    pub discount_total: BigDecimal,
    pub vat_total: BigDecimal,
    /// `subtotal` − `discount_total` + `vat_total`
    pub net_total: BigDecimal,
    pub paid_amount: BigDecimal,
    pub payment_status: PaymentStatus,
    /// Revenue journal, set at posting
    pub revenue_journal_id: Option<EntityId>,
    /// COGS journal, set at posting
    pub cogs_journal_id: Option<EntityId>,
    pub lines: Vec<SalesLine>,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<String>,
}

impl SalesInvoice {
    pub fn new(
        invoice_number: impl Into<String>,
        invoice_date: NaiveDate,
        customer_id: EntityId,
        warehouse_id: EntityId,
        notes: Option<String>,
    ) -> PostingResult<Self> {
        let invoice_number = invoice_number.into();
        if invoice_number.trim().is_empty() {
            return Err(PostingError::Validation(
                "an invoice number is required".to_string(),
            ));
        }
        if customer_id <= 0 {
            return Err(PostingError::Validation("a customer is required".to_string()));
        }
        if warehouse_id <= 0 {
            return Err(PostingError::Validation("a warehouse is required".to_string()));
        }

        Ok(Self {
            id: 0,
            invoice_number: invoice_number.trim().to_string(),
            invoice_date,
            customer_id,
            warehouse_id,
            notes: notes.map(|n| n.trim().to_string()),
            status: DocumentStatus::Draft,
            subtotal: BigDecimal::from(0),
            discount_total: BigDecimal::from(0),
            vat_total: BigDecimal::from(0),
            net_total: BigDecimal::from(0),
            paid_amount: BigDecimal::from(0),
            payment_status: PaymentStatus::Unpaid,
            revenue_journal_id: None,
            cogs_journal_id: None,
            lines: Vec::new(),
            deleted_at: None,
            deleted_by: None,
        })
    }

    /// Adds a line while the invoice is a draft.
    pub fn add_line(&mut self, line: SalesLine) -> PostingResult<()> {
        self.ensure_draft("cannot add lines to a posted or cancelled invoice")?;
        push_line(&mut self.lines, line);
        self.recalculate_totals();
        Ok(())
    }

    /// Removes a line by number while the invoice is a draft.
    pub fn remove_line(&mut self, line_number: u32) -> PostingResult<()> {
        self.ensure_draft("cannot remove lines from a posted or cancelled invoice")?;
        remove_line_at(&mut self.lines, line_number)?;
        self.recalculate_totals();
        Ok(())
    }

    /// Replaces all lines at once (draft editing).
    pub fn replace_lines(&mut self, new_lines: Vec<SalesLine>) -> PostingResult<()> {
        self.ensure_draft("cannot edit lines of a posted or cancelled invoice")?;
        self.lines.clear();
        for line in new_lines {
            push_line(&mut self.lines, line);
        }
        self.recalculate_totals();
        Ok(())
    }

    /// Updates the header fields while the invoice is a draft.
    pub fn update_header(
        &mut self,
        invoice_date: NaiveDate,
        customer_id: EntityId,
        warehouse_id: EntityId,
        notes: Option<String>,
    ) -> PostingResult<()> {
        self.ensure_draft("cannot edit a posted or cancelled invoice")?;
        if customer_id <= 0 {
            return Err(PostingError::Validation("a customer is required".to_string()));
        }
        if warehouse_id <= 0 {
            return Err(PostingError::Validation("a warehouse is required".to_string()));
        }
        self.invoice_date = invoice_date;
        self.customer_id = customer_id;
        self.warehouse_id = warehouse_id;
        self.notes = notes.map(|n| n.trim().to_string());
        Ok(())
    }

    /// Flips the invoice to Posted, recording the journal ids. The COGS
    /// journal is absent when the entire sale carried a zero cost basis.
    pub fn post(
        &mut self,
        revenue_journal_id: EntityId,
        cogs_journal_id: Option<EntityId>,
    ) -> PostingResult<()> {
        self.ensure_draft("the invoice is already posted or cancelled")?;
        if self.lines.is_empty() {
            return Err(PostingError::Precondition(
                "an invoice without lines cannot be posted".to_string(),
            ));
        }
        if revenue_journal_id <= 0 || cogs_journal_id.is_some_and(|id| id <= 0) {
            return Err(PostingError::Validation(
                "valid journal ids are required at posting".to_string(),
            ));
        }
        self.status = DocumentStatus::Posted;
        self.revenue_journal_id = Some(revenue_journal_id);
        self.cogs_journal_id = cogs_journal_id;
        Ok(())
    }

    /// Cancels a posted invoice. Blocked while any payment remains applied;
    /// the receipts must be reversed first.
    pub fn cancel(&mut self) -> PostingResult<()> {
        if self.status != DocumentStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted invoices can be cancelled".to_string(),
            ));
        }
        if self.paid_amount > BigDecimal::from(0) {
            return Err(PostingError::Precondition(format!(
                "an invoice with applied payments ({}) cannot be cancelled; reverse the receipts first",
                self.paid_amount
            )));
        }
        self.status = DocumentStatus::Cancelled;
        Ok(())
    }

    /// Records a payment against a posted invoice.
    pub fn apply_payment(&mut self, amount: &BigDecimal) -> PostingResult<()> {
        if self.status != DocumentStatus::Posted {
            return Err(PostingError::Precondition(
                "payments apply only to posted invoices".to_string(),
            ));
        }
        if *amount <= BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "payment amount must be greater than zero".to_string(),
            ));
        }
        if &self.paid_amount + amount > self.net_total {
            return Err(PostingError::Precondition(format!(
                "payment {} exceeds the balance due {}",
                amount,
                &self.net_total - &self.paid_amount
            )));
        }
        self.paid_amount += amount;
        self.recalculate_payment_status();
        Ok(())
    }

    /// Reverses a previously applied payment (receipt cancellation).
    pub fn reverse_payment(&mut self, amount: &BigDecimal) -> PostingResult<()> {
        if self.status == DocumentStatus::Cancelled {
            return Err(PostingError::Precondition(
                "cannot reverse a payment on a cancelled invoice".to_string(),
            ));
        }
        if *amount <= BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "reversal amount must be greater than zero".to_string(),
            ));
        }
        if *amount > self.paid_amount {
            return Err(PostingError::Precondition(format!(
                "reversal {} exceeds the paid amount {}",
                amount, self.paid_amount
            )));
        }
        self.paid_amount -= amount;
        self.recalculate_payment_status();
        Ok(())
    }

    /// Soft-deletes a draft. Posted and cancelled invoices are permanent.
    pub fn soft_delete(&mut self, by: &str, at: NaiveDateTime) -> PostingResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(
                "only draft invoices can be deleted; use cancellation".to_string(),
            ));
        }
        self.deleted_at = Some(at);
        self.deleted_by = Some(by.to_string());
        Ok(())
    }

    /// Remaining balance due.
    pub fn balance_due(&self) -> BigDecimal {
        &self.net_total - &self.paid_amount
    }

    fn ensure_draft(&self, message: &str) -> PostingResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(message.to_string()));
        }
        Ok(())
    }

    fn recalculate_totals(&mut self) {
        let (subtotal, discount_total, vat_total, net_total) = sum_lines(&self.lines);
        self.subtotal = subtotal;
        self.discount_total = discount_total;
        self.vat_total = vat_total;
        self.net_total = net_total;
    }

    fn recalculate_payment_status(&mut self) {
        self.payment_status = if self.paid_amount <= BigDecimal::from(0) {
            PaymentStatus::Unpaid
        } else if self.paid_amount >= self.net_total {
            PaymentStatus::FullyPaid
        } else {
            PaymentStatus::PartiallyPaid
        };
    }
}

/// A sales return: goods coming back from a customer, optionally linked to
/// the originating invoice. Posting restores stock and mirrors the invoice
/// journals; cancellation re-deducts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesReturn {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    /// Unique sequential document number (`SR-YYYY-####`)
    pub return_number: String,
    pub return_date: NaiveDate,
    pub customer_id: EntityId,
    /// Warehouse receiving the goods back
    pub warehouse_id: EntityId,
    /// Invoice the goods were originally sold on, when known
    pub original_invoice_id: Option<EntityId>,
    pub notes: Option<String>,
    pub status: DocumentStatus,
    pub subtotal: BigDecimal,
    pub discount_total: BigDecimal,
    pub vat_total: BigDecimal,
    pub net_total: BigDecimal,
    pub revenue_journal_id: Option<EntityId>,
    pub cogs_journal_id: Option<EntityId>,
    pub lines: Vec<SalesLine>,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<String>,
}

impl SalesReturn {
    pub fn new(
        return_number: impl Into<String>,
        return_date: NaiveDate,
        customer_id: EntityId,
        warehouse_id: EntityId,
        original_invoice_id: Option<EntityId>,
        notes: Option<String>,
    ) -> PostingResult<Self> {
        let return_number = return_number.into();
        if return_number.trim().is_empty() {
            return Err(PostingError::Validation(
                "a return number is required".to_string(),
            ));
        }
        if customer_id <= 0 {
            return Err(PostingError::Validation("a customer is required".to_string()));
        }
        if warehouse_id <= 0 {
            return Err(PostingError::Validation("a warehouse is required".to_string()));
        }

        Ok(Self {
            id: 0,
            return_number: return_number.trim().to_string(),
            return_date,
            customer_id,
            warehouse_id,
            original_invoice_id,
            notes: notes.map(|n| n.trim().to_string()),
            status: DocumentStatus::Draft,
            subtotal: BigDecimal::from(0),
            discount_total: BigDecimal::from(0),
            vat_total: BigDecimal::from(0),
            net_total: BigDecimal::from(0),
            revenue_journal_id: None,
            cogs_journal_id: None,
            lines: Vec::new(),
            deleted_at: None,
            deleted_by: None,
        })
    }

    pub fn add_line(&mut self, line: SalesLine) -> PostingResult<()> {
        self.ensure_draft()?;
        push_line(&mut self.lines, line);
        self.recalculate_totals();
        Ok(())
    }

    pub fn remove_line(&mut self, line_number: u32) -> PostingResult<()> {
        self.ensure_draft()?;
        remove_line_at(&mut self.lines, line_number)?;
        self.recalculate_totals();
        Ok(())
    }

    pub fn replace_lines(&mut self, new_lines: Vec<SalesLine>) -> PostingResult<()> {
        self.ensure_draft()?;
        self.lines.clear();
        for line in new_lines {
            push_line(&mut self.lines, line);
        }
        self.recalculate_totals();
        Ok(())
    }

    /// Flips the return to Posted, recording the journal ids. The COGS
    /// journal is absent when the returned goods carried a zero cost basis.
    pub fn post(
        &mut self,
        revenue_journal_id: EntityId,
        cogs_journal_id: Option<EntityId>,
    ) -> PostingResult<()> {
        self.ensure_draft()?;
        if self.lines.is_empty() {
            return Err(PostingError::Precondition(
                "a return without lines cannot be posted".to_string(),
            ));
        }
        if revenue_journal_id <= 0 || cogs_journal_id.is_some_and(|id| id <= 0) {
            return Err(PostingError::Validation(
                "valid journal ids are required at posting".to_string(),
            ));
        }
        self.status = DocumentStatus::Posted;
        self.revenue_journal_id = Some(revenue_journal_id);
        self.cogs_journal_id = cogs_journal_id;
        Ok(())
    }

    /// Cancels a posted return.
    pub fn cancel(&mut self) -> PostingResult<()> {
        if self.status != DocumentStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted returns can be cancelled".to_string(),
            ));
        }
        self.status = DocumentStatus::Cancelled;
        Ok(())
    }

    pub fn soft_delete(&mut self, by: &str, at: NaiveDateTime) -> PostingResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(
                "only draft returns can be deleted".to_string(),
            ));
        }
        self.deleted_at = Some(at);
        self.deleted_by = Some(by.to_string());
        Ok(())
    }

    fn ensure_draft(&self) -> PostingResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(PostingError::Precondition(
                "a posted or cancelled return cannot change".to_string(),
            ));
        }
        Ok(())
    }

    fn recalculate_totals(&mut self) {
        let (subtotal, discount_total, vat_total, net_total) = sum_lines(&self.lines);
        self.subtotal = subtotal;
        self.discount_total = discount_total;
        self.vat_total = vat_total;
        self.net_total = net_total;
    }
}

/// A POS cashier session. Open → Closed, with a cash variance computed at
/// close. Running totals are mutated by every sale and cancellation inside
/// the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosSession {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    /// Unique session number (`POS-YYYY-####`)
    pub session_number: String,
    /// Cashier user id
    pub user_id: EntityId,
    pub cashbox_id: EntityId,
    /// Warehouse this POS draws stock from
    pub warehouse_id: EntityId,
    /// Cash in the drawer at session start
    pub opening_balance: BigDecimal,
    /// Sum of all invoice net totals in this session
    pub total_sales: BigDecimal,
    pub total_cash_received: BigDecimal,
    pub total_card_received: BigDecimal,
    pub total_on_account: BigDecimal,
    pub transaction_count: i64,
    /// Actual cash counted at close
    pub closing_balance: BigDecimal,
    /// `closing_balance` − (`opening_balance` + `total_cash_received`)
    pub variance: BigDecimal,
    pub status: PosSessionStatus,
    pub opened_at: NaiveDateTime,
    pub closed_at: Option<NaiveDateTime>,
    pub closing_notes: Option<String>,
}

impl PosSession {
    pub fn open(
        session_number: impl Into<String>,
        user_id: EntityId,
        cashbox_id: EntityId,
        warehouse_id: EntityId,
        opening_balance: BigDecimal,
        opened_at: NaiveDateTime,
    ) -> PostingResult<Self> {
        let session_number = session_number.into();
        if session_number.trim().is_empty() {
            return Err(PostingError::Validation(
                "a session number is required".to_string(),
            ));
        }
        if user_id <= 0 || cashbox_id <= 0 || warehouse_id <= 0 {
            return Err(PostingError::Validation(
                "a cashier, cashbox and warehouse are required".to_string(),
            ));
        }
        if opening_balance < BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "opening balance cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            id: 0,
            session_number: session_number.trim().to_string(),
            user_id,
            cashbox_id,
            warehouse_id,
            opening_balance,
            total_sales: BigDecimal::from(0),
            total_cash_received: BigDecimal::from(0),
            total_card_received: BigDecimal::from(0),
            total_on_account: BigDecimal::from(0),
            transaction_count: 0,
            closing_balance: BigDecimal::from(0),
            variance: BigDecimal::from(0),
            status: PosSessionStatus::Open,
            opened_at,
            closed_at: None,
            closing_notes: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == PosSessionStatus::Open
    }

    /// Folds a completed sale into the running totals.
    pub fn record_sale(
        &mut self,
        net_total: &BigDecimal,
        cash: &BigDecimal,
        card: &BigDecimal,
        on_account: &BigDecimal,
    ) -> PostingResult<()> {
        self.ensure_open("cannot record a sale in a closed session")?;
        if *net_total <= BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "sale total must be greater than zero".to_string(),
            ));
        }
        self.total_sales += net_total;
        self.total_cash_received += cash;
        self.total_card_received += card;
        self.total_on_account += on_account;
        self.transaction_count += 1;
        Ok(())
    }

    /// Backs a cancelled sale out of the running totals.
    pub fn reverse_sale(
        &mut self,
        net_total: &BigDecimal,
        cash: &BigDecimal,
        card: &BigDecimal,
        on_account: &BigDecimal,
    ) -> PostingResult<()> {
        self.ensure_open("cannot reverse a sale in a closed session")?;
        self.total_sales -= net_total;
        self.total_cash_received -= cash;
        self.total_card_received -= card;
        self.total_on_account -= on_account;
        self.transaction_count -= 1;
        Ok(())
    }

    /// Closes the session with the counted drawer amount and computes the
    /// cash variance.
    pub fn close(
        &mut self,
        actual_closing_balance: BigDecimal,
        notes: Option<String>,
        closed_at: NaiveDateTime,
    ) -> PostingResult<()> {
        self.ensure_open("the session is already closed")?;
        if actual_closing_balance < BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "closing balance cannot be negative".to_string(),
            ));
        }
        self.variance =
            &actual_closing_balance - (&self.opening_balance + &self.total_cash_received);
        self.closing_balance = actual_closing_balance;
        self.closing_notes = notes.map(|n| n.trim().to_string());
        self.status = PosSessionStatus::Closed;
        self.closed_at = Some(closed_at);
        Ok(())
    }

    fn ensure_open(&self, message: &str) -> PostingResult<()> {
        if self.status != PosSessionStatus::Open {
            return Err(PostingError::Precondition(message.to_string()));
        }
        Ok(())
    }
}

/// One tender row recorded for a POS sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosPayment {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    pub invoice_id: EntityId,
    pub session_id: EntityId,
    pub method: PaymentMethod,
    pub amount: BigDecimal,
    pub paid_at: NaiveDateTime,
    pub reference: Option<String>,
}

impl PosPayment {
    pub fn new(
        invoice_id: EntityId,
        session_id: EntityId,
        method: PaymentMethod,
        amount: BigDecimal,
        paid_at: NaiveDateTime,
        reference: Option<String>,
    ) -> PostingResult<Self> {
        if amount <= BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "payment amount must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            id: 0,
            invoice_id,
            session_id,
            method,
            amount,
            paid_at,
            reference: reference.map(|r| r.trim().to_string()),
        })
    }
}
