//! Core types shared across the posting engine

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the storage layer on insert. Zero means "not yet saved".
pub type EntityId = i64;

/// Normal balance side of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalBalance {
    /// Debit-normal: Assets, Expenses, COGS, Other Expenses
    Debit,
    /// Credit-normal: Liabilities, Equity, Revenue, Other Income
    Credit,
}

/// Account classification following the standard chart layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountClass {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
    Cogs,
    OtherIncome,
    OtherExpense,
}

impl AccountClass {
    /// Returns the normal balance side for this classification.
    /// Assets, Expenses, COGS and Other Expenses carry debit balances;
    /// everything else carries credit balances.
    pub fn normal_balance(&self) -> NormalBalance {
        match self {
            AccountClass::Asset
            | AccountClass::Expense
            | AccountClass::Cogs
            | AccountClass::OtherExpense => NormalBalance::Debit,
            AccountClass::Liability
            | AccountClass::Equity
            | AccountClass::Revenue
            | AccountClass::OtherIncome => NormalBalance::Credit,
        }
    }
}

/// Lifecycle of a journal entry: Draft → Posted → Reversed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntryStatus {
    Draft,
    Posted,
    Reversed,
}

/// Lifecycle of a fiscal year: Setup → Active → Closed (irreversible)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalYearStatus {
    Setup,
    Active,
    Closed,
}

/// A fiscal period is either open for postings or locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodStatus {
    Open,
    Locked,
}

/// Lifecycle of a sales document: Draft → Posted → Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Draft,
    Posted,
    Cancelled,
}

/// Payment lifecycle of a posted invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    FullyPaid,
}

/// POS cashier session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PosSessionStatus {
    Open,
    Closed,
}

/// Tender type for a POS payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    OnAccount,
}

/// Originating document family of a journal entry or stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Manual,
    Opening,
    Adjustment,
    SalesInvoice,
    SalesReturn,
    PosSale,
}

/// Direction and cause of a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    PurchaseIn,
    SalesOut,
    SalesReturn,
    AdjustmentIn,
    AdjustmentOut,
    TransferIn,
    TransferOut,
    OpeningBalance,
}

impl MovementType {
    /// Returns true if this movement increases stock.
    pub fn is_incoming(&self) -> bool {
        matches!(
            self,
            MovementType::PurchaseIn
                | MovementType::SalesReturn
                | MovementType::AdjustmentIn
                | MovementType::TransferIn
                | MovementType::OpeningBalance
        )
    }
}

/// Document family owning a numbering sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    SalesInvoice,
    SalesReturn,
    PosSession,
    Journal,
}

impl DocumentType {
    /// Short tag used when building a sequence prefix (e.g. `SI-2026-`).
    pub fn tag(&self) -> &'static str {
        match self {
            DocumentType::SalesInvoice => "SI",
            DocumentType::SalesReturn => "SR",
            DocumentType::PosSession => "POS",
            DocumentType::Journal => "JV",
        }
    }

    /// Zero-padding width of the sequential part.
    pub fn pad_width(&self) -> usize {
        match self {
            DocumentType::Journal => 5,
            _ => 4,
        }
    }
}

/// Audit context passed explicitly into every orchestrator operation.
///
/// Carrying the user and clock as parameters (instead of reading globals)
/// keeps posting behavior a pure function of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingContext {
    /// Username stamped on postings and audit rows
    pub username: String,
    /// Wall-clock timestamp for audit stamps
    pub now: NaiveDateTime,
    /// Business date used for reversal/cancellation postings
    pub today: NaiveDate,
}

impl PostingContext {
    /// Create a context; `today` is derived from `now`.
    pub fn new(username: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            username: username.into(),
            now,
            today: now.date(),
        }
    }
}

/// Errors surfaced by the posting engine.
///
/// The variant encodes how a failure should be handled: validation and
/// precondition failures need the caller to fix the input or underlying state,
/// conflicts may be retried, configuration errors mean the chart of accounts
/// is not seeded, and storage errors are passed through from the backend.
#[derive(Debug, thiserror::Error)]
pub enum PostingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("missing system account configuration: {0}")]
    Configuration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl PostingError {
    /// True for failures that a bounded retry with fresh state may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PostingError::Conflict(_))
    }
}

/// Result type for posting operations
pub type PostingResult<T> = Result<T, PostingError>;

/// Rounds a monetary amount to 2 decimal places (half-up).
pub fn round_money(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

/// Rounds a quantity or unit cost to 4 decimal places (half-up),
/// matching the persisted `18,4` precision.
pub fn round_quantity(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(4, RoundingMode::HalfUp)
}

/// True if the amount carries at most 2 decimal places.
pub fn is_money_precision(amount: &BigDecimal) -> bool {
    *amount == round_money(amount)
}
