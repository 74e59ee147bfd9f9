//! Storage and policy abstractions
//!
//! The posting engine works against any backend that implements these traits
//! (PostgreSQL, SQLite, in-memory, …). The backend is expected to offer
//! serializable transactions with durable commit; every multi-step posting
//! operation runs between `begin_serializable` and `commit`, and any error
//! triggers `rollback` so the whole operation has no effect.

use async_trait::async_trait;

use crate::inventory::{InventoryMovement, Product, WarehouseStock};
use crate::ledger::account::Account;
use crate::ledger::fiscal::FiscalYear;
use crate::ledger::journal::JournalEntry;
use crate::sales::customer::Customer;
use crate::sales::documents::{PosPayment, PosSession, SalesInvoice, SalesReturn};
use crate::types::*;

/// Serializable transaction control.
///
/// The full sequence of reads and writes inside a posting operation must
/// observe a consistent snapshot and commit atomically. A conflicting
/// concurrent transaction surfaces as [`PostingError::Conflict`] and is the
/// caller's to retry.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn begin_serializable(&mut self) -> PostingResult<()>;
    async fn commit(&mut self) -> PostingResult<()>;
    async fn rollback(&mut self) -> PostingResult<()>;
}

/// Chart of accounts, journal entries, fiscal calendar and code sequences.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn account(&self, id: EntityId) -> PostingResult<Option<Account>>;

    /// Looks up an account by its fixed-width numeric code.
    async fn account_by_code(&self, code: &str) -> PostingResult<Option<Account>>;

    /// Inserts a new account and returns its assigned id.
    /// Fails with [`PostingError::Conflict`] when the code is taken.
    async fn save_account(&mut self, account: &Account) -> PostingResult<EntityId>;

    async fn update_account(&mut self, account: &Account) -> PostingResult<()>;

    async fn journal_entry(&self, id: EntityId) -> PostingResult<Option<JournalEntry>>;

    /// Inserts a journal entry and returns its assigned id.
    async fn add_journal_entry(&mut self, entry: &JournalEntry) -> PostingResult<EntityId>;

    async fn update_journal_entry(&mut self, entry: &JournalEntry) -> PostingResult<()>;

    async fn fiscal_year(&self, id: EntityId) -> PostingResult<Option<FiscalYear>>;

    /// The single Active fiscal year, if any.
    async fn active_fiscal_year(&self) -> PostingResult<Option<FiscalYear>>;

    async fn fiscal_year_by_year(&self, year: i32) -> PostingResult<Option<FiscalYear>>;

    /// Inserts a fiscal year (assigning period ids) and returns its id.
    /// Fails when the calendar year already exists or a second year would
    /// become Active.
    async fn save_fiscal_year(&mut self, fiscal_year: &FiscalYear) -> PostingResult<EntityId>;

    async fn update_fiscal_year(&mut self, fiscal_year: &FiscalYear) -> PostingResult<()>;

    /// Issues the next code from the (document type, fiscal year) sequence,
    /// creating the sequence row on first use.
    async fn next_code(
        &mut self,
        document_type: DocumentType,
        fiscal_year_id: EntityId,
    ) -> PostingResult<String>;
}

/// Products, per-warehouse stock balances and the movement audit trail.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn product(&self, id: EntityId) -> PostingResult<Option<Product>>;

    async fn save_product(&mut self, product: &Product) -> PostingResult<EntityId>;

    async fn update_product(&mut self, product: &Product) -> PostingResult<()>;

    async fn warehouse_stock(
        &self,
        warehouse_id: EntityId,
        product_id: EntityId,
    ) -> PostingResult<Option<WarehouseStock>>;

    /// Inserts or updates the stock row for a (warehouse, product) pair.
    async fn upsert_warehouse_stock(&mut self, stock: &WarehouseStock) -> PostingResult<EntityId>;

    /// Appends a movement audit row. Movements are never updated or deleted.
    async fn add_movement(&mut self, movement: &InventoryMovement) -> PostingResult<EntityId>;

    async fn movements_for_source(
        &self,
        source_type: SourceType,
        source_id: EntityId,
    ) -> PostingResult<Vec<InventoryMovement>>;
}

/// Customers, sales documents, POS sessions and tender rows.
#[async_trait]
pub trait SalesStore: Send + Sync {
    async fn customer(&self, id: EntityId) -> PostingResult<Option<Customer>>;

    async fn save_customer(&mut self, customer: &Customer) -> PostingResult<EntityId>;

    async fn update_customer(&mut self, customer: &Customer) -> PostingResult<()>;

    async fn sales_invoice(&self, id: EntityId) -> PostingResult<Option<SalesInvoice>>;

    /// Inserts an invoice and returns its assigned id. Fails with
    /// [`PostingError::Conflict`] when the invoice number is already taken
    /// (the unique-index race the create orchestrator retries on).
    async fn add_sales_invoice(&mut self, invoice: &SalesInvoice) -> PostingResult<EntityId>;

    async fn update_sales_invoice(&mut self, invoice: &SalesInvoice) -> PostingResult<()>;

    /// Posted, not-cancelled invoices of one customer; the credit-control
    /// exposure query.
    async fn posted_invoices_for_customer(
        &self,
        customer_id: EntityId,
    ) -> PostingResult<Vec<SalesInvoice>>;

    async fn sales_return(&self, id: EntityId) -> PostingResult<Option<SalesReturn>>;

    /// Inserts a return; [`PostingError::Conflict`] on a duplicate number.
    async fn add_sales_return(&mut self, sales_return: &SalesReturn) -> PostingResult<EntityId>;

    async fn update_sales_return(&mut self, sales_return: &SalesReturn) -> PostingResult<()>;

    async fn pos_session(&self, id: EntityId) -> PostingResult<Option<PosSession>>;

    /// The cashier's currently open session, if any.
    async fn open_session_for_user(&self, user_id: EntityId)
        -> PostingResult<Option<PosSession>>;

    async fn add_pos_session(&mut self, session: &PosSession) -> PostingResult<EntityId>;

    async fn update_pos_session(&mut self, session: &PosSession) -> PostingResult<()>;

    async fn add_pos_payment(&mut self, payment: &PosPayment) -> PostingResult<EntityId>;

    async fn pos_payments_for_invoice(
        &self,
        invoice_id: EntityId,
    ) -> PostingResult<Vec<PosPayment>>;
}

/// Everything a posting orchestrator needs from its backend.
pub trait PostingStore:
    LedgerStore + InventoryStore + SalesStore + TransactionalStore + Clone
{
}

impl<T> PostingStore for T where
    T: LedgerStore + InventoryStore + SalesStore + TransactionalStore + Clone
{
}

/// Capability strings consulted before posting operations.
pub mod capabilities {
    pub const SALES_CREATE: &str = "sales.create";
    pub const SALES_POST: &str = "sales.post";
    pub const POS_ACCESS: &str = "pos.access";
    pub const JOURNAL_POST: &str = "journal.post";
}

/// Yes/no capability check consumed from the surrounding application.
pub trait AuthorizationPolicy: Send + Sync {
    /// Returns true when the user holds the capability.
    fn is_allowed(&self, username: &str, capability: &str) -> bool;
}

/// Policy that allows everything; the default for tests and embedded use.
pub struct AllowAll;

impl AuthorizationPolicy for AllowAll {
    fn is_allowed(&self, _username: &str, _capability: &str) -> bool {
        true
    }
}

/// Guard helper shared by the orchestrators.
pub(crate) fn ensure_allowed(
    policy: &dyn AuthorizationPolicy,
    username: &str,
    capability: &str,
) -> PostingResult<()> {
    if policy.is_allowed(username, capability) {
        Ok(())
    } else {
        Err(PostingError::Unauthorized(format!(
            "user '{username}' lacks the '{capability}' capability"
        )))
    }
}
