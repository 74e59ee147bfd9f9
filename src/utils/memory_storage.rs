//! In-memory storage implementation for testing and development
//!
//! Transactions are serializable by construction: `begin_serializable`
//! acquires a storage-wide lock and snapshots the whole state; `rollback`
//! restores the snapshot, `commit` discards it. Clones share the same
//! underlying state, so concurrent callers queue on the transaction lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::inventory::{InventoryMovement, Product, WarehouseStock};
use crate::ledger::account::Account;
use crate::ledger::fiscal::FiscalYear;
use crate::ledger::journal::JournalEntry;
use crate::ledger::sequence::CodeSequence;
use crate::sales::customer::Customer;
use crate::sales::documents::{PosPayment, PosSession, SalesInvoice, SalesReturn};
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct State {
    next_id: EntityId,
    accounts: HashMap<EntityId, Account>,
    journal_entries: HashMap<EntityId, JournalEntry>,
    fiscal_years: HashMap<EntityId, FiscalYear>,
    sequences: HashMap<(DocumentType, EntityId), CodeSequence>,
    products: HashMap<EntityId, Product>,
    stocks: HashMap<(EntityId, EntityId), WarehouseStock>,
    movements: Vec<InventoryMovement>,
    customers: HashMap<EntityId, Customer>,
    invoices: HashMap<EntityId, SalesInvoice>,
    returns: HashMap<EntityId, SalesReturn>,
    sessions: HashMap<EntityId, PosSession>,
    payments: Vec<PosPayment>,
}

impl State {
    fn next_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }
}

struct ActiveTransaction {
    snapshot: State,
    _guard: OwnedMutexGuard<()>,
}

/// In-memory [`PostingStore`] backend.
#[derive(Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    transaction: Arc<Mutex<Option<ActiveTransaction>>>,
    transaction_lock: Arc<AsyncMutex<()>>,
}

impl MemoryStorage {
    /// Creates an empty storage instance.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            transaction: Arc::new(Mutex::new(None)),
            transaction_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Clears all data (useful for testing).
    pub fn clear(&self) {
        *self.state.write().unwrap() = State::default();
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionalStore for MemoryStorage {
    async fn begin_serializable(&mut self) -> PostingResult<()> {
        let guard = self.transaction_lock.clone().lock_owned().await;
        let snapshot = self.state.read().unwrap().clone();
        *self.transaction.lock().unwrap() = Some(ActiveTransaction {
            snapshot,
            _guard: guard,
        });
        Ok(())
    }

    async fn commit(&mut self) -> PostingResult<()> {
        match self.transaction.lock().unwrap().take() {
            Some(_) => Ok(()),
            None => Err(PostingError::Storage(
                "commit without an open transaction".to_string(),
            )),
        }
    }

    async fn rollback(&mut self) -> PostingResult<()> {
        match self.transaction.lock().unwrap().take() {
            Some(tx) => {
                *self.state.write().unwrap() = tx.snapshot;
                Ok(())
            }
            None => Err(PostingError::Storage(
                "rollback without an open transaction".to_string(),
            )),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStorage {
    async fn account(&self, id: EntityId) -> PostingResult<Option<Account>> {
        Ok(self.state.read().unwrap().accounts.get(&id).cloned())
    }

    async fn account_by_code(&self, code: &str) -> PostingResult<Option<Account>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .accounts
            .values()
            .find(|a| a.code == code)
            .cloned())
    }

    async fn save_account(&mut self, account: &Account) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        if state.accounts.values().any(|a| a.code == account.code) {
            return Err(PostingError::Conflict(format!(
                "account code '{}' already exists",
                account.code
            )));
        }
        let id = state.next_id();
        let mut account = account.clone();
        account.id = id;
        state.accounts.insert(id, account);
        Ok(id)
    }

    async fn update_account(&mut self, account: &Account) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.accounts.contains_key(&account.id) {
            return Err(PostingError::NotFound(format!("account {}", account.id)));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn journal_entry(&self, id: EntityId) -> PostingResult<Option<JournalEntry>> {
        Ok(self.state.read().unwrap().journal_entries.get(&id).cloned())
    }

    async fn add_journal_entry(&mut self, entry: &JournalEntry) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        if let Some(number) = &entry.journal_number {
            if state
                .journal_entries
                .values()
                .any(|e| e.journal_number.as_ref() == Some(number))
            {
                return Err(PostingError::Conflict(format!(
                    "journal number '{number}' already exists"
                )));
            }
        }
        let id = state.next_id();
        let mut entry = entry.clone();
        entry.id = id;
        state.journal_entries.insert(id, entry);
        Ok(id)
    }

    async fn update_journal_entry(&mut self, entry: &JournalEntry) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.journal_entries.contains_key(&entry.id) {
            return Err(PostingError::NotFound(format!("journal entry {}", entry.id)));
        }
        state.journal_entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn fiscal_year(&self, id: EntityId) -> PostingResult<Option<FiscalYear>> {
        Ok(self.state.read().unwrap().fiscal_years.get(&id).cloned())
    }

    async fn active_fiscal_year(&self) -> PostingResult<Option<FiscalYear>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .fiscal_years
            .values()
            .find(|fy| fy.status == FiscalYearStatus::Active)
            .cloned())
    }

    async fn fiscal_year_by_year(&self, year: i32) -> PostingResult<Option<FiscalYear>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .fiscal_years
            .values()
            .find(|fy| fy.year == year)
            .cloned())
    }

    async fn save_fiscal_year(&mut self, fiscal_year: &FiscalYear) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        if state.fiscal_years.values().any(|fy| fy.year == fiscal_year.year) {
            return Err(PostingError::Conflict(format!(
                "fiscal year {} already exists",
                fiscal_year.year
            )));
        }
        if fiscal_year.status == FiscalYearStatus::Active
            && state
                .fiscal_years
                .values()
                .any(|fy| fy.status == FiscalYearStatus::Active)
        {
            return Err(PostingError::Conflict(
                "another fiscal year is already active".to_string(),
            ));
        }
        let id = state.next_id();
        let mut fiscal_year = fiscal_year.clone();
        fiscal_year.id = id;
        for period in fiscal_year.periods.iter_mut() {
            period.id = state.next_id();
            period.fiscal_year_id = id;
        }
        state.fiscal_years.insert(id, fiscal_year);
        Ok(id)
    }

    async fn update_fiscal_year(&mut self, fiscal_year: &FiscalYear) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.fiscal_years.contains_key(&fiscal_year.id) {
            return Err(PostingError::NotFound(format!(
                "fiscal year {}",
                fiscal_year.id
            )));
        }
        if fiscal_year.status == FiscalYearStatus::Active
            && state
                .fiscal_years
                .values()
                .any(|fy| fy.status == FiscalYearStatus::Active && fy.id != fiscal_year.id)
        {
            return Err(PostingError::Conflict(
                "another fiscal year is already active".to_string(),
            ));
        }
        state.fiscal_years.insert(fiscal_year.id, fiscal_year.clone());
        Ok(())
    }

    async fn next_code(
        &mut self,
        document_type: DocumentType,
        fiscal_year_id: EntityId,
    ) -> PostingResult<String> {
        let mut state = self.state.write().unwrap();
        let year = state
            .fiscal_years
            .get(&fiscal_year_id)
            .map(|fy| fy.year)
            .ok_or_else(|| PostingError::NotFound(format!("fiscal year {fiscal_year_id}")))?;
        let needs_insert = !state
            .sequences
            .contains_key(&(document_type, fiscal_year_id));
        if needs_insert {
            let mut sequence = CodeSequence::new(document_type, fiscal_year_id, year);
            sequence.id = state.next_id();
            state
                .sequences
                .insert((document_type, fiscal_year_id), sequence);
        }
        let sequence = state
            .sequences
            .get_mut(&(document_type, fiscal_year_id))
            .expect("sequence row exists");
        Ok(sequence.next_code())
    }
}

#[async_trait]
impl InventoryStore for MemoryStorage {
    async fn product(&self, id: EntityId) -> PostingResult<Option<Product>> {
        Ok(self.state.read().unwrap().products.get(&id).cloned())
    }

    async fn save_product(&mut self, product: &Product) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        let id = state.next_id();
        let mut product = product.clone();
        product.id = id;
        state.products.insert(id, product);
        Ok(id)
    }

    async fn update_product(&mut self, product: &Product) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.products.contains_key(&product.id) {
            return Err(PostingError::NotFound(format!("product {}", product.id)));
        }
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn warehouse_stock(
        &self,
        warehouse_id: EntityId,
        product_id: EntityId,
    ) -> PostingResult<Option<WarehouseStock>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .stocks
            .get(&(warehouse_id, product_id))
            .cloned())
    }

    async fn upsert_warehouse_stock(&mut self, stock: &WarehouseStock) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        let key = (stock.warehouse_id, stock.product_id);
        let id = match state.stocks.get(&key) {
            Some(existing) => existing.id,
            None => state.next_id(),
        };
        let mut stock = stock.clone();
        stock.id = id;
        state.stocks.insert(key, stock);
        Ok(id)
    }

    async fn add_movement(&mut self, movement: &InventoryMovement) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        let id = state.next_id();
        let mut movement = movement.clone();
        movement.id = id;
        state.movements.push(movement);
        Ok(id)
    }

    async fn movements_for_source(
        &self,
        source_type: SourceType,
        source_id: EntityId,
    ) -> PostingResult<Vec<InventoryMovement>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .movements
            .iter()
            .filter(|m| m.source_type == source_type && m.source_id == Some(source_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SalesStore for MemoryStorage {
    async fn customer(&self, id: EntityId) -> PostingResult<Option<Customer>> {
        Ok(self.state.read().unwrap().customers.get(&id).cloned())
    }

    async fn save_customer(&mut self, customer: &Customer) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        let id = state.next_id();
        let mut customer = customer.clone();
        customer.id = id;
        state.customers.insert(id, customer);
        Ok(id)
    }

    async fn update_customer(&mut self, customer: &Customer) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.customers.contains_key(&customer.id) {
            return Err(PostingError::NotFound(format!("customer {}", customer.id)));
        }
        state.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn sales_invoice(&self, id: EntityId) -> PostingResult<Option<SalesInvoice>> {
        Ok(self.state.read().unwrap().invoices.get(&id).cloned())
    }

    async fn add_sales_invoice(&mut self, invoice: &SalesInvoice) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        if state
            .invoices
            .values()
            .any(|i| i.invoice_number == invoice.invoice_number)
        {
            return Err(PostingError::Conflict(format!(
                "invoice number '{}' already exists",
                invoice.invoice_number
            )));
        }
        let id = state.next_id();
        let mut invoice = invoice.clone();
        invoice.id = id;
        state.invoices.insert(id, invoice);
        Ok(id)
    }

    async fn update_sales_invoice(&mut self, invoice: &SalesInvoice) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.invoices.contains_key(&invoice.id) {
            return Err(PostingError::NotFound(format!("sales invoice {}", invoice.id)));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn posted_invoices_for_customer(
        &self,
        customer_id: EntityId,
    ) -> PostingResult<Vec<SalesInvoice>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .invoices
            .values()
            .filter(|i| {
                i.customer_id == customer_id
                    && i.status == DocumentStatus::Posted
                    && i.deleted_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn sales_return(&self, id: EntityId) -> PostingResult<Option<SalesReturn>> {
        Ok(self.state.read().unwrap().returns.get(&id).cloned())
    }

    async fn add_sales_return(&mut self, sales_return: &SalesReturn) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        if state
            .returns
            .values()
            .any(|r| r.return_number == sales_return.return_number)
        {
            return Err(PostingError::Conflict(format!(
                "return number '{}' already exists",
                sales_return.return_number
            )));
        }
        let id = state.next_id();
        let mut sales_return = sales_return.clone();
        sales_return.id = id;
        state.returns.insert(id, sales_return);
        Ok(id)
    }

    async fn update_sales_return(&mut self, sales_return: &SalesReturn) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.returns.contains_key(&sales_return.id) {
            return Err(PostingError::NotFound(format!(
                "sales return {}",
                sales_return.id
            )));
        }
        state.returns.insert(sales_return.id, sales_return.clone());
        Ok(())
    }

    async fn pos_session(&self, id: EntityId) -> PostingResult<Option<PosSession>> {
        Ok(self.state.read().unwrap().sessions.get(&id).cloned())
    }

    async fn open_session_for_user(
        &self,
        user_id: EntityId,
    ) -> PostingResult<Option<PosSession>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.status == PosSessionStatus::Open)
            .cloned())
    }

    async fn add_pos_session(&mut self, session: &PosSession) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        if state
            .sessions
            .values()
            .any(|s| s.session_number == session.session_number)
        {
            return Err(PostingError::Conflict(format!(
                "session number '{}' already exists",
                session.session_number
            )));
        }
        let id = state.next_id();
        let mut session = session.clone();
        session.id = id;
        state.sessions.insert(id, session);
        Ok(id)
    }

    async fn update_pos_session(&mut self, session: &PosSession) -> PostingResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.sessions.contains_key(&session.id) {
            return Err(PostingError::NotFound(format!("POS session {}", session.id)));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn add_pos_payment(&mut self, payment: &PosPayment) -> PostingResult<EntityId> {
        let mut state = self.state.write().unwrap();
        let id = state.next_id();
        let mut payment = payment.clone();
        payment.id = id;
        state.payments.push(payment);
        Ok(id)
    }

    async fn pos_payments_for_invoice(
        &self,
        invoice_id: EntityId,
    ) -> PostingResult<Vec<PosPayment>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }
}
