//! Integration tests for posting-core
//!
//! Exercises the document orchestrators end to end against the in-memory
//! storage: balanced postings, fiscal gating, credit control, stock
//! effects, atomic rollback and number-conflict retry.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use posting_core::{
    seed, Customer, DocumentStatus, DocumentType, EntityId, FiscalYear, GlAccountCodes,
    InventoryMovement, InventoryStore, JournalEntryStatus, JournalService, LedgerStore,
    MemoryStorage, MovementType, NewDocumentLine, NewJournalEntry, NewJournalLine,
    NewSalesInvoice, NewSalesReturn, OpenPosSession, PaymentMethod, PosSaleInput, PosService,
    PosTender, PostingContext, PostingError, PostingResult, Product, ProductUnit,
    SalesInvoiceService, SalesReturnService, SalesStore, SourceType, TransactionalStore,
    WarehouseStock,
};

const WAREHOUSE: EntityId = 1;
const UNIT: EntityId = 1;

fn d(v: i64) -> BigDecimal {
    BigDecimal::from(v)
}

fn ts() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 6, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn ctx() -> PostingContext {
    PostingContext::new("tester", ts())
}

struct TestEnv {
    storage: MemoryStorage,
    customer_id: EntityId,
    product_id: EntityId,
}

/// Seeds an active 2026 fiscal year, the posting chart, one customer and
/// one product (WAC 6.0000) with 10 units on hand in warehouse 1.
async fn setup() -> TestEnv {
    let mut storage = MemoryStorage::new();

    let mut fiscal_year = FiscalYear::new(2026).unwrap();
    fiscal_year.activate().unwrap();
    storage.save_fiscal_year(&fiscal_year).await.unwrap();

    seed::seed_posting_accounts(&mut storage, &GlAccountCodes::default(), ts())
        .await
        .unwrap();

    let customer_id = storage
        .save_customer(&Customer::new("Test customer").unwrap())
        .await
        .unwrap();

    let product = Product::new(
        "Widget",
        d(0),
        d(6),
        vec![ProductUnit {
            unit_id: UNIT,
            conversion_factor: d(1),
        }],
    )
    .unwrap();
    let product_id = storage.save_product(&product).await.unwrap();

    let mut stock = WarehouseStock::new(WAREHOUSE, product_id);
    stock.increase(&d(10)).unwrap();
    storage.upsert_warehouse_stock(&stock).await.unwrap();

    TestEnv {
        storage,
        customer_id,
        product_id,
    }
}

fn invoice_input(env: &TestEnv, quantity: i64, unit_price: i64) -> NewSalesInvoice {
    NewSalesInvoice {
        invoice_date: NaiveDate::from_ymd_opt(2026, 6, 10).unwrap(),
        customer_id: env.customer_id,
        warehouse_id: WAREHOUSE,
        notes: None,
        lines: vec![NewDocumentLine {
            product_id: env.product_id,
            unit_id: UNIT,
            quantity: d(quantity),
            unit_price: d(unit_price),
            discount_percent: d(0),
        }],
    }
}

async fn stock_quantity(storage: &MemoryStorage, product_id: EntityId) -> BigDecimal {
    storage
        .warehouse_stock(WAREHOUSE, product_id)
        .await
        .unwrap()
        .map(|s| s.quantity)
        .unwrap_or_else(|| d(0))
}

#[tokio::test]
async fn posting_an_invoice_creates_balanced_journals_and_deducts_stock() {
    let env = setup().await;
    let mut service = SalesInvoiceService::new(env.storage.clone());

    let invoice = service.create(invoice_input(&env, 8, 25), &ctx()).await.unwrap();
    assert_eq!(invoice.status, DocumentStatus::Draft);
    assert_eq!(invoice.invoice_number, "SI-2026-0001");

    let posted = service.post(invoice.id, &ctx()).await.unwrap();
    assert_eq!(posted.status, DocumentStatus::Posted);

    // Revenue journal: DR AR 200 / CR Sales 200
    let revenue = env
        .storage
        .journal_entry(posted.revenue_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revenue.status, JournalEntryStatus::Posted);
    assert_eq!(revenue.total_debit, revenue.total_credit);
    assert_eq!(revenue.total_debit, d(200));
    assert_eq!(revenue.journal_number.as_deref(), Some("JV-2026-00001"));
    assert_eq!(revenue.source_id, Some(posted.id));

    // COGS journal: DR COGS 48 / CR Inventory 48 (8 units at WAC 6)
    let cogs = env
        .storage
        .journal_entry(posted.cogs_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cogs.total_debit, cogs.total_credit);
    assert_eq!(cogs.total_debit, d(48));

    // Scenario C: post-post quantity = 2, one movement with balance_after = 2
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(2));
    let movements = env
        .storage
        .movements_for_source(SourceType::SalesInvoice, posted.id)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::SalesOut);
    assert_eq!(movements[0].balance_after, d(2));
    assert_eq!(movements[0].unit_cost, d(6));
    assert_eq!(movements[0].total_cost, d(48));
}

#[tokio::test]
async fn insufficient_stock_rejects_the_post_and_leaves_the_draft() {
    let env = setup().await;
    let mut service = SalesInvoiceService::new(env.storage.clone());

    let invoice = service.create(invoice_input(&env, 12, 25), &ctx()).await.unwrap();
    let err = service.post(invoice.id, &ctx()).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("available 10"), "got: {message}");
    assert!(message.contains("required 12"), "got: {message}");

    let unchanged = env.storage.sales_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, DocumentStatus::Draft);
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(10));
}

#[tokio::test]
async fn locked_period_rejects_postings_dated_inside_it() {
    let env = setup().await;
    let mut storage = env.storage.clone();

    // Scenario A: lock month 2, then post an invoice dated in February.
    let mut fiscal_year = storage.active_fiscal_year().await.unwrap().unwrap();
    fiscal_year.period_mut(2).unwrap().lock("admin", ts()).unwrap();
    storage.update_fiscal_year(&fiscal_year).await.unwrap();

    let mut service = SalesInvoiceService::new(env.storage.clone());
    let mut input = invoice_input(&env, 1, 25);
    input.invoice_date = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
    let invoice = service.create(input, &ctx()).await.unwrap();

    let err = service.post(invoice.id, &ctx()).await.unwrap_err();
    assert!(err.to_string().contains("locked"), "got: {err}");

    let unchanged = env.storage.sales_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, DocumentStatus::Draft);
}

#[tokio::test]
async fn credit_limit_is_rechecked_at_post_time() {
    let env = setup().await;
    let mut storage = env.storage.clone();
    let mut service = SalesInvoiceService::new(env.storage.clone());

    // Extra stock so quantities are not the limiting factor.
    let mut stock = storage
        .warehouse_stock(WAREHOUSE, env.product_id)
        .await
        .unwrap()
        .unwrap();
    stock.increase(&d(100)).unwrap();
    storage.upsert_warehouse_stock(&stock).await.unwrap();

    // An already-posted unpaid invoice of 300 for this customer.
    let outstanding = service.create(invoice_input(&env, 3, 100), &ctx()).await.unwrap();
    service.post(outstanding.id, &ctx()).await.unwrap();

    // Drafts created while no credit limit is configured.
    let big = service.create(invoice_input(&env, 6, 100), &ctx()).await.unwrap();
    let small = service.create(invoice_input(&env, 4, 100), &ctx()).await.unwrap();

    // Scenario B: previous balance 200, limit 1000, outstanding 300.
    let mut customer = storage.customer(env.customer_id).await.unwrap().unwrap();
    customer.adjust_previous_balance(d(200));
    customer.set_credit_terms(d(1000), None, false).unwrap();
    storage.update_customer(&customer).await.unwrap();

    // 200 + 300 + 600 = 1100 > 1000: rejected at Post despite passing at Create.
    let err = service.post(big.id, &ctx()).await.unwrap_err();
    assert!(err.to_string().contains("credit limit"), "got: {err}");
    assert_eq!(
        env.storage.sales_invoice(big.id).await.unwrap().unwrap().status,
        DocumentStatus::Draft
    );

    // 200 + 300 + 400 = 900 <= 1000: accepted.
    service.post(small.id, &ctx()).await.unwrap();
}

#[tokio::test]
async fn post_then_cancel_round_trips_stock_and_nets_to_zero_per_account() {
    let env = setup().await;
    let mut service = SalesInvoiceService::new(env.storage.clone());

    let before = stock_quantity(&env.storage, env.product_id).await;
    let invoice = service.create(invoice_input(&env, 8, 25), &ctx()).await.unwrap();
    let posted = service.post(invoice.id, &ctx()).await.unwrap();

    // Cancel only succeeds from Posted; a second cancel must fail.
    service.cancel(posted.id, &ctx()).await.unwrap();
    let cancelled = env.storage.sales_invoice(posted.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, DocumentStatus::Cancelled);
    assert!(service.cancel(posted.id, &ctx()).await.is_err());

    // Net-zero stock effect.
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, before);

    // The originals are Reversed (not deleted) and each gained exactly one
    // balanced mirror entry.
    let mut per_account: HashMap<EntityId, BigDecimal> = HashMap::new();
    for journal_id in [
        cancelled.revenue_journal_id.unwrap(),
        cancelled.cogs_journal_id.unwrap(),
    ] {
        let original = env.storage.journal_entry(journal_id).await.unwrap().unwrap();
        assert_eq!(original.status, JournalEntryStatus::Reversed);

        let reversal_id = original.reversal_entry_id.unwrap();
        let reversal = env.storage.journal_entry(reversal_id).await.unwrap().unwrap();
        assert_eq!(reversal.status, JournalEntryStatus::Posted);
        assert_eq!(reversal.reversed_entry_id, Some(original.id));
        assert_eq!(reversal.total_debit, reversal.total_credit);
        assert_eq!(reversal.total_debit, original.total_debit);

        for entry in [&original, &reversal] {
            for line in &entry.lines {
                let net = per_account.entry(line.account_id).or_insert_with(|| d(0));
                *net += &line.debit - &line.credit;
            }
        }
    }
    for (account_id, net) in per_account {
        assert_eq!(net, d(0), "account {account_id} does not net to zero");
    }
}

#[tokio::test]
async fn sales_return_posts_mirrored_journals_and_restores_stock() {
    let env = setup().await;
    let mut invoices = SalesInvoiceService::new(env.storage.clone());
    let mut returns = SalesReturnService::new(env.storage.clone());

    let invoice = invoices.create(invoice_input(&env, 8, 25), &ctx()).await.unwrap();
    let posted = invoices.post(invoice.id, &ctx()).await.unwrap();
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(2));

    let input = NewSalesReturn {
        return_date: NaiveDate::from_ymd_opt(2026, 6, 12).unwrap(),
        customer_id: env.customer_id,
        warehouse_id: WAREHOUSE,
        original_invoice_id: Some(posted.id),
        notes: None,
        lines: vec![NewDocumentLine {
            product_id: env.product_id,
            unit_id: UNIT,
            quantity: d(3),
            unit_price: d(25),
            discount_percent: d(0),
        }],
    };
    let sales_return = returns.create(input, &ctx()).await.unwrap();
    assert_eq!(sales_return.return_number, "SR-2026-0001");

    let posted_return = returns.post(sales_return.id, &ctx()).await.unwrap();
    assert_eq!(posted_return.status, DocumentStatus::Posted);
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(5));

    // Mirrored revenue journal: DR Sales 75 / CR AR 75.
    let revenue = env
        .storage
        .journal_entry(posted_return.revenue_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revenue.total_debit, revenue.total_credit);
    assert_eq!(revenue.total_debit, d(75));

    // COGS mirror: DR Inventory 18 / CR COGS 18 (3 units at WAC 6).
    let cogs = env
        .storage
        .journal_entry(posted_return.cogs_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cogs.total_debit, d(18));

    // Cancelling re-deducts the returned goods.
    returns.cancel(posted_return.id, &ctx()).await.unwrap();
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(2));
}

#[tokio::test]
async fn pos_sale_splits_settlement_by_tender_and_tracks_the_session() {
    let env = setup().await;
    let mut pos = PosService::new(env.storage.clone(), env.customer_id);

    let session = pos
        .open_session(
            OpenPosSession {
                user_id: 7,
                cashbox_id: 1,
                warehouse_id: WAREHOUSE,
                opening_balance: d(100),
            },
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(session.session_number, "POS-2026-0001");

    // A second session for the same cashier is refused.
    assert!(pos
        .open_session(
            OpenPosSession {
                user_id: 7,
                cashbox_id: 1,
                warehouse_id: WAREHOUSE,
                opening_balance: d(0),
            },
            &ctx(),
        )
        .await
        .is_err());

    let sale = PosSaleInput {
        session_id: session.id,
        customer_id: None,
        notes: None,
        lines: vec![NewDocumentLine {
            product_id: env.product_id,
            unit_id: UNIT,
            quantity: d(4),
            unit_price: d(25),
            discount_percent: d(0),
        }],
        payments: vec![
            PosTender {
                method: PaymentMethod::Cash,
                amount: d(60),
                reference: None,
            },
            PosTender {
                method: PaymentMethod::Card,
                amount: d(40),
                reference: Some("AUTH-1".to_string()),
            },
        ],
    };
    let invoice = pos.complete_sale(sale, &ctx()).await.unwrap();
    assert_eq!(invoice.status, DocumentStatus::Posted);
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(6));

    // Revenue journal debits Cash 60 and Card 40, credits Sales 100.
    let revenue = env
        .storage
        .journal_entry(invoice.revenue_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revenue.lines.len(), 3);
    assert_eq!(revenue.total_debit, d(100));
    assert_eq!(revenue.total_debit, revenue.total_credit);

    let payments = env.storage.pos_payments_for_invoice(invoice.id).await.unwrap();
    assert_eq!(payments.len(), 2);

    let tracked = env.storage.pos_session(session.id).await.unwrap().unwrap();
    assert_eq!(tracked.total_sales, d(100));
    assert_eq!(tracked.total_cash_received, d(60));
    assert_eq!(tracked.total_card_received, d(40));
    assert_eq!(tracked.transaction_count, 1);

    // Cancelling the sale restores stock, payments and session totals.
    pos.cancel_sale(invoice.id, session.id, &ctx()).await.unwrap();
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(10));
    let after_cancel = env.storage.pos_session(session.id).await.unwrap().unwrap();
    assert_eq!(after_cancel.total_sales, d(0));
    assert_eq!(after_cancel.transaction_count, 0);
    let cancelled = env.storage.sales_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, DocumentStatus::Cancelled);
    assert_eq!(cancelled.paid_amount, d(0));

    // Close with the exact expected drawer: variance zero.
    let closed = pos
        .close_session(session.id, d(100), None, &ctx())
        .await
        .unwrap();
    assert_eq!(closed.variance, d(0));
}

#[tokio::test]
async fn pos_sale_requires_payments_to_cover_the_total_exactly() {
    let env = setup().await;
    let mut pos = PosService::new(env.storage.clone(), env.customer_id);
    let session = pos
        .open_session(
            OpenPosSession {
                user_id: 7,
                cashbox_id: 1,
                warehouse_id: WAREHOUSE,
                opening_balance: d(0),
            },
            &ctx(),
        )
        .await
        .unwrap();

    let sale = PosSaleInput {
        session_id: session.id,
        customer_id: None,
        notes: None,
        lines: vec![NewDocumentLine {
            product_id: env.product_id,
            unit_id: UNIT,
            quantity: d(2),
            unit_price: d(25),
            discount_percent: d(0),
        }],
        payments: vec![PosTender {
            method: PaymentMethod::Cash,
            amount: d(30),
            reference: None,
        }],
    };
    let err = pos.complete_sale(sale, &ctx()).await.unwrap_err();
    assert!(matches!(err, PostingError::Validation(_)));

    // Nothing committed: stock intact, session untouched.
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(10));
    let untouched = env.storage.pos_session(session.id).await.unwrap().unwrap();
    assert_eq!(untouched.transaction_count, 0);
}

#[tokio::test]
async fn on_account_pos_sale_requires_a_customer() {
    let env = setup().await;
    let mut pos = PosService::new(env.storage.clone(), env.customer_id);
    let session = pos
        .open_session(
            OpenPosSession {
                user_id: 7,
                cashbox_id: 1,
                warehouse_id: WAREHOUSE,
                opening_balance: d(0),
            },
            &ctx(),
        )
        .await
        .unwrap();

    let sale = PosSaleInput {
        session_id: session.id,
        customer_id: None,
        notes: None,
        lines: vec![NewDocumentLine {
            product_id: env.product_id,
            unit_id: UNIT,
            quantity: d(2),
            unit_price: d(25),
            discount_percent: d(0),
        }],
        payments: vec![PosTender {
            method: PaymentMethod::OnAccount,
            amount: d(50),
            reference: None,
        }],
    };
    let err = pos.complete_sale(sale, &ctx()).await.unwrap_err();
    assert!(err.to_string().contains("customer"), "got: {err}");
}

#[tokio::test]
async fn manual_journal_lifecycle_marks_accounts_used() {
    let env = setup().await;
    let mut journals = JournalService::new(env.storage.clone());

    let cash = env.storage.account_by_code("1111").await.unwrap().unwrap();
    let sales = env.storage.account_by_code("4111").await.unwrap().unwrap();

    let entry = journals
        .create_draft(
            NewJournalEntry {
                date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
                description: "Opening cash sale".to_string(),
                reference_number: None,
                lines: vec![
                    NewJournalLine {
                        account_id: cash.id,
                        debit: d(500),
                        credit: d(0),
                        description: None,
                    },
                    NewJournalLine {
                        account_id: sales.id,
                        debit: d(0),
                        credit: d(500),
                        description: None,
                    },
                ],
            },
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(entry.status, JournalEntryStatus::Draft);
    assert!(entry.draft_code.starts_with("DRAFT-"));

    let posted = journals.post(entry.id, &ctx()).await.unwrap();
    assert!(posted.journal_number.is_some());
    assert!(env
        .storage
        .account(cash.id)
        .await
        .unwrap()
        .unwrap()
        .has_postings);

    let reversal = journals
        .reverse(posted.id, "entered against the wrong day", &ctx())
        .await
        .unwrap();
    assert_eq!(reversal.lines[0].credit, d(500));
    let original = env.storage.journal_entry(posted.id).await.unwrap().unwrap();
    assert_eq!(original.status, JournalEntryStatus::Reversed);
    assert_eq!(original.reversal_entry_id, Some(reversal.id));
}

#[tokio::test]
async fn unbalanced_manual_entry_cannot_post() {
    let env = setup().await;
    let mut journals = JournalService::new(env.storage.clone());
    let cash = env.storage.account_by_code("1111").await.unwrap().unwrap();
    let sales = env.storage.account_by_code("4111").await.unwrap().unwrap();

    let entry = journals
        .create_draft(
            NewJournalEntry {
                date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
                description: "Unbalanced".to_string(),
                reference_number: None,
                lines: vec![
                    NewJournalLine {
                        account_id: cash.id,
                        debit: d(500),
                        credit: d(0),
                        description: None,
                    },
                    NewJournalLine {
                        account_id: sales.id,
                        debit: d(0),
                        credit: d(450),
                        description: None,
                    },
                ],
            },
            &ctx(),
        )
        .await
        .unwrap();

    let err = journals.post(entry.id, &ctx()).await.unwrap_err();
    assert!(err.to_string().contains("not balanced"), "got: {err}");
    let unchanged = env.storage.journal_entry(entry.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, JournalEntryStatus::Draft);
    assert!(unchanged.journal_number.is_none());
}

// ── Failure injection: storage that fails the final document update ──────

/// Wraps [`MemoryStorage`] and fails `update_sales_invoice` on demand,
/// after journals are numbered and stock is mutated but before commit.
#[derive(Clone)]
struct FailingStore {
    inner: MemoryStorage,
    fail_invoice_update: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl FailingStore {
    fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            fail_invoice_update: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    fn arm(&self) {
        self.fail_invoice_update
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionalStore for FailingStore {
    async fn begin_serializable(&mut self) -> PostingResult<()> {
        self.inner.begin_serializable().await
    }
    async fn commit(&mut self) -> PostingResult<()> {
        self.inner.commit().await
    }
    async fn rollback(&mut self) -> PostingResult<()> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl LedgerStore for FailingStore {
    async fn account(&self, id: EntityId) -> PostingResult<Option<posting_core::Account>> {
        self.inner.account(id).await
    }
    async fn account_by_code(&self, code: &str) -> PostingResult<Option<posting_core::Account>> {
        self.inner.account_by_code(code).await
    }
    async fn save_account(&mut self, account: &posting_core::Account) -> PostingResult<EntityId> {
        self.inner.save_account(account).await
    }
    async fn update_account(&mut self, account: &posting_core::Account) -> PostingResult<()> {
        self.inner.update_account(account).await
    }
    async fn journal_entry(
        &self,
        id: EntityId,
    ) -> PostingResult<Option<posting_core::JournalEntry>> {
        self.inner.journal_entry(id).await
    }
    async fn add_journal_entry(
        &mut self,
        entry: &posting_core::JournalEntry,
    ) -> PostingResult<EntityId> {
        self.inner.add_journal_entry(entry).await
    }
    async fn update_journal_entry(
        &mut self,
        entry: &posting_core::JournalEntry,
    ) -> PostingResult<()> {
        self.inner.update_journal_entry(entry).await
    }
    async fn fiscal_year(&self, id: EntityId) -> PostingResult<Option<FiscalYear>> {
        self.inner.fiscal_year(id).await
    }
    async fn active_fiscal_year(&self) -> PostingResult<Option<FiscalYear>> {
        self.inner.active_fiscal_year().await
    }
    async fn fiscal_year_by_year(&self, year: i32) -> PostingResult<Option<FiscalYear>> {
        self.inner.fiscal_year_by_year(year).await
    }
    async fn save_fiscal_year(&mut self, fiscal_year: &FiscalYear) -> PostingResult<EntityId> {
        self.inner.save_fiscal_year(fiscal_year).await
    }
    async fn update_fiscal_year(&mut self, fiscal_year: &FiscalYear) -> PostingResult<()> {
        self.inner.update_fiscal_year(fiscal_year).await
    }
    async fn next_code(
        &mut self,
        document_type: DocumentType,
        fiscal_year_id: EntityId,
    ) -> PostingResult<String> {
        self.inner.next_code(document_type, fiscal_year_id).await
    }
}

#[async_trait]
impl InventoryStore for FailingStore {
    async fn product(&self, id: EntityId) -> PostingResult<Option<Product>> {
        self.inner.product(id).await
    }
    async fn save_product(&mut self, product: &Product) -> PostingResult<EntityId> {
        self.inner.save_product(product).await
    }
    async fn update_product(&mut self, product: &Product) -> PostingResult<()> {
        self.inner.update_product(product).await
    }
    async fn warehouse_stock(
        &self,
        warehouse_id: EntityId,
        product_id: EntityId,
    ) -> PostingResult<Option<WarehouseStock>> {
        self.inner.warehouse_stock(warehouse_id, product_id).await
    }
    async fn upsert_warehouse_stock(&mut self, stock: &WarehouseStock) -> PostingResult<EntityId> {
        self.inner.upsert_warehouse_stock(stock).await
    }
    async fn add_movement(&mut self, movement: &InventoryMovement) -> PostingResult<EntityId> {
        self.inner.add_movement(movement).await
    }
    async fn movements_for_source(
        &self,
        source_type: SourceType,
        source_id: EntityId,
    ) -> PostingResult<Vec<InventoryMovement>> {
        self.inner.movements_for_source(source_type, source_id).await
    }
}

#[async_trait]
impl SalesStore for FailingStore {
    async fn customer(&self, id: EntityId) -> PostingResult<Option<Customer>> {
        self.inner.customer(id).await
    }
    async fn save_customer(&mut self, customer: &Customer) -> PostingResult<EntityId> {
        self.inner.save_customer(customer).await
    }
    async fn update_customer(&mut self, customer: &Customer) -> PostingResult<()> {
        self.inner.update_customer(customer).await
    }
    async fn sales_invoice(
        &self,
        id: EntityId,
    ) -> PostingResult<Option<posting_core::SalesInvoice>> {
        self.inner.sales_invoice(id).await
    }
    async fn add_sales_invoice(
        &mut self,
        invoice: &posting_core::SalesInvoice,
    ) -> PostingResult<EntityId> {
        self.inner.add_sales_invoice(invoice).await
    }
    async fn update_sales_invoice(
        &mut self,
        invoice: &posting_core::SalesInvoice,
    ) -> PostingResult<()> {
        if self
            .fail_invoice_update
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(PostingError::Storage("injected failure".to_string()));
        }
        self.inner.update_sales_invoice(invoice).await
    }
    async fn posted_invoices_for_customer(
        &self,
        customer_id: EntityId,
    ) -> PostingResult<Vec<posting_core::SalesInvoice>> {
        self.inner.posted_invoices_for_customer(customer_id).await
    }
    async fn sales_return(
        &self,
        id: EntityId,
    ) -> PostingResult<Option<posting_core::SalesReturn>> {
        self.inner.sales_return(id).await
    }
    async fn add_sales_return(
        &mut self,
        sales_return: &posting_core::SalesReturn,
    ) -> PostingResult<EntityId> {
        self.inner.add_sales_return(sales_return).await
    }
    async fn update_sales_return(
        &mut self,
        sales_return: &posting_core::SalesReturn,
    ) -> PostingResult<()> {
        self.inner.update_sales_return(sales_return).await
    }
    async fn pos_session(&self, id: EntityId) -> PostingResult<Option<posting_core::PosSession>> {
        self.inner.pos_session(id).await
    }
    async fn open_session_for_user(
        &self,
        user_id: EntityId,
    ) -> PostingResult<Option<posting_core::PosSession>> {
        self.inner.open_session_for_user(user_id).await
    }
    async fn add_pos_session(
        &mut self,
        session: &posting_core::PosSession,
    ) -> PostingResult<EntityId> {
        self.inner.add_pos_session(session).await
    }
    async fn update_pos_session(
        &mut self,
        session: &posting_core::PosSession,
    ) -> PostingResult<()> {
        self.inner.update_pos_session(session).await
    }
    async fn add_pos_payment(
        &mut self,
        payment: &posting_core::PosPayment,
    ) -> PostingResult<EntityId> {
        self.inner.add_pos_payment(payment).await
    }
    async fn pos_payments_for_invoice(
        &self,
        invoice_id: EntityId,
    ) -> PostingResult<Vec<posting_core::PosPayment>> {
        self.inner.pos_payments_for_invoice(invoice_id).await
    }
}

#[tokio::test]
async fn a_failure_after_journal_numbering_rolls_back_every_write() {
    let env = setup().await;
    let failing = FailingStore::new(env.storage.clone());
    let mut service = SalesInvoiceService::new(failing.clone());

    let invoice = service.create(invoice_input(&env, 8, 25), &ctx()).await.unwrap();

    // Fail the status flip: journals are already numbered and stock already
    // deducted inside the transaction at that point.
    failing.arm();
    let err = service.post(invoice.id, &ctx()).await.unwrap_err();
    assert!(matches!(err, PostingError::Storage(_)));

    // Idempotence of failure: document, journals, stock all unchanged.
    let unchanged = env.storage.sales_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, DocumentStatus::Draft);
    assert!(unchanged.revenue_journal_id.is_none());
    assert_eq!(stock_quantity(&env.storage, env.product_id).await, d(10));
    assert!(env
        .storage
        .movements_for_source(SourceType::SalesInvoice, invoice.id)
        .await
        .unwrap()
        .is_empty());

    // The journal numbers allocated mid-flight rolled back with everything
    // else: a clean retry starts the sequence from the beginning.
    failing
        .fail_invoice_update
        .store(false, std::sync::atomic::Ordering::SeqCst);
    let posted = service.post(invoice.id, &ctx()).await.unwrap();
    let revenue = env
        .storage
        .journal_entry(posted.revenue_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revenue.journal_number.as_deref(), Some("JV-2026-00001"));
}

#[tokio::test]
async fn number_conflict_retries_with_a_fresh_number() {
    let env = setup().await;
    let mut storage = env.storage.clone();

    // Simulate a concurrent writer that already committed SI-2026-0001.
    let taken = posting_core::SalesInvoice::new(
        "SI-2026-0001",
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        env.customer_id,
        WAREHOUSE,
        None,
    )
    .unwrap();
    storage.add_sales_invoice(&taken).await.unwrap();

    // Scenario D: the first allocation collides, the retry succeeds with a
    // different number.
    let mut service = SalesInvoiceService::new(env.storage.clone());
    let invoice = service.create(invoice_input(&env, 1, 25), &ctx()).await.unwrap();
    assert_eq!(invoice.invoice_number, "SI-2026-0002");
}

#[tokio::test]
async fn concurrent_creators_never_share_a_number() {
    let env = setup().await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let storage = env.storage.clone();
        let input = invoice_input(&env, 1, 25);
        handles.push(tokio::spawn(async move {
            let mut service = SalesInvoiceService::new(storage);
            service.create(input, &ctx()).await
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        let invoice = handle.await.unwrap().unwrap();
        numbers.push(invoice.invoice_number);
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 4, "duplicate invoice numbers were committed");
}

#[tokio::test]
async fn unauthorized_users_cannot_post() {
    struct DenyPosting;
    impl posting_core::AuthorizationPolicy for DenyPosting {
        fn is_allowed(&self, _username: &str, capability: &str) -> bool {
            capability != posting_core::capabilities::SALES_POST
        }
    }

    let env = setup().await;
    let mut service = SalesInvoiceService::with_policy(
        env.storage.clone(),
        Box::new(DenyPosting),
        GlAccountCodes::default(),
    );

    let invoice = service.create(invoice_input(&env, 1, 25), &ctx()).await.unwrap();
    let err = service.post(invoice.id, &ctx()).await.unwrap_err();
    assert!(matches!(err, PostingError::Unauthorized(_)));
}

#[tokio::test]
async fn missing_system_accounts_are_a_fatal_configuration_error() {
    // A storage with a fiscal year, product and stock but no chart seed.
    let mut storage = MemoryStorage::new();
    let mut fiscal_year = FiscalYear::new(2026).unwrap();
    fiscal_year.activate().unwrap();
    storage.save_fiscal_year(&fiscal_year).await.unwrap();
    let customer_id = storage
        .save_customer(&Customer::new("Unseeded").unwrap())
        .await
        .unwrap();
    let product = Product::new(
        "Widget",
        d(0),
        d(6),
        vec![ProductUnit {
            unit_id: UNIT,
            conversion_factor: d(1),
        }],
    )
    .unwrap();
    let product_id = storage.save_product(&product).await.unwrap();
    let mut stock = WarehouseStock::new(WAREHOUSE, product_id);
    stock.increase(&d(10)).unwrap();
    storage.upsert_warehouse_stock(&stock).await.unwrap();

    let mut service = SalesInvoiceService::new(storage.clone());
    let invoice = service
        .create(
            NewSalesInvoice {
                invoice_date: NaiveDate::from_ymd_opt(2026, 6, 10).unwrap(),
                customer_id,
                warehouse_id: WAREHOUSE,
                notes: None,
                lines: vec![NewDocumentLine {
                    product_id,
                    unit_id: UNIT,
                    quantity: d(1),
                    unit_price: d(25),
                    discount_percent: d(0),
                }],
            },
            &ctx(),
        )
        .await
        .unwrap();

    let err = service.post(invoice.id, &ctx()).await.unwrap_err();
    assert!(matches!(err, PostingError::Configuration(_)));
}

#[tokio::test]
async fn vat_invoices_credit_the_output_account_separately() {
    let env = setup().await;
    let mut storage = env.storage.clone();

    // A 15%-VAT product at WAC 6.
    let product = Product::new(
        "Taxed widget",
        d(15),
        d(6),
        vec![ProductUnit {
            unit_id: UNIT,
            conversion_factor: d(1),
        }],
    )
    .unwrap();
    let product_id = storage.save_product(&product).await.unwrap();
    let mut stock = WarehouseStock::new(WAREHOUSE, product_id);
    stock.increase(&d(10)).unwrap();
    storage.upsert_warehouse_stock(&stock).await.unwrap();

    let mut service = SalesInvoiceService::new(env.storage.clone());
    let invoice = service
        .create(
            NewSalesInvoice {
                invoice_date: NaiveDate::from_ymd_opt(2026, 6, 10).unwrap(),
                customer_id: env.customer_id,
                warehouse_id: WAREHOUSE,
                notes: None,
                lines: vec![NewDocumentLine {
                    product_id,
                    unit_id: UNIT,
                    quantity: d(4),
                    unit_price: d(25),
                    discount_percent: d(0),
                }],
            },
            &ctx(),
        )
        .await
        .unwrap();
    let posted = service.post(invoice.id, &ctx()).await.unwrap();

    // DR AR 115 / CR Sales 100 / CR VAT 15.
    let revenue = env
        .storage
        .journal_entry(posted.revenue_journal_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revenue.lines.len(), 3);
    assert_eq!(revenue.total_debit, revenue.total_credit);
    assert_eq!(revenue.total_debit, d(115));

    let vat_account = env.storage.account_by_code("2121").await.unwrap().unwrap();
    let vat_line = revenue
        .lines
        .iter()
        .find(|l| l.account_id == vat_account.id)
        .expect("VAT line present");
    assert_eq!(vat_line.credit, d(15));
}
