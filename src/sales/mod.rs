//! Sales posting: invoices, returns and point-of-sale
//!
//! The three document families share one posting pattern: gate on fiscal
//! period and stock, build balanced revenue and COGS journals from fixed GL
//! accounts, mutate stock with audit movements, and flip the document -
//! all inside a single serializable transaction.

pub mod credit;
pub mod customer;
pub mod documents;
pub mod invoice_posting;
pub mod pos;
pub mod return_posting;

pub use credit::*;
pub use customer::*;
pub use documents::*;
pub use invoice_posting::*;
pub use pos::*;
pub use return_posting::*;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::inventory::InventoryMovement;
use crate::ledger::account::Account;
use crate::ledger::fiscal::{FiscalPeriod, FiscalYear};
use crate::traits::{InventoryStore, LedgerStore, PostingStore};
use crate::types::*;

/// Fixed GL account codes the sales orchestrators post against.
///
/// Injected as configuration so tests (and alternative charts) can
/// substitute their own codes. The defaults follow the standard seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlAccountCodes {
    /// Main cashbox (POS cash tenders)
    pub cash: String,
    /// Bank / card settlement (POS card tenders)
    pub card: String,
    /// Trade receivables
    pub receivables: String,
    /// Sales revenue
    pub sales: String,
    /// VAT output payable
    pub vat_output: String,
    /// Cost of goods sold
    pub cogs: String,
    /// Inventory on hand
    pub inventory: String,
}

impl Default for GlAccountCodes {
    fn default() -> Self {
        Self {
            cash: "1111".to_string(),
            card: "1112".to_string(),
            receivables: "1121".to_string(),
            sales: "4111".to_string(),
            vat_output: "2121".to_string(),
            cogs: "5111".to_string(),
            inventory: "1131".to_string(),
        }
    }
}

/// Accounts resolved for invoice/return posting.
#[derive(Debug, Clone)]
pub(crate) struct PostingAccounts {
    pub receivables: Account,
    pub sales: Account,
    pub vat_output: Account,
    pub cogs: Account,
    pub inventory: Account,
}

/// Accounts resolved for POS posting: the invoice set plus settlement
/// accounts for cash and card tenders.
#[derive(Debug, Clone)]
pub(crate) struct PosAccounts {
    pub cash: Account,
    pub card: Account,
    pub base: PostingAccounts,
}

async fn required_account<S: LedgerStore + ?Sized>(
    store: &S,
    code: &str,
) -> PostingResult<Account> {
    let account = store
        .account_by_code(code)
        .await?
        .ok_or_else(|| PostingError::Configuration(format!("account '{code}' is not seeded")))?;
    if !account.can_receive_postings() {
        return Err(PostingError::Configuration(format!(
            "account '{code}' does not accept postings"
        )));
    }
    Ok(account)
}

/// Resolves the fixed accounts for invoice/return posting. A missing account
/// means the environment is not correctly seeded and is always fatal.
pub(crate) async fn resolve_posting_accounts<S: LedgerStore + ?Sized>(
    store: &S,
    codes: &GlAccountCodes,
) -> PostingResult<PostingAccounts> {
    Ok(PostingAccounts {
        receivables: required_account(store, &codes.receivables).await?,
        sales: required_account(store, &codes.sales).await?,
        vat_output: required_account(store, &codes.vat_output).await?,
        cogs: required_account(store, &codes.cogs).await?,
        inventory: required_account(store, &codes.inventory).await?,
    })
}

/// Resolves the POS account set. The card account falls back to the cash
/// account when it is not seeded.
pub(crate) async fn resolve_pos_accounts<S: LedgerStore + ?Sized>(
    store: &S,
    codes: &GlAccountCodes,
) -> PostingResult<PosAccounts> {
    let base = resolve_posting_accounts(store, codes).await?;
    let cash = required_account(store, &codes.cash).await?;
    let card = match store.account_by_code(&codes.card).await? {
        Some(account) if account.can_receive_postings() => account,
        _ => cash.clone(),
    };
    Ok(PosAccounts { cash, card, base })
}

/// One requested line on a new document, before products are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocumentLine {
    pub product_id: EntityId,
    pub unit_id: EntityId,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub discount_percent: BigDecimal,
}

/// Builds a document line from its request, snapshotting the product's
/// conversion factor and VAT rate.
pub(crate) async fn build_line<S: InventoryStore + ?Sized>(
    store: &S,
    line: &NewDocumentLine,
) -> PostingResult<SalesLine> {
    let product = store
        .product(line.product_id)
        .await?
        .ok_or_else(|| PostingError::NotFound(format!("product {}", line.product_id)))?;
    if !product.is_active {
        return Err(PostingError::Precondition(format!(
            "product '{}' is not active",
            product.name
        )));
    }
    let conversion_factor = product
        .conversion_factor(line.unit_id)
        .ok_or_else(|| {
            PostingError::Precondition(format!(
                "unit {} is not linked to product '{}'",
                line.unit_id, product.name
            ))
        })?
        .clone();
    SalesLine::new(
        line.product_id,
        line.unit_id,
        line.quantity.clone(),
        line.unit_price.clone(),
        conversion_factor,
        line.discount_percent.clone(),
        product.vat_rate.clone(),
    )
}

/// Checks on-hand stock for every line of a document against its warehouse,
/// citing the short product and the shortfall.
pub(crate) async fn validate_stock<S: InventoryStore + ?Sized>(
    store: &S,
    warehouse_id: EntityId,
    lines: &[SalesLine],
) -> PostingResult<()> {
    for line in lines {
        let available = store
            .warehouse_stock(warehouse_id, line.product_id)
            .await?
            .map(|s| s.quantity)
            .unwrap_or_else(|| BigDecimal::from(0));
        if available < line.base_quantity {
            let name = store
                .product(line.product_id)
                .await?
                .map(|p| p.name)
                .unwrap_or_else(|| format!("#{}", line.product_id));
            return Err(PostingError::Precondition(format!(
                "insufficient stock for product '{}': available {}, required {}",
                name, available, line.base_quantity
            )));
        }
    }
    Ok(())
}

/// Moves stock for one document line and appends the audit movement with its
/// balance-after snapshot. Outgoing movements refuse to take the balance
/// negative; incoming movements create the stock row on first use.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn move_stock<S: PostingStore>(
    store: &mut S,
    warehouse_id: EntityId,
    line: &SalesLine,
    movement_type: MovementType,
    unit_cost: &BigDecimal,
    date: NaiveDate,
    reference_number: &str,
    source_type: SourceType,
    source_id: EntityId,
    notes: Option<String>,
) -> PostingResult<()> {
    let mut stock = match store.warehouse_stock(warehouse_id, line.product_id).await? {
        Some(stock) => stock,
        None if movement_type.is_incoming() => {
            crate::inventory::WarehouseStock::new(warehouse_id, line.product_id)
        }
        None => {
            return Err(PostingError::Precondition(format!(
                "no stock record for product {} in warehouse {}",
                line.product_id, warehouse_id
            )))
        }
    };

    if movement_type.is_incoming() {
        stock.increase(&line.base_quantity)?;
    } else {
        stock.decrease(&line.base_quantity)?;
    }
    store.upsert_warehouse_stock(&stock).await?;

    let line_cost = round_quantity(&(&line.base_quantity * unit_cost));
    let mut movement = InventoryMovement::new(
        line.product_id,
        warehouse_id,
        line.unit_id,
        movement_type,
        line.quantity.clone(),
        line.base_quantity.clone(),
        unit_cost.clone(),
        line_cost,
        date,
        reference_number,
        source_type,
        Some(source_id),
        notes,
    )?;
    movement.set_balance_after(stock.quantity.clone())?;
    store.add_movement(&movement).await?;
    Ok(())
}

/// Reverses one posted journal: builds the mirror entry dated with the
/// reversal period, posts it under a fresh journal number, and links the
/// two entries in both directions.
pub(crate) async fn reverse_journal<S: PostingStore>(
    store: &mut S,
    journal_id: EntityId,
    reason: &str,
    fiscal_year: &FiscalYear,
    period: &FiscalPeriod,
    ctx: &PostingContext,
) -> PostingResult<EntityId> {
    let mut original = store
        .journal_entry(journal_id)
        .await?
        .ok_or_else(|| PostingError::NotFound(format!("journal entry {journal_id}")))?;

    let mut reversal =
        original.create_reversal(ctx.today, reason, fiscal_year.id, period.id, ctx.now)?;
    let number = store
        .next_code(DocumentType::Journal, fiscal_year.id)
        .await?;
    reversal.post(&number, &ctx.username, ctx.now)?;
    let reversal_id = store.add_journal_entry(&reversal).await?;

    original.mark_as_reversed(reversal_id)?;
    store.update_journal_entry(&original).await?;
    Ok(reversal_id)
}

/// Bounded retry budget for document-number allocation conflicts.
pub(crate) const MAX_NUMBER_ATTEMPTS: u32 = 3;

/// Linear backoff before re-fetching a new number after a conflict.
pub(crate) async fn backoff(attempt: u32) {
    tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64)).await;
}
