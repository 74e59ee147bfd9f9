//! # Posting Core
//!
//! A transactional ledger-posting engine: the write-side of an ERP that
//! turns sales documents into balanced double-entry journal postings.
//!
//! ## Features
//!
//! - **Double-entry journals**: Draft → Posted → Reversed lifecycle with a
//!   hard balance invariant; posted entries are immutable and corrected
//!   only by reversal
//! - **Fiscal calendar gating**: calendar fiscal years with 12 lockable
//!   monthly periods; every posting and reversal re-resolves its own open
//!   period
//! - **Document numbering**: per-type, per-year monotonic sequences with
//!   bounded retry on concurrent number conflicts
//! - **Inventory costing**: weighted-average cost, per-warehouse stock
//!   balances and an append-only movement audit trail
//! - **Posting orchestrators**: sales invoices, sales returns and POS sales
//!   each post and cancel atomically inside one serializable transaction
//! - **Credit control**: exposure and overdue gates consulted before
//!   customer-facing documents post
//! - **Storage abstraction**: database-agnostic design with trait-based
//!   storage and an in-memory implementation for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use posting_core::{MemoryStorage, SalesInvoiceService, PostingContext};
//!
//! // Seed accounts, a fiscal year, products and stock through the storage
//! // traits, then drive the document lifecycle:
//! // let mut service = SalesInvoiceService::new(storage.clone());
//! // let invoice = service.create(new_invoice, &ctx).await?;
//! // let posted = service.post(invoice.id, &ctx).await?;
//! ```

pub mod inventory;
pub mod ledger;
pub mod sales;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use inventory::*;
pub use ledger::*;
pub use sales::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;
