//! Chart-of-accounts node and its posting invariants

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Deepest level of the account hierarchy; only accounts at this level post.
pub const POSTING_LEVEL: u8 = 4;

/// A node in the chart of accounts.
///
/// Accounts use fixed-width numeric codes in a four-level hierarchy.
/// Only active leaf accounts at the deepest level accept journal postings.
/// System accounts are seeded by configuration and cannot be deactivated,
/// retyped, renamed or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    /// Fixed-width numeric code, unique across the chart (e.g. "1121")
    pub code: String,
    /// Account name
    pub name: String,
    /// Classification; determines the normal balance
    pub class: AccountClass,
    /// Derived from `class`, never set independently
    pub normal_balance: NormalBalance,
    /// Parent account (None for level-1 roots)
    pub parent_id: Option<EntityId>,
    /// Hierarchy level, 1 through 4
    pub level: u8,
    /// True while no child account exists under this one
    pub is_leaf: bool,
    /// True only for level-4 leaves; gates journal postings
    pub allow_posting: bool,
    pub is_active: bool,
    /// Seeded accounts required by posting; immutable
    pub is_system_account: bool,
    /// Set the first time the account appears on a posted journal;
    /// once true, the classification can no longer change
    pub has_postings: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<String>,
}

impl Account {
    /// Creates a new account. New accounts start as leaves; posting is
    /// allowed only when the account sits at the deepest level.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        class: AccountClass,
        level: u8,
        parent_id: Option<EntityId>,
        is_system_account: bool,
        created_at: NaiveDateTime,
    ) -> PostingResult<Self> {
        let code = code.into();
        let name = name.into();

        if code.trim().is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(PostingError::Validation(
                "account code must be a non-empty numeric string".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(PostingError::Validation(
                "account name cannot be empty".to_string(),
            ));
        }
        if !(1..=POSTING_LEVEL).contains(&level) {
            return Err(PostingError::Validation(format!(
                "account level must be between 1 and {POSTING_LEVEL}"
            )));
        }

        Ok(Self {
            id: 0,
            code: code.trim().to_string(),
            name: name.trim().to_string(),
            class,
            normal_balance: class.normal_balance(),
            parent_id,
            level,
            is_leaf: true,
            allow_posting: level == POSTING_LEVEL,
            is_active: true,
            is_system_account,
            has_postings: false,
            created_at,
            updated_at: created_at,
            deleted_at: None,
            deleted_by: None,
        })
    }

    /// True if journal lines may target this account:
    /// active, leaf, posting-enabled and not soft-deleted.
    pub fn can_receive_postings(&self) -> bool {
        self.is_active && self.is_leaf && self.allow_posting && self.deleted_at.is_none()
    }

    /// Deactivates the account. System accounts cannot be deactivated.
    pub fn deactivate(&mut self, at: NaiveDateTime) -> PostingResult<()> {
        if self.is_system_account {
            return Err(PostingError::Precondition(
                "system accounts cannot be deactivated".to_string(),
            ));
        }
        self.is_active = false;
        self.updated_at = at;
        Ok(())
    }

    /// Reactivates the account.
    pub fn activate(&mut self, at: NaiveDateTime) {
        self.is_active = true;
        self.updated_at = at;
    }

    /// Renames the account. System account names are fixed.
    pub fn rename(&mut self, new_name: impl Into<String>, at: NaiveDateTime) -> PostingResult<()> {
        let new_name = new_name.into();
        if new_name.trim().is_empty() {
            return Err(PostingError::Validation(
                "account name cannot be empty".to_string(),
            ));
        }
        if self.is_system_account {
            return Err(PostingError::Precondition(
                "system accounts cannot be renamed".to_string(),
            ));
        }
        self.name = new_name.trim().to_string();
        self.updated_at = at;
        Ok(())
    }

    /// Changes the classification. Forbidden for system accounts and for any
    /// account that has ever received a posting.
    pub fn change_class(&mut self, new_class: AccountClass, at: NaiveDateTime) -> PostingResult<()> {
        if self.is_system_account {
            return Err(PostingError::Precondition(
                "system accounts cannot change classification".to_string(),
            ));
        }
        if self.has_postings {
            return Err(PostingError::Precondition(
                "accounts with postings cannot change classification".to_string(),
            ));
        }
        self.class = new_class;
        self.normal_balance = new_class.normal_balance();
        self.updated_at = at;
        Ok(())
    }

    /// Flags the account as a parent once a child is attached.
    /// Parents never accept postings.
    pub fn mark_as_parent(&mut self, at: NaiveDateTime) {
        self.is_leaf = false;
        self.allow_posting = false;
        self.updated_at = at;
    }

    /// Records that the account has been used on a posted journal.
    pub fn mark_as_used(&mut self, at: NaiveDateTime) {
        self.has_postings = true;
        self.updated_at = at;
    }

    /// Soft-deletes the account. System accounts are permanent.
    pub fn soft_delete(&mut self, by: &str, at: NaiveDateTime) -> PostingResult<()> {
        if self.is_system_account {
            return Err(PostingError::Precondition(
                "system accounts cannot be deleted".to_string(),
            ));
        }
        self.deleted_at = Some(at);
        self.deleted_by = Some(by.to_string());
        self.updated_at = at;
        Ok(())
    }
}

/// Seeding helpers for the fixed posting chart.
pub mod seed {
    use super::*;
    use crate::sales::GlAccountCodes;
    use crate::traits::LedgerStore;
    use std::collections::HashMap;

    /// Seeds the system accounts the sales orchestrators post against and
    /// returns them keyed by code.
    pub async fn seed_posting_accounts<S: LedgerStore>(
        store: &mut S,
        codes: &GlAccountCodes,
        created_at: NaiveDateTime,
    ) -> PostingResult<HashMap<String, Account>> {
        let specs: [(&str, &str, AccountClass); 7] = [
            (&codes.cash, "Cash on hand", AccountClass::Asset),
            (&codes.card, "Card settlement", AccountClass::Asset),
            (&codes.receivables, "Trade receivables", AccountClass::Asset),
            (&codes.inventory, "Inventory on hand", AccountClass::Asset),
            (&codes.vat_output, "VAT output payable", AccountClass::Liability),
            (&codes.sales, "Sales revenue", AccountClass::Revenue),
            (&codes.cogs, "Cost of goods sold", AccountClass::Cogs),
        ];

        let mut accounts = HashMap::new();
        for (code, name, class) in specs {
            let mut account = Account::new(code, name, class, POSTING_LEVEL, None, true, created_at)?;
            account.id = store.save_account(&account).await?;
            accounts.insert(code.to_string(), account);
        }
        Ok(accounts)
    }
}
