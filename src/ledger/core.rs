//! Manual journal entry service
//!
//! Drives the journal lifecycle for hand-written entries: draft creation
//! with account-postability checks, posting under a sequential number
//! inside an open period, reversal into the reversal date's own period,
//! and draft deletion. Document-driven journals (sales, returns, POS) are
//! built by their own orchestrators and share the same entity rules.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ledger::fiscal::{resolve_posting_period, resolve_reversal_period};
use crate::ledger::journal::JournalEntry;
use crate::traits::{capabilities, ensure_allowed, AllowAll, AuthorizationPolicy, PostingStore};
use crate::types::*;
use crate::utils::validation::validate_description;

/// One requested line on a new manual entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalLine {
    pub account_id: EntityId,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub description: Option<String>,
}

/// Request to create a manual draft entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub date: NaiveDate,
    pub description: String,
    pub reference_number: Option<String>,
    pub lines: Vec<NewJournalLine>,
}

/// Orchestrates manual journal entries.
pub struct JournalService<S: PostingStore> {
    store: S,
    authorization: Box<dyn AuthorizationPolicy>,
}

impl<S: PostingStore> JournalService<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Box::new(AllowAll))
    }

    pub fn with_policy(store: S, authorization: Box<dyn AuthorizationPolicy>) -> Self {
        Self {
            store,
            authorization,
        }
    }

    /// Creates a manual draft entry dated inside an open period. Every line
    /// account must exist and accept postings.
    pub async fn create_draft(
        &mut self,
        input: NewJournalEntry,
        ctx: &PostingContext,
    ) -> PostingResult<JournalEntry> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::JOURNAL_POST)?;
        validate_description(&input.description)?;

        let (fiscal_year, period) = resolve_posting_period(&self.store, input.date).await?;
        self.check_line_accounts(&input.lines).await?;

        let mut entry = JournalEntry::create_draft(
            input.date,
            input.description,
            SourceType::Manual,
            fiscal_year.id,
            period.id,
            input.reference_number,
            None,
        )?;
        for line in &input.lines {
            entry.add_line(
                line.account_id,
                line.debit.clone(),
                line.credit.clone(),
                ctx.now,
                line.description.clone(),
            )?;
        }

        entry.id = self.store.add_journal_entry(&entry).await?;
        Ok(entry)
    }

    /// Posts a draft entry under a fresh journal number. The period is
    /// re-resolved and the line accounts re-checked at posting time, and
    /// every posted-to account is flagged as used.
    pub async fn post(&mut self, entry_id: EntityId, ctx: &PostingContext) -> PostingResult<JournalEntry> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::JOURNAL_POST)?;

        self.store.begin_serializable().await?;
        match self.post_in_tx(entry_id, ctx).await {
            Ok(entry) => {
                self.store.commit().await?;
                info!(
                    journal = entry.journal_number.as_deref().unwrap_or(""),
                    "posted manual journal entry"
                );
                Ok(entry)
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Reverses a posted entry into the reversal date's own open period.
    pub async fn reverse(
        &mut self,
        entry_id: EntityId,
        reason: impl Into<String>,
        ctx: &PostingContext,
    ) -> PostingResult<JournalEntry> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::JOURNAL_POST)?;
        let reason = reason.into();

        self.store.begin_serializable().await?;
        match self.reverse_in_tx(entry_id, &reason, ctx).await {
            Ok(entry) => {
                self.store.commit().await?;
                info!(
                    journal = entry.journal_number.as_deref().unwrap_or(""),
                    "reversed manual journal entry"
                );
                Ok(entry)
            }
            Err(err) => {
                self.store.rollback().await?;
                Err(err)
            }
        }
    }

    /// Soft-deletes a draft entry. Posted and reversed entries are permanent.
    pub async fn delete_draft(&mut self, entry_id: EntityId, ctx: &PostingContext) -> PostingResult<()> {
        ensure_allowed(self.authorization.as_ref(), &ctx.username, capabilities::JOURNAL_POST)?;

        let mut entry = self
            .store
            .journal_entry(entry_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("journal entry {entry_id}")))?;
        entry.soft_delete(&ctx.username, ctx.now)?;
        self.store.update_journal_entry(&entry).await
    }

    async fn post_in_tx(&mut self, entry_id: EntityId, ctx: &PostingContext) -> PostingResult<JournalEntry> {
        let mut entry = self
            .store
            .journal_entry(entry_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("journal entry {entry_id}")))?;
        if entry.status != JournalEntryStatus::Draft {
            return Err(PostingError::Precondition(
                "only draft entries can be posted".to_string(),
            ));
        }

        // The period may have been locked since the draft was created.
        let fiscal_year = self
            .store
            .fiscal_year(entry.fiscal_year_id)
            .await?
            .ok_or_else(|| {
                PostingError::Precondition("the entry's fiscal year no longer exists".to_string())
            })?;
        let period = fiscal_year
            .periods
            .iter()
            .find(|p| p.id == entry.fiscal_period_id)
            .ok_or_else(|| {
                PostingError::Precondition("the entry's fiscal period no longer exists".to_string())
            })?;
        if !fiscal_year.is_open() || !period.is_open() {
            return Err(PostingError::Precondition(format!(
                "fiscal period {}-{:02} is locked; posting is not allowed",
                period.year, period.month
            )));
        }

        let mut accounts = Vec::with_capacity(entry.lines.len());
        for line in &entry.lines {
            let account = self
                .store
                .account(line.account_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("account {}", line.account_id)))?;
            if !account.can_receive_postings() {
                return Err(PostingError::Precondition(format!(
                    "account '{}' does not accept postings",
                    account.code
                )));
            }
            accounts.push(account);
        }

        let number = self
            .store
            .next_code(DocumentType::Journal, fiscal_year.id)
            .await?;
        entry.post(&number, &ctx.username, ctx.now)?;
        self.store.update_journal_entry(&entry).await?;

        for mut account in accounts {
            if !account.has_postings {
                account.mark_as_used(ctx.now);
                self.store.update_account(&account).await?;
            }
        }

        Ok(entry)
    }

    async fn reverse_in_tx(
        &mut self,
        entry_id: EntityId,
        reason: &str,
        ctx: &PostingContext,
    ) -> PostingResult<JournalEntry> {
        let mut original = self
            .store
            .journal_entry(entry_id)
            .await?
            .ok_or_else(|| PostingError::NotFound(format!("journal entry {entry_id}")))?;

        let (fiscal_year, period) = resolve_reversal_period(&self.store, ctx.today).await?;

        let mut reversal =
            original.create_reversal(ctx.today, reason, fiscal_year.id, period.id, ctx.now)?;
        let number = self
            .store
            .next_code(DocumentType::Journal, fiscal_year.id)
            .await?;
        reversal.post(&number, &ctx.username, ctx.now)?;
        reversal.id = self.store.add_journal_entry(&reversal).await?;

        original.mark_as_reversed(reversal.id)?;
        self.store.update_journal_entry(&original).await?;
        Ok(reversal)
    }

    async fn check_line_accounts(&self, lines: &[NewJournalLine]) -> PostingResult<()> {
        if lines.is_empty() {
            return Err(PostingError::Validation(
                "a journal entry requires at least one line".to_string(),
            ));
        }
        for line in lines {
            let account = self
                .store
                .account(line.account_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("account {}", line.account_id)))?;
            if !account.can_receive_postings() {
                return Err(PostingError::Precondition(format!(
                    "account '{}' does not accept postings",
                    account.code
                )));
            }
        }
        Ok(())
    }
}
