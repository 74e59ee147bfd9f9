//! Double-entry journal entries and their lifecycle
//!
//! A journal entry moves Draft → Posted → (optionally) Reversed. Posted
//! entries are immutable; corrections happen only through reversal entries
//! that swap every line's debit and credit.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::*;

/// Prefix of the temporary code held while an entry is still a draft.
pub const DRAFT_CODE_PREFIX: &str = "DRAFT-";

/// One line of a journal entry.
///
/// A line targets exactly one account and carries either a debit or a credit,
/// never both. Amounts are non-negative with at most 2 decimal places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    /// Sequential position within the entry (1, 2, 3, …)
    pub line_number: u32,
    pub account_id: EntityId,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

impl JournalEntryLine {
    /// Creates a validated line.
    pub fn new(
        account_id: EntityId,
        line_number: u32,
        debit: BigDecimal,
        credit: BigDecimal,
        description: Option<String>,
        created_at: NaiveDateTime,
    ) -> PostingResult<Self> {
        if account_id <= 0 {
            return Err(PostingError::Validation(
                "journal line requires an account".to_string(),
            ));
        }
        if line_number < 1 {
            return Err(PostingError::Validation(
                "line number must be 1 or greater".to_string(),
            ));
        }
        Self::check_amounts(&debit, &credit)?;

        Ok(Self {
            line_number,
            account_id,
            debit,
            credit,
            description: description.map(|d| d.trim().to_string()),
            created_at,
        })
    }

    /// Replaces the amounts on this line. Callable only while the parent
    /// entry is a draft (enforced by [`JournalEntry::update_line_amount`]).
    fn set_amounts(&mut self, debit: BigDecimal, credit: BigDecimal) -> PostingResult<()> {
        Self::check_amounts(&debit, &credit)?;
        self.debit = debit;
        self.credit = credit;
        Ok(())
    }

    fn check_amounts(debit: &BigDecimal, credit: &BigDecimal) -> PostingResult<()> {
        let zero = BigDecimal::from(0);
        if !is_money_precision(debit) || !is_money_precision(credit) {
            return Err(PostingError::Validation(
                "amounts cannot carry more than 2 decimal places".to_string(),
            ));
        }
        if *debit < zero || *credit < zero {
            return Err(PostingError::Validation(
                "negative amounts are not allowed on journal lines".to_string(),
            ));
        }
        if *debit > zero && *credit > zero {
            return Err(PostingError::Validation(
                "a line must be either debit or credit, not both".to_string(),
            ));
        }
        if *debit == zero && *credit == zero {
            return Err(PostingError::Validation(
                "debit and credit cannot both be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A double-entry journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    /// Final sequential number, assigned at posting. None while draft.
    pub journal_number: Option<String>,
    /// Temporary unique code (`DRAFT-XXXXXXXX`), always present
    pub draft_code: String,
    /// Transaction date; must fall inside an open fiscal period to post
    pub date: NaiveDate,
    /// Narrative describing the transaction (mandatory)
    pub description: String,
    /// External reference (invoice number, etc.)
    pub reference_number: Option<String>,
    pub status: JournalEntryStatus,
    pub source_type: SourceType,
    /// Originating document id (None for manual entries)
    pub source_id: Option<EntityId>,
    pub fiscal_year_id: EntityId,
    pub fiscal_period_id: EntityId,
    /// Original entry id when this entry IS a reversal
    pub reversed_entry_id: Option<EntityId>,
    /// Reversal entry id once this entry WAS reversed
    pub reversal_entry_id: Option<EntityId>,
    /// Original entry id when this entry is a manual adjustment
    pub adjusted_entry_id: Option<EntityId>,
    /// Mandatory free-text reason when this entry is a reversal
    pub reversal_reason: Option<String>,
    pub posted_by: Option<String>,
    pub posted_at: Option<NaiveDateTime>,
    /// Recomputed from the lines on every mutation
    pub total_debit: BigDecimal,
    pub total_credit: BigDecimal,
    pub lines: Vec<JournalEntryLine>,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<String>,
}

impl JournalEntry {
    /// Creates a new draft entry with an auto-generated draft code.
    pub fn create_draft(
        date: NaiveDate,
        description: impl Into<String>,
        source_type: SourceType,
        fiscal_year_id: EntityId,
        fiscal_period_id: EntityId,
        reference_number: Option<String>,
        source_id: Option<EntityId>,
    ) -> PostingResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(PostingError::Validation(
                "journal description is mandatory".to_string(),
            ));
        }

        let draft_code = format!(
            "{}{}",
            DRAFT_CODE_PREFIX,
            &Uuid::new_v4().simple().to_string()[..8].to_uppercase()
        );

        Ok(Self {
            id: 0,
            journal_number: None,
            draft_code,
            date,
            description: description.trim().to_string(),
            reference_number: reference_number.map(|r| r.trim().to_string()),
            status: JournalEntryStatus::Draft,
            source_type,
            source_id,
            fiscal_year_id,
            fiscal_period_id,
            reversed_entry_id: None,
            reversal_entry_id: None,
            adjusted_entry_id: None,
            reversal_reason: None,
            posted_by: None,
            posted_at: None,
            total_debit: BigDecimal::from(0),
            total_credit: BigDecimal::from(0),
            lines: Vec::new(),
            deleted_at: None,
            deleted_by: None,
        })
    }

    /// Creates a draft adjustment entry correcting a posted entry,
    /// dated in an open period.
    pub fn create_adjustment(
        date: NaiveDate,
        description: impl Into<String>,
        fiscal_year_id: EntityId,
        fiscal_period_id: EntityId,
        adjusted_entry_id: EntityId,
    ) -> PostingResult<Self> {
        let mut entry = Self::create_draft(
            date,
            description,
            SourceType::Adjustment,
            fiscal_year_id,
            fiscal_period_id,
            None,
            None,
        )?;
        entry.adjusted_entry_id = Some(adjusted_entry_id);
        Ok(entry)
    }

    /// Adds a line to a draft entry and recomputes the totals.
    pub fn add_line(
        &mut self,
        account_id: EntityId,
        debit: BigDecimal,
        credit: BigDecimal,
        created_at: NaiveDateTime,
        description: Option<String>,
    ) -> PostingResult<()> {
        self.ensure_draft()?;
        let line_number = self.lines.len() as u32 + 1;
        let line =
            JournalEntryLine::new(account_id, line_number, debit, credit, description, created_at)?;
        self.lines.push(line);
        self.recalculate_totals();
        Ok(())
    }

    /// Removes a line by its line number and resequences the rest.
    pub fn remove_line(&mut self, line_number: u32) -> PostingResult<()> {
        self.ensure_draft()?;
        let idx = self
            .lines
            .iter()
            .position(|l| l.line_number == line_number)
            .ok_or_else(|| PostingError::NotFound(format!("journal line {line_number}")))?;
        self.lines.remove(idx);
        for (i, line) in self.lines.iter_mut().enumerate() {
            line.line_number = i as u32 + 1;
        }
        self.recalculate_totals();
        Ok(())
    }

    /// Replaces the amounts of an existing line on a draft entry.
    pub fn update_line_amount(
        &mut self,
        line_number: u32,
        debit: BigDecimal,
        credit: BigDecimal,
    ) -> PostingResult<()> {
        self.ensure_draft()?;
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.line_number == line_number)
            .ok_or_else(|| PostingError::NotFound(format!("journal line {line_number}")))?;
        line.set_amounts(debit, credit)?;
        self.recalculate_totals();
        Ok(())
    }

    /// Updates the narrative and reference of a draft entry.
    pub fn update_draft(
        &mut self,
        description: impl Into<String>,
        reference_number: Option<String>,
    ) -> PostingResult<()> {
        self.ensure_draft()?;
        let description = description.into();
        if description.trim().is_empty() {
            return Err(PostingError::Validation(
                "journal description is mandatory".to_string(),
            ));
        }
        self.description = description.trim().to_string();
        self.reference_number = reference_number.map(|r| r.trim().to_string());
        Ok(())
    }

    /// Validates the entry against the double-entry invariants.
    /// Returns the list of violations; an empty list means the entry may post.
    pub fn validate(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        let zero = BigDecimal::from(0);

        if self.description.trim().is_empty() {
            errors.push("journal description is mandatory".to_string());
        }
        if self.lines.len() < 2 {
            errors.push("a journal entry requires at least two lines".to_string());
        }

        self.recalculate_totals();
        if self.total_debit != self.total_credit {
            errors.push(format!(
                "entry is not balanced: total debit {} != total credit {}",
                self.total_debit, self.total_credit
            ));
        }

        for line in &self.lines {
            if line.debit < zero || line.credit < zero {
                errors.push(format!("line {}: negative amounts are not allowed", line.line_number));
            }
            if line.debit > zero && line.credit > zero {
                errors.push(format!(
                    "line {}: cannot be both debit and credit",
                    line.line_number
                ));
            }
            if line.debit == zero && line.credit == zero {
                errors.push(format!(
                    "line {}: debit and credit cannot both be zero",
                    line.line_number
                ));
            }
        }

        if self.status == JournalEntryStatus::Reversed {
            errors.push("a reversed entry cannot be posted or reversed again".to_string());
        }

        errors
    }

    /// Posts the entry, assigning its final journal number.
    /// Fails unless the entry is a balanced draft with at least two lines.
    pub fn post(
        &mut self,
        journal_number: &str,
        posted_by: &str,
        posted_at: NaiveDateTime,
    ) -> PostingResult<()> {
        if self.status != JournalEntryStatus::Draft {
            return Err(PostingError::Precondition(
                "only draft entries can be posted".to_string(),
            ));
        }
        if journal_number.trim().is_empty() {
            return Err(PostingError::Validation(
                "a journal number is required at posting".to_string(),
            ));
        }
        if posted_by.trim().is_empty() {
            return Err(PostingError::Validation(
                "the posting username is required".to_string(),
            ));
        }

        let errors = self.validate();
        if !errors.is_empty() {
            return Err(PostingError::Validation(errors.join(" | ")));
        }

        self.status = JournalEntryStatus::Posted;
        self.journal_number = Some(journal_number.trim().to_string());
        self.posted_by = Some(posted_by.trim().to_string());
        self.posted_at = Some(posted_at);
        Ok(())
    }

    /// Builds the mirror draft entry that reverses this posted entry:
    /// every line's debit and credit are swapped, and the new entry points
    /// back here via `reversed_entry_id`. The reversal is dated with the
    /// reversal date's own fiscal period, which the caller has resolved.
    pub fn create_reversal(
        &self,
        reversal_date: NaiveDate,
        reason: &str,
        fiscal_year_id: EntityId,
        fiscal_period_id: EntityId,
        created_at: NaiveDateTime,
    ) -> PostingResult<JournalEntry> {
        if self.status != JournalEntryStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted entries can be reversed".to_string(),
            ));
        }
        if self.reversal_entry_id.is_some() {
            return Err(PostingError::Precondition(
                "this entry has already been reversed".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(PostingError::Validation(
                "a reversal reason is required".to_string(),
            ));
        }

        let mut reversal = JournalEntry::create_draft(
            reversal_date,
            format!("Reversal: {}", self.description),
            self.source_type,
            fiscal_year_id,
            fiscal_period_id,
            self.reference_number.clone(),
            self.source_id,
        )?;
        reversal.reversed_entry_id = Some(self.id);
        reversal.reversal_reason = Some(reason.trim().to_string());

        for line in &self.lines {
            // Debit ↔ Credit swap
            reversal.add_line(
                line.account_id,
                line.credit.clone(),
                line.debit.clone(),
                created_at,
                line.description
                    .as_deref()
                    .map(|d| format!("Reversal: {d}")),
            )?;
        }

        Ok(reversal)
    }

    /// Flags this entry as reversed, recording the id of its mirror entry.
    /// Called after the reversal entry has been posted.
    pub fn mark_as_reversed(&mut self, reversal_entry_id: EntityId) -> PostingResult<()> {
        if self.status != JournalEntryStatus::Posted {
            return Err(PostingError::Precondition(
                "only posted entries can be marked reversed".to_string(),
            ));
        }
        self.reversal_entry_id = Some(reversal_entry_id);
        self.status = JournalEntryStatus::Reversed;
        Ok(())
    }

    /// Soft-deletes a draft entry. Posted and reversed entries are permanent.
    pub fn soft_delete(&mut self, by: &str, at: NaiveDateTime) -> PostingResult<()> {
        if self.status != JournalEntryStatus::Draft {
            return Err(PostingError::Precondition(
                "posted entries cannot be deleted; use a reversal".to_string(),
            ));
        }
        self.deleted_at = Some(at);
        self.deleted_by = Some(by.to_string());
        Ok(())
    }

    fn ensure_draft(&self) -> PostingResult<()> {
        if self.status != JournalEntryStatus::Draft {
            return Err(PostingError::Precondition(
                "a journal entry cannot change after posting".to_string(),
            ));
        }
        Ok(())
    }

    fn recalculate_totals(&mut self) {
        self.total_debit = self.lines.iter().map(|l| &l.debit).sum();
        self.total_credit = self.lines.iter().map(|l| &l.credit).sum();
    }
}
