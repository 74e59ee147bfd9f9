//! Fiscal years and monthly posting periods
//!
//! A fiscal year always spans a calendar year and owns exactly 12 monthly
//! periods created at construction. Postings dated inside a period require
//! that period to be Open; reversals are gated by the reversal date's own
//! period, resolved independently at cancellation time.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::*;

/// A monthly posting window inside a fiscal year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    /// Storage-assigned id (0 until the year is saved)
    pub id: EntityId,
    pub fiscal_year_id: EntityId,
    /// Period number, 1 through 12
    pub period_number: u8,
    /// Calendar year, denormalized for display
    pub year: i32,
    /// Calendar month, 1 through 12
    pub month: u32,
    /// First day of the month
    pub start_date: NaiveDate,
    /// Last day of the month
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub locked_at: Option<NaiveDateTime>,
    pub locked_by: Option<String>,
    /// Audit-only justification recorded when a locked period is reopened
    pub unlock_reason: Option<String>,
}

impl FiscalPeriod {
    fn new(period_number: u8, year: i32, month: u32) -> Self {
        let start_date = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
        let end_date = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .expect("valid next month start")
        .pred_opt()
        .expect("valid month end");

        Self {
            id: 0,
            fiscal_year_id: 0,
            period_number,
            year,
            month,
            start_date,
            end_date,
            status: PeriodStatus::Open,
            locked_at: None,
            locked_by: None,
            unlock_reason: None,
        }
    }

    /// True if the period accepts postings.
    pub fn is_open(&self) -> bool {
        self.status == PeriodStatus::Open
    }

    /// Inclusive range check for the period's calendar month.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Locks the period against further postings.
    pub fn lock(&mut self, by: &str, at: NaiveDateTime) -> PostingResult<()> {
        if self.status != PeriodStatus::Open {
            return Err(PostingError::Precondition(
                "the period is already locked".to_string(),
            ));
        }
        if by.trim().is_empty() {
            return Err(PostingError::Validation(
                "a username is required to lock a period".to_string(),
            ));
        }
        self.status = PeriodStatus::Locked;
        self.locked_at = Some(at);
        self.locked_by = Some(by.trim().to_string());
        Ok(())
    }

    /// Reopens a locked period for backdated correction. The reason is
    /// mandatory and kept for the audit trail.
    pub fn unlock(&mut self, reason: &str) -> PostingResult<()> {
        if self.status != PeriodStatus::Locked {
            return Err(PostingError::Precondition(
                "the period is already open".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(PostingError::Validation(
                "an unlock reason is required".to_string(),
            ));
        }
        self.status = PeriodStatus::Open;
        self.locked_at = None;
        self.locked_by = None;
        self.unlock_reason = Some(reason.trim().to_string());
        Ok(())
    }
}

/// A calendar fiscal year owning its 12 monthly periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalYear {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    /// Calendar year, unique across all fiscal years
    pub year: i32,
    /// Always January 1 of `year`
    pub start_date: NaiveDate,
    /// Always December 31 of `year`
    pub end_date: NaiveDate,
    pub status: FiscalYearStatus,
    pub closed_at: Option<NaiveDateTime>,
    pub closed_by: Option<String>,
    pub periods: Vec<FiscalPeriod>,
}

impl FiscalYear {
    /// Creates a fiscal year in Setup status with 12 open monthly periods.
    pub fn new(year: i32) -> PostingResult<Self> {
        if !(2000..=2100).contains(&year) {
            return Err(PostingError::Validation(
                "fiscal year must be between 2000 and 2100".to_string(),
            ));
        }

        let periods = (1..=12u8)
            .map(|month| FiscalPeriod::new(month, year, month as u32))
            .collect();

        Ok(Self {
            id: 0,
            year,
            start_date: NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year start"),
            end_date: NaiveDate::from_ymd_opt(year, 12, 31).expect("valid year end"),
            status: FiscalYearStatus::Setup,
            closed_at: None,
            closed_by: None,
            periods,
        })
    }

    /// Activates the year. The caller must verify no other year is Active.
    pub fn activate(&mut self) -> PostingResult<()> {
        if self.status != FiscalYearStatus::Setup {
            return Err(PostingError::Precondition(
                "a fiscal year can only be activated from Setup".to_string(),
            ));
        }
        if self.periods.len() != 12 {
            return Err(PostingError::Precondition(
                "a fiscal year must own exactly 12 periods".to_string(),
            ));
        }
        self.status = FiscalYearStatus::Active;
        Ok(())
    }

    /// Permanently closes the year. Requires all 12 periods to be Locked.
    pub fn close(&mut self, closed_by: &str, at: NaiveDateTime) -> PostingResult<()> {
        if self.status != FiscalYearStatus::Active {
            return Err(PostingError::Precondition(
                "only an active fiscal year can be closed".to_string(),
            ));
        }
        if closed_by.trim().is_empty() {
            return Err(PostingError::Validation(
                "a username is required to close a fiscal year".to_string(),
            ));
        }
        if self.periods.iter().any(|p| p.status != PeriodStatus::Locked) {
            return Err(PostingError::Precondition(
                "all 12 periods must be locked before closing the year".to_string(),
            ));
        }
        self.status = FiscalYearStatus::Closed;
        self.closed_at = Some(at);
        self.closed_by = Some(closed_by.trim().to_string());
        Ok(())
    }

    /// True while the year accepts postings.
    pub fn is_open(&self) -> bool {
        self.status == FiscalYearStatus::Active
    }

    /// True if the date falls inside this fiscal year.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Returns the period covering the given month (1–12).
    pub fn period(&self, month: u32) -> Option<&FiscalPeriod> {
        self.periods.iter().find(|p| p.month == month)
    }

    /// Mutable access to the period covering the given month.
    pub fn period_mut(&mut self, month: u32) -> Option<&mut FiscalPeriod> {
        self.periods.iter_mut().find(|p| p.month == month)
    }

    /// Resolves the open period for a posting date, rejecting dates outside
    /// the year, missing periods, and locked periods with a readable reason.
    pub fn open_period_for(&self, date: NaiveDate) -> PostingResult<&FiscalPeriod> {
        if !self.contains_date(date) {
            return Err(PostingError::Precondition(format!(
                "date {date} does not fall inside fiscal year {}",
                self.year
            )));
        }
        let period = self
            .period(date.month())
            .ok_or_else(|| PostingError::Precondition(format!("no fiscal period for {date}")))?;
        if !period.is_open() {
            return Err(PostingError::Precondition(format!(
                "fiscal period {}-{:02} is locked; posting is not allowed",
                period.year, period.month
            )));
        }
        Ok(period)
    }
}

/// Resolves the active fiscal year and the open period covering a posting
/// date. Every posting operation re-resolves this inside its own
/// transaction, so a period locked mid-flight is always seen.
pub async fn resolve_posting_period<S: crate::traits::LedgerStore + ?Sized>(
    store: &S,
    date: NaiveDate,
) -> PostingResult<(FiscalYear, FiscalPeriod)> {
    let fiscal_year = store
        .active_fiscal_year()
        .await?
        .ok_or_else(|| PostingError::Precondition("no active fiscal year".to_string()))?;
    let period = fiscal_year.open_period_for(date)?.clone();
    Ok((fiscal_year, period))
}

/// Resolves the fiscal year and open period for a reversal date. Reversals
/// are gated by their own date's period, which may differ from the period
/// the original entry was posted into.
pub async fn resolve_reversal_period<S: crate::traits::LedgerStore + ?Sized>(
    store: &S,
    date: NaiveDate,
) -> PostingResult<(FiscalYear, FiscalPeriod)> {
    let fiscal_year = store
        .fiscal_year_by_year(date.year())
        .await?
        .ok_or_else(|| {
            PostingError::Precondition(format!("no fiscal year exists for {}", date.year()))
        })?;
    if !fiscal_year.is_open() {
        return Err(PostingError::Precondition(format!(
            "fiscal year {} is not active",
            fiscal_year.year
        )));
    }
    let period = fiscal_year.open_period_for(date)?.clone();
    Ok((fiscal_year, period))
}
