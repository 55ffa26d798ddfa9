// 🧮 Settlement Engine
//
// Pure computation over a snapshot of unsettled meals:
//   meals -> balances -> suggested transfers
// No I/O, no shared state. Safe to call from any number of threads.

pub mod balances;
pub mod matching;

pub use balances::{aggregate, BalanceSheet, MealSummary, PaymentLine};
pub use matching::{apply_transfers, match_transfers, match_with_residual, Transfer};

use crate::error::Result;
use crate::ledger::LedgerReader;
use crate::models::MealSnapshot;
use crate::money::{Money, SETTLE_TOLERANCE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

// ============================================================================
// SETTLEMENT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    /// Net balance per person; negative owes, positive is owed
    pub balances: BTreeMap<String, Money>,

    /// Suggested transfers, in the order they were matched
    pub transactions: Vec<Transfer>,

    pub meal_summaries: Vec<MealSummary>,

    pub unsettled_count: usize,

    /// Sum of (rounded - exact) over all transfers. Informational only,
    /// nothing carries it forward.
    pub rounding_residual: Money,
}

impl SettlementReport {
    pub fn is_balanced(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn debtors(&self) -> impl Iterator<Item = (&String, &Money)> {
        self.balances.iter().filter(|(_, b)| b.is_sign_negative() && !b.is_zero())
    }

    pub fn creditors(&self) -> impl Iterator<Item = (&String, &Money)> {
        self.balances.iter().filter(|(_, b)| b.is_sign_positive() && !b.is_zero())
    }

    /// Meals flagged for attention (no payer, or unattributed shared cost)
    pub fn flagged_meals(&self) -> impl Iterator<Item = &MealSummary> {
        self.meal_summaries
            .iter()
            .filter(|m| m.missing_payer || m.unattributed_shared)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} unsettled meals, {} people with balances, {} suggested transfers",
            self.unsettled_count,
            self.balances.len(),
            self.transactions.len()
        )
    }
}

// ============================================================================
// SETTLEMENT ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct SettlementEngine {
    /// Balances within this distance of zero count as settled (default 0.01)
    pub tolerance: Money,
}

impl SettlementEngine {
    pub fn new() -> Self {
        SettlementEngine {
            tolerance: SETTLE_TOLERANCE,
        }
    }

    /// Non-positive tolerances fall back to the default
    pub fn with_tolerance(tolerance: Money) -> Self {
        if tolerance <= Decimal::ZERO {
            warn!(%tolerance, "non-positive settle tolerance, using default");
            return Self::new();
        }
        SettlementEngine { tolerance }
    }

    /// Compute balances, transfers and per-meal summaries.
    ///
    /// Example:
    /// ```
    /// use meal_ledger::SettlementEngine;
    ///
    /// let report = SettlementEngine::new().compute(&[]);
    /// assert!(report.balances.is_empty());
    /// assert!(report.transactions.is_empty());
    /// assert_eq!(report.unsettled_count, 0);
    /// ```
    pub fn compute(&self, meals: &[MealSnapshot]) -> SettlementReport {
        let sheet = aggregate(meals);
        let unsettled_count = sheet.summaries.len();

        if unsettled_count == 0 {
            return SettlementReport::default();
        }

        let (transactions, rounding_residual) =
            match_with_residual(&sheet.balances, self.tolerance);

        info!(
            unsettled = unsettled_count,
            people = sheet.balances.len(),
            transfers = transactions.len(),
            %rounding_residual,
            "settlement computed"
        );

        SettlementReport {
            balances: sheet.balances,
            transactions,
            meal_summaries: sheet.summaries,
            unsettled_count,
            rounding_residual,
        }
    }

    /// Read one consistent snapshot of unsettled meals and settle it
    pub fn settle_from_ledger<R: LedgerReader + ?Sized>(&self, ledger: &R) -> Result<SettlementReport> {
        let snapshot = ledger.unsettled_snapshot()?;
        Ok(self.compute(&snapshot))
    }
}

impl Default for SettlementEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a settlement with the default engine
pub fn compute_settlement(meals: &[MealSnapshot]) -> SettlementReport {
    SettlementEngine::new().compute(meals)
}

// ============================================================================
// TESTS
// ============================================================================
