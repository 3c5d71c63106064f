//! # Register Totals
//!
//! Folds the store's grouped sums into one [`RegisterTotals`] per register.
//! The store does the filtering (today, after the register's cutoff); this
//! module decides buckets and merges method names.
//!
//! ```text
//!  (register, method, sum)  ─┐
//!  (register, credit sum)   ─┼──► fold_register_totals ──► [RegisterTotals]
//!  (register, expense sum)  ─┘         │
//!                                      ├─ cash vs other by method name
//!                                      └─ breakdown merged by UPPERCASE name
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

/// Amount collected with one payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MethodTotal {
    /// Normalized (trimmed, uppercased) method name.
    pub method: String,
    pub amount_cents: i64,
}

/// Sum of payments for one register and one method name, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSum {
    pub register_id: i64,
    pub method_name: String,
    pub amount_cents: i64,
}

/// A single per-register amount (credit outstanding, expenses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAmount {
    pub register_id: i64,
    pub amount_cents: i64,
}

/// Unclosed money movements of one register for the day. Amounts in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTotals {
    pub register_id: i64,
    /// Collected with the cash method.
    pub cash_total: i64,
    /// Collected with any other method.
    pub other_total: i64,
    /// `cash_total + other_total`.
    pub collected_total: i64,
    /// Outstanding on sales that are still open.
    pub credit_account_total: i64,
    pub expenses_total: i64,
    pub method_breakdown: Vec<MethodTotal>,
}

impl RegisterTotals {
    /// Empty totals for a register.
    pub fn empty(register_id: i64) -> Self {
        RegisterTotals {
            register_id,
            cash_total: 0,
            other_total: 0,
            collected_total: 0,
            credit_account_total: 0,
            expenses_total: 0,
            method_breakdown: Vec::new(),
        }
    }

    /// Collected plus what is still owed on the register's open sales.
    pub fn total_sales(&self) -> Money {
        Money::from_cents(self.collected_total + self.credit_account_total)
    }

    /// Cash collected minus cash taken out as expenses.
    pub fn net_cash_income(&self) -> Money {
        Money::from_cents(self.cash_total - self.expenses_total)
    }

    /// Sum of the per-method breakdown.
    pub fn breakdown_sum(&self) -> Money {
        self.method_breakdown
            .iter()
            .map(|m| Money::from_cents(m.amount_cents))
            .sum()
    }
}

/// Normalized key used to merge method names.
pub fn normalize_method(name: &str) -> String {
    name.trim().to_uppercase()
}

/// True when `name` is the configured cash method (case-insensitive).
pub fn is_cash_method(name: &str, cash_method: &str) -> bool {
    normalize_method(name) == normalize_method(cash_method)
}

/// Merges duplicates by normalized name, summing amounts. Output is sorted
/// by method name.
pub fn merge_breakdown<I>(entries: I) -> Vec<MethodTotal>
where
    I: IntoIterator<Item = MethodTotal>,
{
    let mut merged: BTreeMap<String, i64> = BTreeMap::new();
    for entry in entries {
        *merged.entry(normalize_method(&entry.method)).or_insert(0) += entry.amount_cents;
    }
    merged
        .into_iter()
        .map(|(method, amount_cents)| MethodTotal { method, amount_cents })
        .collect()
}

/// Builds one totals object per register that has any activity.
///
/// Registers appear in ascending id order. A register is present when it
/// has at least one payment sum, credit amount or expense amount row.
pub fn fold_register_totals(
    methods: &[MethodSum],
    credit: &[RegisterAmount],
    expenses: &[RegisterAmount],
    cash_method: &str,
) -> Vec<RegisterTotals> {
    let mut by_register: BTreeMap<i64, (RegisterTotals, Vec<MethodTotal>)> = BTreeMap::new();

    for row in methods {
        let (totals, breakdown) = by_register
            .entry(row.register_id)
            .or_insert_with(|| (RegisterTotals::empty(row.register_id), Vec::new()));

        if is_cash_method(&row.method_name, cash_method) {
            totals.cash_total += row.amount_cents;
        } else {
            totals.other_total += row.amount_cents;
        }
        totals.collected_total += row.amount_cents;
        breakdown.push(MethodTotal {
            method: row.method_name.clone(),
            amount_cents: row.amount_cents,
        });
    }

    for row in credit {
        let (totals, _) = by_register
            .entry(row.register_id)
            .or_insert_with(|| (RegisterTotals::empty(row.register_id), Vec::new()));
        totals.credit_account_total += row.amount_cents;
    }

    for row in expenses {
        let (totals, _) = by_register
            .entry(row.register_id)
            .or_insert_with(|| (RegisterTotals::empty(row.register_id), Vec::new()));
        totals.expenses_total += row.amount_cents;
    }

    by_register
        .into_values()
        .map(|(mut totals, breakdown)| {
            totals.method_breakdown = merge_breakdown(breakdown);
            totals
        })
        .collect()
}
