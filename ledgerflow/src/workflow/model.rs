//! Payload types exchanged between workflow stages.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category given to transactions the classifier could not label.
pub const UNCATEGORIZED: &str = "uncategorized";

/// A bank transaction. Outflows carry a negative amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Provider identifier.
    pub id: String,
    /// Booking date.
    pub date: NaiveDate,
    /// Free-text description.
    pub description: String,
    /// Signed amount.
    pub amount: f64,
    /// Assigned category, once classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Transaction {
    /// Returns the money spent by this transaction; zero for inflows.
    #[must_use]
    pub fn spend(&self) -> f64 {
        if self.amount < 0.0 {
            -self.amount
        } else {
            0.0
        }
    }

    /// Returns the category, or [`UNCATEGORIZED`].
    #[must_use]
    pub fn category_or_default(&self) -> &str {
        self.category.as_deref().unwrap_or(UNCATEGORIZED)
    }
}

/// The transactions of one reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSet {
    /// First day of the window.
    pub since: NaiveDate,
    /// Last day of the window.
    pub until: NaiveDate,
    /// Transactions in provider order.
    pub transactions: Vec<Transaction>,
    /// How many transactions could not be classified.
    #[serde(default)]
    pub uncategorized: usize,
}

/// Budget against actual spend for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryLine {
    /// Category name.
    pub category: String,
    /// Budgeted amount; zero when the category is not in the budget.
    pub budget: f64,
    /// Actual spend.
    pub spent: f64,
    /// `budget - spent`; negative when over budget.
    pub variance: f64,
}

impl CategoryLine {
    /// Returns true if spend exceeded the budget.
    #[must_use]
    pub fn is_over(&self) -> bool {
        self.variance < 0.0
    }
}

/// Result of comparing a week's spend to the budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAnalysis {
    /// Last day of the analysed window.
    pub week_ending: NaiveDate,
    /// One line per budgeted or spent category, sorted by name.
    pub lines: Vec<CategoryLine>,
    /// Sum of all budgets.
    pub total_budget: f64,
    /// Sum of all spend.
    pub total_spent: f64,
    /// Unspent budget, never negative.
    pub surplus: f64,
    /// Whether the week was written back to the spreadsheet.
    #[serde(default)]
    pub recorded: bool,
}

impl BudgetAnalysis {
    /// Compares `transactions` to `budget`.
    #[must_use]
    pub fn compute(
        week_ending: NaiveDate,
        budget: &BTreeMap<String, f64>,
        transactions: &[Transaction],
    ) -> Self {
        let mut spent: BTreeMap<&str, f64> = BTreeMap::new();
        for tx in transactions {
            *spent.entry(tx.category_or_default()).or_default() += tx.spend();
        }

        let mut categories: Vec<&str> = budget.keys().map(String::as_str).collect();
        categories.extend(spent.keys().copied().filter(|c| !budget.contains_key(*c)));
        categories.sort_unstable();

        let lines: Vec<CategoryLine> = categories
            .into_iter()
            .map(|category| {
                let budgeted = budget.get(category).copied().unwrap_or(0.0);
                let actual = spent.get(category).copied().unwrap_or(0.0);
                CategoryLine {
                    category: category.to_string(),
                    budget: round_cents(budgeted),
                    spent: round_cents(actual),
                    variance: round_cents(budgeted - actual),
                }
            })
            .collect();

        let total_budget = round_cents(budget.values().sum());
        let total_spent = round_cents(spent.values().sum());
        Self {
            week_ending,
            lines,
            total_budget,
            total_spent,
            surplus: round_cents((total_budget - total_spent).max(0.0)),
            recorded: false,
        }
    }

    /// Returns the categories that went over budget.
    pub fn over_budget(&self) -> impl Iterator<Item = &CategoryLine> {
        self.lines.iter().filter(|line| line.is_over())
    }

    /// A plain-text summary used when no generated narrative is available.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Week ending {}: spent {:.2} of {:.2} budgeted, surplus {:.2}.",
            self.week_ending, self.total_spent, self.total_budget, self.surplus
        );
        let over: Vec<String> = self
            .over_budget()
            .map(|line| format!("{} ({:.2} over)", line.category, -line.variance))
            .collect();
        if !over.is_empty() {
            summary.push_str(" Over budget: ");
            summary.push_str(&over.join(", "));
            summary.push('.');
        }
        summary
    }
}

/// Narrative for the weekly report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    /// Report text.
    pub text: String,
    /// False when the text is the local fallback summary.
    pub generated: bool,
}

/// Rounds to two decimal places.
#[must_use]
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
