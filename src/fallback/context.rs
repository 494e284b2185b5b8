//! Financial context for the fallback analyzer

use crate::config::FinancialDefaults;
use crate::grounding::summary_aliases;
use crate::models::{DashboardOverview, ModelRun, Transaction};
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeSet;

/// Longest runway reported when burn is not positive
const MAX_RUNWAY_MONTHS: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    ModelRun,
    DashboardOverview,
    Transactions,
    Defaults,
}

/// Monthly averages over the calendar months a transaction history spans
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransactionTotals {
    pub months: usize,
    pub monthly_expenses: f64,
    pub monthly_revenue: f64,
}

impl TransactionTotals {
    /// `None` when there are no non-duplicate transactions
    pub fn from_transactions(transactions: &[Transaction]) -> Option<Self> {
        let live: Vec<&Transaction> = transactions.iter().filter(|t| !t.is_duplicate).collect();
        if live.is_empty() {
            return None;
        }

        let months: BTreeSet<(i32, u32)> =
            live.iter().map(|t| (t.date.year(), t.date.month())).collect();
        let months = months.len();

        let (expenses, revenue) = live.iter().fold((0.0, 0.0), |(out, inc), t| {
            if t.amount < 0.0 {
                (out - t.amount, inc)
            } else {
                (out, inc + t.amount)
            }
        });

        Some(Self {
            months,
            monthly_expenses: expenses / months as f64,
            monthly_revenue: revenue / months as f64,
        })
    }

    /// Net burn; zero when revenue covers expenses
    pub fn monthly_burn(&self) -> f64 {
        (self.monthly_expenses - self.monthly_revenue).max(0.0)
    }
}

/// Snapshot of the organization's financial health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialContext {
    pub cash: f64,
    pub monthly_burn: f64,
    pub runway_months: f64,
    pub monthly_revenue: f64,
    pub revenue_growth: f64,
    pub gross_margin: f64,
    pub customers: f64,
    pub cac: f64,
    pub ltv: f64,
    pub churn_rate: f64,
    pub has_real_data: bool,
    pub source: ContextSource,
    /// Metrics that were not in the data and fell back to configured values
    pub assumptions: Vec<String>,
    /// Names of the metrics behind `assumptions`
    pub assumed_metrics: BTreeSet<String>,
    pub data_sources: Vec<String>,
}

enum Origin<'a> {
    Run(&'a ModelRun),
    Overview(&'a DashboardOverview),
    Transactions(TransactionTotals),
    Nothing,
}

impl Origin<'_> {
    fn lookup(&self, metric: &str) -> Option<f64> {
        match self {
            Origin::Run(run) => run.summary_metric(summary_aliases(metric)),
            Origin::Overview(ov) => overview_metric(ov, metric),
            Origin::Transactions(totals) => match metric {
                "monthly_burn" => Some(round2(totals.monthly_burn())),
                "monthly_revenue" => Some(round2(totals.monthly_revenue)).filter(|v| *v > 0.0),
                _ => None,
            },
            Origin::Nothing => None,
        }
    }
}

struct Resolver<'a> {
    origin: Origin<'a>,
    assumptions: Vec<String>,
    assumed: BTreeSet<String>,
}

impl Resolver<'_> {
    fn metric(&mut self, name: &str, default: f64) -> f64 {
        match self.origin.lookup(name) {
            Some(v) => v,
            None => self.assume(name, default),
        }
    }

    fn assume(&mut self, name: &str, value: f64) -> f64 {
        self.assumptions
            .push(format!("{} not available; assumed {}", name, value));
        self.assumed.insert(name.to_string());
        value
    }

    fn is_known(&self, name: &str) -> bool {
        !self.assumed.contains(name)
    }
}

impl FinancialContext {
    /// Build from the model run summary, else the dashboard overview, else
    /// the transaction history, else configured defaults. `has_other_data`
    /// covers data the caller saw but could not hand over (such as a
    /// transaction count from a recovery check).
    pub fn build(
        run: Option<&ModelRun>,
        overview: Option<&DashboardOverview>,
        transactions: &[Transaction],
        has_other_data: bool,
        defaults: &FinancialDefaults,
    ) -> Self {
        let run = run.filter(|r| r.has_summary());
        let overview = overview.filter(|o| o.has_values());
        let totals = TransactionTotals::from_transactions(transactions);

        let (source, origin, data_sources) = match (run, overview, totals) {
            (Some(run), _, _) => (
                ContextSource::ModelRun,
                Origin::Run(run),
                vec![format!("model_run:{}", run.run_id)],
            ),
            (None, Some(ov), _) => (
                ContextSource::DashboardOverview,
                Origin::Overview(ov),
                vec!["dashboard_overview".to_string()],
            ),
            (None, None, Some(totals)) => (
                ContextSource::Transactions,
                Origin::Transactions(totals),
                vec!["transactions".to_string()],
            ),
            (None, None, None) => (ContextSource::Defaults, Origin::Nothing, Vec::new()),
        };

        let mut r = Resolver {
            origin,
            assumptions: Vec::new(),
            assumed: BTreeSet::new(),
        };

        let cash = r.metric("cash", defaults.cash_balance);
        let monthly_burn = r.metric("monthly_burn", defaults.monthly_burn);
        let runway_months = match r.origin.lookup("runway_months") {
            Some(v) => v,
            None => {
                let derived = if monthly_burn > 0.0 {
                    round2(cash / monthly_burn)
                } else {
                    MAX_RUNWAY_MONTHS
                };
                let burn_known = r.is_known("monthly_burn");
                if burn_known && (monthly_burn <= 0.0 || r.is_known("cash")) {
                    derived
                } else {
                    r.assume("runway_months", derived)
                }
            }
        };
        let monthly_revenue = r.metric("monthly_revenue", 0.0);
        let revenue_growth = r.metric("revenue_growth", 0.0);
        let gross_margin = r.metric("gross_margin", 0.0);
        let customers = r.metric("customers", 0.0);
        let cac = r.metric("cac", 0.0);
        let ltv = r.metric("ltv", 0.0);
        let churn_rate = r.metric("churn_rate", 0.0);

        let has_real_data = source != ContextSource::Defaults || has_other_data;

        Self {
            cash,
            monthly_burn,
            runway_months,
            monthly_revenue,
            revenue_growth,
            gross_margin,
            customers,
            cac,
            ltv,
            churn_rate,
            has_real_data,
            source,
            assumptions: r.assumptions,
            assumed_metrics: r.assumed,
            data_sources,
        }
    }

    /// Whether a metric came from the organization's data. `ltv_cac` needs both.
    pub fn is_known(&self, metric: &str) -> bool {
        match metric {
            "ltv_cac" => self.is_known("ltv") && self.is_known("cac"),
            _ => !self.assumed_metrics.contains(metric),
        }
    }

    pub fn knows(&self, metrics: &[&str]) -> bool {
        metrics.iter().all(|m| self.is_known(m))
    }

    pub fn is_runway_critical(&self) -> bool {
        self.runway_months < 6.0
    }

    pub fn is_growth_healthy(&self) -> bool {
        self.revenue_growth > 0.10
    }

    pub fn is_efficient(&self) -> bool {
        self.cac > 0.0 && self.ltv / self.cac > 3.0
    }

    pub fn is_churn_high(&self) -> bool {
        self.churn_rate > 0.05
    }

    pub fn ltv_cac_ratio(&self) -> f64 {
        if self.cac > 0.0 {
            round2(self.ltv / self.cac)
        } else {
            0.0
        }
    }

    /// Evidence lines quoting the live values behind a recommendation.
    /// Metrics missing from the data are named but never given a value.
    pub fn cite(&self, metrics: &[&str]) -> Vec<String> {
        metrics
            .iter()
            .filter_map(|m| {
                let (label, value) = match *m {
                    "cash" => ("Cash balance", format!("${:.0}", self.cash)),
                    "monthly_burn" => ("Monthly burn", format!("${:.0}", self.monthly_burn)),
                    "runway_months" => ("Runway", format!("{:.1} months", self.runway_months)),
                    "monthly_revenue" => ("Monthly revenue", format!("${:.0}", self.monthly_revenue)),
                    "revenue_growth" => (
                        "Revenue growth",
                        format!("{:.1}%", self.revenue_growth * 100.0),
                    ),
                    "gross_margin" => ("Gross margin", format!("{:.1}%", self.gross_margin * 100.0)),
                    "customers" => ("Customers", format!("{:.0}", self.customers)),
                    "ltv_cac" => (
                        "LTV/CAC",
                        format!(
                            "{:.2} (LTV ${:.0}, CAC ${:.0})",
                            self.ltv_cac_ratio(),
                            self.ltv,
                            self.cac
                        ),
                    ),
                    "churn_rate" => ("Monthly churn", format!("{:.1}%", self.churn_rate * 100.0)),
                    _ => return None,
                };

                Some(if self.is_known(m) {
                    format!("{}: {} ({})", label, value, self.source_label())
                } else {
                    format!("{}: not in the data", label)
                })
            })
            .collect()
    }

    fn source_label(&self) -> &'static str {
        match self.source {
            ContextSource::ModelRun => "model run",
            ContextSource::DashboardOverview => "dashboard overview",
            ContextSource::Transactions => "transactions",
            ContextSource::Defaults => "assumed",
        }
    }
}

fn overview_metric(overview: &DashboardOverview, metric: &str) -> Option<f64> {
    let value = match metric {
        "cash" => overview.cash_balance,
        "monthly_burn" => overview.monthly_burn,
        "runway_months" => overview.runway_months,
        "monthly_revenue" => overview.monthly_revenue,
        "revenue_growth" => overview.revenue_growth,
        "gross_margin" => overview.gross_margin,
        "customers" => overview.active_customers,
        "cac" => overview.cac,
        "ltv" => overview.ltv,
        "churn_rate" => overview.churn_rate,
        _ => return None,
    };
    (value != 0.0).then_some(value)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunStatus, RunType};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn run(summary: serde_json::Value) -> ModelRun {
        ModelRun {
            run_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            run_type: RunType::Baseline,
            status: RunStatus::Completed,
            overrides: json!({}),
            summary: Some(summary),
            parent_run_id: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_model_run_takes_precedence() {
        let run = run(json!({"cash": 360000.0, "burnRate": 80000.0, "runwayMonths": 4.5}));
        let overview = DashboardOverview {
            cash_balance: 1.0,
            ..DashboardOverview::default()
        };

        let ctx = FinancialContext::build(Some(&run), Some(&overview), &[], false, &FinancialDefaults::default());
        assert_eq!(ctx.source, ContextSource::ModelRun);
        assert_eq!(ctx.cash, 360_000.0);
        assert!(ctx.is_runway_critical());
        assert!(ctx.has_real_data);
        assert!(ctx.assumptions.iter().any(|a| a.starts_with("churn_rate")));
    }

    #[test]
    fn test_defaults_are_not_real_data() {
        let ctx = FinancialContext::build(None, None, &[], false, &FinancialDefaults::default());
        assert_eq!(ctx.source, ContextSource::Defaults);
        assert!(!ctx.has_real_data);
        assert_eq!(ctx.runway_months, 10.0);
        assert!(!ctx.is_known("runway_months"));
        assert_eq!(ctx.cite(&["cash"]), vec!["Cash balance: not in the data"]);

        let with_transactions = FinancialContext::build(None, None, &[], true, &FinancialDefaults::default());
        assert!(with_transactions.has_real_data);
    }

    #[test]
    fn test_health_checks() {
        let overview = DashboardOverview {
            cash_balance: 600_000.0,
            monthly_burn: 50_000.0,
            revenue_growth: 0.12,
            cac: 1000.0,
            ltv: 4000.0,
            churn_rate: 0.02,
            ..DashboardOverview::default()
        };
        let ctx = FinancialContext::build(None, Some(&overview), &[], false, &FinancialDefaults::default());
        assert_eq!(ctx.runway_months, 12.0);
        assert!(!ctx.is_runway_critical());
        assert!(ctx.is_growth_healthy());
        assert!(ctx.is_efficient());
        assert!(!ctx.is_churn_high());
        assert_eq!(ctx.cite(&["runway_months"]), vec!["Runway: 12.0 months (dashboard overview)"]);
    }

    fn txn(month: u32, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            date: Utc.with_ymd_and_hms(2026, month, 10, 0, 0, 0).unwrap(),
            amount,
            category: if amount < 0.0 { "Payroll" } else { "Revenue" }.to_string(),
            description: String::new(),
            is_duplicate: false,
        }
    }

    #[test]
    fn test_transactions_supply_burn_and_revenue() {
        let mut duplicate = txn(2, -1_000_000.0);
        duplicate.is_duplicate = true;
        let history = vec![
            txn(1, -60_000.0),
            txn(1, 20_000.0),
            txn(2, -60_000.0),
            txn(2, 20_000.0),
            duplicate,
        ];

        let totals = TransactionTotals::from_transactions(&history).unwrap();
        assert_eq!(totals.months, 2);
        assert_eq!(totals.monthly_expenses, 60_000.0);

        let ctx = FinancialContext::build(None, None, &history, false, &FinancialDefaults::default());
        assert_eq!(ctx.source, ContextSource::Transactions);
        assert!(ctx.has_real_data);
        assert_eq!(ctx.monthly_burn, 40_000.0);
        assert_eq!(ctx.monthly_revenue, 20_000.0);
        assert!(ctx.knows(&["monthly_burn", "monthly_revenue"]));
        assert!(!ctx.is_known("cash"));
        assert!(!ctx.is_known("runway_months"));
        assert_eq!(
            ctx.cite(&["monthly_burn", "runway_months"]),
            vec!["Monthly burn: $40000 (transactions)", "Runway: not in the data"]
        );
    }

    #[test]
    fn test_run_outranks_transactions() {
        let run = run(json!({"cash": 360000.0, "burnRate": 80000.0}));
        let history = vec![txn(1, -5_000.0)];
        let ctx = FinancialContext::build(Some(&run), None, &history, false, &FinancialDefaults::default());

        assert_eq!(ctx.source, ContextSource::ModelRun);
        assert_eq!(ctx.runway_months, 4.5);
        assert!(ctx.is_known("runway_months"));
        assert!(!ctx.is_known("ltv_cac"));
    }
}
