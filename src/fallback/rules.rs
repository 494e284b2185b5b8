//! Rule tables for the fallback analyzer
//!
//! Each goal family is an ordered table of `(predicate, builder)` rules.
//! A family either stops at the first matching rule or collects every match
//! up to a limit.

use super::context::{round2, FinancialContext};
use crate::models::{Impact, Priority, Recommendation};

pub type Predicate = fn(&FinancialContext) -> bool;
pub type Builder = fn(&FinancialContext) -> Vec<Recommendation>;

pub struct Rule {
    pub name: &'static str,
    pub when: Predicate,
    pub build: Builder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    FirstMatch,
    AllMatching { limit: Option<usize> },
}

pub struct Family {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub selection: Selection,
    pub rules: &'static [Rule],
}

impl Family {
    pub fn matches(&self, lowered_goal: &str) -> bool {
        self.keywords.iter().any(|k| lowered_goal.contains(k))
    }

    pub fn select(&self, ctx: &FinancialContext) -> Vec<Recommendation> {
        let mut matching = self.rules.iter().filter(|r| (r.when)(ctx));

        match self.selection {
            Selection::FirstMatch => matching.next().map(|r| (r.build)(ctx)).unwrap_or_default(),
            Selection::AllMatching { limit } => {
                let all: Vec<Recommendation> = matching.flat_map(|r| (r.build)(ctx)).collect();
                match limit {
                    Some(n) => all.into_iter().take(n).collect(),
                    None => all,
                }
            }
        }
    }
}

pub static RUNWAY_FAMILY: Family = Family {
    name: "runway",
    keywords: &["runway", "cash", "burn", "survive", "extend"],
    selection: Selection::FirstMatch,
    rules: &[
        Rule {
            name: "unknown_runway",
            when: |c| !c.is_known("runway_months"),
            build: unknown_runway,
        },
        Rule {
            name: "critical_runway",
            when: FinancialContext::is_runway_critical,
            build: critical_runway,
        },
        Rule {
            name: "short_runway",
            when: |c| c.runway_months < 12.0,
            build: short_runway,
        },
        Rule {
            name: "comfortable_runway",
            when: always,
            build: |c| vec![strategic_investment(c)],
        },
    ],
};

pub static GROWTH_FAMILY: Family = Family {
    name: "growth",
    keywords: &["grow", "revenue", "scale", "sales"],
    selection: Selection::AllMatching { limit: Some(2) },
    rules: &[
        Rule {
            name: "efficient_growth",
            when: |c| c.is_growth_healthy() && c.is_efficient(),
            build: |c| vec![growth_acceleration(c)],
        },
        Rule {
            name: "inefficient_acquisition",
            when: |c| c.is_known("ltv_cac") && !c.is_efficient(),
            build: |c| vec![unit_economics(c)],
        },
        Rule {
            name: "high_churn",
            when: FinancialContext::is_churn_high,
            build: |c| vec![retention(c)],
        },
        Rule {
            name: "revenue_growth",
            when: always,
            build: |c| vec![revenue_growth(c)],
        },
    ],
};

pub static PROFIT_FAMILY: Family = Family {
    name: "profitability",
    keywords: &["profit", "margin"],
    selection: Selection::AllMatching { limit: Some(2) },
    rules: &[
        Rule {
            name: "thin_margin",
            when: |c| c.is_known("gross_margin") && c.gross_margin < 0.5,
            build: |c| vec![pricing_optimization(c)],
        },
        Rule {
            name: "high_churn",
            when: FinancialContext::is_churn_high,
            build: |c| vec![retention(c)],
        },
        Rule {
            name: "cost_discipline",
            when: always,
            build: |c| vec![cost_optimization(c)],
        },
    ],
};

pub static GENERIC_FAMILY: Family = Family {
    name: "generic",
    keywords: &[],
    selection: Selection::AllMatching { limit: None },
    rules: &[
        Rule {
            name: "health_review",
            when: always,
            build: |c| vec![financial_health_review(c)],
        },
        Rule {
            name: "runway_extension",
            when: |c| c.is_known("runway_months") && c.runway_months < 12.0,
            build: |c| vec![runway_extension(c)],
        },
        Rule {
            name: "growth_acceleration",
            when: FinancialContext::is_efficient,
            build: |c| vec![growth_acceleration(c)],
        },
        Rule {
            name: "unit_economics",
            when: |c| c.is_known("ltv_cac") && !c.is_efficient(),
            build: |c| vec![unit_economics(c)],
        },
        Rule {
            name: "operational_efficiency",
            when: always,
            build: |c| vec![operational_efficiency(c)],
        },
    ],
};

/// Keyword families in priority order
pub static FAMILIES: [&Family; 3] = [&RUNWAY_FAMILY, &GROWTH_FAMILY, &PROFIT_FAMILY];

pub fn family_for(goal: &str) -> &'static Family {
    let lowered = goal.to_lowercase();
    FAMILIES
        .iter()
        .copied()
        .find(|f| f.matches(&lowered))
        .unwrap_or(&GENERIC_FAMILY)
}

fn always(_: &FinancialContext) -> bool {
    true
}

// ===== Recommendation builders =====

struct Draft {
    kind: &'static str,
    category: &'static str,
    priority: Priority,
    confidence: f64,
    timeline: &'static str,
}

/// An impact figure and the metrics it is computed from
type Term<'a> = (&'a str, f64, &'a [&'a str]);

fn recommend(
    ctx: &FinancialContext,
    draft: Draft,
    action: String,
    reasoning: String,
    impact: &[Term],
    cited: &[&str],
) -> Recommendation {
    // figures resting on an assumed metric are left out
    let impact: Impact = impact
        .iter()
        .filter(|(_, _, inputs)| ctx.knows(inputs))
        .map(|(k, v, _)| (k.to_string(), round2(*v)))
        .collect();

    let mut warnings = Vec::new();
    if !ctx.knows(cited) {
        warnings.push("Some figures are not in the data; impact covers only what the data supports".to_string());
    }

    Recommendation {
        kind: draft.kind.to_string(),
        category: draft.category.to_string(),
        action,
        impact,
        priority: draft.priority,
        timeline: draft.timeline.to_string(),
        confidence: draft.confidence,
        reasoning,
        assumptions: ctx.assumptions.clone(),
        warnings,
        evidence: ctx.cite(cited),
        data_sources: ctx.data_sources.clone(),
        prompt_id: None,
    }
}

/// " (about $X/month)" when burn is known
fn monthly_amount(ctx: &FinancialContext, amount: f64) -> String {
    if ctx.is_known("monthly_burn") {
        format!(" (about ${:.0}/month)", amount)
    } else {
        String::new()
    }
}

/// Months gained by cutting burn by `fraction`
fn runway_gain(ctx: &FinancialContext, fraction: f64) -> f64 {
    let reduced = ctx.monthly_burn * (1.0 - fraction);
    if reduced > 0.0 && ctx.monthly_burn > 0.0 {
        ctx.cash / reduced - ctx.cash / ctx.monthly_burn
    } else {
        0.0
    }
}

const CASH_AND_BURN: &[&str] = &["cash", "monthly_burn"];
const BURN: &[&str] = &["monthly_burn"];

fn unknown_runway(ctx: &FinancialContext) -> Vec<Recommendation> {
    let reasoning = if ctx.is_known("monthly_burn") {
        format!(
            "Transactions show net burn of about ${:.0}/month, but no cash balance is on record, so runway cannot be calculated.",
            ctx.monthly_burn
        )
    } else {
        "Neither a cash balance nor a burn figure is on record, so runway cannot be calculated.".to_string()
    };

    vec![
        recommend(
            ctx,
            Draft {
                kind: "cash_visibility",
                category: "cash_management",
                priority: Priority::High,
                confidence: 0.80,
                timeline: "Next 2 weeks",
            },
            "Record the current cash balance and run a baseline model to establish runway".to_string(),
            reasoning,
            &[("monthlyBurn", ctx.monthly_burn, BURN)],
            &["monthly_burn", "cash"],
        ),
        cost_optimization(ctx),
    ]
}

fn critical_runway(ctx: &FinancialContext) -> Vec<Recommendation> {
    let savings = ctx.monthly_burn * 0.20;

    vec![
        recommend(
            ctx,
            Draft {
                kind: "cost_reduction",
                category: "cost_management",
                priority: Priority::Critical,
                confidence: 0.95,
                timeline: "Immediate (0-30 days)",
            },
            format!("Cut monthly burn by 20%{}", monthly_amount(ctx, savings)),
            format!(
                "Runway of {:.1} months is below the 6-month safety threshold; reducing burn is the fastest lever.",
                ctx.runway_months
            ),
            &[
                ("monthlySavings", savings, BURN),
                ("runwayExtension", runway_gain(ctx, 0.20), CASH_AND_BURN),
            ],
            &["runway_months", "monthly_burn", "cash"],
        ),
        recommend(
            ctx,
            Draft {
                kind: "hiring_freeze",
                category: "headcount",
                priority: Priority::High,
                confidence: 0.90,
                timeline: "Immediate",
            },
            "Pause all non-critical hiring until runway exceeds 6 months".to_string(),
            format!(
                "Each new hire adds fixed monthly cost while runway is only {:.1} months.",
                ctx.runway_months
            ),
            &[],
            &["runway_months", "monthly_burn"],
        ),
    ]
}

fn short_runway(ctx: &FinancialContext) -> Vec<Recommendation> {
    vec![
        recommend(
            ctx,
            Draft {
                kind: "fundraising_preparation",
                category: "capital",
                priority: Priority::High,
                confidence: 0.85,
                timeline: "Next 60-90 days",
            },
            "Start preparing a fundraise targeting 18 months of runway".to_string(),
            format!(
                "Runway of {:.1} months leaves limited time; fundraises typically take 4-6 months.",
                ctx.runway_months
            ),
            &[("targetRaise", ctx.monthly_burn * 18.0, BURN)],
            &["runway_months", "monthly_burn", "cash"],
        ),
        cost_optimization(ctx),
    ]
}

fn strategic_investment(ctx: &FinancialContext) -> Recommendation {
    let investable = (ctx.cash - ctx.monthly_burn * 12.0).max(0.0);
    recommend(
        ctx,
        Draft {
            kind: "strategic_investment",
            category: "growth_investment",
            priority: Priority::Medium,
            confidence: 0.75,
            timeline: "Next quarter",
        },
        "Invest cash above a 12-month reserve into growth initiatives".to_string(),
        format!(
            "Runway of {:.1} months comfortably exceeds 12 months.",
            ctx.runway_months
        ),
        &[("investableCash", investable, CASH_AND_BURN)],
        &["cash", "monthly_burn", "runway_months"],
    )
}

fn cost_optimization(ctx: &FinancialContext) -> Recommendation {
    let savings = ctx.monthly_burn * 0.10;
    recommend(
        ctx,
        Draft {
            kind: "cost_optimization",
            category: "cost_management",
            priority: Priority::Medium,
            confidence: 0.80,
            timeline: "Next 30-60 days",
        },
        format!("Review vendor and tooling spend to trim burn by 10%{}", monthly_amount(ctx, savings)),
        "A 10% reduction in burn extends runway without affecting headcount.".to_string(),
        &[
            ("monthlySavings", savings, BURN),
            ("runwayExtension", runway_gain(ctx, 0.10), CASH_AND_BURN),
        ],
        &["monthly_burn", "runway_months"],
    )
}

fn growth_acceleration(ctx: &FinancialContext) -> Recommendation {
    recommend(
        ctx,
        Draft {
            kind: "growth_acceleration",
            category: "growth",
            priority: Priority::High,
            confidence: 0.80,
            timeline: "Next quarter",
        },
        "Increase acquisition spend in the best-performing channels".to_string(),
        format!(
            "LTV/CAC of {:.2} shows each acquired customer returns more than 3x its cost.",
            ctx.ltv_cac_ratio()
        ),
        &[
            ("ltvCacRatio", ctx.ltv_cac_ratio(), &["ltv_cac"]),
            ("targetGrowthRate", ctx.revenue_growth.max(0.0) + 0.05, &["revenue_growth"]),
        ],
        &["ltv_cac", "revenue_growth"],
    )
}

fn unit_economics(ctx: &FinancialContext) -> Recommendation {
    recommend(
        ctx,
        Draft {
            kind: "unit_economics",
            category: "efficiency",
            priority: Priority::High,
            confidence: 0.85,
            timeline: "Next 60 days",
        },
        "Improve unit economics before scaling acquisition".to_string(),
        format!(
            "LTV/CAC of {:.2} is below the 3x benchmark for efficient growth.",
            ctx.ltv_cac_ratio()
        ),
        &[
            ("ltvCacRatio", ctx.ltv_cac_ratio(), &["ltv_cac"]),
            ("targetCac", ctx.ltv / 3.0, &["ltv"]),
        ],
        &["ltv_cac"],
    )
}

fn retention(ctx: &FinancialContext) -> Recommendation {
    recommend(
        ctx,
        Draft {
            kind: "retention",
            category: "customers",
            priority: Priority::High,
            confidence: 0.80,
            timeline: "Next 30-60 days",
        },
        "Launch a retention program targeting at-risk accounts".to_string(),
        format!(
            "Monthly churn of {:.1}% exceeds the 5% threshold.",
            ctx.churn_rate * 100.0
        ),
        &[
            ("churnRate", ctx.churn_rate, &["churn_rate"]),
            (
                "monthlyRevenueAtRisk",
                ctx.monthly_revenue * ctx.churn_rate,
                &["monthly_revenue", "churn_rate"],
            ),
        ],
        &["churn_rate", "monthly_revenue", "customers"],
    )
}

fn revenue_growth(ctx: &FinancialContext) -> Recommendation {
    let reasoning = if ctx.is_known("revenue_growth") {
        format!(
            "Current growth of {:.1}% per month can be lifted by upsell before new acquisition.",
            ctx.revenue_growth * 100.0
        )
    } else {
        "Upsell to existing customers is usually the cheapest source of new revenue.".to_string()
    };

    recommend(
        ctx,
        Draft {
            kind: "revenue_growth",
            category: "revenue",
            priority: Priority::Medium,
            confidence: 0.70,
            timeline: "Next quarter",
        },
        "Focus on expansion revenue from existing customers".to_string(),
        reasoning,
        &[
            ("monthlyRevenue", ctx.monthly_revenue, &["monthly_revenue"]),
            ("targetGrowthRate", ctx.revenue_growth.max(0.0) + 0.03, &["revenue_growth"]),
        ],
        &["monthly_revenue", "revenue_growth"],
    )
}

fn pricing_optimization(ctx: &FinancialContext) -> Recommendation {
    recommend(
        ctx,
        Draft {
            kind: "pricing_optimization",
            category: "pricing",
            priority: Priority::Medium,
            confidence: 0.75,
            timeline: "Next 60 days",
        },
        "Review pricing and packaging to lift gross margin".to_string(),
        format!(
            "Gross margin of {:.1}% is below the 50% benchmark.",
            ctx.gross_margin * 100.0
        ),
        &[(
            "monthlyGrossProfitGain",
            ctx.monthly_revenue * 0.05,
            &["monthly_revenue"],
        )],
        &["gross_margin", "monthly_revenue"],
    )
}

fn financial_health_review(ctx: &FinancialContext) -> Recommendation {
    let reasoning = match (ctx.is_known("runway_months"), ctx.is_known("monthly_burn")) {
        (true, true) => format!(
            "Runway is {:.1} months at ${:.0}/month burn; a structured review anchors the next decisions.",
            ctx.runway_months, ctx.monthly_burn
        ),
        (false, true) => format!(
            "Burn is about ${:.0}/month but runway is unknown; a structured review anchors the next decisions.",
            ctx.monthly_burn
        ),
        _ => "Key figures are missing from the data; a structured review anchors the next decisions."
            .to_string(),
    };

    recommend(
        ctx,
        Draft {
            kind: "financial_health_review",
            category: "planning",
            priority: Priority::High,
            confidence: 0.90,
            timeline: "Next 2 weeks",
        },
        "Run a full review of burn, runway and revenue trends".to_string(),
        reasoning,
        &[
            ("runwayMonths", ctx.runway_months, &["runway_months"]),
            ("monthlyBurn", ctx.monthly_burn, BURN),
        ],
        &["cash", "monthly_burn", "runway_months", "monthly_revenue"],
    )
}

fn runway_extension(ctx: &FinancialContext) -> Recommendation {
    let savings = ctx.monthly_burn * 0.15;
    recommend(
        ctx,
        Draft {
            kind: "runway_extension",
            category: "cash_management",
            priority: Priority::High,
            confidence: 0.85,
            timeline: "Next 30 days",
        },
        format!("Extend runway by reducing burn 15%{}", monthly_amount(ctx, savings)),
        format!(
            "Runway of {:.1} months is under 12 months.",
            ctx.runway_months
        ),
        &[
            ("monthlySavings", savings, BURN),
            ("runwayExtension", runway_gain(ctx, 0.15), CASH_AND_BURN),
        ],
        &["runway_months", "monthly_burn", "cash"],
    )
}

fn operational_efficiency(ctx: &FinancialContext) -> Recommendation {
    let savings = ctx.monthly_burn * 0.05;
    recommend(
        ctx,
        Draft {
            kind: "operational_efficiency",
            category: "operations",
            priority: Priority::Medium,
            confidence: 0.70,
            timeline: "Ongoing",
        },
        "Automate recurring finance and operations workflows".to_string(),
        "Small operational savings compound over the runway.".to_string(),
        &[("monthlySavings", savings, BURN)],
        &["monthly_burn"],
    )
}
