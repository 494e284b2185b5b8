//! Deterministic fallback analyzer ("CFO Brain")
//!
//! Produces recommendations from the organization's financial context when
//! the language model is unavailable, unconfident or ungrounded. With no
//! real data it answers with a single `setup_required` recommendation and
//! never builds advice from assumed figures.

pub mod context;
pub mod rules;

pub use context::{ContextSource, FinancialContext};

use crate::models::{Impact, Priority, Recommendation, RecommendationSignature, SETUP_REQUIRED};
use std::collections::HashSet;
use tracing::debug;

const FILLER_CATEGORIES: &[&str] = &[
    "planning",
    "forecasting",
    "scenario_analysis",
    "governance",
    "reporting",
];

pub struct CfoBrain {
    min_recommendations: usize,
}

impl CfoBrain {
    pub fn new(min_recommendations: usize) -> Self {
        Self {
            min_recommendations,
        }
    }

    pub fn analyze(&self, goal: &str, ctx: &FinancialContext) -> Vec<Recommendation> {
        if !ctx.has_real_data {
            debug!("No financial data; emitting setup_required");
            return vec![setup_required()];
        }

        let family = rules::family_for(goal);
        let recommendations = family.select(ctx);

        debug!(
            family = family.name,
            produced = recommendations.len(),
            source = ?ctx.source,
            "Fallback rules evaluated"
        );

        let evidence = ctx.cite(&["cash", "monthly_burn", "runway_months"]);
        self.finalize(recommendations, &evidence)
    }

    /// Deduplicate, clamp confidences and pad to the minimum count.
    /// A lone `setup_required` sentinel is returned untouched.
    pub fn finalize(&self, recommendations: Vec<Recommendation>, evidence: &[String]) -> Vec<Recommendation> {
        if recommendations.len() == 1 && recommendations[0].is_setup_required() {
            return recommendations;
        }

        let mut out = dedupe(recommendations);
        for rec in &mut out {
            rec.confidence = clamp_confidence(rec.confidence);
        }
        pad_to_minimum(&mut out, self.min_recommendations, evidence);
        out
    }
}

/// Drop later recommendations whose signature was already seen
pub fn dedupe(recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut seen: HashSet<RecommendationSignature> = HashSet::new();
    recommendations
        .into_iter()
        .filter(|r| seen.insert(r.signature()))
        .collect()
}

/// Append `strategic_planning` fillers with distinct categories
pub fn pad_to_minimum(recommendations: &mut Vec<Recommendation>, minimum: usize, evidence: &[String]) {
    let mut categories = FILLER_CATEGORIES.iter();

    while recommendations.len() < minimum {
        let Some(category) = categories.find(|c| {
            !recommendations
                .iter()
                .any(|r| r.kind == "strategic_planning" && r.category == **c)
        }) else {
            break;
        };
        recommendations.push(strategic_planning(category, evidence));
    }
}

fn strategic_planning(category: &str, evidence: &[String]) -> Recommendation {
    let (action, reasoning) = match category {
        "planning" => (
            "Set quarterly financial targets and review them monthly",
            "Explicit targets make burn and growth trade-offs visible early.",
        ),
        "forecasting" => (
            "Maintain a rolling 12-month cash forecast",
            "A rolling forecast surfaces runway changes before they become urgent.",
        ),
        "scenario_analysis" => (
            "Model best, base and worst case scenarios for the next two quarters",
            "Scenario ranges show how sensitive runway is to revenue and cost assumptions.",
        ),
        "governance" => (
            "Introduce spend approval thresholds for large commitments",
            "Approval thresholds keep large commitments aligned with the plan.",
        ),
        _ => (
            "Share a monthly financial summary with leadership",
            "Regular reporting keeps decisions anchored to current numbers.",
        ),
    };

    Recommendation {
        kind: "strategic_planning".to_string(),
        category: category.to_string(),
        action: action.to_string(),
        impact: Impact::new(),
        priority: Priority::Low,
        timeline: "Next 30 days".to_string(),
        confidence: 0.65,
        reasoning: reasoning.to_string(),
        assumptions: Vec::new(),
        warnings: Vec::new(),
        evidence: evidence.to_vec(),
        data_sources: Vec::new(),
        prompt_id: None,
    }
}

/// The sentinel returned when an organization has no financial data at all
pub fn setup_required() -> Recommendation {
    Recommendation {
        kind: SETUP_REQUIRED.to_string(),
        category: "data_setup".to_string(),
        action: "Connect your accounting system or import transactions, then run a baseline model"
            .to_string(),
        impact: Impact::new(),
        priority: Priority::High,
        timeline: "Before planning".to_string(),
        confidence: 1.0,
        reasoning: "No financial data is available for this organization, so no recommendation can be grounded in real figures."
            .to_string(),
        assumptions: Vec::new(),
        warnings: Vec::new(),
        evidence: vec![
            "No transactions found for this organization".to_string(),
            "No completed model runs found for this organization".to_string(),
        ],
        data_sources: Vec::new(),
        prompt_id: None,
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
