//! Structured response assembly
//!
//! Merges calculations, recommendations and metadata into the response
//! schema and writes the natural-language explanation, including the
//! data-limitation disclosure when nothing real backs the answer.

use crate::models::{Recommendation, ResponseMetadata, StructuredResponse};
use std::collections::BTreeMap;

pub const DATA_LIMITATION_NOTICE: &str = "Data limitation: no transactions, model runs or connected accounting system were found, so this answer is not based on your actual financials.";

pub const CONNECT_DATA_SUGGESTION: &str =
    "Tip: connect your accounting system to keep these figures current automatically.";

fn calculation_label(name: &str) -> &str {
    match name {
        "burnRate" => "monthly burn",
        "runway" => "runway",
        "futureRevenue" => "projected monthly revenue",
        "monthlyCost" => "monthly cost of new hires",
        other => other,
    }
}

fn format_calculation(name: &str, value: f64) -> String {
    match name {
        "runway" => format!("{} {:.1} months", calculation_label(name), value),
        _ => format!("{} ${:.0}", calculation_label(name), value),
    }
}

/// Summary written when the language model did not supply one
fn summarize(calculations: &BTreeMap<String, f64>, recommendations: &[Recommendation]) -> String {
    if recommendations.len() == 1 && recommendations[0].is_setup_required() {
        return "No financial data is available for this organization yet. Connect an accounting system or import transactions so recommendations can be grounded in real figures.".to_string();
    }

    let mut parts = Vec::new();
    if !calculations.is_empty() {
        let figures: Vec<String> = calculations
            .iter()
            .map(|(k, v)| format_calculation(k, *v))
            .collect();
        parts.push(format!("Key figures: {}.", figures.join(", ")));
    }
    if let Some(top) = recommendations.first() {
        parts.push(format!("Top recommendation: {}.", top.action.trim_end_matches('.')));
    }
    if recommendations.len() > 1 {
        parts.push(format!(
            "{} further recommendations are staged for review.",
            recommendations.len() - 1
        ));
    }

    parts.join(" ")
}

pub fn natural_text(
    llm_text: Option<&str>,
    calculations: &BTreeMap<String, f64>,
    recommendations: &[Recommendation],
    has_financial_data: bool,
    has_connected_accounting: bool,
) -> String {
    let mut text = match llm_text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t.to_string(),
        None => summarize(calculations, recommendations),
    };

    if !has_connected_accounting {
        let notice = if has_financial_data {
            CONNECT_DATA_SUGGESTION
        } else {
            DATA_LIMITATION_NOTICE
        };
        text.push_str("\n\n");
        text.push_str(notice);
    }

    text
}

pub fn assemble(
    natural_text: String,
    calculations: BTreeMap<String, f64>,
    recommendations: Vec<Recommendation>,
    metadata: ResponseMetadata,
) -> StructuredResponse {
    StructuredResponse {
        natural_text,
        calculations,
        recommendations,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::setup_required;

    #[test]
    fn test_disclosure_without_any_data() {
        let text = natural_text(None, &BTreeMap::new(), &[setup_required()], false, false);
        assert!(text.starts_with("No financial data"));
        assert!(text.ends_with(DATA_LIMITATION_NOTICE));
    }

    #[test]
    fn test_connect_suggestion_when_data_but_no_connector() {
        let calcs: BTreeMap<String, f64> =
            [("runway".to_string(), 4.5), ("burnRate".to_string(), 80_000.0)]
                .into_iter()
                .collect();
        let text = natural_text(None, &calcs, &[], true, false);
        assert!(text.contains("monthly burn $80000"));
        assert!(text.contains("runway 4.5 months"));
        assert!(text.ends_with(CONNECT_DATA_SUGGESTION));

        let connected = natural_text(Some("  LLM says hi "), &calcs, &[], true, true);
        assert_eq!(connected, "LLM says hi");
    }
}
