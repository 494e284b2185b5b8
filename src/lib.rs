//! CFO Plan Orchestrator
//!
//! Turns a free-text financial goal into a persisted, auditable plan:
//! - Classifies the goal and grounds it in the organization's real data
//! - Runs deterministic calculations (LLM excluded from execution)
//! - Uses the language model only behind an anti-hallucination gate
//! - Falls back to a rule-based CFO analyzer that never invents figures
//! - Validates the structured response before it is stored
//!
//! PIPELINE:
//! CLASSIFY → GROUND → PLAN → EXECUTE → RECOMMEND → ASSEMBLE → VERIFY → PERSIST

pub mod access;
pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod fallback;
pub mod gemini;
pub mod grounding;
pub mod jobs;
pub mod models;
pub mod planner;
pub mod recommender;
pub mod response;
pub mod state;
pub mod tools;
pub mod verification;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::{Collaborators, PlanOrchestrator};
pub use config::PipelineConfig;
pub use models::*;
