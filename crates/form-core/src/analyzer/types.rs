//! Shared analyzer output types (spec.md §3 "Field mapping (analyzer
//! output)").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Normal,
    Fallback,
    Promoted,
    RequiredRescue,
    PromoteSplit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoAction {
    Check,
    Select,
    SelectIndex,
    Fill,
    CopyFrom,
}

/// `{selector, tag, type, name, id, class, placeholder, required,
/// score, source, best_context_text}` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedField {
    pub logical_name: String,
    pub selector: String,
    pub tag: String,
    pub element_type: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
    pub placeholder: Option<String>,
    pub required: bool,
    pub score: f64,
    pub source: FieldSource,
    pub best_context_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoHandledElement {
    pub logical_name: String,
    pub selector: String,
    pub auto_action: AutoAction,
    pub copy_from_field: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAssignment {
    pub selector: String,
    pub input_type: String,
    pub value: String,
    pub required: bool,
    pub auto_action: Option<AutoAction>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Strict,
    Moderate,
    Mild,
    Weak,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProhibitionFinding {
    pub matched_text: String,
    pub score: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub missing_essentials: Vec<String>,
    pub duplicate_values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub error: Option<String>,
    pub field_mapping: Vec<MappedField>,
    pub auto_handled_elements: Vec<AutoHandledElement>,
    pub input_assignments: Vec<InputAssignment>,
    pub submit_buttons: Vec<String>,
    pub special_elements: Vec<String>,
    pub validation_result: ValidationResult,
    pub sales_prohibition: Vec<ProhibitionFinding>,
}

impl AnalysisResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// `{client: {...}, targeting: {message, subject, ...}}` (spec.md
/// §4.1 "Public contract"). Kept as a thin typed view over the raw
/// JSON bundle so new client fields don't require a schema change
/// here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientData {
    pub client: Value,
    pub targeting: Value,
}

impl ClientData {
    pub fn client_str(&self, key: &str) -> Option<String> {
        self.client.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn targeting_str(&self, key: &str) -> Option<String> {
        self.targeting.get(key).and_then(|v| v.as_str()).map(String::from)
    }
}
