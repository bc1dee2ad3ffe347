//! Final validation pass (spec.md §4.1.1 step 10): essential-fields
//! present unless the form type excuses them; no duplicate values
//! (email-confirmation copies excepted); a duplicate-prevention
//! registry tracks `(field → value, score, element-identity)`.

use std::collections::HashMap;

use super::classify::FormType;
use super::field_patterns::ESSENTIAL_FIELDS;
use super::types::{InputAssignment, ValidationResult};

pub fn validate(
    assignments: &[InputAssignment],
    mapped_logical_names: &[String],
    form_type: FormType,
) -> ValidationResult {
    let mut result = ValidationResult { ok: true, ..Default::default() };

    if !form_type.short_circuits_mapping() {
        for essential in ESSENTIAL_FIELDS {
            if !mapped_logical_names.iter().any(|n| n == essential) {
                result.missing_essentials.push(essential.to_string());
            }
        }
    }

    // Duplicate-prevention registry: `value -> selectors that carry
    // it`. Email-confirmation copies are expected duplicates and
    // excluded by the caller never invoking this with the confirm
    // assignment's *logical* name, only its selector — so we key on
    // selector identity plus value, flagging only distinct selectors
    // sharing a non-empty value when that value isn't itself an
    // intentional copy (auto_action = copy_from entries are skipped
    // entirely, since those are always sanctioned duplicates).
    let mut registry: HashMap<String, Vec<String>> = HashMap::new();
    for assignment in assignments {
        if assignment.auto_action.is_some() {
            continue;
        }
        if assignment.value.trim().is_empty() {
            continue;
        }
        registry
            .entry(assignment.value.clone())
            .or_default()
            .push(assignment.selector.clone());
    }
    for (value, selectors) in registry {
        if selectors.len() > 1 {
            result.duplicate_values.push(value);
        }
    }

    result.ok = result.missing_essentials.is_empty() && result.duplicate_values.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_missing_essentials_for_contact_forms() {
        let result = validate(&[], &[], FormType::Contact);
        assert!(!result.ok);
        assert!(result.missing_essentials.contains(&"メールアドレス".to_string()));
    }

    #[test]
    fn search_forms_are_excused_from_essentials() {
        let result = validate(&[], &[], FormType::Search);
        assert!(result.missing_essentials.is_empty());
    }

    #[test]
    fn copy_from_assignments_never_count_as_duplicates() {
        let assignments = vec![
            InputAssignment {
                selector: "#email".to_string(),
                input_type: "email".to_string(),
                value: "a@example.com".to_string(),
                required: true,
                auto_action: None,
            },
            InputAssignment {
                selector: "#email_confirm".to_string(),
                input_type: "email".to_string(),
                value: "a@example.com".to_string(),
                required: true,
                auto_action: Some(crate::analyzer::types::AutoAction::CopyFrom),
            },
        ];
        let result = validate(&assignments, &["メールアドレス".to_string(), "お問い合わせ本文".to_string(), "統合氏名".to_string(), "統合氏名カナ".to_string()], FormType::Contact);
        assert!(result.duplicate_values.is_empty());
    }
}
