//! Field mapping (spec.md §4.1.1 step 5): for every logical field in
//! priority order, pick at most one best element.

use super::classify::ClassifiedElements;
use super::field_patterns::{self, AcceptedTag, FieldPattern};
use super::page::ElementSnapshot;
use super::required::is_required;
use super::scoring::{full_score, quick_score};
use super::types::{FieldSource, MappedField};

const QUICK_TOP_K_GENERAL: usize = 15;
const QUICK_TOP_K_ESSENTIAL: usize = 25;
const EARLY_STOP_SCORE: f64 = 95.0;

fn candidate_pool(pattern: &FieldPattern, classified: &ClassifiedElements) -> Vec<ElementSnapshot> {
    let mut pool = Vec::new();
    for tag in pattern.accepted_tags {
        match tag {
            AcceptedTag::Input => {
                pool.extend(classified.text_inputs.iter().cloned());
                pool.extend(classified.email_inputs.iter().cloned());
                pool.extend(classified.tel_inputs.iter().cloned());
                pool.extend(classified.url_inputs.iter().cloned());
                pool.extend(classified.number_inputs.iter().cloned());
            }
            AcceptedTag::Textarea => {
                // textarea is never included unless the field is
                // message-like (spec.md §4.1.1 step 5).
                pool.extend(classified.textareas.iter().cloned());
            }
            AcceptedTag::Select => pool.extend(classified.selects.iter().cloned()),
        }
    }
    pool
}

/// Field-specific safety gates (spec.md §4.1.1 step 5 "Safety gates").
fn passes_safety_gate(field_name: &str, el: &ElementSnapshot) -> bool {
    let attrs = format!(
        "{} {} {} {}",
        el.name.as_deref().unwrap_or(""),
        el.id.as_deref().unwrap_or(""),
        el.class.as_deref().unwrap_or(""),
        el.label_text.as_deref().unwrap_or("")
    )
    .to_lowercase();

    match field_name {
        "メールアドレス" => {
            el.element_type.as_deref() == Some("email")
                || attrs.contains("mail")
                || attrs.contains("メール")
        }
        "電話番号" => {
            let has_phone_tokens = el.element_type.as_deref() == Some("tel")
                || attrs.contains("tel")
                || attrs.contains("phone")
                || attrs.contains("電話");
            let has_time_words = attrs.contains("time") || attrs.contains("時間");
            has_phone_tokens && !has_time_words
        }
        "郵便番号" => {
            let has_zip_tokens = attrs.contains("zip") || attrs.contains("postal") || attrs.contains("郵便");
            let has_disallowed = attrs.contains("captcha") || attrs.contains("confirm");
            has_zip_tokens && !has_disallowed
        }
        "都道府県" => {
            if el.tag.eq_ignore_ascii_case("select") {
                let prefecture_option_matches = el
                    .options
                    .iter()
                    .filter(|(_, text)| text.ends_with('県') || text.ends_with('都') || text.ends_with('府'))
                    .count();
                prefecture_option_matches >= 5
            } else {
                attrs.contains("prefecture") || attrs.contains("pref")
            }
        }
        _ => true,
    }
}

/// Confirmation inputs are excluded from the primary email mapping
/// (spec.md §4.1.1 step 5 "Safety gates").
fn is_confirmation_input(el: &ElementSnapshot) -> bool {
    let attrs = format!(
        "{} {} {}",
        el.name.as_deref().unwrap_or(""),
        el.id.as_deref().unwrap_or(""),
        el.class.as_deref().unwrap_or("")
    )
    .to_lowercase();
    attrs.contains("confirm") || attrs.contains("確認")
}

/// Picks at most one best element per field, in descending priority
/// (essentials first, then declared order). Returns the mapped fields
/// and the elements consumed, so callers can exclude them from later
/// passes (required-rescue, unmapped handlers).
pub fn map_fields(classified: &ClassifiedElements) -> Vec<MappedField> {
    let mut mapped = Vec::new();
    let mut consumed_selectors: Vec<String> = Vec::new();

    let mut patterns: Vec<&FieldPattern> = field_patterns::FIELD_PATTERNS.iter().collect();
    patterns.sort_by_key(|p| !p.essential);

    let mut essentials_mapped = 0usize;
    let essential_count = field_patterns::ESSENTIAL_FIELDS.len();

    for pattern in patterns {
        let pool = candidate_pool(pattern, classified);
        let top_k = if pattern.essential {
            QUICK_TOP_K_ESSENTIAL
        } else {
            QUICK_TOP_K_GENERAL
        };

        let mut ranked: Vec<(ElementSnapshot, f64)> = pool
            .into_iter()
            .filter(|el| !consumed_selectors.contains(&el.selector))
            .filter(|el| pattern.name != "メールアドレス" || !is_confirmation_input(el))
            .map(|el| {
                let quick = quick_score(&el, pattern);
                (el, quick)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ranked.truncate(top_k);

        let all_essentials_mapped = essentials_mapped >= essential_count;
        let threshold = field_patterns::threshold_for(pattern, all_essentials_mapped);

        let mut best: Option<(ElementSnapshot, f64)> = None;
        for (el, _) in ranked {
            if !passes_safety_gate(pattern.name, &el) {
                continue;
            }
            let required = is_required(&el);
            let score = full_score(&el, pattern, required).total();
            if score < threshold {
                continue;
            }
            let is_better = best.as_ref().map(|(_, s)| score > *s).unwrap_or(true);
            if is_better {
                let stop_now = pattern.essential
                    && score >= EARLY_STOP_SCORE
                    && el
                        .element_type
                        .as_deref()
                        .map(|t| pattern.accepted_types.contains(&t))
                        .unwrap_or(false);
                best = Some((el, score));
                if stop_now {
                    break;
                }
            }
        }

        if let Some((el, score)) = best {
            let required = is_required(&el);
            consumed_selectors.push(el.selector.clone());
            if pattern.essential {
                essentials_mapped += 1;
            }
            mapped.push(MappedField {
                logical_name: pattern.name.to_string(),
                selector: el.selector,
                tag: el.tag,
                element_type: el.element_type,
                name: el.name,
                id: el.id,
                class: el.class,
                placeholder: el.placeholder,
                required,
                score,
                source: FieldSource::Normal,
                best_context_text: el.label_text,
            });
        }
    }

    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::classify::classify;
    use crate::analyzer::page::ElementSnapshot;

    fn email_input() -> ElementSnapshot {
        ElementSnapshot {
            selector: "#email".to_string(),
            tag: "input".to_string(),
            element_type: Some("email".to_string()),
            name: Some("email".to_string()),
            required: true,
            ..Default::default()
        }
    }

    #[test]
    fn maps_email_field_from_type_and_name() {
        let classified = classify(&[email_input()]);
        let mapped = map_fields(&classified);
        let email = mapped.iter().find(|m| m.logical_name == "メールアドレス");
        assert!(email.is_some());
        assert_eq!(email.unwrap().selector, "#email");
    }

    #[test]
    fn confirmation_email_is_excluded_from_primary_mapping() {
        let mut confirm = email_input();
        confirm.selector = "#email_confirm".to_string();
        confirm.name = Some("email_confirm".to_string());
        let classified = classify(&[email_input(), confirm]);
        let mapped = map_fields(&classified);
        let email = mapped.iter().find(|m| m.logical_name == "メールアドレス").unwrap();
        assert_eq!(email.selector, "#email");
    }
}
