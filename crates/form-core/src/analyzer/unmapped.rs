//! Unmapped-element handlers (spec.md §4.1.1 step 7): checkboxes,
//! radios, selects, email-confirmation, unified full-name/kana inputs
//! that the primary field mapping never touches.

use std::collections::HashMap;

use super::classify::ClassifiedElements;
use super::page::ElementSnapshot;
use super::required::group_is_required;
use super::types::{AutoAction, AutoHandledElement};

const PRIORITY_KEYWORDS_OTHER_FIRST: &[&str] = &["その他", "other", "該当なし"];
const SALES_TOKENS: &[&str] = &["営業", "提案", "メール"];
const CONSENT_TOKENS: &[&str] = &["同意", "agree", "承諾"];
const PRIVACY_TOKENS: &[&str] = &["プライバシー", "個人情報", "privacy", "terms"];

fn group_by_name(elements: &[ElementSnapshot]) -> Vec<(String, Vec<ElementSnapshot>)> {
    let mut groups: HashMap<String, Vec<ElementSnapshot>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for el in elements {
        let key = el.name.clone().unwrap_or_else(|| el.selector.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(el.clone());
    }
    order.into_iter().map(|k| (k.clone(), groups.remove(&k).unwrap())).collect()
}

fn pick_by_priority<'a>(members: &'a [ElementSnapshot], sales_first: bool) -> Option<&'a ElementSnapshot> {
    let label_of = |el: &ElementSnapshot| -> String {
        format!(
            "{} {}",
            el.label_text.as_deref().unwrap_or(""),
            el.context_text
        )
    };
    if sales_first {
        if let Some(found) = members.iter().find(|m| {
            let label = label_of(m);
            SALES_TOKENS.iter().any(|t| label.contains(t))
        }) {
            return Some(found);
        }
    }
    members
        .iter()
        .find(|m| PRIORITY_KEYWORDS_OTHER_FIRST.iter().any(|t| label_of(m).contains(t)))
        .or_else(|| members.last())
}

/// Checkbox groups (spec.md §4.1.1 step 7 "Checkboxes").
pub fn handle_checkboxes(classified: &ClassifiedElements) -> Vec<AutoHandledElement> {
    let mut out = Vec::new();
    for (_, members) in group_by_name(&classified.checkboxes) {
        let group_context: String = members.iter().map(|m| m.context_text.clone()).collect::<Vec<_>>().join(" ");
        let member_refs: Vec<&ElementSnapshot> = members.iter().collect();
        let is_privacy_group = PRIVACY_TOKENS.iter().any(|t| group_context.contains(t))
            && CONSENT_TOKENS.iter().any(|t| group_context.contains(t));
        if !group_is_required(&member_refs, &group_context) && !is_privacy_group {
            continue;
        }
        let chosen = if is_privacy_group {
            members.iter().find(|m| {
                let label = format!("{} {}", m.label_text.as_deref().unwrap_or(""), m.context_text);
                CONSENT_TOKENS.iter().any(|t| label.contains(t))
            })
        } else {
            pick_by_priority(&members, true)
        };
        if let Some(chosen) = chosen {
            out.push(AutoHandledElement {
                logical_name: format!("checkbox:{}", chosen.name.clone().unwrap_or_default()),
                selector: chosen.selector.clone(),
                auto_action: AutoAction::Check,
                copy_from_field: None,
                required: true,
            });
        }
    }
    out
}

fn normalize_gender(value: &str) -> Option<&'static str> {
    let lowered = value.to_lowercase();
    if lowered.contains("male") && !lowered.contains("female") || value.contains("男") {
        Some("male")
    } else if lowered.contains("female") || value.contains("女") {
        Some("female")
    } else if !value.is_empty() {
        Some("other")
    } else {
        None
    }
}

/// Radio groups (spec.md §4.1.1 step 7 "Radios").
pub fn handle_radios(classified: &ClassifiedElements, client_gender: Option<&str>) -> Vec<AutoHandledElement> {
    let mut out = Vec::new();
    for (name, members) in group_by_name(&classified.radios) {
        let group_context: String = members.iter().map(|m| m.context_text.clone()).collect::<Vec<_>>().join(" ");
        let member_refs: Vec<&ElementSnapshot> = members.iter().collect();
        if !group_is_required(&member_refs, &group_context) {
            continue;
        }
        let is_gender_group = name.to_lowercase().contains("gender")
            || name.to_lowercase().contains("sex")
            || name.contains("性別");
        let chosen = if is_gender_group {
            let normalized = client_gender.and_then(normalize_gender);
            normalized.and_then(|g| {
                members.iter().find(|m| {
                    let label = format!("{} {}", m.label_text.as_deref().unwrap_or(""), m.value.as_deref().unwrap_or(""));
                    match g {
                        "male" => label.contains("男") || label.to_lowercase().contains("male"),
                        "female" => label.contains("女") || label.to_lowercase().contains("female"),
                        _ => true,
                    }
                })
            })
        } else {
            pick_by_priority(&members, true)
        };
        if let Some(chosen) = chosen.or_else(|| pick_by_priority(&members, false)) {
            out.push(AutoHandledElement {
                logical_name: format!("radio:{name}"),
                selector: chosen.selector.clone(),
                auto_action: AutoAction::Check,
                copy_from_field: None,
                required: true,
            });
        }
    }
    out
}

const DUMMY_OPTION_TOKENS: &[&str] = &["選択", "choose", "select", "--"];
const PREFECTURE_MARKERS: &[&str] = &["東京都", "大阪府"];

/// Selects (spec.md §4.1.1 step 7 "Selects").
pub fn handle_selects(
    classified: &ClassifiedElements,
    client_prefecture: Option<&str>,
    client_gender: Option<&str>,
) -> Vec<AutoHandledElement> {
    let mut out = Vec::new();
    for el in &classified.selects {
        if !el.required {
            continue;
        }
        let is_prefecture = PREFECTURE_MARKERS
            .iter()
            .all(|marker| el.options.iter().any(|(_, text)| text.contains(marker)));
        let is_gender = el.name.as_deref().unwrap_or("").to_lowercase().contains("gender")
            || el.name.as_deref().unwrap_or("").contains("性別");

        let chosen_value = if is_prefecture {
            client_prefecture.and_then(|pref| {
                el.options
                    .iter()
                    .find(|(_, text)| text.contains(pref))
                    .map(|(value, _)| value.clone())
            })
        } else if is_gender {
            client_gender.and_then(normalize_gender).and_then(|g| {
                el.options
                    .iter()
                    .find(|(_, text)| match g {
                        "male" => text.contains("男") || text.to_lowercase().contains("male"),
                        "female" => text.contains("女") || text.to_lowercase().contains("female"),
                        _ => false,
                    })
                    .map(|(value, _)| value.clone())
            })
        } else {
            el.options
                .iter()
                .rev()
                .find(|(_, text)| {
                    SALES_TOKENS.iter().any(|t| text.contains(t))
                        || PRIORITY_KEYWORDS_OTHER_FIRST.iter().any(|t| text.contains(t))
                })
                .map(|(value, _)| value.clone())
        };

        let chosen_value = chosen_value.or_else(|| {
            el.options
                .iter()
                .find(|(_, text)| !DUMMY_OPTION_TOKENS.iter().any(|d| text.contains(d)) && !text.is_empty())
                .map(|(value, _)| value.clone())
        });

        if let Some(value) = chosen_value {
            out.push(AutoHandledElement {
                logical_name: format!("select:{}", el.name.clone().unwrap_or_default()),
                selector: el.selector.clone(),
                auto_action: AutoAction::Select,
                copy_from_field: Some(value),
                required: true,
            });
        }
    }
    out
}

const EMAIL_CONFIRM_TOKENS: &[&str] = &[
    "email_confirm",
    "mail_confirm",
    "mail2",
    "email2",
    "re_email",
    "re_mail",
    "email-confirm",
    "confirm-email",
    "確認用メール",
];

/// Email-confirmation detection (spec.md §4.1.1 step 7).
pub fn handle_email_confirmation(classified: &ClassifiedElements) -> Vec<AutoHandledElement> {
    let mut out = Vec::new();
    let pool = classified
        .email_inputs
        .iter()
        .chain(classified.text_inputs.iter());
    for el in pool {
        let haystack = format!(
            "{} {} {}",
            el.name.as_deref().unwrap_or(""),
            el.id.as_deref().unwrap_or(""),
            el.class.as_deref().unwrap_or("")
        )
        .to_lowercase();
        if EMAIL_CONFIRM_TOKENS.iter().any(|t| haystack.contains(&t.to_lowercase())) {
            out.push(AutoHandledElement {
                logical_name: "email_confirmation".to_string(),
                selector: el.selector.clone(),
                auto_action: AutoAction::CopyFrom,
                copy_from_field: Some("メールアドレス".to_string()),
                required: el.required,
            });
        }
    }
    out
}

const UNIFIED_NAME_TOKENS: &[&str] = &["name", "fullname", "full_name", "お名前", "氏名"];
const UNIFIED_KANA_TOKENS: &[&str] = &["kana", "furigana", "カナ", "フリガナ"];

/// Unified full-name / unified kana fallback when no split exists
/// (spec.md §4.1.1 step 7). Only triggers if the primary mapping
/// hasn't already covered the unified logical field.
pub fn handle_unified_name_fallback(
    classified: &ClassifiedElements,
    already_mapped_logical_names: &[String],
) -> Vec<AutoHandledElement> {
    let mut out = Vec::new();
    if !already_mapped_logical_names.iter().any(|n| n == "統合氏名") {
        if let Some(el) = classified.text_inputs.iter().find(|el| {
            let haystack = format!(
                "{} {}",
                el.name.as_deref().unwrap_or(""),
                el.label_text.as_deref().unwrap_or("")
            );
            UNIFIED_NAME_TOKENS.iter().any(|t| haystack.contains(t))
        }) {
            out.push(AutoHandledElement {
                logical_name: "統合氏名".to_string(),
                selector: el.selector.clone(),
                auto_action: AutoAction::Fill,
                copy_from_field: None,
                required: el.required,
            });
        }
    }
    if !already_mapped_logical_names.iter().any(|n| n == "統合氏名カナ") {
        if let Some(el) = classified.text_inputs.iter().find(|el| {
            let haystack = format!(
                "{} {}",
                el.name.as_deref().unwrap_or(""),
                el.label_text.as_deref().unwrap_or("")
            );
            UNIFIED_KANA_TOKENS.iter().any(|t| haystack.contains(t))
        }) {
            out.push(AutoHandledElement {
                logical_name: "統合氏名カナ".to_string(),
                selector: el.selector.clone(),
                auto_action: AutoAction::Fill,
                copy_from_field: None,
                required: el.required,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkbox(name: &str, selector: &str, context: &str) -> ElementSnapshot {
        ElementSnapshot {
            selector: selector.to_string(),
            tag: "input".to_string(),
            element_type: Some("checkbox".to_string()),
            name: Some(name.to_string()),
            context_text: context.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn email_confirmation_is_detected_by_token_set() {
        let classified = ClassifiedElements {
            email_inputs: vec![ElementSnapshot {
                selector: "#email_confirm".to_string(),
                name: Some("email_confirm".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let handled = handle_email_confirmation(&classified);
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].copy_from_field.as_deref(), Some("メールアドレス"));
    }

    #[test]
    fn privacy_consent_checkbox_group_is_actioned() {
        let classified = ClassifiedElements {
            checkboxes: vec![
                checkbox("agree", "#c1", "個人情報の取り扱いに同意する"),
            ],
            ..Default::default()
        };
        let handled = handle_checkboxes(&classified);
        assert_eq!(handled.len(), 1);
        assert!(matches!(handled[0].auto_action, AutoAction::Check));
    }
}
