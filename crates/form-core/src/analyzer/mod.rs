//! The rule-based DOM form analyzer (spec.md §4.1). `analyze` is the
//! only public entry point; everything else is pipeline detail.

pub mod classify;
pub mod field_patterns;
pub mod mapping;
pub mod page;
pub mod postprocess;
pub mod prohibition;
pub mod required;
pub mod scoring;
pub mod submit_button;
pub mod types;
pub mod unmapped;

use page::PageHandle;
use types::{AnalysisResult, AutoAction, ClientData, InputAssignment, MappedField};

/// Value generation for a mapped logical field from client data
/// (spec.md §4.1.1 step 8). Split fields read indexed client keys;
/// everything else reads a single key.
fn value_for(field: &MappedField, client_data: &ClientData) -> Option<String> {
    match field.logical_name.as_str() {
        "メールアドレス" => client_data.client_str("email"),
        "お問い合わせ本文" => client_data
            .targeting_str("message")
            .or_else(|| client_data.client_str("message")),
        "件名" => client_data.targeting_str("subject"),
        "統合氏名" => client_data.client_str("full_name"),
        "統合氏名カナ" => client_data.client_str("full_name_kana"),
        "姓" => client_data.client_str("last_name"),
        "名" => client_data.client_str("first_name"),
        "姓カナ" => client_data.client_str("last_name_kana"),
        "名カナ" => client_data.client_str("first_name_kana"),
        "電話番号1" => client_data.client_str("phone_1"),
        "電話番号2" => client_data.client_str("phone_2"),
        "電話番号3" => client_data.client_str("phone_3"),
        "郵便番号1" => client_data.client_str("postal_code_1"),
        "郵便番号2" => client_data.client_str("postal_code_2"),
        "郵便番号" => {
            let (p1, p2) = (client_data.client_str("postal_code_1"), client_data.client_str("postal_code_2"));
            match (p1, p2) {
                (Some(a), Some(b)) => Some(format!("{a}{b}")),
                _ => client_data.client_str("postal_code"),
            }
        }
        "住所" => client_data.client_str("address_1"),
        "都道府県" => client_data.client_str("address_1"),
        "会社名" => client_data.client_str("company_name"),
        name if name.starts_with("auto_required_text_") => Some(postprocess::FULL_WIDTH_SPACE.to_string()),
        name if name.starts_with("住所_補助") => client_data.client_str("address_2"),
        _ => None,
    }
}

/// Corrects common 姓/名 cross-wiring: if the 姓 selector looks like a
/// first-name selector and the 名 selector looks like a last-name
/// selector, swap the values, then *enforce* canonical client values
/// for 姓/名/姓カナ/名カナ regardless (spec.md §4.1.1 step 8).
fn correct_sei_mei_and_enforce(mapped: &[MappedField], client_data: &ClientData) -> Vec<(String, String)> {
    let mut overrides = Vec::new();
    let sei = mapped.iter().find(|m| m.logical_name == "姓");
    let mei = mapped.iter().find(|m| m.logical_name == "名");
    if let (Some(sei), Some(mei)) = (sei, mei) {
        let sei_sel = sei.selector.to_lowercase();
        let mei_sel = mei.selector.to_lowercase();
        let sei_looks_like_mei = sei_sel.contains("mei") || sei_sel.contains("first") || sei_sel.contains("given");
        let mei_looks_like_sei = mei_sel.contains("sei") || mei_sel.contains("last") || mei_sel.contains("family");
        if sei_looks_like_mei && mei_looks_like_sei {
            if let Some(v) = client_data.client_str("first_name") {
                overrides.push((sei.selector.clone(), v));
            }
            if let Some(v) = client_data.client_str("last_name") {
                overrides.push((mei.selector.clone(), v));
            }
            return overrides;
        }
    }
    for (name, key) in [
        ("姓", "last_name"),
        ("名", "first_name"),
        ("姓カナ", "last_name_kana"),
        ("名カナ", "first_name_kana"),
    ] {
        if let Some(field) = mapped.iter().find(|m| m.logical_name == name) {
            if let Some(v) = client_data.client_str(key) {
                overrides.push((field.selector.clone(), v));
            }
        }
    }
    overrides
}

pub fn analyze(page: &dyn PageHandle, client_data: &ClientData) -> AnalysisResult {
    let snapshot = page.snapshot();
    if snapshot.elements.is_empty() {
        return AnalysisResult::failure("no form-relevant elements found on page");
    }

    let classified_all = classify::classify(&snapshot.elements);
    let form_type = classify::detect_form_type(&snapshot.elements);

    if form_type.short_circuits_mapping() {
        let mut result = AnalysisResult {
            success: true,
            ..Default::default()
        };
        result.special_elements.push(format!("{form_type:?}"));
        return result;
    }

    let mut mapped = mapping::map_fields(&classified_all);

    postprocess::drop_unified_when_split_present(&mut mapped);
    postprocess::reject_non_personal_sei_mei(&mut mapped);
    postprocess::promote_phone_triplet(&mut mapped, &snapshot.elements);
    postprocess::promote_postal_split(&mut mapped, &snapshot.elements);
    postprocess::required_rescue(&mut mapped, &snapshot.elements);

    let checkboxes = unmapped::handle_checkboxes(&classified_all);
    let radios = unmapped::handle_radios(&classified_all, client_data.client_str("gender").as_deref());
    let selects = unmapped::handle_selects(
        &classified_all,
        client_data.client_str("address_1").as_deref(),
        client_data.client_str("gender").as_deref(),
    );
    let email_confirm = unmapped::handle_email_confirmation(&classified_all);
    let mapped_names: Vec<String> = mapped.iter().map(|m| m.logical_name.clone()).collect();
    let unified_fallback = unmapped::handle_unified_name_fallback(&classified_all, &mapped_names);

    let mut auto_handled = Vec::new();
    auto_handled.extend(checkboxes);
    auto_handled.extend(radios);
    auto_handled.extend(selects);
    auto_handled.extend(email_confirm.clone());
    auto_handled.extend(unified_fallback);

    let mut assignments: Vec<InputAssignment> = mapped
        .iter()
        .filter_map(|field| {
            value_for(field, client_data).map(|value| InputAssignment {
                selector: field.selector.clone(),
                input_type: field.element_type.clone().unwrap_or_else(|| "text".to_string()),
                value,
                required: field.required,
                auto_action: None,
            })
        })
        .collect();

    for overridden in correct_sei_mei_and_enforce(&mapped, client_data) {
        if let Some(existing) = assignments.iter_mut().find(|a| a.selector == overridden.0) {
            existing.value = overridden.1;
        }
    }

    for handled in &auto_handled {
        let value = match handled.auto_action {
            AutoAction::CopyFrom => assignments
                .iter()
                .find(|a| handled.copy_from_field.as_deref() == Some("メールアドレス") && a.selector != handled.selector)
                .map(|a| a.value.clone())
                .unwrap_or_default(),
            AutoAction::Select | AutoAction::SelectIndex => handled.copy_from_field.clone().unwrap_or_default(),
            _ => String::new(),
        };
        assignments.push(InputAssignment {
            selector: handled.selector.clone(),
            input_type: "auto".to_string(),
            value,
            required: handled.required,
            auto_action: Some(handled.auto_action),
        });
    }

    let submit_buttons = submit_button::detect_submit_buttons(&snapshot.elements, snapshot.form_bounding_box);
    let validation_result = validation::validate(&assignments, &mapped_names, form_type);

    AnalysisResult {
        success: true,
        error: None,
        field_mapping: mapped,
        auto_handled_elements: auto_handled,
        input_assignments: assignments,
        submit_buttons,
        special_elements: Vec::new(),
        validation_result,
        sales_prohibition: Vec::new(),
    }
}

pub mod validation;

#[cfg(test)]
mod tests {
    use super::*;
    use page::{ElementSnapshot, PageSnapshot, StaticPage};
    use serde_json::json;

    fn client_data() -> ClientData {
        ClientData {
            client: json!({"email": "taro@example.com", "last_name": "山田", "first_name": "太郎"}),
            targeting: json!({"message": "ご相談があります"}),
        }
    }

    #[test]
    fn analyze_fails_cleanly_on_empty_page() {
        let page = StaticPage(PageSnapshot::default());
        let result = analyze(&page, &client_data());
        assert!(!result.success);
    }

    #[test]
    fn analyze_maps_email_and_message_fields() {
        let elements = vec![
            ElementSnapshot {
                selector: "#email".to_string(),
                tag: "input".to_string(),
                element_type: Some("email".to_string()),
                name: Some("email".to_string()),
                required: true,
                visible: true,
                enabled: true,
                ..Default::default()
            },
            ElementSnapshot {
                selector: "#message".to_string(),
                tag: "textarea".to_string(),
                name: Some("message".to_string()),
                required: true,
                visible: true,
                enabled: true,
                ..Default::default()
            },
        ];
        let page = StaticPage(PageSnapshot { elements, ..Default::default() });
        let result = analyze(&page, &client_data());
        assert!(result.success);
        assert!(result.field_mapping.iter().any(|m| m.logical_name == "メールアドレス"));
        assert!(result
            .input_assignments
            .iter()
            .any(|a| a.selector == "#email" && a.value == "taro@example.com"));
    }
}
