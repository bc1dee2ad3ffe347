//! Element classification (spec.md §4.1.1 step 2): bucket every
//! snapshot element by tag/type, dropping the elements that never
//! participate in mapping.

use super::page::ElementSnapshot;

#[derive(Debug, Clone, Default)]
pub struct ClassifiedElements {
    pub text_inputs: Vec<ElementSnapshot>,
    pub email_inputs: Vec<ElementSnapshot>,
    pub tel_inputs: Vec<ElementSnapshot>,
    pub url_inputs: Vec<ElementSnapshot>,
    pub number_inputs: Vec<ElementSnapshot>,
    pub textareas: Vec<ElementSnapshot>,
    pub selects: Vec<ElementSnapshot>,
    pub radios: Vec<ElementSnapshot>,
    pub checkboxes: Vec<ElementSnapshot>,
}

/// Element kinds excluded from mapping entirely (spec.md §4.1.1 step 2).
fn is_excluded(el: &ElementSnapshot) -> bool {
    match el.element_type.as_deref() {
        Some("hidden") | Some("submit") | Some("image") | Some("button") | Some("reset") => true,
        _ => el.tag.eq_ignore_ascii_case("button"),
    }
}

pub fn classify(elements: &[ElementSnapshot]) -> ClassifiedElements {
    let mut out = ClassifiedElements::default();
    for el in elements {
        if is_excluded(el) {
            continue;
        }
        let tag = el.tag.to_lowercase();
        let element_type = el.element_type.as_deref().unwrap_or("text").to_lowercase();
        match tag.as_str() {
            "textarea" => out.textareas.push(el.clone()),
            "select" => out.selects.push(el.clone()),
            "input" => match element_type.as_str() {
                "email" => out.email_inputs.push(el.clone()),
                "tel" => out.tel_inputs.push(el.clone()),
                "url" => out.url_inputs.push(el.clone()),
                "number" => out.number_inputs.push(el.clone()),
                "radio" => out.radios.push(el.clone()),
                "checkbox" => out.checkboxes.push(el.clone()),
                _ => out.text_inputs.push(el.clone()),
            },
            _ => {}
        }
    }
    out
}

/// Coarse form-type detection (spec.md §4.1.1 step 3). Search/login/
/// auth/order/newsletter forms short-circuit mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormType {
    Contact,
    Search,
    Login,
    Newsletter,
    Feedback,
    Order,
    Auth,
    Other,
}

impl FormType {
    pub fn short_circuits_mapping(self) -> bool {
        matches!(
            self,
            FormType::Search | FormType::Login | FormType::Auth | FormType::Order | FormType::Newsletter
        )
    }
}

pub fn detect_form_type(elements: &[ElementSnapshot]) -> FormType {
    let has_password = elements
        .iter()
        .any(|e| e.element_type.as_deref() == Some("password"));
    let has_search_like = elements.iter().any(|e| {
        e.element_type.as_deref() == Some("search")
            || e.name.as_deref().map(|n| n.contains("search") || n.contains("q")).unwrap_or(false)
    });
    let has_message_like = elements.iter().any(|e| {
        e.tag.eq_ignore_ascii_case("textarea")
            || e.name
                .as_deref()
                .map(|n| n.contains("message") || n.contains("inquiry"))
                .unwrap_or(false)
    });
    let has_newsletter_markers = elements.iter().any(|e| {
        e.context_text.contains("メルマガ") || e.context_text.to_lowercase().contains("newsletter")
    });
    let has_cart_markers = elements.iter().any(|e| {
        e.context_text.contains("カート") || e.context_text.to_lowercase().contains("checkout")
    });

    if has_password {
        FormType::Login
    } else if has_search_like && !has_message_like {
        FormType::Search
    } else if has_newsletter_markers && !has_message_like {
        FormType::Newsletter
    } else if has_cart_markers {
        FormType::Order
    } else if has_message_like {
        FormType::Contact
    } else {
        FormType::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::page::ElementSnapshot;

    fn input(tag: &str, element_type: &str) -> ElementSnapshot {
        ElementSnapshot {
            tag: tag.to_string(),
            element_type: Some(element_type.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn hidden_and_submit_elements_are_excluded() {
        let elements = vec![input("input", "hidden"), input("input", "submit"), input("input", "text")];
        let classified = classify(&elements);
        assert_eq!(classified.text_inputs.len(), 1);
    }

    #[test]
    fn password_field_marks_login_form() {
        let elements = vec![input("input", "password")];
        assert_eq!(detect_form_type(&elements), FormType::Login);
    }
}
