//! Submit-button detection (spec.md §4.1.1 step 9): within the form's
//! bounding box only, ordered candidates, never header/global search
//! buttons.

use once_cell::sync::Lazy;
use regex::Regex;

use super::page::{BoundingBox, ElementSnapshot};

static SUBMIT_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)送信|問い合わせ|送る|submit|send|確認").unwrap());

fn within_bounds(el_box: Option<BoundingBox>, form_box: &BoundingBox) -> bool {
    let Some(b) = el_box else { return false };
    b.x >= form_box.x
        && b.y >= form_box.y
        && b.x + b.width <= form_box.x + form_box.width
        && b.y + b.height <= form_box.y + form_box.height
}

pub fn detect_submit_buttons(elements: &[ElementSnapshot], form_box: Option<BoundingBox>) -> Vec<String> {
    let Some(form_box) = form_box else { return Vec::new() };
    let mut candidates: Vec<(ElementSnapshot, u8)> = Vec::new();

    for el in elements {
        if !within_bounds(el.bounding_box, &form_box) {
            continue;
        }
        let tag = el.tag.to_lowercase();
        let element_type = el.element_type.as_deref().unwrap_or("");
        let text = el.context_text.as_str();

        let priority = if tag == "button" && element_type == "submit" {
            Some(0)
        } else if tag == "input" && (element_type == "submit" || element_type == "image") {
            Some(1)
        } else if SUBMIT_TEXT_RE.is_match(text) {
            Some(2)
        } else {
            None
        };
        if let Some(priority) = priority {
            candidates.push((el.clone(), priority));
        }
    }

    candidates.sort_by_key(|(_, priority)| *priority);
    candidates.into_iter().map(|(el, _)| el.selector).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_box() -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: 500.0, height: 500.0 }
    }

    #[test]
    fn submit_button_outside_form_bounds_is_ignored() {
        let header_search = ElementSnapshot {
            selector: "#header-search".to_string(),
            tag: "button".to_string(),
            element_type: Some("submit".to_string()),
            bounding_box: Some(BoundingBox { x: 600.0, y: 0.0, width: 50.0, height: 20.0 }),
            ..Default::default()
        };
        let real_submit = ElementSnapshot {
            selector: "#submit".to_string(),
            tag: "button".to_string(),
            element_type: Some("submit".to_string()),
            bounding_box: Some(BoundingBox { x: 100.0, y: 400.0, width: 100.0, height: 30.0 }),
            ..Default::default()
        };
        let result = detect_submit_buttons(&[header_search, real_submit], Some(form_box()));
        assert_eq!(result, vec!["#submit".to_string()]);
    }
}
