//! Required-field detection (spec.md §4.1.1 step 4).

use once_cell::sync::Lazy;
use regex::Regex;

use super::page::ElementSnapshot;

static CLASS_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(required|must|wpcf7-validates-as-required|fldrequired)\b").unwrap());

/// Markers that count anywhere in nearby text; `※` only counts when the
/// adjacent text is short (spec.md §4.1.1 step 4).
const MARKER_CHARS: &[&str] = &["必須", "Required", "Mandatory", "*", "＊"];
const SHORT_TEXT_MAX: usize = 10;

fn has_marker_text(context: &str) -> bool {
    if context.chars().count() <= SHORT_TEXT_MAX {
        if MARKER_CHARS.iter().any(|m| context.contains(m)) || context.contains('※') {
            return true;
        }
    }
    MARKER_CHARS.iter().any(|m| context.contains(m))
}

/// `true` if `element` carries any of the required signals (spec.md
/// §4.1.1 step 4). Radio-group container markers are checked by the
/// caller via `group_container_required`, since a single element
/// doesn't know its group's container text.
pub fn is_required(element: &ElementSnapshot) -> bool {
    if element.required || element.aria_required {
        return true;
    }
    if let Some(class) = &element.class {
        if CLASS_MARKER_RE.is_match(class) {
            return true;
        }
    }
    has_marker_text(&element.context_text)
}

/// Radio/checkbox groups: a group is required if any member is
/// required, or the *container* text (bounded to depth-6 ancestors and
/// 2 preceding siblings, already folded into `group_context_text` by
/// the caller) carries a marker.
pub fn group_is_required(members: &[&ElementSnapshot], group_context_text: &str) -> bool {
    members.iter().any(|m| is_required(m)) || has_marker_text(group_context_text)
}

/// Widens mapping to only the fixed essential-field set when the page
/// shows no required signals at all (spec.md §4.1.1 step 4 and §9
/// Open Question: this never widens mapping for arbitrary fields,
/// despite the flag's name).
pub fn should_treat_all_as_required(elements: &[ElementSnapshot]) -> bool {
    !elements.is_empty() && elements.iter().all(|e| !is_required(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(required: bool, class: Option<&str>, context: &str) -> ElementSnapshot {
        ElementSnapshot {
            required,
            class: class.map(String::from),
            context_text: context.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn required_attribute_is_detected() {
        assert!(is_required(&el(true, None, "")));
    }

    #[test]
    fn class_marker_is_detected() {
        assert!(is_required(&el(false, Some("wpcf7-validates-as-required"), "")));
    }

    #[test]
    fn nearby_short_marker_text_is_detected() {
        assert!(is_required(&el(false, None, "必須")));
    }

    #[test]
    fn treat_all_as_required_only_when_no_signals_present() {
        let elements = vec![el(false, None, "optional"), el(false, None, "")];
        assert!(should_treat_all_as_required(&elements));
        let mixed = vec![el(true, None, ""), el(false, None, "")];
        assert!(!should_treat_all_as_required(&mixed));
    }
}
