//! Post-processing on mappings (spec.md §4.1.1 step 6): split-field
//! promotions, kana/hiragana normalization, and the required-rescue
//! phase for anything still unmapped but flagged required.

use once_cell::sync::Lazy;
use regex::Regex;

use super::field_patterns;
use super::page::ElementSnapshot;
use super::required::is_required;
use super::scoring::full_score;
use super::types::{FieldSource, MappedField};

/// Full-width space, the safe default value for a required-rescue text
/// field (spec.md glossary "Required-rescue").
pub const FULL_WIDTH_SPACE: &str = "\u{3000}";

static PHONE_TRIPLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:tel|phone)[^\d]*([123])").unwrap());
static ZIP_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)zip|postal|郵便|〒|上3桁|下4桁").unwrap());

/// Drops `統合氏名` when split `姓`+`名` are both present, and the
/// analogous kana/hiragana collapse (spec.md §4.1.1 step 6).
pub fn drop_unified_when_split_present(mapped: &mut Vec<MappedField>) {
    let has = |name: &str| mapped.iter().any(|m| m.logical_name == name);
    if has("姓") && has("名") {
        mapped.retain(|m| m.logical_name != "統合氏名");
    }
    if has("姓カナ") && has("名カナ") {
        mapped.retain(|m| m.logical_name != "統合氏名カナ");
    }
}

/// Rejects 姓/名 matches whose context carries non-personal tokens
/// (spec.md §4.1.1 step 6).
pub fn reject_non_personal_sei_mei(mapped: &mut Vec<MappedField>) {
    const NON_PERSONAL: &[&str] = &["住所", "マンション名", "ふりがな", "部署"];
    mapped.retain(|m| {
        if m.logical_name != "姓" && m.logical_name != "名" {
            return true;
        }
        let context = m.best_context_text.as_deref().unwrap_or("");
        !NON_PERSONAL.iter().any(|token| context.contains(token))
    });
}

/// Phone triplet promotion (spec.md §4.1.1 step 6). Idempotent: if the
/// mapping already contains `電話番号1/2/3`, re-running has no effect.
pub fn promote_phone_triplet(mapped: &mut Vec<MappedField>, elements: &[ElementSnapshot]) {
    if mapped.iter().any(|m| m.logical_name.starts_with("電話番号")) {
        return;
    }
    let mut triplet: Vec<(u8, ElementSnapshot)> = Vec::new();
    for el in elements {
        let haystack = format!(
            "{} {} {}",
            el.name.as_deref().unwrap_or(""),
            el.id.as_deref().unwrap_or(""),
            el.class.as_deref().unwrap_or("")
        );
        if let Some(caps) = PHONE_TRIPLET_RE.captures(&haystack) {
            if let Ok(index) = caps[1].parse::<u8>() {
                triplet.push((index, el.clone()));
            }
        }
    }
    if triplet.len() != 3 {
        return;
    }
    triplet.sort_by_key(|(idx, _)| *idx);
    mapped.retain(|m| m.logical_name != "電話番号");
    for (idx, el) in triplet {
        mapped.push(MappedField {
            logical_name: format!("電話番号{idx}"),
            selector: el.selector,
            tag: el.tag,
            element_type: el.element_type,
            name: el.name,
            id: el.id,
            class: el.class,
            placeholder: el.placeholder,
            required: is_required(&el),
            score: 100.0,
            source: FieldSource::PromoteSplit,
            best_context_text: el.label_text,
        });
    }
}

/// Postal split promotion (spec.md §4.1.1 step 6): two adjacent
/// required zip-token inputs replace `郵便番号` with `郵便番号1/2`.
pub fn promote_postal_split(mapped: &mut Vec<MappedField>, elements: &[ElementSnapshot]) {
    if mapped.iter().any(|m| m.logical_name.starts_with("郵便番号")) {
        return;
    }
    let mut candidates: Vec<&ElementSnapshot> = elements
        .iter()
        .filter(|el| {
            let haystack = format!(
                "{} {} {}",
                el.name.as_deref().unwrap_or(""),
                el.id.as_deref().unwrap_or(""),
                el.class.as_deref().unwrap_or("")
            );
            ZIP_TOKEN_RE.is_match(&haystack) && is_required(el)
        })
        .collect();
    candidates.sort_by_key(|el| el.dom_index);
    if candidates.len() < 2 {
        return;
    }
    let adjacent = candidates.windows(2).find(|pair| {
        pair[1].dom_index.saturating_sub(pair[0].dom_index) <= 2
    });
    let Some(pair) = adjacent else { return };
    for (idx, el) in [pair[0], pair[1]].into_iter().enumerate() {
        mapped.push(MappedField {
            logical_name: format!("郵便番号{}", idx + 1),
            selector: el.selector.clone(),
            tag: el.tag.clone(),
            element_type: el.element_type.clone(),
            name: el.name.clone(),
            id: el.id.clone(),
            class: el.class.clone(),
            placeholder: el.placeholder.clone(),
            required: true,
            score: 100.0,
            source: FieldSource::PromoteSplit,
            best_context_text: el.label_text.clone(),
        });
    }
}

/// Shared address-token check used both to route a required-rescue
/// candidate towards `assign_supplementary_addresses` and, inside it,
/// to reject anything that slipped in non-address (spec.md §4.1.1 step
/// 6 "Multi-address").
fn looks_like_address(el: &ElementSnapshot) -> bool {
    let haystack = format!(
        "{} {}",
        el.name.as_deref().unwrap_or(""),
        el.label_text.as_deref().unwrap_or("")
    );
    haystack.contains("住所") || haystack.to_lowercase().contains("address")
}

/// Multi-address: additional required address-like inputs become
/// `住所_補助N` (spec.md §4.1.1 step 6). Called by `required_rescue`
/// for the candidates that matched an address token but lost `住所`
/// to an earlier candidate in the same pass.
pub fn assign_supplementary_addresses(
    mapped: &mut Vec<MappedField>,
    required_rescue_candidates: &[ElementSnapshot],
) {
    let mut n = 1;
    for el in required_rescue_candidates {
        if looks_like_address(el) {
            mapped.push(MappedField {
                logical_name: format!("住所_補助{n}"),
                selector: el.selector.clone(),
                tag: el.tag.clone(),
                element_type: el.element_type.clone(),
                name: el.name.clone(),
                id: el.id.clone(),
                class: el.class.clone(),
                placeholder: el.placeholder.clone(),
                required: true,
                score: 70.0,
                source: FieldSource::RequiredRescue,
                best_context_text: el.label_text.clone(),
            });
            n += 1;
        }
    }
}

/// Tokens that disqualify an otherwise-required element from the
/// rescue phase entirely; these go to the unmapped handlers instead
/// (spec.md §4.1.1 step 6).
fn is_rescue_excluded(el: &ElementSnapshot) -> bool {
    let haystack = format!(
        "{} {} {}",
        el.name.as_deref().unwrap_or(""),
        el.id.as_deref().unwrap_or(""),
        el.class.as_deref().unwrap_or("")
    )
    .to_lowercase();
    el.tag.eq_ignore_ascii_case("select")
        || el.element_type.as_deref() == Some("radio")
        || el.element_type.as_deref() == Some("checkbox")
        || haystack.contains("captcha")
        || haystack.contains("confirm")
        || haystack.contains("token")
        || haystack.contains("otp")
        || haystack.contains("verification")
}

/// Logical names a required-rescue candidate is checked against, in
/// this order, before falling back to `auto_required_text_N` (spec.md
/// §4.1.1 step 6 "Required-rescue phase": "infer a logical name
/// (メールアドレス/電話番号/お問い合わせ本文/郵便番号/住所/name-family-given/kana)
/// with the same attribute+context heuristics").
const RESCUE_INFERENCE_ORDER: &[&str] =
    &["メールアドレス", "電話番号", "お問い合わせ本文", "郵便番号", "住所", "姓", "名", "姓カナ", "名カナ"];

/// Scores `el` against the same `FieldPattern`/`full_score` the normal
/// mapping pass uses, reusing its attribute+label/context heuristics
/// rather than inventing a parallel set for the rescue phase.
fn matches_field_pattern(el: &ElementSnapshot, name: &str) -> bool {
    field_patterns::lookup(name)
        .map(|pattern| full_score(el, pattern, true).total() > 0.0)
        .unwrap_or(false)
}

/// Picks the first still-unclaimed logical name in `RESCUE_INFERENCE_ORDER`
/// that `el` scores a hit against.
fn infer_rescue_logical_name(el: &ElementSnapshot, mapped: &[MappedField]) -> Option<&'static str> {
    RESCUE_INFERENCE_ORDER
        .iter()
        .copied()
        .find(|name| !mapped.iter().any(|m| m.logical_name == *name) && matches_field_pattern(el, name))
}

/// Second-chance mapping for required visible inputs nothing else
/// matched (spec.md §4.1.1 step 6 "Required-rescue phase"). Each
/// candidate first gets a logical-name inference pass; a second
/// address-like input that lost `住所` to an earlier candidate becomes
/// `住所_補助N` via `assign_supplementary_addresses`. Only a candidate
/// that fits no logical name at all gets `auto_required_text_N` with a
/// full-width-space default value (spec.md seed scenario 7).
pub fn required_rescue(
    mapped: &mut Vec<MappedField>,
    elements: &[ElementSnapshot],
) {
    let consumed: Vec<String> = mapped.iter().map(|m| m.selector.clone()).collect();
    let candidates: Vec<ElementSnapshot> = elements
        .iter()
        .filter(|el| el.visible && is_required(el))
        .filter(|el| !consumed.contains(&el.selector))
        .filter(|el| !is_rescue_excluded(el))
        .cloned()
        .collect();

    let mut rescue_n = 1;
    let mut supplementary_address_candidates = Vec::new();
    for el in &candidates {
        if let Some(logical_name) = infer_rescue_logical_name(el, mapped) {
            mapped.push(MappedField {
                logical_name: logical_name.to_string(),
                selector: el.selector.clone(),
                tag: el.tag.clone(),
                element_type: el.element_type.clone(),
                name: el.name.clone(),
                id: el.id.clone(),
                class: el.class.clone(),
                placeholder: el.placeholder.clone(),
                required: true,
                score: 60.0,
                source: FieldSource::RequiredRescue,
                best_context_text: el.label_text.clone(),
            });
            continue;
        }
        if looks_like_address(el) {
            supplementary_address_candidates.push(el.clone());
            continue;
        }
        mapped.push(MappedField {
            logical_name: format!("auto_required_text_{rescue_n}"),
            selector: el.selector.clone(),
            tag: el.tag.clone(),
            element_type: el.element_type.clone(),
            name: el.name.clone(),
            id: el.id.clone(),
            class: el.class.clone(),
            placeholder: el.placeholder.clone(),
            required: true,
            score: 50.0,
            source: FieldSource::RequiredRescue,
            best_context_text: el.label_text.clone(),
        });
        rescue_n += 1;
    }
    assign_supplementary_addresses(mapped, &supplementary_address_candidates);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tel(name: &str, selector: &str, dom_index: usize) -> ElementSnapshot {
        ElementSnapshot {
            selector: selector.to_string(),
            tag: "input".to_string(),
            element_type: Some("tel".to_string()),
            name: Some(name.to_string()),
            required: true,
            dom_index,
            ..Default::default()
        }
    }

    #[test]
    fn phone_triplet_promotion_replaces_single_field() {
        let elements = vec![tel("tel1", "#t1", 0), tel("tel2", "#t2", 1), tel("tel3", "#t3", 2)];
        let mut mapped = vec![MappedField {
            logical_name: "電話番号".to_string(),
            selector: "#t1".to_string(),
            tag: "input".to_string(),
            element_type: Some("tel".to_string()),
            name: None,
            id: None,
            class: None,
            placeholder: None,
            required: true,
            score: 80.0,
            source: FieldSource::Normal,
            best_context_text: None,
        }];
        promote_phone_triplet(&mut mapped, &elements);
        assert!(mapped.iter().any(|m| m.logical_name == "電話番号1"));
        assert!(mapped.iter().any(|m| m.logical_name == "電話番号2"));
        assert!(mapped.iter().any(|m| m.logical_name == "電話番号3"));
        assert!(!mapped.iter().any(|m| m.logical_name == "電話番号"));
    }

    #[test]
    fn phone_triplet_promotion_is_idempotent() {
        let elements = vec![tel("tel1", "#t1", 0), tel("tel2", "#t2", 1), tel("tel3", "#t3", 2)];
        let mut mapped = Vec::new();
        promote_phone_triplet(&mut mapped, &elements);
        let once = mapped.len();
        promote_phone_triplet(&mut mapped, &elements);
        assert_eq!(mapped.len(), once);
    }

    #[test]
    fn required_rescue_assigns_full_width_space_default() {
        let mut mapped = Vec::new();
        let elements = vec![ElementSnapshot {
            selector: "#note".to_string(),
            tag: "input".to_string(),
            element_type: Some("text".to_string()),
            name: Some("note_any".to_string()),
            required: true,
            visible: true,
            ..Default::default()
        }];
        required_rescue(&mut mapped, &elements);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].logical_name, "auto_required_text_1");
    }

    #[test]
    fn required_rescue_infers_email_instead_of_falling_back() {
        let mut mapped = Vec::new();
        let elements = vec![ElementSnapshot {
            selector: "#contact_mail".to_string(),
            tag: "input".to_string(),
            element_type: Some("email".to_string()),
            name: Some("contact_mail".to_string()),
            required: true,
            visible: true,
            ..Default::default()
        }];
        required_rescue(&mut mapped, &elements);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].logical_name, "メールアドレス");
    }

    #[test]
    fn required_rescue_routes_second_address_to_supplementary() {
        let mut mapped = vec![MappedField {
            logical_name: "住所".to_string(),
            selector: "#addr1".to_string(),
            tag: "input".to_string(),
            element_type: Some("text".to_string()),
            name: Some("address".to_string()),
            id: None,
            class: None,
            placeholder: None,
            required: true,
            score: 80.0,
            source: FieldSource::Normal,
            best_context_text: None,
        }];
        let elements = vec![ElementSnapshot {
            selector: "#addr2".to_string(),
            tag: "input".to_string(),
            element_type: Some("text".to_string()),
            name: Some("address_line2".to_string()),
            required: true,
            visible: true,
            ..Default::default()
        }];
        required_rescue(&mut mapped, &elements);
        assert!(mapped.iter().any(|m| m.logical_name == "住所_補助1"));
        assert!(!mapped.iter().any(|m| m.logical_name.starts_with("auto_required_text_")));
    }
}
