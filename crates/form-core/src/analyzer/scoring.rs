//! The scoring model (spec.md §4.1.2). Attribute + label/context text
//! hits, tag/type match, positional bonus, minus negative signals.

use super::field_patterns::FieldPattern;
use super::page::ElementSnapshot;

/// CJK-aware token-boundary check (spec.md §4.1.2, property P5).
/// ASCII tokens require a word boundary (no partial-word matches).
/// CJK tokens may match as part of a compound (氏名 in ご担当者氏名)
/// but single-character tokens that are common suffixes in unrelated
/// compounds are blocked by an explicit denylist of surrounding
/// characters, except where the token is itself known-safe to embed
/// (姓 inside 姓名).
pub fn contains_token_with_boundary(text: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    if token.is_ascii() {
        return contains_ascii_word(text, token);
    }
    contains_cjk_token(text, token)
}

fn contains_ascii_word(text: &str, token: &str) -> bool {
    let text_lower = text.to_lowercase();
    let token_lower = token.to_lowercase();
    let mut start = 0;
    while let Some(pos) = text_lower[start..].find(&token_lower) {
        let abs = start + pos;
        let before_ok = text_lower[..abs]
            .chars()
            .last()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_idx = abs + token_lower.len();
        let after_ok = text_lower[after_idx..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        start = abs + token_lower.len().max(1);
        if start >= text_lower.len() {
            break;
        }
    }
    false
}

/// Single CJK characters that are unsafe to match as a bare substring
/// because they appear as common suffixes in unrelated compounds
/// (spec.md §4.1.2: `名` must not match `マンション名`).
const UNSAFE_SINGLE_CHAR_TOKENS: &[&str] = &["名"];
/// Tokens explicitly allowed to embed even though they're single
/// characters (spec.md §4.1.2: `姓` is allowed to match `姓名`).
const SAFE_SINGLE_CHAR_OVERRIDES: &[(&str, &str)] = &[("姓", "姓名")];

fn contains_cjk_token(text: &str, token: &str) -> bool {
    if !text.contains(token) {
        return false;
    }
    let token_chars: Vec<char> = token.chars().collect();
    if token_chars.len() > 1 {
        return true;
    }
    if let Some((_, compound)) = SAFE_SINGLE_CHAR_OVERRIDES
        .iter()
        .find(|(t, _)| *t == token)
    {
        if text.contains(compound) {
            return true;
        }
    }
    if UNSAFE_SINGLE_CHAR_TOKENS.contains(&token) {
        // A bare single-char token is only accepted when it stands
        // alone (not embedded in a longer unrelated compound).
        return text.chars().eq(token_chars);
    }
    true
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreBreakdown {
    pub attribute_score: f64,
    pub label_score: f64,
    pub type_score: f64,
    pub position_score: f64,
    pub required_boost: f64,
    pub negative: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (self.attribute_score + self.label_score + self.type_score + self.position_score
            + self.required_boost
            - self.negative)
            .max(0.0)
    }
}

/// Cheap, attributes-only scoring used for the quick-rank pass (spec.md
/// §4.1.1 step 5 "Quick ranking" — constant time per element).
pub fn quick_score(el: &ElementSnapshot, pattern: &FieldPattern) -> f64 {
    let haystacks = [
        el.name.as_deref().unwrap_or(""),
        el.id.as_deref().unwrap_or(""),
        el.class.as_deref().unwrap_or(""),
        el.placeholder.as_deref().unwrap_or(""),
    ];
    let mut score = 0.0;
    for haystack in haystacks {
        for strict in pattern.strict_patterns {
            if contains_token_with_boundary(haystack, strict) {
                score += 30.0;
            }
        }
        for weak in pattern.weak_patterns {
            if contains_token_with_boundary(haystack, weak) {
                score += 10.0;
            }
        }
        for exclude in pattern.exclude_patterns {
            if contains_token_with_boundary(haystack, exclude) {
                score -= 50.0;
            }
        }
    }
    score
}

/// Full scoring combining attribute, label/context, type/tag, position
/// and required-boost signals (spec.md §4.1.1 step 5 "Full scoring").
pub fn full_score(el: &ElementSnapshot, pattern: &FieldPattern, is_required: bool) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown::default();
    breakdown.attribute_score = quick_score(el, pattern);

    if let Some(label) = &el.label_text {
        for strict in pattern.strict_patterns {
            if contains_token_with_boundary(label, strict) {
                breakdown.label_score += 35.0;
            }
        }
        for weak in pattern.weak_patterns {
            if contains_token_with_boundary(label, weak) {
                breakdown.label_score += 12.0;
            }
        }
    }
    for exclude in pattern.exclude_patterns {
        if contains_token_with_boundary(&el.context_text, exclude) {
            breakdown.negative += 60.0;
        }
    }

    if let Some(element_type) = &el.element_type {
        if pattern.accepted_types.contains(&element_type.as_str()) {
            breakdown.type_score += 20.0;
        }
    } else if pattern.accepted_types.contains(&"text") {
        breakdown.type_score += 10.0;
    }

    if let Some(bbox) = el.bounding_box {
        // Elements near the top of a form score marginally higher; a
        // coarse proxy for "appears before the fold".
        breakdown.position_score = (400.0 - bbox.y.min(400.0)) / 400.0 * 5.0;
    }

    if is_required {
        breakdown.required_boost = pattern.required_boost;
    }

    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p5_compound_embedding_matches() {
        assert!(contains_token_with_boundary("ご担当者氏名", "氏名"));
    }

    #[test]
    fn p5_unsafe_single_char_is_blocked() {
        assert!(!contains_token_with_boundary("マンション名", "名"));
    }

    #[test]
    fn p5_safe_single_char_override_matches() {
        assert!(contains_token_with_boundary("姓名", "姓"));
    }

    #[test]
    fn ascii_token_requires_word_boundary() {
        assert!(contains_token_with_boundary("contact_tel_number", "tel"));
        assert!(!contains_token_with_boundary("hotel_name", "tel"));
    }
}
