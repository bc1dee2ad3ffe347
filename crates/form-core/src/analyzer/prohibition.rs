//! Sales-prohibition text detection (spec.md §4.2.6). Runs against raw
//! page HTML — used both as the orchestrator's pre-dispatch filter
//! (§4.2.2) and, if surfaced, in the analyzer's own result.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::analyzer::types::{ProhibitionFinding, Severity};

const TEXT_TAGS: &[&str] = &[
    "body", "main", "div", "p", "span", "section", "article", "form", "fieldset", "legend", "label",
    "small", "em", "strong",
];
const MAX_PER_TAG: usize = 50;
const MAX_TEXT_LEN: usize = 500;
const MIN_MATCH_LEN: usize = 5;

static DIRECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"営業(?:電話|メール)?はお断り",
        r"営業の方はお断り",
        r"セールス.{0,5}お断り",
        r"sales (?:calls|emails)? not welcome",
        r"no sales (?:calls|pitches)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static INDIRECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"売り込み.{0,5}ご遠慮", r"勧誘.{0,5}お断り", r"unsolicited (?:offers|pitches)"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});
static CONDITIONAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"内容によってはお答え.{0,10}できません", r"ご了承ください"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});
static ATTENTION_WORDS: &[&str] = &["注意", "お断り", "ご注意", "警告"];

fn category_weight(direct: bool, indirect: bool) -> f64 {
    if direct {
        1.0
    } else if indirect {
        0.6
    } else {
        0.35
    }
}

fn element_weight(tag: &str) -> f64 {
    match tag {
        "strong" | "em" | "legend" => 1.2,
        "form" | "fieldset" => 1.1,
        _ => 1.0,
    }
}

/// Extracts capped text samples from the document (spec.md §4.2.6
/// "Collect text from ... capped at 50 per tag, 500 chars per
/// extracted text, >=5 char matches only").
fn extract_text_samples(html: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let mut samples = Vec::new();
    for tag in TEXT_TAGS {
        let Ok(selector) = Selector::parse(tag) else { continue };
        for el in document.select(&selector).take(MAX_PER_TAG) {
            let mut text: String = el.text().collect::<Vec<_>>().join(" ");
            text.truncate(MAX_TEXT_LEN);
            let text = text.trim().to_string();
            if text.chars().count() >= MIN_MATCH_LEN {
                samples.push((tag.to_string(), text));
            }
        }
    }
    samples
}

fn classify_severity(findings: &[ProhibitionFinding]) -> Severity {
    let direct_count = findings.iter().filter(|f| f.score >= 0.9).count();
    let max_conf = findings.iter().map(|f| f.score).fold(0.0_f64, f64::max);
    if direct_count >= 2 || max_conf >= 0.9 {
        Severity::Strict
    } else if direct_count >= 1 || max_conf >= 0.8 {
        Severity::Moderate
    } else if findings.len() >= 2 || max_conf >= 0.7 {
        Severity::Mild
    } else {
        Severity::Weak
    }
}

/// Runs the ordered pattern lists over extracted text samples,
/// deduping by normalized text (spec.md §4.2.6).
pub fn detect(html: &str) -> Vec<ProhibitionFinding> {
    let mut findings = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (tag, text) in extract_text_samples(html) {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join("");
        if !seen.insert(normalized) {
            continue;
        }
        let is_direct = DIRECT_PATTERNS.iter().any(|re| re.is_match(&text));
        let is_indirect = INDIRECT_PATTERNS.iter().any(|re| re.is_match(&text));
        let is_conditional = CONDITIONAL_PATTERNS.iter().any(|re| re.is_match(&text));
        if !is_direct && !is_indirect && !is_conditional {
            continue;
        }
        let marker_present = if is_direct || is_indirect { 1.0 } else { 0.5 };
        let attention_boost = ATTENTION_WORDS.iter().filter(|w| text.contains(*w)).count() as f64 * 0.05;
        let score = (category_weight(is_direct, is_indirect) * element_weight(&tag) * marker_present
            + attention_boost)
            .min(1.0);
        findings.push(ProhibitionFinding {
            matched_text: text,
            score,
            severity: Severity::Weak,
        });
    }

    let severity = classify_severity(&findings);
    for finding in &mut findings {
        finding.severity = severity;
    }
    findings
}

pub fn is_prohibited(html: &str) -> bool {
    !detect(html).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_1_direct_prohibition_phrase_is_detected() {
        let html = r#"<html><body><p>営業電話はお断り致します</p></body></html>"#;
        assert!(is_prohibited(html));
    }

    #[test]
    fn benign_page_has_no_findings() {
        let html = r#"<html><body><p>お問い合わせフォームです</p></body></html>"#;
        assert!(!is_prohibited(html));
    }

    #[test]
    fn duplicate_text_is_deduped() {
        let html = r#"<html><body><p>営業電話はお断り致します</p><div>営業電話はお断り致します</div></body></html>"#;
        let findings = detect(html);
        assert_eq!(findings.len(), 1);
    }
}
