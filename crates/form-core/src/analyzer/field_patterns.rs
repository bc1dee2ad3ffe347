//! Table-driven logical field descriptors (spec.md §9 "Dynamic
//! dispatch in field patterns" — modeled as a tagged variant with a
//! pattern descriptor, not subclass polymorphism).

/// Accepted element shape for a logical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptedTag {
    Input,
    Textarea,
    Select,
}

/// The static descriptor a logical field is scored against (spec.md
/// §4.1.1 step 5 "Candidate selection").
#[derive(Debug, Clone)]
pub struct FieldPattern {
    pub name: &'static str,
    pub accepted_tags: &'static [AcceptedTag],
    pub accepted_types: &'static [&'static str],
    pub strict_patterns: &'static [&'static str],
    pub weak_patterns: &'static [&'static str],
    pub exclude_patterns: &'static [&'static str],
    pub essential: bool,
    pub base_threshold: f64,
    pub required_boost: f64,
}

pub const ESSENTIAL_FIELDS: &[&str] = &["メールアドレス", "お問い合わせ本文", "統合氏名", "統合氏名カナ"];

/// High-priority optionals get `base + 10` instead of the stricter
/// optional threshold (spec.md §4.1.1 step 5 "Dynamic quality
/// threshold").
pub const HIGH_PRIORITY_OPTIONALS: &[&str] = &["件名", "電話番号", "住所"];

pub static FIELD_PATTERNS: &[FieldPattern] = &[
    FieldPattern {
        name: "メールアドレス",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["email", "text"],
        strict_patterns: &["mail", "email", "メール", "e-mail"],
        weak_patterns: &["contact"],
        exclude_patterns: &["confirm", "確認", "mail2", "re_mail", "re-mail"],
        essential: true,
        base_threshold: 60.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "お問い合わせ本文",
        accepted_tags: &[AcceptedTag::Textarea, AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["message", "inquiry", "body", "content", "本文", "お問い合わせ", "ご相談"],
        weak_patterns: &["comment", "detail", "詳細"],
        exclude_patterns: &["subject", "件名"],
        essential: true,
        base_threshold: 55.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "統合氏名",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["name", "fullname", "full_name", "お名前", "氏名"],
        weak_patterns: &["your_name"],
        exclude_patterns: &["company", "会社", "kana", "カナ", "furigana"],
        essential: true,
        base_threshold: 60.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "統合氏名カナ",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["kana", "furigana", "カナ", "フリガナ"],
        weak_patterns: &["yomigana"],
        exclude_patterns: &["hiragana", "ひらがな"],
        essential: true,
        base_threshold: 60.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "姓",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["sei", "last_name", "lastname", "family", "姓"],
        weak_patterns: &["name1"],
        exclude_patterns: &["住所", "マンション名", "ふりがな", "部署", "kana"],
        essential: false,
        base_threshold: 80.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "名",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["mei", "first_name", "firstname", "given", "名"],
        weak_patterns: &["name2"],
        exclude_patterns: &["住所", "マンション名", "ふりがな", "部署", "kana", "会社"],
        essential: false,
        base_threshold: 80.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "姓カナ",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["sei_kana", "last_kana", "セイ", "姓カナ"],
        weak_patterns: &[],
        exclude_patterns: &["ひらがな", "hiragana"],
        essential: false,
        base_threshold: 75.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "名カナ",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["mei_kana", "first_kana", "メイ", "名カナ"],
        weak_patterns: &[],
        exclude_patterns: &["ひらがな", "hiragana"],
        essential: false,
        base_threshold: 75.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "件名",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["subject", "title", "件名", "題名"],
        weak_patterns: &[],
        exclude_patterns: &["本文"],
        essential: false,
        base_threshold: 65.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "電話番号",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["tel", "text"],
        strict_patterns: &["tel", "phone", "電話"],
        weak_patterns: &["mobile"],
        exclude_patterns: &["fax"],
        essential: false,
        base_threshold: 60.0,
        required_boost: 200.0,
    },
    FieldPattern {
        name: "郵便番号",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["zip", "postal", "郵便"],
        weak_patterns: &["〒"],
        exclude_patterns: &["confirm", "captcha"],
        essential: false,
        base_threshold: 65.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "住所",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["address", "住所"],
        weak_patterns: &["addr"],
        exclude_patterns: &["email"],
        essential: false,
        base_threshold: 60.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "都道府県",
        accepted_tags: &[AcceptedTag::Select, AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["prefecture", "pref", "都道府県"],
        weak_patterns: &[],
        exclude_patterns: &[],
        essential: false,
        base_threshold: 70.0,
        required_boost: 40.0,
    },
    FieldPattern {
        name: "会社名",
        accepted_tags: &[AcceptedTag::Input],
        accepted_types: &["text"],
        strict_patterns: &["company", "corp", "会社"],
        weak_patterns: &["organization"],
        exclude_patterns: &[],
        essential: false,
        base_threshold: 65.0,
        required_boost: 40.0,
    },
];

pub fn lookup(name: &str) -> Option<&'static FieldPattern> {
    FIELD_PATTERNS.iter().find(|p| p.name == name)
}

pub fn is_essential(name: &str) -> bool {
    ESSENTIAL_FIELDS.contains(&name)
}

pub fn threshold_for(pattern: &FieldPattern, all_essentials_mapped: bool) -> f64 {
    if pattern.essential {
        pattern.base_threshold
    } else if HIGH_PRIORITY_OPTIONALS.contains(&pattern.name) {
        pattern.base_threshold + 10.0
    } else if all_essentials_mapped {
        pattern.base_threshold + 15.0
    } else {
        pattern.base_threshold
    }
}
