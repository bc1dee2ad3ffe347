//! The DOM capability surface the analyzer needs (spec.md §4.1 "Public
//! contract"). A real implementation backs this with `playwright`
//! locators; tests back it with an in-memory snapshot.

use serde::{Deserialize, Serialize};

/// A single queryable element, already snapshotted. The analyzer works
/// entirely off these snapshots (spec.md §9 "Element identity is by
/// stable selector + attribute tuple; no ownership edges are stored").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementSnapshot {
    pub selector: String,
    pub tag: String,
    pub element_type: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
    pub placeholder: Option<String>,
    pub required: bool,
    pub aria_required: bool,
    pub value: Option<String>,
    pub visible: bool,
    pub enabled: bool,
    pub bounding_box: Option<BoundingBox>,
    /// Text gathered from `<label for>`, wrapping `<label>`, preceding
    /// `<th>`/`<dt>`, `aria-labelledby`, in that preference order.
    pub label_text: Option<String>,
    /// Text from ancestors/siblings within a small radius, used for
    /// required-marker and token-boundary checks.
    pub context_text: String,
    /// For `<select>`, the option `(value, text)` pairs in document
    /// order.
    pub options: Vec<(String, String)>,
    /// DOM document order index, used for adjacency checks (postal/tel
    /// split promotion).
    pub dom_index: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A form's bounding box plus the elements captured within it, already
/// scrolled-into and snapshotted (spec.md §4.1.1 step 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub elements: Vec<ElementSnapshot>,
    pub form_bounding_box: Option<BoundingBox>,
    /// Raw extracted page text, used by the prohibition detector
    /// (spec.md §4.2.6) and bounded per spec's caps by the caller.
    pub page_text_samples: Vec<String>,
}

/// The live DOM handle the analyzer is given. A thin capability trait
/// so the analyzer never depends on a concrete browser binding; the
/// worker binary supplies a `playwright`-backed implementation.
pub trait PageHandle {
    fn snapshot(&self) -> PageSnapshot;
}

/// An in-memory `PageHandle` for tests: the snapshot is fixed at
/// construction time, mirroring how the teacher's tool tests construct
/// canned `scraper::Html` fixtures instead of driving a real browser.
pub struct StaticPage(pub PageSnapshot);

impl PageHandle for StaticPage {
    fn snapshot(&self) -> PageSnapshot {
        self.0.clone()
    }
}
