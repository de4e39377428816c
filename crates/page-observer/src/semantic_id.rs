//! Stable semantic identifiers for cataloged elements.
//!
//! The hash covers the identity-like attributes of an element so the same
//! control keeps the same id across re-observations of an unchanged page,
//! while index-churn (reordering, insertion of unrelated nodes) does not
//! disturb it.

use std::collections::HashMap;

use crate::model::RawElement;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the given byte slices, separator-delimited.
fn fnv1a(parts: &[&str]) -> u32 {
    let mut hash = FNV_OFFSET;
    for part in parts {
        for byte in part.bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // Field separator keeps ("ab","c") distinct from ("a","bc").
        hash ^= 0x1f;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// First 20 non-digit characters of the element text, the part of a label
/// that tends to survive counters and timestamps.
fn text_prefix(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_digit()).take(20).collect()
}

/// Semantic hash of one element, 8 lowercase hex chars.
pub fn semantic_hash(element: &RawElement) -> String {
    let text = element.text.as_deref().unwrap_or("");
    let parts = [
        element.tag.as_str(),
        element.test_id.as_deref().unwrap_or(""),
        element.role.as_deref().unwrap_or(""),
        element.input_type.as_deref().unwrap_or(""),
        element.placeholder.as_deref().unwrap_or(""),
        element.name.as_deref().unwrap_or(""),
        element.aria_label.as_deref().unwrap_or(""),
        &text_prefix(text),
    ];
    format!("{:08x}", fnv1a(&parts))
}

/// Assigns `<tag>-<hash8>-<occurrence>` ids, disambiguating hash collisions
/// within one observation by ascending occurrence index.
#[derive(Default)]
pub struct IdAllocator {
    seen: HashMap<String, usize>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, element: &RawElement) -> String {
        let hash = semantic_hash(element);
        let key = format!("{}-{}", element.tag, hash);
        let occurrence = self.seen.entry(key.clone()).or_insert(0);
        *occurrence += 1;
        format!("{}-{}", key, occurrence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, text: Option<&str>) -> RawElement {
        RawElement {
            index: 0,
            tag: tag.to_string(),
            test_id: None,
            role: Some("button".to_string()),
            input_type: None,
            placeholder: None,
            name: None,
            aria_label: None,
            title_attr: None,
            alt: None,
            text: text.map(|t| t.to_string()),
            dom_id: None,
            xpath: "/html/body[1]".to_string(),
            frame_chain: vec![],
            in_viewport: true,
            scrollable: false,
            sensitive: false,
            cx: 0.0,
            cy: 0.0,
            test_id_count: 0,
            placeholder_count: 0,
            text_count: 1,
        }
    }

    #[test]
    fn hash_is_stable_for_identical_attributes() {
        let a = element("button", Some("Login"));
        let b = element("button", Some("Login"));
        assert_eq!(semantic_hash(&a), semantic_hash(&b));
    }

    #[test]
    fn hash_ignores_digits_in_text() {
        let a = element("button", Some("Cart (3)"));
        let b = element("button", Some("Cart (14)"));
        assert_eq!(semantic_hash(&a), semantic_hash(&b));
    }

    #[test]
    fn hash_distinguishes_labels() {
        let a = element("button", Some("Login"));
        let b = element("button", Some("Logout"));
        assert_ne!(semantic_hash(&a), semantic_hash(&b));
    }

    #[test]
    fn allocator_numbers_collisions() {
        let mut alloc = IdAllocator::new();
        let a = element("button", Some("Buy"));
        let b = element("button", Some("Buy"));
        let first = alloc.allocate(&a);
        let second = alloc.allocate(&b);
        assert!(first.ends_with("-1"));
        assert!(second.ends_with("-2"));
        assert_eq!(&first[..first.len() - 2], &second[..second.len() - 2]);
    }

    #[test]
    fn id_format_is_tag_hash_occurrence() {
        let mut alloc = IdAllocator::new();
        let id = alloc.allocate(&element("button", Some("Login")));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "button");
        assert_eq!(parts[1].len(), 8);
        assert!(u32::from_str_radix(parts[1], 16).is_ok());
        assert_eq!(parts[2], "1");
    }
}
