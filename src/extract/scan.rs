//! Structural scan for empty pages
//!
//! Deciding whether paging is finished does not need a full parse. The scan
//! walks the page bytes, skipping string contents, until it reaches the first
//! array at the top structural level, and reports whether that array has an
//! element.

/// Whether the first top-level array of a page holds at least one element
///
/// A page without any top-level array is treated as empty.
pub fn has_records(page: &[u8]) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut bytes = page.iter().enumerate();

    while let Some((index, &b)) = bytes.next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' if depth <= 1 => return first_element_present(&page[index + 1..]),
            b'[' | b'{' => depth += 1,
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    false
}

fn first_element_present(rest: &[u8]) -> bool {
    rest.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b != b']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_records() {
        assert!(has_records(br#"{"users": [{"id": "a"}], "totalRecords": 1}"#));
        assert!(!has_records(br#"{"users": [], "totalRecords": 0}"#));
        assert!(!has_records(b"{\"users\": [ \n\t ], \"totalRecords\": 0}"));
    }

    #[test]
    fn test_bare_array() {
        assert!(has_records(br#"[{"id": "a"}]"#));
        assert!(!has_records(b"[]"));
    }

    #[test]
    fn test_nested_arrays_ignored() {
        assert!(!has_records(
            br#"{"resultInfo": {"facets": [1, 2]}, "items": []}"#
        ));
        assert!(has_records(
            br#"{"resultInfo": {"facets": []}, "items": [{"id": "x"}]}"#
        ));
    }

    #[test]
    fn test_brackets_in_strings_ignored() {
        assert!(!has_records(br#"{"note": "[x] \"[y]\"", "items": []}"#));
    }

    #[test]
    fn test_no_array_is_empty() {
        assert!(!has_records(br#"{"totalRecords": 0}"#));
        assert!(!has_records(b""));
    }
}
