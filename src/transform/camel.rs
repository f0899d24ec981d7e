//! Field-name normalization from camelCase to snake_case column names

/// Decode a camelCase field name into a lowercase, underscore-delimited name
///
/// A lone uppercase letter after a lowercase letter starts a new word. A run
/// of uppercase letters is a single acronym word, except that its last letter
/// starts the next word when a lowercase letter follows it.
///
/// # Example
///
/// ```
/// use data_warehouse_sync::transform::camel::decode_camel_case;
///
/// assert_eq!(decode_camel_case("camelsRUs"), "camels_r_us");
/// assert_eq!(decode_camel_case("HTTPRequest"), "http_request");
/// ```
pub fn decode_camel_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            let next = chars.get(i + 1).copied();
            let after_lower = prev.is_some_and(|p| p.is_lowercase());
            let ends_acronym =
                prev.is_some_and(|p| p.is_uppercase()) && next.is_some_and(|n| n.is_lowercase());
            if after_lower || ends_acronym {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// Column name for a field path of depth one or two
///
/// Nested object members are joined to their parent with a double underscore.
pub fn column_name(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| decode_camel_case(s))
        .collect::<Vec<_>>()
        .join("__")
}
