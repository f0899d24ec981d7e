//! Column name decoding tests

use data_warehouse_sync::decode_camel_case;
use data_warehouse_sync::transform::camel::column_name;

const CASES: &[(&str, &str)] = &[
    ("", ""),
    ("c", "c"),
    ("C", "c"),
    ("cc", "cc"),
    ("cC", "c_c"),
    ("Cc", "cc"),
    ("CC", "cc"),
    ("ccC", "cc_c"),
    ("cCc", "c_cc"),
    ("cCC", "c_cc"),
    ("Ccc", "ccc"),
    ("CcC", "cc_c"),
    ("CCc", "c_cc"),
    ("CCC", "ccc"),
    ("camelCase", "camel_case"),
    ("CamelCase", "camel_case"),
    ("CAMELCASE", "camelcase"),
    ("camelsRUs", "camels_r_us"),
    ("userID", "user_id"),
    ("IDNumber", "id_number"),
    ("HTTPRequest", "http_request"),
    ("snake_case", "snake_case"),
];

#[test]
fn test_decode_camel_case_table() {
    for (input, expected) in CASES {
        assert_eq!(
            decode_camel_case(input),
            *expected,
            "decoding {:?}",
            input
        );
    }
}

#[test]
fn test_decoding_is_idempotent() {
    for (_, expected) in CASES {
        assert_eq!(decode_camel_case(expected), *expected);
    }
}

#[test]
fn test_nested_column_names() {
    assert_eq!(column_name(&["patronGroup"]), "patron_group");
    assert_eq!(
        column_name(&["personal", "preferredContactTypeId"]),
        "personal__preferred_contact_type_id"
    );
    assert_eq!(column_name(&["metadata", "updatedByUserId"]), "metadata__updated_by_user_id");
}
