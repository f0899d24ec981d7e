//! Static table catalog
//!
//! Each synchronized table is an immutable [`TableSpec`] in one flat list.

use serde::Serialize;

pub mod naming;

pub use naming::TableNames;

/// How a table's data is retrieved and which columns it keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Paginated REST endpoint
    PagedApi,
    /// Only available by direct query against the source database
    DirectOnly,
    /// MARC source records; only `id` is a column
    MarcRecords,
    /// Record-parsing errors; only `id` and `description` are columns
    ErrorRecords,
    /// Notes endpoint, which rejects the query parameter
    Notes,
}

impl SourceKind {
    /// Column names kept by restricted kinds; `None` keeps all inferred columns
    pub fn retained_columns(&self) -> Option<&'static [&'static str]> {
        match self {
            SourceKind::MarcRecords => Some(&["id"]),
            SourceKind::ErrorRecords => Some(&["id", "description"]),
            _ => None,
        }
    }

    /// Field holding the record id when `id` is absent
    pub fn id_fallback(&self) -> Option<&'static str> {
        match self {
            SourceKind::MarcRecords => Some("recordId"),
            _ => None,
        }
    }

    /// Whether page requests carry the `query` parameter
    pub fn sends_query(&self) -> bool {
        !matches!(self, SourceKind::Notes)
    }
}

/// Nulling of `...Object`/`...Objects` container fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectFilter {
    /// No filtering
    None,
    /// Null every matching field
    All,
    /// Null every matching field except the one at this path
    Except(&'static str),
}

/// Descriptor of one synchronized table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    /// Warehouse table name
    pub name: &'static str,
    /// API path of the paged endpoint
    pub source: &'static str,
    /// `schema.table` in the source database, relative to the tenant prefix
    pub direct_source: Option<&'static str>,
    /// Whether the field drop policy applies
    pub anonymize: bool,
    pub kind: SourceKind,
    pub object_filter: ObjectFilter,
}

const fn paged(name: &'static str, source: &'static str) -> TableSpec {
    TableSpec {
        name,
        source,
        direct_source: None,
        anonymize: false,
        kind: SourceKind::PagedApi,
        object_filter: ObjectFilter::None,
    }
}

const fn personal(name: &'static str, source: &'static str) -> TableSpec {
    TableSpec {
        anonymize: true,
        ..paged(name, source)
    }
}

const fn with_direct(spec: TableSpec, direct_source: &'static str) -> TableSpec {
    TableSpec {
        direct_source: Some(direct_source),
        ..spec
    }
}

const fn of_kind(spec: TableSpec, kind: SourceKind) -> TableSpec {
    TableSpec { kind, ..spec }
}

const fn filtered(spec: TableSpec, object_filter: ObjectFilter) -> TableSpec {
    TableSpec {
        object_filter,
        ..spec
    }
}

/// All tables known to the synchronizer, in processing order
pub static CATALOG: &[TableSpec] = &[
    filtered(
        personal("audit_circulation_logs", "/audit-data/circulation/logs"),
        ObjectFilter::Except("/itemsObjects"),
    ),
    filtered(
        personal("circulation_loans", "/loan-storage/loans"),
        ObjectFilter::All,
    ),
    paged("circulation_loan_policies", "/loan-policy-storage/loan-policies"),
    filtered(
        personal("circulation_requests", "/request-storage/requests"),
        ObjectFilter::All,
    ),
    paged("circulation_service_points", "/service-points"),
    personal("feesfines_accounts", "/accounts"),
    paged("feesfines_feefines", "/feefines"),
    paged("finance_budgets", "/finance-storage/budgets"),
    paged("finance_funds", "/finance-storage/funds"),
    paged("finance_transactions", "/finance-storage/transactions"),
    of_kind(
        with_direct(
            paged("inventory_bound_with_parts", ""),
            "mod_inventory_storage.bound_with_part",
        ),
        SourceKind::DirectOnly,
    ),
    with_direct(
        paged("inventory_holdings", "/holdings-storage/holdings"),
        "mod_inventory_storage.holdings_record",
    ),
    with_direct(
        paged("inventory_instances", "/instance-storage/instances"),
        "mod_inventory_storage.instance",
    ),
    with_direct(
        paged("inventory_items", "/item-storage/items"),
        "mod_inventory_storage.item",
    ),
    paged("inventory_loan_types", "/loan-types"),
    paged("inventory_locations", "/locations"),
    paged("inventory_material_types", "/material-types"),
    of_kind(paged("notes", "/notes"), SourceKind::Notes),
    personal("organization_organizations", "/organizations-storage/organizations"),
    paged("po_lines", "/orders-storage/po-lines"),
    paged("po_purchase_orders", "/orders-storage/purchase-orders"),
    of_kind(
        paged("srs_error", "/source-storage/error-records"),
        SourceKind::ErrorRecords,
    ),
    of_kind(
        paged("srs_marc", "/source-storage/records"),
        SourceKind::MarcRecords,
    ),
    paged("user_groups", "/groups"),
    personal("user_users", "/users"),
];

/// Look up a table by name
pub fn find(name: &str) -> Option<&'static TableSpec> {
    CATALOG.iter().find(|t| t.name == name)
}

/// Tables selected by an optional allow-list, in catalog order
pub fn select(allow: &[String]) -> Vec<&'static TableSpec> {
    CATALOG
        .iter()
        .filter(|t| allow.is_empty() || allow.iter().any(|a| a == t.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_unique() {
        let names: HashSet<_> = CATALOG.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn test_direct_only_tables_have_direct_source() {
        for table in CATALOG {
            if table.kind == SourceKind::DirectOnly {
                assert!(table.direct_source.is_some(), "{}", table.name);
            } else {
                assert!(table.source.starts_with('/'), "{}", table.name);
            }
        }
    }

    #[test]
    fn test_find_and_select() {
        assert_eq!(find("user_users").unwrap().source, "/users");
        assert!(find("nope").is_none());
        assert_eq!(select(&[]).len(), CATALOG.len());
        let picked = select(&["notes".to_string(), "srs_marc".to_string()]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].kind, SourceKind::Notes);
    }

    #[test]
    fn test_kind_rules() {
        assert_eq!(SourceKind::MarcRecords.id_fallback(), Some("recordId"));
        assert_eq!(SourceKind::PagedApi.id_fallback(), None);
        assert!(!SourceKind::Notes.sends_query());
        assert!(SourceKind::PagedApi.retained_columns().is_none());
    }
}
