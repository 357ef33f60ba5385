//! Integration tests for table extraction

use kpigraph_core::{parse_tables, Config, DiagnosticCode};
use kpigraph_extract::KpiExtractor;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

const REPORT_TABLES: &str = r#"
{"table_id":"VW2022_T1","doc_id":"VW2022","year":2022,"page":14,"section_name":"SALES REVENUE","title":"Sales revenue by brand","header_rows":[["€ million","2022","2021"]],"rows":[["Audi","61,753","55,914"],["Porsche AG","37,630","33,138"]]}
{"table_id":"VW2022_T2","doc_id":"VW2022","year":2022,"page":15,"section_name":"Brands","title":"AUDI – KEY FIGURES","header_rows":[["","Deliveries","","Return on sales",""],["","2022","2021","2022","2021"]],"rows":[["Audi","1,614","1,681","13.3 %","10.8 %"],["","","","",""]]}
{"table_id":"VW2022_T3","doc_id":"VW2022","page":16,"section_name":"Operating result","title":"","merged_headers":["","2022","2021","%"],"rows":[["Audi AG","–233","(120)","n.m."]]}
{"table_id":"VW2022_T4","doc_id":"VW2022","page":17,"section_name":"Notes","title":"Employees","header_rows":[["","Headcount"]],"rows":[["Wolfsburg","61,000"]]}
"#;

fn extract_all() -> Vec<kpigraph_extract::TableExtraction> {
    let extractor = KpiExtractor::new(&Config::default());
    parse_tables(REPORT_TABLES)
        .unwrap()
        .iter()
        .map(|table| extractor.extract_table(table))
        .collect()
}

#[test]
fn brand_table_yields_one_node_per_year() {
    let results = extract_all();
    let ids: Vec<_> = results[0]
        .observations
        .iter()
        .map(|o| o.identity().to_string())
        .collect();

    assert_eq!(
        ids,
        vec![
            "sales_revenue|audi|2022",
            "sales_revenue|audi|2021",
            "sales_revenue|porsche|2022",
            "sales_revenue|porsche|2021",
        ]
    );
    assert_eq!(
        results[0].observations[1].parsed_value.as_ref().unwrap().magnitude,
        Decimal::from(55914)
    );
}

#[test]
fn column_labels_classify_spanned_columns() {
    let results = extract_all();
    let table = &results[1];

    let ids: Vec<_> = table.observations.iter().map(|o| o.identity().to_string()).collect();
    assert_eq!(
        ids,
        vec![
            "deliveries|audi|2022",
            "deliveries|audi|2021",
            "return_on_sales|audi|2022",
            "return_on_sales|audi|2021",
        ]
    );

    let margin = table.observations[2].parsed_value.as_ref().unwrap();
    assert_eq!(margin.magnitude, Decimal::new(133, 1));
    assert_eq!(margin.unit.as_deref(), Some("%"));
    assert_eq!(table.observations[2].evidence.column_label, "Return on sales 2022");
}

#[test]
fn signs_and_unresolved_columns() {
    let results = extract_all();
    let table = &results[2];

    let values: Vec<_> = table
        .observations
        .iter()
        .map(|o| o.parsed_value.as_ref().map(|v| v.magnitude))
        .collect();
    assert_eq!(values, vec![Some(Decimal::from(-233)), Some(Decimal::from(-120))]);
    assert_eq!(table.observations[0].entity_key, "audi");
    assert_eq!(table.unresolved_columns, 1);

    let codes: Vec<_> = table.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![DiagnosticCode::UnresolvedHeader]);
}

#[test]
fn table_without_years_is_invalid() {
    let results = extract_all();
    let table = &results[3];

    assert!(table.invalid);
    assert!(table.observations.is_empty());
    assert_eq!(table.unresolved_columns, 1);
    assert_eq!(
        table.diagnostics.last().map(|d| d.code),
        Some(DiagnosticCode::InvalidTable)
    );
}
