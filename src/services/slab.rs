//! Slab matcher for structured regulatory tables
//!
//! Provides:
//! - Numeric and label intent extraction from the question
//! - Row matching against per-page structured tables
//! - Header validation and raw-text fallback parsers
//! - Answer verification against matched cells, with deterministic repair
//!
//! Everything here is a pure function over in-memory data; the ask
//! pipeline decides what to do with the outcomes.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Row-label vocabulary probed against the question. Matching is plain
/// substring containment on the lower-cased question.
const QUERY_LABELS: &[&str] = &[
    "financial data",
    "pan",
    "proof of address",
    "fpi",
    "mandatory",
    "exempted",
    "category",
    "document type",
    "statutory",
    "limit",
    "threshold",
    "compliance",
    "audit",
    "reporting",
    "disclosure",
    "capital",
    "risk",
    "liquidity",
    "exposure",
    "governance",
    "loan limit",
    "maximum cost",
    "dwelling unit",
    "population",
    "metropolitan",
    "urban",
    "semi-urban",
    "rural",
    "centres",
];

/// Structured table content as stored by extraction:
/// `{"columns": [...], "rows": [{col: val, ...}]}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

/// A page's table together with its position on the page
#[derive(Debug, Clone)]
pub struct PageTable {
    pub table_index: i32,
    pub data: TableData,
}

/// One matched structured row with its table's headers
#[derive(Debug, Clone)]
pub struct MatchedRow {
    pub table_index: i32,
    pub headers: Vec<String>,
    pub row: Map<String, Value>,
}

/// Table recovered from raw chunk text by one of the fallback parsers
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Extracts monetary amounts from the question, normalised to rupees.
///
/// "10 lakhs" and "10 lacs" become 1_000_000; "5 cr" becomes 50_000_000.
/// Bare integers of four or more digits pass through as-is; shorter ones
/// ("page 3", "section 12") carry no amount intent. Commas are stripped
/// first, so "1,00,000" reads as 100000. The result is deduplicated in
/// first-seen order.
pub fn extract_query_numbers(query: &str) -> Vec<f64> {
    let normalized = query.to_lowercase().replace(',', "");
    let mut numbers: Vec<f64> = Vec::new();

    static UNIT_RE: OnceLock<Regex> = OnceLock::new();
    let unit_re = UNIT_RE
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(lakhs?|lac|cr|crores?)").unwrap());

    for caps in unit_re.captures_iter(&normalized) {
        let (Some(value), Some(unit)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(value) = value.as_str().parse::<f64>() else {
            continue;
        };
        let unit = unit.as_str();
        if unit.starts_with("lakh") || unit == "lac" {
            numbers.push(value * 100_000.0);
        } else {
            numbers.push(value * 10_000_000.0);
        }
    }

    static PLAIN_RE: OnceLock<Regex> = OnceLock::new();
    let plain_re = PLAIN_RE.get_or_init(|| Regex::new(r"\b(\d{4,})\b").unwrap());

    for caps in plain_re.captures_iter(&normalized) {
        if let Some(value) = caps.get(1) {
            if let Ok(value) = value.as_str().parse::<f64>() {
                numbers.push(value);
            }
        }
    }

    let mut deduped: Vec<f64> = Vec::with_capacity(numbers.len());
    for n in numbers {
        if !deduped.iter().any(|d| d.to_bits() == n.to_bits()) {
            deduped.push(n);
        }
    }
    deduped
}

/// Extracts conceptual row labels from the question, in vocabulary order
pub fn extract_query_labels(query: &str) -> Vec<String> {
    let query_lower = query.to_lowercase();
    QUERY_LABELS
        .iter()
        .copied()
        .filter(|label| query_lower.contains(label))
        .map(str::to_string)
        .collect()
}

/// Text form of a JSON cell without the JSON quoting
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lower-cased text form of a row used for substring probes.
/// Column names are part of the probe, so a label can hit a row through
/// its header-derived keys as well as its values.
fn row_probe_text(row: &Map<String, Value>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(row.len() * 2);
    for (key, value) in row {
        parts.push(key.clone());
        parts.push(cell_text(value));
    }
    parts.join(" | ").to_lowercase()
}

fn number_matches(probe: &str, number: f64) -> bool {
    // Raw integer form ("500000" somewhere in the row)
    if probe.contains(&format!("{}", number as i64)) {
        return true;
    }

    // Lakh phrasing, integral and fractional renderings. Crore phrasing
    // is not probed; the corpus tables quote amounts in lakh.
    if number >= 100_000.0 {
        let lakh_val = number / 100_000.0;
        let int_phrase = format!("{} lakh", lakh_val as i64);
        let frac_phrase = if lakh_val.fract() == 0.0 {
            format!("{:.1} lakh", lakh_val)
        } else {
            format!("{} lakh", lakh_val)
        };
        if probe.contains(&int_phrase) || probe.contains(&frac_phrase) {
            return true;
        }
    }

    false
}

/// Finds rows across the page's tables that match the question's intent.
///
/// A label hit takes priority over any numeric hit; numbers are only
/// probed when no label matched the row. Each row matches at most once.
/// With no intent at all, nothing matches.
pub fn find_matching_rows(
    tables: &[PageTable],
    query_numbers: &[f64],
    query_labels: &[String],
) -> Vec<MatchedRow> {
    if query_numbers.is_empty() && query_labels.is_empty() {
        return Vec::new();
    }

    let mut matched = Vec::new();
    let mut matched_label: Option<&str> = None;

    for table in tables {
        for row in &table.data.rows {
            let probe = row_probe_text(row);
            let mut is_match = false;

            for label in query_labels {
                if probe.contains(&label.to_lowercase()) {
                    is_match = true;
                    matched_label = Some(label);
                    break;
                }
            }

            if !is_match {
                for &number in query_numbers {
                    if number_matches(&probe, number) {
                        is_match = true;
                        break;
                    }
                }
            }

            if is_match {
                matched.push(MatchedRow {
                    table_index: table.table_index,
                    headers: table.data.columns.clone(),
                    row: row.clone(),
                });
            }
        }
    }

    if let Some(label) = matched_label {
        tracing::debug!(label, rows = matched.len(), "Label match drove row selection");
    }
    matched
}

/// True when the answer mentions every non-trivial cell of every
/// matched row. Vacuously true with no matched rows.
pub fn verify_column_integrity(matching_rows: &[MatchedRow], answer_text: &str) -> bool {
    get_missing_values(matching_rows, answer_text).is_empty()
}

/// Cell values from the matched rows that the answer fails to mention,
/// case-insensitively. Trivial cells (shorter than two characters, or
/// the placeholder markers "na", "-", "nil", "none") are never required.
pub fn get_missing_values(matching_rows: &[MatchedRow], answer_text: &str) -> Vec<String> {
    let ans_lower = answer_text.to_lowercase();
    let mut missing: Vec<String> = Vec::new();

    for matched in matching_rows {
        for value in matched.row.values() {
            let cell = cell_text(value);
            let cell = cell.trim();
            if cell.len() < 2 {
                continue;
            }
            let cell_lower = cell.to_lowercase();
            if matches!(cell_lower.as_str(), "na" | "-" | "nil" | "none") {
                continue;
            }
            if !ans_lower.contains(&cell_lower) && !missing.iter().any(|m| m == cell) {
                missing.push(cell.to_string());
            }
        }
    }
    missing
}

/// Appends a recovery block listing matched-row values absent from the
/// answer. With nothing missing the answer is returned unchanged, so
/// running this twice never stacks a second block.
pub fn append_missing_columns(matching_rows: &[MatchedRow], answer_text: &str) -> String {
    let missing = get_missing_values(matching_rows, answer_text);
    if missing.is_empty() {
        return answer_text.to_string();
    }

    let mut recovered = String::from(answer_text);
    recovered.push_str("\n\n**🛡️ Data Recovery: Missing Column Values**\n");
    for value in &missing {
        recovered.push_str(&format!("- **Missing Info**: {}\n", value));
    }

    tracing::debug!(values = missing.len(), "Recovery block appended");
    recovered
}

/// Placeholder names come from extraction when a header cell was blank:
/// "col", "col_2", ... or the older "Column_N" form
fn is_placeholder_header(header: &str) -> bool {
    let trimmed = header.trim();
    if trimmed.is_empty() || trimmed.starts_with("Column_") || trimmed == "col" {
        return true;
    }
    match trimmed.strip_prefix("col_") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// False when every header of the matched table is blank or an
/// auto-generated placeholder, meaning column mapping failed at
/// extraction time. Vacuously true with no matched rows.
pub fn has_valid_headers(matching_rows: &[MatchedRow]) -> bool {
    let headers = match matching_rows.first() {
        Some(m) => &m.headers,
        None => return true,
    };
    if headers.is_empty() {
        return false;
    }

    let generic = headers.iter().filter(|h| is_placeholder_header(h)).count();
    generic < headers.len()
}

/// Recovers a population-slab table written inline in prose, where the
/// category text runs straight into its two amounts. The three columns
/// are fixed by the housing-loan circular layout.
pub fn parse_inline_table(text: &str) -> Option<ParsedTable> {
    static INLINE_RE: OnceLock<Regex> = OnceLock::new();
    let re = INLINE_RE.get_or_init(|| {
        Regex::new(r"(?is)(Centres with population.*?)\b(\d+(?:\.\d+)?)\s+(\d+(?:\.\d+)?)\b")
            .unwrap()
    });

    let caps = re.captures(text)?;
    let category = caps.get(1)?.as_str().trim().to_string();
    let loan_limit = caps.get(2)?.as_str().to_string();
    let max_cost = caps.get(3)?.as_str().to_string();

    let headers = vec![
        "Population Category".to_string(),
        "Loan Limit (₹ lakh)".to_string(),
        "Maximum Cost of Dwelling (₹ lakh)".to_string(),
    ];

    let mut row = Map::new();
    row.insert(headers[0].clone(), Value::String(category));
    row.insert(headers[1].clone(), Value::String(loan_limit));
    row.insert(headers[2].clone(), Value::String(max_cost));

    Some(ParsedTable {
        headers,
        rows: vec![row],
    })
}

/// Columns are separated by runs of two or more spaces, or tabs
fn split_columns(line: &str) -> Vec<String> {
    static SPLIT_RE: OnceLock<Regex> = OnceLock::new();
    let re = SPLIT_RE.get_or_init(|| Regex::new(r"\s{2,}|\t").unwrap());
    re.split(line)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Recovers a table from raw chunk text by locating a header line and
/// splitting the lines below it on column gaps.
///
/// Rows with fewer tokens than headers keep their first token under the
/// first column and their last token under the last; anything between
/// is unrecoverable at this level.
pub fn parse_raw_text_table(text: &str) -> Option<ParsedTable> {
    const HEADER_MARKERS: &[&str] = &[
        "category",
        "loan limit",
        "maximum cost",
        "(amount in ₹ lakh)",
    ];

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut header_idx = None;
    let mut headers: Vec<String> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        if HEADER_MARKERS.iter().any(|m| lower.contains(m)) {
            header_idx = Some(i);
            headers = split_columns(line);
            break;
        }
    }

    let header_idx = header_idx?;
    if headers.is_empty() {
        return None;
    }

    let mut rows = Vec::new();
    for line in &lines[header_idx + 1..] {
        let vals = split_columns(line);
        if vals.is_empty() {
            continue;
        }

        let mut row = Map::new();
        if vals.len() >= headers.len() {
            for (i, header) in headers.iter().enumerate() {
                row.insert(header.clone(), Value::String(vals[i].clone()));
            }
        } else {
            row.insert(headers[0].clone(), Value::String(vals[0].clone()));
            if vals.len() > 1 {
                if let Some(last_header) = headers.last() {
                    row.insert(
                        last_header.clone(),
                        Value::String(vals[vals.len() - 1].clone()),
                    );
                }
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return None;
    }

    Some(ParsedTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_row(cells: &[(&str, &str)]) -> Map<String, Value> {
        let mut row = Map::new();
        for (k, v) in cells {
            row.insert(k.to_string(), Value::String(v.to_string()));
        }
        row
    }

    fn page_table(columns: &[&str], rows: Vec<Map<String, Value>>) -> PageTable {
        PageTable {
            table_index: 0,
            data: TableData {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        }
    }

    #[test]
    fn lakh_and_crore_amounts_normalise_to_rupees() {
        let numbers = extract_query_numbers("limit of 10 lakhs or 5 cr for housing");
        assert_eq!(numbers, vec![1_000_000.0, 50_000_000.0]);

        let numbers = extract_query_numbers("threshold is 2.5 lakh");
        assert_eq!(numbers, vec![250_000.0]);

        let numbers = extract_query_numbers("lac spelling: 3 lac");
        assert_eq!(numbers, vec![300_000.0]);
    }

    #[test]
    fn commas_are_stripped_before_number_extraction() {
        let numbers = extract_query_numbers("is 1,00,000 the cutoff");
        assert_eq!(numbers, vec![100_000.0]);
    }

    #[test]
    fn short_bare_numbers_are_not_amounts() {
        assert!(extract_query_numbers("see page 3 section 12").is_empty());
        assert_eq!(extract_query_numbers("cutoff 500000"), vec![500_000.0]);
    }

    #[test]
    fn duplicate_amounts_collapse_in_first_seen_order() {
        // "10 lakh" and "1000000" name the same amount
        let numbers = extract_query_numbers("10 lakh meaning 1000000 rupees");
        assert_eq!(numbers, vec![1_000_000.0]);
    }

    #[test]
    fn labels_come_back_in_vocabulary_order() {
        let labels = extract_query_labels("What is the loan limit for semi-urban centres?");
        // "urban" is a substring of "semi-urban", so both are found
        assert!(labels.contains(&"loan limit".to_string()));
        assert!(labels.contains(&"limit".to_string()));
        assert!(labels.contains(&"semi-urban".to_string()));
        assert!(labels.contains(&"urban".to_string()));
        assert!(labels.contains(&"centres".to_string()));
        assert!(!labels.contains(&"rural".to_string()));
    }

    #[test]
    fn no_intent_matches_nothing() {
        let table = page_table(
            &["Category", "Limit"],
            vec![string_row(&[("Category", "Urban"), ("Limit", "28")])],
        );
        assert!(find_matching_rows(&[table], &[], &[]).is_empty());
    }

    #[test]
    fn label_match_outranks_numeric_and_each_row_matches_once() {
        let table = page_table(
            &["Category", "Loan Limit"],
            vec![
                string_row(&[("Category", "Metropolitan"), ("Loan Limit", "10 lakh")]),
                string_row(&[("Category", "Rural"), ("Loan Limit", "2 lakh")]),
            ],
        );
        // First row matches the label AND the number; it must appear once
        let rows = find_matching_rows(
            &[table],
            &[1_000_000.0],
            &["metropolitan".to_string()],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].row.get("Category"),
            Some(&Value::String("Metropolitan".to_string()))
        );
    }

    #[test]
    fn numeric_match_accepts_lakh_phrasing() {
        let table = page_table(
            &["Category", "Loan Limit"],
            vec![string_row(&[
                ("Category", "Metro"),
                ("Loan Limit", "up to 10 lakh"),
            ])],
        );
        let rows = find_matching_rows(&[table], &[1_000_000.0], &[]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn numeric_match_accepts_raw_integer_form() {
        let table = page_table(
            &["Category", "Limit"],
            vec![string_row(&[("Category", "FPI"), ("Limit", "500000")])],
        );
        let rows = find_matching_rows(&[table], &[500_000.0], &[]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn labels_can_hit_through_column_keys() {
        // The label appears only as a column name, not in any value
        let table = page_table(
            &["Population Category", "Limit"],
            vec![string_row(&[
                ("Population Category", "Metro"),
                ("Limit", "28"),
            ])],
        );
        let rows = find_matching_rows(&[table], &[], &["population".to_string()]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn verification_is_vacuous_without_matched_rows() {
        assert!(verify_column_integrity(&[], "any answer at all"));
    }

    #[test]
    fn verification_fails_on_missing_cell_and_ignores_trivial_cells() {
        let matched = MatchedRow {
            table_index: 0,
            headers: vec!["Category".into(), "Limit".into(), "Note".into()],
            row: string_row(&[("Category", "Urban"), ("Limit", "28"), ("Note", "NA")]),
        };

        // "28" missing, "NA" never required
        let answer = "The urban category applies.";
        assert!(!verify_column_integrity(std::slice::from_ref(&matched), answer));
        let missing = get_missing_values(std::slice::from_ref(&matched), answer);
        assert_eq!(missing, vec!["28".to_string()]);

        // Mentioning every non-trivial cell passes, case-insensitively
        let answer = "URBAN limit is 28.";
        assert!(verify_column_integrity(std::slice::from_ref(&matched), answer));
    }

    #[test]
    fn append_missing_columns_is_idempotent() {
        let matched = MatchedRow {
            table_index: 0,
            headers: vec!["Category".into(), "Limit".into()],
            row: string_row(&[("Category", "Urban"), ("Limit", "28")]),
        };

        let answer = "Some answer that names neither value.";
        let repaired = append_missing_columns(std::slice::from_ref(&matched), answer);
        assert!(repaired.contains("Data Recovery"));
        assert!(repaired.contains("Urban"));
        assert!(repaired.contains("28"));

        let repaired_again = append_missing_columns(std::slice::from_ref(&matched), &repaired);
        assert_eq!(repaired, repaired_again);
    }

    #[test]
    fn placeholder_headers_fail_validation() {
        let all_generic = MatchedRow {
            table_index: 0,
            headers: vec!["Column_1".into(), "".into(), "col".into(), "col_2".into()],
            row: string_row(&[("Column_1", "x")]),
        };
        assert!(!has_valid_headers(std::slice::from_ref(&all_generic)));

        let one_real = MatchedRow {
            table_index: 0,
            headers: vec!["Column_1".into(), "Rate".into()],
            row: string_row(&[("Rate", "10%")]),
        };
        assert!(has_valid_headers(std::slice::from_ref(&one_real)));

        // No headers at all means the mapping is unusable
        let headerless = MatchedRow {
            table_index: 0,
            headers: vec![],
            row: string_row(&[("a", "b")]),
        };
        assert!(!has_valid_headers(std::slice::from_ref(&headerless)));

        // Vacuously valid with nothing matched
        assert!(has_valid_headers(&[]));
    }

    #[test]
    fn inline_prose_table_is_recovered() {
        let text = "As per the circular, Centres with population below ten lakh \
                    qualify for the scheme with limits 28 35 respectively.";
        let parsed = parse_inline_table(text).expect("inline table should parse");

        assert_eq!(parsed.headers.len(), 3);
        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!(
            row.get("Loan Limit (₹ lakh)"),
            Some(&Value::String("28".to_string()))
        );
        assert_eq!(
            row.get("Maximum Cost of Dwelling (₹ lakh)"),
            Some(&Value::String("35".to_string()))
        );
        assert!(cell_text(row.get("Population Category").unwrap())
            .starts_with("Centres with population"));
    }

    #[test]
    fn inline_parser_skips_text_without_the_pattern() {
        assert!(parse_inline_table("No tables to be found here, 10 20").is_none());
    }

    #[test]
    fn raw_text_table_parses_aligned_rows() {
        let text = "Housing loans by population group\n\
                    Category                Loan Limit   Maximum Cost\n\
                    Metropolitan Centres    28           35\n\
                    Other Centres           20           25\n";
        let parsed = parse_raw_text_table(text).expect("grid should parse");

        assert_eq!(
            parsed.headers,
            vec!["Category", "Loan Limit", "Maximum Cost"]
        );
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(
            parsed.rows[0].get("Loan Limit"),
            Some(&Value::String("28".to_string()))
        );
    }

    #[test]
    fn raw_text_table_aligns_short_rows_first_and_last() {
        let text = "Category      Loan Limit    Maximum Cost\n\
                    Rural  15\n";
        let parsed = parse_raw_text_table(text).expect("should parse");

        let row = &parsed.rows[0];
        assert_eq!(row.get("Category"), Some(&Value::String("Rural".to_string())));
        assert_eq!(
            row.get("Maximum Cost"),
            Some(&Value::String("15".to_string()))
        );
        assert!(row.get("Loan Limit").is_none());
    }

    #[test]
    fn raw_text_table_requires_a_header_line() {
        assert!(parse_raw_text_table("just prose\nwith lines\n").is_none());
        // A header line with nothing under it is not a table
        assert!(parse_raw_text_table("Category    Loan Limit\n").is_none());
    }
}
