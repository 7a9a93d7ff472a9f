//! HTML parser for listing tables and detail pages
//!
//! This module handles parsing HTML content to extract:
//! - The primary data table of the listing page and its tag column
//! - One name/tags pair per qualifying table row
//! - The first image inside a detail page's info panel
//!
//! Everything here is synchronous. `scraper::Html` is not `Send`, so callers
//! running on the async runtime parse, extract owned values, and drop the
//! document before their next `.await`.

use crate::config::SourceConfig;
use crate::url::resolve_reference;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// One qualifying listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    /// Display text of the row's primary link, trimmed
    pub name: String,

    /// Tags in cell order; empty for the placeholder glyph
    pub tags: Vec<String>,
}

/// Result of parsing a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingParse {
    /// No element matched the table selector
    TableMissing,

    /// The table exists but no header matches the tag column
    TagColumnMissing { column: String },

    /// Rows extracted from the table
    Rows {
        rows: Vec<ListingRow>,
        /// Body rows inspected (rows after the header row)
        rows_seen: usize,
        /// Body rows that were too short or had no link
        skipped: usize,
    },
}

/// Parses a listing page into rows
///
/// # Row Rules
///
/// - The header row is the first `tr` holding `th` cells; body rows follow it
/// - Rows with fewer cells than the tag column index are skipped
/// - Rows whose name cell has no link are skipped
/// - A tag cell whose text equals `empty_tag_glyph` yields no tags, otherwise
///   every trimmed, non-empty text fragment of the cell is one tag
///
/// # Arguments
///
/// * `html` - The listing page markup
/// * `source` - Selectors and column names to apply
///
/// # Example
///
/// ```
/// use menagerie::config::SourceConfig;
/// use menagerie::crawler::{parse_listing, ListingParse};
///
/// let html = r#"<table class="wikitable sortable">
///   <tr><th>Animal</th><th>Collateral adjective</th></tr>
///   <tr><td><a href="/wiki/Lion">Lion</a></td><td>Feline</td></tr>
/// </table>"#;
/// match parse_listing(html, &SourceConfig::default()) {
///     ListingParse::Rows { rows, .. } => assert_eq!(rows[0].tags, vec!["Feline"]),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub fn parse_listing(html: &str, source: &SourceConfig) -> ListingParse {
    let document = Html::parse_document(html);

    let Some(table) = find_primary_table(&document, &source.table_selector) else {
        return ListingParse::TableMissing;
    };

    let Ok(tr_selector) = Selector::parse("tr") else {
        return ListingParse::TableMissing;
    };
    let all_rows: Vec<ElementRef> = table.select(&tr_selector).collect();

    let header_position = all_rows.iter().position(|row| has_header_cells(*row));
    let headers = header_position
        .map(|i| header_texts(all_rows[i]))
        .unwrap_or_default();

    let Some(tag_index) = column_index(&headers, &source.tag_column) else {
        return ListingParse::TagColumnMissing {
            column: source.tag_column.clone(),
        };
    };

    let body_start = header_position.map_or(0, |i| i + 1);
    let mut rows = Vec::new();
    let mut rows_seen = 0;
    let mut skipped = 0;

    for row in &all_rows[body_start..] {
        let cells = row_cells(*row);
        if cells.is_empty() {
            // Interleaved header or spacer rows carry no data cells
            continue;
        }
        rows_seen += 1;

        if cells.len() <= tag_index || cells.len() <= source.name_column {
            skipped += 1;
            continue;
        }

        let Some((name, _)) = first_anchor(cells[source.name_column]) else {
            skipped += 1;
            continue;
        };
        if name.is_empty() {
            skipped += 1;
            continue;
        }

        let tag_cell = cells[tag_index];
        let tags = if cell_text(tag_cell) == source.empty_tag_glyph.trim() {
            Vec::new()
        } else {
            cell_fragments(tag_cell)
        };

        rows.push(ListingRow { name, tags });
    }

    ListingParse::Rows {
        rows,
        rows_seen,
        skipped,
    }
}

/// Returns the first element matching `selector`
pub fn find_primary_table<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

/// Text of every `th`/`td` cell in a header row, whitespace-collapsed
pub fn header_texts(row: ElementRef) -> Vec<String> {
    child_elements(row, &["th", "td"])
        .into_iter()
        .map(cell_text)
        .collect()
}

/// Position of the header equal to `name`, compared after trimming
pub fn column_index(headers: &[String], name: &str) -> Option<usize> {
    let name = name.trim();
    headers.iter().position(|h| h.trim() == name)
}

/// The direct `td` children of a row
pub fn row_cells(row: ElementRef) -> Vec<ElementRef> {
    child_elements(row, &["td"])
}

/// All text of a cell with runs of whitespace collapsed to one space
pub fn cell_text(cell: ElementRef) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Each text node of a cell, trimmed, with empty ones dropped
pub fn cell_fragments(cell: ElementRef) -> Vec<String> {
    cell.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Text and href of the first link in a cell
pub fn first_anchor(cell: ElementRef) -> Option<(String, Option<String>)> {
    let selector = Selector::parse("a").ok()?;
    let anchor = cell.select(&selector).next()?;
    let text = cell_text(anchor);
    let href = anchor.value().attr("href").map(str::to_string);
    Some((text, href))
}

/// Extracts the first image inside the info panel of a detail page
///
/// The `src` is resolved against `page_url`, so a scheme-relative
/// `//x/lion.jpg` on an https page becomes `https://x/lion.jpg`.
///
/// # Arguments
///
/// * `html` - The detail page markup
/// * `infobox_selector` - CSS selector of the info panel
/// * `page_url` - URL the page was fetched from
///
/// # Returns
///
/// The absolute image URL, or None when there is no panel, no image in it,
/// or the reference is unusable.
pub fn first_image_in_infobox(html: &str, infobox_selector: &str, page_url: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let panel_selector = Selector::parse(infobox_selector).ok()?;
    let img_selector = Selector::parse("img[src]").ok()?;

    let panel = document.select(&panel_selector).next()?;
    let src = panel.select(&img_selector).next()?.value().attr("src")?;
    resolve_reference(src, page_url)
}

fn has_header_cells(row: ElementRef) -> bool {
    !child_elements(row, &["th"]).is_empty()
}

fn child_elements<'a>(row: ElementRef<'a>, names: &[&str]) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| names.contains(&e.value().name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(rows: &str) -> String {
        format!(
            r#"<html><body>
            <table class="wikitable sortable sticky-header">
              <tbody>
                <tr><th>Animal</th><th>Young</th><th>Collateral adjective</th></tr>
                {}
              </tbody>
            </table>
            </body></html>"#,
            rows
        )
    }

    fn rows_of(parse: ListingParse) -> Vec<ListingRow> {
        match parse {
            ListingParse::Rows { rows, .. } => rows,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_single_row() {
        let html = listing(
            r#"<tr><td><a href="/wiki/Lion">Lion</a></td><td>cub</td><td>Feline</td></tr>"#,
        );
        let rows = rows_of(parse_listing(&html, &SourceConfig::default()));
        assert_eq!(
            rows,
            vec![ListingRow {
                name: "Lion".to_string(),
                tags: vec!["Feline".to_string()],
            }]
        );
    }

    #[test]
    fn test_placeholder_glyph_yields_no_tags() {
        let html = listing(r#"<tr><td><a href="/wiki/X">X</a></td><td>-</td><td> — </td></tr>"#);
        let rows = rows_of(parse_listing(&html, &SourceConfig::default()));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "X");
        assert!(rows[0].tags.is_empty());
    }

    #[test]
    fn test_multiple_tag_fragments() {
        let html = listing(
            r#"<tr><td><a href="/wiki/Cat">Cat</a></td><td>kitten</td>
               <td>feline<br>  <span>felid</span>
               </td></tr>"#,
        );
        let rows = rows_of(parse_listing(&html, &SourceConfig::default()));
        assert_eq!(rows[0].tags, vec!["feline", "felid"]);
    }

    #[test]
    fn test_duplicate_tags_are_kept() {
        let html = listing(
            r#"<tr><td><a href="/wiki/Cow">Cow</a></td><td>calf</td><td>bovine<br>bovine</td></tr>"#,
        );
        let rows = rows_of(parse_listing(&html, &SourceConfig::default()));
        assert_eq!(rows[0].tags, vec!["bovine", "bovine"]);
    }

    #[test]
    fn test_rows_without_link_or_short_are_skipped() {
        let html = listing(
            r#"<tr><td>No link</td><td>x</td><td>y</td></tr>
               <tr><td><a href="/wiki/Short">Short</a></td></tr>
               <tr><td><a href="/wiki/Ok">Ok</a></td><td>x</td><td>ok</td></tr>"#,
        );
        match parse_listing(&html, &SourceConfig::default()) {
            ListingParse::Rows {
                rows,
                rows_seen,
                skipped,
            } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].name, "Ok");
                assert_eq!(rows_seen, 3);
                assert_eq!(skipped, 2);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_table_missing() {
        let html = "<html><body><p>No tables here</p></body></html>";
        assert_eq!(
            parse_listing(html, &SourceConfig::default()),
            ListingParse::TableMissing
        );
    }

    #[test]
    fn test_tag_column_missing() {
        let html = r#"<table class="wikitable sortable">
            <tr><th>Animal</th><th>Young</th></tr>
            <tr><td><a href="/wiki/Lion">Lion</a></td><td>cub</td></tr>
        </table>"#;
        assert_eq!(
            parse_listing(html, &SourceConfig::default()),
            ListingParse::TagColumnMissing {
                column: "Collateral adjective".to_string()
            }
        );
    }

    #[test]
    fn test_header_whitespace_is_collapsed() {
        let html = r#"<table class="wikitable sortable">
            <tr><th>Animal</th><th>Collateral
                adjective</th></tr>
            <tr><td><a href="/wiki/Owl">Owl</a></td><td>strigine</td></tr>
        </table>"#;
        let rows = rows_of(parse_listing(html, &SourceConfig::default()));
        assert_eq!(rows[0].tags, vec!["strigine"]);
    }

    #[test]
    fn test_column_index() {
        let headers = vec!["Animal".to_string(), " Collateral adjective ".to_string()];
        assert_eq!(column_index(&headers, "Collateral adjective"), Some(1));
        assert_eq!(column_index(&headers, "Young"), None);
    }

    #[test]
    fn test_first_anchor_text_and_href() {
        let doc = Html::parse_fragment(
            r#"<table><tr><td> <a href="/wiki/Lion"> Lion </a><a href="/x">X</a></td><td>plain</td></tr></table>"#,
        );
        let td = Selector::parse("td").unwrap();
        let mut cells = doc.select(&td);

        let linked = cells.next().unwrap();
        assert_eq!(
            first_anchor(linked),
            Some(("Lion".to_string(), Some("/wiki/Lion".to_string())))
        );
        assert_eq!(first_anchor(cells.next().unwrap()), None);
    }

    #[test]
    fn test_first_image_scheme_relative() {
        let html = r#"<html><body>
            <img src="//x/banner.jpg">
            <table class="infobox"><tr><td><img src="//x/lion.jpg"><img src="//x/map.png"></td></tr></table>
        </body></html>"#;
        let page = Url::parse("https://en.wikipedia.org/wiki/Lion").unwrap();
        assert_eq!(
            first_image_in_infobox(html, "table.infobox", &page),
            Some("https://x/lion.jpg".to_string())
        );
    }

    #[test]
    fn test_first_image_missing() {
        let page = Url::parse("https://en.wikipedia.org/wiki/Lion").unwrap();
        let no_panel = r#"<html><body><img src="//x/lion.jpg"></body></html>"#;
        assert_eq!(first_image_in_infobox(no_panel, "table.infobox", &page), None);

        let empty_panel = r#"<table class="infobox"><tr><td>text</td></tr></table>"#;
        assert_eq!(first_image_in_infobox(empty_panel, "table.infobox", &page), None);
    }
}
