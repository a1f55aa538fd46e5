// src/scrape/parsers.rs
//! DOM extraction for the shipped strategies.
//!
//! Each extractor is pure over a parsed page. Missing anchor elements mean the
//! page changed shape (`ParseFailed`); an anchor without the requested symbol
//! is `CurrencyNotFound`.

use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::ScrapeError;
use crate::model::RawQuote;

pub type Extractor = fn(&Html, &str) -> Result<RawQuote, ScrapeError>;

pub const BUILTIN: [(&str, Extractor); 10] = [
    ("C1", kursy_walut_table),
    ("C2", offer_items),
    ("C3", mce_item_table),
    ("C4", et_pb_columns),
    ("C5", symbol_in_second_cell),
    ("C6", symbol_in_any_cell),
    ("C7", generic_rows),
    ("C8", generic_rows),
    ("C9", generic_rows),
    ("C10", generic_rows),
];

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static css selector")
}

/// Element text with whitespace collapsed and trimmed.
fn text_of(el: ElementRef<'_>) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    let raw: String = el.text().collect();
    re_ws.replace_all(&raw, " ").trim().to_string()
}

fn cell_texts(row: ElementRef<'_>, cells: &Selector) -> Vec<String> {
    row.select(cells).map(text_of).collect()
}

fn pick(cells: &[String], buy: usize, sell: usize) -> Option<RawQuote> {
    let b = cells.get(buy)?;
    let s = cells.get(sell)?;
    if b.is_empty() || s.is_empty() {
        return None;
    }
    Some(RawQuote::new(b.as_str(), s.as_str()))
}

fn miss(anchored: bool, anchor: &str, currency: &str) -> Result<RawQuote, ScrapeError> {
    if anchored {
        Err(ScrapeError::CurrencyNotFound(currency.to_string()))
    } else {
        Err(ScrapeError::ParseFailed(format!("no `{anchor}` on page")))
    }
}

/// C1: `table.kursy_walut` rows; symbol in td[1], buy td[3], sell td[4].
pub fn kursy_walut_table(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = "table.kursy_walut tr";
    let (rows, td) = (sel(ANCHOR), sel("td"));
    let mut anchored = false;
    for row in doc.select(&rows) {
        anchored = true;
        let cells = cell_texts(row, &td);
        if cells.get(1).map(String::as_str) == Some(currency) {
            if let Some(q) = pick(&cells, 3, 4) {
                return Ok(q);
            }
        }
    }
    miss(anchored, ANCHOR, currency)
}

/// C2: `.offerItem` cards mentioning the symbol.
pub fn offer_items(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = ".offerItem";
    let items = sel(ANCHOR);
    let buy_sel = sel(".offerItem__exchangeBuy");
    let sell_sel = sel(".offerItem__exchangeSell");
    let mut anchored = false;
    for item in doc.select(&items) {
        anchored = true;
        if !text_of(item).to_ascii_uppercase().contains(currency) {
            continue;
        }
        let buy = item.select(&buy_sel).next().map(text_of).unwrap_or_default();
        let sell = item.select(&sell_sel).next().map(text_of).unwrap_or_default();
        if !buy.is_empty() && !sell.is_empty() {
            return Ok(RawQuote::new(buy, sell));
        }
    }
    miss(anchored, ANCHOR, currency)
}

/// C3: first `table.mceItemTable`, header row skipped; the symbol is the last
/// word before any parenthesis in the first cell's span.
pub fn mce_item_table(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = "table.mceItemTable";
    let Some(table) = doc.select(&sel(ANCHOR)).next() else {
        return miss(false, ANCHOR, currency);
    };
    let (tr, td, span) = (sel("tr"), sel("td"), sel("span"));
    for row in table.select(&tr).skip(1) {
        let Some(first) = row.select(&td).next() else {
            continue;
        };
        let label = first.select(&span).next().map(text_of).unwrap_or_else(|| text_of(first));
        let before_paren = label.split('(').next().unwrap_or_default();
        let symbol = before_paren
            .split_whitespace()
            .last()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if symbol == currency {
            let cells = cell_texts(row, &td);
            if let Some(q) = pick(&cells, 2, 3) {
                return Ok(q);
            }
        }
    }
    miss(true, ANCHOR, currency)
}

/// C4: Divi `.et_pb_column` blocks; 2nd and 3rd `.et_pb_text_inner` hold the
/// rates. Nested columns: the tightest block wins.
pub fn et_pb_columns(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = ".et_pb_column";
    let (columns, inner) = (sel(ANCHOR), sel(".et_pb_text_inner"));
    let mut anchored = false;
    let mut best: Option<Vec<String>> = None;
    for column in doc.select(&columns) {
        anchored = true;
        if !text_of(column).to_ascii_uppercase().contains(currency) {
            continue;
        }
        let texts: Vec<String> = column.select(&inner).map(text_of).collect();
        if texts.len() < 3 || texts[1].is_empty() || texts[2].is_empty() {
            continue;
        }
        if best.as_ref().map_or(true, |b| texts.len() < b.len()) {
            best = Some(texts);
        }
    }
    match best {
        Some(texts) => Ok(RawQuote::new(texts[1].as_str(), texts[2].as_str())),
        None => miss(anchored, ANCHOR, currency),
    }
}

/// C5: any table row whose td[1] contains the symbol; td[2], td[3].
pub fn symbol_in_second_cell(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = "table tr";
    let (rows, td) = (sel(ANCHOR), sel("td"));
    let mut anchored = false;
    for row in doc.select(&rows) {
        anchored = true;
        let cells = cell_texts(row, &td);
        let hit = cells
            .get(1)
            .is_some_and(|c| c.to_ascii_uppercase().contains(currency));
        if hit {
            if let Some(q) = pick(&cells, 2, 3) {
                return Ok(q);
            }
        }
    }
    miss(anchored, ANCHOR, currency)
}

/// C6: any table row with a cell equal to the symbol at j; td[j+1], td[j+2].
pub fn symbol_in_any_cell(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = "table tr";
    let (rows, td) = (sel(ANCHOR), sel("td"));
    let mut anchored = false;
    for row in doc.select(&rows) {
        anchored = true;
        let cells = cell_texts(row, &td);
        let found = cells
            .iter()
            .position(|c| c.eq_ignore_ascii_case(currency));
        if let Some(j) = found {
            if let Some(q) = pick(&cells, j + 1, j + 2) {
                return Ok(q);
            }
        }
    }
    miss(anchored, ANCHOR, currency)
}

fn looks_numeric(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_digit()) && s.chars().count() >= 4
}

/// C7..C10: any row (`tr`, `div.row`, `div.rate-row`) mentioning the symbol;
/// the first two numeric-looking cells are buy and sell.
pub fn generic_rows(doc: &Html, currency: &str) -> Result<RawQuote, ScrapeError> {
    const ANCHOR: &str = "tr, div.row, div.rate-row";
    let (rows, table_cells) = (sel(ANCHOR), sel("td, th"));
    let mut anchored = false;
    for row in doc.select(&rows) {
        anchored = true;
        if !text_of(row).to_ascii_uppercase().contains(currency) {
            continue;
        }
        let cells: Vec<String> = if row.value().name() == "tr" {
            cell_texts(row, &table_cells)
        } else {
            row.children()
                .filter_map(ElementRef::wrap)
                .map(text_of)
                .collect()
        };
        let mut numeric = cells.into_iter().filter(|c| looks_numeric(c));
        if let (Some(buy), Some(sell)) = (numeric.next(), numeric.next()) {
            return Ok(RawQuote::new(buy, sell));
        }
    }
    miss(anchored, ANCHOR, currency)
}
