use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use crate::formats::{RowRecord, TableBlock};

static HEADER_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th").expect("th selector is valid"));
static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("tr selector is valid"));
static DATA_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("td selector is valid"));

pub fn extract_tables<'a>(tables: impl IntoIterator<Item = ElementRef<'a>>) -> Vec<TableBlock> {
    tables.into_iter().map(extract_table).collect()
}

/// Header cells give the keys; each row after the first is zipped against
/// them by position. Data cells past the last header are dropped.
pub fn extract_table(table: ElementRef<'_>) -> TableBlock {
    let headers: Vec<String> = table.select(&HEADER_CELL).map(cell_text).collect();

    let mut rows = Vec::new();
    for row in table.select(&ROW).skip(1) {
        let record: RowRecord = headers
            .iter()
            .cloned()
            .zip(row.select(&DATA_CELL).map(cell_text))
            .collect();
        rows.push(record);
    }

    let dropped = table
        .select(&ROW)
        .skip(1)
        .map(|row| row.select(&DATA_CELL).count().saturating_sub(headers.len()))
        .sum::<usize>();
    if dropped > 0 {
        tracing::debug!(
            headers = headers.len(),
            dropped,
            "table has more data cells than headers"
        );
    }

    rows
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}
