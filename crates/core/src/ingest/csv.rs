//! Reading the customer export into raw rows.
//!
//! The export is Latin-1 in practice; UTF-8 files are accepted as well. Headers
//! are matched after trimming and lowercasing, and the delimiter is sniffed from
//! the header line since spreadsheet tools emit either `,` or `;`.

use crate::domain::source::{CsvRow, RawRow, CSV_COLUMNS};
use crate::ingest::SourceError;

/// Columns without which no row could ever pass validation.
pub const REQUIRED_COLUMNS: [&str; 6] =
    ["nome", "celular", "total", "cliente_desde", "ticket_medio", "ultimo_pedido"];

/// UTF-8 when the bytes are valid UTF-8, otherwise Latin-1 (each byte is its code point).
pub fn decode_text(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    };
    text.trim_start_matches('\u{FEFF}').to_owned()
}

pub fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let count = |needle: char| header.matches(needle).count();
    let (semicolons, commas, tabs) = (count(';'), count(','), count('\t'));
    if semicolons > commas && semicolons >= tabs {
        b';'
    } else if tabs > commas {
        b'\t'
    } else {
        b','
    }
}

pub fn normalize_header(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>, SourceError> {
    let text = decode_text(bytes);
    if text.trim().is_empty() {
        return Err(SourceError::Unparsable("file is empty".to_owned()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(detect_delimiter(&text))
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|error| SourceError::Unparsable(format!("failed to read header: {error}")))?
        .iter()
        .map(normalize_header)
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .map(|column| (*column).to_owned())
        .collect();
    if !missing.is_empty() {
        return Err(SourceError::MissingColumns(missing));
    }

    let positions: Vec<Option<usize>> = CSV_COLUMNS
        .iter()
        .map(|column| headers.iter().position(|header| header == column))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                rows.push(RawRow::Unreadable(error.to_string()));
                continue;
            }
        };
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let field = |column: usize| -> Option<String> {
            positions[column].and_then(|index| record.get(index)).map(ToString::to_string)
        };
        rows.push(RawRow::Csv(CsvRow {
            nome: field(0),
            celular: field(1),
            logradouro: field(2),
            logradouro_numero: field(3),
            complemento: field(4),
            bairro: field(5),
            cidade: field(6),
            total: field(7),
            total_pontos: field(8),
            cliente_desde: field(9),
            ticket_medio: field(10),
            ultimo_pedido: field(11),
        }));
    }
    Ok(rows)
}
