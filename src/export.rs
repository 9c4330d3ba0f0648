// 📤 Mapping Export - one CSV row per mapping
//
// UTF-8, comma-delimited, header row always written (even with no mappings),
// free-text fields quoted. Filename embeds the workspace id and the date.

use crate::entities::{AccountSide, Mapping};
use crate::store::ReferenceData;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EXPORT_HEADER: [&str; 7] = [
    "source_account",
    "source_description",
    "target_account",
    "target_description",
    "cardinality",
    "split_weight",
    "status",
];

/// "gl-mappings-<workspace>-<YYYY-MM-DD>.csv"
pub fn export_filename(workspace_id: &str, date: NaiveDate) -> String {
    let safe: String = workspace_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("gl-mappings-{}-{}.csv", safe, date.format("%Y-%m-%d"))
}

/// Write the export to any sink; returns data rows written
pub fn write_mappings<W: Write>(
    writer: W,
    mappings: &[Mapping],
    reference: &ReferenceData,
) -> Result<usize> {
    let mut csv_writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(writer);

    csv_writer
        .write_record(EXPORT_HEADER)
        .context("CSV write error")?;

    for mapping in mappings {
        let weight = format!("{:.4}", mapping.split_weight);
        csv_writer
            .write_record([
                mapping.source_account_number.as_str(),
                description(mapping, reference, AccountSide::Source),
                mapping.target_account_number.as_str(),
                description(mapping, reference, AccountSide::Target),
                mapping.cardinality().as_str(),
                weight.as_str(),
                mapping.status.as_str(),
            ])
            .with_context(|| format!("CSV write error for mapping {}", mapping.mapping_id))?;
    }

    csv_writer.flush().context("CSV flush error")?;
    Ok(mappings.len())
}

/// Export into `dir` under the standard filename; returns the written path
pub fn export_to_dir(
    dir: &Path,
    workspace_id: &str,
    date: NaiveDate,
    mappings: &[Mapping],
    reference: &ReferenceData,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create export directory {}", dir.display()))?;
    let path = dir.join(export_filename(workspace_id, date));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    let rows = write_mappings(std::io::BufWriter::new(file), mappings, reference)?;
    log::info!(
        "exported workspace={} rows={} path={}",
        workspace_id,
        rows,
        path.display()
    );
    Ok(path)
}

/// Denormalized description, falling back to reference data
fn description<'a>(mapping: &'a Mapping, reference: &'a ReferenceData, side: AccountSide) -> &'a str {
    let (stored, number) = match side {
        AccountSide::Source => (&mapping.source_description, &mapping.source_account_number),
        AccountSide::Target => (&mapping.target_description, &mapping.target_account_number),
    };
    if !stored.is_empty() {
        return stored;
    }
    reference
        .side(side)
        .get(number)
        .map(|a| a.description.as_str())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Account, LedgerSection, MappingShape, MappingStatus};

    fn reference() -> ReferenceData {
        ReferenceData::new(
            vec![Account::new("1000", "Cash, operating", LedgerSection::Assets)],
            vec![
                Account::new("A-100", "Cash at bank", LedgerSection::Assets),
                Account::new("A-110", "Cash \"in transit\"", LedgerSection::Assets),
            ],
        )
    }

    #[test]
    fn test_filename_embeds_workspace_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(export_filename("fund-42", date), "gl-mappings-fund-42-2024-03-09.csv");
        assert_eq!(export_filename("a/b c", date), "gl-mappings-a_b_c-2024-03-09.csv");
    }

    #[test]
    fn test_header_written_without_rows() {
        let mut out = Vec::new();
        let rows = write_mappings(&mut out, &[], &reference()).unwrap();
        assert_eq!(rows, 0);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["\"source_account\",\"source_description\",\"target_account\",\"target_description\",\"cardinality\",\"split_weight\",\"status\""]
        );
    }

    #[test]
    fn test_rows_quote_free_text() {
        let mut a = Mapping::new("MAP-1", "1000", "A-100", "t");
        let mut b = Mapping::new("MAP-2", "1000", "A-110", "t");
        a.shape = MappingShape::OneToMany { group_id: "G".into() };
        b.shape = MappingShape::OneToMany { group_id: "G".into() };
        a.split_weight = 0.5;
        b.split_weight = 0.5;
        b.status = MappingStatus::Active;

        let mut out = Vec::new();
        write_mappings(&mut out, &[a, b], &reference()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "1000,\"Cash, operating\",\"A-100\",\"Cash at bank\",\"ONE_TO_MANY\",0.5000,\"DRAFT\""
        );
        assert_eq!(
            lines[2],
            "1000,\"Cash, operating\",\"A-110\",\"Cash \"\"in transit\"\"\",\"ONE_TO_MANY\",0.5000,\"ACTIVE\""
        );
    }

    #[test]
    fn test_export_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mappings = vec![Mapping::new("MAP-1", "1000", "A-100", "t")];
        let path = export_to_dir(dir.path(), "ws", date, &mappings, &reference()).unwrap();
        assert!(path.ends_with("gl-mappings-ws-2024-01-02.csv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
