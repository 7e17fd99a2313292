use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::domain::{AccessionId, Choice, Library, ReadOrientation, SampleDescriptor, SampleName};
use crate::error::KiraError;
use crate::reference::anchor_path;
use crate::validate;

/// Recognised sample table columns, in sample sheet order.
pub const COLUMNS: &[&str] = &[
    "sample",
    "fq1",
    "fq2",
    "organism",
    "gtf",
    "genome",
    "sd",
    "mean",
    "libtype",
    "index_size",
    "kmer",
    "fq1_3p",
    "fq2_3p",
    "fq1_5p",
    "fq2_5p",
    "fq1_polya_3p",
    "fq2_polya_3p",
    "fq1_polya_5p",
    "fq2_polya_5p",
    "seqmode",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Keep unknown columns as passthrough values instead of rejecting the table.
    pub allow_extra_columns: bool,
}

/// Reads a tab-separated sample table.
///
/// The table is accepted or rejected as a whole: one bad row rejects every row,
/// and all bad rows are reported together.
pub fn read_sample_table(
    path: &Path,
    options: TableOptions,
) -> Result<Vec<SampleDescriptor>, KiraError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| schema_error(path, &format!("cannot open: {err}")))?;

    let headers = reader
        .headers()
        .map_err(|err| schema_error(path, &format!("cannot read header: {err}")))?
        .clone();
    let columns = check_header(path, &headers, options)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut samples = Vec::new();
    let mut errors = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let outcome = record
            .map_err(|err| row_error(path, row, &err.to_string()))
            .and_then(|record| {
                let fields = RowFields {
                    columns: &columns,
                    record: &record,
                };
                parse_row(&fields, &base_dir)
                    .map_err(|reason| row_error(path, row, &reason))
            });
        match outcome {
            Ok(descriptor) => samples.push(descriptor),
            Err(err) => errors.push(err),
        }
    }

    if !errors.is_empty() {
        return Err(KiraError::InvalidTable {
            path: path.to_path_buf(),
            count: errors.len(),
            errors,
        });
    }
    Ok(samples)
}

fn check_header(
    path: &Path,
    headers: &csv::StringRecord,
    options: TableOptions,
) -> Result<HashMap<String, usize>, KiraError> {
    let mut columns = HashMap::new();
    for (index, name) in headers.iter().enumerate() {
        if name.is_empty() {
            return Err(schema_error(path, &format!("empty column name at position {}", index + 1)));
        }
        if !COLUMNS.contains(&name) && !options.allow_extra_columns {
            return Err(schema_error(
                path,
                &format!("unknown column `{name}` (pass --allow-extra-columns to keep it)"),
            ));
        }
        if columns.insert(name.to_string(), index).is_some() {
            return Err(schema_error(path, &format!("duplicate column `{name}`")));
        }
    }
    if !columns.contains_key("sample") {
        return Err(schema_error(path, "missing required column `sample`"));
    }
    Ok(columns)
}

struct RowFields<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl RowFields<'_> {
    fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(|index| self.record.get(*index))
            .filter(|value| !value.is_empty())
    }

    fn parse<T: std::str::FromStr>(
        &self,
        column: &str,
        rule: fn(T) -> Result<(), String>,
    ) -> Result<Option<T>, String>
    where
        T: Copy,
    {
        let Some(raw) = self.get(column) else {
            return Ok(None);
        };
        let value = raw
            .parse::<T>()
            .map_err(|_| format!("column `{column}`: `{raw}` is not a number"))?;
        rule(value).map_err(|reason| format!("column `{column}`: `{raw}` {reason}"))?;
        Ok(Some(value))
    }

    fn sequence(&self, column: &str) -> Result<Option<String>, String> {
        let Some(raw) = self.get(column) else {
            return Ok(None);
        };
        validate::sequence(raw).map_err(|reason| format!("column `{column}`: `{raw}` {reason}"))?;
        Ok(Some(raw.to_string()))
    }
}

fn parse_row(fields: &RowFields<'_>, base_dir: &Path) -> Result<SampleDescriptor, String> {
    let sample = fields
        .get("sample")
        .ok_or_else(|| "missing value in required column `sample`".to_string())?;
    let fq1 = fields.get("fq1");
    let fq2 = fields.get("fq2");

    let library = match (fq1, fq2) {
        (None, Some(_)) => return Err("inconsistent mate pairing: `fq2` without `fq1`".to_string()),
        (None, None) if AccessionId::matches(sample) => Library::Remote {
            accession: sample.parse().map_err(|err: KiraError| err.to_string())?,
        },
        (None, None) => return Err("missing value in required column `fq1`".to_string()),
        (Some(mate1), None) => Library::SingleEnd {
            mate1: anchor_path(Path::new(mate1), base_dir),
        },
        (Some(mate1), Some(mate2)) => Library::PairedEnd {
            mate1: anchor_path(Path::new(mate1), base_dir),
            mate2: anchor_path(Path::new(mate2), base_dir),
        },
    };

    if let Some(mode) = fields.get("seqmode") {
        check_seqmode(mode, &library)?;
    }

    let name = sample.parse::<SampleName>().map_err(|_| {
        format!("column `sample`: `{sample}` may only contain letters, digits, `.`, `_` and `-`")
    })?;
    let mut descriptor = SampleDescriptor::new(name, library);
    let meta = &mut descriptor.metadata;

    meta.source = fields.get("organism").map(str::to_string);
    meta.annotations = fields.get("gtf").map(|value| anchor_path(Path::new(value), base_dir));
    meta.reference_sequences = fields
        .get("genome")
        .map(|value| anchor_path(Path::new(value), base_dir));
    meta.fragment_length_mean = fields.parse("mean", validate::fragment_mean)?;
    meta.fragment_length_sd = fields.parse("sd", validate::fragment_sd)?;
    meta.star_sjdb_overhang = fields.parse("index_size", validate::overhang)?;
    meta.salmon_kmer_size = fields.parse("kmer", validate::kmer_size)?;
    if let Some(raw) = fields.get("libtype") {
        let orientation = ReadOrientation::parse_choice(raw).ok_or_else(|| {
            format!(
                "column `libtype`: unknown value `{raw}` (accepted: {})",
                ReadOrientation::accepted_list()
            )
        })?;
        meta.read_orientation = Some(orientation);
    }
    meta.adapter_3p.0 = fields.sequence("fq1_3p")?;
    meta.adapter_3p.1 = fields.sequence("fq2_3p")?;
    meta.adapter_5p.0 = fields.sequence("fq1_5p")?;
    meta.adapter_5p.1 = fields.sequence("fq2_5p")?;
    meta.adapter_poly_3p.0 = fields.sequence("fq1_polya_3p")?;
    meta.adapter_poly_3p.1 = fields.sequence("fq2_polya_3p")?;
    meta.adapter_poly_5p.0 = fields.sequence("fq1_polya_5p")?;
    meta.adapter_poly_5p.1 = fields.sequence("fq2_polya_5p")?;

    descriptor.extra = fields
        .columns
        .iter()
        .filter(|(column, _)| !COLUMNS.contains(&column.as_str()))
        .filter_map(|(column, index)| {
            fields
                .record
                .get(*index)
                .filter(|value| !value.is_empty())
                .map(|value| (column.clone(), value.to_string()))
        })
        .collect::<BTreeMap<_, _>>();

    Ok(descriptor)
}

fn check_seqmode(mode: &str, library: &Library) -> Result<(), String> {
    match (mode.to_ascii_lowercase().as_str(), library) {
        (_, Library::Remote { .. }) => Ok(()),
        ("pe", Library::PairedEnd { .. }) | ("se", Library::SingleEnd { .. }) => Ok(()),
        ("pe", _) => Err("inconsistent mate pairing: seqmode `pe` without `fq2`".to_string()),
        ("se", _) => Err("inconsistent mate pairing: seqmode `se` with `fq2`".to_string()),
        _ => Err(format!(
            "column `seqmode`: unknown value `{mode}` (accepted: pe, se)"
        )),
    }
}

fn schema_error(path: &Path, reason: &str) -> KiraError {
    KiraError::TableSchema {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn row_error(path: &Path, row: usize, reason: &str) -> KiraError {
    KiraError::TableRow {
        path: path.to_path_buf(),
        row,
        reason: reason.to_string(),
    }
}
