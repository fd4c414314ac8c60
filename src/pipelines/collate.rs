//! Collation of per-sample result tables into one gzipped TSV per table type.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info, warn};
use crate::config::defs::{
    PipelineError, RunConfig, COLLATE_COUNTS_MODULE, COLLATE_EXPRESS_MODULE, COLLATE_JUNCTIONS_MODULE, COUNTS_HEADER,
    COUNTS_TABLE, EXPRESS_TABLE, EXPRESS_TOTAL_COUNT_FIELD, JUNCTIONS_HEADER, JUNCTIONS_TABLE, SAMPLE_COLUMN,
};
use crate::utils::file::{
    file_path_manipulator, finish_gz, first_line, gz_writer, remove_partial_outputs, sample_id_from_path, text_reader,
    trim_line_end, validate_file_inputs,
};

/// Where the output header comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSource {
    /// Declared columns; inputs have no header line.
    Fixed(&'static [&'static str]),
    /// The first input's own header line; every input starts with one.
    FirstInput,
}

/// Row filter over whitespace-split fields. `Err` carries the reason a row
/// is malformed.
pub type RowFilter = fn(&[&str]) -> Result<bool, String>;

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub header: HeaderSource,
    pub filter: RowFilter,
}

/// The three result tables of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    /// Per-gene read counts from the aligner.
    Counts,
    /// Per-sample splice junctions from the aligner.
    Junctions,
    /// Per-transcript abundances from the quantifier.
    Express,
}

impl Collation {
    pub fn from_module(module: &str) -> Option<Self> {
        match module {
            COLLATE_COUNTS_MODULE => Some(Collation::Counts),
            COLLATE_JUNCTIONS_MODULE => Some(Collation::Junctions),
            COLLATE_EXPRESS_MODULE => Some(Collation::Express),
            _ => None,
        }
    }

    pub fn default_table(&self) -> &'static str {
        match self {
            Collation::Counts => COUNTS_TABLE,
            Collation::Junctions => JUNCTIONS_TABLE,
            Collation::Express => EXPRESS_TABLE,
        }
    }

    pub fn table_spec(&self) -> TableSpec {
        match self {
            Collation::Counts => TableSpec { header: HeaderSource::Fixed(COUNTS_HEADER), filter: keep_counted_gene },
            Collation::Junctions => TableSpec { header: HeaderSource::Fixed(JUNCTIONS_HEADER), filter: keep_supported_junction },
            Collation::Express => TableSpec { header: HeaderSource::FirstInput, filter: keep_expressed_transcript },
        }
    }
}

fn count_field(fields: &[&str], index: usize, column: &str) -> Result<u64, String> {
    let value = fields.get(index).ok_or_else(|| format!("missing {} field", column))?;
    value
        .parse::<u64>()
        .map_err(|e| format!("{} field '{}' is not a count: {}", column, value, e))
}

fn keep_counted_gene(fields: &[&str]) -> Result<bool, String> {
    Ok(count_field(fields, 1, "counts_unstranded")? > 0)
}

fn keep_supported_junction(fields: &[&str]) -> Result<bool, String> {
    let unique = count_field(fields, 6, "uniquely_mapped_reads")?;
    let multi = count_field(fields, 7, "multimapped_reads")?;
    Ok(unique > 0 || multi > 0)
}

fn keep_expressed_transcript(fields: &[&str]) -> Result<bool, String> {
    let value = fields
        .get(EXPRESS_TOTAL_COUNT_FIELD)
        .ok_or_else(|| "missing tot_counts field".to_string())?;
    let total: f64 = value
        .parse()
        .map_err(|e| format!("tot_counts field '{}' is not numeric: {}", value, e))?;
    Ok(total > 0.0)
}


/// One per-sample result file and the sample it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateInput {
    pub sample: String,
    pub path: PathBuf,
}

impl CollateInput {
    pub fn new(sample: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        CollateInput { sample: sample.into(), path: path.into() }
    }

    /// Parses `SAMPLE=PATH`, or a bare `PATH` whose sample id is the
    /// directory two levels above the file.
    pub fn parse(arg: &str, cwd: &Path) -> Result<Self, PipelineError> {
        let (sample, path) = match arg.split_once('=') {
            Some((sample, path)) if !sample.is_empty() && !path.is_empty() => (Some(sample.to_string()), path),
            Some(_) => {
                return Err(PipelineError::InvalidConfig(format!("Invalid collate input '{}', expected SAMPLE=PATH", arg)));
            }
            None => (None, arg),
        };
        let path = file_path_manipulator(Path::new(path), Some(cwd), None, None, "");
        let sample = match sample {
            Some(s) => s,
            None => sample_id_from_path(&path).ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "Cannot derive a sample id from {}; pass it as SAMPLE=PATH",
                    path.display()
                ))
            })?,
        };
        Ok(CollateInput { sample, path })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollateStats {
    pub files: usize,
    pub rows_read: u64,
    pub rows_kept: u64,
}


/// Collates `inputs` into one gzipped table at `output`. Any unreadable input
/// or malformed row fails the whole table and removes the partial output.
///
/// # Arguments
///
/// * `inputs` - (sample, file) pairs in output order.
/// * `spec` - Header source and row filter.
/// * `output` - Output path (overwritten).
/// * `compression_level` - gzip level.
///
/// # Returns
/// CollateStats
pub fn collate(
    inputs: &[CollateInput],
    spec: &TableSpec,
    output: &Path,
    compression_level: u32,
) -> Result<CollateStats, PipelineError> {
    let paths: Vec<PathBuf> = inputs.iter().map(|i| i.path.clone()).collect();
    validate_file_inputs(&paths)?;

    let result = write_collated(inputs, spec, output, compression_level);
    if result.is_err() {
        remove_partial_outputs(&[output]);
    }
    result
}

fn write_collated(
    inputs: &[CollateInput],
    spec: &TableSpec,
    output: &Path,
    compression_level: u32,
) -> Result<CollateStats, PipelineError> {
    let mut writer = gz_writer(output, compression_level)?;
    let stats = collate_to_writer(inputs, spec, &mut writer)?;
    finish_gz(writer)?;
    Ok(stats)
}

/// Writes the header and filtered, sample-prefixed rows of every input.
pub fn collate_to_writer<W: Write>(
    inputs: &[CollateInput],
    spec: &TableSpec,
    writer: &mut W,
) -> Result<CollateStats, PipelineError> {
    let (header, skip_header) = match spec.header {
        HeaderSource::Fixed(columns) => (columns.join("\t"), false),
        HeaderSource::FirstInput => {
            let first = inputs
                .first()
                .ok_or_else(|| PipelineError::EmptyInputs("a table whose header comes from its inputs".to_string()))?;
            let header = first_line(&first.path)?.ok_or_else(|| PipelineError::MalformedRow {
                path: first.path.clone(),
                line_no: 1,
                reason: "missing header line".to_string(),
                line: String::new(),
            })?;
            (header, true)
        }
    };
    let expected_fields = header.split_whitespace().count();

    writeln!(writer, "{}\t{}", SAMPLE_COLUMN, header)?;

    let mut stats = CollateStats::default();
    for input in inputs {
        let (read, kept) = collate_file(input, spec, &header, skip_header, expected_fields, writer)?;
        debug!("{} ({}): kept {} of {} rows", input.path.display(), input.sample, kept, read);
        stats.files += 1;
        stats.rows_read += read;
        stats.rows_kept += kept;
    }
    Ok(stats)
}

fn collate_file<W: Write>(
    input: &CollateInput,
    spec: &TableSpec,
    header: &str,
    skip_header: bool,
    expected_fields: usize,
    writer: &mut W,
) -> Result<(u64, u64), PipelineError> {
    let mut reader = text_reader(&input.path)?;
    let mut buf = String::new();
    let mut line_no = 0;
    let mut read = 0;
    let mut kept = 0;

    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let line = trim_line_end(&buf);

        if skip_header && line_no == 1 {
            if line != header {
                warn!("{}: header differs from the first input's header", input.path.display());
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let malformed = |reason: String| PipelineError::MalformedRow {
            path: input.path.clone(),
            line_no,
            reason,
            line: line.to_string(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != expected_fields {
            return Err(malformed(format!("expected {} fields, found {}", expected_fields, fields.len())));
        }

        read += 1;
        if (spec.filter)(&fields).map_err(malformed)? {
            writer.write_all(input.sample.as_bytes())?;
            writer.write_all(b"\t")?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            kept += 1;
        }
    }
    Ok((read, kept))
}


/// collate_* modules.
pub async fn run(config: Arc<RunConfig>, collation: Collation) -> Result<(), PipelineError> {
    info!("\n-------------\n Collate {}\n-------------\n", collation.default_table());

    let inputs = config
        .args
        .collate_inputs
        .iter()
        .map(|arg| CollateInput::parse(arg, &config.cwd))
        .collect::<Result<Vec<_>, _>>()?;
    if inputs.is_empty() {
        warn!("No --collate-input files given; {} will hold only a header", collation.default_table());
    }

    let output = match &config.args.out_file {
        Some(file) => file_path_manipulator(Path::new(file), Some(&config.cwd), None, None, ""),
        None => config.out_dir.join(collation.default_table()),
    };
    let level = config.args.compression_level;
    let spec = collation.table_spec();

    let out = output.clone();
    let stats = tokio::task::spawn_blocking(move || collate(&inputs, &spec, &out, level))
        .await
        .map_err(|e| PipelineError::IOError(format!("Collation task failed: {}", e)))??;

    info!(
        "{}: {} of {} rows kept from {} file(s)",
        output.display(),
        stats.rows_kept,
        stats.rows_read,
        stats.files
    );
    Ok(())
}
