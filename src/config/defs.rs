use std::path::PathBuf;
use crate::cli::Arguments;
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

// External software
pub const STAR_TAG: &str = "STAR";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const GFFREAD_TAG: &str = "gffread";
pub const EXPRESS_TAG: &str = "express";

pub const EXTERNAL_TOOLS: &[&'static str] = &[STAR_TAG, SAMTOOLS_TAG, GFFREAD_TAG, EXPRESS_TAG];

lazy_static! {
    /// Minimum (major, minor) release of each external tool.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(STAR_TAG, (2, 7));
        m.insert(SAMTOOLS_TAG, (1, 10));
        m.insert(GFFREAD_TAG, (0, 12));
        m.insert(EXPRESS_TAG, (1, 5));

        m
    };
}

// Modules
pub const MERGE_FASTQS_MODULE: &str = "merge_fastqs";
pub const COLLATE_COUNTS_MODULE: &str = "collate_counts";
pub const COLLATE_JUNCTIONS_MODULE: &str = "collate_junctions";
pub const COLLATE_EXPRESS_MODULE: &str = "collate_express";
pub const TOOL_VERSIONS_MODULE: &str = "tool_versions";

// Static Filenames
pub const COUNTS_TABLE: &str = "counts.tsv.gz";
pub const JUNCTIONS_TABLE: &str = "junctions.tsv.gz";
pub const EXPRESS_TABLE: &str = "express.tsv.gz";
pub const TOOL_VERSIONS_TABLE: &str = "tool_versions.tsv";
pub const R1_OUT_SUFFIX: &str = "R1.fastq.gz";
pub const R2_OUT_SUFFIX: &str = "R2.fastq.gz";

// Static Parameters
pub const SAMPLE_COLUMN: &str = "sample";
pub const COUNTS_HEADER: &[&'static str] = &["gene_id", "counts_unstranded", "counts_strand1", "counts_strand2"];
pub const JUNCTIONS_HEADER: &[&'static str] = &[
    "chrom",
    "intron_first",
    "intron_last",
    "strand",
    "intron_motif",
    "annotated",
    "uniquely_mapped_reads",
    "multimapped_reads",
    "max_spliced_overhang",
];
pub const EXPRESS_TOTAL_COUNT_FIELD: usize = 4;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const FASTQ_RECORD_BYTES: usize = 1_000; // ~1KB per pending short-read record
pub const MIN_PENDING_RECORDS: usize = 1_000_000;
pub const MAX_PENDING_RECORDS: usize = 500_000_000;



/// Upper bound on records held across both pending buffers of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingLimit {
    Unlimited,
    Records(usize),
}

impl PendingLimit {
    pub fn from_arg(max_pending: Option<usize>, ram_default: usize) -> Self {
        match max_pending {
            Some(0) => PendingLimit::Unlimited,
            Some(n) => PendingLimit::Records(n),
            None => PendingLimit::Records(ram_default),
        }
    }

    pub fn exceeded_by(&self, held: usize) -> bool {
        match self {
            PendingLimit::Unlimited => false,
            PendingLimit::Records(limit) => held > *limit,
        }
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing or unreadable input {}: {error}", .path.display())]
    MissingInput { path: PathBuf, error: String },

    #[error("Invalid FASTQ format: {0}")]
    InvalidFastqFormat(String),

    #[error("Sample {sample}: {r1} R1 file(s) but {r2} R2 file(s)")]
    LaneCountMismatch { sample: String, r1: usize, r2: usize },

    #[error("Lane {lane}: {held} unmatched records pending, limit is {limit}. R1/R2 ordering diverges too far; raise --max-pending-reads or pass 0 to disable")]
    PendingLimitExceeded { lane: usize, held: usize, limit: usize },

    #[error("Malformed row in {} line {line_no}: {reason}: '{line}'", .path.display())]
    MalformedRow { path: PathBuf, line_no: usize, reason: String, line: String },

    #[error("No inputs given for {0}")]
    EmptyInputs(String),

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("Tool {tool} failed: {error}")]
    ToolExecution { tool: String, error: String },
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub pending_limit: PendingLimit,
}
