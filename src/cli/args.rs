use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rnaseq-pipelines", version, about = "Paired FASTQ reconciliation and per-sample result collation for RNA-seq quantification")]
pub struct Arguments {

    #[arg(short, long, help = "One of: merge_fastqs, collate_counts, collate_junctions, collate_express, tool_versions")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'o', long = "out", help = "Output root directory. If not specified, a directory named 'rnaseq_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(long, help = "Tab-separated run manifest with columns sample, r1, r2 (one row per lane)")]
    pub manifest: Option<String>,

    #[arg(short = 's', long = "sample", help = "Restrict merge_fastqs to these samples, or name the sample for --r1/--r2 input")]
    pub samples: Vec<String>,

    #[arg(long = "r1", help = "R1 lane files for a single sample, in lane order")]
    pub r1: Vec<String>,

    #[arg(long = "r2", help = "R2 lane files for a single sample, in lane order")]
    pub r2: Vec<String>,

    #[arg(long, help = "Records held unmatched across both buffers of a lane before failing; 0 disables the limit. Defaults to a value derived from available RAM")]
    pub max_pending_reads: Option<usize>,

    #[arg(long, default_value_t = false, help = "Strip a trailing /1 or /2 from read names before pairing")]
    pub strip_mate_suffix: bool,

    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compression_level: u32,

    #[arg(short = 'c', long = "collate-input", help = "Per-sample result file as SAMPLE=PATH; a bare PATH takes the sample id from two directories above the file")]
    pub collate_inputs: Vec<String>,

    #[arg(long, help = "Output file for collate_* modules; defaults to the standard table name inside --out")]
    pub out_file: Option<String>,

    #[arg(short = 'g', long)]
    pub genome: Option<String>,

    #[arg(short = 'a', long)]
    pub annotation: Option<String>,

    #[arg(long, default_value_t = false, help = "Probe external tool versions at startup")]
    pub check_tools: bool,

    #[arg(long, default_value_t = false, help = "Fail if any external tool cannot be probed")]
    pub require_tools: bool,
}
