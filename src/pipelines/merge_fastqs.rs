//! Paired FASTQ reconciliation.
//!
//! Each lane's R1 and R2 files are read in lock step. Records wait in a
//! per-mate pending buffer until the other mate arrives, then both are written
//! out together and forgotten. Whatever is still pending when both files run
//! out has no mate in this lane and is dropped.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use fxhash::FxHashMap;
use log::{debug, info, warn};
use crate::config::defs::{PendingLimit, PipelineError, RunConfig, DEFAULT_COMPRESSION_LEVEL, R1_OUT_SUFFIX, R2_OUT_SUFFIX};
use crate::utils::fastq::LaneRecords;
use crate::utils::file::{file_path_manipulator, file_reader, finish_gz, gz_writer, remove_partial_outputs, validate_file_inputs};
use crate::utils::manifest::{Manifest, SampleFiles};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeOptions {
    pub pending_limit: PendingLimit,
    pub strip_mate_suffix: bool,
    pub compression_level: u32,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            pending_limit: PendingLimit::Unlimited,
            strip_mate_suffix: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Counts for one lane. `r1_records == pairs_written + r1_dropped`, and the
/// same for R2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub r1_records: u64,
    pub r2_records: u64,
    pub pairs_written: u64,
    pub r1_dropped: u64,
    pub r2_dropped: u64,
    pub duplicate_names: u64,
    pub peak_pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub lanes: Vec<LaneStats>,
}

impl MergeStats {
    pub fn pairs_written(&self) -> u64 {
        self.lanes.iter().map(|l| l.pairs_written).sum()
    }

    pub fn r1_dropped(&self) -> u64 {
        self.lanes.iter().map(|l| l.r1_dropped).sum()
    }

    pub fn r2_dropped(&self) -> u64 {
        self.lanes.iter().map(|l| l.r2_dropped).sum()
    }

    pub fn peak_pending(&self) -> usize {
        self.lanes.iter().map(|l| l.peak_pending).max().unwrap_or(0)
    }
}

type PendingBuffer = FxHashMap<Vec<u8>, Vec<u8>>;


/// Reconciles paired reads from in-memory or already-open sources.
/// `r1_sources[i]` and `r2_sources[i]` are the halves of lane `i`; matched
/// pairs of every lane are appended to the sinks in lane order.
///
/// # Arguments
///
/// * `r1_sources` - R1 streams, one per lane.
/// * `r2_sources` - R2 streams, one per lane.
/// * `r1_sink` - Receives R1 records of matched pairs.
/// * `r2_sink` - Receives R2 records of matched pairs.
/// * `options` - Pending limit and read-name handling.
///
/// # Returns
/// MergeStats with per-lane counts.
pub fn reconcile<R, W1, W2>(
    r1_sources: Vec<R>,
    r2_sources: Vec<R>,
    r1_sink: &mut W1,
    r2_sink: &mut W2,
    options: &MergeOptions,
) -> Result<MergeStats, PipelineError>
where
    R: Read,
    W1: Write,
    W2: Write,
{
    if r1_sources.len() != r2_sources.len() {
        return Err(PipelineError::LaneCountMismatch {
            sample: "<streams>".to_string(),
            r1: r1_sources.len(),
            r2: r2_sources.len(),
        });
    }

    let lanes = r1_sources
        .into_iter()
        .zip(r2_sources)
        .enumerate()
        .map(|(i, (r1, r2))| {
            (
                LaneRecords::new(r1, format!("lane {} R1", i + 1), options.strip_mate_suffix),
                LaneRecords::new(r2, format!("lane {} R2", i + 1), options.strip_mate_suffix),
            )
        })
        .collect();

    reconcile_lanes(lanes, r1_sink, r2_sink, options.pending_limit)
}

fn reconcile_lanes<R, W1, W2>(
    lanes: Vec<(LaneRecords<R>, LaneRecords<R>)>,
    r1_sink: &mut W1,
    r2_sink: &mut W2,
    limit: PendingLimit,
) -> Result<MergeStats, PipelineError>
where
    R: Read,
    W1: Write,
    W2: Write,
{
    let mut stats = MergeStats::default();
    for (index, (records1, records2)) in lanes.into_iter().enumerate() {
        let lane = index + 1;
        debug!("Lane {}: pairing {} with {}", lane, records1.source(), records2.source());
        let lane_stats = reconcile_lane(lane, records1, records2, r1_sink, r2_sink, limit)?;

        info!(
            "Lane {}: {} pairs written from {} R1 / {} R2 records (peak backlog {})",
            lane, lane_stats.pairs_written, lane_stats.r1_records, lane_stats.r2_records, lane_stats.peak_pending
        );
        if lane_stats.r1_dropped > 0 || lane_stats.r2_dropped > 0 {
            warn!(
                "Lane {}: dropped {} R1 and {} R2 records without a mate ({} duplicate names)",
                lane, lane_stats.r1_dropped, lane_stats.r2_dropped, lane_stats.duplicate_names
            );
        }
        stats.lanes.push(lane_stats);
    }
    Ok(stats)
}

/// Pairs one lane. Both streams advance by one record per step; a record is
/// matched the step it arrives if its mate is already pending.
fn reconcile_lane<R, W1, W2>(
    lane: usize,
    mut records1: LaneRecords<R>,
    mut records2: LaneRecords<R>,
    r1_sink: &mut W1,
    r2_sink: &mut W2,
    limit: PendingLimit,
) -> Result<LaneStats, PipelineError>
where
    R: Read,
    W1: Write,
    W2: Write,
{
    let mut pending1 = PendingBuffer::default();
    let mut pending2 = PendingBuffer::default();
    let mut stats = LaneStats::default();
    let mut done1 = false;
    let mut done2 = false;

    while !(done1 && done2) {
        let name1 = if done1 {
            None
        } else {
            pull_into(&mut records1, &mut pending1, &mut done1, &mut stats.r1_dropped, &mut stats.duplicate_names)?
        };
        let name2 = if done2 {
            None
        } else {
            pull_into(&mut records2, &mut pending2, &mut done2, &mut stats.r2_dropped, &mut stats.duplicate_names)?
        };

        if let Some(name) = name1 {
            if pending2.contains_key(&name) {
                emit_pair(&name, &mut pending1, &mut pending2, r1_sink, r2_sink)?;
                stats.pairs_written += 1;
            }
        }
        if let Some(name) = name2 {
            if pending1.contains_key(&name) {
                emit_pair(&name, &mut pending1, &mut pending2, r1_sink, r2_sink)?;
                stats.pairs_written += 1;
            }
        }

        let held = pending1.len() + pending2.len();
        stats.peak_pending = stats.peak_pending.max(held);
        if let PendingLimit::Records(max) = limit {
            if limit.exceeded_by(held) {
                return Err(PipelineError::PendingLimitExceeded { lane, held, limit: max });
            }
        }
    }

    stats.r1_records = records1.records_read();
    stats.r2_records = records2.records_read();
    stats.r1_dropped += pending1.len() as u64;
    stats.r2_dropped += pending2.len() as u64;
    Ok(stats)
}

/// Reads the next record into `pending`, returning its name. A record whose
/// name is already pending replaces the older one, which counts as dropped.
fn pull_into<R: Read>(
    records: &mut LaneRecords<R>,
    pending: &mut PendingBuffer,
    done: &mut bool,
    dropped: &mut u64,
    duplicates: &mut u64,
) -> Result<Option<Vec<u8>>, PipelineError> {
    match records.next() {
        Some(record) => {
            let record = record?;
            if pending.insert(record.name.clone(), record.text).is_some() {
                *dropped += 1;
                *duplicates += 1;
            }
            Ok(Some(record.name))
        }
        None => {
            *done = true;
            Ok(None)
        }
    }
}

fn emit_pair<W1: Write, W2: Write>(
    name: &[u8],
    pending1: &mut PendingBuffer,
    pending2: &mut PendingBuffer,
    r1_sink: &mut W1,
    r2_sink: &mut W2,
) -> Result<(), PipelineError> {
    if let (Some(text1), Some(text2)) = (pending1.remove(name), pending2.remove(name)) {
        r1_sink.write_all(&text1)?;
        r2_sink.write_all(&text2)?;
    }
    Ok(())
}


/// Merges all lanes of one sample into a gzipped R1/R2 pair.
/// Inputs are checked before any output is created; if the merge fails the
/// partial outputs are removed.
///
/// # Arguments
///
/// * `sample` - Lane files of the sample.
/// * `r1_out` - R1 output path (overwritten).
/// * `r2_out` - R2 output path (overwritten).
/// * `options` - MergeOptions.
///
/// # Returns
/// MergeStats
pub fn merge_fastqs(
    sample: &SampleFiles,
    r1_out: &Path,
    r2_out: &Path,
    options: &MergeOptions,
) -> Result<MergeStats, PipelineError> {
    if sample.r1.len() != sample.r2.len() {
        return Err(PipelineError::LaneCountMismatch {
            sample: sample.sample.clone(),
            r1: sample.r1.len(),
            r2: sample.r2.len(),
        });
    }
    if sample.lanes() == 0 {
        return Err(PipelineError::EmptyInputs(format!("sample {}", sample.sample)));
    }
    validate_file_inputs(&sample.all_inputs())?;

    let result = write_merged(sample, r1_out, r2_out, options);
    if result.is_err() {
        remove_partial_outputs(&[r1_out, r2_out]);
    }
    result
}

fn write_merged(
    sample: &SampleFiles,
    r1_out: &Path,
    r2_out: &Path,
    options: &MergeOptions,
) -> Result<MergeStats, PipelineError> {
    let mut lanes = Vec::with_capacity(sample.lanes());
    for (r1_path, r2_path) in sample.r1.iter().zip(&sample.r2) {
        lanes.push((
            LaneRecords::new(file_reader(r1_path)?, r1_path.display().to_string(), options.strip_mate_suffix),
            LaneRecords::new(file_reader(r2_path)?, r2_path.display().to_string(), options.strip_mate_suffix),
        ));
    }

    let mut r1_writer = gz_writer(r1_out, options.compression_level)?;
    let mut r2_writer = gz_writer(r2_out, options.compression_level)?;
    let stats = reconcile_lanes(lanes, &mut r1_writer, &mut r2_writer, options.pending_limit)?;
    finish_gz(r1_writer)?;
    finish_gz(r2_writer)?;
    Ok(stats)
}

/// Output locations `<out_dir>/<sample>/<sample>_R1.fastq.gz` and `_R2`.
pub fn merged_output_paths(out_dir: &Path, sample: &str) -> (PathBuf, PathBuf) {
    let sample_dir = out_dir.join(sample);
    (
        file_path_manipulator(Path::new(R1_OUT_SUFFIX), Some(&sample_dir), Some(sample), None, "_"),
        file_path_manipulator(Path::new(R2_OUT_SUFFIX), Some(&sample_dir), Some(sample), None, "_"),
    )
}

fn sample_manifest(config: &RunConfig) -> Result<Manifest, PipelineError> {
    let args = &config.args;
    match &args.manifest {
        Some(manifest) => {
            if !args.r1.is_empty() || !args.r2.is_empty() {
                return Err(PipelineError::InvalidConfig("Use either --manifest or --r1/--r2, not both".to_string()));
            }
            let path = file_path_manipulator(Path::new(manifest), Some(&config.cwd), None, None, "");
            Manifest::from_path(&path)
        }
        None => {
            let sample = match args.samples.as_slice() {
                [single] => single.clone(),
                _ => {
                    return Err(PipelineError::InvalidConfig(
                        "--r1/--r2 input needs exactly one --sample name".to_string(),
                    ))
                }
            };
            let resolve = |files: &[String]| -> Vec<PathBuf> {
                files
                    .iter()
                    .map(|f| file_path_manipulator(Path::new(f), Some(&config.cwd), None, None, ""))
                    .collect()
            };
            Manifest::from_lists(&sample, resolve(&args.r1), resolve(&args.r2))
        }
    }
}

/// merge_fastqs module: reconciles every selected sample of the run.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    info!("\n-------------\n Merge FASTQs\n-------------\n");

    let manifest = sample_manifest(&config)?;
    let selected: Vec<SampleFiles> = match &config.args.manifest {
        Some(_) => manifest.select(&config.args.samples)?.into_iter().cloned().collect(),
        None => manifest.samples().to_vec(),
    };
    if selected.is_empty() {
        return Err(PipelineError::EmptyInputs("merge_fastqs".to_string()));
    }

    let options = MergeOptions {
        pending_limit: config.pending_limit,
        strip_mate_suffix: config.args.strip_mate_suffix,
        compression_level: config.args.compression_level,
    };

    for sample in selected {
        let (r1_out, r2_out) = merged_output_paths(&config.out_dir, &sample.sample);
        info!("Sample {}: merging {} lane(s) into {}", sample.sample, sample.lanes(), r1_out.display());

        let name = sample.sample.clone();
        let stats = tokio::task::spawn_blocking(move || merge_fastqs(&sample, &r1_out, &r2_out, &options))
            .await
            .map_err(|e| PipelineError::IOError(format!("Merge task for {} failed: {}", name, e)))??;

        info!(
            "Sample {}: {} pairs written; {} R1 and {} R2 records dropped",
            name,
            stats.pairs_written(),
            stats.r1_dropped(),
            stats.r2_dropped()
        );
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> String {
        format!("@{} x\nACGT\n+\nIIII\n", name)
    }

    fn fastq(names: &[&str]) -> Vec<u8> {
        names.iter().map(|n| record(n)).collect::<String>().into_bytes()
    }

    fn names_in(out: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(out)
            .lines()
            .step_by(4)
            .map(|l| l.trim_start_matches('@').split_whitespace().next().unwrap_or("").to_string())
            .collect()
    }

    fn run_reconcile(r1: Vec<Vec<u8>>, r2: Vec<Vec<u8>>, options: &MergeOptions) -> Result<(Vec<u8>, Vec<u8>, MergeStats), PipelineError> {
        let mut out1 = Vec::new();
        let mut out2 = Vec::new();
        let r1: Vec<&[u8]> = r1.iter().map(|v| v.as_slice()).collect();
        let r2: Vec<&[u8]> = r2.iter().map(|v| v.as_slice()).collect();
        let stats = reconcile(r1, r2, &mut out1, &mut out2, options)?;
        Ok((out1, out2, stats))
    }

    #[test]
    fn test_matches_same_step() -> anyhow::Result<()> {
        let (out1, out2, stats) = run_reconcile(vec![fastq(&["a", "b"])], vec![fastq(&["a", "b"])], &MergeOptions::default())?;
        assert_eq!(names_in(&out1), vec!["a", "b"]);
        assert_eq!(names_in(&out2), vec!["a", "b"]);
        assert_eq!(stats.pairs_written(), 2);
        assert_eq!(stats.peak_pending(), 0);
        Ok(())
    }

    #[test]
    fn test_reversed_mates() -> anyhow::Result<()> {
        let (out1, out2, stats) = run_reconcile(vec![fastq(&["x", "y"])], vec![fastq(&["y", "x"])], &MergeOptions::default())?;
        // step 1 buffers x (R1) and y (R2); step 2 brings y (R1) and x (R2)
        assert_eq!(names_in(&out1), vec!["y", "x"]);
        assert_eq!(names_in(&out1), names_in(&out2));
        assert_eq!(stats.lanes[0].peak_pending, 2);
        Ok(())
    }

    #[test]
    fn test_orphans_are_dropped_and_counted() -> anyhow::Result<()> {
        let (out1, out2, stats) = run_reconcile(
            vec![fastq(&["a", "orphan1", "b", "c"])],
            vec![fastq(&["b", "a", "orphan2"])],
            &MergeOptions::default(),
        )?;
        assert_eq!(names_in(&out1), names_in(&out2));
        assert!(!names_in(&out1).contains(&"orphan1".to_string()));
        assert!(!names_in(&out2).contains(&"orphan2".to_string()));

        let lane = &stats.lanes[0];
        assert_eq!(lane.pairs_written, 2);
        assert_eq!(lane.r1_dropped, 2);
        assert_eq!(lane.r2_dropped, 1);
        assert_eq!(lane.r1_records, lane.pairs_written + lane.r1_dropped);
        assert_eq!(lane.r2_records, lane.pairs_written + lane.r2_dropped);
        Ok(())
    }

    #[test]
    fn test_lanes_are_not_mixed() -> anyhow::Result<()> {
        // "a" only pairs across lanes, which must not happen
        let (out1, _, stats) = run_reconcile(
            vec![fastq(&["a", "b"]), fastq(&["c"])],
            vec![fastq(&["b"]), fastq(&["c", "a"])],
            &MergeOptions::default(),
        )?;
        assert_eq!(names_in(&out1), vec!["b", "c"]);
        assert_eq!(stats.lanes.len(), 2);
        assert_eq!(stats.lanes[0].r1_dropped, 1);
        assert_eq!(stats.lanes[1].r2_dropped, 1);
        Ok(())
    }

    #[test]
    fn test_record_text_is_unchanged() -> anyhow::Result<()> {
        let r1 = b"@q1 1:N:0:ACGT\nACGTN\n+q1\nII#II\n".to_vec();
        let r2 = b"@q1 2:N:0:ACGT\nTTGCA\n+\nIIIII\n".to_vec();
        let (out1, out2, _) = run_reconcile(vec![r1.clone()], vec![r2.clone()], &MergeOptions::default())?;
        assert_eq!(out1, r1);
        assert_eq!(out2, r2);
        Ok(())
    }

    #[test]
    fn test_duplicate_name_replaces_pending() -> anyhow::Result<()> {
        let (out1, _, stats) = run_reconcile(
            vec![b"@d\nAAAA\n+\nIIII\n@d\nCCCC\n+\nIIII\n".to_vec()],
            vec![fastq(&["z", "z2", "d"])],
            &MergeOptions::default(),
        )?;
        assert_eq!(String::from_utf8_lossy(&out1), "@d\nCCCC\n+\nIIII\n");
        assert_eq!(stats.lanes[0].duplicate_names, 1);
        assert_eq!(stats.lanes[0].r1_dropped, 1);
        Ok(())
    }

    #[test]
    fn test_strip_mate_suffix() -> anyhow::Result<()> {
        let r1 = fastq(&["m/1", "n/1"]);
        let r2 = fastq(&["n/2", "m/2"]);

        let (plain, _, _) = run_reconcile(vec![r1.clone()], vec![r2.clone()], &MergeOptions::default())?;
        assert!(plain.is_empty());

        let options = MergeOptions { strip_mate_suffix: true, ..MergeOptions::default() };
        let (out1, out2, stats) = run_reconcile(vec![r1], vec![r2], &options)?;
        assert_eq!(stats.pairs_written(), 2);
        assert_eq!(names_in(&out1), vec!["n/1", "m/1"]);
        assert_eq!(names_in(&out2), vec!["n/2", "m/2"]);
        Ok(())
    }

    #[test]
    fn test_pending_limit() {
        let r1 = fastq(&["a", "b", "c", "d"]);
        let r2 = fastq(&["d", "c", "b", "a"]);
        let options = MergeOptions { pending_limit: PendingLimit::Records(3), ..MergeOptions::default() };
        let err = run_reconcile(vec![r1.clone()], vec![r2.clone()], &options).unwrap_err();
        assert!(matches!(err, PipelineError::PendingLimitExceeded { lane: 1, limit: 3, .. }));

        let options = MergeOptions { pending_limit: PendingLimit::Records(4), ..MergeOptions::default() };
        assert!(run_reconcile(vec![r1], vec![r2], &options).is_ok());
    }

    #[test]
    fn test_lane_count_mismatch() {
        let err = run_reconcile(vec![fastq(&["a"]), fastq(&["b"])], vec![fastq(&["a"])], &MergeOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::LaneCountMismatch { r1: 2, r2: 1, .. }));
    }

    #[test]
    fn test_empty_and_one_sided_streams() -> anyhow::Result<()> {
        let (out1, out2, stats) = run_reconcile(vec![Vec::new()], vec![fastq(&["a", "b"])], &MergeOptions::default())?;
        assert!(out1.is_empty() && out2.is_empty());
        assert_eq!(stats.lanes[0].r2_dropped, 2);
        Ok(())
    }

    #[test]
    fn test_merged_output_paths() {
        let (r1, r2) = merged_output_paths(Path::new("/out"), "s1");
        assert_eq!(r1, PathBuf::from("/out/s1/s1_R1.fastq.gz"));
        assert_eq!(r2, PathBuf::from("/out/s1/s1_R2.fastq.gz"));
    }
}
