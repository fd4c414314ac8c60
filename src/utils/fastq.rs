use std::io::Read;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use seq_io::fastq::{Reader, Record};
use crate::config::defs::PipelineError;

/// One FASTQ record held as its original text, keyed by read name.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub name: Vec<u8>,
    pub text: Vec<u8>,
}

/// Lazy sequence of records from one lane half (R1 or R2).
/// Holds one record at a time; nothing is read ahead beyond the parser buffer.
pub struct LaneRecords<R: Read> {
    reader: Reader<R>,
    source: String,
    strip_mate_suffix: bool,
    records_read: u64,
}

impl<R: Read> LaneRecords<R> {
    pub fn new(reader: R, source: impl Into<String>, strip_mate_suffix: bool) -> Self {
        LaneRecords {
            reader: Reader::new(reader),
            source: source.into(),
            strip_mate_suffix,
            records_read: 0,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl<R: Read> Iterator for LaneRecords<R> {
    type Item = Result<PendingRecord, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.reader.next()? {
            Ok(record) => record,
            Err(e) => {
                return Some(Err(PipelineError::InvalidFastqFormat(format!(
                    "{} (after record {}): {}",
                    self.source, self.records_read, e
                ))));
            }
        };

        let name = read_name(record.head(), self.strip_mate_suffix).to_vec();
        if name.is_empty() {
            return Some(Err(PipelineError::InvalidFastqFormat(format!(
                "{}: record {} has an empty read name",
                self.source,
                self.records_read + 1
            ))));
        }

        let mut text = Vec::with_capacity(record.head().len() + record.seq().len() * 2 + 8);
        if let Err(e) = record.write_unchanged(&mut text) {
            return Some(Err(PipelineError::IOError(e.to_string())));
        }
        self.records_read += 1;
        Some(Ok(PendingRecord { name, text }))
    }
}

/// Pairing key of a FASTQ header: the first whitespace-delimited token.
/// With `strip_mate_suffix`, a trailing `/1` or `/2` is removed as well.
pub fn read_name(head: &[u8], strip_mate_suffix: bool) -> &[u8] {
    let head = head.strip_prefix(b"@").unwrap_or(head);
    let token = head
        .split(|b| b.is_ascii_whitespace())
        .next()
        .unwrap_or(&[]);
    if strip_mate_suffix {
        if let Some(stem) = token.strip_suffix(b"/1").or_else(|| token.strip_suffix(b"/2")) {
            return stem;
        }
    }
    token
}


/// A simulated read pair as raw FASTQ text for both mates.
#[derive(Debug, Clone)]
pub struct SyntheticPair {
    pub name: String,
    pub r1: Vec<u8>,
    pub r2: Vec<u8>,
}

/// Generates paired-end reads with Casava 1.8 style headers, so both mates
/// share the first header token and differ in the description.
///
/// # Arguments
///
/// * `num_pairs` - Number of pairs.
/// * `mean_len` - Mean read length.
/// * `stddev_len` - Standard deviation of read length.
/// * `seed` - RNG seed.
///
/// # Returns
/// Vec<SyntheticPair>
pub fn synthetic_pairs(num_pairs: usize, mean_len: f64, stddev_len: f64, seed: u64) -> anyhow::Result<Vec<SyntheticPair>> {
    if !(mean_len.is_finite() && mean_len > 0.0) {
        return Err(anyhow::anyhow!("Mean read length must be positive, got {}", mean_len));
    }
    if !(stddev_len.is_finite() && stddev_len >= 0.0) {
        return Err(anyhow::anyhow!("Read length standard deviation must be non-negative, got {}", stddev_len));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let len_dist = Normal::new(mean_len, stddev_len)
        .map_err(|e| anyhow::anyhow!("Invalid read length distribution ({}, {}): {}", mean_len, stddev_len, e))?;

    let pairs = (0..num_pairs)
        .map(|i| {
            let name = format!("SIM:1:FC01:1:{}:{}:{}", 1101 + i / 10_000, i % 10_000, rng.random_range(1000..30000));
            let r1 = synthetic_record(&mut rng, &name, "1:N:0:ACGTACGT", &len_dist);
            let r2 = synthetic_record(&mut rng, &name, "2:N:0:ACGTACGT", &len_dist);
            SyntheticPair { name, r1, r2 }
        })
        .collect();
    Ok(pairs)
}

fn synthetic_record(rng: &mut StdRng, name: &str, desc: &str, len_dist: &Normal<f64>) -> Vec<u8> {
    const BASES: &[u8] = b"ACGT";
    let len = len_dist.sample(rng).round().max(1.0) as usize;
    let seq: Vec<u8> = (0..len).map(|_| BASES[rng.random_range(0..4)]).collect();
    let qual: Vec<u8> = (0..len).map(|_| rng.random_range(b'#'..=b'I')).collect();

    let mut text = Vec::with_capacity(name.len() + desc.len() + len * 2 + 8);
    text.push(b'@');
    text.extend_from_slice(name.as_bytes());
    text.push(b' ');
    text.extend_from_slice(desc.as_bytes());
    text.push(b'\n');
    text.extend_from_slice(&seq);
    text.extend_from_slice(b"\n+\n");
    text.extend_from_slice(&qual);
    text.push(b'\n');
    text
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_name() {
        assert_eq!(read_name(b"read1 1:N:0:ACGT", false), b"read1");
        assert_eq!(read_name(b"read1\textra", false), b"read1");
        assert_eq!(read_name(b"@read1", false), b"read1");
        assert_eq!(read_name(b"read1/1", false), b"read1/1");
        assert_eq!(read_name(b"read1/1", true), b"read1");
        assert_eq!(read_name(b"read1/2 desc", true), b"read1");
        assert_eq!(read_name(b"read1/3", true), b"read1/3");
    }

    #[test]
    fn test_lane_records_keeps_record_text() -> anyhow::Result<()> {
        let data = b"@r1 1:N:0:A\nACGT\n+r1\nIIII\n@r2 1:N:0:A\nGG\n+\n##\n";
        let mut lane = LaneRecords::new(&data[..], "test", false);

        let first = lane.next().expect("first record")?;
        assert_eq!(first.name, b"r1".to_vec());
        assert_eq!(first.text, b"@r1 1:N:0:A\nACGT\n+r1\nIIII\n".to_vec());

        let second = lane.next().expect("second record")?;
        assert_eq!(second.name, b"r2".to_vec());
        assert_eq!(second.text, b"@r2 1:N:0:A\nGG\n+\n##\n".to_vec());

        assert!(lane.next().is_none());
        assert_eq!(lane.records_read(), 2);
        Ok(())
    }

    #[test]
    fn test_lane_records_bad_input() {
        let data = b"not a fastq\nACGT\n";
        let mut lane = LaneRecords::new(&data[..], "bad", false);
        let result = lane.next().expect("parser reports an error");
        assert!(matches!(result, Err(PipelineError::InvalidFastqFormat(_))));
    }

    #[test]
    fn test_synthetic_pairs() -> anyhow::Result<()> {
        let pairs = synthetic_pairs(50, 100.0, 10.0, 7)?;
        assert_eq!(pairs.len(), 50);
        for pair in &pairs {
            let mut r1 = LaneRecords::new(&pair.r1[..], "r1", false);
            let mut r2 = LaneRecords::new(&pair.r2[..], "r2", false);
            let a = r1.next().unwrap().unwrap();
            let b = r2.next().unwrap().unwrap();
            assert_eq!(a.name, pair.name.as_bytes());
            assert_eq!(a.name, b.name);
        }

        let again = synthetic_pairs(50, 100.0, 10.0, 7)?;
        assert_eq!(pairs[10].r1, again[10].r1);
        assert!(synthetic_pairs(1, 100.0, -1.0, 7).is_err());
        assert!(synthetic_pairs(1, 0.0, 5.0, 7).is_err());
        assert!(synthetic_pairs(1, 100.0, f64::NAN, 7).is_err());
        assert_eq!(synthetic_pairs(3, 100.0, 0.0, 7)?.len(), 3);
        Ok(())
    }
}
