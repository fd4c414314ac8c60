use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use crate::config::defs::PipelineError;

/// Checks the gzip magic bytes. Files shorter than two bytes are not gzipped.
pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(buffer == [0x1F, 0x8B]) // Gzip magic bytes
}

/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<BufReader<File>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Opens a plain or gzipped file for reading, sniffing the compression from
/// the content rather than the extension.
///
/// # Arguments
///
/// * `path` - Input file.
///
/// # Returns
/// FileReader, or PipelineError::MissingInput if the file cannot be opened.
pub fn file_reader(path: &Path) -> Result<FileReader, PipelineError> {
    let missing = |e: io::Error| PipelineError::MissingInput {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    let is_gz = is_gzipped(path).map_err(missing)?;
    let file = File::open(path).map_err(missing)?;
    let reader = if is_gz {
        FileReader::Gzipped(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        FileReader::Uncompressed(BufReader::new(file))
    };
    Ok(reader)
}

/// Line-oriented reader over a plain or gzipped text file.
pub fn text_reader(path: &Path) -> Result<BufReader<FileReader>, PipelineError> {
    Ok(BufReader::new(file_reader(path)?))
}

/// Reads the first line of a text file, without its line terminator.
pub fn first_line(path: &Path) -> Result<Option<String>, PipelineError> {
    let mut reader = text_reader(path)?;
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(trim_line_end(&line).to_string()))
}

pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

pub type GzFileWriter = GzEncoder<BufWriter<File>>;

/// Creates (or truncates) a gzip-compressed output file.
pub fn gz_writer(path: &Path, level: u32) -> Result<GzFileWriter, PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path).map_err(|e| {
        PipelineError::IOError(format!("Failed to create {}: {}", path.display(), e))
    })?;
    Ok(GzEncoder::new(BufWriter::new(file), Compression::new(level)))
}

/// Writes the gzip trailer and flushes the underlying file.
pub fn finish_gz(writer: GzFileWriter) -> Result<(), PipelineError> {
    let mut inner = writer.finish()?;
    inner.flush()?;
    Ok(())
}

/// Checks every input exists, is a regular file and can be opened, before any
/// output is created.
pub fn validate_file_inputs(paths: &[PathBuf]) -> Result<(), PipelineError> {
    for path in paths {
        let metadata = fs::metadata(path).map_err(|e| PipelineError::MissingInput {
            path: path.clone(),
            error: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(PipelineError::MissingInput {
                path: path.clone(),
                error: "not a regular file".to_string(),
            });
        }
        File::open(path).map_err(|e| PipelineError::MissingInput {
            path: path.clone(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Deletes outputs of a failed run. Missing files are ignored.
pub fn remove_partial_outputs(paths: &[&Path]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed partial output {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
        }
    }
}

/// Builds a path from a base, optional directory, and optional prefix/suffix.
///
/// # Arguments
///
/// * `base` - File name or path. Absolute paths ignore `dir`.
/// * `dir` - Directory to resolve relative paths against.
/// * `prefix` - Joined before the file name with `delimiter`.
/// * `suffix` - Joined after the file name with `delimiter`.
/// * `delimiter` - Separator for prefix/suffix.
///
/// # Returns
/// PathBuf
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let resolved = match dir {
        Some(d) if base.is_relative() => d.join(base),
        _ => base.to_path_buf(),
    };

    if prefix.is_none() && suffix.is_none() {
        return resolved;
    }

    let file_name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut new_name = String::new();
    if let Some(p) = prefix {
        new_name.push_str(p);
        new_name.push_str(delimiter);
    }
    new_name.push_str(&file_name);
    if let Some(s) = suffix {
        new_name.push_str(delimiter);
        new_name.push_str(s);
    }
    resolved.with_file_name(new_name)
}

/// Sample id from the directory two levels above a result file,
/// e.g. `out/sampleA/star/ReadsPerGene.out.tab` -> `sampleA`.
pub fn sample_id_from_path(path: &Path) -> Option<String> {
    path.parent()?
        .parent()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_gzipped() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let plain = dir.path().join("plain.txt");
        fs::write(&plain, "gene\t1\n")?;
        assert!(!is_gzipped(&plain)?);

        let gz = dir.path().join("x.txt.gz");
        let writer = gz_writer(&gz, 6)?;
        finish_gz(writer)?;
        assert!(is_gzipped(&gz)?);

        let empty = dir.path().join("empty");
        fs::write(&empty, "")?;
        assert!(!is_gzipped(&empty)?);
        Ok(())
    }

    #[test]
    fn test_text_reader_reads_gz_and_plain() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let gz = dir.path().join("lines.gz");
        let mut writer = gz_writer(&gz, 6)?;
        writer.write_all(b"first\nsecond\n")?;
        finish_gz(writer)?;
        assert_eq!(first_line(&gz)?, Some("first".to_string()));

        let plain = dir.path().join("lines.txt");
        fs::write(&plain, "header\r\nrow\n")?;
        assert_eq!(first_line(&plain)?, Some("header".to_string()));
        Ok(())
    }

    #[test]
    fn test_missing_input() {
        let err = validate_file_inputs(&[PathBuf::from("/no/such/file.fastq.gz")]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[test]
    fn test_file_path_manipulator() {
        let out = file_path_manipulator(
            Path::new("R1.fastq.gz"),
            Some(Path::new("/out/s1")),
            Some("s1"),
            None,
            "_",
        );
        assert_eq!(out, PathBuf::from("/out/s1/s1_R1.fastq.gz"));

        let abs = file_path_manipulator(Path::new("/data/a.fq"), Some(Path::new("/elsewhere")), None, None, "");
        assert_eq!(abs, PathBuf::from("/data/a.fq"));
    }

    #[test]
    fn test_sample_id_from_path() {
        assert_eq!(
            sample_id_from_path(Path::new("out/sampleA/star/ReadsPerGene.out.tab")),
            Some("sampleA".to_string())
        );
        assert_eq!(sample_id_from_path(Path::new("results.xprs")), None);
    }
}
