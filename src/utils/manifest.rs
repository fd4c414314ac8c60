use std::path::{Path, PathBuf};
use serde::Deserialize;
use log::debug;
use crate::config::defs::PipelineError;
use crate::utils::file::file_path_manipulator;

#[derive(Debug, Deserialize)]
struct ManifestRow {
    sample: String,
    r1: PathBuf,
    r2: PathBuf,
}

/// Lane files of one sample. `r1[i]` and `r2[i]` are the two halves of lane `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFiles {
    pub sample: String,
    pub r1: Vec<PathBuf>,
    pub r2: Vec<PathBuf>,
}

impl SampleFiles {
    pub fn lanes(&self) -> usize {
        self.r1.len()
    }

    pub fn all_inputs(&self) -> Vec<PathBuf> {
        self.r1.iter().chain(self.r2.iter()).cloned().collect()
    }
}

/// Sample -> lane files, in manifest order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    samples: Vec<SampleFiles>,
}

impl Manifest {
    /// Reads a tab-separated manifest with header `sample r1 r2`, one row per
    /// lane. Relative paths resolve against the manifest's directory.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| PipelineError::MissingInput {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        let mut manifest = Manifest::default();
        for (index, result) in rdr.deserialize().enumerate() {
            let row: ManifestRow = result.map_err(|e| {
                PipelineError::InvalidConfig(format!("Manifest {} row {}: {}", path.display(), index + 1, e))
            })?;
            if row.sample.is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "Manifest {} row {}: empty sample name",
                    path.display(),
                    index + 1
                )));
            }
            let r1 = file_path_manipulator(&row.r1, Some(&base_dir), None, None, "");
            let r2 = file_path_manipulator(&row.r2, Some(&base_dir), None, None, "");
            manifest.add_lane(&row.sample, r1, r2);
        }

        debug!("Manifest {}: {} sample(s)", path.display(), manifest.samples.len());
        Ok(manifest)
    }

    /// Builds a single-sample manifest from parallel R1/R2 lists.
    pub fn from_lists(sample: &str, r1: Vec<PathBuf>, r2: Vec<PathBuf>) -> Result<Self, PipelineError> {
        if r1.len() != r2.len() {
            return Err(PipelineError::LaneCountMismatch {
                sample: sample.to_string(),
                r1: r1.len(),
                r2: r2.len(),
            });
        }
        Ok(Manifest {
            samples: vec![SampleFiles { sample: sample.to_string(), r1, r2 }],
        })
    }

    fn add_lane(&mut self, sample: &str, r1: PathBuf, r2: PathBuf) {
        match self.samples.iter_mut().find(|s| s.sample == sample) {
            Some(files) => {
                files.r1.push(r1);
                files.r2.push(r2);
            }
            None => self.samples.push(SampleFiles {
                sample: sample.to_string(),
                r1: vec![r1],
                r2: vec![r2],
            }),
        }
    }

    pub fn samples(&self) -> &[SampleFiles] {
        &self.samples
    }

    pub fn get(&self, sample: &str) -> Option<&SampleFiles> {
        self.samples.iter().find(|s| s.sample == sample)
    }

    /// Keeps only the named samples. Unknown names are an error.
    pub fn select(&self, names: &[String]) -> Result<Vec<&SampleFiles>, PipelineError> {
        if names.is_empty() {
            return Ok(self.samples.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| PipelineError::InvalidConfig(format!("Sample '{}' not in manifest", name)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_groups_lanes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manifest.tsv");
        fs::write(
            &path,
            "sample\tr1\tr2\n\
             # lane split run\n\
             s1\tL1_R1.fq.gz\tL1_R2.fq.gz\n\
             s2\t/abs/s2_R1.fq.gz\t/abs/s2_R2.fq.gz\n\
             s1\tL2_R1.fq.gz\tL2_R2.fq.gz\n",
        )?;

        let manifest = Manifest::from_path(&path)?;
        assert_eq!(manifest.samples().len(), 2);

        let s1 = manifest.get("s1").expect("s1 present");
        assert_eq!(s1.lanes(), 2);
        assert_eq!(s1.r1, vec![dir.path().join("L1_R1.fq.gz"), dir.path().join("L2_R1.fq.gz")]);
        assert_eq!(s1.r2, vec![dir.path().join("L1_R2.fq.gz"), dir.path().join("L2_R2.fq.gz")]);

        let s2 = manifest.get("s2").expect("s2 present");
        assert_eq!(s2.r1, vec![PathBuf::from("/abs/s2_R1.fq.gz")]);

        assert_eq!(manifest.samples()[0].sample, "s1");
        Ok(())
    }

    #[test]
    fn test_manifest_select() -> anyhow::Result<()> {
        let manifest = Manifest::from_lists("a", vec![PathBuf::from("a1")], vec![PathBuf::from("a2")])?;
        assert_eq!(manifest.select(&[])?.len(), 1);
        assert!(manifest.select(&["b".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn test_manifest_lane_mismatch() {
        let err = Manifest::from_lists("a", vec![PathBuf::from("a1"), PathBuf::from("b1")], vec![PathBuf::from("a2")])
            .unwrap_err();
        assert!(matches!(err, PipelineError::LaneCountMismatch { r1: 2, r2: 1, .. }));
    }

    #[test]
    fn test_manifest_missing_column() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.tsv");
        fs::write(&path, "sample\tr1\ns1\tx.fq\n")?;
        assert!(matches!(Manifest::from_path(&path), Err(PipelineError::InvalidConfig(_))));
        Ok(())
    }
}
