//! External tool probing. The pipeline never runs the aligner or quantifier
//! itself; it only records which versions the surrounding workflow will use.

use std::path::Path;
use anyhow::{anyhow, Result};
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::OnceCell;
use crate::config::defs::{EXPRESS_TAG, GFFREAD_TAG, SAMTOOLS_TAG, STAR_TAG, TOOL_VERSIONS};


/// Result of asking one tool for its version.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolVersion {
    pub tool: String,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl ToolVersion {
    pub fn is_available(&self) -> bool {
        self.version.is_some()
    }
}

static PROBED_VERSIONS: OnceCell<Vec<ToolVersion>> = OnceCell::const_new();

const VERSION_ARGS: &[&str] = &["--version"];


/// Arguments that make each tool print its version, and which whitespace
/// token of the first output line holds it.
fn version_probe(tool: &str) -> Result<(&'static [&'static str], usize)> {
    match tool {
        STAR_TAG => Ok((VERSION_ARGS, 0)),        // 2.7.10b
        SAMTOOLS_TAG => Ok((VERSION_ARGS, 1)),    // samtools 1.20
        GFFREAD_TAG => Ok((VERSION_ARGS, 0)),     // 0.12.7
        EXPRESS_TAG => Ok((VERSION_ARGS, 1)),     // express v1.5.1
        _ => Err(anyhow!("Unknown tool: {}", tool)),
    }
}

/// Pulls the version token from a tool's output.
pub fn parse_version(tool: &str, output: &str) -> Result<String> {
    let (_, field) = version_probe(tool)?;
    let first_line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("No output from {} --version", tool))?;
    let version = first_line
        .split_whitespace()
        .nth(field)
        .ok_or_else(|| anyhow!("Invalid {} --version output: {}", tool, first_line))?
        .trim_start_matches('v')
        .to_string();
    if version.is_empty() {
        return Err(anyhow!("Empty version number in {} --version output: {}", tool, first_line));
    }
    Ok(version)
}

/// Leading (major, minor) of a version string such as `2.7.10b`.
pub fn major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = leading_number(parts.next()?)?;
    let minor = parts.next().and_then(leading_number).unwrap_or(0);
    Some((major, minor))
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

pub async fn check_version(tool: &str) -> Result<String> {
    let (args, _) = version_probe(tool)?;

    let output = Command::new(tool)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is {} installed?", tool, e, tool))?;

    // gffread reports on stderr
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stdout.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        stdout.into_owned()
    };
    let version = parse_version(tool, &text)?;

    if let (Some(found), Some(minimum)) = (major_minor(&version), TOOL_VERSIONS.get(tool)) {
        if found < *minimum {
            warn!("{} {} is older than the supported minimum {}.{}", tool, version, minimum.0, minimum.1);
        }
    }
    Ok(version)
}

/// Probes each tool once for the lifetime of the process. Later calls return
/// the cached table regardless of `tools`.
pub async fn init_tool_versions(tools: &[&str]) -> &'static [ToolVersion] {
    PROBED_VERSIONS
        .get_or_init(|| async {
            let probes = tools.iter().map(|tool| async move {
                match check_version(tool).await {
                    Ok(version) => {
                        debug!("{} version {}", tool, version);
                        ToolVersion { tool: tool.to_string(), version: Some(version), error: None }
                    }
                    Err(e) => {
                        warn!("Could not determine {} version: {}", tool, e);
                        ToolVersion { tool: tool.to_string(), version: None, error: Some(e.to_string()) }
                    }
                }
            });
            join_all(probes).await
        })
        .await
}

/// Cached versions, if `init_tool_versions` has run.
pub fn tool_versions() -> Option<&'static [ToolVersion]> {
    PROBED_VERSIONS.get().map(Vec::as_slice)
}

/// Fails if any probed tool is unavailable.
pub fn require_tools(versions: &[ToolVersion]) -> Result<()> {
    let missing: Vec<&str> = versions
        .iter()
        .filter(|v| !v.is_available())
        .map(|v| v.tool.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Required tool(s) unavailable: {}", missing.join(", ")))
    }
}

/// Writes `tool<TAB>version` lines, `NA` for unavailable tools.
pub fn write_tool_versions(versions: &[ToolVersion], path: &Path) -> Result<()> {
    let mut table = String::from("tool\tversion\n");
    for v in versions {
        table.push_str(&v.tool);
        table.push('\t');
        table.push_str(v.version.as_deref().unwrap_or("NA"));
        table.push('\n');
    }
    std::fs::write(path, table)?;
    info!("Tool versions written to {}", path.display());
    Ok(())
}
