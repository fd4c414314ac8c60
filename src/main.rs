use std::time::{Instant, SystemTime};
use std::{env, fs};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::DateTime;

use anyhow::{anyhow, Result};
use log::{self, LevelFilter, debug, info, error};
use env_logger::Builder;

use rnaseq_pipelines::cli::{parse, Arguments};
use rnaseq_pipelines::config::defs::{
    PendingLimit, PipelineError, RunConfig, EXTERNAL_TOOLS, MERGE_FASTQS_MODULE, TOOL_VERSIONS_MODULE, TOOL_VERSIONS_TABLE,
};
use rnaseq_pipelines::pipelines::collate::{self, Collation};
use rnaseq_pipelines::pipelines::merge_fastqs;
use rnaseq_pipelines::utils::command::{init_tool_versions, require_tools, tool_versions, write_tool_versions};
use rnaseq_pipelines::utils::file::{file_path_manipulator, validate_file_inputs};
use rnaseq_pipelines::utils::system::default_pending_limit;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n RNA-seq pipelines\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    validate_references(&args, &dir)?;

    let pending_limit = match args.max_pending_reads {
        Some(n) => PendingLimit::from_arg(Some(n), 0),
        None => PendingLimit::from_arg(None, default_pending_limit()),
    };
    debug!("Pending-record limit: {:?}", pending_limit);

    if args.check_tools || args.require_tools || args.module == TOOL_VERSIONS_MODULE {
        let versions = init_tool_versions(EXTERNAL_TOOLS).await;
        if args.require_tools {
            require_tools(versions)?;
        }
    }

    let out_dir = setup_output_dir(&args, &dir)?;
    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd: dir,
        out_dir,
        args,
        pending_limit,
    });

    if let Err(e) = match module.as_str() {
        MERGE_FASTQS_MODULE => merge_fastqs_run(run_config).await,
        TOOL_VERSIONS_MODULE => tool_versions_run(run_config).await,
        other => match Collation::from_module(other) {
            Some(collation) => collate::run(run_config, collation).await,
            None => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
        },
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn merge_fastqs_run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    merge_fastqs::run(run_config).await
}

async fn tool_versions_run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let versions = match tool_versions() {
        Some(cached) => cached,
        None => init_tool_versions(EXTERNAL_TOOLS).await,
    };
    for v in versions {
        info!("{}\t{}", v.tool, v.version.as_deref().unwrap_or("NA"));
    }
    let path = run_config.out_dir.join(TOOL_VERSIONS_TABLE);
    write_tool_versions(versions, &path).map_err(|e| PipelineError::ToolExecution {
        tool: TOOL_VERSIONS_MODULE.to_string(),
        error: e.to_string(),
    })
}

/// Genome and annotation are passed through to the surrounding workflow;
/// only their presence is checked here.
fn validate_references(args: &Arguments, cwd: &Path) -> Result<()> {
    let references: Vec<PathBuf> = [&args.genome, &args.annotation]
        .into_iter()
        .flatten()
        .map(|f| file_path_manipulator(Path::new(f), Some(cwd), None, None, ""))
        .collect();
    validate_file_inputs(&references)?;
    for reference in &references {
        info!("Reference file: {}", reference.display());
    }
    Ok(())
}

/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `rnaseq_YYYYMMDD`.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &Arguments, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => {
            let timestamp = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                .map(|dt| dt.format("%Y%m%d").to_string())
                .unwrap_or_else(|| "19700101".to_string());
            cwd.join(format!("rnaseq_{}", timestamp))
        }
    };
    fs::create_dir_all(&out_dir)
        .map_err(|e| anyhow!("Cannot create output directory {}: {}", out_dir.display(), e))?;
    Ok(out_dir)
}
