//! Export command implementation.

use super::{client, JobArgs};
use crate::error::{CliError, CliResult};
use kvexport_core::{
    plan_job, to_standard_json, Clock, ExportClient, JobConf, JobPlan, LogReporter, MemoryStore,
    ReadStats, SystemClock,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// What an export wrote.
#[derive(Debug, Serialize)]
pub struct ExportSummary {
    /// One part file per split, in split order.
    pub files: Vec<PathBuf>,
    /// Counters of all workers combined.
    pub stats: ReadStats,
}

/// Runs the export command.
pub fn run(job: &JobArgs, output: &Path, workers: u32) -> CliResult<()> {
    let conf = job.to_conf()?;
    let summary = export(job.load_store()?, &conf, output, workers, Arc::new(SystemClock::new()))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Plans the job and runs one worker thread per split.
///
/// Every worker is allowed to finish; the first failure is returned.
pub fn export(
    store: Arc<MemoryStore>,
    conf: &JobConf,
    output: &Path,
    workers: u32,
    clock: Arc<dyn Clock>,
) -> CliResult<ExportSummary> {
    let client = client(store, conf, clock.clone())?;
    let plan = plan_job(&client, conf, workers)?;
    std::fs::create_dir_all(output)?;

    let results: Vec<CliResult<(PathBuf, ReadStats)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..plan.splits.len())
            .map(|index| {
                let client = client.clone();
                let clock = clock.clone();
                let plan = &plan;
                scope.spawn(move || export_split(plan, client, conf, index, clock, output))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(CliError::WorkerPanicked(index)))
            })
            .collect()
    });

    let mut summary = ExportSummary {
        files: Vec::with_capacity(results.len()),
        stats: ReadStats::default(),
    };
    for result in results {
        let (path, stats) = result?;
        summary.files.push(path);
        summary.stats.merge(&stats);
    }
    info!(
        files = summary.files.len(),
        items = summary.stats.items,
        consumed = summary.stats.consumed_capacity,
        retries = summary.stats.retries,
        "export complete"
    );
    Ok(summary)
}

fn export_split(
    plan: &JobPlan,
    client: ExportClient<Arc<MemoryStore>>,
    conf: &JobConf,
    index: usize,
    clock: Arc<dyn Clock>,
    output: &Path,
) -> CliResult<(PathBuf, ReadStats)> {
    let mut reader = plan
        .reader(client, conf, index, clock)?
        .with_reporter(Arc::new(LogReporter::new(format!("worker-{index}"))));
    let path = output.join(format!("part-{index:05}.json"));
    let mut out = BufWriter::new(File::create(&path)?);

    let result = reader.run(|item| -> CliResult<()> {
        serde_json::to_writer(&mut out, &to_standard_json(&item))?;
        out.write_all(b"\n")?;
        Ok(())
    });
    let stats = match result {
        Ok(stats) => stats,
        Err(err) => {
            let checkpoint = reader.checkpoint().to_json().unwrap_or_default();
            error!(worker = index, error = %err, %checkpoint, "worker failed");
            return Err(err);
        }
    };
    out.flush()?;
    info!(
        worker = index,
        items = stats.items,
        pages = stats.pages,
        consumed = stats.consumed_capacity,
        retries = stats.retries,
        throttle_waits = stats.throttle_waits,
        "worker finished"
    );
    Ok((path, stats))
}
