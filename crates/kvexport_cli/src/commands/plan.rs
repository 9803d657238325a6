//! Plan command implementation.

use super::{client, JobArgs};
use crate::error::CliResult;
use kvexport_core::{plan_job, JobPlan, ReadMode, SystemClock};
use serde::Serialize;
use std::sync::Arc;

/// The plan as printed.
#[derive(Debug, Serialize)]
pub struct PlanOutput {
    /// Table name.
    pub table: String,
    /// How segments are read.
    pub mode: ReadMode,
    /// Segments across all splits.
    pub total_segments: u32,
    /// Capacity units each worker may consume per second.
    pub units_per_worker: f64,
    /// One entry per split.
    pub splits: Vec<SplitOutput>,
}

/// One split as printed.
#[derive(Debug, Serialize)]
pub struct SplitOutput {
    /// Segment ids.
    pub segments: Vec<u32>,
    /// Row-key values, for keyed reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_keys: Option<Vec<u64>>,
}

impl From<&JobPlan> for PlanOutput {
    fn from(plan: &JobPlan) -> Self {
        let keyed = plan.mode == ReadMode::KeyedQuery;
        Self {
            table: plan.table.name.clone(),
            mode: plan.mode,
            total_segments: plan.splits.first().map_or(0, |s| s.total_segments()),
            units_per_worker: plan.rate.units_per_second,
            splits: plan
                .splits
                .iter()
                .map(|split| SplitOutput {
                    segments: split.segment_ids().to_vec(),
                    row_keys: keyed.then(|| split.row_keys()),
                })
                .collect(),
        }
    }
}

/// Runs the plan command.
pub fn run(job: &JobArgs, workers: u32) -> CliResult<()> {
    let conf = job.to_conf()?;
    let client = client(job.load_store()?, &conf, Arc::new(SystemClock::new()))?;
    let plan = plan_job(&client, &conf, workers)?;
    println!("{}", serde_json::to_string_pretty(&PlanOutput::from(&plan))?);
    Ok(())
}
