use crate::output;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use color_eyre::Result;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use fanout_service::execution::identifier::base_uuid;
use fanout_service::{
    progress_channel, Block, BlockExecutor, BlockGraph, BlockOutcome, BlockRun, BlockRunStatus,
    DynamicOutput, DynamicScheduler, ExecutionEvent, LogLevel, MemoryOutputStore, MemoryRunStore,
    OutputWriter, PipelineParser, PipelineRunner, RunRecordStore,
};

/// Simulate a pipeline run with fixture outputs for dynamic blocks
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// YAML file mapping block (or block instance) uuids to their output items
    #[arg(long, short = 'o', value_name = "FILE")]
    pub outputs: Option<PathBuf>,

    /// Make every run of a block fail (can be repeated)
    #[arg(long = "fail", value_name = "BLOCK")]
    pub fail: Vec<String>,

    /// Maximum concurrently executing block runs (overrides pipeline settings)
    #[arg(long, short = 'j', value_name = "N")]
    pub parallel: Option<usize>,

    /// Print the metrics of every block run
    #[arg(long)]
    pub metrics: bool,
}

/// Items for one block, either a bare list or values with per-item metadata
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FixtureOutput {
    Items(Vec<Value>),
    Full {
        values: Vec<Value>,
        #[serde(default)]
        metadata: Vec<Value>,
    },
}

impl From<FixtureOutput> for DynamicOutput {
    fn from(fixture: FixtureOutput) -> Self {
        match fixture {
            FixtureOutput::Items(values) => DynamicOutput::new(values),
            FixtureOutput::Full { values, metadata } => {
                DynamicOutput::new(values).with_metadata(metadata)
            }
        }
    }
}

fn load_fixtures(path: &Path) -> Result<HashMap<String, DynamicOutput>> {
    let content = std::fs::read_to_string(path)?;
    let raw: HashMap<String, FixtureOutput> = serde_yaml::from_str(&content)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}

/// Executor that writes fixture items instead of running user code
struct FixtureExecutor {
    outputs: MemoryOutputStore,
    fixtures: HashMap<String, DynamicOutput>,
    fail: HashSet<String>,
}

#[async_trait]
impl BlockExecutor for FixtureExecutor {
    async fn execute(&self, block: &Block, block_run: &BlockRun, partition: &str) -> BlockOutcome {
        if self.fail.contains(&block.uuid) || self.fail.contains(&block_run.block_uuid) {
            return BlockOutcome::Failed("failure requested with --fail".to_string());
        }
        if !block.is_dynamic {
            return BlockOutcome::Completed;
        }

        // instance-specific fixtures win over the block-wide one
        let output = self
            .fixtures
            .get(&block_run.block_uuid)
            .or_else(|| self.fixtures.get(base_uuid(&block_run.block_uuid)))
            .cloned()
            .unwrap_or_default();

        match self
            .outputs
            .write_output(&block_run.block_uuid, partition, output)
            .await
        {
            Ok(()) => BlockOutcome::Completed,
            Err(e) => BlockOutcome::Failed(e.to_string()),
        }
    }
}

pub async fn execute(args: SimulateArgs) -> Result<()> {
    let pipeline_path = &args.pipeline;

    if !pipeline_path.exists() {
        color_eyre::eyre::bail!("Pipeline file not found: {}", pipeline_path.display());
    }

    output::status("Parsing", &format!("{}", pipeline_path.display()));
    let pipeline = PipelineParser::from_file(pipeline_path)?;
    let graph = BlockGraph::from_pipeline(&pipeline)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to build block graph: {}", e.message))?;

    let fixtures = match &args.outputs {
        Some(path) => load_fixtures(path)?,
        None => HashMap::new(),
    };
    for uuid in fixtures.keys() {
        if graph.block(base_uuid(uuid)).is_none() {
            output::warning(&format!("Fixture '{}' matches no block", uuid));
        }
    }

    let mut config = pipeline.settings.clone();
    if let Some(parallel) = args.parallel {
        config = config.with_max_parallel_runs(parallel);
    }

    let store = MemoryRunStore::new();
    let outputs = MemoryOutputStore::new();
    let pipeline_run = store
        .create_pipeline_run(&pipeline.uuid, config.execution_partition.as_deref())
        .await?;

    let (tx, mut rx) = progress_channel();
    let scheduler = DynamicScheduler::new(
        Arc::new(graph),
        Arc::new(store.clone()),
        Arc::new(outputs.clone()),
    )
    .with_config(config)
    .with_progress(tx.clone());

    let executor = FixtureExecutor {
        outputs,
        fixtures,
        fail: args.fail.iter().cloned().collect(),
    };
    let runner =
        PipelineRunner::new(Arc::new(scheduler), Arc::new(executor)).with_progress(tx);

    // Ctrl-C cancels the pipeline run
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let pipeline_run_id = pipeline_run.id;
    let run_handle = tokio::spawn(async move { runner.run(pipeline_run_id, cancel_rx).await });

    while let Some(event) = rx.recv().await {
        match event {
            ExecutionEvent::PipelineRunStarted {
                pipeline_run_id,
                pipeline_uuid,
                total_blocks,
            } => {
                println!();
                output::header(&format!(
                    "Pipeline run {} of '{}' ({} blocks)",
                    pipeline_run_id, pipeline_uuid, total_blocks
                ));
            }
            ExecutionEvent::BlockRunsMaterialized {
                block_uuid,
                block_run_uuids,
            } => {
                output::dim(&format!(
                    "  + {} run(s) of '{}': {}",
                    block_run_uuids.len(),
                    block_uuid,
                    block_run_uuids.join(", ")
                ));
            }
            ExecutionEvent::BlockRunStarted { block_run_uuid } => {
                println!("    Running {}", block_run_uuid);
            }
            ExecutionEvent::BlockRunFinished {
                block_run_uuid,
                status,
                ..
            } => match status {
                BlockRunStatus::Completed => output::check(&block_run_uuid),
                _ => output::failure(&format!("{} {}", block_run_uuid, status)),
            },
            ExecutionEvent::FanoutProgress {
                block_uuid,
                completed,
                target,
            } => {
                output::info(&format!("'{}': {}/{} completed", block_uuid, completed, target));
            }
            ExecutionEvent::PipelineRunFinished { .. } => {}
            ExecutionEvent::Log { level, message, .. } => match level {
                LogLevel::Warning => output::warning(&message),
                LogLevel::Error => output::error(&message),
                _ => output::dim(&format!("  {}", message)),
            },
        }
    }

    let summary = run_handle.await??;

    println!();
    output::header("Block runs");
    for run in &summary.block_runs {
        let detail = if args.metrics {
            serde_json::to_string(&run.metrics)?
        } else {
            run.metrics
                .dynamic_block_index
                .map(|i| format!("index {}", i))
                .unwrap_or_default()
        };
        output::block_run_row(&run.block_uuid, run.status.as_str(), &detail);
    }

    println!();
    if summary.success() {
        output::success(&format!(
            "Pipeline run completed: {} block runs in {:.2}s",
            summary.block_runs.len(),
            summary.duration.as_secs_f64()
        ));
        Ok(())
    } else {
        output::failure(&format!(
            "Pipeline run {} after {:.2}s",
            summary.status,
            summary.duration.as_secs_f64()
        ));
        std::process::exit(1);
    }
}
