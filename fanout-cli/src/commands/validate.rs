use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use fanout_service::{Block, BlockGraph, PipelineParser};

/// Validate a pipeline YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Print the execution levels of the graph
    #[arg(long)]
    pub levels: bool,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let pipeline_path = &args.pipeline;

    if !pipeline_path.exists() {
        color_eyre::eyre::bail!("Pipeline file not found: {}", pipeline_path.display());
    }

    output::status("Validating", &format!("{}", pipeline_path.display()));

    let pipeline = match PipelineParser::from_file(pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };
    output::check("YAML syntax valid");

    let graph = match BlockGraph::from_pipeline(&pipeline) {
        Ok(graph) => graph,
        Err(e) => {
            output::error(&format!("Invalid block graph ({:?}): {}", e.kind, e.message));
            std::process::exit(1);
        }
    };
    output::check(&format!(
        "Pipeline '{}': {} blocks",
        pipeline.display_name(),
        graph.len()
    ));

    println!();
    for block in graph.topological_order() {
        let schema = graph.position_schema(&block.uuid);
        let position = if schema.is_empty() {
            "-".to_string()
        } else {
            schema.join(" x ")
        };
        println!("  {:<32} {:<28} {}", block.uuid, roles(block).join(", "), position);

        if block.is_dynamic_child && !graph.has_dynamic_ancestor(&block.uuid) {
            output::warning(&format!(
                "'{}' is declared a dynamic child but has no dynamic ancestor",
                block.uuid
            ));
        }
    }

    if args.levels {
        println!();
        for (i, level) in graph.parallel_levels().iter().enumerate() {
            let names: Vec<&str> = level.iter().map(|b| b.uuid.as_str()).collect();
            output::dim(&format!("  level {}: {}", i, names.join(", ")));
        }
    }

    println!();
    output::success("Pipeline is valid");

    Ok(())
}

fn roles(block: &Block) -> Vec<&'static str> {
    let mut roles = Vec::new();
    if block.is_dynamic {
        roles.push("dynamic");
    }
    if block.is_dynamic_child {
        roles.push(if block.is_incremental() {
            "incremental child"
        } else {
            "dynamic child"
        });
    }
    if block.is_streaming() {
        roles.push("streaming");
    }
    if block.reduce_output {
        roles.push("reduce");
    }
    if block.replicated_block.is_some() {
        roles.push("replica");
    }
    if roles.is_empty() {
        roles.push("block");
    }
    roles
}
