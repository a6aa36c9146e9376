// Dynamic Child Factory
// Materializes one block run per combination of dynamic ancestor items

use crate::error::{ServiceError, ServiceResult};
use crate::execution::cache::{PositionKey, TickCache};
use crate::execution::factory::create_run;
use crate::execution::graph::BlockGraph;
use crate::execution::identifier::{instance_uuid, placeholder_uuid, Coordinate};
use crate::outputs::OutputReader;
use crate::pipeline::models::Block;
use crate::runs::models::{BlockRun, BlockRunMetrics, BlockRunStatus};
use crate::runs::store::RunRecordStore;

use serde_json::Value;
use std::cmp::Ordering;

/// One dynamic upstream contributing a dimension to the cross-product
#[derive(Debug, Clone)]
pub struct Axis {
    pub ancestor: String,
    /// Per-item metadata, one entry per item
    pub items: Vec<Option<Value>>,
}

/// Restrict a position to the keys of another block's schema
pub fn restrict(position: &PositionKey, schema: &[String]) -> PositionKey {
    position
        .iter()
        .filter(|(key, _)| schema.contains(*key))
        .map(|(key, index)| (key.clone(), *index))
        .collect()
}

/// Order instances by their indexes in schema order, then by uuid
pub fn compare_positions(a: &BlockRun, b: &BlockRun, schema: &[String]) -> Ordering {
    let key = |run: &BlockRun| -> Vec<Option<usize>> {
        schema
            .iter()
            .map(|k| run.metrics.dynamic_block_indexes.get(k).copied())
            .collect()
    };
    key(a)
        .cmp(&key(b))
        .then_with(|| a.block_uuid.cmp(&b.block_uuid))
}

/// Cross-product of axis items in axis order, then index order.
///
/// An empty axis is carried as a placeholder (no coordinate) so it does not
/// suppress the other axes, even when they are empty too. Only a lone empty
/// axis yields no combinations. Zero axes yield the single identity
/// combination.
pub fn cross_product(axes: &[Axis]) -> Vec<Vec<Coordinate>> {
    if let [only] = axes {
        if only.items.is_empty() {
            return Vec::new();
        }
    }

    let mut combinations: Vec<Vec<Coordinate>> = vec![Vec::new()];
    for axis in axes.iter().filter(|axis| !axis.items.is_empty()) {
        let mut next = Vec::with_capacity(combinations.len() * axis.items.len());
        for combination in &combinations {
            for (index, metadata) in axis.items.iter().enumerate() {
                let mut extended = combination.clone();
                extended.push(
                    Coordinate::new(axis.ancestor.as_str(), index).with_metadata(metadata.clone()),
                );
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

/// Merge two partial positions; `None` when a shared ancestor disagrees
fn join(base: &[Coordinate], other: &[Coordinate]) -> Option<Vec<Coordinate>> {
    let mut merged = base.to_vec();
    for coord in other {
        match merged.iter().find(|c| c.ancestor == coord.ancestor) {
            Some(existing) if existing.index != coord.index => return None,
            Some(_) => {}
            None => merged.push(coord.clone()),
        }
    }
    Some(merged)
}

/// Fan-out of a block with one or more dynamic ancestors
pub struct DynamicChildFactory<'a> {
    graph: &'a BlockGraph,
    block: &'a Block,
    warning_threshold: usize,
}

impl<'a> DynamicChildFactory<'a> {
    pub fn new(graph: &'a BlockGraph, block: &'a Block) -> Self {
        Self {
            graph,
            block,
            warning_threshold: usize::MAX,
        }
    }

    /// Log a warning when one call spans more combinations than this
    pub fn with_warning_threshold(mut self, threshold: usize) -> Self {
        self.warning_threshold = threshold;
        self
    }

    /// Coordinates of the live instances of a fanned-out block, in position order
    fn instance_coords(&self, cache: &TickCache, block: &Block) -> Vec<Vec<Coordinate>> {
        let schema = self.graph.position_schema(&block.uuid);
        let mut instances: Vec<&BlockRun> = cache
            .clones(&block.uuid)
            .into_iter()
            .filter(|run| run.status != BlockRunStatus::Cancelled)
            .collect();
        instances.sort_by(|a, b| compare_positions(a, b, schema));

        instances
            .into_iter()
            .map(|run| {
                schema
                    .iter()
                    .filter_map(|key| {
                        let index = *run.metrics.dynamic_block_indexes.get(key)?;
                        Some(
                            Coordinate::new(key.as_str(), index)
                                .with_metadata(run.metrics.metadata.get(key).cloned()),
                        )
                    })
                    .collect()
            })
            .collect()
    }

    /// Positions inherited from fanned-out upstream blocks
    ///
    /// A replica takes the positions of the block it replicates. Otherwise
    /// the instances of every fanned-out upstream are joined on their shared
    /// ancestors; with no fanned-out upstream there is one empty base.
    pub fn bases(&self, cache: &TickCache) -> Vec<Vec<Coordinate>> {
        if let Some(replica) = self
            .block
            .replicated_block
            .as_deref()
            .and_then(|uuid| self.graph.block(uuid))
            .filter(|replica| replica.is_dynamic_child)
        {
            return self.instance_coords(cache, replica);
        }

        let mut bases: Vec<Vec<Coordinate>> = vec![Vec::new()];
        for upstream in self.graph.upstreams(self.block) {
            if !upstream.is_dynamic_child {
                continue;
            }
            let instances = self.instance_coords(cache, upstream);
            bases = bases
                .iter()
                .flat_map(|base| instances.iter().filter_map(move |inst| join(base, inst)))
                .collect();
        }
        bases
    }

    /// Item axes for one base, or `None` while an item source has not completed
    pub async fn axes(
        &self,
        cache: &mut TickCache,
        reader: &dyn OutputReader,
        base: &[Coordinate],
    ) -> ServiceResult<Option<Vec<Axis>>> {
        if self.is_replica() {
            return Ok(Some(Vec::new()));
        }

        let position: PositionKey = base.iter().map(|c| (c.ancestor.clone(), c.index)).collect();
        let mut axes = Vec::new();

        for upstream in self.graph.upstreams(self.block) {
            if !upstream.is_dynamic || position.contains_key(&upstream.uuid) {
                continue;
            }

            let source = if upstream.is_dynamic_child {
                let key = restrict(&position, self.graph.position_schema(&upstream.uuid));
                cache.instance_at(&upstream.uuid, &key)
            } else {
                cache.run(&upstream.uuid)
            };
            let source_uuid = match source {
                Some(run) if run.is_completed() => run.block_uuid.clone(),
                _ => return Ok(None),
            };

            let items = cache
                .output(reader, &source_uuid)
                .await?
                .map(|output| {
                    (0..output.len())
                        .map(|i| output.metadata_at(i).cloned())
                        .collect()
                })
                .unwrap_or_default();

            axes.push(Axis {
                ancestor: upstream.uuid.clone(),
                items,
            });
        }

        Ok(Some(axes))
    }

    fn is_replica(&self) -> bool {
        self.block
            .replicated_block
            .as_deref()
            .map(|uuid| self.graph.is_fanned(uuid))
            .unwrap_or(false)
    }

    /// Create a block run for every combination not materialized yet
    pub async fn materialize(
        &self,
        cache: &mut TickCache,
        reader: &dyn OutputReader,
        store: &dyn RunRecordStore,
    ) -> ServiceResult<Vec<BlockRun>> {
        if !self.graph.has_dynamic_ancestor(&self.block.uuid) {
            return Err(ServiceError::MissingDynamicAncestor(self.block.uuid.clone()));
        }

        let schema = self.graph.position_schema(&self.block.uuid);
        let mut ordinal = 0;
        let mut combination_count = 0;
        let mut created = Vec::new();

        for base in self.bases(cache) {
            // ordinals count combinations in base order, so later bases wait
            // until the items of this one are known
            let Some(axes) = self.axes(cache, reader, &base).await? else {
                break;
            };

            let combinations = cross_product(&axes);
            combination_count += combinations.len();

            for combination in combinations {
                let combination_ordinal = ordinal;
                ordinal += 1;

                let mut coords = base.clone();
                coords.extend(combination);
                coords.sort_by_key(|c| {
                    schema
                        .iter()
                        .position(|key| key == &c.ancestor)
                        .unwrap_or(usize::MAX)
                });

                let uuid = if coords.is_empty() {
                    placeholder_uuid(&self.block.uuid, combination_ordinal)
                } else {
                    instance_uuid(&self.block.uuid, &coords)
                };
                if cache.run(&uuid).is_some() {
                    continue;
                }

                let metrics = BlockRunMetrics {
                    dynamic_block_index: Some(combination_ordinal),
                    dynamic_block_indexes: coords
                        .iter()
                        .map(|c| (c.ancestor.clone(), c.index))
                        .collect(),
                    metadata: coords
                        .iter()
                        .filter_map(|c| Some((c.ancestor.clone(), c.metadata.clone()?)))
                        .collect(),
                };

                if let Some(run) = create_run(store, cache, uuid, metrics).await? {
                    created.push(run);
                }
            }
        }

        if !created.is_empty() && combination_count > self.warning_threshold {
            tracing::warn!(
                block = %self.block.uuid,
                combinations = combination_count,
                threshold = self.warning_threshold,
                "dynamic child cross-product is unusually large"
            );
        }

        tracing::debug!(
            block = %self.block.uuid,
            combinations = combination_count,
            created = created.len(),
            "materialized dynamic child runs"
        );
        Ok(created)
    }
}
