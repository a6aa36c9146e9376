// Block Graph (DAG) Builder
// Resolves block definitions into a validated DAG with derived fan-out roles

use crate::execution::identifier::SEGMENT_SEPARATOR;
use crate::pipeline::models::{Block, BlockDefinition, Pipeline};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to unknown block
    UnknownDependency,
    /// Invalid pipeline structure
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }
}

/// Static block DAG of a pipeline
#[derive(Debug, Clone)]
pub struct BlockGraph {
    pipeline_uuid: String,
    /// Blocks in declaration order
    blocks: Vec<Block>,
    /// Quick lookup of block index by uuid
    indices: HashMap<String, usize>,
    /// Block indices in topological order
    order: Vec<usize>,
    /// Whether a dynamic ancestor can actually be resolved for each block
    resolvable: Vec<bool>,
    /// Ordered ancestor keys that make up an instance position, per block
    schemas: Vec<Vec<String>>,
}

impl BlockGraph {
    /// Build a block graph from a pipeline definition
    pub fn from_pipeline(pipeline: &Pipeline) -> Result<Self, GraphError> {
        let (blocks, indices) = Self::build_blocks(&pipeline.blocks)?;

        let mut graph = Self {
            pipeline_uuid: pipeline.uuid.clone(),
            resolvable: vec![false; blocks.len()],
            schemas: vec![Vec::new(); blocks.len()],
            blocks,
            indices,
            order: Vec::new(),
        };

        graph.validate()?;
        graph.order = graph.compute_topological_order();
        graph.derive_dynamic_children(&pipeline.blocks)?;
        graph.compute_position_schemas();

        Ok(graph)
    }

    /// Resolve definitions into blocks and fill in downstream edges
    fn build_blocks(
        definitions: &[BlockDefinition],
    ) -> Result<(Vec<Block>, HashMap<String, usize>), GraphError> {
        let mut indices = HashMap::with_capacity(definitions.len());

        for (i, def) in definitions.iter().enumerate() {
            if def.uuid.is_empty() {
                return Err(GraphError::invalid_structure(format!(
                    "block #{} has an empty uuid",
                    i + 1
                )));
            }
            if def.uuid.contains(SEGMENT_SEPARATOR) {
                return Err(GraphError::invalid_structure(format!(
                    "block uuid '{}' must not contain '{}'",
                    def.uuid, SEGMENT_SEPARATOR
                )));
            }
            if indices.insert(def.uuid.clone(), i).is_some() {
                return Err(GraphError::invalid_structure(format!(
                    "duplicate block uuid '{}'",
                    def.uuid
                )));
            }
        }

        let mut blocks: Vec<Block> = definitions
            .iter()
            .map(|def| Block {
                uuid: def.uuid.clone(),
                upstream_blocks: def.upstream_blocks.clone(),
                downstream_blocks: Vec::new(),
                is_dynamic: def.dynamic,
                is_dynamic_child: false,
                reduce_output: def.reduce_output,
                replicated_block: def.replicated_block.clone(),
                fanout: def.fanout.clone(),
            })
            .collect();

        for def in definitions {
            for upstream in &def.upstream_blocks {
                let idx = indices.get(upstream).ok_or_else(|| {
                    GraphError::unknown_dependency(format!(
                        "block '{}' depends on unknown block '{}'",
                        def.uuid, upstream
                    ))
                })?;
                blocks[*idx].downstream_blocks.push(def.uuid.clone());
            }

            if let Some(replica) = &def.replicated_block {
                if replica == &def.uuid {
                    return Err(GraphError::invalid_structure(format!(
                        "block '{}' cannot replicate itself",
                        def.uuid
                    )));
                }
                if !indices.contains_key(replica) {
                    return Err(GraphError::unknown_dependency(format!(
                        "block '{}' replicates unknown block '{}'",
                        def.uuid, replica
                    )));
                }
            }
        }

        Ok((blocks, indices))
    }

    /// Edges that constrain ordering: upstream blocks plus the replicated block
    fn ordering_dependencies(block: &Block) -> impl Iterator<Item = &String> {
        block
            .upstream_blocks
            .iter()
            .chain(block.replicated_block.iter())
    }

    /// Validate the graph (check for cycles)
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for block in &self.blocks {
            if !visited.contains(&block.uuid) {
                if let Some(cycle) = self.dfs_cycle(block, &mut visited, &mut rec_stack) {
                    return Err(GraphError::cyclic(format!(
                        "circular dependency detected in blocks: {}",
                        cycle.join(" -> ")
                    )));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &Block,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        let name = node.uuid.clone();
        visited.insert(name.clone());
        rec_stack.insert(name.clone());

        for dep in Self::ordering_dependencies(node) {
            if !visited.contains(dep) {
                if let Some(idx) = self.indices.get(dep) {
                    if let Some(mut cycle) = self.dfs_cycle(&self.blocks[*idx], visited, rec_stack)
                    {
                        cycle.insert(0, name.clone());
                        return Some(cycle);
                    }
                }
            } else if rec_stack.contains(dep) {
                return Some(vec![name.clone(), dep.clone()]);
            }
        }

        rec_stack.remove(&name);
        None
    }

    /// Kahn's algorithm, seeded and expanded in declaration order so ties
    /// always resolve the same way
    fn compute_topological_order(&self) -> Vec<usize> {
        let mut in_degree = vec![0usize; self.blocks.len()];
        let mut adj_list: Vec<Vec<usize>> = vec![Vec::new(); self.blocks.len()];

        for (i, block) in self.blocks.iter().enumerate() {
            for dep in Self::ordering_dependencies(block) {
                if let Some(&dep_idx) = self.indices.get(dep) {
                    adj_list[dep_idx].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.blocks.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.blocks.len());

        while let Some(idx) = queue.pop_front() {
            result.push(idx);
            for &neighbor in &adj_list[idx] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        result
    }

    /// Work out which blocks are instantiated per dynamic item
    ///
    /// A block is a dynamic child when it does not reduce its output and
    /// one of its upstream blocks is dynamic or is itself a dynamic child,
    /// or when it replicates a dynamic child. Reducers cut the chain.
    fn derive_dynamic_children(&mut self, definitions: &[BlockDefinition]) -> Result<(), GraphError> {
        for position in 0..self.order.len() {
            let idx = self.order[position];
            let block = &self.blocks[idx];

            let via_upstream = block.upstream_blocks.iter().any(|u| {
                let upstream = &self.blocks[self.indices[u]];
                upstream.is_dynamic || upstream.is_dynamic_child
            });
            let via_replica = block
                .replicated_block
                .as_ref()
                .map(|r| self.blocks[self.indices[r]].is_dynamic_child)
                .unwrap_or(false);
            let derived = !block.reduce_output && (via_upstream || via_replica);

            let is_dynamic_child = match definitions[idx].dynamic_child {
                Some(false) if derived => {
                    return Err(GraphError::invalid_structure(format!(
                        "block '{}' has a dynamic ancestor but declares dynamic_child: false; \
                         mark it reduce_output to collapse the fan-out",
                        block.uuid
                    )));
                }
                Some(true) if block.reduce_output => {
                    return Err(GraphError::invalid_structure(format!(
                        "block '{}' cannot both reduce its output and be a dynamic child",
                        block.uuid
                    )));
                }
                Some(declared) => declared || derived,
                None => derived,
            };

            self.resolvable[idx] = derived;
            self.blocks[idx].is_dynamic_child = is_dynamic_child;
        }

        Ok(())
    }

    fn compute_position_schemas(&mut self) {
        for position in 0..self.order.len() {
            let idx = self.order[position];
            let block = &self.blocks[idx];

            let schema = if !block.is_dynamic_child {
                Vec::new()
            } else if block.is_incremental() {
                vec![block.uuid.clone()]
            } else if let Some(replica) = block
                .replicated_block
                .as_ref()
                .filter(|r| self.blocks[self.indices[*r]].is_dynamic_child)
            {
                self.schemas[self.indices[replica]].clone()
            } else {
                let mut keys: Vec<String> = Vec::new();
                for upstream in &block.upstream_blocks {
                    let up_idx = self.indices[upstream];
                    if self.blocks[up_idx].is_dynamic_child {
                        for key in &self.schemas[up_idx] {
                            if !keys.contains(key) {
                                keys.push(key.clone());
                            }
                        }
                    }
                }
                for upstream in &block.upstream_blocks {
                    if self.blocks[self.indices[upstream]].is_dynamic && !keys.contains(upstream) {
                        keys.push(upstream.clone());
                    }
                }
                keys
            };

            self.schemas[idx] = schema;
        }
    }

    pub fn pipeline_uuid(&self) -> &str {
        &self.pipeline_uuid
    }

    /// Get a block by uuid
    pub fn block(&self, uuid: &str) -> Option<&Block> {
        self.indices.get(uuid).map(|&idx| &self.blocks[idx])
    }

    /// All blocks in declaration order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Get blocks in topological order (respecting dependencies)
    pub fn topological_order(&self) -> Vec<&Block> {
        self.order.iter().map(|&idx| &self.blocks[idx]).collect()
    }

    /// Direct upstream blocks of a block, in declaration order
    pub fn upstreams<'a>(&'a self, block: &'a Block) -> impl Iterator<Item = &'a Block> + 'a {
        block
            .upstream_blocks
            .iter()
            .filter_map(move |u| self.block(u))
    }

    /// Whether the block is instantiated once per item combination
    pub fn is_fanned(&self, uuid: &str) -> bool {
        self.block(uuid).map(|b| b.is_dynamic_child).unwrap_or(false)
    }

    /// Whether a dynamic ancestor actually exists for the block
    pub fn has_dynamic_ancestor(&self, uuid: &str) -> bool {
        self.indices
            .get(uuid)
            .map(|&idx| self.resolvable[idx])
            .unwrap_or(false)
    }

    /// Ordered ancestor keys identifying an instance of the block
    pub fn position_schema(&self, uuid: &str) -> &[String] {
        self.indices
            .get(uuid)
            .map(|&idx| self.schemas[idx].as_slice())
            .unwrap_or(&[])
    }

    /// Every block reachable upstream of `uuid`, including replicated blocks
    pub fn ancestors(&self, uuid: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![uuid];

        while let Some(current) = stack.pop() {
            if let Some(block) = self.block(current) {
                for dep in Self::ordering_dependencies(block) {
                    if seen.insert(dep.clone()) {
                        stack.push(dep);
                    }
                }
            }
        }

        seen
    }

    /// Get blocks that can run in parallel (no dependencies between them)
    pub fn parallel_levels(&self) -> Vec<Vec<&Block>> {
        let mut levels: Vec<Vec<&Block>> = Vec::new();
        let mut assigned: HashMap<&str, usize> = HashMap::new();

        for block in self.topological_order() {
            let level = Self::ordering_dependencies(block)
                .filter_map(|dep| assigned.get(dep.as_str()))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(block.uuid.as_str(), level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(block);
        }

        levels
    }
}
