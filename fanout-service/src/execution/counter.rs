// Dynamic Item Counters
// How many runtime instances an upstream fan-out source has produced so far

use crate::error::ServiceResult;
use crate::execution::cache::TickCache;
use crate::outputs::OutputReader;
use crate::pipeline::models::Block;
use crate::runs::models::BlockRunStatus;

use std::fmt;

/// Counter bound to one upstream block, selected from the upstream's flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicItemCounter {
    /// Dynamic source with a single run: the length of its output
    Dynamic { upstream: String },
    /// Fanned-out block: the number of its completed instances
    Child { upstream: String },
    /// Fanned-out block that is itself dynamic: the items written by each
    /// of its instances, summed
    Duo { upstream: String, include_running: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Dynamic,
    Child,
    Duo,
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterKind::Dynamic => "dynamic",
            CounterKind::Child => "dynamic child",
            CounterKind::Duo => "dynamic duo",
        };
        f.write_str(s)
    }
}

impl DynamicItemCounter {
    /// Pick the counter for `upstream`; `None` when it is not a fan-out source.
    ///
    /// `streaming` lets a duo counter include items written by instances
    /// that are still running.
    pub fn for_upstream(upstream: &Block, streaming: bool) -> Option<Self> {
        let uuid = upstream.uuid.clone();
        match (upstream.is_dynamic, upstream.is_dynamic_child) {
            (true, false) => Some(Self::Dynamic { upstream: uuid }),
            (false, true) => Some(Self::Child { upstream: uuid }),
            (true, true) => Some(Self::Duo {
                upstream: uuid,
                include_running: streaming,
            }),
            (false, false) => None,
        }
    }

    pub fn upstream(&self) -> &str {
        match self {
            Self::Dynamic { upstream } | Self::Child { upstream } | Self::Duo { upstream, .. } => {
                upstream
            }
        }
    }

    pub fn kind(&self) -> CounterKind {
        match self {
            Self::Dynamic { .. } => CounterKind::Dynamic,
            Self::Child { .. } => CounterKind::Child,
            Self::Duo { .. } => CounterKind::Duo,
        }
    }

    /// Items produced so far; `0` when the upstream has not written anything
    pub async fn item_count(
        &self,
        cache: &mut TickCache,
        reader: &dyn OutputReader,
    ) -> ServiceResult<usize> {
        match self {
            Self::Dynamic { upstream } => Ok(cache
                .output(reader, upstream)
                .await?
                .map(|output| output.len())
                .unwrap_or(0)),

            Self::Child { upstream } => Ok(cache
                .clones(upstream)
                .iter()
                .filter(|run| run.is_completed())
                .count()),

            Self::Duo {
                upstream,
                include_running,
            } => {
                let sources: Vec<String> = cache
                    .clones(upstream)
                    .iter()
                    .filter(|run| {
                        run.is_completed()
                            || (*include_running && run.status == BlockRunStatus::Running)
                    })
                    .map(|run| run.block_uuid.clone())
                    .collect();

                let mut total = 0;
                for instance in sources {
                    if let Some(output) = cache.output(reader, &instance).await? {
                        total += output.len();
                    }
                }
                Ok(total)
            }
        }
    }
}
