//! Execution planning and dispatch.
//!
//! A plan lists every job reachable from a root, dependencies first, grouped
//! into runs of equal sort tag. Jobs inside a run never depend on each other,
//! so with more than one thread a run is dispatched to the pool as a whole and
//! runs are separated by barriers.
//!
//! Plans are cached between blocks and hold nodes weakly. The cache is keyed
//! on the graph's topology version and the root; a plan that refers to a node
//! destroyed since it was built is rebuilt once before giving up on the block.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use sonora_rt::ThreadPool;

use crate::arena::NodeId;
use crate::connection::{FeedTarget, LiveFeed};
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::node::{BlockInfo, NodeCell, NodeState};

struct FeedRef {
    source: Weak<NodeCell>,
    output: usize,
    target: FeedTarget,
}

/// A planned node.
pub struct Job {
    id: NodeId,
    sort_tag: i32,
    node: Weak<NodeCell>,
    feeds: Vec<FeedRef>,
}

impl Job {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Relative depth: dependencies always carry a smaller tag than their
    /// dependents, and the deepest job has tag 0.
    pub fn sort_tag(&self) -> i32 {
        self.sort_tag
    }
}

#[derive(Default)]
pub struct Plan {
    jobs: Vec<Job>,
}

impl Plan {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn order(&self) -> Vec<NodeId> {
        self.jobs.iter().map(Job::id).collect()
    }

    pub fn tag_of(&self, id: NodeId) -> Option<i32> {
        self.jobs
            .iter()
            .find(|job| job.id == id)
            .map(Job::sort_tag)
    }

    /// Contiguous slices of jobs sharing a sort tag.
    pub fn runs(&self) -> Runs<'_> {
        Runs { rest: &self.jobs }
    }

    pub fn run_count(&self) -> usize {
        self.runs().count()
    }
}

pub struct Runs<'a> {
    rest: &'a [Job],
}

impl<'a> Iterator for Runs<'a> {
    type Item = &'a [Job];

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.rest.first()?.sort_tag;
        let len = self
            .rest
            .iter()
            .take_while(|job| job.sort_tag == tag)
            .count();
        let (run, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(run)
    }
}

struct Walk<'g> {
    graph: &'g Graph,
    tags: HashMap<NodeId, i32>,
    recorded: HashSet<NodeId>,
    order: Vec<NodeId>,
}

impl Walk<'_> {
    fn is_live(&self, id: NodeId) -> bool {
        self.graph
            .node(id)
            .is_ok_and(|cell| cell.state() != NodeState::Paused)
    }

    /// Post-order walk. A job's tag only ever decreases; a recorded job whose
    /// tag would not change is not descended into again.
    fn visit(&mut self, id: NodeId, tag: i32) {
        let current = self.tags.get(&id).copied();
        if let Some(current) = current {
            if current <= tag && self.recorded.contains(&id) {
                return;
            }
        }
        let tag = current.map_or(tag, |current| current.min(tag));
        self.tags.insert(id, tag);
        for dependency in self.graph.dependencies(id) {
            if self.is_live(dependency) {
                self.visit(dependency, tag - 1);
            }
        }
        if self.recorded.insert(id) {
            self.order.push(id);
        }
    }
}

/// Computes the execution plan for everything `root` depends on. Paused
/// nodes, and anything only reachable through them, are left out.
pub fn build_plan(graph: &Graph, root: NodeId) -> Result<Plan> {
    let root_cell = graph.node(root)?;
    let mut walk = Walk {
        graph,
        tags: HashMap::new(),
        recorded: HashSet::new(),
        order: Vec::new(),
    };
    if root_cell.state() != NodeState::Paused {
        walk.visit(root, 0);
    }
    let Walk {
        tags, mut order, ..
    } = walk;
    // Post-order lists dependencies first; reversed and then sorted by tag,
    // jobs inside a run come out in reverse discovery order.
    order.reverse();
    order.sort_by_key(|id| tags[id]);
    let base = tags.values().copied().min().unwrap_or_default();

    let mut jobs = Vec::with_capacity(order.len());
    for id in order {
        let cell = graph.node(id)?;
        let feeds = graph
            .feeds(id)
            .filter_map(|(from, output, target)| {
                let source = graph.node(from).ok()?;
                (source.state() != NodeState::Paused).then(|| FeedRef {
                    source: Arc::downgrade(source),
                    output,
                    target,
                })
            })
            .collect();
        jobs.push(Job {
            id,
            sort_tag: tags[&id] - base,
            node: Arc::downgrade(cell),
            feeds,
        });
    }
    Ok(Plan { jobs })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub rebuilds: u64,
    pub executions: u64,
    pub retries: u64,
    /// Runs in the most recently executed plan.
    pub runs: usize,
    /// Barriers submitted while executing the most recent plan.
    pub barriers: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    version: u64,
    root: NodeId,
}

struct LiveJob {
    node: Arc<NodeCell>,
    feeds: Vec<LiveFeed>,
}

impl LiveJob {
    fn run(&self, block: &BlockInfo) {
        self.node.process(&self.feeds, block);
    }
}

pub struct Planner {
    plan: Plan,
    cache: Option<CacheKey>,
    pool: ThreadPool,
    stats: PlanStats,
    live: Vec<Arc<LiveJob>>,
}

impl Planner {
    pub fn new() -> Self {
        Self {
            plan: Plan::default(),
            cache: None,
            pool: ThreadPool::new(),
            stats: PlanStats::default(),
            live: Vec::new(),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn stats(&self) -> PlanStats {
        self.stats
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Renders one block of everything `root` depends on.
    pub fn execute(
        &mut self,
        graph: &Graph,
        root: NodeId,
        threads: usize,
        block: &BlockInfo,
    ) -> Result<()> {
        let threads = threads.max(1);
        if threads > 1 {
            self.pool.set_thread_count(threads)?;
        } else if self.pool.is_running() {
            self.pool.stop();
        }

        let mut retried = false;
        loop {
            let key = CacheKey {
                version: graph.version(),
                root,
            };
            if self.cache != Some(key) {
                self.rebuild(graph, key)?;
            }
            if self.resolve() {
                break;
            }
            self.invalidate();
            if retried {
                return Err(EngineError::Internal(format!(
                    "plan for {root} still references a destroyed node after replanning"
                )));
            }
            tracing::warn!(%root, "cached plan references a destroyed node; replanning");
            self.stats.retries += 1;
            retried = true;
        }

        for job in &self.live {
            job.node.will_execute_dependencies();
        }

        let mut barriers = 0;
        if threads == 1 {
            for job in &self.live {
                job.run(block);
            }
        } else {
            let mut index = 0;
            for (run_index, run) in self.plan.runs().enumerate() {
                if run_index > 0 {
                    self.pool.submit_barrier();
                    barriers += 1;
                }
                for job in &self.live[index..index + run.len()] {
                    let job = Arc::clone(job);
                    let block = *block;
                    self.pool.submit(move || job.run(&block));
                }
                index += run.len();
            }
        }
        let synced = self.pool.sync();
        self.live.clear();
        synced?;

        self.stats.executions += 1;
        self.stats.runs = self.plan.run_count();
        self.stats.barriers = barriers;
        Ok(())
    }

    fn rebuild(&mut self, graph: &Graph, key: CacheKey) -> Result<()> {
        self.plan = build_plan(graph, key.root)?;
        self.cache = Some(key);
        self.stats.rebuilds += 1;
        tracing::debug!(
            root = %key.root,
            jobs = self.plan.len(),
            runs = self.plan.run_count(),
            "plan rebuilt"
        );
        Ok(())
    }

    /// Upgrades the cached plan to strong references for one block.
    fn resolve(&mut self) -> bool {
        self.live.clear();
        for job in &self.plan.jobs {
            let Some(node) = job.node.upgrade() else {
                self.live.clear();
                return false;
            };
            let mut feeds = Vec::with_capacity(job.feeds.len());
            for feed in &job.feeds {
                let Some(source) = feed.source.upgrade() else {
                    self.live.clear();
                    return false;
                };
                feeds.push(LiveFeed {
                    source,
                    output: feed.output,
                    target: feed.target,
                });
            }
            self.live.push(Arc::new(LiveJob { node, feeds }));
        }
        true
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}
