//! Load and run phases over parsed operation tapes.
//!
//! A workload executes in two phases against one index instance:
//!
//! 1. **Load**: the load trace's PUT operations are applied on a single
//!    thread. The keys inserted here are sorted into a snapshot that later
//!    resolves SCAN endpoints, so every SCAN range refers to the key
//!    population as of load time regardless of run-phase inserts.
//! 2. **Run**: the run trace is striped across N worker threads (worker
//!    `i` executes operations `i, i+N, i+2N, …`). All workers rendezvous
//!    on a barrier, the wall clock starts as they are released, and stops
//!    on a second barrier once every worker drained its stripe.

use lattice_common::{IndexKind, Result, RunConfig};
use lattice_index::{BPlusTree, Index, InvertedIndex, SkipList};
use log::info;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use crate::trace::{TraceOp, TraceParser};

/// The index under test. Operations common to all kinds dispatch over the
/// variant; range scans are routed explicitly and only the B+ tree answers
/// them.
pub enum BenchIndex {
    SkipList(SkipList<String, String>),
    Inverted(InvertedIndex<String, String>),
    BPlusTree(BPlusTree<String, String>),
}

impl BenchIndex {
    pub fn for_kind(kind: IndexKind) -> Self {
        match kind {
            IndexKind::SkipList => BenchIndex::SkipList(SkipList::new()),
            IndexKind::InvertedIndex => BenchIndex::Inverted(InvertedIndex::new()),
            IndexKind::BPlusTree => BenchIndex::BPlusTree(BPlusTree::new()),
        }
    }

    pub fn insert(&self, key: String, value: String) -> bool {
        match self {
            BenchIndex::SkipList(index) => index.insert(key, value),
            BenchIndex::Inverted(index) => index.insert(key, value),
            BenchIndex::BPlusTree(index) => index.insert(key, value),
        }
    }

    pub fn search(&self, key: &String) -> HashSet<String> {
        match self {
            BenchIndex::SkipList(index) => index.search(key),
            BenchIndex::Inverted(index) => index.search(key),
            BenchIndex::BPlusTree(index) => index.search(key),
        }
    }

    /// Ordered scan over `[lo, hi)`; non-ordered kinds ignore it.
    pub fn range_search(&self, lo: &String, hi: &String) -> BTreeMap<String, HashSet<String>> {
        match self {
            BenchIndex::BPlusTree(index) => index.range_search(lo, hi),
            _ => BTreeMap::new(),
        }
    }
}

/// Run-phase outcome.
pub struct RunReport {
    pub operations: u64,
    pub elapsed: Duration,
}

impl RunReport {
    /// Operations per second over the timed window.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.operations as f64 / secs
        } else {
            0.0
        }
    }
}

/// Drives one load-then-run workload execution.
pub struct Runner {
    index: BenchIndex,
    parser: TraceParser,
    config: RunConfig,
    /// Load-phase key population, ascending, deduplicated.
    sorted_keys: Vec<String>,
    /// Key to its rank in `sorted_keys`.
    key_ranks: HashMap<String, usize>,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            index: BenchIndex::for_kind(config.kind),
            parser: TraceParser::new(config.key_size, config.value_size),
            config,
            sorted_keys: Vec::new(),
            key_ranks: HashMap::new(),
        }
    }

    /// Applies the load trace single-threaded and snapshots its key
    /// population for SCAN endpoint resolution.
    pub fn load_phase(&mut self, path: &Path) -> Result<()> {
        let start = Instant::now();
        let operations = self.parser.parse_file(path)?;
        info!("load trace: {} operations", operations.len());

        let mut keys = Vec::new();
        for op in operations {
            if let TraceOp::Put { key, value } = op {
                keys.push(key.clone());
                self.index.insert(key, value);
            }
        }

        keys.sort_unstable();
        keys.dedup();
        self.key_ranks = keys
            .iter()
            .enumerate()
            .map(|(rank, key)| (key.clone(), rank))
            .collect();
        self.sorted_keys = keys;

        info!(
            "load phase done: {} distinct keys in {} ms",
            self.sorted_keys.len(),
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Resolves a SCAN's end key from the load-phase snapshot: the key
    /// `count` ranks after the scanned key. `None` when the key was never
    /// loaded or the range runs off the end of the snapshot.
    fn resolve_scan_end(&self, key: &String, count: usize) -> Option<&String> {
        let start = *self.key_ranks.get(key)?;
        self.sorted_keys.get(start + count)
    }

    /// Replays the run trace across the configured worker count and times
    /// the window between the start and end barriers.
    pub fn run_phase(&self, path: &Path) -> Result<RunReport> {
        let operations = self.parser.parse_file(path)?;
        info!("run trace: {} operations", operations.len());

        let threads = self.config.threads.max(1);
        let total_ops = AtomicU64::new(0);
        let start_barrier = Barrier::new(threads + 1);
        let end_barrier = Barrier::new(threads + 1);

        let mut elapsed = Duration::ZERO;
        thread::scope(|scope| {
            for worker in 0..threads {
                let operations = &operations;
                let total_ops = &total_ops;
                let start_barrier = &start_barrier;
                let end_barrier = &end_barrier;
                scope.spawn(move || {
                    start_barrier.wait();
                    let mut executed = 0u64;
                    for op in operations.iter().skip(worker).step_by(threads) {
                        self.execute(op);
                        executed += 1;
                    }
                    total_ops.fetch_add(executed, Ordering::Relaxed);
                    end_barrier.wait();
                });
            }

            start_barrier.wait();
            let start = Instant::now();
            end_barrier.wait();
            elapsed = start.elapsed();
        });

        Ok(RunReport {
            operations: total_ops.load(Ordering::Relaxed),
            elapsed,
        })
    }

    fn execute(&self, op: &TraceOp) {
        match op {
            TraceOp::Put { key, value } => {
                self.index.insert(key.clone(), value.clone());
            }
            TraceOp::Get { key } => {
                let _ = self.index.search(key);
            }
            TraceOp::Scan { key, count } => {
                if let Some(end) = self.resolve_scan_end(key, *count) {
                    let _ = self.index.range_search(key, end);
                }
            }
        }
    }
}
