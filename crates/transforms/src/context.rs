//! State shared by the stages of one run, and the per-class view of it.

use crate::frame_resolver::SafeFrameResolver;
use crate::hierarchy::ClassHierarchy;
use crate::mapping::MappingTable;
use crate::matcher::IncludeMatcher;
use crate::naming::NamePool;
use crate::stats::Stats;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Everything that lives for exactly one archive run.
#[derive(Debug)]
pub struct RunContext {
    /// Selects the classes that get transformed.
    pub matcher: IncludeMatcher,
    pub names: NamePool,
    /// Every rename made so far, keyed by original identity.
    pub mappings: MappingTable,
    /// Super types and members of every class in the archive.
    pub hierarchy: ClassHierarchy,
    /// Source of all randomness in the run.
    pub rng: StdRng,
    /// Aggregate of every class written transformed.
    pub stats: Stats,
}

impl RunContext {
    /// A context seeded from `seed`, or from OS entropy when absent.
    pub fn new(matcher: IncludeMatcher, watermark: &str, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            matcher,
            names: NamePool::new(watermark),
            mappings: MappingTable::default(),
            hierarchy: ClassHierarchy::default(),
            rng,
            stats: Stats::default(),
        }
    }

    /// Drops all naming state so a new archive starts from `a0`.
    pub fn reset(&mut self) {
        self.names.clear();
        self.mappings.clear();
        self.hierarchy.clear();
        self.stats = Stats::default();
    }

    /// A frame resolver over the current mappings and hierarchy.
    pub fn resolver(&self) -> SafeFrameResolver<'_> {
        SafeFrameResolver::new(&self.mappings, &self.hierarchy)
    }
}

/// The run as seen while one class goes through the chain.
#[derive(Debug)]
pub struct ClassContext<'a> {
    pub run: &'a mut RunContext,
    /// Identity of the class before any stage renamed it.
    pub original_name: String,
    /// Counters of this class only; merged into the run once the class is written.
    pub stats: Stats,
}

impl<'a> ClassContext<'a> {
    /// Starts work on the class originally named `original_name`.
    pub fn new(run: &'a mut RunContext, original_name: impl Into<String>) -> Self {
        Self {
            run,
            original_name: original_name.into(),
            stats: Stats::default(),
        }
    }

    /// Whether the class being worked on matches the include patterns.
    pub fn is_included(&self) -> bool {
        self.run.matcher.matches(&self.original_name)
    }
}
