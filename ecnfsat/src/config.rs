//! Solver configuration.

/// Polarity chosen when branching on a variable.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PolarityMode {
    /// Branch on the positive literal first.
    True,
    /// Branch on the negative literal first.
    False,
    /// Pick a random polarity.
    Random,
    /// Reuse the value the variable had before it was last unassigned.
    Stored,
}

/// When the definition engine runs its unfounded-set search.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DefnStrategy {
    /// At every end of the propagation queue.
    Always,
    /// Skip a number of decision levels that adapts to how often the search
    /// finds something.
    Adaptive,
    /// Only on full assignments.
    Lazy,
}

/// Search order used when collecting an unfounded set.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UfsAlgo {
    Breadth,
    Depth,
}

/// Semantics given to inductive definitions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DefSemantics {
    WellFounded,
    Stable,
}

/// Restart schedule selection.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RestartSchedule {
    Luby,
    Geometric,
}

/// How aggregate head implications are produced.
///
/// 0 = propagator only, 1 = eager head implication clauses, 2 = both.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggSaving {
    PropagatorOnly,
    EagerClauses,
    Both,
}

/// Configurable parameters used during solving.
///
/// All flags are collected here and passed into the engine context at
/// construction; nothing consults process-wide state after that.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Multiplicative decay for the VSIDS decision heuristic.
    pub vsids_decay: f32,

    /// Multiplicative decay for clause activities.
    pub clause_activity_decay: f32,

    /// Polarity chosen when branching.
    pub polarity_mode: PolarityMode,

    /// Frequency of random branches in [0, 1].
    pub random_branch_freq: f64,

    /// Seed for the branching RNG.
    pub random_seed: u64,

    /// Number of conflicts between local clause reductions.
    pub reduce_locals_interval: u64,

    /// Number of conflicts between mid clause reductions.
    pub reduce_mids_interval: u64,

    /// Hard cap on the number of learnt long clauses; a reduction pass runs
    /// whenever the cap is exceeded. 0 disables the cap.
    pub max_learnts: usize,

    /// Scaling factor for restarts (number of conflicts).
    pub restart_interval_scale: u64,

    /// Restart schedule.
    pub restart_schedule: RestartSchedule,

    /// Growth factor of the geometric restart schedule.
    pub geometric_restart_factor: f64,

    /// When the definition engine searches for unfounded sets.
    pub defn_strategy: DefnStrategy,

    /// Search order of the unfounded-set search.
    pub ufs_algo: UfsAlgo,

    /// Semantics of inductive definitions.
    pub def_semantics: DefSemantics,

    /// Compile card/sum equivalence aggregates to CNF instead of using the
    /// partial-watch propagator.
    pub to_cnf: bool,

    /// How aggregate head implications are produced.
    pub agg_saving: AggSaving,

    /// External disjunctions of loop formulas longer than this get an
    /// auxiliary definition atom so that each stored clause stays small.
    pub loop_formula_aux_limit: usize,

    /// Whether internal atoms (choice-rule and rewrite auxiliaries) may be
    /// branched on.
    pub branch_on_internal: bool,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            vsids_decay: 0.95,
            clause_activity_decay: 0.999,
            polarity_mode: PolarityMode::False,
            random_branch_freq: 0.0,
            random_seed: 91_648_253,
            reduce_locals_interval: 15_000,
            reduce_mids_interval: 10_000,
            max_learnts: 0,
            restart_interval_scale: 128,
            restart_schedule: RestartSchedule::Luby,
            geometric_restart_factor: 1.5,
            defn_strategy: DefnStrategy::Always,
            ufs_algo: UfsAlgo::Breadth,
            def_semantics: DefSemantics::WellFounded,
            to_cnf: false,
            agg_saving: AggSaving::PropagatorOnly,
            loop_formula_aux_limit: 8,
            branch_on_internal: false,
        }
    }
}
