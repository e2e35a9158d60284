//! Scheduling of processing and solving steps.
use log::info;

use partial_ref::{partial, PartialRef};

use crate::cdcl::conflict_step;
use crate::clause::reduce::{reduce_locals, reduce_mids};
use crate::clause::{db, Tier};
use crate::config::RestartSchedule;
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseActivityP,
    ClauseAllocP, ClauseDbP, Context, DefinitionsP, ImplGraphP, IncrementalP, IntEngineP, ModalP,
    ScheduleP, SolverConfigP, SolverStateP, TmpDataP, TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::prop::restart;
use crate::state::SatState;

mod luby;

use luby::LubySequence;

/// Scheduling of processing and solving steps.
#[derive(Default)]
pub struct Schedule {
    conflicts: u64,
    next_restart: u64,
    restarts: u64,
    luby: LubySequence,
    geometric_interval: f64,
}

impl Schedule {
    /// Number of conflicts seen so far.
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }
}

/// Perform one step of the schedule.
pub fn schedule_step(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut BusP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefinitionsP,
        mut ImplGraphP,
        mut IncrementalP,
        mut IntEngineP,
        mut ModalP,
        mut ScheduleP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) -> bool {
    let (schedule, mut ctx) = ctx.split_part_mut(ScheduleP);

    let (
        reduce_locals_interval,
        reduce_mids_interval,
        max_learnts,
        restart_schedule,
        restart_interval_scale,
        geometric_restart_factor,
    ) = {
        let config = ctx.part(SolverConfigP);
        (
            config.reduce_locals_interval,
            config.reduce_mids_interval,
            config.max_learnts,
            config.restart_schedule,
            config.restart_interval_scale,
            config.geometric_restart_factor,
        )
    };

    if ctx.part(SolverStateP).sat_state != SatState::Unknown {
        return false;
    }

    if schedule.conflicts > 0 && schedule.conflicts % 5000 == 0 {
        let db = ctx.part(ClauseDbP);
        let units = ctx.part(TrailP).top_level_assignment_count();
        info!(
            "confl: {}k rest: {} vars: {} bin: {} irred: {} core: {} mid: {} local: {}",
            schedule.conflicts / 1000,
            schedule.restarts,
            ctx.part(AssignmentP).assignment().len() - units,
            ctx.part(BinaryClausesP).count(),
            db.count_by_tier(Tier::Irred),
            db.count_by_tier(Tier::Core),
            db.count_by_tier(Tier::Mid),
            db.count_by_tier(Tier::Local)
        );
    }

    if schedule.next_restart == schedule.conflicts {
        restart(ctx.borrow());
        schedule.restarts += 1;
        let interval = match restart_schedule {
            RestartSchedule::Luby => restart_interval_scale * schedule.luby.advance(),
            RestartSchedule::Geometric => {
                if schedule.geometric_interval < restart_interval_scale as f64 {
                    schedule.geometric_interval = restart_interval_scale as f64;
                }
                let interval = schedule.geometric_interval as u64;
                schedule.geometric_interval *= geometric_restart_factor;
                interval
            }
        };
        schedule.next_restart += interval;
    }

    if schedule.conflicts > 0 {
        if schedule.conflicts % reduce_locals_interval == 0 {
            reduce_locals(ctx.borrow());
        }
        if schedule.conflicts % reduce_mids_interval == 0 {
            reduce_mids(ctx.borrow());
        }
    }

    if max_learnts > 0 && ctx.part(ClauseDbP).learnt_count() > max_learnts {
        reduce_locals(ctx.borrow());
    }

    db::collect_garbage(ctx.borrow());

    conflict_step(ctx.borrow());
    schedule.conflicts += 1;
    true
}
