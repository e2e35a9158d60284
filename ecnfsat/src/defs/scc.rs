//! Dependency analysis of definitions.
//!
//! Tarjan's algorithm runs twice: once over the full dependency graph, where a component
//! containing a negative arc marks its members as relevant for the well-founded check, and once
//! over the positive subgraph, whose nontrivial components are the candidates for unfounded-set
//! reasoning. Atoms on no cycle keep only their completion clauses.
use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashMap;

use crate::aggregate::Aggregates;
use crate::context::{AggregatesP, AssignmentP, Context, DefinitionsP};
use crate::lit::{Lit, Var};

use super::{DefOcc, DefType, Definitions};

/// One dependency arc from a head to a defined body atom.
#[derive(Copy, Clone)]
struct Arc {
    target: Var,
    positive: bool,
}

/// Iterative Tarjan over the selected subgraph.
///
/// Returns per-node component ids (dense, arbitrary order); nodes outside `nodes` get none.
fn tarjan(
    nodes: &[Var],
    arcs: &FxHashMap<Var, Vec<Arc>>,
    use_arc: impl Fn(&Arc) -> bool,
) -> FxHashMap<Var, usize> {
    #[derive(Default, Clone)]
    struct NodeState {
        index: Option<usize>,
        lowlink: usize,
        on_stack: bool,
    }

    let mut states: FxHashMap<Var, NodeState> = FxHashMap::default();
    for &node in nodes {
        states.insert(node, NodeState::default());
    }

    let mut components: FxHashMap<Var, usize> = FxHashMap::default();
    let mut component_count = 0;
    let mut counter = 0;
    let mut stack: Vec<Var> = vec![];

    // Explicit DFS frames: (node, next arc position).
    let mut frames: Vec<(Var, usize)> = vec![];

    for &root in nodes {
        if states[&root].index.is_some() {
            continue;
        }

        frames.push((root, 0));
        {
            let state = states.get_mut(&root).unwrap();
            state.index = Some(counter);
            state.lowlink = counter;
            state.on_stack = true;
        }
        counter += 1;
        stack.push(root);

        while let Some(&(node, arc_start)) = frames.last() {
            let node_arcs: Vec<Arc> = arcs.get(&node).cloned().unwrap_or_default();

            let mut descended = false;
            let mut arc_pos = arc_start;
            while arc_pos < node_arcs.len() {
                let arc = node_arcs[arc_pos];
                arc_pos += 1;

                if !use_arc(&arc) || !states.contains_key(&arc.target) {
                    continue;
                }

                if states[&arc.target].index.is_none() {
                    // Descend.
                    frames.last_mut().unwrap().1 = arc_pos;
                    let state = states.get_mut(&arc.target).unwrap();
                    state.index = Some(counter);
                    state.lowlink = counter;
                    state.on_stack = true;
                    counter += 1;
                    stack.push(arc.target);
                    frames.push((arc.target, 0));
                    descended = true;
                    break;
                } else if states[&arc.target].on_stack {
                    let target_index = states[&arc.target].index.unwrap();
                    let state = states.get_mut(&node).unwrap();
                    state.lowlink = state.lowlink.min(target_index);
                }
            }

            if descended {
                continue;
            }

            // Node finished.
            frames.pop();
            let node_state = states[&node].clone();

            if Some(node_state.lowlink) == node_state.index {
                loop {
                    let member = stack.pop().unwrap();
                    states.get_mut(&member).unwrap().on_stack = false;
                    components.insert(member, component_count);
                    if member == node {
                        break;
                    }
                }
                component_count += 1;
            }

            if let Some(&(parent, _)) = frames.last() {
                let child_lowlink = node_state.lowlink;
                let parent_state = states.get_mut(&parent).unwrap();
                parent_state.lowlink = parent_state.lowlink.min(child_lowlink);
            }
        }
    }

    components
}

/// Body literals of a head, looking through aggregate heads to their set literals.
fn body_lits(defs: &Definitions, aggregates: &Aggregates, var: Var) -> Vec<Lit> {
    let head = &defs.heads()[&var];
    match head.def_type {
        DefType::Disj | DefType::Conj => defs.rules()[head.rule as usize].body.clone(),
        DefType::Aggr => {
            let agg = &aggregates.aggs()[head.rule as usize];
            aggregates.sets()[agg.set]
                .wls
                .iter()
                .map(|wl| wl.lit)
                .collect()
        }
    }
}

/// Run both Tarjan passes and classify every defined atom.
pub fn analyze(mut ctx: partial!(Context, mut DefinitionsP, AggregatesP)) {
    let (defs, ctx) = ctx.split_part_mut(DefinitionsP);
    let aggregates = ctx.part(AggregatesP);

    let nodes: Vec<Var> = defs.defd_vars().to_vec();

    // Dependency arcs stay within one definition id.
    let mut arcs: FxHashMap<Var, Vec<Arc>> = FxHashMap::default();
    for &head_var in nodes.iter() {
        let def_id = defs.heads()[&head_var].def_id;
        let mut out = vec![];
        for lit in body_lits(defs, aggregates, head_var) {
            if let Some(target) = defs.heads().get(&lit.var()) {
                if target.def_id == def_id {
                    out.push(Arc {
                        target: lit.var(),
                        positive: lit.is_positive(),
                    });
                }
            }
        }
        arcs.insert(head_var, out);
    }

    // Pass 1: full graph; components with an internal negative arc are mixed.
    let full = tarjan(&nodes, &arcs, |_| true);

    let mut mixed_component: FxHashMap<usize, bool> = FxHashMap::default();
    for &node in nodes.iter() {
        let component = full[&node];
        for arc in arcs.get(&node).into_iter().flatten() {
            if !arc.positive && full.get(&arc.target) == Some(&component) {
                mixed_component.insert(component, true);
            }
        }
    }

    // Pass 2: positive subgraph.
    let positive = tarjan(&nodes, &arcs, |arc| arc.positive);

    let mut component_sizes: FxHashMap<usize, usize> = FxHashMap::default();
    for &node in nodes.iter() {
        *component_sizes.entry(positive[&node]).or_insert(0) += 1;
    }

    let mut pos_loops = false;
    let mut mixed_defs: Vec<usize> = vec![];

    for &node in nodes.iter() {
        let mut in_pos_loop = component_sizes[&positive[&node]] > 1;
        if !in_pos_loop {
            // A positive self-loop is a loop too.
            in_pos_loop = arcs
                .get(&node)
                .into_iter()
                .flatten()
                .any(|arc| arc.positive && arc.target == node);
        }

        let in_mixed_loop = mixed_component
            .get(&full[&node])
            .copied()
            .unwrap_or(false);

        let occ = match (in_pos_loop, in_mixed_loop) {
            (false, false) => DefOcc::NoLoop,
            (true, false) => DefOcc::PosLoop,
            (false, true) => DefOcc::MixedLoop,
            (true, true) => DefOcc::BothLoop,
        };

        pos_loops |= in_pos_loop;

        let def_id = defs.heads()[&node].def_id;
        if in_mixed_loop && !mixed_defs.contains(&def_id) {
            mixed_defs.push(def_id);
        }

        let head = defs.head_mut(node);
        head.occ = occ;
        head.scc = if in_pos_loop {
            positive[&node]
        } else {
            usize::max_value()
        };
    }

    defs.set_analysis_results(pos_loops, mixed_defs);
}

/// Build the occurrence lists and the initial justifications; heads that cannot be justified
/// from outside their component become the first cycle sources.
pub fn init_justifications(
    mut ctx: partial!(Context, mut DefinitionsP, AggregatesP, AssignmentP),
) {
    let (defs, ctx) = ctx.split_part_mut(DefinitionsP);
    let aggregates = ctx.part(AggregatesP);
    let assignment = ctx.part(AssignmentP);

    let nodes: Vec<Var> = defs.defd_vars().to_vec();

    for &head_var in nodes.iter() {
        let (occ, def_type, scc, rule_index) = {
            let head = &defs.heads()[&head_var];
            (head.occ, head.def_type, head.scc, head.rule)
        };

        if occ == DefOcc::NoLoop || occ == DefOcc::MixedLoop {
            continue;
        }

        match def_type {
            DefType::Disj => {
                let body = defs.rules()[rule_index as usize].body.clone();
                for &lit in body.iter() {
                    defs.add_disj_occurrence(lit, head_var);
                }
                let justification = body.iter().copied().find(|&l| {
                    !assignment.lit_is_false(l)
                        && (l.is_negative() || !super::same_scc(defs, scc, l.var()))
                });
                match justification {
                    Some(l) => defs.head_mut(head_var).justification = vec![l],
                    None => defs.add_cycle_source(head_var),
                }
            }
            DefType::Conj => {
                // Conjunctive justification is implicit; an in-component positive body atom
                // makes the head a cycle source until proven otherwise.
                let body = defs.rules()[rule_index as usize].body.clone();
                let mut cyclic = false;
                for &l in body.iter() {
                    if l.is_positive() && super::same_scc(defs, scc, l.var()) {
                        cyclic = true;
                        defs.add_conj_occurrence(l, head_var);
                    }
                }
                if cyclic {
                    defs.add_cycle_source(head_var);
                }
            }
            DefType::Aggr => {
                let agg = &aggregates.aggs()[rule_index as usize];
                for wl in aggregates.sets()[agg.set].wls.iter() {
                    defs.add_aggr_occurrence(wl.lit, head_var);
                }
                let mut jstf = vec![];
                let ok = aggregates.can_justify_head(
                    rule_index,
                    assignment,
                    |l| l.is_negative() || !super::same_scc(defs, scc, l.var()),
                    &mut jstf,
                );
                if ok {
                    defs.head_mut(head_var).justification = jstf;
                } else {
                    defs.add_cycle_source(head_var);
                }
            }
        }
    }
}
