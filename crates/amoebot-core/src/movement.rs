//! Joint movement resolution.
//!
//! Movements scheduled during move activation are resolved together into one
//! consistent displacement per entity, anchored at the system's anchor:
//!
//! 1. Each moving particle gets a movement vector. An expansion moves no
//!    existing node, so it transmits nothing through bonds; a contraction
//!    moves the vacated node onto the kept one, so bonds attached at the
//!    vacated part drag their neighbors by the same vector.
//! 2. The effective bond set for the round is computed from recorded flags,
//!    explicit per-label overrides, and the automatic adjustments (release
//!    the vacated side of a contraction unless explicitly kept). A bond
//!    exists on an edge only if both endpoints accept it; objects always
//!    accept.
//! 3. A breadth-first pass from the anchor assigns every entity an offset
//!    consistent with all its bonds. A contradiction is a joint movement
//!    conflict; an unreached entity is a disconnection.
//! 4. Post-movement positions are checked for double occupancy.
//!
//! Only when every check passes is anything recorded: new positions,
//! direction-normalized bond flags, and pin configuration resets for
//! particles whose expansion state changed. A conflict leaves the system
//! untouched.

use std::collections::{HashMap, HashSet, VecDeque};

use slotmap::SecondaryMap;

use crate::error::Conflict;
use crate::grid::{
    BodyPart, Direction, GridOffset, GridPos, MAX_LABELS, label_at, label_direction,
};
use crate::history::{History, Round};
use crate::id::{EntityId, ParticleId};
use crate::particle::{MoveIntent, Shape};
use crate::pins::PinConfiguration;
use crate::system::ParticleSystem;

/// Per-particle bond flags for one round.
///
/// `policy` is what will be recorded after the move: current flags with the
/// explicit overrides applied. `effective` additionally applies the
/// automatic transient adjustments and is what the bond graph is built from.
#[derive(Debug, Clone, Copy)]
struct RoundFlags {
    policy: [bool; MAX_LABELS],
    effective: [bool; MAX_LABELS],
}

/// Resolves all scheduled movements and commits them at the round in
/// flight. On conflict, nothing has been recorded.
pub(crate) fn resolve_and_commit(system: &mut ParticleSystem) -> Result<(), Conflict> {
    let round = system.clock.current;

    // Movement vectors and effective bonds per particle.
    let mut flags: SecondaryMap<ParticleId, RoundFlags> = SecondaryMap::new();
    for (id, particle) in &mut system.particles {
        let shape = particle.shape();
        let (move_vec, moving_part) = match particle.scratch.move_intent {
            Some(MoveIntent::Contract(into)) => {
                let vacated = into.opposite();
                (shape.part_node(into) - shape.part_node(vacated), Some(vacated))
            }
            Some(MoveIntent::Expand(_)) | None => (GridOffset::ZERO, None),
        };
        particle.scratch.move_vec = move_vec;
        particle.scratch.moving_part = moving_part;
        flags.insert(id, round_flags(particle.scratch.move_intent, &shape, |label| {
            (particle.scratch.bond_intents[label as usize], particle.bond_flag(label))
        }, particle.scratch.automatic_intent.unwrap_or(particle.automatic_bonds())));
    }

    let graph = build_bond_graph(system, &flags);
    let offsets = assign_offsets(system, &graph)?;

    // Every entity must have been reached through bonds.
    for (id, _) in &system.particles {
        if !offsets.contains_key(&EntityId::Particle(id)) {
            return Err(Conflict::Disconnection { entity: EntityId::Particle(id) });
        }
    }
    for (id, _) in &system.objects {
        if !offsets.contains_key(&EntityId::Object(id)) {
            return Err(Conflict::Disconnection { entity: EntityId::Object(id) });
        }
    }

    check_positions(system, &offsets)?;
    commit(system, &offsets, &flags, round);
    Ok(())
}

/// The policy and effective bond flags for one particle this round.
fn round_flags(
    intent: Option<MoveIntent>,
    shape: &Shape,
    lookup: impl Fn(u8) -> (Option<bool>, bool),
    automatic: bool,
) -> RoundFlags {
    let mut policy = [true; MAX_LABELS];
    let mut effective = [true; MAX_LABELS];
    for label in 0..MAX_LABELS as u8 {
        let (explicit, recorded) = lookup(label);
        policy[label as usize] = explicit.unwrap_or(recorded);
        effective[label as usize] = policy[label as usize];
        if explicit.is_some() || !automatic {
            continue;
        }
        match intent {
            // The vacated side of a contraction lets go by default.
            Some(MoveIntent::Contract(into)) => {
                if shape.label_part(label) == Some(into.opposite()) {
                    effective[label as usize] = false;
                }
            }
            // The edge an expansion grows across is always held.
            Some(MoveIntent::Expand(local_dir)) => {
                if label == local_dir.index() {
                    effective[label as usize] = true;
                }
            }
            None => {}
        }
    }
    RoundFlags { policy, effective }
}

/// One directed bond constraint: `offset(to) = offset(from) + delta`.
#[derive(Debug, Clone, Copy)]
struct Edge {
    to: EntityId,
    delta: GridOffset,
}

/// Builds the bond constraint graph from pre-movement positions.
fn build_bond_graph(
    system: &ParticleSystem,
    flags: &SecondaryMap<ParticleId, RoundFlags>,
) -> HashMap<EntityId, Vec<Edge>> {
    let mut graph: HashMap<EntityId, Vec<Edge>> = HashMap::new();
    let mut seen_edges: HashSet<(GridPos, GridPos)> = HashSet::new();

    let mut add = |graph: &mut HashMap<EntityId, Vec<Edge>>,
                   a: EntityId,
                   b: EntityId,
                   node_a: GridPos,
                   node_b: GridPos,
                   c_a: GridOffset,
                   c_b: GridOffset| {
        let key = if node_a < node_b { (node_a, node_b) } else { (node_b, node_a) };
        if !seen_edges.insert(key) {
            return;
        }
        graph.entry(a).or_default().push(Edge { to: b, delta: c_a - c_b });
        graph.entry(b).or_default().push(Edge { to: a, delta: c_b - c_a });
    };

    // Particle-owned edges: active on our side, accepted on theirs.
    for (id, particle) in &system.particles {
        let shape = particle.shape();
        let our_flags = &flags[id];
        for label in shape.labels() {
            if !our_flags.effective[label as usize] {
                continue;
            }
            let (Some(node), Some(target)) = (shape.label_node(label), shape.edge_target(label))
            else {
                continue;
            };
            let Some(&other) = system.position_index.get(&target) else {
                continue;
            };
            if other == EntityId::Particle(id) {
                continue;
            }
            let accepted = match other {
                EntityId::Object(_) => true,
                EntityId::Particle(them) => {
                    let their = &system.particles[them];
                    let their_shape = their.shape();
                    let part = if their_shape.head == target {
                        BodyPart::Head
                    } else {
                        BodyPart::Tail
                    };
                    match shape
                        .label_dir_global(label)
                        .and_then(|dir| their_shape.label_toward(part, dir.opposite()))
                    {
                        Some(facing) => flags[them].effective[facing as usize],
                        None => false,
                    }
                }
            };
            if !accepted {
                continue;
            }
            let c_ours = bond_contribution(particle.scratch.moving_part, particle.scratch.move_vec, &shape, node);
            let c_theirs = match other {
                EntityId::Object(_) => GridOffset::ZERO,
                EntityId::Particle(them) => {
                    let their = &system.particles[them];
                    bond_contribution(
                        their.scratch.moving_part,
                        their.scratch.move_vec,
                        &their.shape(),
                        target,
                    )
                }
            };
            add(&mut graph, EntityId::Particle(id), other, node, target, c_ours, c_theirs);
        }
    }

    // Object-object contact always bonds.
    for (id, object) in &system.objects {
        for node in object.nodes() {
            for neighbor in node.neighbors() {
                if let Some(&other) = system.position_index.get(&neighbor) {
                    if let EntityId::Object(them) = other {
                        if them != id {
                            add(
                                &mut graph,
                                EntityId::Object(id),
                                other,
                                node,
                                neighbor,
                                GridOffset::ZERO,
                                GridOffset::ZERO,
                            );
                        }
                    }
                }
            }
        }
    }

    graph
}

/// The movement a bond transmits from its owner: the owner's movement vector
/// if the bond attaches at the part being vacated, zero otherwise.
fn bond_contribution(
    moving_part: Option<BodyPart>,
    move_vec: GridOffset,
    shape: &Shape,
    attach_node: GridPos,
) -> GridOffset {
    match moving_part {
        Some(part) if shape.part_node(part) == attach_node => move_vec,
        _ => GridOffset::ZERO,
    }
}

/// Breadth-first offset assignment from the anchor.
fn assign_offsets(
    system: &ParticleSystem,
    graph: &HashMap<EntityId, Vec<Edge>>,
) -> Result<HashMap<EntityId, GridOffset>, Conflict> {
    let mut offsets = HashMap::new();
    let mut queue = VecDeque::new();
    offsets.insert(system.anchor, GridOffset::ZERO);
    queue.push_back(system.anchor);

    while let Some(entity) = queue.pop_front() {
        let here = offsets[&entity];
        let Some(edges) = graph.get(&entity) else {
            continue;
        };
        for edge in edges {
            let required = here + edge.delta;
            match offsets.get(&edge.to) {
                None => {
                    offsets.insert(edge.to, required);
                    queue.push_back(edge.to);
                }
                Some(&assigned) if assigned != required => {
                    return Err(Conflict::JointMovement { a: entity, b: edge.to });
                }
                Some(_) => {}
            }
        }
    }
    Ok(offsets)
}

/// A particle's geometry after applying its own movement and the assigned
/// offset.
pub(crate) fn moved_shape(shape: &Shape, intent: Option<MoveIntent>, offset: GridOffset) -> Shape {
    match intent {
        None => Shape { head: shape.head + offset, ..*shape },
        Some(MoveIntent::Expand(local_dir)) => {
            let global =
                crate::grid::local_to_global(shape.chirality, shape.compass, local_dir);
            Shape {
                head: shape.head + offset + global.offset(),
                expansion: Some(global),
                ..*shape
            }
        }
        Some(MoveIntent::Contract(into)) => Shape {
            head: shape.part_node(into) + offset,
            expansion: None,
            ..*shape
        },
    }
}

/// Verifies that no node is claimed twice after the move.
fn check_positions(
    system: &ParticleSystem,
    offsets: &HashMap<EntityId, GridOffset>,
) -> Result<(), Conflict> {
    let mut occupied: HashMap<GridPos, EntityId> = HashMap::with_capacity(system.position_index.len() + 2);
    for (id, particle) in &system.particles {
        let entity = EntityId::Particle(id);
        let shape = moved_shape(&particle.shape(), particle.scratch.move_intent, offsets[&entity]);
        for node in shape.nodes() {
            if let Some(&holder) = occupied.get(&node) {
                return Err(Conflict::Position { node, a: holder, b: entity });
            }
            occupied.insert(node, entity);
        }
    }
    for (id, object) in &system.objects {
        let entity = EntityId::Object(id);
        let offset = offsets[&entity];
        for node in object.nodes() {
            let node = node + offset;
            if let Some(&holder) = occupied.get(&node) {
                return Err(Conflict::Position { node, a: holder, b: entity });
            }
            occupied.insert(node, entity);
        }
    }
    Ok(())
}

/// Post-movement bond flags: each label inherits the policy of the edge in
/// the same local direction on the pre-movement shape, preferring the node
/// the particle ends on. Labels outside the new shape return to default.
fn normalized_flags(
    old: &Shape,
    intent: Option<MoveIntent>,
    policy: &[bool; MAX_LABELS],
) -> [bool; MAX_LABELS] {
    match intent {
        None => *policy,
        Some(MoveIntent::Expand(local_dir)) => {
            let mut flags = [true; MAX_LABELS];
            for (label, flag) in flags.iter_mut().enumerate() {
                if let Some(dir) = label_direction(label as u8, Some(local_dir)) {
                    *flag = policy[dir.index() as usize];
                }
            }
            flags
        }
        Some(MoveIntent::Contract(into)) => {
            let old_expansion = old.local_expansion();
            let mut flags = [true; MAX_LABELS];
            for (index, flag) in flags.iter_mut().take(6).enumerate() {
                let dir = Direction::from_index(index as u8);
                let source = label_at(into, dir, old_expansion)
                    .or_else(|| label_at(into.opposite(), dir, old_expansion));
                if let Some(label) = source {
                    *flag = policy[label as usize];
                }
            }
            flags
        }
    }
}

/// Records the resolved round: positions, expansion states, bond flags,
/// automatic-bond modes, and pin resets where the shape changed.
fn commit(
    system: &mut ParticleSystem,
    offsets: &HashMap<EntityId, GridOffset>,
    flags: &SecondaryMap<ParticleId, RoundFlags>,
    round: Round,
) {
    let pins_per_edge = system.pins_per_edge;
    for (id, particle) in &mut system.particles {
        let entity = EntityId::Particle(id);
        let old_shape = particle.shape();
        let intent = particle.scratch.move_intent;
        let new_shape = moved_shape(&old_shape, intent, offsets[&entity]);

        record(&mut particle.head, new_shape.head, round);
        record(&mut particle.expansion, new_shape.expansion, round);

        let new_flags = normalized_flags(&old_shape, intent, &flags[id].policy);
        for (label, history) in particle.bond_flags.iter_mut().enumerate() {
            record(history, new_flags[label], round);
        }
        if let Some(automatic) = particle.scratch.automatic_intent {
            record(&mut particle.automatic_bonds, automatic, round);
        }
        // A shape change invalidates the pin layout; fall back to singleton.
        if new_shape.expansion != old_shape.expansion {
            record(
                &mut particle.pin_config,
                PinConfiguration::singleton(pins_per_edge, new_shape.local_expansion()),
                round,
            );
        }
        if intent.is_some() {
            log::debug!(
                "particle {} moved: {:?} -> {:?}",
                particle.index,
                old_shape.head,
                new_shape.head
            );
        }
    }

    for (id, object) in &mut system.objects {
        let offset = offsets[&EntityId::Object(id)];
        if !offset.is_zero() {
            match object.displace(offset, round) {
                Ok(()) => {}
                Err(err) => unreachable!("object displacement record failed: {err}"),
            }
        }
    }

    system.rebuild_position_index();
}

fn record<T: Clone + PartialEq>(history: &mut History<T>, value: T, round: Round) {
    match history.record(value, round) {
        Ok(()) => {}
        Err(err) => unreachable!("movement commit record failed: {err}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
