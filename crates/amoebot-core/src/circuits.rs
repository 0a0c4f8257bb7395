//! Circuit discovery and beep resolution.
//!
//! Where two particles share an edge, their facing pins touch; partition
//! sets joined through touching pins chain into system-wide circuits. Every
//! beep or message sent on a partition set reaches every set of its circuit
//! in the same round.
//!
//! Discovery is pure: circuits are recomputed each round from the effective
//! pin configurations (the planned one, or the current structure with
//! signals cleared) and current positions, and can be reproduced for any
//! committed round from the histories ([`layout_at`]). Pins touch whenever
//! the edge exists; bond flags play no part.
//!
//! Merging uses a union structure with eagerly maintained member lists, so
//! every lookup stays O(1) during aggregation. Signal aggregation is
//! deterministic: beeps OR together, the strictly highest message priority
//! wins (first sender in creation order on ties), and circuit colors come
//! from the first color override, else from a palette rotated in circuit
//! order.

use std::collections::HashMap;

use crate::grid::GridPos;
use crate::history::{HistoryError, Round};
use crate::id::ParticleId;
use crate::particle::Shape;
use crate::pins::{
    Message, PinConfiguration, Rgb, facing_position, geometric_position, pin_id,
};
use crate::system::ParticleSystem;

/// Display colors cycled through for circuits without an override.
pub const CIRCUIT_PALETTE: [Rgb; 12] = [
    [230, 57, 70],
    [244, 162, 97],
    [233, 196, 106],
    [138, 177, 125],
    [42, 157, 143],
    [38, 70, 83],
    [84, 13, 110],
    [181, 23, 158],
    [114, 9, 183],
    [58, 12, 163],
    [67, 97, 238],
    [76, 201, 240],
];

// ---------------------------------------------------------------------------
// Layouts
// ---------------------------------------------------------------------------

/// One discovered circuit with its aggregated signals.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSummary {
    /// Number of partition sets on the circuit.
    pub set_count: usize,
    /// True if any member set scheduled a beep.
    pub beep: bool,
    /// The winning message, if any was scheduled.
    pub message: Option<Message>,
    /// Resolved display color.
    pub color: Rgb,
}

/// The complete circuit structure of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitLayout {
    circuits: Vec<CircuitSummary>,
    /// (particle creation index, partition set) to circuit index.
    membership: HashMap<(usize, usize), usize>,
}

impl CircuitLayout {
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    pub fn circuits(&self) -> &[CircuitSummary] {
        &self.circuits
    }

    /// The circuit joined by a particle's partition set.
    pub fn circuit_of(&self, particle_index: usize, set: usize) -> Option<&CircuitSummary> {
        self.membership
            .get(&(particle_index, set))
            .map(|&idx| &self.circuits[idx])
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolves all scheduled signals and records the delivered configurations
/// at the round in flight.
pub(crate) fn resolve_and_commit(system: &mut ParticleSystem) {
    let round = system.clock.current;
    let pins_per_edge = system.pins_per_edge;

    // Effective configurations, in creation order.
    let mut entries: Vec<Entry> = system
        .particles
        .iter()
        .map(|(id, particle)| {
            let config = match particle.scratch.planned_pin_config.clone() {
                Some(config) => config,
                None => {
                    let mut config = particle.pin_config().clone();
                    config.clear_signals();
                    config
                }
            };
            Entry { id, index: particle.index(), shape: particle.shape(), config }
        })
        .collect();

    let linked = link(&entries, pins_per_edge);
    let circuits = aggregate(&entries, &linked);

    // Delivery: every set hears its circuit, senders included.
    for (entry_idx, entry) in entries.iter_mut().enumerate() {
        for set_idx in 0..entry.config.set_count() {
            let summary = &circuits[linked.circuit_of(entry_idx, set_idx)];
            let set = match entry.config.set_mut(set_idx) {
                Ok(set) => set,
                Err(_) => unreachable!("set index out of range during delivery"),
            };
            set.received_beep = summary.beep;
            set.received_message = summary.message;
            set.color = Some(summary.color);
        }
        match system.particles[entry.id].pin_config.record(entry.config.clone(), round) {
            Ok(()) => {}
            Err(err) => unreachable!("pin configuration record failed: {err}"),
        }
    }
    let beeping = circuits.iter().filter(|c| c.beep).count();
    log::debug!("round {round}: {} circuits, {beeping} beeping", circuits.len());
}

/// Recomputes the circuit structure of any committed round from the
/// histories. The configurations recorded for a round carry the sends that
/// were scheduled in it, so aggregation reproduces what was delivered.
pub fn layout_at(system: &ParticleSystem, round: Round) -> Result<CircuitLayout, HistoryError> {
    let mut entries = Vec::with_capacity(system.particle_count());
    for (id, particle) in system.particles() {
        entries.push(Entry {
            id,
            index: particle.index(),
            shape: particle.shape_at(round)?,
            config: particle.pin_config_at(round)?.clone(),
        });
    }
    let linked = link(&entries, system.pins_per_edge());
    let circuits = aggregate(&entries, &linked);
    let mut membership = HashMap::new();
    for (entry_idx, entry) in entries.iter().enumerate() {
        for set_idx in 0..entry.config.set_count() {
            membership.insert((entry.index, set_idx), linked.circuit_of(entry_idx, set_idx));
        }
    }
    Ok(CircuitLayout { circuits, membership })
}

// ---------------------------------------------------------------------------
// Discovery internals
// ---------------------------------------------------------------------------

struct Entry {
    id: ParticleId,
    index: usize,
    shape: Shape,
    config: PinConfiguration,
}

/// Union structure over all partition sets, with O(1) root lookup.
struct Linked {
    /// First node id of each entry's sets.
    base: Vec<usize>,
    /// Root node id per node; roots point at themselves.
    root: Vec<usize>,
    /// Root node id to compact circuit index, ascending.
    compact: HashMap<usize, usize>,
}

impl Linked {
    fn node(&self, entry: usize, set: usize) -> usize {
        self.base[entry] + set
    }

    fn circuit_of(&self, entry: usize, set: usize) -> usize {
        self.compact[&self.root[self.node(entry, set)]]
    }
}

fn link(entries: &[Entry], pins_per_edge: u8) -> Linked {
    let mut base = Vec::with_capacity(entries.len());
    let mut total = 0usize;
    for entry in entries {
        base.push(total);
        total += entry.config.set_count();
    }
    let mut root: Vec<usize> = (0..total).collect();
    let mut members: Vec<Vec<usize>> = (0..total).map(|n| vec![n]).collect();

    let mut union = |root: &mut Vec<usize>, a: usize, b: usize| {
        let (ra, rb) = (root[a], root[b]);
        if ra == rb {
            return;
        }
        // Larger circuit survives; lower root id breaks ties.
        let (survivor, absorbed) = match members[ra].len().cmp(&members[rb].len()) {
            std::cmp::Ordering::Greater => (ra, rb),
            std::cmp::Ordering::Less => (rb, ra),
            std::cmp::Ordering::Equal => (ra.min(rb), ra.max(rb)),
        };
        let moved = std::mem::take(&mut members[absorbed]);
        for &node in &moved {
            root[node] = survivor;
        }
        members[survivor].extend(moved);
    };

    // Particle nodes on the lattice, for finding edge partners.
    let mut occupied: HashMap<GridPos, usize> = HashMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        for node in entry.shape.nodes() {
            occupied.insert(node, idx);
        }
    }

    for (idx, entry) in entries.iter().enumerate() {
        let shape = &entry.shape;
        for label in shape.labels() {
            let (Some(target), Some(dir)) =
                (shape.edge_target(label), shape.label_dir_global(label))
            else {
                continue;
            };
            let Some(&other_idx) = occupied.get(&target) else {
                continue;
            };
            if other_idx == idx {
                continue;
            }
            let other = &entries[other_idx];
            let part = if other.shape.head == target {
                crate::grid::BodyPart::Head
            } else {
                crate::grid::BodyPart::Tail
            };
            let Some(facing) = other.shape.label_toward(part, dir.opposite()) else {
                continue;
            };
            for offset in 0..pins_per_edge {
                let mine = pin_id(label, offset, pins_per_edge);
                // Both sides address the same physical pin position.
                let position = geometric_position(shape.chirality, offset, pins_per_edge);
                let theirs_offset = geometric_position(
                    other.shape.chirality,
                    facing_position(position, pins_per_edge),
                    pins_per_edge,
                );
                let theirs = pin_id(facing, theirs_offset, pins_per_edge);
                let (Ok(my_set), Ok(their_set)) =
                    (entry.config.set_of(mine), other.config.set_of(theirs))
                else {
                    unreachable!("pin out of range during discovery");
                };
                let a = base[idx] + my_set;
                let b = base[other_idx] + their_set;
                union(&mut root, a, b);
            }
        }
    }

    // Compact circuit indices in ascending root order.
    let mut roots: Vec<usize> = (0..total).filter(|&n| root[n] == n).collect();
    roots.sort_unstable();
    let compact = roots.into_iter().enumerate().map(|(i, r)| (r, i)).collect();
    Linked { base, root, compact }
}

fn aggregate(entries: &[Entry], linked: &Linked) -> Vec<CircuitSummary> {
    let mut circuits = vec![
        CircuitSummary { set_count: 0, beep: false, message: None, color: [0, 0, 0] };
        linked.compact.len()
    ];
    let mut overrides: Vec<Option<Rgb>> = vec![None; circuits.len()];

    for (entry_idx, entry) in entries.iter().enumerate() {
        for (set_idx, set) in entry.config.sets().iter().enumerate() {
            let circuit_idx = linked.circuit_of(entry_idx, set_idx);
            let circuit = &mut circuits[circuit_idx];
            circuit.set_count += 1;
            circuit.beep |= set.beep;
            if let Some(message) = set.message {
                let better = match circuit.message {
                    None => true,
                    Some(current) => message.priority > current.priority,
                };
                if better {
                    circuit.message = Some(message);
                }
            }
            if overrides[circuit_idx].is_none() {
                overrides[circuit_idx] = set.color_override;
            }
        }
    }

    for (idx, circuit) in circuits.iter_mut().enumerate() {
        circuit.color =
            overrides[idx].unwrap_or(CIRCUIT_PALETTE[idx % CIRCUIT_PALETTE.len()]);
    }
    circuits
}

// ===========================================================================
// Tests
// ===========================================================================
