//! Alternate waypoint candidates and the bookkeeping of one search.
//!
//! Candidates are tried in a fixed order, cheapest and most likely first:
//! 1. half-way and quarter-way toward the obstruction,
//! 2. rings around the obstruction at growing radii (course changes only),
//! 3. short hops in the fixed hop directions (course changes only).
//!
//! A candidate's path value is the part of the leg from the candidate to the
//! destination that cannot be flown, plus a small penalty per meter of detour.
//! Lower is better; a candidate that cannot itself be reached is worth infinity.

use shared::collision::settings::DIST_EPS;
use shared::{Vec3, plane_basis};

use super::directions::hop_directions;
use crate::path_checker::Obstruction;
use crate::settings::NavSettings;

/// Perpendicular obstruction speed above which ring candidates are narrowed to
/// the side it is moving away from (m/s).
const MOVING_OBSTRUCTION_SPEED: f32 = 0.5;

/// Everything candidate generation needs to know.
pub(crate) struct CandidateInput<'a> {
    pub origin: Vec3,
    pub destination: Vec3,
    pub obstruction: &'a Obstruction,
    pub own_radius: f32,
    pub obstruction_radius: f32,
    pub allow_course_change: bool,
}

/// All candidate waypoints, in evaluation order.
pub(crate) fn candidates(settings: &NavSettings, input: &CandidateInput<'_>) -> Vec<Vec3> {
    let mut out = Vec::new();
    let origin = input.origin;
    let to_obstruction = input.obstruction.point - origin;

    if to_obstruction.norm() > DIST_EPS {
        out.push(origin + to_obstruction * 0.5);
        out.push(origin + to_obstruction * 0.25);
    }
    if !input.allow_course_change {
        return out;
    }

    let travel = (input.destination - origin)
        .try_normalize(DIST_EPS)
        .or_else(|| to_obstruction.try_normalize(DIST_EPS))
        .unwrap_or_else(|| -Vec3::z());
    let (u, v) = plane_basis(&travel);
    let mut around = vec![u, -u, v, -v];

    // Pass behind a moving obstruction rather than racing it.
    let velocity = input.obstruction.velocity;
    let drift = velocity - travel * velocity.dot(&travel);
    if drift.norm() > MOVING_OBSTRUCTION_SPEED {
        let behind = around
            .iter()
            .copied()
            .filter(|d| d.dot(&drift) <= 0.0)
            .collect::<Vec<_>>();
        if !behind.is_empty() {
            around = behind;
        }
    }

    let mut radius = (input.own_radius + input.obstruction_radius).max(input.own_radius * 2.0);
    for _ in 0..settings.ring_steps {
        out.extend(around.iter().map(|d| input.obstruction.point + d * radius));
        radius *= settings.ring_radius_factor;
    }

    let hop = settings.short_hop_distance.max(input.own_radius * 2.0);
    out.extend(hop_directions().iter().map(|d| origin + d * hop));
    out
}

/// Path value of a reachable candidate.
pub(crate) fn path_value(
    origin: &Vec3,
    candidate: &Vec3,
    destination: &Vec3,
    unreachable: f32,
    bias: f32,
) -> f32 {
    let detour =
        (candidate - origin).norm() + (destination - candidate).norm() - (destination - origin).norm();
    unreachable.max(0.0) + bias * detour.max(0.0)
}

/// One evaluated candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluatedCandidate {
    pub point: Vec3,
    /// Lower is better; infinite when the candidate itself cannot be reached.
    pub value: f32,
    /// Distance short of the destination an obstruction stops the second leg.
    pub unreachable: f32,
}

impl EvaluatedCandidate {
    pub fn is_viable(&self) -> bool {
        self.value.is_finite()
    }
}

/// Summary of a finished search.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchReport {
    pub run: u64,
    pub evaluated: Vec<EvaluatedCandidate>,
    /// Index into `evaluated` of the installed waypoint.
    pub chosen: Option<usize>,
}

impl SearchReport {
    pub fn chosen(&self) -> Option<&EvaluatedCandidate> {
        self.chosen.and_then(|i| self.evaluated.get(i))
    }
}

/// Bookkeeping of the search in progress.
pub(crate) struct SearchState {
    pub run: u64,
    pub origin: Vec3,
    pub destination: Vec3,
    pub obstruction: Obstruction,
    budget: usize,
    after_first_viable: usize,
    evaluated: Vec<EvaluatedCandidate>,
    first_viable: Option<usize>,
    finished: bool,
}

impl SearchState {
    pub fn new(
        settings: &NavSettings,
        run: u64,
        origin: Vec3,
        destination: Vec3,
        obstruction: Obstruction,
        candidate_count: usize,
    ) -> Self {
        Self {
            run,
            origin,
            destination,
            obstruction,
            budget: candidate_count.min(settings.max_alternates as usize),
            after_first_viable: settings.alternates_after_first_viable as usize,
            evaluated: Vec::new(),
            first_viable: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Record one result. Returns the final report once the search is over.
    pub fn record(&mut self, candidate: EvaluatedCandidate) -> Option<SearchReport> {
        if self.finished {
            return None;
        }
        let perfect = candidate.is_viable() && candidate.unreachable <= 0.0;
        if candidate.is_viable() && self.first_viable.is_none() {
            self.first_viable = Some(self.evaluated.len() + 1);
        }
        self.evaluated.push(candidate);

        let count = self.evaluated.len();
        let enough_after_viable = self
            .first_viable
            .is_some_and(|first| count - first >= self.after_first_viable);
        if !(perfect || enough_after_viable || count >= self.budget) {
            return None;
        }

        self.finished = true;
        let chosen = self
            .evaluated
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_viable())
            .min_by(|(_, a), (_, b)| a.value.total_cmp(&b.value))
            .map(|(i, _)| i);
        Some(SearchReport {
            run: self.run,
            evaluated: self.evaluated.clone(),
            chosen,
        })
    }
}
