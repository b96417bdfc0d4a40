//! Stop-order optimization: a traveling-salesman variant with fixed
//! bookends and optionally position-pinned via stops.
//!
//! Strategy by problem size: exhaustive enumeration while the permutation
//! space is tiny, greedy construction plus 2-opt over one provider matrix in
//! the mid range, and nearest-neighbor over great-circle estimates beyond
//! that (or whenever no matrix is available).

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::debug;
use model::{
    route_version::{Objective, Profile},
    stop::Stop,
};
use utility::{geo, id::Id};

use crate::{
    error::{OptimizeError, ValidationCode, ValidationError},
    provider::{haversine, Matrix, Point},
};

/// Largest N solved by full enumeration of free via permutations.
const EXACT_LIMIT: usize = 8;
/// Largest N the matrix heuristic is applied to.
const HEURISTIC_LIMIT: usize = 20;
const MAX_PASSES: usize = 200;
const EPS: f64 = 1e-9;

pub const DEFAULT_BUDGET: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointRole {
    Start,
    Via,
    End,
}

#[derive(Debug, Clone)]
pub struct RoutePoint {
    pub stop_id: Id<Stop>,
    pub role: PointRole,
    /// Fixed via stops keep the position they were supplied at.
    pub fixed: bool,
    /// Explicit 1-based position pin.
    pub fixed_seq: Option<usize>,
    pub point: Point,
}

#[derive(Debug, Clone)]
pub struct OptimizedRoute {
    /// Indices into the input slice, start first.
    pub order: Vec<usize>,
    pub ordered_stop_ids: Vec<Id<Stop>>,
    /// Total cost in the objective's unit (minutes or kilometers).
    pub total: f64,
    pub warnings: Vec<String>,
}

pub fn validate(points: &[RoutePoint]) -> Result<(), ValidationError> {
    let n = points.len();
    if n < 2 {
        return Err(ValidationError::new(
            ValidationCode::TooFewPoints,
            "stops",
            format!("a route needs at least two points, got {n}"),
        ));
    }

    let starts = points
        .iter()
        .filter(|p| p.role == PointRole::Start)
        .count();
    let ends = points.iter().filter(|p| p.role == PointRole::End).count();
    match starts {
        0 => {
            return Err(ValidationError::new(
                ValidationCode::MissingStart,
                "start",
                "no start stop given",
            ))
        }
        1 => {}
        _ => {
            return Err(ValidationError::new(
                ValidationCode::MultipleStart,
                "start",
                "more than one start stop given",
            ))
        }
    }
    match ends {
        0 => {
            return Err(ValidationError::new(
                ValidationCode::MissingEnd,
                "end",
                "no end stop given",
            ))
        }
        1 => {}
        _ => {
            return Err(ValidationError::new(
                ValidationCode::MultipleEnd,
                "end",
                "more than one end stop given",
            ))
        }
    }

    let mut ids = HashSet::new();
    let mut pins = HashSet::new();
    for (i, p) in points.iter().enumerate() {
        if !ids.insert(p.stop_id.clone()) {
            return Err(ValidationError::new(
                ValidationCode::DuplicateId,
                format!("stops[{i}].id"),
                format!("stop id '{}' appears more than once", p.stop_id),
            ));
        }
        if !geo::coords_in_range(p.point.lat, p.point.lon) {
            return Err(ValidationError::new(
                ValidationCode::InvalidCoords,
                format!("stops[{i}]"),
                format!(
                    "coordinates out of range: lat={}, lon={}",
                    p.point.lat, p.point.lon
                ),
            ));
        }
        if let Some(seq) = p.fixed_seq {
            let valid = match p.role {
                PointRole::Start => seq == 1,
                PointRole::End => seq == n,
                PointRole::Via => (2..n).contains(&seq) && pins.insert(seq),
            };
            if !valid {
                return Err(ValidationError::new(
                    ValidationCode::FixedSeqConflict,
                    format!("stops[{i}].fixed_seq"),
                    format!("fixed_seq {seq} is out of range or already taken"),
                ));
            }
        }
    }

    Ok(())
}

/// Computes a total ordering of the points respecting the bookends and all
/// position pins. `matrix` must be indexed like `points`; pass `None` to
/// force the haversine fallback.
pub async fn optimize_order(
    points: &[RoutePoint],
    profile: Profile,
    objective: Objective,
    matrix: Option<&Matrix>,
    budget: Duration,
) -> Result<OptimizedRoute, OptimizeError> {
    validate(points)?;

    let n = points.len();
    let slots = pinned_slots(points)?;
    let free = free_vias(points, &slots);
    let costs = cost_matrix(points, profile, objective, matrix);
    let started = Instant::now();
    let mut warnings = Vec::new();

    let order = if matrix.is_some() && n <= EXACT_LIMIT {
        exact(points, &slots, &free, &costs)
    } else if matrix.is_some() && n <= HEURISTIC_LIMIT {
        let greedy = greedy_order(&slots, &free, &costs);
        two_opt(greedy, &slots, &costs, started, budget, &mut warnings).await
    } else {
        greedy_order(&slots, &free, &costs)
    };

    let total = path_cost(&order, &costs);
    debug!(
        "optimized {} points, objective {}, total {:.3}",
        n,
        objective.as_str(),
        total
    );

    Ok(OptimizedRoute {
        ordered_stop_ids: order.iter().map(|&i| points[i].stop_id.clone()).collect(),
        order,
        total,
        warnings,
    })
}

/// Builds the position skeleton: `slots[pos] = Some(point index)` for the
/// bookends and every pinned via, `None` for positions filled later.
fn pinned_slots(points: &[RoutePoint]) -> Result<Vec<Option<usize>>, OptimizeError> {
    let n = points.len();
    let mut slots: Vec<Option<usize>> = vec![None; n];

    let pin = |pos: usize, index: usize, slots: &mut Vec<Option<usize>>| {
        if let Some(taken) = slots[pos] {
            return Err(OptimizeError::Infeasible {
                message: format!(
                    "stops '{}' and '{}' both require position {}",
                    points[taken].stop_id,
                    points[index].stop_id,
                    pos + 1
                ),
            });
        }
        slots[pos] = Some(index);
        Ok(())
    };

    for (index, p) in points.iter().enumerate() {
        match p.role {
            PointRole::Start => pin(0, index, &mut slots)?,
            PointRole::End => pin(n - 1, index, &mut slots)?,
            PointRole::Via => {
                if let Some(seq) = p.fixed_seq {
                    pin(seq - 1, index, &mut slots)?;
                } else if p.fixed {
                    // A fixed via without an explicit pin keeps the position
                    // it was supplied at.
                    pin(index, index, &mut slots)?;
                }
            }
        }
    }

    Ok(slots)
}

/// Unpinned via indices, sorted by stop id so every tie-break below is
/// stable.
fn free_vias(points: &[RoutePoint], slots: &[Option<usize>]) -> Vec<usize> {
    let pinned: HashSet<usize> = slots.iter().flatten().copied().collect();
    let mut free: Vec<usize> = (0..points.len()).filter(|i| !pinned.contains(i)).collect();
    free.sort_by(|&a, &b| points[a].stop_id.cmp(&points[b].stop_id));
    free
}

/// Dense cost table in the objective's unit. Falls back to great-circle
/// estimates when no (matching) matrix is available.
fn cost_matrix(
    points: &[RoutePoint],
    profile: Profile,
    objective: Objective,
    matrix: Option<&Matrix>,
) -> Vec<Vec<f64>> {
    let n = points.len();
    if let Some(matrix) = matrix {
        if matrix.len() == n {
            return (0..n)
                .map(|i| (0..n).map(|j| matrix.metric(objective, i, j)).collect())
                .collect();
        }
    }
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        return 0.0;
                    }
                    let (distance_km, duration_min) =
                        haversine::leg_estimate(&points[i].point, &points[j].point, profile);
                    match objective {
                        Objective::Time => duration_min,
                        Objective::Distance => distance_km,
                    }
                })
                .collect()
        })
        .collect()
}

fn path_cost(order: &[usize], costs: &[Vec<f64>]) -> f64 {
    order
        .windows(2)
        .map(|pair| costs[pair[0]][pair[1]])
        .sum()
}

fn segment_cost(order: &[usize], from_pos: usize, to_pos: usize, costs: &[Vec<f64>]) -> f64 {
    (from_pos..to_pos)
        .map(|k| costs[order[k]][order[k + 1]])
        .sum()
}

fn lex_less(points: &[RoutePoint], a: &[usize], b: &[usize]) -> bool {
    let a = a.iter().map(|&i| &points[i].stop_id);
    let b = b.iter().map(|&i| &points[i].stop_id);
    a.lt(b)
}

/// Full enumeration over the free vias. Ties are broken lexicographically on
/// the resulting stop-id sequence so equal inputs give equal outputs.
fn exact(
    points: &[RoutePoint],
    slots: &[Option<usize>],
    free: &[usize],
    costs: &[Vec<f64>],
) -> Vec<usize> {
    let free_positions: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(pos, _)| pos)
        .collect();

    let mut best: Option<(f64, Vec<usize>)> = None;
    for perm in free.iter().copied().permutations(free.len()) {
        let mut order: Vec<usize> = vec![0; slots.len()];
        for (pos, slot) in slots.iter().enumerate() {
            if let Some(index) = slot {
                order[pos] = *index;
            }
        }
        for (pos, index) in free_positions.iter().zip(perm) {
            order[*pos] = index;
        }

        let cost = path_cost(&order, costs);
        let better = match &best {
            None => true,
            Some((best_cost, best_order)) => {
                cost + EPS < *best_cost
                    || ((cost - best_cost).abs() <= EPS && lex_less(points, &order, best_order))
            }
        };
        if better {
            best = Some((cost, order));
        }
    }

    match best {
        Some((_, order)) => order,
        // Unreachable: permutations always yields at least the empty one.
        None => slots.iter().map(|slot| slot.unwrap_or(0)).collect(),
    }
}

/// Greedy nearest-neighbor construction around the pinned skeleton. The
/// free-via list is id-sorted, so cost ties resolve to the smaller stop id.
fn greedy_order(slots: &[Option<usize>], free: &[usize], costs: &[Vec<f64>]) -> Vec<usize> {
    let n = slots.len();
    let mut order: Vec<Option<usize>> = slots.to_vec();
    let mut unused: Vec<usize> = free.to_vec();

    let mut current = match order[0] {
        Some(index) => index,
        None => return (0..n).collect(),
    };
    for pos in 1..n - 1 {
        if let Some(index) = order[pos] {
            current = index;
            continue;
        }
        let mut best: Option<(f64, usize)> = None;
        for (k, &candidate) in unused.iter().enumerate() {
            let cost = costs[current][candidate];
            if best.map(|(best_cost, _)| cost < best_cost).unwrap_or(true) {
                best = Some((cost, k));
            }
        }
        if let Some((_, k)) = best {
            let chosen = unused.remove(k);
            order[pos] = Some(chosen);
            current = chosen;
        }
    }

    order
        .into_iter()
        .enumerate()
        .map(|(pos, slot)| slot.unwrap_or(pos))
        .collect()
}

/// 2-opt improvement holding pinned positions invariant: only windows made
/// entirely of free positions are reversed. Yields between passes so
/// cancellation is observed in bounded time.
async fn two_opt(
    mut order: Vec<usize>,
    slots: &[Option<usize>],
    costs: &[Vec<f64>],
    started: Instant,
    budget: Duration,
    warnings: &mut Vec<String>,
) -> Vec<usize> {
    let n = order.len();
    let free_pos: Vec<bool> = slots.iter().map(|slot| slot.is_none()).collect();

    for _ in 0..MAX_PASSES {
        if started.elapsed() >= budget {
            warnings
                .push("optimization budget exceeded; returning best order so far".to_owned());
            return order;
        }

        let mut improved = false;
        for i in 1..n - 1 {
            if !free_pos[i] {
                continue;
            }
            for j in i + 1..n - 1 {
                // The window must not move a pinned stop.
                if !free_pos[j] {
                    break;
                }
                let before = segment_cost(&order, i - 1, j + 1, costs);
                order[i..=j].reverse();
                let after = segment_cost(&order, i - 1, j + 1, costs);
                if after + EPS < before {
                    improved = true;
                } else {
                    order[i..=j].reverse();
                }
            }
        }

        if !improved {
            break;
        }
        tokio::task::yield_now().await;
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, role: PointRole, lat: f64, lon: f64) -> RoutePoint {
        RoutePoint {
            stop_id: Id::new(id.to_owned()),
            role,
            fixed: false,
            fixed_seq: None,
            point: Point::new(lat, lon),
        }
    }

    /// A,B,C,D,E with directed durations scripted so that A→D→B→C→E is
    /// cheapest; everything else costs 10.
    fn scripted_points() -> Vec<RoutePoint> {
        vec![
            point("A", PointRole::Start, 54.10, 10.10),
            point("B", PointRole::Via, 54.20, 10.20),
            point("C", PointRole::Via, 54.30, 10.30),
            point("D", PointRole::Via, 54.40, 10.40),
            point("E", PointRole::End, 54.50, 10.50),
        ]
    }

    fn scripted_matrix() -> Matrix {
        let n = 5;
        let mut duration = vec![vec![10.0; n]; n];
        for i in 0..n {
            duration[i][i] = 0.0;
        }
        // A=0, B=1, C=2, D=3, E=4
        duration[0][3] = 1.0;
        duration[3][1] = 1.0;
        duration[1][2] = 1.0;
        duration[2][4] = 1.0;
        // Used by the fixed-via case below.
        duration[3][2] = 2.0;
        let distance = duration.clone();
        Matrix {
            distance,
            duration,
            geometry: None,
        }
    }

    fn ids(route: &OptimizedRoute) -> Vec<String> {
        route
            .ordered_stop_ids
            .iter()
            .map(|id| id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn reorders_free_vias_to_the_cheapest_tour() {
        let points = scripted_points();
        let matrix = scripted_matrix();
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(ids(&route), ["A", "D", "B", "C", "E"]);
        assert!((route.total - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn bookends_are_preserved() {
        let points = scripted_points();
        let matrix = scripted_matrix();
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(route.order[0], 0);
        assert_eq!(route.order[4], 4);
    }

    #[tokio::test]
    async fn pinned_via_stays_at_its_position() {
        let mut points = scripted_points();
        points[2].fixed_seq = Some(3); // C pinned to position 3
        let matrix = scripted_matrix();
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(ids(&route)[2], "C");
        // Best tour with C pinned is A,D,C,B,E.
        assert_eq!(ids(&route), ["A", "D", "C", "B", "E"]);
    }

    #[tokio::test]
    async fn fixed_via_without_pin_keeps_supplied_position() {
        let mut points = scripted_points();
        points[1].fixed = true; // B stays at position 2
        let matrix = scripted_matrix();
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(ids(&route)[1], "B");
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_orderings() {
        let points = scripted_points();
        let matrix = scripted_matrix();
        let first = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        let second = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(first.order, second.order);
    }

    #[tokio::test]
    async fn falls_back_to_nearest_neighbor_without_a_matrix() {
        // Points on a line, supplied out of order; nearest-neighbor over
        // great-circle estimates recovers the geographic order.
        let points = vec![
            point("start", PointRole::Start, 54.00, 10.00),
            point("far", PointRole::Via, 54.60, 10.00),
            point("near", PointRole::Via, 54.20, 10.00),
            point("mid", PointRole::Via, 54.40, 10.00),
            point("end", PointRole::End, 54.80, 10.00),
        ];
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Distance,
            None,
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(ids(&route), ["start", "near", "mid", "far", "end"]);
    }

    #[tokio::test]
    async fn large_inputs_skip_the_matrix_heuristic() {
        let mut points = vec![point("start", PointRole::Start, 54.0, 10.0)];
        for i in 0..24 {
            points.push(point(
                &format!("via{i:02}"),
                PointRole::Via,
                54.0 + i as f64 * 0.01,
                10.0,
            ));
        }
        points.push(point("end", PointRole::End, 55.0, 10.0));
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            None,
            DEFAULT_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(route.order.len(), 26);
        assert_eq!(route.order[0], 0);
        assert_eq!(route.order[25], 25);
    }

    #[tokio::test]
    async fn exhausted_budget_degrades_with_a_warning() {
        let mut points = vec![point("start", PointRole::Start, 54.0, 10.0)];
        for i in 0..10 {
            points.push(point(
                &format!("via{i:02}"),
                PointRole::Via,
                54.0 + (i % 3) as f64 * 0.1,
                10.0 + i as f64 * 0.05,
            ));
        }
        points.push(point("end", PointRole::End, 55.0, 10.0));
        let matrix = Matrix {
            distance: vec![vec![1.0; 12]; 12],
            duration: vec![vec![1.0; 12]; 12],
            geometry: None,
        };
        let route = optimize_order(
            &points,
            Profile::Car,
            Objective::Time,
            Some(&matrix),
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(route.warnings.len(), 1);
        assert_eq!(route.order[0], 0);
    }

    #[test]
    fn validation_rejects_malformed_inputs() {
        let no_start = vec![
            point("a", PointRole::Via, 54.0, 10.0),
            point("b", PointRole::End, 54.1, 10.1),
        ];
        assert_eq!(
            validate(&no_start).unwrap_err().code,
            ValidationCode::MissingStart
        );

        let duplicate = vec![
            point("a", PointRole::Start, 54.0, 10.0),
            point("a", PointRole::End, 54.1, 10.1),
        ];
        assert_eq!(
            validate(&duplicate).unwrap_err().code,
            ValidationCode::DuplicateId
        );

        let bad_coords = vec![
            point("a", PointRole::Start, 91.0, 10.0),
            point("b", PointRole::End, 54.1, 10.1),
        ];
        assert_eq!(
            validate(&bad_coords).unwrap_err().code,
            ValidationCode::InvalidCoords
        );

        let mut pin_clash = vec![
            point("a", PointRole::Start, 54.0, 10.0),
            point("b", PointRole::Via, 54.1, 10.1),
            point("c", PointRole::Via, 54.2, 10.2),
            point("d", PointRole::End, 54.3, 10.3),
        ];
        pin_clash[1].fixed_seq = Some(2);
        pin_clash[2].fixed_seq = Some(2);
        assert_eq!(
            validate(&pin_clash).unwrap_err().code,
            ValidationCode::FixedSeqConflict
        );

        let out_of_range_pin = {
            let mut points = vec![
                point("a", PointRole::Start, 54.0, 10.0),
                point("b", PointRole::Via, 54.1, 10.1),
                point("c", PointRole::End, 54.2, 10.2),
            ];
            points[1].fixed_seq = Some(3);
            points
        };
        assert_eq!(
            validate(&out_of_range_pin).unwrap_err().code,
            ValidationCode::FixedSeqConflict
        );
    }
}
