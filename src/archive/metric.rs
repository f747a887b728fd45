use super::entry::Entry;
use super::entry::dominates;
use super::hypervolume::hypervolume;
use crate::random::Rand;

/// selection weight scheme for the non-dominated front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// every member weighs the same
    #[default]
    Random,
    /// crowding distance per objective, endpoints inherit neighbors
    Crowding,
    /// monte-carlo hypervolume contribution estimate
    HvEstimate,
    /// exact leave-one-out hypervolume contribution
    HvExact,
}

impl Metric {
    pub fn weigh(&self, front: &mut [Entry], rand: &mut Rand) {
        match self {
            Metric::Random => {
                for e in front.iter_mut() {
                    e.z = 1.0;
                }
            }
            Metric::Crowding => crowding(front),
            Metric::HvEstimate => hv_estimate(front, rand),
            Metric::HvExact => hv_exact(front),
        }
    }
}

fn sorted_by_objective(front: &[Entry], k: usize) -> Vec<usize> {
    let mut order = (0..front.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| front[a].f[k].total_cmp(&front[b].f[k]));
    order
}

/// per-objective gap between sorted neighbors, normalized by the
/// objective's spread; endpoints take their inner neighbor's weight
fn crowding(front: &mut [Entry]) {
    let size = front.len();
    if size == 0 {
        return;
    }
    let objectives = front[0].f.len();
    for e in front.iter_mut() {
        e.z = 0.0;
    }
    for k in 0..objectives {
        let order = sorted_by_objective(front, k);
        let spread = (front[order[0]].f[k] - front[order[size - 1]].f[k]).abs();
        if spread > 0.0 {
            for w in 1..size - 1 {
                let gap = (front[order[w - 1]].f[k] - front[order[w + 1]].f[k]).abs();
                front[order[w]].z += gap / spread;
            }
        }
        if size > 1 {
            front[order[0]].z = front[order[1]].z;
        }
        if size > 2 {
            front[order[size - 1]].z = front[order[size - 2]].z;
        }
    }
}

/// throw uniform points into the front's bounding box and credit each
/// to the unique member that dominates it. members that catch nothing
/// keep half the best weight so the roulette never starves them.
fn hv_estimate(front: &mut [Entry], rand: &mut Rand) {
    let size = front.len();
    if size == 0 {
        return;
    }
    let objectives = front[0].f.len();
    for e in front.iter_mut() {
        e.z = 0.0;
    }
    let mut lo = vec![f64::INFINITY; objectives];
    let mut hi = vec![f64::NEG_INFINITY; objectives];
    for e in front.iter() {
        for k in 0..objectives {
            lo[k] = lo[k].min(e.f[k]);
            hi[k] = hi[k].max(e.f[k]);
        }
    }
    for _ in 0..crate::HV_SAMPLES {
        let dot = (0..objectives)
            .map(|k| rand.uniform_in(lo[k], hi[k]))
            .collect::<Vec<_>>();
        let mut owner = None;
        for (i, e) in front.iter().enumerate() {
            if dominates(&e.f, &dot) {
                if owner.is_some() {
                    owner = None;
                    break;
                }
                owner = Some(i);
            }
        }
        if let Some(i) = owner {
            front[i].z += 1.0;
        }
    }
    let mut best = 0.0f64;
    for e in front.iter_mut() {
        e.z /= crate::HV_SAMPLES as f64;
        best = best.max(e.z);
    }
    for e in front.iter_mut() {
        if e.z == 0.0 {
            e.z = 0.5 * best;
        }
    }
}

/// leave-one-out hypervolume contribution against a reference point
/// just beyond the front's worst corner; per-objective extreme members
/// are pinned to the best weight so edges stay selectable
fn hv_exact(front: &mut [Entry]) {
    let size = front.len();
    if size == 0 {
        return;
    }
    let objectives = front[0].f.len();
    let mut reference = vec![f64::NEG_INFINITY; objectives];
    for e in front.iter() {
        for k in 0..objectives {
            reference[k] = reference[k].max(e.f[k]);
        }
    }
    for r in reference.iter_mut() {
        *r *= crate::HV_REF_MARGIN;
    }
    let points = front.iter().map(|e| e.f.clone()).collect::<Vec<_>>();
    let total = hypervolume(&points, &reference);
    let mut best = 0.0f64;
    for i in 0..size {
        let rest = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, p)| p.clone())
            .collect::<Vec<_>>();
        let z = if rest.is_empty() {
            total
        } else {
            total - hypervolume(&rest, &reference)
        };
        front[i].z = z;
        best = best.max(z);
    }
    for k in 0..objectives {
        let order = sorted_by_objective(front, k);
        front[order[0]].z = best;
        front[order[size - 1]].z = best;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn front(fs: &[[f64; 2]]) -> Vec<Entry> {
        fs.iter()
            .map(|f| Entry::new(vec![0.0], f.to_vec()))
            .collect()
    }

    #[test]
    fn random_weighs_everyone_the_same() {
        let mut f = front(&[[0.0, 2.0], [1.0, 1.0], [2.0, 0.0]]);
        Metric::Random.weigh(&mut f, &mut Rand::new(1));
        assert!(f.iter().all(|e| e.z == 1.0));
    }

    #[test]
    fn crowding_rewards_isolated_members() {
        // middle member sits in a wide gap
        let mut f = front(&[[0.0, 3.0], [1.5, 1.5], [2.9, 0.1], [3.0, 0.0]]);
        Metric::Crowding.weigh(&mut f, &mut Rand::new(1));
        // the member in the crowded corner weighs less than the open one
        assert!(f[1].z > f[2].z);
    }

    #[test]
    fn estimate_assigns_positive_weights() {
        let mut f = front(&[[0.0, 2.0], [1.0, 1.0], [2.0, 0.0]]);
        Metric::HvEstimate.weigh(&mut f, &mut Rand::new(7));
        assert!(f.iter().all(|e| e.z >= 0.0));
    }

    #[test]
    fn exact_contributions_sum_below_total() {
        let mut f = front(&[[1.0, 4.0], [2.0, 2.0], [4.0, 1.0]]);
        Metric::HvExact.weigh(&mut f, &mut Rand::new(1));
        assert!(f.iter().all(|e| e.z > 0.0));
    }
}
