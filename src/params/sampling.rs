use crate::random::Rand;

/// initial-population sampler for the box-constrained search space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampler {
    /// independent uniform draws
    #[default]
    Random,
    /// latin hypercube: one stratified draw per member per dimension,
    /// strata shuffled independently across dimensions
    Lhs,
    /// dyadic subdivision of the box, emitting cell centers level by
    /// level until the population is filled. deterministic.
    Quadtree,
}

impl Sampler {
    pub fn sample(&self, rand: &mut Rand, bounds: &[(f64, f64)], count: usize) -> Vec<Vec<f64>> {
        match self {
            Sampler::Random => (0..count).map(|_| rand.point(bounds)).collect(),
            Sampler::Lhs => lhs(rand, bounds, count),
            Sampler::Quadtree => quadtree(bounds, count),
        }
    }
}

fn lhs(rand: &mut Rand, bounds: &[(f64, f64)], count: usize) -> Vec<Vec<f64>> {
    let n = bounds.len();
    // per-dimension stratum permutations
    let mut strata = vec![Vec::with_capacity(count); n];
    for column in strata.iter_mut() {
        let mut order = (0..count).collect::<Vec<_>>();
        for i in (1..count).rev() {
            let j = rand.index(i + 1);
            order.swap(i, j);
        }
        *column = order;
    }
    (0..count)
        .map(|i| {
            bounds
                .iter()
                .enumerate()
                .map(|(j, &(lo, hi))| {
                    let cell = strata[j][i] as f64;
                    let u = (cell + rand.uniform()) / count as f64;
                    lo + u * (hi - lo)
                })
                .collect()
        })
        .collect()
}

fn quadtree(bounds: &[(f64, f64)], count: usize) -> Vec<Vec<f64>> {
    let n = bounds.len();
    let mut points = Vec::with_capacity(count);
    let mut level = 0u32;
    while points.len() < count {
        let cells = 1usize << level;
        // lexicographic walk over the level's grid of cell centers
        let mut index = vec![0usize; n];
        'walk: loop {
            let point = bounds
                .iter()
                .enumerate()
                .map(|(j, &(lo, hi))| {
                    let u = (index[j] as f64 + 0.5) / cells as f64;
                    lo + u * (hi - lo)
                })
                .collect::<Vec<_>>();
            points.push(point);
            if points.len() == count {
                break;
            }
            // odometer increment
            for j in (0..n).rev() {
                index[j] += 1;
                if index[j] < cells {
                    continue 'walk;
                }
                index[j] = 0;
            }
            break;
        }
        level += 1;
        if level > 20 {
            break;
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: [(f64, f64); 2] = [(0.0, 1.0), (-2.0, 2.0)];

    #[test]
    fn all_samplers_fill_the_box() {
        let mut rand = Rand::new(17);
        for sampler in [Sampler::Random, Sampler::Lhs, Sampler::Quadtree] {
            let pop = sampler.sample(&mut rand, &BOUNDS, 25);
            assert_eq!(pop.len(), 25);
            for p in &pop {
                assert!((0.0..=1.0).contains(&p[0]));
                assert!((-2.0..=2.0).contains(&p[1]));
            }
        }
    }

    #[test]
    fn lhs_stratifies_each_dimension() {
        let mut rand = Rand::new(23);
        let count = 10;
        let pop = Sampler::Lhs.sample(&mut rand, &BOUNDS[..1], count);
        let mut cells = pop
            .iter()
            .map(|p| (p[0] * count as f64) as usize)
            .collect::<Vec<_>>();
        cells.sort_unstable();
        assert_eq!(cells, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn quadtree_begins_at_the_center() {
        let pop = Sampler::Quadtree.sample(&mut Rand::new(0), &BOUNDS, 5);
        assert_eq!(pop[0], vec![0.5, 0.0]);
        // level one centers follow
        assert_eq!(pop[1], vec![0.25, -1.0]);
    }
}
