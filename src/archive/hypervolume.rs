//! dimension-sweep hypervolume (Klee's measure style): recurse on a
//! partition of the projected region, detect the all-piles fast path,
//! and sweep the last objective as the outer dimension. minimization
//! convention; the reference point must be weakly worse than every
//! point on every objective.

/// hypervolume dominated by `points` with respect to `reference`.
/// points on or beyond the reference contribute nothing.
pub fn hypervolume(points: &[Vec<f64>], reference: &[f64]) -> f64 {
    let dim = reference.len();
    if points.is_empty() {
        return 0.0;
    }
    if dim == 1 {
        let best = points.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
        return (reference[0] - best).max(0.0);
    }
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a[dim - 1].total_cmp(&b[dim - 1]));
    let mut region_low = (0..dim - 1)
        .map(|j| sorted.iter().map(|p| p[j]).fold(f64::INFINITY, f64::min))
        .collect::<Vec<_>>();
    let mut region_up = reference[..dim - 1].to_vec();
    let mut sweep = Sweep {
        dim,
        volume: 0.0,
        split_patience: (sorted.len() as f64).sqrt(),
    };
    let view = sorted.iter().map(|p| p.as_slice()).collect::<Vec<_>>();
    sweep.stream(&mut region_low, &mut region_up, &view, 0, reference[dim - 1]);
    sweep.volume
}

struct Sweep {
    dim: usize,
    volume: f64,
    split_patience: f64,
}

/// true when the point covers the region's projection entirely
fn covers(point: &[f64], region_low: &[f64]) -> bool {
    point.iter().zip(region_low).all(|(p, lo)| p <= lo)
}

/// true when the point intersects the region's projection at all
fn part_covers(point: &[f64], region_up: &[f64]) -> bool {
    point.iter().zip(region_up).all(|(p, up)| p < up)
}

/// -1: no candidate boundary in the split dimension;
///  1: some earlier dimension boundary is inside the region;
///  0: the split boundary is usable
fn contains_boundary(point: &[f64], region_low: &[f64], split: usize) -> i32 {
    if region_low[split] >= point[split] {
        -1
    } else if region_low[..split]
        .iter()
        .zip(point)
        .any(|(lo, p)| *lo < *p)
    {
        1
    } else {
        0
    }
}

fn measure(region_low: &[f64], region_up: &[f64]) -> f64 {
    region_low
        .iter()
        .zip(region_up)
        .map(|(lo, up)| up - lo)
        .product()
}

/// a pile covers the region in all but one projected dimension;
/// returns that dimension or none
fn pile_dimension(point: &[f64], region_low: &[f64], dims: usize) -> Option<usize> {
    let mut pile = None;
    for k in 0..dims {
        if point[k] > region_low[k] {
            if pile.is_some() {
                return None;
            }
            pile = Some(k);
        }
    }
    // a point covering every dimension was consumed by the cover scan
    pile
}

/// measure of the union of axis-aligned pile slabs inside the region,
/// by inclusion-exclusion over the occupied dimensions
fn trellis_measure(region_low: &[f64], region_up: &[f64], trellis: &[f64]) -> f64 {
    let dims = trellis.len();
    let slab = (0..dims)
        .map(|j| region_up[j] - trellis[j])
        .collect::<Vec<_>>();
    let full = (0..dims)
        .map(|j| region_up[j] - region_low[j])
        .collect::<Vec<_>>();
    let mut vol = 0.0;
    for mask in 1usize..(1 << dims) {
        let mut term = 1.0;
        for j in 0..dims {
            term *= if mask & (1 << j) != 0 { slab[j] } else { full[j] };
        }
        let sign = if (mask.count_ones() & 1) == 1 { 1.0 } else { -1.0 };
        vol += sign * term;
    }
    vol
}

fn median_of(bounds: &[f64]) -> f64 {
    if bounds.len() == 1 {
        return bounds[0];
    }
    if bounds.len() == 2 {
        return bounds[1];
    }
    let mut sorted = bounds.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[sorted.len() / 2]
}

impl Sweep {
    fn stream(
        &mut self,
        region_low: &mut [f64],
        region_up: &mut [f64],
        points: &[&[f64]],
        mut split: usize,
        mut cover: f64,
    ) {
        let last = self.dim - 1;
        let cover_old = cover;
        let mut cover_index = 0usize;
        let slice = measure(region_low, region_up);
        while cover == cover_old && cover_index < points.len() {
            if covers(points[cover_index], region_low) {
                cover = points[cover_index][last];
                self.volume += slice * (cover_old - cover);
            } else {
                cover_index += 1;
            }
        }
        // points sharing the cover coordinate are spent as well
        for c in (1..=cover_index).rev() {
            if points[c - 1][last] == cover {
                cover_index -= 1;
            }
        }
        if cover_index == 0 {
            return;
        }
        let live = &points[..cover_index];
        let piles = live
            .iter()
            .map(|p| pile_dimension(p, region_low, last))
            .collect::<Option<Vec<_>>>();
        if let Some(piles) = piles {
            // sweep the last objective over the pile trellis
            let mut trellis = region_up[..last].to_vec();
            let mut i = 0;
            loop {
                let current = live[i][last];
                let mut next;
                loop {
                    let k = piles[i];
                    if live[i][k] < trellis[k] {
                        trellis[k] = live[i][k];
                    }
                    i += 1;
                    next = if i < cover_index { live[i][last] } else { cover };
                    if next != current {
                        break;
                    }
                }
                self.volume += trellis_measure(region_low, region_up, &trellis) * (next - current);
                if next == cover {
                    return;
                }
            }
        }
        // inner node: split the region at a median boundary
        let bound = loop {
            let mut boundaries = Vec::new();
            let mut interior = Vec::new();
            for p in live {
                match contains_boundary(p, region_low, split) {
                    1 => boundaries.push(p[split]),
                    0 => interior.push(p[split]),
                    _ => {}
                }
            }
            if !boundaries.is_empty() {
                break median_of(&boundaries);
            } else if interior.len() as f64 > self.split_patience {
                break median_of(&interior);
            } else {
                split += 1;
            }
        };
        // left child under a reduced upper bound
        let saved = region_up[split];
        region_up[split] = bound;
        let child = live
            .iter()
            .copied()
            .filter(|p| part_covers(p, region_up))
            .collect::<Vec<_>>();
        if !child.is_empty() {
            self.stream(region_low, region_up, &child, split, cover);
        }
        region_up[split] = saved;
        // right child above the bound
        let saved = region_low[split];
        region_low[split] = bound;
        let child = live
            .iter()
            .copied()
            .filter(|p| part_covers(p, region_up))
            .collect::<Vec<_>>();
        if !child.is_empty() {
            self.stream(region_low, region_up, &child, split, cover);
        }
        region_low[split] = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_point_box() {
        let hv = hypervolume(&[vec![0.25, 0.25]], &[1.0, 1.0]);
        assert!((hv - 0.5625).abs() < 1e-12);
    }

    #[test]
    fn two_point_union_in_two_dims() {
        // boxes [0.2,1]x[0.6,1] and [0.6,1]x[0.2,1]: union 0.32 + 0.32 - 0.16
        let hv = hypervolume(&[vec![0.2, 0.6], vec![0.6, 0.2]], &[1.0, 1.0]);
        assert!((hv - 0.48).abs() < 1e-12);
    }

    #[test]
    fn dominated_points_add_nothing() {
        let lone = hypervolume(&[vec![0.2, 0.2]], &[1.0, 1.0]);
        let extra = hypervolume(&[vec![0.2, 0.2], vec![0.5, 0.5]], &[1.0, 1.0]);
        assert!((lone - extra).abs() < 1e-12);
    }

    #[test]
    fn three_dims_against_brute_force() {
        let points = vec![
            vec![0.1, 0.7, 0.6],
            vec![0.5, 0.2, 0.8],
            vec![0.8, 0.8, 0.1],
            vec![0.4, 0.4, 0.4],
        ];
        let reference = vec![1.0, 1.0, 1.0];
        let hv = hypervolume(&points, &reference);
        // grid estimate
        let n = 100;
        let mut hits = 0usize;
        for a in 0..n {
            for b in 0..n {
                for c in 0..n {
                    let q = [
                        (a as f64 + 0.5) / n as f64,
                        (b as f64 + 0.5) / n as f64,
                        (c as f64 + 0.5) / n as f64,
                    ];
                    if points
                        .iter()
                        .any(|p| p.iter().zip(&q).all(|(pi, qi)| pi <= qi))
                    {
                        hits += 1;
                    }
                }
            }
        }
        let estimate = hits as f64 / (n * n * n) as f64;
        assert!((hv - estimate).abs() < 0.01, "hv {} vs grid {}", hv, estimate);
    }

    #[test]
    fn contributions_sum_to_total_on_disjoint_front() {
        let points = vec![vec![0.1, 0.9], vec![0.5, 0.5], vec![0.9, 0.1]];
        let reference = vec![1.0, 1.0];
        let total = hypervolume(&points, &reference);
        let mut marginal = 0.0;
        for i in 0..points.len() {
            let rest = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| p.clone())
                .collect::<Vec<_>>();
            marginal += total - hypervolume(&rest, &reference);
        }
        // exclusive contributions cannot exceed the union
        assert!(marginal <= total + 1e-12);
        assert!(total > 0.0);
    }
}
