use super::entry::Entry;
use super::entry::dominates;
use super::metric::Metric;
use crate::Objective;
use crate::random::Rand;

/// what became of an inserted candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    NonDominated,
    Dominated,
    Duplicate,
}

/// duplicate policy. the pareto-archived searches reject exact
/// objective ties outright; the default files them as dominated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dedup {
    #[default]
    Keep,
    Reject,
}

/// the pareto archive: mutually non-dominated front plus the
/// dominated overflow. vector-backed with swap-removal; the linear
/// dominance scans match the access pattern.
pub struct Archive {
    non_dom: Vec<Entry>,
    dom: Vec<Entry>,
    dedup: Dedup,
    inserts: usize,
}

impl Archive {
    pub fn new(dedup: Dedup) -> Self {
        Self {
            non_dom: Vec::new(),
            dom: Vec::new(),
            dedup,
            inserts: 0,
        }
    }

    pub fn front(&self) -> &[Entry] {
        &self.non_dom
    }

    pub fn dominated(&self) -> &[Entry] {
        &self.dom
    }

    pub fn inserts(&self) -> usize {
        self.inserts
    }

    /// dominance-filtered insertion. residents newly dominated by the
    /// candidate are demoted to the dominated store; the candidate
    /// joins whichever store its own status dictates. exact objective
    /// ties are discarded or filed as dominated per the dedup policy.
    pub fn insert(&mut self, x: Vec<f64>, f: Vec<Objective>) -> Fate {
        if self.non_dom.iter().any(|r| r.ties(&f)) {
            match self.dedup {
                Dedup::Reject => return Fate::Duplicate,
                Dedup::Keep => {
                    self.inserts += 1;
                    self.dom.push(Entry::new(x, f));
                    return Fate::Dominated;
                }
            }
        }
        let mut beaten = false;
        let mut j = 0;
        while j < self.non_dom.len() {
            if dominates(&self.non_dom[j].f, &f) {
                beaten = true;
                j += 1;
            } else if dominates(&f, &self.non_dom[j].f) {
                let loser = self.non_dom.swap_remove(j);
                self.dom.push(loser);
            } else {
                j += 1;
            }
        }
        self.inserts += 1;
        if beaten {
            self.dom.push(Entry::new(x, f));
            Fate::Dominated
        } else {
            self.non_dom.push(Entry::new(x, f));
            Fate::NonDominated
        }
    }

    /// recompute the selection weights of the front
    pub fn weigh(&mut self, metric: Metric, rand: &mut Rand) {
        metric.weigh(&mut self.non_dom, rand);
    }

    /// roulette-wheel selection over the front by weight Z.
    /// returns an index into front().
    pub fn select(&mut self, rand: &mut Rand) -> Option<usize> {
        if self.non_dom.is_empty() {
            return None;
        }
        let total: f64 = self.non_dom.iter().map(|e| e.z).sum();
        if total <= 0.0 {
            return Some(rand.index(self.non_dom.len()));
        }
        let mut spin = rand.uniform() * total;
        for (i, e) in self.non_dom.iter().enumerate() {
            spin -= e.z;
            if spin <= 0.0 {
                return Some(i);
            }
        }
        Some(self.non_dom.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_is_non_dominated() {
        let mut a = Archive::new(Dedup::Keep);
        assert_eq!(a.insert(vec![0.0], vec![1.0, 1.0]), Fate::NonDominated);
        assert_eq!(a.front().len(), 1);
    }

    #[test]
    fn dominating_insert_demotes_residents() {
        let mut a = Archive::new(Dedup::Keep);
        a.insert(vec![0.0], vec![2.0, 2.0]);
        a.insert(vec![1.0], vec![3.0, 1.0]);
        assert_eq!(a.insert(vec![2.0], vec![1.0, 1.0]), Fate::NonDominated);
        assert_eq!(a.front().len(), 1);
        assert_eq!(a.dominated().len(), 2);
    }

    #[test]
    fn dominated_insert_files_into_overflow() {
        let mut a = Archive::new(Dedup::Keep);
        a.insert(vec![0.0], vec![1.0, 1.0]);
        assert_eq!(a.insert(vec![1.0], vec![2.0, 2.0]), Fate::Dominated);
        assert_eq!(a.front().len(), 1);
        assert_eq!(a.dominated().len(), 1);
    }

    #[test]
    fn duplicate_policy_decides_the_tie_arc() {
        let mut keep = Archive::new(Dedup::Keep);
        keep.insert(vec![0.0], vec![1.0, 2.0]);
        assert_eq!(keep.insert(vec![1.0], vec![1.0, 2.0]), Fate::Dominated);

        let mut reject = Archive::new(Dedup::Reject);
        reject.insert(vec![0.0], vec![1.0, 2.0]);
        assert_eq!(reject.insert(vec![1.0], vec![1.0, 2.0]), Fate::Duplicate);
        assert_eq!(reject.inserts(), 1);
    }

    #[test]
    fn stores_stay_disjoint_and_front_mutually_non_dominated() {
        let mut a = Archive::new(Dedup::Keep);
        let mut rand = Rand::new(99);
        for _ in 0..200 {
            let f = vec![rand.uniform(), rand.uniform()];
            a.insert(vec![0.0], f);
        }
        assert_eq!(a.inserts(), a.front().len() + a.dominated().len());
        for (i, e) in a.front().iter().enumerate() {
            for (j, o) in a.front().iter().enumerate() {
                if i != j {
                    assert!(!dominates(&e.f, &o.f));
                }
            }
        }
    }
}
