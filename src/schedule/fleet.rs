use super::message::Outcome;
use super::message::Packet;
use super::message::Request;
use super::worker::Worker;
use crate::Error;
use crate::Result;
use crate::model::Model;
use crossbeam_channel::Receiver;
use crossbeam_channel::Select;
use crossbeam_channel::Sender;
use std::thread::JoinHandle;

struct Lane {
    requests: Sender<Request>,
    packets: Sender<Packet>,
    results: Receiver<Outcome>,
}

/// the master's view of the worker fleet.
///
/// dispatch() is the asynchronous master loop: prime every worker
/// with at most one outstanding unit, then keep each worker saturated
/// until the batch is exhausted, assimilating results by the worker's
/// recorded assignment rather than by arrival count. when every
/// worker has been sent a stop the batch is over and all results have
/// been drained, which is the inter-phase barrier.
///
/// with `synchronous` set, results are taken in worker order
/// (skipping idle workers), so the assimilation order and therefore
/// any random draws made at assimilation time are reproducible given
/// the seed. without it, results are taken in arrival order and only
/// aggregate behavior is reproducible.
pub struct Fleet {
    lanes: Vec<Lane>,
    handles: Vec<JoinHandle<()>>,
    synchronous: bool,
    cursor: usize,
}

impl Fleet {
    /// spin up `workers` threads, each owning the model built for its
    /// rank (rank 0 is the master's own instance and is not spawned)
    pub fn spawn(
        workers: usize,
        synchronous: bool,
        build: &(dyn Fn(usize) -> Box<dyn Model> + Sync),
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Scheduler(
                "parallel strategy requires at least one worker".to_string(),
            ));
        }
        let mut lanes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 1..=workers {
            let (request_tx, request_rx) = crossbeam_channel::unbounded();
            let (packet_tx, packet_rx) = crossbeam_channel::unbounded();
            let (result_tx, result_rx) = crossbeam_channel::unbounded();
            let worker = Worker::new(id, build(id), request_rx, packet_rx, result_tx);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("worker-{}", id))
                    .spawn(move || worker.run())?,
            );
            lanes.push(Lane {
                requests: request_tx,
                packets: packet_tx,
                results: result_rx,
            });
        }
        log::info!("fleet of {} workers online", workers);
        Ok(Self {
            lanes,
            handles,
            synchronous,
            cursor: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.lanes.len()
    }

    pub fn synchronous(&self) -> bool {
        self.synchronous
    }

    /// run one batch through the fleet.
    ///
    /// `next(i)` is called exactly once per candidate index, in
    /// increasing order, at send time; `assimilate(i, outcome)` sees
    /// every result exactly once, keyed by candidate index. returns
    /// the number of results assimilated, which is short of `batch`
    /// only when the quit sentinel fired mid-flight.
    pub fn dispatch<N, A>(&mut self, batch: usize, mut next: N, mut assimilate: A) -> Result<usize>
    where
        N: FnMut(usize) -> Packet,
        A: FnMut(usize, Outcome) -> Result<()>,
    {
        let fleet = self.lanes.len();
        let mut assignments: Vec<Option<usize>> = vec![None; fleet];
        let mut upcoming = 0usize; // next-candidate cursor, independent of the receive count
        let mut stops = 0usize;
        let mut taken = 0usize;
        let mut aborted = crate::record::quit_requested();
        for wid in 0..fleet {
            if upcoming < batch && !aborted {
                self.send_work(wid, next(upcoming))?;
                assignments[wid] = Some(upcoming);
                upcoming += 1;
            } else {
                self.send_stop(wid)?;
                stops += 1;
            }
        }
        while stops < fleet {
            if !aborted && crate::record::quit_requested() {
                log::warn!("quit requested, draining {} outstanding results", fleet - stops);
                aborted = true;
            }
            let (wid, outcome) = self.receive(&assignments)?;
            let index = assignments[wid].take().ok_or_else(|| {
                Error::Scheduler(format!("result from idle worker {}", wid + 1))
            })?;
            if !aborted {
                assimilate(index, outcome)?;
                taken += 1;
            }
            if upcoming < batch && !aborted {
                self.send_work(wid, next(upcoming))?;
                assignments[wid] = Some(upcoming);
                upcoming += 1;
            } else {
                self.send_stop(wid)?;
                stops += 1;
            }
        }
        Ok(taken)
    }

    fn send_work(&self, wid: usize, packet: Packet) -> Result<()> {
        self.lanes[wid]
            .requests
            .send(Request::Work)
            .map_err(|_| Self::dead(wid))?;
        self.lanes[wid]
            .packets
            .send(packet)
            .map_err(|_| Self::dead(wid))
    }

    fn send_stop(&self, wid: usize) -> Result<()> {
        self.lanes[wid]
            .requests
            .send(Request::Stop)
            .map_err(|_| Self::dead(wid))
    }

    fn dead(wid: usize) -> Error {
        Error::Scheduler(format!("worker {} died mid-run", wid + 1))
    }

    /// take one result: fixed worker order under synchronous receive,
    /// arrival order otherwise. only workers with outstanding work are
    /// eligible.
    fn receive(&mut self, assignments: &[Option<usize>]) -> Result<(usize, Outcome)> {
        if self.synchronous {
            for _ in 0..self.lanes.len() {
                let wid = self.cursor;
                self.cursor = (self.cursor + 1) % self.lanes.len();
                if assignments[wid].is_some() {
                    let outcome = self.lanes[wid].results.recv().map_err(|_| Self::dead(wid))?;
                    return Ok((wid, outcome));
                }
            }
            Err(Error::Scheduler("receive with no work outstanding".to_string()))
        } else {
            let mut select = Select::new();
            let mut eligible = Vec::new();
            for (wid, lane) in self.lanes.iter().enumerate() {
                if assignments[wid].is_some() {
                    select.recv(&lane.results);
                    eligible.push(wid);
                }
            }
            if eligible.is_empty() {
                return Err(Error::Scheduler("receive with no work outstanding".to_string()));
            }
            let op = select.select();
            let wid = eligible[op.index()];
            let outcome = op
                .recv(&self.lanes[wid].results)
                .map_err(|_| Self::dead(wid))?;
            Ok((wid, outcome))
        }
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        self.lanes.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Surface;

    fn build(_: usize) -> Box<dyn Model> {
        Box::new(Surface::sphere(2, -5.0, 5.0))
    }

    #[test]
    fn zero_workers_is_a_scheduler_error() {
        assert!(matches!(
            Fleet::spawn(0, false, &build),
            Err(Error::Scheduler(_))
        ));
    }

    #[test]
    fn batch_results_key_by_candidate_index() {
        let _guard = crate::record::test_guard();
        let mut fleet = Fleet::spawn(3, false, &build).unwrap();
        let candidates = (0..10)
            .map(|i| vec![i as f64, 0.0])
            .collect::<Vec<_>>();
        let mut seen = vec![None; 10];
        let taken = fleet
            .dispatch(
                10,
                |i| Packet::bare(candidates[i].clone()),
                |i, outcome| {
                    seen[i] = Some(outcome.objective());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(taken, 10);
        for (i, f) in seen.iter().enumerate() {
            assert_eq!(f.unwrap(), (i * i) as f64);
        }
    }

    #[test]
    fn synchronous_receive_assimilates_in_worker_order() {
        let _guard = crate::record::test_guard();
        let mut fleet = Fleet::spawn(4, true, &build).unwrap();
        let mut order = Vec::new();
        fleet
            .dispatch(
                8,
                |i| Packet::bare(vec![i as f64, 0.0]),
                |i, _| {
                    order.push(i);
                    Ok(())
                },
            )
            .unwrap();
        // primed round robin: candidate i went to worker i % 4
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn fleet_survives_consecutive_batches() {
        let _guard = crate::record::test_guard();
        let mut fleet = Fleet::spawn(2, false, &build).unwrap();
        for _ in 0..3 {
            let taken = fleet
                .dispatch(5, |i| Packet::bare(vec![i as f64, 1.0]), |_, _| Ok(()))
                .unwrap();
            assert_eq!(taken, 5);
        }
    }

    #[test]
    fn small_batch_stops_spare_workers() {
        let _guard = crate::record::test_guard();
        let mut fleet = Fleet::spawn(4, false, &build).unwrap();
        let taken = fleet
            .dispatch(2, |i| Packet::bare(vec![i as f64, 0.0]), |_, _| Ok(()))
            .unwrap();
        assert_eq!(taken, 2);
    }
}
