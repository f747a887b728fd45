use super::message::Outcome;
use super::message::Packet;
use super::message::Request;
use crate::model::Model;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

/// one worker of the evaluation fleet. owns its model instance
/// outright; never touches the master's random source. a stop signal
/// marks a phase boundary and leaves the worker idle on its request
/// lane; channel disconnection retires it.
pub struct Worker {
    id: usize,
    model: Box<dyn Model>,
    requests: Receiver<Request>,
    packets: Receiver<Packet>,
    results: Sender<Outcome>,
}

impl Worker {
    pub fn new(
        id: usize,
        model: Box<dyn Model>,
        requests: Receiver<Request>,
        packets: Receiver<Packet>,
        results: Sender<Outcome>,
    ) -> Self {
        Self {
            id,
            model,
            requests,
            packets,
            results,
        }
    }

    pub fn run(mut self) {
        let width = self.model.objectives();
        let specials = self.model.special_count();
        log::debug!("worker {} online", self.id);
        while let Ok(signal) = self.requests.recv() {
            match signal {
                // phase boundary: all results are already on the wire,
                // which is what the master's barrier waits for
                Request::Stop => continue,
                Request::Work => {
                    let Ok(packet) = self.packets.recv() else {
                        break;
                    };
                    self.model.write_params(&packet.x);
                    if packet.advise {
                        self.model.configure_preemption(packet.best, &packet.constraints);
                    }
                    self.model.perform_corrections();
                    let mut f = vec![0.0; width];
                    if width == 1 {
                        f[0] = self.model.evaluate();
                    } else {
                        self.model.evaluate_multi(&mut f);
                    }
                    let mut constraints = vec![0.0; specials];
                    self.model.special_constraints(&mut constraints);
                    if self.results.send(Outcome { f, constraints }).is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!("worker {} retired", self.id);
    }
}
