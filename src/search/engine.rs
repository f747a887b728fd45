use crate::Result;
use crate::model::Model;
use crate::schedule::Fleet;
use crate::schedule::Outcome;
use crate::schedule::Packet;

/// where candidate evaluations happen. the serial engine runs the
/// master's own model inline; the parallel engine owns a fleet and
/// keeps a master-side model instance for metadata, warm starts, and
/// artefact persistence. single evaluations in parallel mode go out
/// as a batch of one so that pre-emption advice still reaches the
/// worker.
pub struct Engine {
    model: Box<dyn Model>,
    fleet: Option<Fleet>,
}

impl Engine {
    pub fn serial(model: Box<dyn Model>) -> Self {
        Self { model, fleet: None }
    }

    pub fn parallel(
        workers: usize,
        synchronous: bool,
        build: &(dyn Fn(usize) -> Box<dyn Model> + Sync),
    ) -> Result<Self> {
        let fleet = Fleet::spawn(workers, synchronous, build)?;
        Ok(Self {
            model: build(0),
            fleet: Some(fleet),
        })
    }

    pub fn workers(&self) -> usize {
        self.fleet.as_ref().map(Fleet::size).unwrap_or(0)
    }

    pub fn is_parallel(&self) -> bool {
        self.fleet.is_some()
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    pub fn fleet_mut(&mut self) -> Option<&mut Fleet> {
        self.fleet.as_mut()
    }

    /// evaluate a model already loaded with a candidate
    pub fn inline(model: &mut dyn Model, packet: &Packet) -> Outcome {
        model.write_params(&packet.x);
        if packet.advise {
            model.configure_preemption(packet.best, &packet.constraints);
        }
        model.perform_corrections();
        let width = model.objectives();
        let mut f = vec![0.0; width];
        if width == 1 {
            f[0] = model.evaluate();
        } else {
            model.evaluate_multi(&mut f);
        }
        let mut constraints = vec![0.0; model.special_count()];
        model.special_constraints(&mut constraints);
        Outcome { f, constraints }
    }

    /// evaluate one candidate. `None` means the quit sentinel drained
    /// the dispatch before the result came back.
    pub fn evaluate(&mut self, packet: Packet) -> Result<Option<Outcome>> {
        match &mut self.fleet {
            None => Ok(Some(Self::inline(self.model.as_mut(), &packet))),
            Some(fleet) => {
                let mut result = None;
                fleet.dispatch(
                    1,
                    |_| packet.clone(),
                    |_, outcome| {
                        result = Some(outcome);
                        Ok(())
                    },
                )?;
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Surface;

    #[test]
    fn serial_and_parallel_agree() {
        let _guard = crate::record::test_guard();
        let build = |_: usize| -> Box<dyn Model> { Box::new(Surface::sphere(2, -5.0, 5.0)) };
        let mut serial = Engine::serial(build(0));
        let mut parallel = Engine::parallel(2, true, &build).unwrap();
        let packet = Packet::bare(vec![3.0, 4.0]);
        let a = serial.evaluate(packet.clone()).unwrap().unwrap();
        let b = parallel.evaluate(packet).unwrap().unwrap();
        assert_eq!(a.objective(), 25.0);
        assert_eq!(b.objective(), 25.0);
    }
}
