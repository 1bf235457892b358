//! A simulated REW, for trying the workflow without the real application
//! and for exercising it in tests.
//!
//! The simulated screen driver ([`crate::automation::DummyScreen`]) tells
//! this backend whenever a sweep is started, which creates a measurement and,
//! with some probability, a new warning.

use super::{MeasurementSummary, MeasurementTool, ProblemRecord, RewError};
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard};

const PROBLEM_TITLES: &[&str] = &[
    "Heavy input clipping",
    "Timing reference signal not detected",
    "Measurement level too low",
];

/// Nominal impulse peak arrival time for simulated measurements, in seconds.
pub const NOMINAL_PEAK: f64 = 0.010;

#[derive(Debug, Clone)]
struct SimMeasurement {
    id: String,
    title: String,
    peak: f64,
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    problem_rate: f64,
    peak_jitter: f64,
    offline_checks: u32,
    misconfigured_checks: u32,
    failing_polls: u32,
    clock: u64,
    next_id: u64,
    problems: Vec<ProblemRecord>,
    measurements: Vec<SimMeasurement>,
    selected: Option<String>,
    deleted: Vec<String>,
}

/// In-memory REW. Cheap to clone, clones share state.
#[derive(Debug, Clone)]
pub struct DummyRew {
    state: Arc<Mutex<SimState>>,
}

/// Builder for [`DummyRew`].
#[derive(Debug, Clone)]
pub struct DummyRewBuilder {
    seed: u64,
    problem_rate: f64,
    peak_jitter: f64,
    offline_checks: u32,
    misconfigured_checks: u32,
    failing_polls: u32,
}

impl Default for DummyRewBuilder {
    fn default() -> Self {
        Self {
            seed: 0,
            problem_rate: 0.0,
            peak_jitter: 0.0,
            offline_checks: 0,
            misconfigured_checks: 0,
            failing_polls: 0,
        }
    }
}

impl DummyRewBuilder {
    /// Seed for the random number generator.
    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }

    /// Chance, from 0 to 1, that a sweep raises a warning.
    pub fn problem_rate(self, problem_rate: f64) -> Self {
        Self {
            problem_rate: problem_rate.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Largest deviation of a measurement's peak time from
    /// [`NOMINAL_PEAK`], in seconds.
    pub fn peak_jitter(self, peak_jitter: f64) -> Self {
        Self {
            peak_jitter: peak_jitter.abs(),
            ..self
        }
    }

    /// Number of health checks that fail before REW "comes up".
    pub fn offline_checks(self, offline_checks: u32) -> Self {
        Self {
            offline_checks,
            ..self
        }
    }

    /// Number of configuration checks that report a wrong setting.
    pub fn misconfigured_checks(self, misconfigured_checks: u32) -> Self {
        Self {
            misconfigured_checks,
            ..self
        }
    }

    /// Number of problem polls that fail before they start answering.
    pub fn failing_polls(self, failing_polls: u32) -> Self {
        Self {
            failing_polls,
            ..self
        }
    }

    /// The configured simulation.
    pub fn build(self) -> DummyRew {
        DummyRew {
            state: Arc::new(Mutex::new(SimState {
                rng: StdRng::seed_from_u64(self.seed),
                problem_rate: self.problem_rate,
                peak_jitter: self.peak_jitter,
                offline_checks: self.offline_checks,
                misconfigured_checks: self.misconfigured_checks,
                failing_polls: self.failing_polls,
                clock: 0,
                next_id: 1,
                problems: Vec::new(),
                measurements: Vec::new(),
                selected: None,
                deleted: Vec::new(),
            })),
        }
    }
}

impl Default for DummyRew {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DummyRew {
    /// Start configuring a simulation.
    pub fn builder() -> DummyRewBuilder {
        DummyRewBuilder::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate REW finishing a sweep named `title`. Returns the new
    /// measurement's id.
    pub fn record_sweep(&self, title: &str) -> String {
        let mut state = self.state();
        state.clock += 1;
        let id = format!("sim-{:04}", state.next_id);
        state.next_id += 1;

        let jitter = state.peak_jitter;
        let peak = if jitter > 0.0 {
            NOMINAL_PEAK + state.rng.gen_range(-jitter..jitter)
        } else {
            NOMINAL_PEAK
        };
        state.measurements.push(SimMeasurement {
            id: id.clone(),
            title: title.to_owned(),
            peak,
        });
        state.selected = Some(id.clone());

        let rate = state.problem_rate;
        if rate > 0.0 && state.rng.gen_bool(rate) {
            let title = PROBLEM_TITLES[state.rng.gen_range(0..PROBLEM_TITLES.len())];
            debug!("Simulated problem '{title}' on {id}");
            Self::push_problem(&mut state, title);
        }
        id
    }

    fn push_problem(state: &mut SimState, title: &str) {
        state.clock += 1;
        let time = format!("t{:06}", state.clock);
        state.problems.push(ProblemRecord {
            time,
            title: title.to_owned(),
            message: None,
        });
    }

    /// Add a warning with a fresh timestamp.
    pub fn raise_problem(&self, title: &str) {
        Self::push_problem(&mut self.state(), title);
    }

    /// Ids of measurements deleted so far.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    /// Titles of the measurements currently held.
    pub fn titles(&self) -> Vec<String> {
        self.state()
            .measurements
            .iter()
            .map(|m| m.title.clone())
            .collect()
    }

    /// Override a measurement's peak time, for scripted scenarios.
    pub fn set_peak(&self, id: &str, peak: f64) {
        if let Some(m) = self.state().measurements.iter_mut().find(|m| m.id == id) {
            m.peak = peak;
        }
    }
}

impl MeasurementTool for DummyRew {
    fn is_online(&self) -> bool {
        let mut state = self.state();
        if state.offline_checks > 0 {
            state.offline_checks -= 1;
            false
        } else {
            true
        }
    }

    fn check_configuration(&self) -> Vec<String> {
        let mut state = self.state();
        if state.misconfigured_checks > 0 {
            state.misconfigured_checks -= 1;
            vec!["Playback mode in Measure should be set to 'From file'. It is currently set to \"Internal\".".to_owned()]
        } else {
            Vec::new()
        }
    }

    fn poll_problems(&self) -> Result<Vec<ProblemRecord>, RewError> {
        let mut state = self.state();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(RewError::Unavailable("problem list".to_owned()));
        }
        Ok(state.problems.clone())
    }

    fn selected_measurement_id(&self) -> Option<String> {
        self.state().selected.clone()
    }

    fn delete_measurement(&self, id: &str) -> Result<(), RewError> {
        let mut state = self.state();
        let before = state.measurements.len();
        state.measurements.retain(|m| m.id != id);
        if state.measurements.len() == before {
            return Err(RewError::Unavailable(format!("measurement {id}")));
        }
        state.deleted.push(id.to_owned());
        state.selected = state.measurements.last().map(|m| m.id.clone());
        Ok(())
    }

    fn measurement_summary(&self, id: &str) -> Result<MeasurementSummary, RewError> {
        self.state()
            .measurements
            .iter()
            .find(|m| m.id == id)
            .map(|m| MeasurementSummary {
                uuid: Some(m.id.clone()),
                title: Some(m.title.clone()),
                time_of_ir_peak_seconds: Some(m.peak),
                time_of_ir_start_seconds: Some(0.0),
            })
            .ok_or_else(|| RewError::Unavailable(format!("measurement {id}")))
    }

    fn measurement_ids(&self) -> Result<Vec<String>, RewError> {
        Ok(self.state().measurements.iter().map(|m| m.id.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn repeated_polls_find_nothing_new() {
        let rew = DummyRew::builder().problem_rate(1.0).build();
        rew.record_sweep("FL");
        let baseline: HashSet<String> = rew
            .poll_problems()
            .unwrap()
            .into_iter()
            .map(|p| p.time)
            .collect();
        let (first, _) = rew.new_problems_since(&baseline).unwrap();
        let (second, _) = rew.new_problems_since(&baseline).unwrap();
        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn sweep_with_problem_shows_up_as_new() {
        let rew = DummyRew::builder().problem_rate(1.0).build();
        let (before, _) = rew.new_problems_since(&HashSet::new()).unwrap();
        assert!(before.is_empty());

        rew.record_sweep("FL");
        let (new, problems) = rew.new_problems_since(&HashSet::new()).unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn clean_sweeps_raise_nothing() {
        let rew = DummyRew::default();
        for _ in 0..10 {
            rew.record_sweep("C");
        }
        assert!(rew.poll_problems().unwrap().is_empty());
        assert_eq!(rew.measurement_ids().unwrap().len(), 10);
    }

    #[test]
    fn delete_moves_selection_back() {
        let rew = DummyRew::default();
        let first = rew.record_sweep("FL");
        let second = rew.record_sweep("FR");
        assert_eq!(rew.selected_measurement_id(), Some(second.clone()));
        rew.delete_measurement(&second).unwrap();
        assert_eq!(rew.selected_measurement_id(), Some(first));
        assert_eq!(rew.deleted(), vec![second.clone()]);
        assert!(rew.delete_measurement(&second).is_err());
    }

    #[test]
    fn comes_online_after_configured_failures() {
        let rew = DummyRew::builder()
            .offline_checks(2)
            .misconfigured_checks(1)
            .build();
        assert!(!rew.is_online());
        assert!(!rew.is_online());
        assert!(rew.is_online());
        assert_eq!(rew.check_configuration().len(), 1);
        assert!(rew.check_configuration().is_empty());
    }

    #[test]
    fn raised_problems_get_distinct_times() {
        let rew = DummyRew::builder().failing_polls(1).build();
        assert!(rew.poll_problems().is_err());
        rew.raise_problem("A");
        rew.raise_problem("B");
        let problems = rew.poll_problems().unwrap();
        assert_eq!(problems.len(), 2);
        assert_ne!(problems[0].time, problems[1].time);
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let rew = DummyRew::builder().seed(7).peak_jitter(0.0005).build();
        for _ in 0..50 {
            let id = rew.record_sweep("FL");
            let peak = rew.measurement_summary(&id).unwrap().time_of_ir_peak_seconds.unwrap();
            assert!((peak - NOMINAL_PEAK).abs() <= 0.0005);
        }
    }
}
