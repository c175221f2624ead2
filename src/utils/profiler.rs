use std::time::{Duration, Instant};

/// Wall-clock time spent in one pipeline phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct Profiler {
    phases: Vec<PhaseTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time `f` and record it under `name`.
    pub fn record_phase<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.push_phase(name, start.elapsed());
        result
    }

    pub fn push_phase(&mut self, name: &str, duration: Duration) {
        self.phases.push(PhaseTiming {
            name: name.to_string(),
            duration,
        });
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|phase| phase.duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_recorded_in_order() {
        let mut profiler = Profiler::new();
        let value = profiler.record_phase("Parsing", || 41 + 1);
        profiler.push_phase("Weaving", Duration::from_millis(3));

        assert_eq!(value, 42);
        let names: Vec<&str> = profiler.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Parsing", "Weaving"]);
        assert!(profiler.total() >= Duration::from_millis(3));
    }
}
