use std::collections::VecDeque;
use std::time::Duration;

/// Rolling detection-latency monitor with temporary self-disable.
#[derive(Debug, Clone)]
pub struct LatencyGuard {
    name: &'static str,
    budget_ms: f64,
    window: usize,
    min_samples: usize,
    cooldown_ms: u64,
    samples: VecDeque<f64>,
    disabled_until: Option<u64>,
}

impl LatencyGuard {
    pub fn new(
        name: &'static str,
        budget_ms: f64,
        window: usize,
        min_samples: usize,
        cooldown_ms: u64,
    ) -> Self {
        let window = window.max(1);
        Self {
            name,
            budget_ms: budget_ms.max(0.0),
            window,
            min_samples: min_samples.clamp(1, window),
            cooldown_ms,
            samples: VecDeque::with_capacity(window),
            disabled_until: None,
        }
    }

    /// True while the detector should run. Re-enables once the cooldown lapses.
    pub fn is_enabled(&mut self, now: u64) -> bool {
        match self.disabled_until {
            Some(until) if now < until => false,
            Some(_) => {
                self.disabled_until = None;
                self.samples.clear();
                log::info!("{}: detection re-enabled", self.name);
                true
            }
            None => true,
        }
    }

    pub fn record(&mut self, elapsed: Duration, now: u64) {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed.as_secs_f64() * 1_000.0);

        if self.disabled_until.is_none()
            && self.samples.len() >= self.min_samples
            && self.average_ms() > self.budget_ms
        {
            log::warn!(
                "{}: average detection latency {:.1}ms over budget {:.1}ms, disabling for {}ms",
                self.name,
                self.average_ms(),
                self.budget_ms,
                self.cooldown_ms
            );
            self.disabled_until = Some(now.saturating_add(self.cooldown_ms));
        }
    }

    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_until.is_some()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.disabled_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_slow_detections_disable_then_resume() {
        let mut guard = LatencyGuard::new("test", 30.0, 50, 10, 5_000);
        for step in 0..10u64 {
            assert!(guard.is_enabled(step * 100));
            guard.record(Duration::from_millis(45), step * 100);
        }
        assert!(guard.is_disabled());
        assert!(!guard.is_enabled(900 + 4_999));
        assert!(guard.is_enabled(900 + 5_000));
        assert_eq!(guard.average_ms(), 0.0);
    }

    #[test]
    fn single_spike_does_not_disable() {
        let mut guard = LatencyGuard::new("test", 30.0, 50, 10, 5_000);
        guard.record(Duration::from_millis(200), 0);
        for step in 1..20u64 {
            guard.record(Duration::from_millis(1), step);
        }
        assert!(!guard.is_disabled());
        assert!(guard.is_enabled(50));
    }
}
