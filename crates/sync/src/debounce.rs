use std::time::Duration;

use tokio::time::Instant;

/// Leading-edge debounce.  The first event after a quiet period fires; every
/// event, fired or not, pushes the end of the window out again.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    /// Record an event at `now`; `true` when it should fire.
    pub fn should_fire(&mut self, now: Instant) -> bool {
        let quiet = match self.last_event {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.window,
        };
        self.last_event = Some(now);
        quiet
    }

    pub fn reset(&mut self) {
        self.last_event = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn first_event_fires() {
        let mut debouncer = Debouncer::new(WINDOW);
        assert!(debouncer.should_fire(Instant::now()));
    }

    #[test]
    fn burst_fires_once() {
        let mut debouncer = Debouncer::new(WINDOW);
        let start = Instant::now();
        let fired: Vec<bool> = (0..5)
            .map(|i| debouncer.should_fire(start + Duration::from_millis(i * 100)))
            .collect();
        assert_eq!(fired, vec![true, false, false, false, false]);
    }

    #[test]
    fn events_inside_window_extend_it() {
        let mut debouncer = Debouncer::new(WINDOW);
        let start = Instant::now();
        assert!(debouncer.should_fire(start));
        assert!(!debouncer.should_fire(start + Duration::from_millis(400)));
        // 600 ms after the first event but only 200 ms after the second.
        assert!(!debouncer.should_fire(start + Duration::from_millis(600)));
        assert!(debouncer.should_fire(start + Duration::from_millis(1200)));
    }

    #[test]
    fn reset_starts_a_fresh_quiet_period() {
        let mut debouncer = Debouncer::new(WINDOW);
        let now = Instant::now();
        debouncer.should_fire(now);
        debouncer.reset();
        assert!(debouncer.should_fire(now));
    }
}
