/// Debounce for the stop endpoint.
///
/// Several independent paths (explicit stop, team switch, task switch, cache
/// refresh cascades) can ask for a stop within milliseconds of each other and
/// the server errors on duplicate stops. Only the first caller inside a window
/// gets through; the timestamp moves only when a call is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopGuard {
    last_stop_at_ms: Option<i64>,
}

impl StopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_accept(&mut self, now_ms: i64, window_ms: i64) -> bool {
        match self.last_stop_at_ms {
            Some(last) if now_ms - last < window_ms => false,
            _ => {
                self.last_stop_at_ms = Some(now_ms);
                true
            }
        }
    }

    /// Forget the last stop once a new session has started.
    pub fn reset(&mut self) {
        self.last_stop_at_ms = None;
    }

    pub fn last_stop_at_ms(&self) -> Option<i64> {
        self.last_stop_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stop_is_always_accepted() {
        let mut guard = StopGuard::new();
        assert!(guard.should_accept(0, 500));
        assert_eq!(guard.last_stop_at_ms(), Some(0));
    }

    #[test]
    fn repeats_inside_window_are_rejected() {
        let mut guard = StopGuard::new();
        assert!(guard.should_accept(1_000, 500));
        assert!(!guard.should_accept(1_100, 500));
        assert!(!guard.should_accept(1_499, 500));
        assert!(guard.should_accept(1_500, 500));
    }

    #[test]
    fn rejection_does_not_extend_window() {
        let mut guard = StopGuard::new();
        assert!(guard.should_accept(1_000, 500));
        assert!(!guard.should_accept(1_400, 500));
        assert_eq!(guard.last_stop_at_ms(), Some(1_000));
        assert!(guard.should_accept(1_600, 500));
    }

    #[test]
    fn windows_are_per_call() {
        let mut guard = StopGuard::new();
        assert!(guard.should_accept(1_000, 500));
        // the long transition window still sees the explicit stop
        assert!(!guard.should_accept(2_000, 2_000));
        assert!(guard.should_accept(2_000, 500));
    }

    #[test]
    fn reset_reopens_the_window() {
        let mut guard = StopGuard::new();
        assert!(guard.should_accept(1_000, 2_000));
        guard.reset();
        assert!(guard.should_accept(1_100, 2_000));
    }
}
