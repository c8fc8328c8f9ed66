use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Terminal close flag shared between a binding and its background I/O.
///
/// Once tripped, I/O errors are reported as a quiet end-of-stream instead of
/// a failure: the local side asked for the close, so a reset or broken pipe
/// that follows is expected.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the flag. Returns `true` if this call tripped it.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Keep `err` only if the flag is still clear.
    pub fn filter<E>(&self, err: E) -> Option<E> {
        if self.is_tripped() {
            None
        } else {
            Some(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_is_reported_once() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_tripped());
        assert!(flag.trip());
        assert!(!flag.trip());
        assert!(flag.is_tripped());
    }

    #[test]
    fn filter_drops_errors_after_trip() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        assert_eq!(flag.filter("reset"), Some("reset"));
        clone.trip();
        assert_eq!(flag.filter("reset"), None);
    }
}
