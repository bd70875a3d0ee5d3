//! Version Clock
//!
//! A monotonic counter owned by a single runtime. Every accepted write to a
//! cell advances it by one, which lets a derived value tell in O(1) whether
//! anything at all has changed since it last settled.
//!
//! Each runtime owns its own clock; independent graphs never observe each
//! other's writes.

/// Monotonic global write counter for one reactive graph.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VersionClock {
    current: u64,
}

impl VersionClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current global version.
    pub fn now(&self) -> u64 {
        self.current
    }

    /// Advance the clock and return the new version.
    pub fn tick(&mut self) -> u64 {
        self.current += 1;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_zero() {
        assert_eq!(VersionClock::new().now(), 0);
    }

    #[test]
    fn tick_is_monotonic() {
        let mut clock = VersionClock::new();
        let first = clock.tick();
        let second = clock.tick();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(clock.now(), 2);
    }
}
