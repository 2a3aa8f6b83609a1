/// Backoff for retrying failed saves without user input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_ms: u32,
    pub max_ms: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            max_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once attempts are exhausted.
    pub fn delay_ms(&self, attempt: u32) -> Option<u32> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period before an edit is written.
    pub debounce_ms: u32,
    /// How long `is_syncing` stays up after a remote update lands in the buffer.
    pub remote_grace_ms: u32,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            remote_grace_ms: 150,
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps_then_gives_up() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_ms(1), Some(2_000));
        assert_eq!(p.delay_ms(2), Some(4_000));
        assert_eq!(p.delay_ms(4), Some(16_000));
        assert_eq!(p.delay_ms(5), Some(30_000));
        assert_eq!(p.delay_ms(6), None);
        assert_eq!(p.delay_ms(0), None);
    }

    #[test]
    fn test_huge_attempt_count_does_not_overflow() {
        let p = RetryPolicy {
            base_ms: 1_000,
            max_ms: 60_000,
            max_attempts: 100,
        };
        assert_eq!(p.delay_ms(64), Some(60_000));
    }
}
