/// Disk usage snapshot of the distribution cache, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheCapacity {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl CacheCapacity {
    pub fn new(total: u64, used: u64) -> Self {
        Self {
            total,
            used,
            available: total.saturating_sub(used),
        }
    }

    pub fn percent_used(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.used as f64 / self.total as f64) * 100.0
    }
}

impl std::fmt::Display for CacheCapacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "capacity={} used={} available={} ({:.1}% used)",
            self.total,
            self.used,
            self.available,
            self.percent_used()
        )
    }
}
