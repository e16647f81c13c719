//! Resource vectors and fit arithmetic.
//!
//! The executor reports capacity in three dimensions: memory, disk, and
//! container slots. Auction preflight and placement scoring both reduce to
//! arithmetic over these vectors.

use serde::{Deserialize, Serialize};

/// A resource vector: memory, disk, and container slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Disk in megabytes.
    pub disk_mb: u64,
    /// Container slots.
    pub containers: u64,
}

impl Resources {
    /// Creates a resource vector.
    #[must_use]
    pub const fn new(memory_mb: u64, disk_mb: u64, containers: u64) -> Self {
        Self {
            memory_mb,
            disk_mb,
            containers,
        }
    }

    /// Returns true when `other` fits entirely within this vector.
    #[must_use]
    pub const fn can_fit(&self, other: &Self) -> bool {
        self.memory_mb >= other.memory_mb
            && self.disk_mb >= other.disk_mb
            && self.containers >= other.containers
    }

    /// Subtracts `other`, returning false (and leaving self unchanged) when
    /// it does not fit.
    pub fn subtract(&mut self, other: &Self) -> bool {
        if !self.can_fit(other) {
            return false;
        }
        self.memory_mb -= other.memory_mb;
        self.disk_mb -= other.disk_mb;
        self.containers -= other.containers;
        true
    }

    /// Adds `other` to this vector, saturating on overflow.
    pub fn add(&mut self, other: &Self) {
        self.memory_mb = self.memory_mb.saturating_add(other.memory_mb);
        self.disk_mb = self.disk_mb.saturating_add(other.disk_mb);
        self.containers = self.containers.saturating_add(other.containers);
    }

    /// Fraction of `total` this vector occupies, averaged over the three
    /// dimensions. Dimensions with zero total contribute zero.
    #[must_use]
    pub fn fraction_of(&self, total: &Self) -> f64 {
        (fraction(self.memory_mb, total.memory_mb)
            + fraction(self.disk_mb, total.disk_mb)
            + fraction(self.containers, total.containers))
            / 3.0
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn fraction(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_fit_requires_all_dimensions() {
        let available = Resources::new(1024, 2048, 4);
        assert!(available.can_fit(&Resources::new(64, 64, 1)));
        assert!(!available.can_fit(&Resources::new(2048, 64, 1)));
        assert!(!available.can_fit(&Resources::new(64, 64, 5)));
    }

    #[test]
    fn subtract_refuses_overcommit() {
        let mut available = Resources::new(128, 128, 2);
        assert!(available.subtract(&Resources::new(64, 64, 1)));
        assert_eq!(available, Resources::new(64, 64, 1));

        assert!(!available.subtract(&Resources::new(128, 0, 0)));
        assert_eq!(available, Resources::new(64, 64, 1), "failed subtract must not mutate");
    }

    #[test]
    fn fraction_of_averages_dimensions() {
        let used = Resources::new(512, 1024, 2);
        let total = Resources::new(1024, 2048, 4);
        let frac = used.fraction_of(&total);
        assert!((frac - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn fraction_of_zero_total_is_zero() {
        let used = Resources::new(512, 0, 0);
        assert!(used.fraction_of(&Resources::default()).abs() < f64::EPSILON);
    }
}
