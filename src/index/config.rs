//! Capacity parameters of an index.

use crate::common::config::{INNER_CAPACITY, LEAF_CAPACITY};
use crate::common::{Error, Result};

/// Fill bounds for leaf and inner pages.
///
/// Fixed for the lifetime of an [`Index`](crate::Index). Every page other
/// than the root holds between `min` and `max` entries (leaves) or
/// separators (inner pages) once a mutating call returns.
///
/// # Example
/// ```
/// use pagedindex::IndexConfig;
///
/// let config = IndexConfig::new(2, 4, 2, 4).unwrap();
/// assert_eq!(config.max_leaf_n, 4);
///
/// assert!(IndexConfig::new(3, 4, 2, 4).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConfig {
    pub min_leaf_n: usize,
    pub max_leaf_n: usize,
    pub min_inner_n: usize,
    pub max_inner_n: usize,
}

impl IndexConfig {
    /// Validate and build a configuration.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if a minimum is zero, a maximum is
    /// less than twice its minimum (a split could not leave both halves at
    /// the minimum), or a maximum does not fit in one page.
    pub fn new(
        min_leaf_n: usize,
        max_leaf_n: usize,
        min_inner_n: usize,
        max_inner_n: usize,
    ) -> Result<Self> {
        let config = Self {
            min_leaf_n,
            max_leaf_n,
            min_inner_n,
            max_inner_n,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the bounds described in [`IndexConfig::new`].
    pub fn validate(&self) -> Result<()> {
        check_bounds("leaf", self.min_leaf_n, self.max_leaf_n, LEAF_CAPACITY)?;
        check_bounds("inner", self.min_inner_n, self.max_inner_n, INNER_CAPACITY)
    }
}

fn check_bounds(kind: &str, min: usize, max: usize, capacity: usize) -> Result<()> {
    if min == 0 {
        return Err(Error::InvalidConfig(format!("min {kind} entries must be at least 1")));
    }
    if max < 2 * min {
        return Err(Error::InvalidConfig(format!(
            "max {kind} entries ({max}) must be at least twice the minimum ({min})"
        )));
    }
    if max > capacity {
        return Err(Error::InvalidConfig(format!(
            "max {kind} entries ({max}) exceed page capacity ({capacity})"
        )));
    }
    Ok(())
}

impl Default for IndexConfig {
    /// Pages filled to capacity, half-full minimum.
    fn default() -> Self {
        Self {
            min_leaf_n: LEAF_CAPACITY / 2,
            max_leaf_n: LEAF_CAPACITY,
            min_inner_n: INNER_CAPACITY / 2,
            max_inner_n: INNER_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_leaf_n, 255);
        assert_eq!(config.min_leaf_n, 127);
        assert_eq!(config.max_inner_n, 340);
        assert_eq!(config.min_inner_n, 170);
    }

    #[test]
    fn test_rejects_zero_minimum() {
        assert!(matches!(
            IndexConfig::new(0, 4, 2, 4),
            Err(Error::InvalidConfig(_))
        ));
        assert!(IndexConfig::new(2, 4, 0, 4).is_err());
    }

    #[test]
    fn test_rejects_narrow_range() {
        assert!(IndexConfig::new(3, 5, 2, 4).is_err());
        assert!(IndexConfig::new(2, 4, 3, 5).is_err());
        assert!(IndexConfig::new(1, 2, 1, 2).is_ok());
    }

    #[test]
    fn test_rejects_oversized_pages() {
        assert!(IndexConfig::new(2, LEAF_CAPACITY + 1, 2, 4).is_err());
        assert!(IndexConfig::new(2, 4, 2, INNER_CAPACITY + 1).is_err());
    }
}
