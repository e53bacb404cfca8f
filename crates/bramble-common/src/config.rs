//! Configuration structures for BrambleDB.

use crate::error::{BrambleError, Result};
use serde::{Deserialize, Serialize};

/// Tuning parameters for a B-tree index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Branching parameter; a node holds at most `2 * degree - 1` pairs.
    pub degree: usize,
    /// Maximum number of released nodes kept for reuse.
    pub free_list_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            degree: 8,
            free_list_capacity: 32,
        }
    }
}

impl TreeConfig {
    /// Maximum number of pairs any node may hold.
    pub fn max_pairs(&self) -> usize {
        self.degree * 2 - 1
    }

    /// Minimum number of pairs a non-root node may hold.
    pub fn min_pairs(&self) -> usize {
        self.degree - 1
    }

    /// Rejects parameters outside their valid range.
    ///
    /// The occupancy bounds are meaningless below degree 2.
    pub fn validate(&self) -> Result<()> {
        if self.degree < 2 {
            return Err(BrambleError::InvalidParameter {
                name: "degree".to_string(),
                value: self.degree.to_string(),
            });
        }
        Ok(())
    }
}
