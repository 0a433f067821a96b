//! Chunk planning for positional scans

use crate::config::DEFAULT_CHUNK_TARGET_BYTES;
use crate::error::{Error, Result};
use crate::position::PositionMarker;
use crate::source::TableLayout;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open range of pages `[start, end)`; `end = None` reads to the end of
/// the relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl PageRange {
    /// Create a range
    pub const fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Whether `page` falls inside the range
    pub fn contains(&self, page: u64) -> bool {
        page >= self.start && self.end.map_or(true, |end| page < end)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, ..)", self.start),
        }
    }
}

/// Splits a table into page ranges of roughly `target_bytes` each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    target_bytes: u64,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_TARGET_BYTES)
    }
}

impl ChunkPlan {
    /// Create a plan with the given target chunk size
    pub const fn new(target_bytes: u64) -> Self {
        Self { target_bytes }
    }

    /// Pages per chunk for a block size, at least one
    pub fn pages_per_chunk(&self, block_size: u64) -> Result<u64> {
        if block_size == 0 {
            return Err(Error::invariant("block size must be positive"));
        }
        Ok((self.target_bytes / block_size).max(1))
    }

    /// Page ranges for a table, skipping chunks wholly before `resume`.
    ///
    /// The last range is open-ended so pages appended during the scan are
    /// still read.
    pub fn for_layout(
        &self,
        layout: &TableLayout,
        resume: Option<PositionMarker>,
    ) -> Result<Vec<PageRange>> {
        let step = self.pages_per_chunk(layout.block_size)?;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start + step < layout.relation_pages {
            chunks.push(PageRange::new(start, Some(start + step)));
            start += step;
        }
        chunks.push(PageRange::new(start, None));

        if let Some(marker) = resume {
            chunks.retain(|c| c.end.map_or(true, |end| end > marker.page));
        }
        Ok(chunks)
    }
}
