//! MBR disk identifiers.

use crate::host::RandomSource;
use anyhow::{bail, Context, Result};
use tracing::debug;

const MAX_ATTEMPTS: usize = 10;

/// Draw a 4-byte disk ID not yet present in `existing` and record it there.
///
/// A draw that collides consumes one of a bounded number of attempts. A
/// failed entropy read is returned as is.
pub fn generate_unique_disk_id(
    existing: &mut Vec<[u8; 4]>,
    rng: &mut dyn RandomSource,
) -> Result<[u8; 4]> {
    for attempt in 1..=MAX_ATTEMPTS {
        let mut id = [0u8; 4];
        rng.fill(&mut id)
            .context("Error reading random bytes for disk ID")?;
        if existing.contains(&id) {
            debug!(attempt, "disk ID collision");
            continue;
        }
        existing.push(id);
        return Ok(id);
    }
    bail!("Failed to generate unique disk ID")
}
