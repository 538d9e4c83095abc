use std::path::Path;

use crate::error::StatError;
use crate::samples::TestSamples;

/// Read a merged dataset previously written by [`write_test_samples`].
pub async fn read_test_samples(path: impl AsRef<Path>) -> Result<TestSamples, StatError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    let samples: TestSamples = serde_json::from_str(&content)?;
    Ok(samples)
}

/// Write a merged dataset to disk as JSON.
pub async fn write_test_samples(
    samples: &TestSamples,
    path: impl AsRef<Path>,
) -> Result<(), StatError> {
    let content = serde_json::to_string(samples)?;
    tokio::fs::write(path.as_ref(), content).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
