use std::io::Write;

use anyhow::{Context, Result};

use crate::EncodedImage;

/// Emits the ordered record sequence as one JSON payload.
///
/// The payload is serialized in full before a byte hits the writer, so a
/// failure anywhere leaves the output channel empty rather than truncated.
pub fn write_response<W: Write>(mut writer: W, records: &[EncodedImage]) -> Result<()> {
    let payload =
        serde_json::to_vec(records).context("failed to serialize response payload")?;
    writer
        .write_all(&payload)
        .context("failed to write response payload")?;
    writer.flush().context("failed to flush response payload")?;
    Ok(())
}
