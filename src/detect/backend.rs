use anyhow::Result;

use crate::detect::result::InspectionResult;

/// Inference backend trait.
///
/// Input is an encoded image (JPEG or PNG bytes); backends own decoding
/// and whatever resizing or normalization their model expects. A backend
/// failure is reported to the caller, never handled here.
pub trait InspectionBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Inspect one encoded image and produce a verdict.
    fn predict(&mut self, image: &[u8]) -> Result<InspectionResult>;

    /// Optional warm-up hook, called once before the first trigger.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
