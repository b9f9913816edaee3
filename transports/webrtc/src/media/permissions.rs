//! Microphone eligibility

use crate::config::PageContext;
use tracing::warn;

/// Whether a negotiation attempt may request the microphone.
///
/// Requested only when `use_mic` is set and the page is a secure context;
/// an insecure origin silently downgrades to no microphone.
pub fn microphone_permitted(use_mic: bool, page: &PageContext) -> bool {
    if !use_mic {
        return false;
    }
    if page.is_secure() {
        return true;
    }
    warn!(
        origin = %page.origin(),
        "Microphone access requires HTTPS or localhost; continuing without microphone"
    );
    false
}
