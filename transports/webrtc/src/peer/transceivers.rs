//! Media-line setup run before every offer or answer

use crate::media::{AudioCaptureConstraints, MediaCapture};
use crate::peer::handle::{PeerConnectionHandle, TrackKind, TransceiverDirection, TransceiverInfo};
use crate::Result;
use tracing::{debug, info, warn};

/// Outcome of [`setup_transceivers`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverSetup {
    /// A captured microphone track is bound to the audio line
    pub microphone_active: bool,
    pub transceivers: Vec<TransceiverInfo>,
}

/// Leave the handle with one receive-only video line and one audio line.
///
/// Transceivers that already exist (created by a remote offer) are reused.
/// With `use_mic` the microphone is captured and bound to the audio line as
/// send-receive; a refused or empty capture degrades to receive-only audio.
pub async fn setup_transceivers(
    handle: &dyn PeerConnectionHandle,
    capture: &dyn MediaCapture,
    use_mic: bool,
) -> Result<TransceiverSetup> {
    let existing = handle.transceivers().await;
    let had_transceivers = !existing.is_empty();
    let existing_video = existing.iter().find(|t| t.kind == TrackKind::Video).cloned();
    let existing_audio = existing.iter().find(|t| t.kind == TrackKind::Audio).cloned();

    debug!(
        existing = existing.len(),
        use_mic, "Setting up transceivers"
    );

    ensure_receive_only(handle, TrackKind::Video, existing_video.as_ref()).await?;

    let microphone_active = if use_mic {
        match capture.capture_audio(&AudioCaptureConstraints::default()).await {
            Ok(Some(track)) => {
                let track_id = track.id().to_string();
                match existing_audio.as_ref().filter(|_| had_transceivers) {
                    Some(audio) => {
                        handle.attach_send_track(audio.index, track).await?;
                    }
                    None => {
                        handle
                            .add_transceiver(
                                TrackKind::Audio,
                                TransceiverDirection::SendRecv,
                                Some(track),
                            )
                            .await?;
                    }
                }
                info!(track_id = %track_id, "Microphone attached to audio transceiver");
                true
            }
            Ok(None) => {
                warn!("Microphone capture returned no stream; receiving audio only");
                ensure_receive_only(handle, TrackKind::Audio, existing_audio.as_ref()).await?;
                false
            }
            Err(e) => {
                warn!(error = %e, "Microphone capture failed; receiving audio only");
                ensure_receive_only(handle, TrackKind::Audio, existing_audio.as_ref()).await?;
                false
            }
        }
    } else {
        ensure_receive_only(handle, TrackKind::Audio, existing_audio.as_ref()).await?;
        false
    };

    Ok(TransceiverSetup {
        microphone_active,
        transceivers: handle.transceivers().await,
    })
}

async fn ensure_receive_only(
    handle: &dyn PeerConnectionHandle,
    kind: TrackKind,
    existing: Option<&TransceiverInfo>,
) -> Result<()> {
    match existing {
        Some(t) if t.direction == TransceiverDirection::RecvOnly => Ok(()),
        Some(t) => {
            handle
                .set_transceiver_direction(t.index, TransceiverDirection::RecvOnly)
                .await
        }
        None => handle
            .add_transceiver(kind, TransceiverDirection::RecvOnly, None)
            .await
            .map(|_| ()),
    }
}
