//! Local media: microphone eligibility and capture

pub mod capture;
pub mod permissions;

pub use capture::{
    AudioCaptureConstraints, LocalAudioTrack, MediaCapture, NoCapture, SampleTrackCapture,
};
pub use permissions::microphone_permitted;
