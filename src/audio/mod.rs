//! Audio subsystem module

pub mod capture;
pub mod playback;
pub mod buffer;
pub mod device;

pub use capture::{AudioCapture, CapturedAudio, MicrophoneSource, MicrophoneStream, SyntheticMicrophone};
pub use playback::{AudioOutput, AudioPlayback, NullOutput, PcmSink, PlaybackMixer};
pub use buffer::{MonoResampler, PcmQueue};
pub use device::{default_microphone, default_output, list_devices, AudioDeviceInfo};
