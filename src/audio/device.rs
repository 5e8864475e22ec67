//! Audio device enumeration and cpal-backed microphone/speaker
//!
//! The cpal backends are compiled with the `devices` feature. Without it the
//! defaults fall back to the synthetic microphone and the null output.

use serde::Serialize;
use std::sync::Arc;

use crate::audio::capture::MicrophoneSource;
use crate::audio::playback::AudioOutput;

/// Audio device description for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_default: bool,
}

/// Default microphone: the system input with `devices`, a tone otherwise
pub fn default_microphone() -> Arc<dyn MicrophoneSource> {
    #[cfg(feature = "devices")]
    {
        Arc::new(cpal_backend::CpalMicrophone)
    }
    #[cfg(not(feature = "devices"))]
    {
        Arc::new(crate::audio::capture::SyntheticMicrophone::new())
    }
}

/// Default output: the system speakers with `devices`, discard otherwise
pub fn default_output() -> Arc<dyn AudioOutput> {
    #[cfg(feature = "devices")]
    {
        Arc::new(cpal_backend::CpalOutput)
    }
    #[cfg(not(feature = "devices"))]
    {
        Arc::new(crate::audio::playback::NullOutput)
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    #[cfg(feature = "devices")]
    {
        cpal_backend::list_devices()
    }
    #[cfg(not(feature = "devices"))]
    {
        Vec::new()
    }
}

#[cfg(feature = "devices")]
pub mod cpal_backend {
    //! cpal microphone and speaker

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::FromSample;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use super::AudioDeviceInfo;
    use crate::audio::buffer::{pcm_to_f32, MonoResampler};
    use crate::audio::capture::{MicrophoneSource, MicrophoneStream};
    use crate::audio::playback::{AudioOutput, PcmSink};
    use crate::config::AudioConfig;
    use crate::error::AudioError;

    fn stream_config(config: &AudioConfig) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    /// Capture at whatever the device prefers, converting to the wire format
    /// on the callback thread
    fn build_input<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut resampler: MonoResampler,
        tx: Sender<Vec<i16>>,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: cpal::SizedSample,
        f32: FromSample<T>,
    {
        let mut scratch = Vec::new();
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|s| f32::from_sample(*s)));
                    let mut samples = Vec::with_capacity(scratch.len());
                    resampler.process(&scratch, &mut samples);
                    if !samples.is_empty() {
                        let _ = tx.try_send(samples);
                    }
                },
                move |err| {
                    tracing::error!("Microphone stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }

    /// Default system input device
    pub struct CpalMicrophone;

    struct CpalMicrophoneStream {
        _stream: cpal::Stream,
        rx: Receiver<Vec<i16>>,
        pending: VecDeque<i16>,
    }

    impl MicrophoneStream for CpalMicrophoneStream {
        fn read(&mut self, buf: &mut [i16]) -> Result<(), AudioError> {
            while self.pending.len() < buf.len() {
                let chunk = self
                    .rx
                    .recv_timeout(Duration::from_secs(1))
                    .map_err(|e| AudioError::StreamError(format!("microphone stalled: {}", e)))?;
                self.pending.extend(chunk);
            }
            for sample in buf.iter_mut() {
                *sample = self.pending.pop_front().unwrap_or(0);
            }
            Ok(())
        }
    }

    impl MicrophoneSource for CpalMicrophone {
        fn name(&self) -> String {
            cpal::default_host()
                .default_input_device()
                .and_then(|d| d.name().ok())
                .unwrap_or_else(|| "none".to_string())
        }

        fn is_available(&self) -> bool {
            cpal::default_host().default_input_device().is_some()
        }

        fn open(&self, config: &AudioConfig) -> Result<Box<dyn MicrophoneStream>, AudioError> {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))?;

            let supported = device
                .default_input_config()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            let device_config = supported.config();
            tracing::debug!(
                "Microphone native format {:?} {} Hz {} ch",
                supported.sample_format(),
                device_config.sample_rate.0,
                device_config.channels
            );
            let resampler = MonoResampler::new(
                device_config.sample_rate.0,
                device_config.channels,
                config.sample_rate,
            );

            let (tx, rx) = bounded::<Vec<i16>>(64);
            let stream = match supported.sample_format() {
                cpal::SampleFormat::F32 => build_input::<f32>(&device, &device_config, resampler, tx)?,
                cpal::SampleFormat::I16 => build_input::<i16>(&device, &device_config, resampler, tx)?,
                cpal::SampleFormat::U16 => build_input::<u16>(&device, &device_config, resampler, tx)?,
                other => {
                    return Err(AudioError::StreamError(format!(
                        "Unsupported microphone sample format {:?}",
                        other
                    )))
                }
            };
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            Ok(Box::new(CpalMicrophoneStream {
                _stream: stream,
                rx,
                pending: VecDeque::new(),
            }))
        }
    }

    /// Default system output device
    pub struct CpalOutput;

    struct CpalSink {
        _stream: cpal::Stream,
        ring: Arc<Mutex<VecDeque<f32>>>,
        max_buffered: usize,
    }

    impl PcmSink for CpalSink {
        fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
            // Block like a hardware line while the device is behind
            while self.ring.lock().len() > self.max_buffered {
                std::thread::sleep(Duration::from_millis(10));
            }
            self.ring.lock().extend(pcm_to_f32(pcm));
            Ok(())
        }
    }

    impl AudioOutput for CpalOutput {
        fn name(&self) -> String {
            cpal::default_host()
                .default_output_device()
                .and_then(|d| d.name().ok())
                .unwrap_or_else(|| "none".to_string())
        }

        fn open(&self, sender_id: &str, config: &AudioConfig) -> Result<Box<dyn PcmSink>, AudioError> {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;

            let ring = Arc::new(Mutex::new(VecDeque::<f32>::new()));
            let reader = ring.clone();
            let sender = sender_id.to_string();
            let stream = device
                .build_output_stream(
                    &stream_config(config),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut ring = reader.lock();
                        for sample in data.iter_mut() {
                            *sample = ring.pop_front().unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        tracing::error!("Playback stream error for {}: {}", sender, err);
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            Ok(Box::new(CpalSink {
                _stream: stream,
                ring,
                // Two buffers of headroom
                max_buffered: config.samples_per_buffer() * 2,
            }))
        }
    }

    /// List input and output devices of the default host
    pub fn list_devices() -> Vec<AudioDeviceInfo> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

        if let Ok(input_devices) = host.input_devices() {
            for device in input_devices {
                if let Ok(name) = device.name() {
                    let is_default = default_input_name.as_deref() == Some(name.as_str());
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: true,
                        is_default,
                    });
                }
            }
        }

        if let Ok(output_devices) = host.output_devices() {
            for device in output_devices {
                if let Ok(name) = device.name() {
                    let is_default = default_output_name.as_deref() == Some(name.as_str());
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_default,
                    });
                }
            }
        }

        devices
    }
}
