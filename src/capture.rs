//! Stereo capture through cpal. The left channel becomes the A leg and the right channel the B
//! leg.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

use crate::buffer::ring::CaptureRing;
use crate::config::CaptureConfig;
use crate::error::{MonitorError, Result};

/// A running input stream. Capture stops when this is dropped.
pub struct CaptureStream {
    _stream: cpal::Stream,
    device_name: String,
}

impl CaptureStream {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn capture_error(err: impl std::fmt::Display) -> MonitorError {
    MonitorError::Capture(err.to_string())
}

pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(capture_error)?
        .map(|d| d.name().unwrap_or_else(|_| "unknown-input".to_string()))
        .collect();

    Ok(devices)
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    if let Some(name) = name.map(str::trim).filter(|s| !s.is_empty()) {
        let mut devices = host.input_devices().map_err(capture_error)?;
        return devices
            .find(|d| {
                d.name()
                    .map(|n| n.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MonitorError::Capture(format!("input device '{name}' not found")));
    }

    host.default_input_device()
        .ok_or_else(|| MonitorError::Capture("no default input device".to_owned()))
}

/// Open the configured device with two f32 channels at the configured rate and push everything
/// it delivers into `ring`.
pub fn start_capture(config: &CaptureConfig, ring: Arc<CaptureRing>) -> Result<CaptureStream> {
    let host = cpal::default_host();
    let device = find_input_device(&host, config.device.as_deref())?;
    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown-input".to_string());

    let supported = device
        .supported_input_configs()
        .map_err(capture_error)?
        .any(|range| {
            range.channels() == 2
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= config.sample_rate
                && range.max_sample_rate().0 >= config.sample_rate
        });
    if !supported {
        return Err(MonitorError::Capture(format!(
            "'{device_name}' does not support 2 channel f32 input at {} Hz",
            config.sample_rate
        )));
    }

    let mut stream_config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frames_per_callback as u32),
    };

    let stream = match build_stream(&device, &stream_config, Arc::clone(&ring)) {
        Ok(stream) => stream,
        Err(err) => {
            // Not every backend accepts a fixed period size. The ring copes with other sizes.
            log::warn!(
                "'{device_name}' rejected {} frame periods ({err}), using the default",
                config.frames_per_callback
            );
            stream_config.buffer_size = cpal::BufferSize::Default;
            build_stream(&device, &stream_config, ring).map_err(capture_error)?
        }
    };
    stream.play().map_err(capture_error)?;

    log::info!(
        "Capturing from '{device_name}' at {} Hz",
        config.sample_rate
    );

    Ok(CaptureStream {
        _stream: stream,
        device_name,
    })
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<CaptureRing>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| ring.push_interleaved(data),
        |err| log::error!("Input stream error: {err}"),
        None,
    )
}
