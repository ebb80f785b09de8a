//! Whisper-based speech-to-text transcription
//!
//! Uses whisper.cpp via the whisper-rs crate. Each instance owns one
//! `WhisperContext` pinned to a device; the pool builds one per device replica.

use super::{preview, TranscribeOptions, Transcriber, Transcription, UNKNOWN_LANGUAGE};
use crate::device::Device;
use crate::error::TranscribeError;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Whisper model instance
pub struct WhisperTranscriber {
    ctx: WhisperContext,
    device: Device,
    threads: usize,
}

impl WhisperTranscriber {
    /// Load `model` (a name like "large-v3" or a path to a .bin file) on `device`
    pub fn load(
        model: &str,
        device: &Device,
        models_dir: &Path,
        threads: Option<usize>,
    ) -> Result<Self, TranscribeError> {
        let model_path = resolve_model_path(model, models_dir)?;

        tracing::info!("Loading whisper model {:?} on {}", model_path, device);
        let start = std::time::Instant::now();

        let mut params = WhisperContextParameters::default();
        match device {
            Device::Cpu => {
                params.use_gpu(false);
            }
            Device::Cuda(index) => {
                params.use_gpu(true);
                params.gpu_device(*index as i32);
            }
            Device::Auto => {}
        }

        let ctx = WhisperContext::new_with_params(
            model_path
                .to_str()
                .ok_or_else(|| TranscribeError::ModelNotFound("Invalid path".to_string()))?,
            params,
        )
        .map_err(|e| TranscribeError::InitFailed(e.to_string()))?;

        tracing::info!(
            "Model loaded on {} in {:.2}s",
            device,
            start.elapsed().as_secs_f32()
        );

        Ok(Self {
            ctx,
            device: *device,
            threads: threads.unwrap_or_else(|| num_cpus::get().min(4)),
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &mut self,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> Result<Transcription, TranscribeError> {
        let bytes = std::fs::read(audio).map_err(|e| {
            TranscribeError::AudioFormat(format!("Cannot read {}: {}", audio.display(), e))
        })?;
        let samples = decode_wav_to_mono_16k(&bytes).map_err(TranscribeError::AudioFormat)?;
        if samples.is_empty() {
            return Err(TranscribeError::AudioFormat("Empty audio buffer".to_string()));
        }

        let start = std::time::Instant::now();
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| TranscribeError::InferenceFailed(e.to_string()))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        let language = options.language_hint();
        params.set_language(language);
        if let Some(prompt) = options.prompt.as_deref() {
            params.set_initial_prompt(prompt);
        }
        params.set_n_threads(self.threads as i32);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_suppress_blank(true);

        state
            .full(params, &samples)
            .map_err(|e| TranscribeError::InferenceFailed(e.to_string()))?;

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(
                segment
                    .to_str()
                    .map_err(|e| TranscribeError::InferenceFailed(e.to_string()))?,
            );
        }
        let text = text.trim().to_string();

        tracing::info!(
            "Transcription on {} completed in {:.2}s: {:?}",
            self.device,
            start.elapsed().as_secs_f32(),
            preview(&text)
        );

        let detected = state.full_lang_id_from_state().ok();
        Ok(Transcription {
            text,
            language: reported_language(detected, language),
        })
    }
}

/// Language code whisper settled on, else the hint, else "auto"
fn reported_language(detected: Option<i32>, hint: Option<&str>) -> String {
    detected
        .and_then(whisper_rs::get_lang_str)
        .or(hint)
        .unwrap_or(UNKNOWN_LANGUAGE)
        .to_string()
}

/// Resolve a model name to a ggml file under `models_dir`
fn resolve_model_path(model: &str, models_dir: &Path) -> Result<PathBuf, TranscribeError> {
    let direct = PathBuf::from(model);
    if direct.is_absolute() && direct.exists() {
        return Ok(direct);
    }

    let candidate = models_dir.join(format!("ggml-{}.bin", model));
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(TranscribeError::ModelNotFound(format!(
        "{} (looked in {:?})",
        model, models_dir
    )))
}

/// Decode WAV bytes to mono f32 samples at 16kHz
fn decode_wav_to_mono_16k(wav_bytes: &[u8]) -> Result<Vec<f32>, String> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_bytes))
        .map_err(|e| format!("Invalid WAV payload: {}", e))?;
    let spec = reader.spec();

    let channels = spec.channels as usize;
    if channels == 0 {
        return Err("WAV payload has zero channels".to_string());
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v.clamp(-1.0, 1.0)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Failed to decode float WAV samples: {}", e))?,
        hound::SampleFormat::Int => {
            let max_val = int_sample_scale(spec.bits_per_sample)?;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("Failed to decode WAV samples: {}", e))?
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| (frame.iter().sum::<f32>() / channels as f32).clamp(-1.0, 1.0))
            .collect()
    };

    Ok(resample_linear(&mono, spec.sample_rate, 16000))
}

/// Full-scale value for signed integer samples of `bits` width
fn int_sample_scale(bits: u16) -> Result<f32, String> {
    if bits == 0 || bits > 32 {
        return Err(format!("Unsupported WAV sample width: {} bits", bits));
    }
    Ok(((1_i64 << (bits - 1)) - 1).max(1) as f32)
}

fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 / ratio;
            let idx = source_pos.floor() as usize;
            let frac = (source_pos - idx as f64) as f32;
            let value = if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples.get(idx).copied().unwrap_or(0.0)
            };
            value.clamp(-1.0, 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames * channels as usize {
                writer.write_sample(((i % 100) as i16) * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_resamples_to_16k() {
        let decoded = decode_wav_to_mono_16k(&wav_bytes(8000, 1, 4000)).unwrap();
        assert_eq!(decoded.len(), 8000);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        let decoded = decode_wav_to_mono_16k(&wav_bytes(16000, 2, 1600)).unwrap();
        assert_eq!(decoded.len(), 1600);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav_to_mono_16k(b"not a wav").is_err());
    }

    #[test]
    fn test_rejects_zero_bit_samples() {
        assert!(int_sample_scale(0).is_err());
        assert!(int_sample_scale(40).is_err());
        assert_eq!(int_sample_scale(16).unwrap(), 32767.0);
        assert_eq!(int_sample_scale(8).unwrap(), 127.0);

        let mut header = wav_bytes(16000, 1, 16);
        // fmt chunk: bits_per_sample sits at byte 34
        header[34] = 0;
        header[35] = 0;
        assert!(decode_wav_to_mono_16k(&header).is_err());
    }

    #[test]
    fn test_reports_detected_language_over_hint() {
        assert_eq!(reported_language(Some(0), None), "en");
        assert_eq!(reported_language(Some(0), Some("ja")), "en");
        assert_eq!(reported_language(None, Some("ja")), "ja");
        assert_eq!(reported_language(None, None), "auto");
    }

    #[test]
    fn test_resolve_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_model_path("large-v3", dir.path()).unwrap_err();
        assert!(matches!(err, TranscribeError::ModelNotFound(_)));
    }
}
