use super::policy::ServiceError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub genre: Option<String>,
    pub description: String,
    pub duration_secs: f64,
}

/// Mono audio, samples in [-1, 1].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// 16-bit PCM WAV bytes. Out-of-range samples are clipped.
    pub fn to_wav(&self) -> Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in &self.samples {
            let clipped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
            writer.write_sample((clipped * f32::from(i16::MAX)) as i16)?;
        }
        writer.finalize()?;
        Ok(cursor.into_inner())
    }

    pub fn to_wav_base64(&self) -> Result<String, hound::Error> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_wav()?))
    }
}

#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioClip, ServiceError>;
}

/// Client for a text-to-music HTTP service.
///
/// `POST {base_url}/synthesize` with `{genre, description, duration_secs}`,
/// answered by `{sample_rate, samples}`.
pub struct HttpAudioSynthesizer {
    client: Client,
    base_url: String,
}

impl HttpAudioSynthesizer {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AudioSynthesizer for HttpAudioSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioClip, ServiceError> {
        let url = format!("{}/synthesize", self.base_url);
        debug!(url = %url, duration_secs = request.duration_secs, "Requesting audio synthesis");

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let clip: AudioClip = response.json().await.map_err(|e| {
            ServiceError::InvalidResponse(format!("Failed to parse synthesis response: {}", e))
        })?;
        if clip.sample_rate == 0 || clip.samples.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "synthesis returned no audio".to_string(),
            ));
        }

        debug!(
            sample_rate = clip.sample_rate,
            duration_secs = clip.duration_secs(),
            "Received synthesized audio"
        );
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_encoding() {
        let clip = AudioClip {
            sample_rate: 8000,
            samples: vec![0.0, 0.5, -0.5, 2.0, -2.0, f32::NAN],
        };
        let wav = clip.to_wav().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16383, i16::MAX, -i16::MAX, 0]);
    }

    #[test]
    fn test_base64_output() {
        let clip = AudioClip {
            sample_rate: 16000,
            samples: vec![0.1; 16],
        };
        let encoded = clip.to_wav_base64().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, clip.to_wav().unwrap());
    }

    #[test]
    fn test_duration() {
        let clip = AudioClip {
            sample_rate: 4,
            samples: vec![0.0; 10],
        };
        assert_eq!(clip.duration_secs(), 2.5);
    }

    #[test]
    fn test_request_serialization() {
        let request = SynthesisRequest {
            genre: Some("pop".to_string()),
            description: "bright synths".to_string(),
            duration_secs: 8.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"genre": "pop", "description": "bright synths", "duration_secs": 8.0})
        );
    }
}
