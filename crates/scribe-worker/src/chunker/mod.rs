//! # Audio Chunker
//!
//! Splits uploaded audio into STT-sized pieces. Boundaries prefer detected
//! silence (clean cuts); otherwise the chunk is cut hard at the duration cap
//! and the next chunk starts with a short overlap so it does not begin
//! mid-word. Every chunk is transcoded to 16 kHz mono 16-bit PCM WAV, the
//! format the STT providers expect.
//!
//! Probing, silence detection, and transcoding shell out to `ffprobe` /
//! `ffmpeg`. Chunks are staged in a temporary directory owned by the
//! returned [`ChunkSet`]; dropping it removes everything regardless of how
//! the task ends.

pub mod plan;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use scribe_shared::config::ChunkingConfig;
use scribe_shared::errors::{ScribeError, ScribeResult};

use plan::{parse_silences, plan_chunks, ChunkSpan};

/// Bytes per second of 16 kHz mono signed 16-bit PCM.
const PCM_BYTES_PER_SECOND: f64 = 32_000.0;

/// One transcoded chunk on disk.
#[derive(Debug)]
pub struct AudioChunk {
    pub index: usize,
    pub path: PathBuf,
}

/// The ordered chunks plus the staging directory keeping them alive.
#[derive(Debug)]
pub struct ChunkSet {
    pub chunks: Vec<AudioChunk>,
    _staging: TempDir,
}

#[derive(Debug, Clone)]
pub struct AudioChunker {
    config: ChunkingConfig,
}

impl AudioChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Chunk `source` into normalized WAV pieces.
    pub async fn chunk(&self, source: &Path) -> ScribeResult<ChunkSet> {
        let duration = self.probe_duration(source).await?;
        let staging = tempfile::Builder::new()
            .prefix("scribe-chunks-")
            .tempdir()?;

        // Small files skip silence analysis entirely: the whole file
        // normalizes to a single chunk under the size threshold.
        let projected_bytes = (duration * PCM_BYTES_PER_SECOND) as u64;
        if projected_bytes < self.config.single_chunk_bytes {
            debug!(
                source = %source.display(),
                duration_secs = duration,
                "audio fits a single chunk; transcoding whole"
            );
            let chunk = self
                .extract_chunk(
                    source,
                    ChunkSpan {
                        index: 0,
                        start: 0.0,
                        end: duration,
                        hard_cut: false,
                    },
                    staging.path(),
                )
                .await?;
            return Ok(ChunkSet {
                chunks: vec![chunk],
                _staging: staging,
            });
        }

        let silences = match self.detect_silences(source).await {
            Ok(spans) => spans.iter().map(|span| span.midpoint()).collect(),
            Err(error) => {
                // Hard cutting with overlap still produces a full cover.
                warn!(
                    source = %source.display(),
                    error = %error,
                    "silence detection failed; falling back to hard cuts"
                );
                Vec::new()
            }
        };

        let spans = plan_chunks(duration, &silences, &self.config);
        debug!(
            source = %source.display(),
            duration_secs = duration,
            silence_points = silences.len(),
            chunks = spans.len(),
            "planned audio chunks"
        );

        let mut chunks = Vec::with_capacity(spans.len());
        for span in spans {
            chunks.push(self.extract_chunk(source, span, staging.path()).await?);
        }

        Ok(ChunkSet {
            chunks,
            _staging: staging,
        })
    }

    /// Total duration in seconds via ffprobe.
    async fn probe_duration(&self, source: &Path) -> ScribeResult<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| ScribeError::Chunking(format!("ffprobe spawn failed: {error}")))?;

        if !output.status.success() {
            return Err(ScribeError::Chunking(format!(
                "ffprobe failed for {}: {}",
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim().parse::<f64>().map_err(|_| {
            ScribeError::Chunking(format!("ffprobe returned no duration for {}", source.display()))
        })
    }

    /// Run silencedetect and collect silence intervals.
    async fn detect_silences(&self, source: &Path) -> ScribeResult<Vec<plan::SilenceSpan>> {
        let filter = format!(
            "silencedetect=noise={}dB:d={}",
            self.config.silence_threshold_db, self.config.min_silence_seconds
        );

        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-nostats", "-i"])
            .arg(source)
            .args(["-af", &filter, "-f", "null", "-"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| ScribeError::Chunking(format!("ffmpeg spawn failed: {error}")))?;

        if !output.status.success() {
            return Err(ScribeError::Chunking(format!(
                "silencedetect failed for {}: {}",
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_silences(&String::from_utf8_lossy(&output.stderr)))
    }

    /// Transcode one span to 16 kHz mono s16 WAV in the staging directory.
    async fn extract_chunk(
        &self,
        source: &Path,
        span: ChunkSpan,
        staging: &Path,
    ) -> ScribeResult<AudioChunk> {
        let path = staging.join(format!("chunk-{:04}.wav", span.index));

        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-ss", &format!("{:.3}", span.start)])
            .args(["-t", &format!("{:.3}", span.duration())])
            .arg("-i")
            .arg(source)
            .args(["-ac", "1", "-ar", "16000", "-acodec", "pcm_s16le"])
            .arg(&path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| ScribeError::Chunking(format!("ffmpeg spawn failed: {error}")))?;

        if !output.status.success() {
            return Err(ScribeError::Chunking(format!(
                "transcoding chunk {} of {} failed: {}",
                span.index,
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(AudioChunk {
            index: span.index,
            path,
        })
    }
}
