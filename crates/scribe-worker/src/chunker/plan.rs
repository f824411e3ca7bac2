//! # Chunk Planning
//!
//! Pure boundary computation over a probed duration and detected silence
//! midpoints. Separated from the ffmpeg plumbing so the walk is testable
//! without media files.

use scribe_shared::config::ChunkingConfig;

/// A silence interval reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceSpan {
    pub start: f64,
    pub end: f64,
}

impl SilenceSpan {
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// One planned cut of the source audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSpan {
    pub index: usize,
    /// Inclusive start second.
    pub start: f64,
    /// Exclusive end second.
    pub end: f64,
    /// True when the boundary was forced at the duration cap rather than
    /// placed on a silence; the next chunk then starts with overlap.
    pub hard_cut: bool,
}

impl ChunkSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Parse `silencedetect` stderr output into silence spans.
///
/// The filter logs lines like:
/// `[silencedetect @ 0x...] silence_start: 12.34`
/// `[silencedetect @ 0x...] silence_end: 13.1 | silence_duration: 0.76`
/// A trailing `silence_start` with no matching end (silence runs to EOF) is
/// dropped; it cannot host a cut anyway.
pub fn parse_silences(stderr: &str) -> Vec<SilenceSpan> {
    let mut spans = Vec::new();
    let mut open_start: Option<f64> = None;

    for line in stderr.lines() {
        if let Some(value) = field_value(line, "silence_start:") {
            open_start = Some(value);
        } else if let Some(value) = field_value(line, "silence_end:") {
            if let Some(start) = open_start.take() {
                spans.push(SilenceSpan { start, end: value });
            }
        }
    }

    spans
}

fn field_value(line: &str, field: &str) -> Option<f64> {
    let rest = line.split(field).nth(1)?;
    let token = rest.split_whitespace().next()?;
    token.parse().ok()
}

/// Walk the file and place chunk boundaries.
///
/// Each step ends at the latest silence midpoint inside the window when one
/// lies close enough to the duration cap (clean cut), otherwise at the cap
/// itself (hard cut, next chunk overlaps). Remainders shorter than
/// `min_tail_seconds` are absorbed into the final chunk.
pub fn plan_chunks(duration: f64, silences: &[f64], config: &ChunkingConfig) -> Vec<ChunkSpan> {
    let mut spans = Vec::new();
    if duration <= 0.0 {
        return spans;
    }

    let mut start = 0.0_f64;
    let mut index = 0_usize;

    while start < duration {
        let tentative = (start + config.max_chunk_seconds).min(duration);

        let clean_cut = silences
            .iter()
            .copied()
            .filter(|point| *point > start && *point <= tentative)
            .fold(None::<f64>, |best, point| {
                Some(best.map_or(point, |b| b.max(point)))
            })
            .filter(|point| tentative - point <= config.clean_cut_window_seconds);

        let (mut end, hard_cut) = match clean_cut {
            Some(point) => (point, false),
            None => (tentative, true),
        };

        if duration - end < config.min_tail_seconds {
            end = duration;
        }

        spans.push(ChunkSpan {
            index,
            start,
            end,
            hard_cut,
        });

        if end >= duration {
            break;
        }

        start = if hard_cut {
            (end - config.overlap_seconds).max(0.0)
        } else {
            end
        };
        index += 1;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn parses_silencedetect_output() {
        let stderr = "\
[silencedetect @ 0x5591] silence_start: 12.8409
[silencedetect @ 0x5591] silence_end: 13.6218 | silence_duration: 0.780862
size=N/A time=00:01:10.02 bitrate=N/A speed= 711x
[silencedetect @ 0x5591] silence_start: 41.02
[silencedetect @ 0x5591] silence_end: 41.75 | silence_duration: 0.73
";
        let spans = parse_silences(stderr);
        assert_eq!(spans.len(), 2);
        assert!((spans[0].start - 12.8409).abs() < 1e-6);
        assert!((spans[0].end - 13.6218).abs() < 1e-6);
        assert!((spans[1].midpoint() - 41.385).abs() < 1e-6);
    }

    #[test]
    fn unterminated_silence_start_is_dropped() {
        let stderr = "[silencedetect @ 0x1] silence_start: 58.0\n";
        assert!(parse_silences(stderr).is_empty());
    }

    #[test]
    fn short_file_is_one_chunk() {
        let spans = plan_chunks(10.0, &[], &config());
        assert_eq!(
            spans,
            vec![ChunkSpan {
                index: 0,
                start: 0.0,
                end: 10.0,
                hard_cut: true
            }]
        );
    }

    #[test]
    fn clean_cut_on_nearby_silence() {
        // Silence at 29 s is within 10 s of the 30 s cap: clean cut, no
        // overlap into the next chunk.
        let spans = plan_chunks(70.0, &[29.0, 57.5], &config());

        assert_eq!(spans[0].end, 29.0);
        assert!(!spans[0].hard_cut);
        assert_eq!(spans[1].start, 29.0);
    }

    #[test]
    fn distant_silence_forces_hard_cut_with_overlap() {
        // Latest silence in (0, 30] is at 15 s, 15 s short of the cap: the
        // chunk cuts hard at 30 and the next starts 1.5 s earlier.
        let spans = plan_chunks(70.0, &[15.0], &config());

        assert_eq!(spans[0].end, 30.0);
        assert!(spans[0].hard_cut);
        assert_eq!(spans[1].start, 28.5);
    }

    #[test]
    fn short_remainder_is_absorbed() {
        // 33 s: the 3 s remainder after the 30 s cap folds into one chunk.
        let spans = plan_chunks(33.0, &[], &config());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end, 33.0);
    }

    #[test]
    fn spans_cover_the_whole_duration() {
        let duration = 200.0;
        let silences = [26.0, 48.0, 95.0, 140.0];
        let spans = plan_chunks(duration, &silences, &config());

        assert_eq!(spans[0].start, 0.0);
        assert_eq!(spans.last().unwrap().end, duration);
        for pair in spans.windows(2) {
            // The next chunk starts at or before the previous end (overlap
            // only after hard cuts); no gaps.
            assert!(pair[1].start <= pair[0].end);
            if pair[0].hard_cut {
                assert!((pair[0].end - pair[1].start - 1.5).abs() < 1e-9);
            } else {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn no_chunk_exceeds_cap_plus_tail_leniency() {
        let spans = plan_chunks(604.0, &[], &config());
        let limit = 30.0 + 5.0;
        for span in &spans {
            assert!(span.duration() <= limit + 1e-9, "span too long: {span:?}");
        }
    }

    #[test]
    fn indexes_are_sequential() {
        let spans = plan_chunks(100.0, &[28.0, 55.0], &config());
        for (expected, span) in spans.iter().enumerate() {
            assert_eq!(span.index, expected);
        }
    }
}
