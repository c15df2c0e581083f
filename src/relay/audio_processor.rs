//! Accumulates and flushes model audio output per the configured
//! [`StreamingMode`], and tracks input audio timing for barge-in
//! truncation (spec §4.4).
//!
//! Grounded on `original_source/openai_voice/audio_processor.py`, extended
//! with the `Windowed` mode spec.md's unified model adds and with a
//! [`SampleFormat`] parameter so the interrupt-timing math isn't hardcoded
//! to 24kHz PCM16 (resolves spec.md's Open Question #2 — see SPEC_FULL.md).

use std::time::Instant;

use crate::config::StreamingMode;

/// Sample geometry needed to convert a byte count into a duration.
#[derive(Debug, Clone, Copy)]
pub struct SampleFormat {
    pub sample_rate_hz: u32,
    pub bytes_per_sample: u32,
}

impl SampleFormat {
    pub fn duration_ms(&self, byte_len: usize) -> f64 {
        if self.sample_rate_hz == 0 || self.bytes_per_sample == 0 {
            return 0.0;
        }
        let samples = byte_len as f64 / self.bytes_per_sample as f64;
        samples / (self.sample_rate_hz as f64 / 1000.0)
    }
}

/// What finalize_response (or a window flush) should do with the
/// accumulated bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedAudio {
    pub response_id: String,
    pub data: Vec<u8>,
}

struct Accumulator {
    current_response_id: Option<String>,
    chunks: Vec<Vec<u8>>,
    bytes: usize,
    response_start: Option<Instant>,
    window_start: Option<Instant>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            current_response_id: None,
            chunks: Vec::new(),
            bytes: 0,
            response_start: None,
            window_start: None,
        }
    }

    fn reset_for(&mut self, response_id: &str) {
        self.current_response_id = Some(response_id.to_string());
        self.chunks.clear();
        self.bytes = 0;
        self.response_start = Some(Instant::now());
        self.window_start = None;
    }

    fn clear(&mut self) {
        self.current_response_id = None;
        self.chunks.clear();
        self.bytes = 0;
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn take(&mut self) -> Vec<u8> {
        let combined: Vec<u8> = self.chunks.concat();
        self.clear();
        combined
    }
}

/// Tracks accumulated model audio and caller input timing for one session.
pub struct AudioProcessor {
    streaming_mode: StreamingMode,
    max_memory_bytes: usize,
    max_chunks_per_response: usize,
    window_size_chunks: usize,
    immediate_threshold_bytes: usize,
    window_timeout_ms: u64,

    input_format: SampleFormat,
    acc: Accumulator,

    /// Duration of audio already sent to the model this turn, for
    /// barge-in truncation math.
    total_input_duration_ms: f64,
    /// Item id of the model's current spoken response, used by
    /// `conversation.item.truncate`.
    pub last_assistant_item: Option<String>,
}

/// Outcome of feeding a chunk into the processor: whether (and what) to
/// forward downstream right away.
pub enum ChunkOutcome {
    /// Nothing to send yet (Accumulate mode, or window not yet due).
    Pending,
    /// Forward this data immediately (Individual mode, or a Windowed/
    /// memory-limit flush).
    Flush(FlushedAudio),
    /// The chunk was rejected — memory or chunk-count cap exceeded, and
    /// whatever had accumulated so far was flushed instead.
    CapExceeded(FlushedAudio),
}

impl AudioProcessor {
    pub fn new(
        streaming_mode: StreamingMode,
        max_memory_mb: usize,
        max_chunks_per_response: usize,
        window_size_chunks: usize,
        immediate_threshold_bytes: usize,
        window_timeout_ms: u64,
        input_format: SampleFormat,
    ) -> Self {
        Self {
            streaming_mode,
            max_memory_bytes: max_memory_mb * 1024 * 1024,
            max_chunks_per_response,
            window_size_chunks,
            immediate_threshold_bytes,
            window_timeout_ms,
            input_format,
            acc: Accumulator::new(),
            total_input_duration_ms: 0.0,
            last_assistant_item: None,
        }
    }

    /// Feed one `response.*.audio.delta` chunk belonging to `item_id`.
    pub fn add_audio_chunk(&mut self, audio_data: Vec<u8>, item_id: &str) -> ChunkOutcome {
        if self.acc.current_response_id.as_deref() != Some(item_id) {
            self.acc.reset_for(item_id);
        }
        self.last_assistant_item = Some(item_id.to_string());

        let size = audio_data.len();

        if self.streaming_mode == StreamingMode::Accumulate
            && (self.acc.bytes + size > self.max_memory_bytes
                || self.acc.chunks.len() >= self.max_chunks_per_response)
        {
            let response_id = self.acc.current_response_id.clone().unwrap_or_default();
            let data = self.acc.take();
            // the rejected chunk itself is dropped, matching the Python
            // original's behavior of flushing what had accumulated and
            // declining the chunk that pushed it over the limit.
            return ChunkOutcome::CapExceeded(FlushedAudio { response_id, data });
        }

        match self.streaming_mode {
            StreamingMode::Individual => {
                let response_id = self.acc.current_response_id.clone().unwrap_or_default();
                ChunkOutcome::Flush(FlushedAudio {
                    response_id,
                    data: audio_data,
                })
            }
            StreamingMode::Windowed => {
                if self.acc.window_start.is_none() {
                    self.acc.window_start = Some(Instant::now());
                }
                self.acc.chunks.push(audio_data);
                self.acc.bytes += size;

                let should_flush = self.acc.chunks.len() >= self.window_size_chunks
                    || self.acc.bytes >= self.immediate_threshold_bytes
                    || self
                        .acc
                        .window_start
                        .map(|t| t.elapsed().as_millis() as u64 >= self.window_timeout_ms)
                        .unwrap_or(false);

                if should_flush {
                    let response_id = self.acc.current_response_id.clone().unwrap_or_default();
                    let data = self.acc.take();
                    self.acc.window_start = None;
                    ChunkOutcome::Flush(FlushedAudio { response_id, data })
                } else {
                    ChunkOutcome::Pending
                }
            }
            StreamingMode::Accumulate => {
                self.acc.chunks.push(audio_data);
                self.acc.bytes += size;
                ChunkOutcome::Pending
            }
        }
    }

    /// `response.done` — finalize whatever is pending (a no-op for
    /// `Individual`/already-flushed `Windowed`, the full payload for
    /// `Accumulate`).
    pub fn finalize_response(&mut self) -> Option<FlushedAudio> {
        if self.acc.is_empty() {
            return None;
        }
        let response_id = self.acc.current_response_id.clone().unwrap_or_default();
        let data = self.acc.take();
        Some(FlushedAudio { response_id, data })
    }

    pub fn clear_accumulation(&mut self) {
        self.acc.clear();
    }

    /// Record an input chunk sent to the model, for later truncation math.
    pub fn track_input_audio(&mut self, audio_data: &[u8]) {
        self.total_input_duration_ms += self.input_format.duration_ms(audio_data.len());
    }

    pub fn reset_input_timing(&mut self) {
        self.total_input_duration_ms = 0.0;
    }

    /// `audio_end_ms = min(now - response_start, input_duration)` (spec §4.4).
    pub fn calculate_interrupt_timing(&self) -> u64 {
        let Some(start) = self.acc.response_start else {
            return 0;
        };
        let elapsed_ms = start.elapsed().as_millis() as f64;
        elapsed_ms.min(self.total_input_duration_ms).max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ulaw_format() -> SampleFormat {
        SampleFormat {
            sample_rate_hz: 8000,
            bytes_per_sample: 1,
        }
    }

    fn pcm16_24k_format() -> SampleFormat {
        SampleFormat {
            sample_rate_hz: 24000,
            bytes_per_sample: 2,
        }
    }

    #[test]
    fn duration_ms_matches_mulaw_8khz() {
        let fmt = ulaw_format();
        // 8000 bytes of 1-byte/sample mu-law at 8kHz = 1000ms
        assert_eq!(fmt.duration_ms(8000), 1000.0);
    }

    #[test]
    fn duration_ms_matches_pcm16_24khz() {
        let fmt = pcm16_24k_format();
        // 48000 bytes / 2 bytes-per-sample = 24000 samples @ 24kHz = 1000ms
        assert_eq!(fmt.duration_ms(48000), 1000.0);
    }

    #[test]
    fn individual_mode_flushes_every_chunk() {
        let mut p = AudioProcessor::new(StreamingMode::Individual, 50, 1000, 5, 4096, 200, ulaw_format());
        match p.add_audio_chunk(vec![1, 2, 3], "item1") {
            ChunkOutcome::Flush(f) => {
                assert_eq!(f.data, vec![1, 2, 3]);
                assert_eq!(f.response_id, "item1");
            }
            _ => panic!("expected immediate flush"),
        }
    }

    #[test]
    fn windowed_mode_flushes_on_count_threshold() {
        let mut p = AudioProcessor::new(StreamingMode::Windowed, 50, 1000, 2, 1_000_000, 60_000, ulaw_format());
        assert!(matches!(p.add_audio_chunk(vec![0; 10], "item1"), ChunkOutcome::Pending));
        match p.add_audio_chunk(vec![0; 10], "item1") {
            ChunkOutcome::Flush(f) => assert_eq!(f.data.len(), 20),
            _ => panic!("expected flush at window_size_chunks"),
        }
    }

    #[test]
    fn windowed_mode_flushes_on_byte_threshold() {
        let mut p = AudioProcessor::new(StreamingMode::Windowed, 50, 1000, 1000, 15, 60_000, ulaw_format());
        match p.add_audio_chunk(vec![0; 20], "item1") {
            ChunkOutcome::Flush(f) => assert_eq!(f.data.len(), 20),
            _ => panic!("expected flush at immediate_threshold_bytes"),
        }
    }

    #[test]
    fn accumulate_mode_never_flushes_until_finalize() {
        let mut p = AudioProcessor::new(StreamingMode::Accumulate, 50, 1000, 5, 4096, 200, ulaw_format());
        assert!(matches!(p.add_audio_chunk(vec![1, 2], "item1"), ChunkOutcome::Pending));
        assert!(matches!(p.add_audio_chunk(vec![3, 4], "item1"), ChunkOutcome::Pending));
        let flushed = p.finalize_response().expect("should have accumulated data");
        assert_eq!(flushed.data, vec![1, 2, 3, 4]);
        assert!(p.finalize_response().is_none());
    }

    #[test]
    fn chunk_cap_forces_early_flush() {
        let mut p = AudioProcessor::new(StreamingMode::Accumulate, 50, 2, 5, 4096, 200, ulaw_format());
        assert!(matches!(p.add_audio_chunk(vec![1], "item1"), ChunkOutcome::Pending));
        assert!(matches!(p.add_audio_chunk(vec![2], "item1"), ChunkOutcome::Pending));
        match p.add_audio_chunk(vec![3], "item1") {
            ChunkOutcome::CapExceeded(f) => assert_eq!(f.data, vec![1, 2]),
            _ => panic!("expected chunk cap to force a flush"),
        }
    }

    #[test]
    fn memory_cap_forces_early_flush() {
        let mut p = AudioProcessor::new(StreamingMode::Accumulate, 0, 1000, 5, 4096, 200, ulaw_format());
        // max_memory_mb = 0 means any non-empty chunk immediately exceeds it
        // after the first chunk has been accumulated once.
        assert!(matches!(p.add_audio_chunk(vec![0; 10], "item1"), ChunkOutcome::Pending));
        match p.add_audio_chunk(vec![0; 10], "item1") {
            ChunkOutcome::CapExceeded(f) => assert_eq!(f.data.len(), 10),
            _ => panic!("expected memory cap to force a flush"),
        }
    }

    #[test]
    fn interrupt_timing_is_bounded_by_input_duration() {
        let mut p = AudioProcessor::new(StreamingMode::Accumulate, 50, 1000, 5, 4096, 200, ulaw_format());
        p.add_audio_chunk(vec![0; 10], "item1");
        p.track_input_audio(&[0; 80]); // 80 bytes @ 8kHz mu-law = 10ms
        let timing = p.calculate_interrupt_timing();
        assert!(timing <= 10);
    }

    #[test]
    fn new_response_id_resets_accumulation() {
        let mut p = AudioProcessor::new(StreamingMode::Accumulate, 50, 1000, 5, 4096, 200, ulaw_format());
        p.add_audio_chunk(vec![1, 2], "item1");
        p.add_audio_chunk(vec![9, 9, 9], "item2");
        let flushed = p.finalize_response().unwrap();
        assert_eq!(flushed.data, vec![9, 9, 9]);
        assert_eq!(flushed.response_id, "item2");
    }
}
