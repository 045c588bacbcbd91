use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavSpec};
use log::warn;
use radiodecode_core::{DecodedData, SampleSource, SourcePoll};

use crate::CliError;

/// Mono 16-bit samples read from a WAV file (first channel only)
pub struct WavAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

pub fn read_wav(path: &Path) -> Result<WavAudio, CliError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let all: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
            all?.into_iter().step_by(channels).collect()
        }
        (SampleFormat::Float, 32) => {
            let all: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            all?.into_iter()
                .step_by(channels)
                .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect()
        }
        (format, bits) => {
            return Err(CliError::UnsupportedFormat(format!("{:?} {}-bit", format, bits)));
        }
    };

    Ok(WavAudio { sample_rate: spec.sample_rate, samples })
}

pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(BufWriter::new(File::create(path)?), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// First-order DC blocker, y[n] = x[n] - x[n-1] + R * y[n-1]
struct DcBlocker {
    last_in: f32,
    last_out: f32,
}

impl DcBlocker {
    const R: f32 = 0.995;

    fn process(&mut self, x: i16) -> i16 {
        let x = x as f32;
        let y = x - self.last_in + Self::R * self.last_out;
        self.last_in = x;
        self.last_out = y;
        y.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }
}

/// Free text slots kept in reserve before another block is handed out;
/// one block never decodes more than a couple of characters
const TEXT_HEADROOM: usize = 8;

/// Stands in for ADC acquisition: hands the WAV out block by block,
/// optionally paced at the file's real sampling rate
pub struct WavSource {
    audio: WavAudio,
    position: usize,
    dc: DcBlocker,
    pace: Option<Instant>,
    backpressure: Option<Arc<DecodedData>>,
}

impl WavSource {
    pub fn new(audio: WavAudio, realtime: bool) -> Self {
        Self {
            audio,
            position: 0,
            dc: DcBlocker { last_in: 0.0, last_out: 0.0 },
            pace: realtime.then(Instant::now),
            backpressure: None,
        }
    }

    /// Hold blocks back while the consumer has not drained the decoded text
    pub fn with_backpressure(mut self, data: Arc<DecodedData>) -> Self {
        self.backpressure = Some(data);
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.audio.samples.len() as f64 / self.audio.sample_rate.max(1) as f64)
    }
}

impl SampleSource for WavSource {
    fn poll_block(&mut self, out: &mut [i16]) -> SourcePoll {
        let remaining = self.audio.samples.len() - self.position;
        if remaining == 0 {
            return SourcePoll::Exhausted;
        }
        let n = out.len().min(remaining);

        if let Some(data) = &self.backpressure {
            if data.text.len() + TEXT_HEADROOM > data.text.capacity() {
                return SourcePoll::Pending;
            }
        }

        if let Some(start) = self.pace {
            let due = Duration::from_secs_f64((self.position + n) as f64 / self.audio.sample_rate as f64);
            if start.elapsed() < due {
                return SourcePoll::Pending;
            }
        }

        for (dst, &src) in out.iter_mut().zip(&self.audio.samples[self.position..self.position + n]) {
            *dst = self.dc.process(src);
        }
        self.position += n;
        SourcePoll::Block(n)
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.audio.sample_rate {
            warn!(
                "Decoder runs at {} Hz but the WAV file is {} Hz; tones and timing will be off",
                sample_rate, self.audio.sample_rate
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_blocker_removes_offset() {
        let mut dc = DcBlocker { last_in: 0.0, last_out: 0.0 };
        let mut last = 0;
        for _ in 0..4000 {
            last = dc.process(1000);
        }
        assert!(last.abs() < 5, "residual DC {}", last);
    }

    #[test]
    fn test_source_blocks_then_exhausts() {
        let audio = WavAudio { sample_rate: 8000, samples: vec![0; 300] };
        let mut source = WavSource::new(audio, false);
        let mut block = [0i16; 256];
        assert_eq!(source.poll_block(&mut block), SourcePoll::Block(256));
        assert_eq!(source.poll_block(&mut block), SourcePoll::Block(44));
        assert_eq!(source.poll_block(&mut block), SourcePoll::Exhausted);
    }

    #[test]
    fn test_backpressure_waits_for_consumer() {
        let data = Arc::new(DecodedData::new());
        let audio = WavAudio { sample_rate: 8000, samples: vec![0; 1000] };
        let mut source = WavSource::new(audio, false).with_backpressure(Arc::clone(&data));
        let mut block = [0i16; 256];

        assert_eq!(source.poll_block(&mut block), SourcePoll::Block(256));
        for _ in 0..data.text.capacity() - 4 {
            data.emit('E');
        }
        assert_eq!(source.poll_block(&mut block), SourcePoll::Pending);

        assert_eq!(data.drain_text().len(), data.text.capacity() - 4);
        assert_eq!(source.poll_block(&mut block), SourcePoll::Block(256));
    }
}
