use super::stream_source::StreamReader;
use crate::error::{AppError, AppResult};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

pub struct AudioDecoder {
    format_reader: Box<dyn symphonia::core::formats::FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

/// Container extension symphonia should probe first for a stream.
pub fn container_hint(mime_type: &str, codec_tag: &str) -> Option<&'static str> {
    let mime = mime_type.to_ascii_lowercase();
    let codec = codec_tag.to_ascii_lowercase();
    if mime.contains("mp4") || codec.starts_with("mp4a") {
        Some("m4a")
    } else if mime.contains("webm") || codec == "opus" || codec == "vorbis" {
        Some("webm")
    } else if mime.contains("mpeg") || codec == "mp3" {
        Some("mp3")
    } else {
        None
    }
}

impl AudioDecoder {
    /// Probe the container. Blocks until enough bytes have arrived.
    pub fn new(source: StreamReader, extension: Option<&str>) -> AppResult<Self> {
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AppError::Decode(format!("Failed to probe format: {}", e)))?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AppError::Decode("No supported audio track found".into()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AppError::Decode(format!("Failed to create decoder: {}", e)))?;

        log::info!(
            "[decoder] Ready: {:?} {}Hz x{}",
            extension,
            sample_rate,
            channels
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn seek(&mut self, position_seconds: f64) -> AppResult<()> {
        let time = Time {
            seconds: position_seconds as u64,
            frac: position_seconds.fract(),
        };

        self.format_reader
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AppError::Decode(format!("Seek failed: {}", e)))?;

        self.decoder.reset();
        Ok(())
    }

    /// Next batch of interleaved samples, or `None` at end of stream.
    pub fn decode_next(&mut self) -> AppResult<Option<Vec<f32>>> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(AppError::Decode(format!("Failed to read packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                    log::warn!("[decoder] Skipping bad packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(AppError::Decode(format!("Failed to decode: {}", e))),
            };

            let spec = *decoded.spec();
            let mut samples = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            samples.copy_interleaved_ref(decoded);
            return Ok(Some(samples.samples().to_vec()));
        }
    }
}
