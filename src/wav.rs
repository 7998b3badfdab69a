//! Export of decoded clips as 16-bit PCM WAV files.

use crate::cache::unique_temp_path;
use crate::codec::DecodedClip;
use anyhow::{Context, Result};
use hound::WavSpec;
use std::fs;
use std::path::Path;
use tracing::info;

pub fn write_wav(path: &Path, clip: &DecodedClip) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating export directory {}", parent.display()))?;
    }

    let spec = WavSpec {
        channels: clip.channel_count(),
        sample_rate: clip.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let temp_path = unique_temp_path(path);
    let mut writer = hound::WavWriter::create(&temp_path, spec)
        .with_context(|| format!("Creating WAV file {}", temp_path.display()))?;
    for s in clip.interleaved() {
        let sample = (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    if fs::rename(&temp_path, path).is_err() {
        fs::copy(&temp_path, path)?;
        let _ = fs::remove_file(&temp_path);
    }
    info!(
        path = %path.display(),
        frames = clip.frames(),
        "Exported clip as WAV"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SAMPLE_RATE, decode_clip};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn exported_samples_match_source_pcm() {
        let dir = std::env::temp_dir().join(format!(
            "vozviva_wav_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock should be after epoch")
                .as_nanos()
        ));
        let path = dir.join("nested").join("hablar.wav");
        let source: Vec<i16> = vec![0, 1, -1, 16384, -32768, 32767, 1200];
        let bytes: Vec<u8> = source.iter().flat_map(|s| s.to_le_bytes()).collect();
        let clip = decode_clip(&bytes).expect("valid pcm");

        write_wav(&path, &clip).expect("export succeeds");

        let mut reader = hound::WavReader::open(&path).expect("readable wav");
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .expect("samples decode");
        assert_eq!(samples, source);

        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
