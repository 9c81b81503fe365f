//! The single PCM profile every audio file in the pipeline must satisfy.

use crate::error::{PipelineError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const SAMPLE_RATE_HZ: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const SAMPLE_WIDTH_BYTES: u16 = 2;
pub const BYTES_PER_FRAME: usize = CHANNELS as usize * SAMPLE_WIDTH_BYTES as usize;

pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: SAMPLE_WIDTH_BYTES * 8,
        sample_format: SampleFormat::Int,
    }
}

/// RIFF/WAVE signature check.
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Fail loudly naming the first parameter that differs from the fixed profile.
pub fn check_spec(spec: &WavSpec, path: &str) -> Result<()> {
    let mismatch = |parameter: &'static str, expected: u32, actual: u32| PipelineError::Format {
        path: path.to_string(),
        parameter,
        expected,
        actual,
    };
    if spec.sample_rate != SAMPLE_RATE_HZ {
        return Err(mismatch("sample_rate", SAMPLE_RATE_HZ, spec.sample_rate));
    }
    if spec.channels != CHANNELS {
        return Err(mismatch("channels", CHANNELS.into(), spec.channels.into()));
    }
    if spec.bits_per_sample != SAMPLE_WIDTH_BYTES * 8 {
        return Err(mismatch(
            "bits_per_sample",
            u32::from(SAMPLE_WIDTH_BYTES) * 8,
            spec.bits_per_sample.into(),
        ));
    }
    if spec.sample_format != SampleFormat::Int {
        return Err(mismatch("sample_format(int=1, float=3)", 1, 3));
    }
    Ok(())
}

/// Normalise a collaborator payload to samples of the fixed profile.
///
/// A RIFF/WAVE container is opened and checked against the profile; anything
/// else is taken as raw little-endian samples whose length must be a whole
/// number of frames.
pub fn extract_pcm(id: u32, payload: &[u8]) -> Result<Vec<i16>> {
    if is_wav(payload) {
        let mut reader = WavReader::new(Cursor::new(payload))?;
        check_spec(&reader.spec(), &format!("<turn {id} response>"))?;
        let samples = reader.samples::<i16>().collect::<std::result::Result<Vec<_>, _>>()?;
        return Ok(samples);
    }

    if payload.len() % BYTES_PER_FRAME != 0 {
        return Err(PipelineError::RawPcmLength {
            id,
            len: payload.len(),
            frame_bytes: BYTES_PER_FRAME,
        });
    }
    Ok(payload
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// Frame count of an existing file, validating its header without decoding samples.
pub fn wav_frames(path: &Path) -> Result<u64> {
    let reader = WavReader::open(path)?;
    check_spec(&reader.spec(), &path.display().to_string())?;
    Ok(u64::from(reader.duration()))
}

/// Write samples as a fixed-profile WAV. The file only appears at `path`
/// once it is complete.
pub fn write_wav(path: &Path, samples: &[i16]) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = part_path(path);
    {
        let mut writer = WavWriter::create(&tmp, wav_spec())?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    fs::rename(&tmp, path)?;
    Ok(samples.len() as u64 / u64::from(CHANNELS))
}

pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
pub(crate) fn wav_bytes(spec: WavSpec, samples: &[i16]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_samples_from_container() {
        let data = wav_bytes(wav_spec(), &[1, -2, 3, i16::MAX]);
        assert!(is_wav(&data));
        assert_eq!(extract_pcm(0, &data).unwrap(), vec![1, -2, 3, i16::MAX]);
    }

    #[test]
    fn test_container_with_wrong_rate_is_rejected() {
        let spec = WavSpec {
            sample_rate: 44_100,
            ..wav_spec()
        };
        let err = extract_pcm(3, &wav_bytes(spec, &[0; 8])).unwrap_err();
        match err {
            PipelineError::Format {
                parameter,
                expected,
                actual,
                ..
            } => {
                assert_eq!(parameter, "sample_rate");
                assert_eq!(expected, 24_000);
                assert_eq!(actual, 44_100);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_container_with_stereo_is_rejected() {
        let spec = WavSpec {
            channels: 2,
            ..wav_spec()
        };
        let err = extract_pcm(0, &wav_bytes(spec, &[0; 8])).unwrap_err();
        assert!(err.to_string().contains("channels"));
    }

    #[test]
    fn test_raw_payload_is_taken_as_samples() {
        let raw = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80];
        assert_eq!(extract_pcm(0, &raw).unwrap(), vec![1, -1, i16::MIN]);
    }

    #[test]
    fn test_raw_payload_with_partial_frame_fails() {
        let err = extract_pcm(5, &[0x01, 0x00, 0x02]).unwrap_err();
        assert!(matches!(err, PipelineError::RawPcmLength { id: 5, len: 3, .. }));
    }

    #[test]
    fn test_write_then_read_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("07.wav");
        let frames = write_wav(&path, &vec![0i16; 2400]).unwrap();
        assert_eq!(frames, 2400);
        assert_eq!(wav_frames(&path).unwrap(), 2400);
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_existing_file_with_wrong_depth_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("01.wav");
        let spec = WavSpec {
            bits_per_sample: 8,
            ..wav_spec()
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i8).unwrap();
        writer.finalize().unwrap();
        let err = wav_frames(&path).unwrap_err();
        assert!(err.to_string().contains("bits_per_sample"));
        assert!(err.to_string().contains("01.wav"));
    }
}
