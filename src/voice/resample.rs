//! Sample rate conversion using rubato

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample mono audio from `from_rate` to `to_rate`
///
/// The final partial chunk is zero padded and the resampler delay is trimmed,
/// so the output length is `len * to_rate / from_rate`.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )
    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round()
        as usize;
    let delay = resampler.output_delay();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    let mut feed = |chunk: Vec<f64>, output: &mut Vec<f64>| -> Result<()> {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
        Ok(())
    };

    for chunk in input.chunks(CHUNK_SIZE) {
        let mut block = chunk.to_vec();
        block.resize(CHUNK_SIZE, 0.0);
        feed(block, &mut output)?;
    }

    // flush the resampler delay
    while output.len() < delay + expected {
        feed(vec![0.0; CHUNK_SIZE], &mut output)?;
    }

    Ok(output[delay..delay + expected]
        .iter()
        .map(|&s| s as f32)
        .collect())
}
