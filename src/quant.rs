//! Affine group-wise weight quantization.
//!
//! Quantized checkpoints store each linear weight as packed unsigned
//! integers (`32 / bits` elements per `u32` word, least-significant bits
//! first) together with per-group `scales` and `biases` tensors, so that
//! `w = scale * q + bias` within each group of `group_size` elements along
//! a row. The loader reconstructs full-precision weights at load time.

use candle_core::{DType, Tensor};

use crate::config::QuantizationConfig;

/// Reconstruct a full-precision weight matrix from packed quantized data.
pub fn dequantize(
    packed: &Tensor,
    scales: &Tensor,
    biases: &Tensor,
    config: &QuantizationConfig,
) -> crate::Result<Tensor> {
    let per_word = elements_per_word(config.bits)?;
    let (rows, packed_cols) = packed.dims2()?;
    let cols = packed_cols * per_word;
    if cols % config.group_size != 0 {
        return Err(crate::Error::Quantization(format!(
            "row length {cols} is not a multiple of group size {}",
            config.group_size
        )));
    }
    let groups_per_row = cols / config.group_size;

    let words: Vec<u32> = packed.flatten_all()?.to_vec1()?;
    let scales: Vec<f32> = scales.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    let biases: Vec<f32> = biases.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    let mask = (1u32 << config.bits) - 1;

    let mut output = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let word = words[row * packed_cols + col / per_word];
            let q = (word >> ((col % per_word) as u32 * config.bits)) & mask;
            let group = row * groups_per_row + col / config.group_size;
            output.push(scales[group] * q as f32 + biases[group]);
        }
    }

    Tensor::from_vec(output, (rows, cols), packed.device()).map_err(Into::into)
}

/// Quantize a full-precision weight matrix into packed form.
///
/// Returns `(packed, scales, biases)` suitable for [`dequantize`].
pub fn quantize(
    weight: &Tensor,
    config: &QuantizationConfig,
) -> crate::Result<(Tensor, Tensor, Tensor)> {
    let per_word = elements_per_word(config.bits)?;
    let (rows, cols) = weight.dims2()?;
    if cols % config.group_size != 0 {
        return Err(crate::Error::Quantization(format!(
            "row length {cols} is not a multiple of group size {}",
            config.group_size
        )));
    }
    if config.group_size % per_word != 0 {
        return Err(crate::Error::Quantization(format!(
            "group size {} does not pack into whole {}-bit words",
            config.group_size, config.bits
        )));
    }

    let data: Vec<f32> = weight.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    let levels = ((1u32 << config.bits) - 1) as f32;
    let groups_per_row = cols / config.group_size;

    let mut words = Vec::with_capacity(rows * cols / per_word);
    let mut scales = Vec::with_capacity(rows * groups_per_row);
    let mut biases = Vec::with_capacity(rows * groups_per_row);

    for group in data.chunks(config.group_size) {
        let min = group.iter().copied().fold(f32::INFINITY, f32::min);
        let max = group.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        // a constant group still needs a usable scale
        let scale = ((max - min) / levels).max(1e-10);
        scales.push(scale);
        biases.push(min);

        for chunk in group.chunks(per_word) {
            let mut word = 0u32;
            for (i, &value) in chunk.iter().enumerate() {
                let q = ((value - min) / scale).round().clamp(0.0, levels) as u32;
                word |= q << (i as u32 * config.bits);
            }
            words.push(word);
        }
    }

    let packed = Tensor::from_vec(words, (rows, cols / per_word), weight.device())?;
    let scales = Tensor::from_vec(scales, (rows, groups_per_row), weight.device())?;
    let biases = Tensor::from_vec(biases, (rows, groups_per_row), weight.device())?;
    Ok((packed, scales, biases))
}

fn elements_per_word(bits: u32) -> crate::Result<usize> {
    match bits {
        2 | 4 | 8 => Ok((32 / bits) as usize),
        other => Err(crate::Error::Quantization(format!(
            "unsupported bit width: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn config(group_size: usize, bits: u32) -> QuantizationConfig {
        QuantizationConfig { group_size, bits }
    }

    #[test]
    fn test_4bit_roundtrip() {
        let data: Vec<f32> = (0..64).map(|i| (i as f32) / 10.0 - 3.0).collect();
        let weight = Tensor::from_vec(data.clone(), (4, 16), &Device::Cpu).unwrap();

        let cfg = config(16, 4);
        let (packed, scales, biases) = quantize(&weight, &cfg).unwrap();
        assert_eq!(packed.dims(), &[4, 2]);
        assert_eq!(scales.dims(), &[4, 1]);

        let restored = dequantize(&packed, &scales, &biases, &cfg).unwrap();
        assert_eq!(restored.dims(), weight.dims());

        let restored: Vec<f32> = restored.flatten_all().unwrap().to_vec1().unwrap();
        for (orig, rest) in data.iter().zip(restored.iter()) {
            // 4-bit over a 1.5-wide group: half a step is ~0.05
            assert!((orig - rest).abs() < 0.06, "{orig} vs {rest}");
        }
    }

    #[test]
    fn test_8bit_is_tighter_than_4bit() {
        let data: Vec<f32> = (0..32).map(|i| ((i * 7) % 13) as f32 * 0.3 - 1.7).collect();
        let weight = Tensor::from_vec(data.clone(), (2, 16), &Device::Cpu).unwrap();

        let err = |bits: u32| -> f32 {
            let cfg = config(16, bits);
            let (p, s, b) = quantize(&weight, &cfg).unwrap();
            let restored: Vec<f32> = dequantize(&p, &s, &b, &cfg)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();
            data.iter()
                .zip(restored.iter())
                .map(|(a, r)| (a - r).abs())
                .fold(0.0, f32::max)
        };

        assert!(err(8) <= err(4));
        assert!(err(8) < 0.01);
    }

    #[test]
    fn test_exact_levels_survive() {
        // values sitting exactly on the quantization grid come back unchanged
        let data = vec![0.0f32, 1.0, 2.0, 3.0];
        let weight = Tensor::from_vec(data.clone(), (1, 4), &Device::Cpu).unwrap();

        let cfg = config(4, 4);
        let (p, s, b) = quantize(&weight, &cfg).unwrap();
        let restored: Vec<f32> = dequantize(&p, &s, &b, &cfg)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for (orig, rest) in data.iter().zip(restored.iter()) {
            assert!((orig - rest).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let weight = Tensor::zeros((2, 10), DType::F32, &Device::Cpu).unwrap();
        assert!(quantize(&weight, &config(16, 4)).is_err());
    }
}
