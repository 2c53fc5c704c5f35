use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};

/// Helper that wraps the `rustfft` planner for reuse across bins.
pub struct FftHelper {
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex64::zero(); fft.get_inplace_scratch_len()];
        Self { fft, scratch }
    }

    pub fn len(&self) -> usize {
        self.fft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fft.len() == 0
    }

    /// Forward transform of a real segment, zero-padded or truncated to the plan size.
    pub fn forward(&mut self, input: &[f64]) -> Vec<Complex64> {
        let buffer: Vec<Complex64> = input
            .iter()
            .map(|&value| Complex64::new(value, 0.0))
            .collect();
        self.forward_complex(buffer)
    }

    pub fn forward_complex(&mut self, mut buffer: Vec<Complex64>) -> Vec<Complex64> {
        buffer.resize(self.fft.len(), Complex64::zero());
        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fft_helper_returns_same_length() {
        let mut helper = FftHelper::new(4);
        let output = helper.forward(&[1.0, 0.0, -1.0, 0.0]);
        assert_eq!(output.len(), 4);
        assert!(output[0].norm() < 1e-12);
        assert!((output[1].re - 2.0).abs() < 1e-12);
    }
}
