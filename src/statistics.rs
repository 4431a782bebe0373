#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("Cannot compute statistics of an empty sample buffer")]
    EmptyBuffer,
}

/// Per-channel reduction of one sample buffer.
///
/// All three values come from the same buffer, so
/// `rms_total² ≈ mean² + rms_ac²` holds up to floating-point error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    /// DC average
    pub mean: f64,
    pub rms_total: f64,
    /// RMS of the deviations from `mean`
    pub rms_ac: f64,
}

impl SampleStats {
    pub fn from_samples(samples: &[f64]) -> Result<Self, StatsError> {
        if samples.is_empty() {
            return Err(StatsError::EmptyBuffer);
        }
        let n = samples.len() as f64;

        let mean = samples.iter().sum::<f64>() / n;
        let mean_square = samples.iter().map(|v| v * v).sum::<f64>() / n;
        let ac_square = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Ok(Self {
            mean,
            rms_total: mean_square.sqrt(),
            rms_ac: ac_square.sqrt(),
        })
    }
}

/// One analog input and the buffer captured from it on the latest event.
#[derive(Debug, Clone)]
pub struct Channel {
    pub index: usize,
    samples: Vec<f64>,
    stats: Option<SampleStats>,
}

impl Channel {
    pub fn new(index: usize, sample_count: usize) -> Self {
        Self {
            index,
            samples: Vec::with_capacity(sample_count),
            stats: None,
        }
    }

    /// Replace the buffer with a fresh capture and recompute its statistics.
    pub fn load(&mut self, samples: Vec<f64>) -> Result<SampleStats, StatsError> {
        self.stats = None;
        self.samples = samples;
        let stats = SampleStats::from_samples(&self.samples)?;
        self.stats = Some(stats);
        Ok(stats)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn stats(&self) -> Option<SampleStats> {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() <= 1e-9 * scale, "{a} != {b}");
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        assert_eq!(SampleStats::from_samples(&[]), Err(StatsError::EmptyBuffer));
    }

    #[test]
    fn test_constant_buffer() {
        let stats = SampleStats::from_samples(&[-1.25; 8]).unwrap();
        assert_close(stats.mean, -1.25);
        assert_close(stats.rms_total, 1.25);
        assert_close(stats.rms_ac, 0.0);
    }

    #[test]
    fn test_alternating_buffer_has_no_dc() {
        let samples: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 3.3 } else { -3.3 }).collect();
        let stats = SampleStats::from_samples(&samples).unwrap();
        assert_close(stats.mean, 0.0);
        assert_close(stats.rms_ac, 3.3);
        assert_close(stats.rms_total, 3.3);
    }

    #[test]
    fn test_power_decomposition() {
        let buffers: [&[f64]; 4] = [
            &[2.5],
            &[0.1, 0.4, 2.2, -1.7, 3.9],
            &[5.0, 4.98, 5.01, 5.02, 4.99, 5.0],
            &[-0.002, 0.013, 0.0007, -0.0101],
        ];
        for samples in buffers {
            let stats = SampleStats::from_samples(samples).unwrap();
            assert_close(
                stats.rms_total.powi(2),
                stats.mean.powi(2) + stats.rms_ac.powi(2),
            );
        }
    }

    #[test]
    fn test_channel_overwrites_previous_capture() {
        let mut channel = Channel::new(1, 3);
        assert!(channel.stats().is_none());

        channel.load(vec![1.0, 1.0, 1.0]).unwrap();
        let stats = channel.load(vec![2.0, 4.0]).unwrap();
        assert_eq!(channel.samples(), &[2.0, 4.0]);
        assert_close(stats.mean, 3.0);
        assert_eq!(channel.stats(), Some(stats));

        assert!(channel.load(Vec::new()).is_err());
        assert!(channel.stats().is_none());
    }
}
