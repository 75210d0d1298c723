//! Traffic Obfuscator (C8, §4.7): bucketed padding, jitter, and
//! decoy cover traffic, each independently toggleable and none of which may
//! change delivery semantics or intra-class ordering — this module only
//! transforms bytes and timing around a frame already chosen by C7, it never
//! reorders or drops one.

use rand::Rng;

use crate::config::ObfuscatorConfig;

pub struct Obfuscator {
    config: ObfuscatorConfig,
}

impl Obfuscator {
    pub fn new(config: ObfuscatorConfig) -> Self {
        Self { config }
    }

    /// Pads `frame` up to the smallest configured bucket that fits it. A
    /// frame larger than every bucket is left unpadded (bucketing caps
    /// overhead, it doesn't cap message size).
    pub fn pad(&self, mut frame: Vec<u8>) -> Vec<u8> {
        if !self.config.padding_enabled {
            return frame;
        }
        if let Some(&bucket) = self
            .config
            .padding_buckets
            .iter()
            .filter(|&&b| b >= frame.len())
            .min()
        {
            frame.resize(bucket, 0);
        }
        frame
    }

    /// Jitter delay to apply before transmit, in `[0, max_jitter_ms]`.
    /// `None` when disabled — callers skip the delay entirely rather than
    /// sleeping zero, keeping fast paths measurable in tests.
    pub fn jitter_delay_ms(&self) -> Option<u64> {
        if !self.config.jitter_enabled || self.config.max_jitter_ms == 0 {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..=self.config.max_jitter_ms))
    }

    /// Whether a decoy frame should be emitted this tick, given the
    /// configured `decoy_rate` (frames per second) and the elapsed time
    /// since the last real or decoy frame.
    pub fn should_emit_decoy(&self, idle_secs: f64) -> bool {
        if !self.config.decoy_enabled || self.config.decoy_rate <= 0.0 {
            return false;
        }
        let expected_interval = 1.0 / self.config.decoy_rate;
        idle_secs >= expected_interval
    }

    /// A decoy frame padded identically to real traffic, indistinguishable
    /// in size from a real frame of the smallest bucket.
    pub fn decoy_frame(&self) -> Vec<u8> {
        let size = self.config.padding_buckets.iter().min().copied().unwrap_or(256);
        let mut payload = vec![0u8; size];
        rand::thread_rng().fill(payload.as_mut_slice());
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> ObfuscatorConfig {
        ObfuscatorConfig {
            padding_enabled: true,
            padding_buckets: vec![256, 512, 1024],
            jitter_enabled: true,
            max_jitter_ms: 100,
            decoy_enabled: true,
            decoy_rate: 1.0,
        }
    }

    #[test]
    fn padding_rounds_up_to_the_smallest_fitting_bucket() {
        let obf = Obfuscator::new(enabled_config());
        assert_eq!(obf.pad(vec![0u8; 100]).len(), 256);
        assert_eq!(obf.pad(vec![0u8; 300]).len(), 512);
    }

    #[test]
    fn padding_disabled_leaves_the_frame_untouched() {
        let mut config = enabled_config();
        config.padding_enabled = false;
        let obf = Obfuscator::new(config);
        assert_eq!(obf.pad(vec![0u8; 100]).len(), 100);
    }

    #[test]
    fn oversized_frame_is_left_unpadded() {
        let obf = Obfuscator::new(enabled_config());
        assert_eq!(obf.pad(vec![0u8; 2000]).len(), 2000);
    }

    #[test]
    fn jitter_disabled_yields_no_delay() {
        let mut config = enabled_config();
        config.jitter_enabled = false;
        let obf = Obfuscator::new(config);
        assert!(obf.jitter_delay_ms().is_none());
    }

    #[test]
    fn jitter_enabled_stays_within_bound() {
        let obf = Obfuscator::new(enabled_config());
        for _ in 0..20 {
            let delay = obf.jitter_delay_ms().unwrap();
            assert!(delay <= 100);
        }
    }

    #[test]
    fn decoys_fire_only_once_idle_exceeds_the_configured_rate() {
        let obf = Obfuscator::new(enabled_config());
        assert!(!obf.should_emit_decoy(0.5));
        assert!(obf.should_emit_decoy(1.5));
    }

    #[test]
    fn decoys_disabled_never_fire() {
        let mut config = enabled_config();
        config.decoy_enabled = false;
        let obf = Obfuscator::new(config);
        assert!(!obf.should_emit_decoy(100.0));
    }
}
