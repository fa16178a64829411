//! Verification code generation.

use rand::{rngs::OsRng, Rng};

/// Length of a generated code unless configured otherwise
pub const DEFAULT_CODE_LENGTH: u32 = 4;

/// Longest code that still fits a `u64` with room for the upper bound
pub const MAX_CODE_LENGTH: u32 = 18;

/// Generates a random decimal code of exactly `length` digits.
///
/// The value is drawn uniformly from `[10^(length-1), 10^length)` using the
/// operating system's CSPRNG, so it never has a leading zero. `length` is
/// clamped to `1..=MAX_CODE_LENGTH`.
pub fn generate(length: u32) -> String {
    let length = length.clamp(1, MAX_CODE_LENGTH);
    let low = 10u64.pow(length - 1);
    let high = 10u64.pow(length);
    OsRng.gen_range(low..high).to_string()
}

/// Issues codes for new verification records.
///
/// When a master code is configured it is issued instead of a random one and
/// always passes verification.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: u32,
    master_code: Option<String>,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH, None)
    }
}

impl CodeGenerator {
    pub fn new(length: u32, master_code: Option<String>) -> Self {
        Self {
            length,
            master_code,
        }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn next_code(&self) -> String {
        match &self.master_code {
            Some(code) => code.clone(),
            None => generate(self.length),
        }
    }

    pub fn is_master_code(&self, code: &str) -> bool {
        self.master_code.as_deref() == Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pearson's chi-squared statistic against a uniform expectation.
    fn chi_squared(counts: &[u32], samples: u32) -> f64 {
        let expected = samples as f64 / counts.len() as f64;
        counts
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum()
    }

    #[test]
    fn test_generate_has_exact_length() {
        for length in 1..=MAX_CODE_LENGTH {
            for _ in 0..50 {
                let code = generate(length);
                assert_eq!(code.len(), length as usize, "code {}", code);
                assert!(code.chars().all(|c| c.is_ascii_digit()));
                assert!(!code.starts_with('0'));
            }
        }
    }

    #[test]
    fn test_generate_four_digits_in_range() {
        for _ in 0..1_000 {
            let value: u32 = generate(4).parse().unwrap();
            assert!((1000..=9999).contains(&value));
        }
    }

    #[test]
    fn test_generate_is_uniform() {
        const SAMPLES: u32 = 45_000;
        let mut leading = [0u32; 9];
        let mut trailing = [0u32; 10];

        for _ in 0..SAMPLES {
            let code = generate(4);
            let digits: Vec<usize> = code
                .bytes()
                .map(|b| (b - b'0') as usize)
                .collect();
            leading[digits[0] - 1] += 1;
            trailing[digits[3]] += 1;
        }

        // Critical values at p = 0.001 for 8 and 9 degrees of freedom.
        assert!(chi_squared(&leading, SAMPLES) < 26.12, "{:?}", leading);
        assert!(chi_squared(&trailing, SAMPLES) < 27.88, "{:?}", trailing);
    }

    #[test]
    fn test_generate_clamps_length() {
        assert_eq!(generate(0).len(), 1);
        assert_eq!(generate(40).len(), MAX_CODE_LENGTH as usize);
    }

    #[test]
    fn test_master_code_overrides_generation() {
        let generator = CodeGenerator::new(4, Some("4242".to_string()));
        assert_eq!(generator.next_code(), "4242");
        assert!(generator.is_master_code("4242"));
        assert!(!generator.is_master_code("4243"));
    }

    #[test]
    fn test_default_generator() {
        let generator = CodeGenerator::default();
        assert_eq!(generator.length(), DEFAULT_CODE_LENGTH);
        assert_eq!(generator.next_code().len(), 4);
        assert!(!generator.is_master_code("1234"));
    }
}
