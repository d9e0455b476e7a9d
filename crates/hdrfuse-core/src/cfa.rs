//! Color filter array descriptors
//!
//! Bayer patterns are stored in the packed dcraw convention: a 32-bit
//! word holding one 2-bit color code per cell of the (periodically
//! repeated) pattern, so the color at any pixel is a couple of shifts
//! away. The lookup is on the hot path of the merger, the demosaicer
//! and the patch sampler.

use std::fmt;

/// Index of the red channel.
pub const RED: usize = 0;
/// Index of the green channel.
pub const GREEN: usize = 1;
/// Index of the blue channel.
pub const BLUE: usize = 2;

/// Packed 2x2 Bayer pattern descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfaPattern {
    filter: u32,
    name: &'static str,
}

impl CfaPattern {
    /// Build a pattern from its row-major name ("RGGB", "BGGR", "GRBG" or "GBRG").
    ///
    /// Anything else (X-Trans, monochrome, subsampled layouts) is rejected.
    pub fn from_name(name: &str) -> Result<Self, String> {
        let (filter, name) = match name.to_uppercase().as_str() {
            "RGGB" => (0x94949494, "RGGB"),
            "BGGR" => (0x16161616, "BGGR"),
            "GRBG" => (0x61616161, "GRBG"),
            "GBRG" => (0x49494949, "GBRG"),
            _ => {
                return Err(format!(
                    "Unsupported color filter array pattern: {} (expected a 2x2 Bayer layout)",
                    name
                ))
            }
        };
        Ok(Self { filter, name })
    }

    /// Color recorded at pixel (x, y): 0 = red, 1 = green, 2 = blue.
    #[inline(always)]
    pub fn fc(&self, x: usize, y: usize) -> usize {
        ((self.filter >> ((((y << 1) & 14) + (x & 1)) << 1)) & 3) as usize
    }

    /// Row-major pattern name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for CfaPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rggb_layout() {
        let cfa = CfaPattern::from_name("RGGB").unwrap();
        assert_eq!(cfa.fc(0, 0), RED);
        assert_eq!(cfa.fc(1, 0), GREEN);
        assert_eq!(cfa.fc(0, 1), GREEN);
        assert_eq!(cfa.fc(1, 1), BLUE);
        // 2-periodic in both axes
        assert_eq!(cfa.fc(2, 2), RED);
        assert_eq!(cfa.fc(3, 3), BLUE);
        assert_eq!(cfa.fc(17, 4), GREEN);
    }

    #[test]
    fn test_all_bayer_layouts() {
        for (name, expected) in [
            ("RGGB", [RED, GREEN, GREEN, BLUE]),
            ("BGGR", [BLUE, GREEN, GREEN, RED]),
            ("GRBG", [GREEN, RED, BLUE, GREEN]),
            ("GBRG", [GREEN, BLUE, RED, GREEN]),
        ] {
            let cfa = CfaPattern::from_name(name).unwrap();
            assert_eq!(cfa.fc(0, 0), expected[0], "{} at (0,0)", name);
            assert_eq!(cfa.fc(1, 0), expected[1], "{} at (1,0)", name);
            assert_eq!(cfa.fc(0, 1), expected[2], "{} at (0,1)", name);
            assert_eq!(cfa.fc(1, 1), expected[3], "{} at (1,1)", name);
        }
    }

    #[test]
    fn test_greens_on_diagonal() {
        // Every Bayer layout has exactly two greens per 2x2 cell, on a diagonal
        for name in ["RGGB", "BGGR", "GRBG", "GBRG"] {
            let cfa = CfaPattern::from_name(name).unwrap();
            let greens = (0..2)
                .flat_map(|y| (0..2).map(move |x| (x, y)))
                .filter(|&(x, y)| cfa.fc(x, y) == GREEN)
                .count();
            assert_eq!(greens, 2, "{} should have two green sites", name);
        }
    }

    #[test]
    fn test_case_insensitive_and_invalid() {
        assert!(CfaPattern::from_name("rggb").is_ok());
        assert!(CfaPattern::from_name("XTRANS").is_err());
        assert!(CfaPattern::from_name("").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for name in ["RGGB", "BGGR", "GRBG", "GBRG"] {
            let cfa = CfaPattern::from_name(name).unwrap();
            assert_eq!(cfa.to_string(), name);
        }
    }
}
