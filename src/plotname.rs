//! Plot filename parsing/formatting per spec.md §6:
//! POC1 = `{key}_{startNonce}_{nonces}_{stagger}`, POC2 drops `stagger`.

use crate::error::PlotError;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotName {
    pub key: u64,
    pub start_nonce: u64,
    pub nonces: u32,
    /// `0` means POC2.
    pub stagger: u32,
}

impl PlotName {
    pub fn is_poc2(&self) -> bool {
        crate::geometry::is_poc2(self.nonces, self.stagger)
    }

    pub fn file_size(&self) -> u64 {
        crate::geometry::nonces_to_bytes(self.nonces)
    }

    /// Canonical on-disk filename: POC2 drops the stagger field entirely,
    /// even when constructed from a POC1 name with `nonces == stagger`.
    pub fn canonical_name(&self) -> String {
        if self.stagger == 0 {
            format!("{}_{}_{}", self.key, self.start_nonce, self.nonces)
        } else {
            format!(
                "{}_{}_{}_{}",
                self.key, self.start_nonce, self.nonces, self.stagger
            )
        }
    }

    /// Parses a bare filename (no directory component) matching the
    /// POC1/POC2 regex: four or three underscore-separated unsigned
    /// decimal integers.
    pub fn parse(name: &str) -> Result<PlotName, PlotError> {
        let parts: Vec<&str> = name.split('_').collect();
        let parsed = match parts.as_slice() {
            [key, start_nonce, nonces, stagger] => PlotName {
                key: parse_u64(key, name)?,
                start_nonce: parse_u64(start_nonce, name)?,
                nonces: parse_u32(nonces, name)?,
                stagger: parse_u32(stagger, name)?,
            },
            [key, start_nonce, nonces] => PlotName {
                key: parse_u64(key, name)?,
                start_nonce: parse_u64(start_nonce, name)?,
                nonces: parse_u32(nonces, name)?,
                stagger: 0,
            },
            _ => {
                return Err(PlotError::Format(format!(
                    "invalid plot filename: {name}"
                )))
            }
        };
        if parsed.stagger != 0 && parsed.nonces % parsed.stagger != 0 {
            return Err(PlotError::Format(format!(
                "{name}: stagger {} does not divide nonces {}",
                parsed.stagger, parsed.nonces
            )));
        }
        Ok(parsed)
    }

    /// Parses the basename of a path, per spec.md §6 (directory inputs are
    /// enumerated, then each basename is matched against the plot regex).
    pub fn parse_path(path: &Path) -> Result<PlotName, PlotError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PlotError::Format(format!("not a valid filename: {}", path.display())))?;
        Self::parse(name)
    }
}

fn parse_u64(s: &str, whole: &str) -> Result<u64, PlotError> {
    s.parse()
        .map_err(|_| PlotError::Format(format!("invalid integer field in {whole}: {s}")))
}

fn parse_u32(s: &str, whole: &str) -> Result<u32, PlotError> {
    s.parse()
        .map_err(|_| PlotError::Format(format!("invalid integer field in {whole}: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_poc1() {
        let p = PlotName::parse("1_0_100_100").unwrap();
        assert_eq!(
            p,
            PlotName {
                key: 1,
                start_nonce: 0,
                nonces: 100,
                stagger: 100
            }
        );
        assert!(p.is_poc2());
    }

    #[test]
    fn parses_poc2() {
        let p = PlotName::parse("1_0_4096").unwrap();
        assert_eq!(p.stagger, 0);
        assert!(p.is_poc2());
        assert_eq!(p.canonical_name(), "1_0_4096");
    }

    #[test]
    fn rejects_bad_stagger() {
        assert!(PlotName::parse("1_0_100_30").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(PlotName::parse("not_a_plot").is_err());
        assert!(PlotName::parse("1_2_3_4_5").is_err());
    }
}
