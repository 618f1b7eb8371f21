//! The set of partition names whose content is zeroed while imaging.
use crate::error::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Partitions that hold device-unique or security-sensitive state on
/// Qualcomm-based Windows phones (calibration, keys, UEFI variables and
/// their backups). These are zeroed unless a custom list is supplied.
pub const BUILTIN_EXCLUSIONS: &[&str] = &[
    "DPP",
    "MODEM_FSG",
    "MODEM_FS1",
    "MODEM_FS2",
    "MODEM_FSC",
    "DDR",
    "SEC",
    "APDP",
    "MSADP",
    "DPO",
    "SSD",
    "UEFI_BS_NV",
    "UEFI_NV",
    "UEFI_RT_NV",
    "UEFI_RT_NV_RPMB",
    "BOOTMODE",
    "LIMITS",
    "BACKUP_BS_NV",
    "BACKUP_SBL1",
    "BACKUP_SBL2",
    "BACKUP_SBL3",
    "BACKUP_PMIC",
    "BACKUP_DBI",
    "BACKUP_UEFI",
    "BACKUP_RPM",
    "BACKUP_QSEE",
    "BACKUP_QHEE",
    "BACKUP_TZ",
    "BACKUP_HYP",
    "BACKUP_WINSECAPP",
    "BACKUP_TZAPPS",
    "SVRawDump",
];

/// A case-insensitive set of partition names.
///
/// Names are stored lowercased; lookups lowercase the candidate the same way.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: HashSet<String>,
}

impl ExclusionSet {
    /// The built-in list, see [`BUILTIN_EXCLUSIONS`].
    pub fn builtin() -> Self {
        Self::from_names(BUILTIN_EXCLUSIONS.iter().copied())
    }

    /// A set that excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Parses a line-delimited list. Surrounding whitespace is trimmed;
    /// blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Self {
        Self::from_names(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Reads a list file. See [`ExclusionSet::parse`] for the format.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Loads `path` when given and readable, otherwise falls back to the
    /// built-in list.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("Using the built-in exclusion list");
            return Self::builtin();
        };

        match Self::from_file(path) {
            Ok(set) => {
                debug!(path = %path.display(), names = set.len(), "Loaded exclusion list");
                set
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Cannot read exclusion list, using the built-in one"
                );
                Self::builtin()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn builtin_matches_case_insensitively() {
        let set = ExclusionSet::builtin();

        assert_eq!(set.len(), BUILTIN_EXCLUSIONS.len());
        assert!(set.contains("MODEM_FSG"));
        assert!(set.contains("modem_fsg"));
        assert!(set.contains("SvRawDump"));
        assert!(!set.contains("MainOS"));
    }

    #[test]
    fn parse_skips_blank_and_comment_lines() {
        let set = ExclusionSet::parse("# secrets\n  DPP  \n\nuefi_nv\r\n");

        assert_eq!(set.len(), 2);
        assert!(set.contains("dpp"));
        assert!(set.contains("UEFI_NV"));
    }

    #[test]
    fn loads_list_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bogus_name").unwrap();

        let set = ExclusionSet::load_or_builtin(Some(file.path()));

        assert_eq!(set, ExclusionSet::from_names(["bogus_name"]));
    }

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");

        assert_eq!(
            ExclusionSet::load_or_builtin(Some(&missing)),
            ExclusionSet::builtin()
        );
        assert_eq!(ExclusionSet::load_or_builtin(None), ExclusionSet::builtin());
    }
}
