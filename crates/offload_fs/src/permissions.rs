// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use core::str::FromStr;

use crate::error::Error;

const LETTERS: [u8; 3] = *b"rwx";

/// A set of POSIX permission bits for owner, group, and others.
///
/// Parsed from the nine-character `rwxrwxrwx` notation, where each position is
/// either the expected letter or `-`:
///
/// ```
/// use offload_fs::PermissionSet;
///
/// let perms: PermissionSet = "rwxr-x---".parse()?;
/// assert_eq!(perms.mode(), 0o750);
/// assert_eq!(perms.to_string(), "rwxr-x---");
/// # Ok::<(), offload_fs::Error>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PermissionSet {
    mode: u32,
}

impl PermissionSet {
    /// Creates a permission set from the low nine bits of a numeric mode.
    ///
    /// Bits above `0o777` (setuid, setgid, sticky, file type) are discarded.
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        Self { mode: mode & 0o777 }
    }

    /// Returns the permission bits as a numeric mode in the range `0..=0o777`.
    #[must_use]
    pub const fn mode(self) -> u32 {
        self.mode
    }

    pub(crate) fn parse_optional(perms: Option<&str>) -> Result<Option<Self>, Error> {
        perms.map(str::parse).transpose()
    }
}

impl FromStr for PermissionSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 9 {
            return Err(Error::invalid_argument(format!(
                "permission string must have nine characters, got {s:?}"
            )));
        }

        let mut mode = 0;
        for (i, &c) in bytes.iter().enumerate() {
            mode <<= 1;
            if c == LETTERS[i % 3] {
                mode |= 1;
            } else if c != b'-' {
                return Err(Error::invalid_argument(format!("invalid permission string {s:?}")));
            }
        }

        Ok(Self { mode })
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..9 {
            let bit = 1 << (8 - i);
            let c = if self.mode & bit == 0 { '-' } else { char::from(LETTERS[i % 3]) };
            fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::error::ErrorKind;

    #[rstest]
    #[case("rwxrwxrwx", 0o777)]
    #[case("---------", 0o000)]
    #[case("rw-r--r--", 0o644)]
    #[case("rwxr-x---", 0o750)]
    #[case("r--------", 0o400)]
    #[case("--------x", 0o001)]
    fn parses_valid_strings(#[case] input: &str, #[case] mode: u32) {
        let perms: PermissionSet = input.parse().unwrap();
        assert_eq!(perms.mode(), mode);
        assert_eq!(perms.to_string(), input);
    }

    #[rstest]
    #[case("")]
    #[case("rwx")]
    #[case("rwxrwxrwxr")]
    #[case("xwrxwrxwr")]
    #[case("rwxrwxrw?")]
    #[case("755")]
    fn rejects_malformed_strings(#[case] input: &str) {
        let err = input.parse::<PermissionSet>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn from_mode_discards_high_bits() {
        assert_eq!(PermissionSet::from_mode(0o104_755).mode(), 0o755);
    }

    #[test]
    fn parse_optional_passes_none_through() {
        assert_eq!(PermissionSet::parse_optional(None).unwrap(), None);
        assert_eq!(
            PermissionSet::parse_optional(Some("rw-------")).unwrap(),
            Some(PermissionSet::from_mode(0o600))
        );
    }
}
