//! Parsing of `security` keychain listings.

use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

/// Parses the output of `security default-keychain` or
/// `security list-keychains`: one quoted path per line.
pub fn parse_keychain_list(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .map(|line| line.trim_matches('"'))
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// First keychain in a `security default-keychain` listing.
pub fn parse_default_keychain(output: &str) -> Option<PathBuf> {
    parse_keychain_list(output).into_iter().next()
}

/// Normalised form used for comparisons: absolute, and without the `-db`
/// suffix macOS appends to keychain files on disk.
fn normalise(path: &Path) -> String {
    let absolute = path
        .absolutize()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string_lossy().into_owned());
    absolute
        .strip_suffix("-db")
        .map(str::to_string)
        .unwrap_or(absolute)
}

/// Whether two keychain paths name the same keychain.
pub fn same_keychain(a: &Path, b: &Path) -> bool {
    normalise(a) == normalise(b)
}

/// Whether `list` already contains `keychain`.
pub fn contains_keychain(list: &[PathBuf], keychain: &Path) -> bool {
    list.iter().any(|entry| same_keychain(entry, keychain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_listing() {
        let output = "    \"/Users/ci/Library/Keychains/login.keychain-db\"\n    \"/Library/Keychains/System.keychain\"\n";
        let list = parse_keychain_list(output);
        assert_eq!(
            list,
            vec![
                PathBuf::from("/Users/ci/Library/Keychains/login.keychain-db"),
                PathBuf::from("/Library/Keychains/System.keychain"),
            ]
        );
    }

    #[test]
    fn default_keychain_is_first_entry() {
        assert_eq!(
            parse_default_keychain("  \"/tmp/a.keychain\"\n"),
            Some(PathBuf::from("/tmp/a.keychain"))
        );
        assert_eq!(parse_default_keychain("\n"), None);
    }

    #[test]
    fn db_suffix_is_ignored_when_comparing() {
        assert!(same_keychain(
            Path::new("/Users/ci/Library/Keychains/build.keychain-db"),
            Path::new("/Users/ci/Library/Keychains/build.keychain"),
        ));
        assert!(!same_keychain(
            Path::new("/Users/ci/Library/Keychains/login.keychain-db"),
            Path::new("/Users/ci/Library/Keychains/build.keychain"),
        ));
    }

    #[test]
    fn contains_uses_normalised_paths() {
        let list = parse_keychain_list("\"/k/login.keychain-db\"\n\"/k/build.keychain-db\"\n");
        assert!(contains_keychain(&list, Path::new("/k/build.keychain")));
        assert!(!contains_keychain(&list, Path::new("/k/other.keychain")));
    }
}
