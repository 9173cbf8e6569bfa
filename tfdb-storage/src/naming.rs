use nom::bytes::complete::{tag, take_till1};
use nom::IResult;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maps `(chunk-start-number, version)` to a filename and back. Every chunk
/// database is parameterized by one of these.
///
/// `versioned()` is the `chunk-` pattern real databases use on disk.
/// `prefix_only()` is the same `{prefix}{start}.{version}` format under a
/// caller-chosen prefix, used by simple tests and early databases that
/// don't care about the `chunk-` convention.
#[derive(Debug, Clone)]
pub struct FileNamingStrategy {
    prefix: String,
}

impl FileNamingStrategy {
    pub fn versioned() -> Self {
        Self {
            prefix: "chunk-".to_string(),
        }
    }

    pub fn prefix_only(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn filename_for(&self, start: usize, version: usize) -> String {
        format!("{}{:06}.{:06}", self.prefix, start, version)
    }

    pub fn parse(&self, filename: &str) -> Option<(usize, usize)> {
        match parse_chunk_filename(&self.prefix, filename) {
            Ok((rest, info)) if rest.is_empty() => Some(info),
            _ => None,
        }
    }

    /// Every `(start, version, path)` triple for chunk files found directly
    /// under `dir`. Filenames that don't parse under this strategy (transient
    /// files, files from another naming scheme, unrelated files) are skipped.
    pub fn enumerate_all(&self, dir: &Path) -> io::Result<Vec<(usize, usize, PathBuf)>> {
        let mut out = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            if let Some((start, version)) = self.parse(&filename) {
                out.push((start, version, entry.path()));
            }
        }

        Ok(out)
    }

    /// Every `(version, path)` pair on disk for a single chunk start.
    pub fn all_versions_of(&self, dir: &Path, start: usize) -> io::Result<Vec<(usize, PathBuf)>> {
        Ok(self
            .enumerate_all(dir)?
            .into_iter()
            .filter(|(s, _, _)| *s == start)
            .map(|(_, version, path)| (version, path))
            .collect())
    }

    /// The highest-version file present for each chunk start found on disk.
    pub fn latest_for_each_start(
        &self,
        dir: &Path,
    ) -> io::Result<BTreeMap<usize, (usize, PathBuf)>> {
        let mut out: BTreeMap<usize, (usize, PathBuf)> = BTreeMap::new();

        for (start, version, path) in self.enumerate_all(dir)? {
            match out.get(&start) {
                Some((kept_version, _)) if *kept_version >= version => {}
                _ => {
                    out.insert(start, (version, path));
                }
            }
        }

        Ok(out)
    }
}

fn parse_chunk_filename<'a>(prefix: &str, input: &'a str) -> IResult<&'a str, (usize, usize)> {
    let (input, _) = tag(prefix)(input)?;
    let (input, start_str) = take_till1(|c: char| !c.is_ascii_digit())(input)?;

    let start = start_str.parse::<usize>().map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(start_str, nom::error::ErrorKind::Verify))
    })?;

    let (input, _) = tag(".")(input)?;
    let (input, version_str) = take_till1(|c: char| !c.is_ascii_digit())(input)?;

    let version = version_str.parse::<usize>().map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(version_str, nom::error::ErrorKind::Verify))
    })?;

    Ok((input, (start, version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_testdir::TempDir;

    #[test]
    fn parses_versioned_filenames() {
        let naming = FileNamingStrategy::versioned();
        assert_eq!(naming.parse("chunk-000004.000002"), Some((4, 2)));
        assert_eq!(naming.parse("foo"), None);
        assert_eq!(naming.parse("bla"), None);
        assert_eq!(naming.parse("chunk-000005.000000.scavenge.tmp"), None);
    }

    #[test]
    fn filename_roundtrips() {
        let naming = FileNamingStrategy::versioned();
        let name = naming.filename_for(3, 7);
        assert_eq!(name, "chunk-000003.000007");
        assert_eq!(naming.parse(&name), Some((3, 7)));
    }

    #[test]
    fn prefix_only_parses_its_own_pattern_and_ignores_other_prefixes() {
        let naming = FileNamingStrategy::prefix_only("prefix.tf-");
        assert_eq!(naming.parse("prefix.tf-000000.000000"), Some((0, 0)));
        assert_eq!(naming.parse("chunk-000000.000000"), None);
    }

    #[test]
    fn enumerate_all_finds_only_files_matching_this_strategy() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        std::fs::write(dir.join(naming.filename_for(0, 0)), []).unwrap();
        std::fs::write(dir.join(naming.filename_for(0, 1)), []).unwrap();
        std::fs::write(dir.join(naming.filename_for(1, 0)), []).unwrap();
        std::fs::write(dir.join("unrelated.tmp"), []).unwrap();

        let mut found = naming.enumerate_all(&dir).unwrap();
        found.sort();
        assert_eq!(found.len(), 3);
        assert_eq!((found[0].0, found[0].1), (0, 0));
        assert_eq!((found[1].0, found[1].1), (0, 1));
        assert_eq!((found[2].0, found[2].1), (1, 0));
    }

    #[test]
    fn all_versions_of_filters_down_to_one_start() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        std::fs::write(dir.join(naming.filename_for(0, 0)), []).unwrap();
        std::fs::write(dir.join(naming.filename_for(0, 1)), []).unwrap();
        std::fs::write(dir.join(naming.filename_for(1, 0)), []).unwrap();

        let versions = naming.all_versions_of(&dir, 0).unwrap();
        let mut versions: Vec<usize> = versions.into_iter().map(|(v, _)| v).collect();
        versions.sort();
        assert_eq!(versions, vec![0, 1]);
    }

    #[test]
    fn latest_for_each_start_keeps_the_highest_version() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        std::fs::write(dir.join(naming.filename_for(0, 0)), []).unwrap();
        std::fs::write(dir.join(naming.filename_for(0, 2)), []).unwrap();
        std::fs::write(dir.join(naming.filename_for(1, 0)), []).unwrap();

        let latest = naming.latest_for_each_start(&dir).unwrap();
        assert_eq!(latest.get(&0).map(|(v, _)| *v), Some(2));
        assert_eq!(latest.get(&1).map(|(v, _)| *v), Some(0));
    }
}
