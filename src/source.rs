//! Migration sources: where SQL bodies come from.
//!
//! A [`MigrationSource`] presents a flat, named collection of migration
//! bodies. Only entries whose names end in `.sql` participate in a run; the
//! entry's version is its name with that suffix stripped. Versions are sorted
//! lexicographically, so migration files should carry a fixed-width numeric
//! prefix (`0001_create_users.sql`, `0002_add_email.sql`, ...).

use std::fs;
use std::path::PathBuf;

use crate::error::Error;

/// Suffix that marks a source entry as a migration file.
pub(crate) const SQL_SUFFIX: &str = ".sql";

/// A flat, named collection of migration bodies.
///
/// Implementations need no ordering guarantees; the engine sorts derived
/// versions itself. Subdirectories (or any notion of hierarchy) do not
/// participate: only the flat name list matters.
pub trait MigrationSource {
    /// All entry names in the source, in no particular order.
    fn names(&self) -> Result<Vec<String>, Error>;

    /// The raw SQL body for a previously listed entry.
    fn body(&self, name: &str) -> Result<String, Error>;
}

/// A migration source backed by a filesystem directory.
///
/// Non-recursive: subdirectories are skipped entirely. File names that are
/// not valid UTF-8 are skipped as well, since they cannot form a version
/// string.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for DirSource {
    fn names(&self) -> Result<Vec<String>, Error> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::Source {
            name: self.dir.display().to_string(),
            message: e.to_string(),
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Source {
                name: self.dir.display().to_string(),
                message: e.to_string(),
            })?;
            let is_file = entry
                .file_type()
                .map_err(|e| Error::Source {
                    name: entry.path().display().to_string(),
                    message: e.to_string(),
                })?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn body(&self, name: &str) -> Result<String, Error> {
        fs::read_to_string(self.dir.join(name)).map_err(|e| Error::Source {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// An in-memory migration source built from `(name, sql)` pairs.
///
/// The Rust-native way to ship migrations inside the binary is to combine
/// this with [`include_str!`]:
///
/// ```
/// use pgmigrate::StaticSource;
///
/// let source = StaticSource::new([
///     ("0001_create_users.sql", "CREATE TABLE users (id BIGSERIAL PRIMARY KEY)"),
///     ("0002_add_email.sql", "ALTER TABLE users ADD COLUMN email TEXT"),
/// ]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entries: Vec<(String, String)>,
}

impl StaticSource {
    pub fn new<N, B>(entries: impl IntoIterator<Item = (N, B)>) -> Self
    where
        N: Into<String>,
        B: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(n, b)| (n.into(), b.into()))
                .collect(),
        }
    }
}

impl MigrationSource for StaticSource {
    fn names(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries.iter().map(|(n, _)| n.clone()).collect())
    }

    fn body(&self, name: &str) -> Result<String, Error> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| Error::Source {
                name: name.to_string(),
                message: "no such entry".to_string(),
            })
    }
}

/// Derive the run's `(version, entry name)` list from a source's entry names:
/// keep `.sql` entries, strip the suffix, sort ascending by version, and
/// reject duplicate versions up front.
pub(crate) fn sorted_versions(names: Vec<String>) -> Result<Vec<(String, String)>, Error> {
    let mut versions: Vec<(String, String)> = names
        .into_iter()
        .filter_map(|name| {
            name.strip_suffix(SQL_SUFFIX)
                .map(|version| (version.to_string(), name.clone()))
        })
        .collect();
    versions.sort();

    for pair in versions.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(Error::DuplicateVersion(pair[0].0.clone()));
        }
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_versions_orders_lexicographically() {
        let names = vec![
            "002_x.sql".to_string(),
            "010_z.sql".to_string(),
            "001_y.sql".to_string(),
        ];
        let versions = sorted_versions(names).unwrap();
        assert_eq!(
            versions,
            vec![
                ("001_y".to_string(), "001_y.sql".to_string()),
                ("002_x".to_string(), "002_x.sql".to_string()),
                ("010_z".to_string(), "010_z.sql".to_string()),
            ]
        );
    }

    #[test]
    fn sorted_versions_skips_non_sql_entries() {
        let names = vec![
            "README.md".to_string(),
            "0001_init.sql".to_string(),
            "notes.txt".to_string(),
        ];
        let versions = sorted_versions(names).unwrap();
        assert_eq!(
            versions,
            vec![("0001_init".to_string(), "0001_init.sql".to_string())]
        );
    }

    #[test]
    fn sorted_versions_rejects_duplicates() {
        let names = vec!["0001_init.sql".to_string(), "0001_init.sql".to_string()];
        let err = sorted_versions(names).unwrap_err();
        assert!(matches!(err, Error::DuplicateVersion(v) if v == "0001_init"));
    }

    #[test]
    fn dir_source_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001_a.sql"), "SELECT 1").unwrap();
        std::fs::write(dir.path().join("0002_b.sql"), "SELECT 2").unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();
        std::fs::write(dir.path().join("archive").join("0003_c.sql"), "SELECT 3").unwrap();

        let source = DirSource::new(dir.path());
        let mut names = source.names().unwrap();
        names.sort();
        assert_eq!(names, vec!["0001_a.sql", "0002_b.sql"]);
        assert_eq!(source.body("0002_b.sql").unwrap(), "SELECT 2");
    }

    #[test]
    fn dir_source_missing_directory_errors() {
        let source = DirSource::new("/definitely/not/a/real/path");
        assert!(matches!(source.names(), Err(Error::Source { .. })));
    }

    #[test]
    fn static_source_body_for_unknown_name_errors() {
        let source = StaticSource::new([("0001_a.sql", "SELECT 1")]);
        assert!(matches!(
            source.body("0002_b.sql"),
            Err(Error::Source { .. })
        ));
    }
}
