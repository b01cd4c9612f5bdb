//! Persistence for generated constraint matrices.
//!
//! Building a [`ConstraintMatrix`] is by far the most expensive step, so a [`MatrixStore`]
//! keeps one artifact per `(n, m)` pair in a cache directory and reuses it for every later
//! request at any order it covers.

use crate::error::{MaxEntError, Result};
use crate::matrix::ConstraintMatrix;
use crate::space::ParameterSpace;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where matrix artifacts live, and what to do when one is missing.
///
/// The store never goes looking for configuration on its own; callers construct this directly,
/// take the [`Default`], or parse one with [`StoreConfig::from_toml_str`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the artifacts. It's created on first use.
    pub cache_dir: PathBuf,

    /// Whether a missing or stale artifact may be generated and written. When `false`, such
    /// requests fail instead.
    pub build_if_missing: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    maxent: MaxentSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaxentSection {
    cache_dir: Option<String>,
    build_if_missing: Option<bool>,
}

impl StoreConfig {
    /// Uses the given directory, building artifacts when they're missing.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            cache_dir: cache_dir.into(),
            build_if_missing: true,
        }
    }

    /// Sets whether missing or stale artifacts may be built.
    pub fn with_build_if_missing(mut self, build_if_missing: bool) -> Self {
        self.build_if_missing = build_if_missing;
        self
    }

    /// Parses the `[maxent]` table of a TOML document. Other tables are ignored, as are
    /// documents without a `[maxent]` table, which produce the defaults.
    ///
    /// ```
    /// use amari_maxent::StoreConfig;
    ///
    /// let config = StoreConfig::from_toml_str(
    ///     "[maxent]\ncache_dir = \"/var/cache/maxent\"\nbuild_if_missing = false\n",
    /// ).unwrap();
    /// assert_eq!(config.cache_dir, std::path::PathBuf::from("/var/cache/maxent"));
    /// assert!(!config.build_if_missing);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| MaxEntError::Config {
            reason: e.to_string(),
        })?;
        let mut config = StoreConfig::default();
        if let Some(dir) = file.maxent.cache_dir {
            config.cache_dir = expand_home(&dir);
        }
        if let Some(build) = file.maxent.build_if_missing {
            config.build_if_missing = build;
        }
        Ok(config)
    }
}

impl Default for StoreConfig {
    /// Uses `~/.amari-maxent` (`~/_amari-maxent` on Windows), or a directory under the system
    /// temporary directory if no home directory is known.
    fn default() -> Self {
        let name = if cfg!(windows) {
            "_amari-maxent"
        } else {
            ".amari-maxent"
        };
        let base = home_dir().unwrap_or_else(std::env::temp_dir);
        StoreConfig::new(base.join(name))
    }
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

fn expand_home(dir: &str) -> PathBuf {
    match (dir.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if dir == "~" => home_dir().unwrap_or_else(|| PathBuf::from(dir)),
        _ => PathBuf::from(dir),
    }
}

/// The on-disk form of a constraint matrix.
#[derive(Debug, Deserialize, Serialize)]
struct MatrixArtifact {
    n: usize,
    m: usize,
    order: usize,
    order_idx: Vec<usize>,
    indptr: Vec<usize>,
    indices: Vec<usize>,
}

/// Loads constraint matrices from a cache directory, building and saving them on a miss.
///
/// Artifacts are keyed by `(n, m)` only. An artifact built for a lower order than a later
/// request is stale: it's rebuilt at the requested order and overwritten if
/// [`StoreConfig::build_if_missing`] is set, and rejected otherwise.
///
/// Writes go to a temporary file in the cache directory which is then atomically renamed into
/// place, so concurrent readers never see a partial artifact. Two processes racing to build the
/// same key both do the work, and one of their identical results wins.
#[derive(Clone, Debug)]
pub struct MatrixStore {
    config: StoreConfig,
}

impl MatrixStore {
    /// Creates a store with the given configuration. Nothing is touched on disk yet.
    pub fn new(config: StoreConfig) -> Self {
        MatrixStore { config }
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The artifact path for `n` variables over `m` symbols.
    pub fn path_for(&self, n: usize, m: usize) -> PathBuf {
        self.config.cache_dir.join(format!("a_n{}m{}.json", n, m))
    }

    /// Returns a matrix covering `space.order()`, loading it if possible and otherwise
    /// building and persisting it.
    #[tracing::instrument(skip_all, fields(n = space.variables(), m = space.alphabet(), k = space.order()))]
    pub fn load_or_build(&self, space: &ParameterSpace) -> Result<ConstraintMatrix> {
        let path = self.path_for(space.variables(), space.alphabet());
        match self.load(space)? {
            Some(matrix) if matrix.order() >= space.order() => {
                debug!(path = %path.display(), built = matrix.order(), "loaded constraint matrix");
                Ok(matrix)
            }
            Some(stale) => {
                if !self.config.build_if_missing {
                    return Err(MaxEntError::InsufficientOrder {
                        built: stale.order(),
                        requested: space.order(),
                    });
                }
                warn!(
                    path = %path.display(),
                    built = stale.order(),
                    "stored matrix covers too few orders, rebuilding"
                );
                self.build_and_save(space)
            }
            None => {
                if !self.config.build_if_missing {
                    return Err(MaxEntError::MissingArtifact { path });
                }
                info!(path = %path.display(), "no stored matrix, building");
                self.build_and_save(space)
            }
        }
    }

    fn build_and_save(&self, space: &ParameterSpace) -> Result<ConstraintMatrix> {
        let matrix = ConstraintMatrix::build(space);
        self.save(&matrix)?;
        Ok(matrix)
    }

    /// Loads the artifact for `space`'s `(n, m)`, if there is one.
    ///
    /// The returned matrix may cover fewer orders than `space.order()`; it's up to the caller
    /// to check. Fails if the artifact can't be read or doesn't describe an `(n, m)` matrix.
    pub fn load(&self, space: &ParameterSpace) -> Result<Option<ConstraintMatrix>> {
        let path = self.path_for(space.variables(), space.alphabet());
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(MaxEntError::Io { path, source }),
        };

        let artifact: MatrixArtifact =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| MaxEntError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if artifact.n != space.variables() {
            return Err(MaxEntError::DimensionMismatch {
                what: "variables",
                expected: space.variables(),
                got: artifact.n,
            });
        }
        if artifact.m != space.alphabet() {
            return Err(MaxEntError::DimensionMismatch {
                what: "alphabet size",
                expected: space.alphabet(),
                got: artifact.m,
            });
        }
        let stored = ParameterSpace::new(artifact.n, artifact.m, artifact.order).map_err(|e| {
            MaxEntError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        if artifact.order_idx != stored.order_idx() {
            return Err(MaxEntError::Corrupt {
                path,
                reason: "order boundaries don't match the parameters".to_string(),
            });
        }

        ConstraintMatrix::from_parts(stored, artifact.indptr, artifact.indices)
            .map(Some)
            .map_err(|e| MaxEntError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    /// Writes `matrix` as the artifact for its `(n, m)`, replacing any existing one, and returns
    /// the artifact's path.
    pub fn save(&self, matrix: &ConstraintMatrix) -> Result<PathBuf> {
        let space = matrix.space();
        let dir = &self.config.cache_dir;
        let path = self.path_for(space.variables(), space.alphabet());
        fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;

        let artifact = MatrixArtifact {
            n: space.variables(),
            m: space.alphabet(),
            order: space.order(),
            order_idx: space.order_idx(),
            indptr: matrix.indptr().to_vec(),
            indices: matrix.indices().to_vec(),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| io_error(dir, source))?;
        {
            let mut writer = BufWriter::new(&mut tmp);
            serde_json::to_writer(&mut writer, &artifact)
                .map_err(|e| io_error(&path, io::Error::from(e)))?;
            writer.flush().map_err(|source| io_error(&path, source))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|source| io_error(&path, source))?;
        tmp.persist(&path)
            .map_err(|e| io_error(&path, e.error))?;

        info!(path = %path.display(), order = space.order(), nnz = matrix.nnz(), "saved constraint matrix");
        Ok(path)
    }
}

fn io_error(path: &Path, source: io::Error) -> MaxEntError {
    MaxEntError::Io {
        path: path.to_path_buf(),
        source,
    }
}
