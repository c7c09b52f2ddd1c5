//! Filename translation between the original source tree and the mocks cache.
//!
//! The rewriter executes content-hashed copies of project files out of a
//! cache directory; the IDE only knows the original tree. Every cache
//! filename embeds a compound digest binding the relative path to the file
//! content, so a path can be proven to still correspond to the current
//! original before the proxy maps it back. Hashes are recomputed from disk on
//! every call; detecting edits is the whole point, so the digest is never
//! cached.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::GlobSet;
use md5::{Digest, Md5};
use thiserror::Error;
use url::Url;

/// An MD5 digest rendered as 32 lowercase hex characters, the format
/// embedded in cache filenames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash bytes read from `reader`, streaming so large files are never held
    /// in memory whole.
    pub fn from_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = Md5::new();
        let mut buf = [0_u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// The digest embedded in cache filenames: `md5(rel_path + ":" + content)`.
    ///
    /// Binding the relative path into the digest gives a moved-but-unchanged
    /// file a new cache identity.
    pub fn compound(rel_path: &str, content: &ContentHash) -> Self {
        Self::from_bytes(format!("{rel_path}:{content}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Translation failure reasons.
///
/// These are ordinary values: the relay decides per direction whether to skip
/// a node, forward untranslated, or close, so nothing here crosses the
/// session boundary as a panic.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("not a parseable url: {0}")]
    Url(#[from] url::ParseError),
    #[error("scheme is not file: {0}")]
    Scheme(String),
    #[error("path {path} does not start with {root}")]
    Prefix { path: String, root: PathBuf },
    #[error("path does not look like a hashed cache file: {0}")]
    Format(String),
    #[error("no local file {0}")]
    MissingFile(PathBuf),
    #[error("hash {computed} does not match embedded {embedded}")]
    HashMismatch { computed: ContentHash, embedded: String },
    #[error("translation skipped for {0}")]
    Skipped(String),
    #[error("failed to hash {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Static path configuration for a [`FilenameTranslator`].
#[derive(Debug, Clone, Default)]
pub struct TranslatorConfig {
    /// Root of the rewritten, content-hashed tree the engine executes from.
    pub cache_root: PathBuf,
    /// Root of the original tree as the IDE sees it.
    pub project_root: PathBuf,
    /// Checkout used for existence and content-hash checks. Distinct from
    /// `project_root` when the proxy runs on a different machine than the
    /// engine; `None` means the two coincide.
    pub local_root: Option<PathBuf>,
    /// Relative paths never translated toward the cache.
    pub do_not_translate: BTreeSet<String>,
    /// When set, only engine-side filenames whose path matches are attempted.
    pub translate_only: Option<GlobSet>,
}

/// Converts filenames between the two trees, in both directions.
#[derive(Debug)]
pub struct FilenameTranslator {
    cache_root: PathBuf,
    project_root: PathBuf,
    local_root: PathBuf,
    do_not_translate: BTreeSet<String>,
    translate_only: Option<GlobSet>,
}

impl FilenameTranslator {
    pub fn new(config: TranslatorConfig) -> Self {
        let local_root = config
            .local_root
            .unwrap_or_else(|| config.project_root.clone());
        FilenameTranslator {
            cache_root: config.cache_root,
            project_root: config.project_root,
            local_root,
            do_not_translate: config.do_not_translate,
            translate_only: config.translate_only,
        }
    }

    /// Whether an engine-side filename should be attempted at all. With no
    /// configured patterns every filename is attempted.
    pub fn should_attempt(&self, filename: &str) -> bool {
        let Some(filter) = &self.translate_only else {
            return true;
        };
        match Url::parse(filename) {
            Ok(url) => filter.is_match(url.path()),
            // Attempt it; translation will report the malformed url.
            Err(_) => true,
        }
    }

    /// Maps a cache filename (reported by the engine) back to the original
    /// project path the IDE can open.
    ///
    /// The embedded hash is verified against the current content of the
    /// original file; a mismatch means the cache entry is stale.
    pub fn to_original(&self, filename: &str) -> Result<PathBuf, TranslateError> {
        let path = file_url_path(filename)?;
        let rel = strip_root(&path, &self.cache_root)?;
        let Some((name, embedded)) = split_hashed_name(rel) else {
            return Err(TranslateError::Format(rel.to_string()));
        };

        let local = self.local_root.join(name);
        if !local.is_file() {
            return Err(TranslateError::MissingFile(local));
        }
        let content = ContentHash::from_file(&local).map_err(|source| TranslateError::Io {
            path: local.clone(),
            source,
        })?;
        let computed = ContentHash::compound(name, &content);
        if computed.as_str() != embedded {
            return Err(TranslateError::HashMismatch {
                computed,
                embedded: embedded.to_string(),
            });
        }
        Ok(self.project_root.join(name))
    }

    /// Maps an original project filename (sent by the IDE) to the cache path
    /// the engine is actually executing.
    pub fn to_cache(&self, filename: &str) -> Result<PathBuf, TranslateError> {
        let path = file_url_path(filename)?;
        let rel = strip_root(&path, &self.project_root)?;
        if self.do_not_translate.contains(rel) {
            return Err(TranslateError::Skipped(rel.to_string()));
        }

        let local = self.local_root.join(rel);
        if !local.is_file() {
            return Err(TranslateError::MissingFile(local));
        }
        let content = ContentHash::from_file(&local).map_err(|source| TranslateError::Io {
            path: local.clone(),
            source,
        })?;
        let compound = ContentHash::compound(rel, &content);
        Ok(self.cache_root.join(format!("{rel}_{compound}.php")))
    }
}

fn file_url_path(filename: &str) -> Result<String, TranslateError> {
    let url = Url::parse(filename)?;
    if url.scheme() != "file" {
        return Err(TranslateError::Scheme(url.scheme().to_string()));
    }
    Ok(url.path().to_string())
}

fn strip_root<'a>(path: &'a str, root: &Path) -> Result<&'a str, TranslateError> {
    Path::new(path)
        .strip_prefix(root)
        .ok()
        .and_then(|rel| rel.to_str())
        .ok_or_else(|| TranslateError::Prefix {
            path: path.to_string(),
            root: root.to_path_buf(),
        })
}

/// Splits `<relative-path>_<32-hex>.php` into its name and embedded hash.
fn split_hashed_name(rel: &str) -> Option<(&str, &str)> {
    let stem = rel.strip_suffix(".php")?;
    let (name, hash) = stem.rsplit_once('_')?;
    if name.is_empty() || hash.len() != 32 {
        return None;
    }
    if !hash
        .bytes()
        .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
    {
        return None;
    }
    Some((name, hash))
}
