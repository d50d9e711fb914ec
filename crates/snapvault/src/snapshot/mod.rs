/// Snapshot chain reconstruction
pub mod chain;

use thiserror::Error;

/// Object name prefix for full snapshots
const FULL_SNAPSHOT_PREFIX: &str = "Full";
/// Object name prefix for delta snapshots
const DELTA_SNAPSHOT_PREFIX: &str = "Incr";
/// Revision width in object names, zero padded so lexical order follows revision order
const REVISION_WIDTH: usize = 20;
/// Suffix of objects that are still being written
const PART_SUFFIX: &str = ".part";

/// Snapshot kind
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapKind {
    /// A complete point-in-time copy of the data source
    Full,
    /// An incremental record of changes since the previous snapshot
    Delta,
}

impl SnapKind {
    /// Object name prefix of this kind
    fn prefix(self) -> &'static str {
        match self {
            SnapKind::Full => FULL_SNAPSHOT_PREFIX,
            SnapKind::Delta => DELTA_SNAPSHOT_PREFIX,
        }
    }
}

/// Error met when decoding an object name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NameParseError {
    /// The object is not a snapshot at all
    #[error("object {0} is not a snapshot")]
    NotASnapshot(String),
    /// The object looks like a snapshot but its name does not decode
    #[error("malformed snapshot object name {0}")]
    Malformed(String),
}

/// Metadata of one snapshot object in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Snapshot kind
    kind: SnapKind,
    /// First revision covered by this snapshot
    start_revision: i64,
    /// Last revision covered by this snapshot
    last_revision: i64,
    /// Completion timestamp, unix seconds
    created_at: u64,
    /// Whether the snapshot is split across multiple objects
    is_chunked: bool,
    /// Opaque codec identifier carried in the object name, not interpreted here
    compression_suffix: String,
}

impl SnapshotMetadata {
    /// Create metadata for a snapshot covering `start_revision..=last_revision`
    #[must_use]
    #[inline]
    pub fn new(kind: SnapKind, start_revision: i64, last_revision: i64, created_at: u64) -> Self {
        debug_assert!(
            start_revision <= last_revision,
            "snapshot revision range must not be inverted"
        );
        Self {
            kind,
            start_revision,
            last_revision,
            created_at,
            is_chunked: false,
            compression_suffix: String::new(),
        }
    }

    /// Attach an opaque compression suffix, e.g. ".gz"
    #[must_use]
    #[inline]
    pub fn with_compression(mut self, suffix: &str) -> Self {
        self.compression_suffix = suffix.to_owned();
        self
    }

    /// Snapshot kind
    #[must_use]
    #[inline]
    pub fn kind(&self) -> SnapKind {
        self.kind
    }

    /// First revision covered by this snapshot
    #[must_use]
    #[inline]
    pub fn start_revision(&self) -> i64 {
        self.start_revision
    }

    /// Last revision covered by this snapshot
    #[must_use]
    #[inline]
    pub fn last_revision(&self) -> i64 {
        self.last_revision
    }

    /// Completion timestamp in unix seconds
    #[must_use]
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Whether the snapshot is split across multiple objects
    #[must_use]
    #[inline]
    pub fn is_chunked(&self) -> bool {
        self.is_chunked
    }

    /// Opaque compression suffix, empty when uncompressed
    #[must_use]
    #[inline]
    pub fn compression_suffix(&self) -> &str {
        &self.compression_suffix
    }

    /// Encode the object name of this snapshot
    ///
    /// Revisions are zero padded so that a plain lexical sort of a listing
    /// yields creation order.
    #[must_use]
    #[inline]
    pub fn object_name(&self) -> String {
        format!(
            "{}-{:0width$}-{:0width$}-{}{}",
            self.kind.prefix(),
            self.start_revision,
            self.last_revision,
            self.created_at,
            self.compression_suffix,
            width = REVISION_WIDTH,
        )
    }

    /// Decode an object name back into metadata
    ///
    /// # Errors
    ///
    /// Return `NameParseError::NotASnapshot` for foreign objects and
    /// `NameParseError::Malformed` for snapshot-like names that do not decode.
    #[inline]
    pub fn parse(name: &str) -> Result<Self, NameParseError> {
        let (kind, rest) = if let Some(rest) = name.strip_prefix(FULL_SNAPSHOT_PREFIX) {
            (SnapKind::Full, rest)
        } else if let Some(rest) = name.strip_prefix(DELTA_SNAPSHOT_PREFIX) {
            (SnapKind::Delta, rest)
        } else {
            return Err(NameParseError::NotASnapshot(name.to_owned()));
        };
        let rest = rest
            .strip_prefix('-')
            .ok_or_else(|| NameParseError::Malformed(name.to_owned()))?;

        let mut fields = rest.splitn(3, '-');
        let start = Self::parse_revision(fields.next(), name)?;
        let last = Self::parse_revision(fields.next(), name)?;
        let tail = fields
            .next()
            .ok_or_else(|| NameParseError::Malformed(name.to_owned()))?;
        let digits = tail.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return Err(NameParseError::Malformed(name.to_owned()));
        }
        let (created, suffix) = tail.split_at(digits);
        let created_at: u64 = created
            .parse()
            .map_err(|_e| NameParseError::Malformed(name.to_owned()))?;
        if !suffix.is_empty() && !suffix.starts_with('.') {
            return Err(NameParseError::Malformed(name.to_owned()));
        }
        if start > last {
            return Err(NameParseError::Malformed(name.to_owned()));
        }
        Ok(Self::new(kind, start, last, created_at).with_compression(suffix))
    }

    /// Parse one zero padded revision field
    fn parse_revision(field: Option<&str>, name: &str) -> Result<i64, NameParseError> {
        field
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| NameParseError::Malformed(name.to_owned()))
    }
}

/// A store listing decoded into snapshot metadata
#[derive(Debug, Default, Clone)]
pub struct Listing {
    /// Successfully decoded snapshots, in listing order
    pub snapshots: Vec<SnapshotMetadata>,
    /// Snapshot-like names that failed to decode
    pub malformed: Vec<String>,
}

impl Listing {
    /// Last revision covered by any decoded snapshot
    #[must_use]
    #[inline]
    pub fn latest_revision(&self) -> Option<i64> {
        self.snapshots
            .iter()
            .map(SnapshotMetadata::last_revision)
            .max()
    }

    /// Whether the listing holds at least one full snapshot
    #[must_use]
    #[inline]
    pub fn has_full(&self) -> bool {
        self.snapshots.iter().any(|s| s.kind() == SnapKind::Full)
    }
}

/// Decode a raw object listing into snapshot metadata
///
/// Foreign objects are skipped, `.part` objects are treated as not yet
/// visible, and the numbered parts of a chunked snapshot (objects under a
/// `<name>/` prefix) collapse into a single `is_chunked` entry.
#[must_use]
#[inline]
pub fn collect_listing(names: &[String]) -> Listing {
    let mut listing = Listing::default();
    let mut last_chunk_base: Option<String> = None;
    for name in names {
        if name.ends_with(PART_SUFFIX) {
            continue;
        }
        let (base, chunked) = match name.split_once('/') {
            Some((base, _part)) => (base, true),
            None => (name.as_str(), false),
        };
        if chunked && last_chunk_base.as_deref() == Some(base) {
            continue;
        }
        match SnapshotMetadata::parse(base) {
            Ok(mut meta) => {
                if chunked {
                    meta.is_chunked = true;
                    last_chunk_base = Some(base.to_owned());
                }
                listing.snapshots.push(meta);
            }
            Err(NameParseError::NotASnapshot(_)) => {}
            Err(NameParseError::Malformed(n)) => listing.malformed.push(n),
        }
    }
    listing
}
