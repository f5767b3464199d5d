/// Identifier for a persisted job
///
/// A ULID, so identifiers sort lexicographically by creation time and double
/// as the on-disk filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    id: ulid::Ulid,
}

impl JobId {
    /// File extension used by the file backend.
    pub const EXTENSION: &'static str = ".job";

    /// Parse a job ID from a filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.job`
    ///
    /// # Security
    /// This function explicitly rejects:
    /// - Path separators (/ and \)
    /// - Directory traversal patterns (..)
    /// - Invalid ULID format
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') {
            return None;
        }

        if filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(Self::EXTENSION)?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique job ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which this ID was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }

    /// The filename this job is stored under
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}{}", self.id, Self::EXTENSION)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}
