//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`VgName`] - Validated volume group name (real or orphan)
//! - [`VgId`] - Volume group identifier (32 id characters, or an orphan key)
//! - [`PvId`] - Persistent physical volume identifier
//! - [`FormatName`] - Name of an on-disk metadata dialect
//! - [`LockResource`] - A lockable resource name
//! - [`UtcTimestamp`] - RFC3339 timestamp
//!
//! # Validation
//!
//! These types enforce validity at construction time. Orphan names and
//! orphan keys can only be produced through [`VgName::orphan`] and
//! [`VgId::orphan`], so user input can never spell a reserved name.
//!
//! # Examples
//!
//! ```
//! use vgcache::core::types::{FormatName, PvId, VgName};
//!
//! let name = VgName::new("vg0").unwrap();
//! assert!(!name.is_orphan());
//!
//! let orphans = VgName::orphan(&FormatName::new("lvm2").unwrap());
//! assert_eq!(orphans.as_str(), "#orphans_lvm2");
//! assert!(orphans.is_orphan());
//!
//! assert!(VgName::new("#orphans_lvm2").is_err());
//! assert!(PvId::new("not-an-id").is_err());
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix shared by every orphan pseudo-group name.
pub const ORPHAN_PREFIX: &str = "#orphans_";

/// Lock resource name covering every orphan pseudo-group.
pub const ORPHAN_LOCK_NAME: &str = "#orphans";

/// Reserved global lock resource name.
pub const GLOBAL_LOCK_NAME: &str = "#global";

/// Maximum length of a volume group name.
pub const MAX_VG_NAME_LEN: usize = 127;

/// Number of characters in an identifier.
pub const ID_LEN: usize = 32;

const ID_CHARS: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#";

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid volume group name: {0}")]
    InvalidVgName(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid format name: {0}")]
    InvalidFormatName(String),
}

/// A validated volume group name.
///
/// Names follow the volume manager's rules:
/// - Between 1 and 127 characters
/// - Only `a-z`, `A-Z`, `0-9`, `.`, `_`, `+` and `-`
/// - Cannot start with `-`
/// - Cannot be `.` or `..`
///
/// Orphan pseudo-group names (`#orphans_<format>`) are built with
/// [`VgName::orphan`] and are the only names allowed to contain `#`.
///
/// # Example
///
/// ```
/// use vgcache::core::types::VgName;
///
/// assert!(VgName::new("data_vg").is_ok());
/// assert!(VgName::new("-data").is_err());
/// assert!(VgName::new("..").is_err());
/// assert!(VgName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VgName(String);

impl VgName {
    /// Create a new validated volume group name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidVgName` if the name violates the naming rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        crate::core::naming::validate_vg_name(&name).map_err(TypeError::InvalidVgName)?;
        Ok(Self(name))
    }

    /// The orphan pseudo-group name for a format.
    pub fn orphan(format: &FormatName) -> Self {
        Self(format!("{}{}", ORPHAN_PREFIX, format.as_str()))
    }

    /// Whether this is an orphan pseudo-group name.
    pub fn is_orphan(&self) -> bool {
        self.0.starts_with(ORPHAN_PREFIX)
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VgName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Some(format) = value.strip_prefix(ORPHAN_PREFIX) {
            let format = FormatName::new(format)?;
            return Ok(Self::orphan(&format));
        }
        Self::new(value)
    }
}

impl From<VgName> for String {
    fn from(name: VgName) -> Self {
        name.0
    }
}

impl fmt::Display for VgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VgName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate and normalize a 32-character identifier.
///
/// Accepts both the raw form and the hyphenated display form.
fn normalize_id(input: &str) -> Result<String, TypeError> {
    let raw: String = input.chars().filter(|c| *c != '-').collect();
    if raw.len() != ID_LEN {
        return Err(TypeError::InvalidId(format!(
            "'{}' must have {} characters, found {}",
            input,
            ID_LEN,
            raw.len()
        )));
    }
    if let Some(bad) = raw.bytes().find(|b| !ID_CHARS.contains(b)) {
        return Err(TypeError::InvalidId(format!(
            "'{}' contains invalid character '{}'",
            input, bad as char
        )));
    }
    Ok(raw)
}

/// Generate a fresh random identifier.
fn generate_id() -> String {
    let mut bytes = Vec::with_capacity(ID_LEN);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes
        .into_iter()
        .map(|b| ID_CHARS[(b as usize) % ID_CHARS.len()] as char)
        .collect()
}

/// Write an identifier in the 6-4-4-4-4-4-6 grouped display form.
fn write_grouped(f: &mut fmt::Formatter<'_>, raw: &str) -> fmt::Result {
    const GROUPS: [usize; 7] = [6, 4, 4, 4, 4, 4, 6];
    let mut start = 0;
    for (i, len) in GROUPS.iter().enumerate() {
        if i > 0 {
            f.write_str("-")?;
        }
        f.write_str(&raw[start..start + len])?;
        start += len;
    }
    Ok(())
}

/// A persistent physical volume identifier.
///
/// # Example
///
/// ```
/// use vgcache::core::types::PvId;
///
/// let id = PvId::new("abcdef-ghij-klmn-opqr-stuv-wxyz-ABCDEF").unwrap();
/// assert_eq!(id.as_str(), "abcdefghijklmnopqrstuvwxyzABCDEF");
/// assert_eq!(id.to_string(), "abcdef-ghij-klmn-opqr-stuv-wxyz-ABCDEF");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PvId(String);

impl PvId {
    /// Create a validated PV identifier.
    pub fn new(id: impl AsRef<str>) -> Result<Self, TypeError> {
        Ok(Self(normalize_id(id.as_ref())?))
    }

    /// Generate a new random identifier.
    pub fn generate() -> Self {
        Self(generate_id())
    }

    /// Get the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PvId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PvId> for String {
    fn from(id: PvId) -> Self {
        id.0
    }
}

impl fmt::Display for PvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_grouped(f, &self.0)
    }
}

/// A volume group identifier.
///
/// Real groups carry a 32-character id. Orphan pseudo-groups are keyed by
/// their orphan name instead, so the cache can index both uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VgId(String);

impl VgId {
    /// Create a validated VG identifier.
    pub fn new(id: impl AsRef<str>) -> Result<Self, TypeError> {
        Ok(Self(normalize_id(id.as_ref())?))
    }

    /// Generate a new random identifier.
    pub fn generate() -> Self {
        Self(generate_id())
    }

    /// The key used for a format's orphan pseudo-group.
    pub fn orphan(format: &FormatName) -> Self {
        Self(VgName::orphan(format).0)
    }

    /// Whether this key belongs to an orphan pseudo-group.
    pub fn is_orphan(&self) -> bool {
        self.0.starts_with(ORPHAN_PREFIX)
    }

    /// Get the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VgId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Some(format) = value.strip_prefix(ORPHAN_PREFIX) {
            return Ok(Self::orphan(&FormatName::new(format)?));
        }
        Self::new(value)
    }
}

impl From<VgId> for String {
    fn from(id: VgId) -> Self {
        id.0
    }
}

impl fmt::Display for VgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_orphan() {
            f.write_str(&self.0)
        } else {
            write_grouped(f, &self.0)
        }
    }
}

/// Name of an on-disk metadata dialect (e.g. `lvm2`).
///
/// Lowercase ASCII letters, digits and `_`, at most 16 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatName(String);

impl FormatName {
    /// Create a validated format name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 16
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !valid {
            return Err(TypeError::InvalidFormatName(name));
        }
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FormatName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FormatName> for String {
    fn from(name: FormatName) -> Self {
        name.0
    }
}

impl fmt::Display for FormatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A lockable resource.
///
/// The ordering of this type is the lock order: the global resource
/// first, then volume groups alphabetically, then the orphan resource.
///
/// # Example
///
/// ```
/// use vgcache::core::types::{LockResource, VgName};
///
/// let a = LockResource::Vg(VgName::new("a").unwrap());
/// let b = LockResource::Vg(VgName::new("b").unwrap());
/// assert!(LockResource::Global < a);
/// assert!(a < b);
/// assert!(b < LockResource::Orphans);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockResource {
    /// The reserved global resource.
    Global,
    /// A real volume group.
    Vg(VgName),
    /// All orphan pseudo-groups, across every format.
    Orphans,
}

impl LockResource {
    /// The resource protecting a volume group name.
    ///
    /// Every orphan pseudo-group maps onto [`LockResource::Orphans`].
    pub fn for_vg(name: &VgName) -> Self {
        if name.is_orphan() {
            Self::Orphans
        } else {
            Self::Vg(name.clone())
        }
    }

    /// Whether this is the reserved global resource.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Whether this resource guards a volume group (including orphans).
    pub fn is_vg_scope(&self) -> bool {
        !self.is_global()
    }

    /// Whether `name` is protected by this resource.
    pub fn covers(&self, name: &VgName) -> bool {
        match self {
            Self::Global => false,
            Self::Orphans => name.is_orphan(),
            Self::Vg(vg) => vg == name,
        }
    }

    /// The resource name as used by lock backends.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Global => GLOBAL_LOCK_NAME,
            Self::Orphans => ORPHAN_LOCK_NAME,
            Self::Vg(name) => name.as_str(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Vg(_) => 1,
            Self::Orphans => 2,
        }
    }
}

impl Ord for LockResource {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Vg(a), Self::Vg(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for LockResource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LockResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RFC3339 UTC timestamp.
///
/// # Example
///
/// ```
/// use vgcache::core::types::UtcTimestamp;
///
/// let now = UtcTimestamp::now();
/// println!("Current time: {}", now);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Get the underlying datetime.
    pub fn as_datetime(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

impl fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
