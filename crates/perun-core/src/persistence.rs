//! Persistence primitives: versioned schema records, binary payloads and
//! the single-stream pack format.
//!
//! A saved index is a directory holding a `config.toml` (a versioned tagged
//! record) next to bincode payload files for the graph, the vector store
//! and auxiliary matrices. Loaders dispatch on `(schema, version)` and
//! refuse incompatible majors; unknown minor fields fill serde defaults.
//!
//! For binding interop, the directory can be packed into one uncompressed
//! stream of `name + length + bytes` records.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Semantic version attached to every persisted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Incompatible-change counter.
    pub major: u32,
    /// Feature counter; loaders accept older minors of the same major.
    pub minor: u32,
    /// Patch counter.
    pub patch: u32,
}

impl Version {
    /// Creates a version triple.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `"vMAJOR.MINOR.PATCH"` (the leading `v` is optional).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.strip_prefix('v').unwrap_or(text);
        let mut parts = trimmed.split('.');
        let mut next = |what: &str| -> Result<u32> {
            parts
                .next()
                .ok_or_else(|| Error::Serialization(format!("version '{text}' missing {what}")))?
                .parse::<u32>()
                .map_err(|e| Error::Serialization(format!("version '{text}': {e}")))
        };
        let version = Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        };
        if parts.next().is_some() {
            return Err(Error::Serialization(format!(
                "version '{text}' has trailing components"
            )));
        }
        Ok(version)
    }

    /// True when a payload written at `on_disk` can be loaded by code at
    /// `self`: same major, and not newer than the running code.
    #[must_use]
    pub fn accepts(&self, on_disk: Version) -> bool {
        self.major == on_disk.major && on_disk <= *self
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Schema identifiers shared with the on-disk vocabulary.
pub mod schema {
    /// Vamana graph-index configuration.
    pub const VAMANA_CONFIG: &str = "vamana config parameters";
    /// Dynamic Vamana state bundle.
    pub const DYNAMIC_VAMANA: &str = "dynamic vamana state";
    /// Flat index configuration.
    pub const FLAT_CONFIG: &str = "flat index parameters";
    /// IVF configuration.
    pub const IVF_CONFIG: &str = "ivf clustering parameters";
    /// Dynamic IVF state bundle.
    pub const DYNAMIC_IVF: &str = "dynamic ivf state";
    /// Uncompressed vector payload (any element type).
    pub const UNCOMPRESSED: &str = "uncompressed_data";
    /// Int8 scalar-quantized payload.
    pub const SCALAR_QUANTIZED: &str = "scalar_quantized_dataset";
    /// One-level LVQ payload.
    pub const ONE_LEVEL_LVQ: &str = "one_level_lvq_dataset";
    /// Two-level LVQ payload.
    pub const TWO_LEVEL_LVQ: &str = "two_level_lvq_dataset";
    /// LeanVec payload (projection + inner dataset).
    pub const LEANVEC: &str = "leanvec_dataset";
    /// Graph adjacency payload.
    pub const GRAPH: &str = "graph_adjacency";
}

/// Writes a TOML config record.
///
/// # Errors
///
/// Returns [`Error::Io`] or [`Error::Serialization`].
pub fn write_config<T: Serialize>(path: &Path, config: &T) -> Result<()> {
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Reads a TOML config record.
///
/// # Errors
///
/// Returns [`Error::Io`] or [`Error::Serialization`].
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

/// Checks a loaded `(schema, version)` pair against the running code.
///
/// # Errors
///
/// Returns [`Error::SchemaMismatch`] on a schema name mismatch, an
/// unparsable version, or an incompatible major.
pub fn check_schema(found_schema: &str, found_version: &str, expected: &str, current: Version) -> Result<()> {
    if found_schema != expected {
        return Err(Error::SchemaMismatch {
            schema: found_schema.to_string(),
            message: format!("expected schema '{expected}'"),
        });
    }
    let on_disk = Version::parse(found_version)?;
    if !current.accepts(on_disk) {
        return Err(Error::SchemaMismatch {
            schema: expected.to_string(),
            message: format!("on-disk version {on_disk} incompatible with {current}"),
        });
    }
    Ok(())
}

/// Serializes a payload to `path` with bincode.
///
/// # Errors
///
/// Returns [`Error::Io`] or [`Error::Serialization`].
pub fn write_payload<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, payload)?;
    Ok(())
}

/// Deserializes a payload from `path`.
///
/// # Errors
///
/// Returns [`Error::Io`] or [`Error::Serialization`].
pub fn read_payload<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(bincode::deserialize_from(reader)?)
}

/// Magic prefix of the single-stream pack format.
const PACK_MAGIC: &[u8; 8] = b"PERUNPK1";

/// Packs every regular file of `dir` (sorted by name, non-recursive) into
/// an uncompressed name+length+bytes stream.
///
/// # Errors
///
/// Returns [`Error::Io`] on filesystem or stream failures.
pub fn pack_directory<W: Write>(dir: &Path, writer: &mut W) -> Result<()> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name());
        }
    }
    names.sort();

    writer.write_all(PACK_MAGIC)?;
    #[allow(clippy::cast_possible_truncation)]
    writer.write_all(&(names.len() as u32).to_le_bytes())?;
    for name in names {
        let text = name.to_string_lossy();
        let bytes = std::fs::read(dir.join(&name))?;
        #[allow(clippy::cast_possible_truncation)]
        writer.write_all(&(text.len() as u32).to_le_bytes())?;
        writer.write_all(text.as_bytes())?;
        writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
        writer.write_all(&bytes)?;
    }
    writer.flush()?;
    Ok(())
}

/// Unpacks a stream produced by [`pack_directory`] into `dir` (created if
/// missing).
///
/// # Errors
///
/// Returns [`Error::Io`] on stream corruption or filesystem failures, and
/// [`Error::Serialization`] on a bad magic prefix.
pub fn unpack_directory<R: Read>(reader: &mut R, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != PACK_MAGIC {
        return Err(Error::Serialization("not a perun pack stream".into()));
    }
    let mut count_bytes = [0u8; 4];
    reader.read_exact(&mut count_bytes)?;
    let count = u32::from_le_bytes(count_bytes);

    for _ in 0..count {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let name_len = u32::from_le_bytes(len_bytes) as usize;
        let mut name_bytes = vec![0u8; name_len];
        reader.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|e| Error::Serialization(format!("bad file name in stream: {e}")))?;
        if name.contains('/') || name.contains('\\') || name == ".." {
            return Err(Error::Serialization(format!(
                "refusing suspicious packed file name '{name}'"
            )));
        }
        let mut size_bytes = [0u8; 8];
        reader.read_exact(&mut size_bytes)?;
        #[allow(clippy::cast_possible_truncation)]
        let size = u64::from_le_bytes(size_bytes) as usize;
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data)?;
        std::fs::write(dir.join(&name), data)?;
    }
    Ok(())
}
