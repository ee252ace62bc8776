//! Common types for the ReplayCheck state codec.

use serde::Serialize;
use std::fmt;

/// Serialized copy of all deterministic state at one position.
///
/// The layout is an internal contract between the codec and the types that
/// implement `ProcessState`; it is not a public wire format.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    /// Wraps raw bytes produced by a record walk.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the snapshot and returns the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the snapshot size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no state was written.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// FNV-1a digest of the snapshot bytes (for logs and reports).
    pub fn checksum(&self) -> u64 {
        let mut hasher = Fnv64::new();
        hasher.write(&self.0);
        hasher.finish()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snapshot({} bytes, {:016x})", self.len(), self.checksum())
    }
}

/// FNV-1a 64-bit hasher.
///
/// Stable across platforms and runs of the same binary, which is all the
/// tracker needs for snapshot and fingerprint digests.
#[derive(Debug, Clone, Copy)]
pub struct Fnv64 {
    state: u64,
}

impl Fnv64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self { state: Self::OFFSET_BASIS }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    pub fn write_u32(&mut self, val: u32) {
        self.write(&val.to_le_bytes());
    }

    pub fn write_u64(&mut self, val: u64) {
        self.write(&val.to_le_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

/// Mode the codec walks the state in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// Append every field to an output buffer.
    Record,

    /// Overwrite every field from an input buffer.
    Restore,

    /// Compare every field against an input buffer without writing.
    Verify,
}

/// One step in a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment {
    /// Named field or scope
    Field(&'static str),

    /// Element of a sequence
    Index(usize),
}

/// Location of a field inside the state tree, e.g. `oracle.entities[3].position.x`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// What differed at a mismatching field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MismatchDetail {
    /// Both sides have the field but the bytes differ.
    Value {
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// The baseline ended before the live state did.
    BaselineExhausted {
        needed: usize,
        remaining: usize,
    },

    /// The live state ended before the baseline did.
    TrailingBytes {
        count: usize,
    },
}

/// First field at which a live state disagrees with a baseline snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    /// Field path in traversal order
    pub path: String,

    /// Offset of the field in the baseline buffer
    pub offset: usize,

    /// What differed
    pub detail: MismatchDetail,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            MismatchDetail::Value { expected, actual } => write!(
                f,
                "{} (offset {}): expected {}, found {}",
                self.path,
                self.offset,
                hex(expected),
                hex(actual)
            ),
            MismatchDetail::BaselineExhausted { needed, remaining } => write!(
                f,
                "{} (offset {}): baseline exhausted, needed {} bytes but {} remain",
                self.path, self.offset, needed, remaining
            ),
            MismatchDetail::TrailingBytes { count } => write!(
                f,
                "{} (offset {}): baseline has {} trailing bytes",
                self.path, self.offset, count
            ),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    const MAX_SHOWN: usize = 32;
    let mut out: String = bytes
        .iter()
        .take(MAX_SHOWN)
        .map(|b| format!("{:02x}", b))
        .collect();
    if bytes.len() > MAX_SHOWN {
        out.push_str(&format!("..(+{})", bytes.len() - MAX_SHOWN));
    }
    if out.is_empty() {
        out.push_str("<empty>");
    }
    out
}
