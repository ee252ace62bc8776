//! The symmetric state codec.
//!
//! A single `ProcessState` walk drives three operations:
//!
//! | operation | mode      | effect on state | result                        |
//! |-----------|-----------|-----------------|-------------------------------|
//! | `record`  | `Record`  | none            | `Snapshot` of every field     |
//! | `restore` | `Restore` | overwritten     | `Ok` iff the buffer is exactly consumed |
//! | `verify`  | `Verify`  | none            | first `FieldMismatch`, if any |
//!
//! Encoding is little-endian and fixed-width for scalars. Sequences, strings
//! and byte blobs carry a `u64` length prefix so that differently shaped
//! states never produce the same bytes.

use crate::error::CodecError;
use crate::state::{Primitive, ProcessState};
use crate::types::{CodecMode, FieldMismatch, FieldPath, MismatchDetail, PathSegment, Snapshot};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Visitor handed to `ProcessState::process_state`.
pub struct StateCodec<'a> {
    /// What this walk does with each field
    mode: CodecMode,

    /// Accumulated bytes (record mode)
    output: Vec<u8>,

    /// Baseline bytes (restore and verify modes)
    input: &'a [u8],

    /// Read position in `input`
    cursor: usize,

    /// Path of the field currently being visited
    path: FieldPath,

    /// First disagreement found in verify mode
    mismatch: Option<FieldMismatch>,
}

impl<'a> StateCodec<'a> {
    fn new(mode: CodecMode, input: &'a [u8]) -> Self {
        Self {
            mode,
            output: Vec::new(),
            input,
            cursor: 0,
            path: FieldPath::new(),
            mismatch: None,
        }
    }

    /// Serializes `state` into a new snapshot.
    pub fn record<S: ProcessState + ?Sized>(state: &mut S) -> Result<Snapshot, CodecError> {
        let mut codec = StateCodec::new(CodecMode::Record, &[]);
        state.process_state(&mut codec)?;
        Ok(Snapshot::from_bytes(codec.output))
    }

    /// Overwrites `state` from `bytes`.
    ///
    /// Fails with `CodecError::Corrupted` if the walk needs more bytes than
    /// available or leaves any byte unread.
    pub fn restore<S: ProcessState + ?Sized>(
        state: &mut S,
        bytes: &'a [u8],
    ) -> Result<(), CodecError> {
        let mut codec = StateCodec::new(CodecMode::Restore, bytes);
        state.process_state(&mut codec)?;

        let remaining = codec.remaining();
        if remaining != 0 {
            return Err(CodecError::corrupted(
                &codec.path,
                codec.cursor,
                format!("{} unread bytes after walk", remaining),
            ));
        }
        Ok(())
    }

    /// Compares `state` against `bytes` without modifying it.
    ///
    /// Returns the first mismatching field in traversal order, or `None` when
    /// the live state would record to exactly `bytes`.
    pub fn verify<S: ProcessState + ?Sized>(
        state: &mut S,
        bytes: &'a [u8],
    ) -> Result<Option<FieldMismatch>, CodecError> {
        let mut codec = StateCodec::new(CodecMode::Verify, bytes);
        state.process_state(&mut codec)?;

        if codec.mismatch.is_none() && codec.remaining() > 0 {
            codec.mismatch = Some(FieldMismatch {
                path: "<end>".to_string(),
                offset: codec.cursor,
                detail: MismatchDetail::TrailingBytes {
                    count: codec.remaining(),
                },
            });
        }
        Ok(codec.mismatch)
    }

    /// Returns the walk mode.
    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    pub fn is_recording(&self) -> bool {
        self.mode == CodecMode::Record
    }

    pub fn is_restoring(&self) -> bool {
        self.mode == CodecMode::Restore
    }

    pub fn is_verifying(&self) -> bool {
        self.mode == CodecMode::Verify
    }

    /// Path of the field currently being visited.
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// True once a verify walk has found its first mismatch.
    ///
    /// Every later visit is a no-op: past the first difference the baseline
    /// cursor no longer lines up with the live fields.
    pub fn has_diverged(&self) -> bool {
        self.mismatch.is_some()
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.cursor
    }

    // =========================================================================
    // SCALARS
    // =========================================================================

    /// Visits a fixed-width scalar.
    pub fn field<T: Primitive>(
        &mut self,
        label: &'static str,
        value: &mut T,
    ) -> Result<(), CodecError> {
        self.path.push(PathSegment::Field(label));
        let result = self.primitive(value);
        self.path.pop();
        result
    }

    /// Visits an optional scalar as a presence flag followed by the value.
    pub fn option<T: Primitive>(
        &mut self,
        label: &'static str,
        value: &mut Option<T>,
    ) -> Result<(), CodecError> {
        self.scope(label, |codec| {
            let mut present = value.is_some();
            codec.field("some", &mut present)?;

            match (codec.mode, present) {
                (CodecMode::Restore, true) => {
                    codec.path.push(PathSegment::Field("value"));
                    let decoded = codec.read_primitive::<T>();
                    codec.path.pop();
                    *value = Some(decoded?);
                }
                (CodecMode::Restore, false) => *value = None,
                _ => {
                    if let Some(inner) = value.as_mut() {
                        codec.field("value", inner)?;
                    }
                }
            }
            Ok(())
        })
    }

    fn primitive<T: Primitive>(&mut self, value: &mut T) -> Result<(), CodecError> {
        match self.mode {
            CodecMode::Record => {
                value.encode(&mut self.output);
                Ok(())
            }
            CodecMode::Restore => {
                *value = self.read_primitive()?;
                Ok(())
            }
            CodecMode::Verify => {
                let mut live = Vec::with_capacity(T::WIDTH);
                value.encode(&mut live);
                self.compare(&live);
                Ok(())
            }
        }
    }

    fn read_primitive<T: Primitive>(&mut self) -> Result<T, CodecError> {
        let raw = self.take(T::WIDTH)?;
        T::decode(raw).ok_or_else(|| {
            CodecError::invalid(&self.path, format!("bytes {:02x?} do not decode", raw))
        })
    }

    // =========================================================================
    // STRUCTURE
    // =========================================================================

    /// Visits a nested `ProcessState` value under `label`.
    pub fn nested<S: ProcessState + ?Sized>(
        &mut self,
        label: &'static str,
        state: &mut S,
    ) -> Result<(), CodecError> {
        self.scope(label, |codec| state.process_state(codec))
    }

    /// Runs `f` with `label` pushed onto the field path.
    ///
    /// Useful for foreign types that cannot implement `ProcessState`.
    pub fn scope<F>(&mut self, label: &'static str, f: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut Self) -> Result<(), CodecError>,
    {
        if self.has_diverged() {
            return Ok(());
        }
        self.path.push(PathSegment::Field(label));
        let result = f(self);
        self.path.pop();
        result
    }

    /// Visits a length-prefixed sequence of `ProcessState` elements.
    ///
    /// On restore the vector is resized to the recorded length. Every element
    /// must encode to at least one byte.
    pub fn seq<T: ProcessState + Default>(
        &mut self,
        label: &'static str,
        items: &mut Vec<T>,
    ) -> Result<(), CodecError> {
        self.scope(label, |codec| {
            let len = codec.length(items.len())?;
            if codec.is_restoring() {
                items.resize_with(len, T::default);
            }
            for (idx, item) in items.iter_mut().enumerate() {
                if codec.has_diverged() {
                    break;
                }
                codec.path.push(PathSegment::Index(idx));
                let result = item.process_state(codec);
                codec.path.pop();
                result?;
            }
            Ok(())
        })
    }

    /// Visits a length-prefixed sequence of scalars.
    pub fn values<T: Primitive + Default>(
        &mut self,
        label: &'static str,
        items: &mut Vec<T>,
    ) -> Result<(), CodecError> {
        self.scope(label, |codec| {
            let len = codec.length(items.len())?;
            if codec.is_restoring() {
                items.resize(len, T::default());
            }
            for (idx, item) in items.iter_mut().enumerate() {
                if codec.has_diverged() {
                    break;
                }
                codec.path.push(PathSegment::Index(idx));
                let result = codec.primitive(item);
                codec.path.pop();
                result?;
            }
            Ok(())
        })
    }

    /// Visits the length prefix of a sequence; returns the length to use.
    fn length(&mut self, live_len: usize) -> Result<usize, CodecError> {
        let mut len = live_len as u64;
        self.field("len", &mut len)?;
        if !self.is_restoring() {
            return Ok(live_len);
        }

        let remaining = self.remaining();
        match usize::try_from(len) {
            Ok(n) if n <= remaining => Ok(n),
            _ => Err(CodecError::corrupted(
                &self.path,
                self.cursor,
                format!("length {} exceeds the {} remaining bytes", len, remaining),
            )),
        }
    }

    // =========================================================================
    // BLOBS
    // =========================================================================

    /// Visits a length-prefixed byte blob.
    pub fn bytes(&mut self, label: &'static str, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.scope(label, |codec| {
            let len = codec.length(buf.len())?;
            codec.raw(buf.as_slice(), len).map(|restored| {
                if let Some(restored) = restored {
                    buf.clear();
                    buf.extend_from_slice(restored);
                }
            })
        })
    }

    /// Visits a length-prefixed UTF-8 string.
    pub fn string(&mut self, label: &'static str, value: &mut String) -> Result<(), CodecError> {
        self.scope(label, |codec| {
            let len = codec.length(value.len())?;
            if let Some(restored) = codec.raw(value.as_bytes(), len)? {
                *value = String::from_utf8(restored.to_vec())
                    .map_err(|e| CodecError::invalid(&codec.path, e.to_string()))?;
            }
            Ok(())
        })
    }

    /// Visits a fixed-size byte array (no length prefix).
    pub fn fixed<const N: usize>(
        &mut self,
        label: &'static str,
        value: &mut [u8; N],
    ) -> Result<(), CodecError> {
        self.scope(label, |codec| {
            if let Some(restored) = codec.raw(value.as_slice(), N)? {
                value.copy_from_slice(restored);
            }
            Ok(())
        })
    }

    /// Writes, compares, or reads `len` raw bytes. Returns the bytes read in restore mode.
    fn raw(&mut self, live: &[u8], len: usize) -> Result<Option<&'a [u8]>, CodecError> {
        match self.mode {
            CodecMode::Record => {
                self.output.extend_from_slice(live);
                Ok(None)
            }
            CodecMode::Restore => self.take(len).map(Some),
            CodecMode::Verify => {
                self.compare(live);
                Ok(None)
            }
        }
    }

    // =========================================================================
    // GENERATORS
    // =========================================================================

    /// Visits the full internal state of a ChaCha8 generator.
    ///
    /// The seed, stream and word position are recorded, so a restored
    /// generator continues with exactly the same output sequence.
    pub fn rng(&mut self, label: &'static str, rng: &mut ChaCha8Rng) -> Result<(), CodecError> {
        let mut seed = rng.get_seed();
        let mut stream = rng.get_stream();
        let mut word_pos = rng.get_word_pos();

        self.scope(label, |codec| {
            codec.fixed("seed", &mut seed)?;
            codec.field("stream", &mut stream)?;
            codec.field("word_pos", &mut word_pos)
        })?;

        if self.is_restoring() {
            let mut restored = ChaCha8Rng::from_seed(seed);
            restored.set_stream(stream);
            restored.set_word_pos(word_pos);
            *rng = restored;
        }
        Ok(())
    }

    // =========================================================================
    // CURSOR
    // =========================================================================

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::corrupted(
                &self.path,
                self.cursor,
                format!("needed {} bytes, {} remain", len, remaining),
            ));
        }
        let input = self.input;
        let raw = &input[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(raw)
    }

    fn compare(&mut self, live: &[u8]) {
        if self.mismatch.is_some() {
            return;
        }

        let offset = self.cursor;
        let remaining = self.remaining();
        if live.len() > remaining {
            self.mismatch = Some(FieldMismatch {
                path: self.path.to_string(),
                offset,
                detail: MismatchDetail::BaselineExhausted {
                    needed: live.len(),
                    remaining,
                },
            });
            self.cursor = self.input.len();
            return;
        }

        let expected = &self.input[offset..offset + live.len()];
        self.cursor += live.len();
        if expected != live {
            self.mismatch = Some(FieldMismatch {
                path: self.path.to_string(),
                offset,
                detail: MismatchDetail::Value {
                    expected: expected.to_vec(),
                    actual: live.to_vec(),
                },
            });
        }
    }
}
