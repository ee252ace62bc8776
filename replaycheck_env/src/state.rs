//! State traversal traits.

use crate::codec::StateCodec;
use crate::error::CodecError;

/// A type that owns deterministic state and knows how to walk it.
///
/// One implementation serves all three codec modes: the codec decides whether
/// each visited field is written, read back, or compared. The order of the
/// calls made inside `process_state` *is* the serialization format, so it must
/// not depend on anything but the state itself.
///
/// # Example
///
/// ```
/// use replaycheck_env::{CodecError, ProcessState, StateCodec};
///
/// #[derive(Default)]
/// struct Ball {
///     x: f32,
///     y: f32,
///     owner: Option<u32>,
/// }
///
/// impl ProcessState for Ball {
///     fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
///         codec.field("x", &mut self.x)?;
///         codec.field("y", &mut self.y)?;
///         codec.option("owner", &mut self.owner)
///     }
/// }
///
/// let mut ball = Ball { x: 1.0, y: -2.0, owner: Some(7) };
/// let snapshot = StateCodec::record(&mut ball).unwrap();
///
/// let mut copy = Ball::default();
/// StateCodec::restore(&mut copy, snapshot.as_bytes()).unwrap();
/// assert_eq!(copy.owner, Some(7));
/// ```
pub trait ProcessState {
    /// Visits every deterministic field in a fixed order.
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError>;
}

impl<T: ProcessState + ?Sized> ProcessState for Box<T> {
    fn process_state(&mut self, codec: &mut StateCodec<'_>) -> Result<(), CodecError> {
        (**self).process_state(codec)
    }
}

/// Fixed-width scalar with a little-endian byte representation.
///
/// Floats are encoded through their bit patterns, so comparisons are
/// bit-exact (a NaN compares equal to the same NaN, `0.0` differs from `-0.0`).
pub trait Primitive: Copy {
    /// Encoded size in bytes.
    const WIDTH: usize;

    /// Appends the little-endian bytes to `out`.
    fn encode(self, out: &mut Vec<u8>);

    /// Decodes from exactly `WIDTH` bytes. Returns `None` for unrepresentable values.
    fn decode(raw: &[u8]) -> Option<Self>;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn encode(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn decode(raw: &[u8]) -> Option<Self> {
                    raw.try_into().ok().map(<$ty>::from_le_bytes)
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Primitive for bool {
    const WIDTH: usize = 1;

    fn encode(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        match raw {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

// usize is stored as u64 so snapshots do not depend on the pointer width.
impl Primitive for usize {
    const WIDTH: usize = 8;

    fn encode(self, out: &mut Vec<u8>) {
        (self as u64).encode(out);
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        u64::decode(raw).and_then(|v| usize::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_widths() {
        assert_eq!(<u8 as Primitive>::WIDTH, 1);
        assert_eq!(<u128 as Primitive>::WIDTH, 16);
        assert_eq!(<f64 as Primitive>::WIDTH, 8);
        assert_eq!(<usize as Primitive>::WIDTH, 8);
    }

    #[test]
    fn test_float_bits_preserved() {
        let mut out = Vec::new();
        (-0.0f64).encode(&mut out);
        let back = f64::decode(&out).unwrap();
        assert_eq!(back.to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn test_bool_rejects_garbage() {
        assert_eq!(bool::decode(&[1]), Some(true));
        assert_eq!(bool::decode(&[0]), Some(false));
        assert_eq!(bool::decode(&[7]), None);
    }
}
