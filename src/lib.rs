//! MQ binary arithmetic coder (ISO/IEC 15444-1 Annex C).
//!
//! Entropy-coding engine for context-modeled binary decisions: a 47-state
//! adaptive probability estimator, carry-propagating renormalization with
//! 0xFF byte stuffing, four stream-termination policies, and three
//! strategies for reporting how many bytes of the coded stream suffice to
//! decode everything coded so far (the truncation points of embedded,
//! truncatable coding passes).
//!
//! The crate is split into:
//!
//! - `table`: the immutable probability state-transition table.
//! - `context`: per-context adaptive state (table index + MPS sense).
//! - `byte_buffer`: the append-only byte sink the engine writes into.
//! - `encoder`: the coding engine, terminator, and length estimator.
//! - `decoder`: the matching decoder, used to validate round-trips and
//!   truncated-prefix decodability.
//!
//! Framing of the coded bytes (packet headers, markers) is entirely the
//! caller's concern; the coder produces and consumes an undifferentiated
//! byte stream.

pub mod byte_buffer;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod table;

pub use byte_buffer::ByteOutputBuffer;
pub use decoder::MqDecoder;
pub use encoder::MqEncoder;
pub use error::MqError;

use num_enum::TryFromPrimitive;

/// How a coding pass is flushed into final bytes.
///
/// Selected once per coder instance; every policy leaves the coder
/// registers reinitialized and the context probability states untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Termination {
    /// Full flush: pad the last byte with 1 bits and push every register
    /// bit out. Simplest, may cost an extra byte.
    Full = 0,
    /// Shortest stream such that a decoder padding the truncated stream
    /// with 1 bits still decodes correctly.
    NearOptimal = 1,
    /// Minimal flush with the spare bits of the last byte forced to 1.
    Easy = 2,
    /// Like `Easy` but the spare bits keep their computed values, so an
    /// error-resilient decoder can cross-check them.
    PredictableError = 3,
}

impl Termination {
    /// Fail-fast conversion from a loose integer policy code.
    pub fn from_code(code: u8) -> Result<Self, MqError> {
        Self::try_from(code).map_err(|_| MqError::InvalidTerminationPolicy(code))
    }
}

/// How `num_coded_bytes` estimates the decodable length mid-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum LengthComputation {
    /// Closed-form bound from the pending bit count. Loose.
    Lazy = 0,
    /// Like `Lazy` but aware of 0xFF stuffing in the staged byte. Tighter.
    LazyGood = 1,
    /// Exact: snapshots the registers per query and resolves the minimal
    /// truncation lengths once the pass is terminated.
    NearOptimal = 2,
}

impl LengthComputation {
    /// Fail-fast conversion from a loose integer policy code.
    pub fn from_code(code: u8) -> Result<Self, MqError> {
        Self::try_from(code).map_err(|_| MqError::InvalidLengthPolicy(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_codes_round_trip() {
        assert_eq!(Termination::from_code(0).unwrap(), Termination::Full);
        assert_eq!(Termination::from_code(3).unwrap(), Termination::PredictableError);
        assert_eq!(
            Termination::from_code(4).unwrap_err(),
            MqError::InvalidTerminationPolicy(4)
        );
        assert_eq!(
            LengthComputation::from_code(2).unwrap(),
            LengthComputation::NearOptimal
        );
        assert_eq!(
            LengthComputation::from_code(9).unwrap_err(),
            MqError::InvalidLengthPolicy(9)
        );
    }
}
