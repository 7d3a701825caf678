//! Per-context adaptive probability state.
//!
//! Each context the caller defines owns a current index into the shared
//! probability table plus the current more-probable-symbol sense. The bank
//! is laid out as two parallel arrays indexed by context handle, so symbol
//! coding touches two adjacent byte arrays instead of chasing per-context
//! allocations.

use crate::error::MqError;
use crate::table::NUM_STATES;

#[derive(Debug)]
pub struct ContextBank {
    index: Vec<u8>,
    mps: Vec<u8>,
    initial: Vec<u8>,
}

impl ContextBank {
    /// Build a bank with one entry per element of `initial_states`. Every
    /// context starts at its supplied table index with MPS = 0.
    pub fn new(initial_states: &[u8]) -> Result<Self, MqError> {
        if initial_states.is_empty() {
            return Err(MqError::NoContexts);
        }
        for (context, &state) in initial_states.iter().enumerate() {
            if state as usize >= NUM_STATES {
                return Err(MqError::InvalidInitialState { context, state });
            }
        }
        Ok(Self {
            index: initial_states.to_vec(),
            mps: vec![0; initial_states.len()],
            initial: initial_states.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn state(&self, ctx: usize) -> (u8, u8) {
        (self.index[ctx], self.mps[ctx])
    }

    #[inline]
    pub fn set_index(&mut self, ctx: usize, index: u8) {
        self.index[ctx] = index;
    }

    #[inline]
    pub fn flip_mps(&mut self, ctx: usize) {
        self.mps[ctx] = 1 - self.mps[ctx];
    }

    /// Restore one context to its initial distribution, MPS = 0.
    pub fn reset_one(&mut self, ctx: usize) {
        self.index[ctx] = self.initial[ctx];
        self.mps[ctx] = 0;
    }

    /// Restore every context to its initial distribution, MPS = 0.
    pub fn reset_all(&mut self) {
        self.index.copy_from_slice(&self.initial);
        self.mps.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_rejects_out_of_table_state() {
        let err = ContextBank::new(&[0, 47]).unwrap_err();
        assert_eq!(
            err,
            MqError::InvalidInitialState {
                context: 1,
                state: 47
            }
        );
    }

    #[test]
    fn test_bank_rejects_empty() {
        assert_eq!(ContextBank::new(&[]).unwrap_err(), MqError::NoContexts);
    }

    #[test]
    fn test_reset_restores_initial_distribution() {
        let mut bank = ContextBank::new(&[3, 46, 0]).unwrap();
        bank.set_index(0, 10);
        bank.flip_mps(0);
        bank.set_index(2, 5);
        bank.reset_one(0);
        assert_eq!(bank.state(0), (3, 0));
        assert_eq!(bank.state(2), (5, 0));
        bank.reset_all();
        assert_eq!(bank.state(1), (46, 0));
        assert_eq!(bank.state(2), (0, 0));
    }
}
