//! MQ arithmetic decoder (ISO/IEC 15444-1 Annex C, decoder side).
//!
//! The exact mirror of the encoder: same probability table, same context
//! bank, same conditional-exchange rules. Used to validate round-trips
//! and, together with the length estimator, that truncated prefixes of a
//! terminated pass still decode. Running off the end of the input (or
//! into marker territory, 0xFF followed by a byte above 0x8F) synthesizes
//! 1 bits, which is exactly the padding every termination policy counts
//! on.

use crate::context::ContextBank;
use crate::error::MqError;
use crate::table::QE_TABLE;

pub struct MqDecoder {
    a: u16,
    c: u32,
    ct: u8,
    data: Vec<u8>,
    pos: usize,
    contexts: ContextBank,
}

impl MqDecoder {
    /// Build a decoder over a coded byte stream with one context per
    /// element of `initial_states`, which must match the encoder's.
    pub fn new(data: &[u8], initial_states: &[u8]) -> Result<Self, MqError> {
        let mut decoder = Self {
            a: 0,
            c: 0,
            ct: 0,
            data: data.to_vec(),
            pos: 0,
            contexts: ContextBank::new(initial_states)?,
        };
        decoder.init();
        Ok(decoder)
    }

    fn init(&mut self) {
        self.pos = 0;
        self.ct = 0;
        let first = self.data.first().copied().unwrap_or(0xFF);
        self.c = (first as u32) << 16;
        self.byte_in();
        self.c <<= 7;
        self.ct -= 7;
        self.a = 0x8000;
    }

    fn byte_in(&mut self) {
        if self.pos >= self.data.len() {
            // end of stream: synthesize 1 bits
            self.c += 0xFF00;
            self.ct = 8;
            return;
        }
        if self.data[self.pos] == 0xFF {
            let next = self.data.get(self.pos + 1).copied().unwrap_or(0xFF);
            if next > 0x8F {
                // marker territory: stop consuming, synthesize 1 bits
                self.c += 0xFF00;
                self.ct = 8;
            } else {
                // the byte after 0xFF carries 7 data bits, bit 7 is the
                // carry slot
                self.pos += 1;
                self.c += (self.data[self.pos] as u32) << 9;
                self.ct = 7;
            }
        } else {
            self.pos += 1;
            if self.pos < self.data.len() {
                self.c += (self.data[self.pos] as u32) << 8;
                self.ct = 8;
            } else {
                self.c += 0xFF00;
                self.ct = 8;
            }
        }
    }

    /// Decode one decision bit against a context.
    pub fn decode_symbol(&mut self, ctx: usize) -> u8 {
        let (index, mps) = self.contexts.state(ctx);
        let entry = &QE_TABLE[index as usize];
        let qe = entry.qe;
        self.a -= qe;
        let chigh = (self.c >> 16) as u16;
        if chigh < qe {
            // LPS sub-interval
            let bit;
            if self.a < qe {
                // conditional exchange: the smaller half belongs to the MPS
                bit = mps;
                self.contexts.set_index(ctx, entry.nmps);
            } else {
                bit = 1 - mps;
                if entry.switch != 0 {
                    self.contexts.flip_mps(ctx);
                }
                self.contexts.set_index(ctx, entry.nlps);
            }
            self.a = qe;
            self.renormalize();
            bit
        } else {
            self.c -= (qe as u32) << 16;
            if self.a & 0x8000 == 0 {
                let bit;
                if self.a < qe {
                    bit = 1 - mps;
                    if entry.switch != 0 {
                        self.contexts.flip_mps(ctx);
                    }
                    self.contexts.set_index(ctx, entry.nlps);
                } else {
                    bit = mps;
                    self.contexts.set_index(ctx, entry.nmps);
                }
                self.renormalize();
                bit
            } else {
                mps
            }
        }
    }

    /// Decode a batch of decisions against per-symbol contexts.
    pub fn decode_symbols(&mut self, contexts: &[usize]) -> Vec<u8> {
        contexts.iter().map(|&ctx| self.decode_symbol(ctx)).collect()
    }

    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    pub fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Restore one context to its initial distribution, MPS = 0.
    pub fn reset_context(&mut self, ctx: usize) {
        self.contexts.reset_one(ctx);
    }

    /// Restore every context to its initial distribution, MPS = 0.
    pub fn reset_all_contexts(&mut self) {
        self.contexts.reset_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_flush_golden_stream() {
        // eight LPS decisions against a fresh context, full flush
        let mut dec = MqDecoder::new(&[0xFF, 0x7F, 0xF0], &[0]).unwrap();
        for i in 0..8 {
            assert_eq!(dec.decode_symbol(0), 1, "symbol {i}");
        }
    }

    #[test]
    fn test_decode_pred_er_golden_stream() {
        let mut dec = MqDecoder::new(&[0xF9], &[0]).unwrap();
        for i in 0..8 {
            assert_eq!(dec.decode_symbol(0), 1, "symbol {i}");
        }
    }

    #[test]
    fn test_decode_from_padding_alone() {
        // the near-optimal termination of the same run emits nothing; the
        // synthesized 1 bits must reproduce it
        let mut dec = MqDecoder::new(&[], &[0]).unwrap();
        for i in 0..8 {
            assert_eq!(dec.decode_symbol(0), 1, "symbol {i}");
        }
    }
}
