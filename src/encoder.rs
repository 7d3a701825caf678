//! MQ arithmetic coding engine (ISO/IEC 15444-1 Annex C, encoder side).
//!
//! Owns the interval register `A`, the code register `C`, the shift
//! counter `CT`, the staged output byte `B`, and the append-only byte
//! sink. Symbol coding mutates a context's adaptive state and emits
//! finalized bytes through renormalization; 0xFF bytes are stuffed so the
//! stream stays free of marker-colliding sequences (no 0xFF followed by a
//! byte above 0x8F).
//!
//! Register layout: `C` holds a 27-bit payload; a byte is extracted from
//! bits 26..19 (bits 27..20 after a stuffed 0xFF, where bit 27 is the
//! carry slot). `A` stays in `[0x8000, 0x10000)` between operations.

use crate::byte_buffer::ByteOutputBuffer;
use crate::context::ContextBank;
use crate::error::MqError;
use crate::table::QE_TABLE;
use crate::{LengthComputation, Termination};

#[cfg(feature = "trace")]
use tracing::trace;

/// Register snapshot taken at a `num_coded_bytes` query under the
/// near-optimal length policy, resolved after termination.
#[derive(Debug, Clone, Copy)]
struct SavedState {
    c: u32,
    ct: u8,
    a: u16,
    b: u8,
    delayed_ff: bool,
    /// A byte was staged at snapshot time (`bytes_written >= 0`).
    staged: bool,
    /// Bytes committed to the sink at snapshot time, pass-relative.
    committed: usize,
}

#[derive(Debug)]
pub struct MqEncoder {
    /// Interval width register.
    a: u16,
    /// Code accumulator; 27-bit payload plus one carry bit.
    c: u32,
    /// Shifts remaining before the next byte extraction.
    ct: u8,
    /// Staged byte, held back for carry resolution and 0xFF stuffing.
    b: u8,
    /// A 0xFF byte is withheld until the byte after it is carry-safe.
    delayed_ff: bool,
    /// Committed bytes this pass; -1 until the first byte is staged.
    bytes_written: i64,

    sink: ByteOutputBuffer,
    contexts: ContextBank,

    termination: Termination,
    length: LengthComputation,

    saved: Vec<SavedState>,
    /// Sink offset where the current pass began.
    pass_start: usize,
    /// Sink offset and length of the most recently terminated pass.
    finalize_base: usize,
    terminated_len: usize,
}

impl MqEncoder {
    /// Build a coder with one context per element of `initial_states`
    /// (each an index into the probability table, MPS = 0).
    pub fn new(initial_states: &[u8]) -> Result<Self, MqError> {
        Ok(Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            b: 0,
            delayed_ff: false,
            bytes_written: -1,
            sink: ByteOutputBuffer::new(),
            contexts: ContextBank::new(initial_states)?,
            termination: Termination::Full,
            length: LengthComputation::NearOptimal,
            saved: Vec::new(),
            pass_start: 0,
            finalize_base: 0,
            terminated_len: 0,
        })
    }

    /// Select the termination policy. Applies from the next `terminate`.
    pub fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }

    /// Select the length computation policy.
    pub fn set_length_computation(&mut self, length: LengthComputation) {
        self.length = length;
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn length_computation(&self) -> LengthComputation {
        self.length
    }

    pub fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// All bytes committed to the sink since construction or `reset`,
    /// terminated passes included.
    pub fn coded_bytes(&self) -> &[u8] {
        self.sink.as_slice()
    }

    pub fn sink(&self) -> &ByteOutputBuffer {
        &self.sink
    }

    fn committed(&self) -> usize {
        self.bytes_written.max(0) as usize
    }

    /// Code one decision bit against a context.
    pub fn code_symbol(&mut self, bit: u8, ctx: usize) {
        debug_assert!(bit <= 1);
        let (index, mps) = self.contexts.state(ctx);
        let entry = &QE_TABLE[index as usize];
        let qe = entry.qe;
        if bit == mps {
            self.a -= qe;
            if self.a & 0x8000 != 0 {
                // interval still normalized, no state change
                self.c += qe as u32;
                return;
            }
            if self.a < qe {
                // conditional exchange: the MPS keeps the smaller half
                self.a = qe;
            } else {
                self.c += qe as u32;
            }
            self.contexts.set_index(ctx, entry.nmps);
            // the MPS sub-interval is always at least a quarter wide, so a
            // single shift renormalizes
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
        } else {
            self.a -= qe;
            if self.a < qe {
                self.c += qe as u32;
            } else {
                self.a = qe;
            }
            if entry.switch != 0 {
                self.contexts.flip_mps(ctx);
            }
            self.contexts.set_index(ctx, entry.nlps);
            loop {
                self.a <<= 1;
                self.c <<= 1;
                self.ct -= 1;
                if self.ct == 0 {
                    self.byte_out();
                }
                if self.a & 0x8000 != 0 {
                    break;
                }
            }
        }
    }

    /// Code a batch of decisions; identical to repeated `code_symbol`.
    pub fn code_symbols(&mut self, bits: &[u8], contexts: &[usize]) {
        assert_eq!(
            bits.len(),
            contexts.len(),
            "bit and context slices must pair up"
        );
        for (&bit, &ctx) in bits.iter().zip(contexts) {
            self.code_symbol(bit, ctx);
        }
    }

    /// Code `n` copies of the same decision against one context,
    /// byte-for-byte identical to `n` `code_symbol` calls. Runs of MPS
    /// symbols that fit in the current interval are coded in one step.
    pub fn code_symbols_fast(&mut self, bit: u8, ctx: usize, mut n: usize) {
        debug_assert!(bit <= 1);
        while n > 0 {
            let (index, mps) = self.contexts.state(ctx);
            if bit != mps {
                self.code_symbol(bit, ctx);
                n -= 1;
                continue;
            }
            let qe = QE_TABLE[index as usize].qe;
            // MPS symbols codeable before A drops below 0x8000
            let headroom = ((self.a - 0x8000) / qe) as usize;
            let run = headroom.min(n);
            if run > 0 {
                let step = qe as u32 * run as u32;
                self.a -= step as u16;
                self.c += step;
                n -= run;
                if n == 0 {
                    break;
                }
            }
            // the next MPS forces the renormalization path
            self.code_symbol(bit, ctx);
            n -= 1;
        }
    }

    /// Extract the next finalized byte from the top of `C` into the staged
    /// byte, resolving carries and 0xFF stuffing.
    fn byte_out(&mut self) {
        if self.bytes_written < 0 {
            // first byte of the pass: stage it, commit nothing yet
            self.b = (self.c >> 19) as u8;
            self.c &= 0x7_FFFF;
            self.ct = 8;
            self.bytes_written = 0;
            return;
        }
        if self.b == 0xFF {
            // a staged 0xFF cannot be committed until the next byte rules
            // out a carry; that byte keeps bit 7 free as the carry slot
            debug_assert!(!self.delayed_ff);
            self.delayed_ff = true;
            self.b = (self.c >> 20) as u8;
            self.c &= 0xF_FFFF;
            self.ct = 7;
            return;
        }
        if self.c < 0x800_0000 {
            self.commit_staged();
            self.b = (self.c >> 19) as u8;
            self.c &= 0x7_FFFF;
            self.ct = 8;
            return;
        }
        // carry into the staged byte
        self.b += 1;
        if self.b == 0xFF {
            self.c &= 0x7FF_FFFF;
            self.delayed_ff = true;
            self.b = (self.c >> 20) as u8;
            self.c &= 0xF_FFFF;
            self.ct = 7;
        } else {
            self.commit_staged();
            self.b = (self.c >> 19) as u8;
            self.c &= 0x7_FFFF;
            self.ct = 8;
        }
    }

    fn commit_staged(&mut self) {
        if self.delayed_ff {
            self.sink.write(0xFF);
            self.bytes_written += 1;
            self.delayed_ff = false;
        }
        #[cfg(feature = "trace")]
        trace!(byte = self.b, total = self.bytes_written + 1, "byte committed");
        self.sink.write(self.b);
        self.bytes_written += 1;
    }

    /// Provisional number of sink bytes sufficient to decode everything
    /// coded so far, under the active length policy.
    pub fn num_coded_bytes(&mut self) -> usize {
        let committed = self.committed();
        match self.length {
            LengthComputation::Lazy => {
                let pending = 27 - self.ct as i32;
                committed + if pending <= 22 { 3 } else { 4 }
            }
            LengthComputation::LazyGood => {
                if self.bytes_written < 0 {
                    // everything still fits in the register; two bytes
                    // always cover the significant bits
                    return 2;
                }
                // bits of C that must still reach the stream, plus the
                // payload width of the byte following the staged one
                let pending = 13 - self.ct as i32;
                let first = if self.b == 0xFF { 7 } else { 8 };
                let extra = if pending <= first { 2 } else { 3 };
                committed + extra + usize::from(self.delayed_ff)
            }
            LengthComputation::NearOptimal => {
                self.saved.push(SavedState {
                    c: self.c,
                    ct: self.ct,
                    a: self.a,
                    b: self.b,
                    delayed_ff: self.delayed_ff,
                    staged: self.bytes_written >= 0,
                    committed,
                });
                committed
            }
        }
    }

    /// Flush the pass under the active termination policy and return its
    /// byte length. Registers restart; context states are untouched.
    pub fn terminate(&mut self) -> usize {
        match self.termination {
            Termination::Full => self.terminate_full(),
            Termination::Easy => self.terminate_easy_family(true),
            Termination::PredictableError => self.terminate_easy_family(false),
            Termination::NearOptimal => self.terminate_near_optimal(),
        }
        let len = self.sink.len() - self.pass_start;
        #[cfg(feature = "trace")]
        trace!(policy = ?self.termination, len, "pass terminated");
        self.finalize_base = self.pass_start;
        self.terminated_len = len;
        self.pass_start = self.sink.len();
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        self.b = 0;
        self.delayed_ff = false;
        self.bytes_written = -1;
        len
    }

    fn terminate_full(&mut self) {
        // SETBITS: the largest value below C + A whose trailing bits are
        // all ones, so the bits never emitted match decoder padding
        let top = self.c + self.a as u32;
        self.c |= 0xFFFF;
        if self.c >= top {
            self.c -= 0x8000;
        }
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
        // commit the remainder unless it is trailing 0xFF padding, which
        // the decoder reconstructs on its own
        if self.b != 0xFF {
            if self.delayed_ff {
                self.sink.write(0xFF);
                self.bytes_written += 1;
            }
            self.sink.write(self.b);
            self.bytes_written += 1;
        }
    }

    fn terminate_easy_family(&mut self, set_spare_bits: bool) {
        // push out at least (11 - CT) + 1 pending bits, in whole bytes
        let mut k = 12 - self.ct as i32;
        while k > 0 {
            let shift = self.ct;
            self.c <<= shift;
            k -= shift as i32;
            self.byte_out();
        }
        if set_spare_bits && k < 0 {
            // force the overshoot bits of the staged byte to 1
            let spare = (-k) as u32;
            self.b |= (((1u32 << spare) - 1) & 0xFF) as u8;
        }
        // push the staged byte itself
        self.byte_out();
    }

    /// Shortest termination: expand the interval bounds `C` and `C + A`
    /// through the same byte-extraction cadence as `byte_out` and emit
    /// bytes only until their next output bytes diverge. From there a
    /// decoder padding with 1 bits is unambiguous.
    fn terminate_near_optimal(&mut self) {
        let cc_low = (self.c as u64) << self.ct;
        let cc_up = (self.c as u64 + self.a as u64) << self.ct;
        let (mut slot_low, mut slot_up): (u32, u32);
        let (mut w_low, mut w_up): (u64, u64);
        if self.bytes_written < 0 {
            // nothing staged: the first extraction happens here
            slot_low = (cc_low >> 19) as u32;
            w_low = (cc_low & 0x7_FFFF) << 8;
            slot_up = (cc_up >> 19) as u32;
            w_up = (cc_up & 0x7_FFFF) << 8;
        } else {
            slot_low = self.b as u32 + (cc_low >> 27) as u32;
            w_low = cc_low & 0x7FF_FFFF;
            slot_up = self.b as u32 + (cc_up >> 27) as u32;
            w_up = cc_up & 0x7FF_FFFF;
        }
        debug_assert!(slot_low <= slot_up);
        if slot_up >= 0x100 {
            // the upper bound carries past every pending byte: the
            // committed prefix already pins the interval
            return;
        }
        if self.delayed_ff {
            self.sink.write(0xFF);
            self.bytes_written += 1;
        }
        loop {
            if slot_up > slot_low {
                // bounds diverge at this byte: emit the lower one and stop
                self.sink.write(slot_low as u8);
                self.bytes_written += 1;
                return;
            }
            // identical next byte for both bounds: emit it and refill
            self.sink.write(slot_low as u8);
            self.bytes_written += 1;
            if slot_low == 0xFF {
                slot_low = (w_low >> 20) as u32;
                w_low = (w_low & 0xF_FFFF) << 7;
                slot_up = (w_up >> 20) as u32;
                w_up = (w_up & 0xF_FFFF) << 7;
            } else {
                slot_low = (w_low >> 19) as u32;
                w_low = (w_low & 0x7_FFFF) << 8;
                slot_up = (w_up >> 19) as u32;
                w_up = (w_up & 0x7_FFFF) << 8;
            }
        }
    }

    /// Correct a caller-held array of provisional lengths after the pass
    /// has been terminated. Under the near-optimal policy this resolves
    /// every saved checkpoint against the actual terminated bytes; under
    /// the lazy policies it only clamps to the terminated length.
    pub fn finish_length_calculation(&mut self, rates: &mut [usize], n: usize) {
        let n = n.min(rates.len());
        match self.length {
            LengthComputation::Lazy | LengthComputation::LazyGood => {
                for rate in rates[..n].iter_mut() {
                    if *rate > self.terminated_len {
                        *rate = self.terminated_len;
                    }
                }
            }
            LengthComputation::NearOptimal => {
                assert!(
                    n <= self.saved.len(),
                    "more rates to finalize than saved checkpoints"
                );
                let mut prev = 0;
                for i in 0..n {
                    let snapshot = self.saved[i];
                    let len = self.min_decodable_len(&snapshot);
                    rates[i] = len.max(prev).min(self.terminated_len);
                    prev = rates[i];
                }
                self.saved.clear();
            }
        }
    }

    /// Minimal prefix of the terminated pass that decodes everything coded
    /// up to `snapshot`: walk the upper bound `C + A` through the byte
    /// cadence of the actual stream until it exceeds an actual byte.
    fn min_decodable_len(&self, snapshot: &SavedState) -> usize {
        let total = self.terminated_len;
        let byte_at = |i: usize| self.sink.byte_at(self.finalize_base + i);
        let strip = |mut t: usize| {
            // a trailing 0xFF decodes identically to truncation
            while t > 0 && byte_at(t - 1) == 0xFF {
                t -= 1;
            }
            t
        };

        let cc_up = (snapshot.c as u64 + snapshot.a as u64) << snapshot.ct;
        let mut slot_up: u32;
        let mut w_up: u64;
        if snapshot.staged {
            slot_up = snapshot.b as u32 + (cc_up >> 27) as u32;
            w_up = cc_up & 0x7FF_FFFF;
        } else {
            debug_assert!(!snapshot.delayed_ff);
            slot_up = (cc_up >> 19) as u32;
            w_up = (cc_up & 0x7_FFFF) << 8;
        }

        let mut pos = snapshot.committed;
        if snapshot.delayed_ff {
            if slot_up >= 0x100 {
                // carry ripples through the delayed 0xFF and out of the
                // pending region
                return strip(pos);
            }
            if pos >= total {
                return total;
            }
            debug_assert_eq!(byte_at(pos), 0xFF);
            pos += 1;
        }
        loop {
            if slot_up >= 0x100 {
                return strip(pos);
            }
            if pos >= total {
                // every termination policy guarantees divergence within
                // the stream; never report past its end
                return total;
            }
            let actual = byte_at(pos) as u32;
            if slot_up > actual {
                return strip(pos + 1);
            }
            debug_assert_eq!(slot_up, actual);
            if actual == 0xFF {
                slot_up = (w_up >> 20) as u32;
                w_up = (w_up & 0xF_FFFF) << 7;
            } else {
                slot_up = (w_up >> 19) as u32;
                w_up = (w_up & 0x7_FFFF) << 8;
            }
            pos += 1;
        }
    }

    /// Restore one context to its initial distribution, MPS = 0.
    pub fn reset_context(&mut self, ctx: usize) {
        self.contexts.reset_one(ctx);
    }

    /// Restore every context to its initial distribution, MPS = 0.
    pub fn reset_all_contexts(&mut self) {
        self.contexts.reset_all();
    }

    /// Full reinitialization: registers, contexts, saved checkpoints, and
    /// the sink. Nothing coded before the reset survives.
    pub fn reset(&mut self) {
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        self.b = 0;
        self.delayed_ff = false;
        self.bytes_written = -1;
        self.sink.reset();
        self.contexts.reset_all();
        self.saved.clear();
        self.pass_start = 0;
        self.finalize_base = 0;
        self.terminated_len = 0;
    }

    #[cfg(test)]
    pub(crate) fn registers(&self) -> (u16, u32, u8) {
        (self.a, self.c, self.ct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_registers() {
        let enc = MqEncoder::new(&[0]).unwrap();
        let (a, c, ct) = enc.registers();
        assert_eq!(a, 0x8000);
        assert_eq!(c, 0);
        assert_eq!(ct, 12);
    }

    #[test]
    fn test_rejects_invalid_initial_state() {
        assert_eq!(
            MqEncoder::new(&[0, 50]).unwrap_err(),
            MqError::InvalidInitialState {
                context: 1,
                state: 50
            }
        );
    }

    /// Eight LPS decisions against a fresh context, full flush. The bytes
    /// are a fixed regression anchor.
    #[test]
    fn test_full_termination_golden_lps_run() {
        let mut enc = MqEncoder::new(&[0]).unwrap();
        enc.set_termination(Termination::Full);
        for _ in 0..8 {
            enc.code_symbol(1, 0);
        }
        let len = enc.terminate();
        assert_eq!(len, 3);
        assert_eq!(enc.coded_bytes(), &[0xFF, 0x7F, 0xF0]);
    }

    #[test]
    fn test_pred_er_termination_golden_lps_run() {
        let mut enc = MqEncoder::new(&[0]).unwrap();
        enc.set_termination(Termination::PredictableError);
        for _ in 0..8 {
            enc.code_symbol(1, 0);
        }
        assert_eq!(enc.terminate(), 1);
        assert_eq!(enc.coded_bytes(), &[0xF9]);
    }

    #[test]
    fn test_easy_and_near_opt_drop_reconstructible_tail() {
        // the same eight LPS decisions leave an interval wide enough that
        // decoder padding alone reproduces them
        for termination in [Termination::Easy, Termination::NearOptimal] {
            let mut enc = MqEncoder::new(&[0]).unwrap();
            enc.set_termination(termination);
            for _ in 0..8 {
                enc.code_symbol(1, 0);
            }
            assert_eq!(enc.terminate(), 0, "termination {termination:?}");
        }
    }

    #[test]
    fn test_empty_pass_lengths() {
        let cases = [
            (Termination::Full, 3),
            (Termination::Easy, 0),
            (Termination::PredictableError, 0),
            (Termination::NearOptimal, 0),
        ];
        for (termination, expected) in cases {
            let mut enc = MqEncoder::new(&[0, 3, 46]).unwrap();
            enc.set_termination(termination);
            assert_eq!(enc.terminate(), expected, "termination {termination:?}");
        }
        // the full flush of an empty pass is all padding
        let mut enc = MqEncoder::new(&[0]).unwrap();
        enc.set_termination(Termination::Full);
        enc.terminate();
        assert_eq!(enc.coded_bytes(), &[0xFF, 0x7F, 0x00]);
    }

    #[test]
    fn test_interval_register_stays_normalized() {
        let mut enc = MqEncoder::new(&[0, 14, 3]).unwrap();
        let mut state = 0x2F6E_1A09u32;
        for _ in 0..4000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let bit = ((state >> 16) & 1) as u8;
            let ctx = (state >> 20) as usize % 3;
            enc.code_symbol(bit, ctx);
            let (a, _, ct) = enc.registers();
            assert!(a >= 0x8000, "A fell below 0x8000");
            assert!((1..=12).contains(&ct), "CT out of range: {ct}");
        }
    }

    #[test]
    fn test_fast_path_matches_single_steps() {
        let mut slow = MqEncoder::new(&[0, 8]).unwrap();
        let mut fast = MqEncoder::new(&[0, 8]).unwrap();
        // interleave runs of both senses over two contexts
        for (bit, ctx, n) in [
            (0u8, 0usize, 13usize),
            (1, 0, 2),
            (0, 1, 400),
            (1, 1, 1),
            (0, 0, 77),
            (0, 1, 1000),
        ] {
            for _ in 0..n {
                slow.code_symbol(bit, ctx);
            }
            fast.code_symbols_fast(bit, ctx, n);
        }
        let slow_len = slow.terminate();
        let fast_len = fast.terminate();
        assert_eq!(slow_len, fast_len);
        assert_eq!(slow.coded_bytes(), fast.coded_bytes());
    }

    #[test]
    fn test_reset_reproduces_fresh_coder_output() {
        let bits: Vec<u8> = (0..200).map(|i| ((i * 7) % 5 == 0) as u8).collect();
        let contexts: Vec<usize> = (0..200).map(|i| i % 2).collect();

        let mut fresh = MqEncoder::new(&[0, 17]).unwrap();
        fresh.code_symbols(&bits, &contexts);
        let fresh_len = fresh.terminate();

        let mut reused = MqEncoder::new(&[0, 17]).unwrap();
        let other_bits: Vec<u8> = contexts.iter().map(|&c| (c & 1) as u8).collect();
        reused.code_symbols(&other_bits, &contexts);
        reused.terminate();
        reused.reset();
        reused.code_symbols(&bits, &contexts);
        let reused_len = reused.terminate();

        assert_eq!(fresh_len, reused_len);
        assert_eq!(fresh.coded_bytes(), reused.coded_bytes());
    }

    #[test]
    fn test_batch_form_matches_single_calls() {
        let bits: Vec<u8> = (0..64).map(|i: u32| (i.count_ones() & 1) as u8).collect();
        let contexts: Vec<usize> = (0..64).map(|i| i % 4).collect();
        let mut single = MqEncoder::new(&[0, 3, 14, 46]).unwrap();
        for (&bit, &ctx) in bits.iter().zip(&contexts) {
            single.code_symbol(bit, ctx);
        }
        let mut batch = MqEncoder::new(&[0, 3, 14, 46]).unwrap();
        batch.code_symbols(&bits, &contexts);
        single.terminate();
        batch.terminate();
        assert_eq!(single.coded_bytes(), batch.coded_bytes());
    }
}
