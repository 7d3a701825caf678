//! Probability estimation state machine (ISO/IEC 15444-1 Table C-2).
//!
//! 47 states, each carrying the LPS probability estimate `qe` and the
//! next-state indices for MPS and LPS coding. State 46 is a terminal
//! high-probability state: both transition chains converge on it, so no
//! transition can ever leave the table.

/// One row of the probability state-transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QeEntry {
    /// LPS probability estimate (16 bit).
    pub qe: u16,
    /// Next state if the coded symbol was the MPS.
    pub nmps: u8,
    /// Next state if the coded symbol was the LPS.
    pub nlps: u8,
    /// If 1, the MPS sense flips after coding an LPS in this state.
    pub switch: u8,
}

macro_rules! q {
    ( $qe:expr , $nmps:expr , $nlps:expr , $sw:expr ) => {
        QeEntry {
            qe: $qe,
            nmps: $nmps,
            nlps: $nlps,
            switch: $sw,
        }
    };
}

/// Number of states in the probability model.
pub const NUM_STATES: usize = 47;

/// Index of the terminal state (uniform context floor).
pub const TERMINAL_STATE: u8 = 46;

#[rustfmt::skip]
pub const QE_TABLE: [QeEntry; NUM_STATES] = [
    q!(0x5601,  1,  1, 1),
    q!(0x3401,  2,  6, 0),
    q!(0x1801,  3,  9, 0),
    q!(0x0AC1,  4, 12, 0),
    q!(0x0521,  5, 29, 0),
    q!(0x0221, 38, 33, 0),
    q!(0x5601,  7,  6, 1),
    q!(0x5401,  8, 14, 0),
    q!(0x4801,  9, 14, 0),
    q!(0x3801, 10, 14, 0),
    q!(0x3001, 11, 17, 0),
    q!(0x2401, 12, 18, 0),
    q!(0x1C01, 13, 20, 0),
    q!(0x1601, 29, 21, 0),
    q!(0x5601, 15, 14, 1),
    q!(0x5401, 16, 14, 0),
    q!(0x5101, 17, 15, 0),
    q!(0x4801, 18, 16, 0),
    q!(0x3801, 19, 17, 0),
    q!(0x3401, 20, 18, 0),
    q!(0x3001, 21, 19, 0),
    q!(0x2801, 22, 19, 0),
    q!(0x2401, 23, 20, 0),
    q!(0x2201, 24, 21, 0),
    q!(0x1C01, 25, 22, 0),
    q!(0x1801, 26, 23, 0),
    q!(0x1601, 27, 24, 0),
    q!(0x1401, 28, 25, 0),
    q!(0x1201, 29, 26, 0),
    q!(0x1101, 30, 27, 0),
    q!(0x0AC1, 31, 28, 0),
    q!(0x09C1, 32, 29, 0),
    q!(0x08A1, 33, 30, 0),
    q!(0x0521, 34, 31, 0),
    q!(0x0441, 35, 32, 0),
    q!(0x02A1, 36, 33, 0),
    q!(0x0221, 37, 34, 0),
    q!(0x0141, 38, 35, 0),
    q!(0x0111, 39, 36, 0),
    q!(0x0085, 40, 37, 0),
    q!(0x0049, 41, 38, 0),
    q!(0x0025, 42, 39, 0),
    q!(0x0015, 43, 40, 0),
    q!(0x0009, 44, 41, 0),
    q!(0x0005, 45, 42, 0),
    q!(0x0001, 45, 43, 0),
    q!(0x5601, 46, 46, 0),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_transitions_stay_in_range() {
        for (i, entry) in QE_TABLE.iter().enumerate() {
            assert!((entry.nmps as usize) < NUM_STATES, "nmps out of range at {i}");
            assert!((entry.nlps as usize) < NUM_STATES, "nlps out of range at {i}");
            assert!(entry.switch <= 1, "switch flag not a bit at {i}");
        }
    }

    #[test]
    fn test_terminal_state_self_loops() {
        let term = QE_TABLE[TERMINAL_STATE as usize];
        assert_eq!(term.nmps, TERMINAL_STATE);
        assert_eq!(term.nlps, TERMINAL_STATE);
        assert_eq!(term.switch, 0);
    }

    #[test]
    fn test_every_state_reaches_terminal_floor() {
        // Following the MPS chain from any state must eventually hit a fixed
        // point without leaving the table.
        for start in 0..NUM_STATES {
            let mut idx = start;
            for _ in 0..2 * NUM_STATES {
                let next = QE_TABLE[idx].nmps as usize;
                if next == idx {
                    break;
                }
                idx = next;
            }
            let fixed = QE_TABLE[idx].nmps as usize;
            assert_eq!(fixed, idx, "MPS chain from {start} does not converge");
        }
    }
}
