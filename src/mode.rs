//! Pacing modes and their wire codes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Pacing modes understood by the device, in wire-code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    Aoo,
    Voo,
    Aai,
    Vvi,
    Aoor,
    Voor,
    Aair,
    Vvir,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pacing mode '{0}'")]
pub struct UnknownMode(pub String);

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Aoo,
        Mode::Voo,
        Mode::Aai,
        Mode::Vvi,
        Mode::Aoor,
        Mode::Voor,
        Mode::Aair,
        Mode::Vvir,
    ];

    /// The byte sent in the mode slot of a SET frame.
    pub fn wire_code(self) -> u8 {
        match self {
            Mode::Aoo => 0,
            Mode::Voo => 1,
            Mode::Aai => 2,
            Mode::Vvi => 3,
            Mode::Aoor => 4,
            Mode::Voor => 5,
            Mode::Aair => 6,
            Mode::Vvir => 7,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Mode> {
        Mode::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Aoo => "AOO",
            Mode::Voo => "VOO",
            Mode::Aai => "AAI",
            Mode::Vvi => "VVI",
            Mode::Aoor => "AOOR",
            Mode::Voor => "VOOR",
            Mode::Aair => "AAIR",
            Mode::Vvir => "VVIR",
        }
    }

    /// Operator-facing one-line description.
    pub fn description(self) -> &'static str {
        match self {
            Mode::Aoo => "Asynchronous atrial pacing",
            Mode::Voo => "Asynchronous ventricular pacing",
            Mode::Aai => "Atrial sensing, pace if needed",
            Mode::Vvi => "Ventricular sensing, pace if needed",
            Mode::Aoor => "Asynchronous atrial pacing, rate adaptive",
            Mode::Voor => "Asynchronous ventricular pacing, rate adaptive",
            Mode::Aair => "Atrial sensing, pace if needed, rate adaptive",
            Mode::Vvir => "Ventricular sensing, pace if needed, rate adaptive",
        }
    }

    pub fn is_rate_adaptive(self) -> bool {
        matches!(self, Mode::Aoor | Mode::Voor | Mode::Aair | Mode::Vvir)
    }

    pub fn paces_atrium(self) -> bool {
        matches!(self, Mode::Aoo | Mode::Aai | Mode::Aoor | Mode::Aair)
    }

    /// Demand (inhibited) modes sense the paced chamber; asynchronous ones do not.
    pub fn senses(self) -> bool {
        matches!(self, Mode::Aai | Mode::Vvi | Mode::Aair | Mode::Vvir)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Mode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// A set of modes packed into one byte, bit `n` standing for wire code `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ModeSet(u8);

impl ModeSet {
    pub const EMPTY: ModeSet = ModeSet(0);
    pub const ALL: ModeSet = ModeSet(0xFF);

    pub fn insert(&mut self, mode: Mode) {
        self.0 |= 1 << mode.wire_code();
    }

    pub fn contains(self, mode: Mode) -> bool {
        self.0 & (1 << mode.wire_code()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Mode> {
        Mode::ALL.into_iter().filter(move |mode| self.contains(*mode))
    }
}

impl FromIterator<Mode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = Mode>>(iter: I) -> Self {
        let mut set = ModeSet::EMPTY;
        for mode in iter {
            set.insert(mode);
        }
        set
    }
}
