// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stable array slot keys (fractional indexing).
//!
//! Array patches address slots by a [`StableKey`] instead of an integer index,
//! so a patch recorded in an old slice stays valid after later inserts and
//! removals. A key is a sequence of 16-bit *levels* rendered as fixed-width,
//! four-digit lowercase hex and concatenated. Because every level has the same
//! width, plain string order equals level-wise numeric order, and a key that is
//! a strict prefix of another sorts first.
//!
//! Allocation ([`StableKey::between`]) walks the levels of both neighbours and
//! stops at the first level with room, stepping by at most [`LEVEL_STEP`] from
//! the lower neighbour. Adjacent neighbours extend the key by one level.
//! Existing keys are never renumbered.
//!
//! Generated keys never end in a zero level. This guarantees that there is
//! always room below any key this module produced.
use core::fmt::Write as _;

use serde::Serialize;

/// Hex digits per level.
const LEVEL_WIDTH: usize = 4;
/// Exclusive upper bound of a level (one past `0xffff`).
const LEVEL_END: u32 = 0x1_0000;
/// Maximum distance between a lower neighbour and a freshly allocated level.
pub const LEVEL_STEP: u32 = 0x100;

/// Sortable key of an array slot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StableKey(String);

impl StableKey {
    /// Allocates a key strictly between `lower` and `upper`.
    ///
    /// `None` stands for the start (respectively end) of the array. The caller
    /// must pass `lower < upper` when both are present.
    pub fn between(lower: Option<&Self>, upper: Option<&Self>) -> Self {
        let lo = lower.map(Self::levels).unwrap_or_default();
        let hi = upper.map(Self::levels);
        let mut bounded = hi.is_some();
        let mut out: Vec<u16> = Vec::with_capacity(lo.len() + 1);

        for depth in 0.. {
            let a = lo.get(depth).map_or(0, |&level| u32::from(level));
            let b = if bounded {
                hi.as_ref()
                    .and_then(|h| h.get(depth))
                    .map_or(LEVEL_END, |&level| u32::from(level))
            } else {
                LEVEL_END
            };

            if b > a + 1 {
                let step = LEVEL_STEP.min((b - a) / 2).max(1);
                out.push(level_of(a + step));
                break;
            }
            out.push(level_of(a));
            if b == a + 1 {
                // Any extension of `a` stays below `b`.
                bounded = false;
            }
        }
        Self::from_levels(&out)
    }

    /// Allocates `count` ascending keys strictly between `lower` and `upper`.
    pub fn run_between(lower: Option<&Self>, upper: Option<&Self>, count: usize) -> Vec<Self> {
        let mut keys: Vec<Self> = Vec::with_capacity(count);
        for _ in 0..count {
            let key = Self::between(keys.last().or(lower), upper);
            keys.push(key);
        }
        keys
    }

    /// Returns the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of levels in this key.
    pub fn depth(&self) -> usize {
        self.0.len() / LEVEL_WIDTH
    }

    fn levels(&self) -> Vec<u16> {
        self.0
            .as_bytes()
            .chunks(LEVEL_WIDTH)
            .map(|chunk| {
                core::str::from_utf8(chunk)
                    .ok()
                    .and_then(|text| u16::from_str_radix(text, 16).ok())
                    .unwrap_or(0)
            })
            .collect()
    }

    fn from_levels(levels: &[u16]) -> Self {
        let mut text = String::with_capacity(levels.len() * LEVEL_WIDTH);
        for level in levels {
            let _ = write!(text, "{level:04x}");
        }
        Self(text)
    }
}

impl core::fmt::Display for StableKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn level_of(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
