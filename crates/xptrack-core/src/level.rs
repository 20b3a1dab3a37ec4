//! Level <-> XP conversion.
//!
//! The XP required to reach `level` is the closed form of the per-level
//! requirement `5 l^2 + 50 l + 100` summed over all lower levels:
//! `xp(l) = 5 l (2 l^2 + 27 l + 91) / 6`, which is always an integer.

/// Highest level the conversions accept.
pub const MAX_LEVEL: i64 = 10_000;

/// Total XP needed to reach `level` (clamped to `0..=MAX_LEVEL`).
#[must_use]
pub const fn level_to_xp(level: i64) -> i64 {
    let l = if level < 0 {
        0
    } else if level > MAX_LEVEL {
        MAX_LEVEL
    } else {
        level
    };
    5 * l * (2 * l * l + 27 * l + 91) / 6
}

/// The highest level whose requirement does not exceed `xp`.
#[must_use]
pub fn xp_to_level(xp: i64) -> i64 {
    if xp <= 0 {
        return 0;
    }
    if xp >= level_to_xp(MAX_LEVEL) {
        return MAX_LEVEL;
    }

    // Invariant: level_to_xp(lo) <= xp < level_to_xp(hi).
    let (mut lo, mut hi) = (0, MAX_LEVEL);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if level_to_xp(mid) <= xp {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}
