//! Stems, branches and the 60-term sexagenary cycle.
//!
//! All tables are compile-time constants. Table position is the index: a
//! `Sexagenary(i)` always renders as `SEXAGENARY_LABELS[i]`, so a label can
//! never drift away from its number.

use std::fmt;

/// The ten heavenly stems, in cycle order.
pub const STEM_LABELS: [&str; 10] = ["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛", "壬", "癸"];

/// The twelve earthly branches, in cycle order.
pub const BRANCH_LABELS: [&str; 12] = [
    "子", "丑", "寅", "卯", "辰", "巳", "午", "未", "申", "酉", "戌", "亥",
];

/// Entry `i` is `STEM_LABELS[i % 10]` followed by `BRANCH_LABELS[i % 12]`.
pub const SEXAGENARY_LABELS: [&str; 60] = [
    "甲子", "乙丑", "丙寅", "丁卯", "戊辰", "己巳", "庚午", "辛未", "壬申", "癸酉",
    "甲戌", "乙亥", "丙子", "丁丑", "戊寅", "己卯", "庚辰", "辛巳", "壬午", "癸未",
    "甲申", "乙酉", "丙戌", "丁亥", "戊子", "己丑", "庚寅", "辛卯", "壬辰", "癸巳",
    "甲午", "乙未", "丙申", "丁酉", "戊戌", "己亥", "庚子", "辛丑", "壬寅", "癸卯",
    "甲辰", "乙巳", "丙午", "丁未", "戊申", "己酉", "庚戌", "辛亥", "壬子", "癸丑",
    "甲寅", "乙卯", "丙辰", "丁巳", "戊午", "己未", "庚申", "辛酉", "壬戌", "癸亥",
];

/// Two-hour period labels, index-aligned with `BRANCH_LABELS`.
pub const SHICHEN_LABELS: [&str; 12] = [
    "子时", "丑时", "寅时", "卯时", "辰时", "巳时", "午时", "未时", "申时", "酉时", "戌时", "亥时",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stem {
    Jia,
    Yi,
    Bing,
    Ding,
    Wu,
    Ji,
    Geng,
    Xin,
    Ren,
    Gui,
}

pub const ALL_STEMS: [Stem; 10] = [
    Stem::Jia,
    Stem::Yi,
    Stem::Bing,
    Stem::Ding,
    Stem::Wu,
    Stem::Ji,
    Stem::Geng,
    Stem::Xin,
    Stem::Ren,
    Stem::Gui,
];

impl Stem {
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Stem at `index mod 10`.
    pub const fn from_index(index: u8) -> Self {
        ALL_STEMS[(index % 10) as usize]
    }

    pub const fn label(self) -> &'static str {
        STEM_LABELS[self as usize]
    }

    pub fn from_label(label: &str) -> Option<Self> {
        STEM_LABELS
            .iter()
            .position(|&s| s == label)
            .map(|i| ALL_STEMS[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Branch {
    Zi,
    Chou,
    Yin,
    Mao,
    Chen,
    Si,
    Wu,
    Wei,
    Shen,
    You,
    Xu,
    Hai,
}

pub const ALL_BRANCHES: [Branch; 12] = [
    Branch::Zi,
    Branch::Chou,
    Branch::Yin,
    Branch::Mao,
    Branch::Chen,
    Branch::Si,
    Branch::Wu,
    Branch::Wei,
    Branch::Shen,
    Branch::You,
    Branch::Xu,
    Branch::Hai,
];

impl Branch {
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Branch at `index mod 12`.
    pub const fn from_index(index: u8) -> Self {
        ALL_BRANCHES[(index % 12) as usize]
    }

    pub const fn label(self) -> &'static str {
        BRANCH_LABELS[self as usize]
    }

    pub fn from_label(label: &str) -> Option<Self> {
        BRANCH_LABELS
            .iter()
            .position(|&b| b == label)
            .map(|i| ALL_BRANCHES[i])
    }
}

/// Position 0..60 in the sexagenary cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sexagenary(u8);

impl Sexagenary {
    pub const COUNT: u8 = 60;

    pub const fn new(index: u8) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Combine a stem and a branch. Only pairs of equal parity exist in the
    /// cycle; the index is the unique `i` with `i % 10 == stem` and
    /// `i % 12 == branch`, which works out to `(6·stem − 5·branch) mod 60`.
    pub fn from_parts(stem: Stem, branch: Branch) -> Option<Self> {
        let s = stem.index() as i32;
        let b = branch.index() as i32;
        if s % 2 != b % 2 {
            return None;
        }
        Some(Self((6 * s - 5 * b).rem_euclid(60) as u8))
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn stem(self) -> Stem {
        Stem::from_index(self.0 % 10)
    }

    pub const fn branch(self) -> Branch {
        Branch::from_index(self.0 % 12)
    }

    pub const fn label(self) -> &'static str {
        SEXAGENARY_LABELS[self.0 as usize]
    }

    /// Step forward (or backward) around the cycle.
    pub fn offset(self, days: i64) -> Self {
        Self((self.0 as i64 + days).rem_euclid(60) as u8)
    }
}

impl fmt::Display for Sexagenary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the twelve two-hour periods of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shichen(u8);

impl Shichen {
    pub const COUNT: u8 = 12;

    pub const fn new(index: u8) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn from_branch(branch: Branch) -> Self {
        Self(branch.index())
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn branch(self) -> Branch {
        Branch::from_index(self.0)
    }

    pub const fn label(self) -> &'static str {
        SHICHEN_LABELS[self.0 as usize]
    }
}

impl fmt::Display for Shichen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
