use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Textual specification of iteration numbers: `"all"`, `"N"`, `"N-M"`
/// (inclusive) or `"N+"` (open-ended). Iterations are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IterationPattern {
    All,
    Exact(u32),
    Range(u32, u32),
    From(u32),
}

impl IterationPattern {
    pub fn matches(&self, iteration: u32) -> bool {
        match self {
            IterationPattern::All => true,
            IterationPattern::Exact(n) => iteration == *n,
            IterationPattern::Range(lo, hi) => iteration >= *lo && iteration <= *hi,
            IterationPattern::From(lo) => iteration >= *lo,
        }
    }

    /// The covered interval as `(lo, hi)` where `hi = None` means unbounded.
    pub fn bounds(&self) -> (u32, Option<u32>) {
        match self {
            IterationPattern::All => (1, None),
            IterationPattern::Exact(n) => (*n, Some(*n)),
            IterationPattern::Range(lo, hi) => (*lo, Some(*hi)),
            IterationPattern::From(lo) => (*lo, None),
        }
    }
}

impl FromStr for IterationPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(IterationPattern::All);
        }
        if let Some(base) = s.strip_suffix('+') {
            let lo: u32 = base
                .parse()
                .map_err(|_| format!("invalid iteration pattern: {:?}", s))?;
            if lo == 0 {
                return Err(format!("iteration pattern starts at 1: {:?}", s));
            }
            return Ok(IterationPattern::From(lo));
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let lo: u32 = lo
                .parse()
                .map_err(|_| format!("invalid iteration pattern: {:?}", s))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| format!("invalid iteration pattern: {:?}", s))?;
            if lo == 0 || hi < lo {
                return Err(format!("invalid iteration range: {:?}", s));
            }
            return Ok(IterationPattern::Range(lo, hi));
        }
        let n: u32 = s
            .parse()
            .map_err(|_| format!("invalid iteration pattern: {:?}", s))?;
        if n == 0 {
            return Err(format!("iteration pattern starts at 1: {:?}", s));
        }
        Ok(IterationPattern::Exact(n))
    }
}

impl TryFrom<String> for IterationPattern {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IterationPattern> for String {
    fn from(p: IterationPattern) -> Self {
        p.to_string()
    }
}

impl fmt::Display for IterationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationPattern::All => write!(f, "all"),
            IterationPattern::Exact(n) => write!(f, "{}", n),
            IterationPattern::Range(lo, hi) => write!(f, "{}-{}", lo, hi),
            IterationPattern::From(lo) => write!(f, "{}+", lo),
        }
    }
}
