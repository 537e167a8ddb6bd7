//! Release-version matching for lock verification
//!
//! Understands PEP 440 comparison clauses (`>=`, `<`, `==`, `!=`, `~=`, `===`, `.*`
//! wildcards) and Poetry's `^`, `~` and bare-version forms, joined with `,` or spaces
//! (and) and `||` (or). Only the release segment of a version is compared; pre-release
//! and local suffixes are ignored.

use std::cmp::Ordering;

/// Numeric release segment, e.g. `0.110.0` is `[0, 110, 0]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release(Vec<u64>);

impl Release {
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.trim().trim_start_matches('v');
        let mut parts = Vec::new();
        for segment in version.split('.') {
            let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            parts.push(digits.parse().ok()?);
            if digits.len() != segment.len() {
                break;
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts))
        }
    }

    fn segment(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// `self` with segment `index` incremented and everything after it dropped
    fn bump(&self, index: usize) -> Self {
        let mut parts: Vec<u64> = (0..=index).map(|i| self.segment(i)).collect();
        parts[index] += 1;
        Self(parts)
    }

    fn starts_with(&self, prefix: &Release) -> bool {
        (0..prefix.0.len()).all(|i| self.segment(i) == prefix.segment(i))
    }
}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Caret,
    Tilde,
    Compatible,
}

const OPERATORS: &[(&str, Op)] = &[
    ("===", Op::Eq),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("~=", Op::Compatible),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("^", Op::Caret),
    ("~", Op::Tilde),
    ("=", Op::Eq),
];

/// Whether `version` satisfies `constraint`; `None` when either cannot be evaluated
pub fn satisfies(version: &str, constraint: &str) -> Option<bool> {
    let version = Release::parse(version)?;
    let constraint = constraint.trim();
    if constraint.is_empty() || constraint == "*" {
        return Some(true);
    }
    let mut any = false;
    for alternative in constraint.split("||").flat_map(|a| a.split('|')) {
        let mut all = true;
        for clause in clauses(alternative) {
            all &= clause_matches(&version, &clause)?;
        }
        any |= all;
    }
    Some(any)
}

/// Splits one `||` alternative into clauses, re-attaching operators written apart from
/// their version (`>= 1.2`)
fn clauses(alternative: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut dangling: Option<String> = None;
    for token in alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        match dangling.take() {
            Some(op) => result.push(format!("{}{}", op, token)),
            None if token.chars().all(|c| "=!<>~^".contains(c)) => {
                dangling = Some(token.to_string())
            }
            None => result.push(token.to_string()),
        }
    }
    result
}

fn clause_matches(version: &Release, clause: &str) -> Option<bool> {
    if clause == "*" {
        return Some(true);
    }
    let (op, rest) = OPERATORS
        .iter()
        .find_map(|(prefix, op)| clause.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, clause));
    let rest = rest.trim();

    if let Some(prefix) = rest.strip_suffix(".*") {
        let prefix = Release::parse(prefix)?;
        return match op {
            Op::Eq => Some(version.starts_with(&prefix)),
            Op::Ne => Some(!version.starts_with(&prefix)),
            _ => None,
        };
    }

    let target = Release::parse(rest)?;
    let given = target.0.len();
    Some(match op {
        Op::Eq => *version == target,
        Op::Ne => *version != target,
        Op::Ge => *version >= target,
        Op::Gt => *version > target,
        Op::Le => *version <= target,
        Op::Lt => *version < target,
        Op::Caret => {
            let index = target
                .0
                .iter()
                .position(|part| *part != 0)
                .unwrap_or(given - 1);
            *version >= target && *version < target.bump(index)
        }
        Op::Tilde => {
            let index = if given >= 2 { 1 } else { 0 };
            *version >= target && *version < target.bump(index)
        }
        Op::Compatible => {
            if given < 2 {
                return None;
            }
            *version >= target && *version < target.bump(given - 2)
        }
    })
}
