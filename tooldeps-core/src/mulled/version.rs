// tooldeps-core/src/mulled/version.rs
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Num(u64),
    Alpha(String),
}

/// Version ordering tolerant of anything found in conda and image tags
/// ("1.3.1", "2.7.0a1", "py27_0", "r3.4.1"). Numeric runs compare as
/// numbers, letter runs as strings, and a letter run sorts below the
/// release it precedes ("1.0rc1" < "1.0").
#[derive(Debug, Clone)]
pub struct LooseVersion {
    raw: String,
    parts: Vec<Part>,
}

impl LooseVersion {
    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let mut chars = raw.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                // Saturate rather than fail on absurdly long digit runs.
                parts.push(Part::Num(digits.parse().unwrap_or(u64::MAX)));
            } else if c.is_ascii_alphabetic() {
                let mut letters = String::new();
                while let Some(&l) = chars.peek() {
                    if !l.is_ascii_alphabetic() {
                        break;
                    }
                    letters.push(l.to_ascii_lowercase());
                    chars.next();
                }
                parts.push(Part::Alpha(letters));
            } else {
                chars.next();
            }
        }
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn cmp_parts(a: Option<&Part>, b: Option<&Part>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(Part::Num(x)), Some(Part::Num(y))) => x.cmp(y),
        (Some(Part::Alpha(x)), Some(Part::Alpha(y))) => x.cmp(y),
        (Some(Part::Num(_)), Some(Part::Alpha(_))) => Ordering::Greater,
        (Some(Part::Alpha(_)), Some(Part::Num(_))) => Ordering::Less,
        (Some(Part::Num(x)), None) => x.cmp(&0),
        (None, Some(Part::Num(y))) => 0.cmp(y),
        (Some(Part::Alpha(_)), None) => Ordering::Less,
        (None, Some(Part::Alpha(_))) => Ordering::Greater,
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let ord = cmp_parts(self.parts.get(i), other.parts.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
