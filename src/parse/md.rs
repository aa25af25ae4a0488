use crate::errors::Error;

/// One token of an MD tag: a run of matches, a single substituted reference
/// base, or a `^`-prefixed run of deleted reference bases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MdOp {
    Matches(u32),
    Sub(u8),
    Del(Vec<u8>),
}

/// Tokenize an MD tag (`[0-9]+(([A-Z]|\^[A-Z]+)[0-9]+)*`).
pub fn md_ops(md: &str) -> Result<Vec<MdOp>, Error> {
    let bad = |reason: &str| Error::BadFormat {
        reason: format!("invalid MD tag {:?}: {}", md, reason),
        line: None,
    };

    let mut ops = Vec::new();
    let mut chars = md.bytes().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut n: u32 = 0;
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                n = n
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(u32::from(c - b'0')))
                    .ok_or_else(|| bad("match run does not fit into 32 bits"))?;
                chars.next();
            }
            if n > 0 {
                ops.push(MdOp::Matches(n));
            }
        } else if c == b'^' {
            chars.next();
            let mut deleted = Vec::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_uppercase() {
                    break;
                }
                deleted.push(c);
                chars.next();
            }
            if deleted.is_empty() {
                return Err(bad("deletion marker without bases"));
            }
            ops.push(MdOp::Del(deleted));
        } else if c.is_ascii_uppercase() {
            ops.push(MdOp::Sub(c));
            chars.next();
        } else {
            return Err(bad("unexpected character"));
        }
    }
    Ok(ops)
}

/// Cursor over MD tokens for lockstep consumption with a CIGAR walk.
pub struct MdCursor {
    ops: std::vec::IntoIter<MdOp>,
    pending_matches: u32,
}

/// What the MD tag says about a single reference position consumed by an
/// aligned (match/mismatch) CIGAR column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MdColumn {
    Match,
    Sub(u8),
}

impl MdCursor {
    pub fn new(ops: Vec<MdOp>) -> Self {
        MdCursor {
            ops: ops.into_iter(),
            pending_matches: 0,
        }
    }

    /// Consume one aligned column. `None` means the MD tag is exhausted too
    /// early, i.e. it disagrees with the CIGAR.
    pub fn next_column(&mut self) -> Option<MdColumn> {
        if self.pending_matches > 0 {
            self.pending_matches -= 1;
            return Some(MdColumn::Match);
        }
        match self.ops.next()? {
            MdOp::Matches(n) => {
                self.pending_matches = n - 1;
                Some(MdColumn::Match)
            }
            MdOp::Sub(base) => Some(MdColumn::Sub(base)),
            // a deletion token where an aligned column is expected
            MdOp::Del(_) => None,
        }
    }

    /// Consume a deletion of exactly `len` reference bases.
    pub fn next_deletion(&mut self, len: u32) -> Option<Vec<u8>> {
        if self.pending_matches > 0 {
            return None;
        }
        match self.ops.next()? {
            MdOp::Del(bases) if bases.len() as u32 == len => Some(bases),
            _ => None,
        }
    }

    /// True once every token has been consumed.
    pub fn is_exhausted(&mut self) -> bool {
        if self.pending_matches > 0 {
            return false;
        }
        loop {
            match self.ops.next() {
                None => return true,
                Some(MdOp::Matches(0)) => continue,
                Some(_) => return false,
            }
        }
    }
}
