// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

pub mod counts;
pub mod variants;

use std::collections::VecDeque;
use std::io;

use anyhow::Result;

use crate::errors;

/// One slot of the scanning window. Implementations accumulate per-position
/// contributions and render one output row; everything else (growth,
/// bounds-checking, ordered emission) lives in `ScanWindow`.
pub trait PositionRecord: Clone {
    type Contribution;
    type Params: Clone;

    fn new(params: &Self::Params) -> Self;
    /// Column headers, generated from the same declaration as the rows.
    fn header(params: &Self::Params) -> Vec<String>;
    fn update(&mut self, contribution: Self::Contribution, params: &Self::Params);
    /// Render this position as output fields.
    fn print(&self, params: &Self::Params) -> Vec<String>;
}

/// A left-bounded, right-extensible window of per-position records over
/// reference positions `target_pos..target_pos + len`. Contributions left of
/// the origin are silently dropped: after an `advance_left` a lagging read
/// may still lap over the emitted region, and its effect is clamped to the
/// in-window portion.
pub struct ScanWindow<R: PositionRecord> {
    target_pos: i64,
    slots: VecDeque<R>,
    params: R::Params,
}

impl<R: PositionRecord> ScanWindow<R> {
    pub fn new(origin: i64, params: R::Params) -> Self {
        ScanWindow {
            target_pos: origin,
            slots: VecDeque::new(),
            params,
        }
    }

    pub fn origin(&self) -> i64 {
        self.target_pos
    }

    /// One past the rightmost addressable position.
    pub fn right(&self) -> i64 {
        self.target_pos + self.slots.len() as i64
    }

    pub fn params(&self) -> &R::Params {
        &self.params
    }

    /// Grow the window so `new_right` is addressable; new slots start empty.
    pub fn extend_right(&mut self, new_right: i64) {
        while self.right() <= new_right {
            self.slots.push_back(R::new(&self.params));
        }
    }

    /// Apply a contribution at an absolute reference position. Returns false
    /// if the position was already emitted and the contribution dropped.
    pub fn update(&mut self, pos: i64, contribution: R::Contribution) -> bool {
        if pos < self.target_pos {
            return false;
        }
        self.extend_right(pos);
        self.slots[(pos - self.target_pos) as usize].update(contribution, &self.params);
        true
    }

    /// Emit and drop all rows left of `new_left`, in ascending position
    /// order, then move the origin there. Moving the origin backwards is a
    /// programmer error.
    pub fn advance_left<W: io::Write>(
        &mut self,
        new_left: i64,
        out: &mut csv::Writer<W>,
    ) -> Result<()> {
        if new_left < self.target_pos {
            return Err(errors::Error::OutOfWindow {
                position: new_left,
                window: self.target_pos,
            }
            .into());
        }
        while self.target_pos < new_left {
            let record = match self.slots.pop_front() {
                Some(record) => record,
                None => R::new(&self.params),
            };
            out.write_record(record.print(&self.params))?;
            self.target_pos += 1;
        }
        Ok(())
    }

    /// Flush every remaining row so the output covers `..end`, e.g. the full
    /// reference length.
    pub fn finish<W: io::Write>(&mut self, end: i64, out: &mut csv::Writer<W>) -> Result<()> {
        if end > self.right() {
            self.extend_right(end - 1);
        }
        let end = end.max(self.right());
        self.advance_left(end, out)
    }
}
