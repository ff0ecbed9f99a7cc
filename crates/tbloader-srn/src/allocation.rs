//! The per-identity allocation record.
//!
//! An identity owns up to two half-open ranges of sequence numbers under
//! one allocator id: a primary range being consumed and a backup range
//! waiting its turn. When the primary runs out the backup is promoted.

use serde::{Deserialize, Serialize};

use crate::error::{SrnError, SrnResult};

/// A block of numbers granted by the reservation authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: u32,
    pub hexid: String,
    pub begin: u32,
    /// One past the last granted number.
    pub end: u32,
}

impl Reservation {
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrnAllocationInfo {
    pub allocator_id: Option<u32>,
    pub allocator_id_hex: Option<String>,
    pub next_srn: u32,
    pub primary_begin: u32,
    pub primary_end: u32,
    pub backup_begin: u32,
    pub backup_end: u32,
}

impl SrnAllocationInfo {
    /// Absorb a fresh block.
    ///
    /// With both ranges empty the block is split between them; otherwise it
    /// fills whichever range is empty. A block that arrives when neither is
    /// empty is rejected.
    pub fn apply_reservation(&mut self, reservation: &Reservation) -> SrnResult<()> {
        let Reservation { id, hexid, begin, end } = reservation;
        let (begin, end) = (*begin, *end);
        if begin == 0 || end <= begin {
            return Err(SrnError::invalid_reservation(format!("empty range {begin}..{end}")));
        }
        if hexid.is_empty() {
            return Err(SrnError::invalid_reservation("missing allocator id"));
        }
        if self.primary_begin != 0 && self.backup_begin != 0 {
            return Err(SrnError::invalid_reservation("no empty range to fill"));
        }

        if self.allocator_id != Some(*id) {
            self.allocator_id = Some(*id);
            self.allocator_id_hex = Some(hexid.to_ascii_lowercase());
        }

        if self.primary_begin == 0 && self.backup_begin == 0 {
            let mid = begin + (end - begin) / 2;
            self.primary_begin = begin;
            self.primary_end = mid;
            self.backup_begin = mid;
            self.backup_end = end;
            self.next_srn = begin;
        } else if self.primary_begin == 0 {
            self.primary_begin = begin;
            self.primary_end = end;
            self.next_srn = begin;
        } else {
            self.backup_begin = begin;
            self.backup_end = end;
        }
        Ok(())
    }

    /// Whether [`allocate_next`](Self::allocate_next) will yield a number.
    pub fn has_next(&self) -> bool {
        self.primary_begin > 0
            && self.primary_end > self.primary_begin
            && (self.primary_begin..self.primary_end).contains(&self.next_srn)
    }

    pub fn has_backup(&self) -> bool {
        self.backup_begin > 0 && self.backup_end > self.backup_begin
    }

    /// Whether the primary range was ever filled.
    pub fn has_primary(&self) -> bool {
        self.primary_begin > 0
    }

    /// Consume the next number, promoting the backup range when the primary
    /// is used up.
    ///
    /// With no backup to promote, the primary is cleared but `next_srn` is
    /// left past the number just issued.
    pub fn allocate_next(&mut self) -> Option<u32> {
        if !self.has_next() {
            return None;
        }
        let issued = self.next_srn;
        self.next_srn += 1;
        if self.next_srn >= self.primary_end {
            if self.has_backup() {
                self.primary_begin = self.backup_begin;
                self.primary_end = self.backup_end;
                self.next_srn = self.primary_begin;
            } else {
                self.primary_begin = 0;
                self.primary_end = 0;
            }
            self.backup_begin = 0;
            self.backup_end = 0;
        }
        Some(issued)
    }

    /// Numbers still to be issued from both ranges.
    pub fn available(&self) -> u32 {
        let primary = if self.has_next() {
            self.primary_end - self.next_srn
        } else {
            0
        };
        let backup = if self.has_backup() {
            self.backup_end - self.backup_begin
        } else {
            0
        };
        primary + backup
    }

    /// `b-` + allocator id + four hex digits, all lowercase.
    pub fn format_srn(&self, srn: u32) -> Option<String> {
        let hex = self.allocator_id_hex.as_deref()?;
        Some(format!("b-{hex}{srn:04x}"))
    }
}
