//! Guest-offset address maps and the deferred-site queue.
//!
//! Guest offsets are bounded by the program length and every reachable
//! offset is eventually populated, so both maps are dense arrays rather
//! than dictionaries.

use std::collections::HashMap;

use vm_core::Decoded;

const UNMAPPED: u64 = u64::MAX;

/// Records where each guest instruction landed in host code, and what it
/// decoded to.
pub struct AddrMap {
    va2aa: Vec<u64>,
    va2dec: Vec<Option<Decoded>>,
}

impl AddrMap {
    /// Empty map for a program of `prog_len` bytes. Offset 0 is always
    /// addressable, since the trampoline maps itself there even for an
    /// image with nothing past the reserved bytes.
    #[must_use]
    pub fn new(prog_len: usize) -> Self {
        let len = prog_len.max(1);
        Self { va2aa: vec![UNMAPPED; len], va2dec: vec![None; len] }
    }

    /// Record the host address of the translation for the guest
    /// instruction at `va`.
    pub fn record(&mut self, va: u64, aa: u64) {
        self.va2aa[va as usize] = aa;
    }

    /// Host address of the translation at `va`, if already mapped.
    #[must_use]
    pub fn host_addr(&self, va: u64) -> Option<u64> {
        match self.va2aa.get(va as usize) {
            Some(&aa) if aa != UNMAPPED => Some(aa),
            _ => None,
        }
    }

    /// Record the decode of a finished translation.
    pub fn record_decoded(&mut self, d: Decoded) {
        self.va2dec[d.offset as usize] = Some(d);
    }

    /// Decode record at `va`, if translated.
    #[must_use]
    pub fn decoded(&self, va: u64) -> Option<&Decoded> {
        self.va2dec.get(va as usize).and_then(Option::as_ref)
    }

    /// Inverse mapping, host address to guest offset. Built on demand for
    /// the disassembly interleave.
    #[must_use]
    pub fn inverse(&self) -> HashMap<u64, u64> {
        self.va2aa
            .iter()
            .enumerate()
            .filter(|&(_, &aa)| aa != UNMAPPED)
            .map(|(va, &aa)| (aa, va as u64))
            .collect()
    }

    /// Guest offsets that have been mapped, in image order.
    #[must_use]
    pub fn mapped_offsets(&self) -> Vec<u64> {
        self.va2aa
            .iter()
            .enumerate()
            .filter(|&(_, &aa)| aa != UNMAPPED)
            .map(|(va, _)| va as u64)
            .collect()
    }
}

/// A translation checkpoint for a control-flow site whose guest target
/// was not yet mapped: both cursors, saved so the site can be re-translated
/// in place once the whole image has been mapped.
#[derive(Debug, Clone, Copy)]
pub struct DeferredSite {
    /// Guest cursor (image offset of the branch instruction).
    pub guest: u64,
    /// Host cursor (code buffer offset of the reserved placeholder).
    pub host: usize,
}
