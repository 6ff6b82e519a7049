// data movement that swaps two permutated qubits, and the interchange that
// brings nonlocal operands into the local buffer.

use crate::buffer::LocalBuffer;
use crate::error::{Result, StateError};
use crate::kernel;
use crate::locator::{PageLocator, QubitLocation};
use crate::permutation::{LogicalQubit, PermutatedQubit, PermutationTable};
use crate::transport::Transport;
use rayon::prelude::*;
use std::mem;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapPath {
    // table entries swapped, no data moved
    Permutation,
    // both qubits inside a page
    InPage,
    // both qubits select pages
    PageBuffers,
    // one page qubit and one in-page qubit
    CrossPage,
    // at least one nonlocal qubit, data went over the transport
    Exchange,
    // nothing to move on this worker
    Noop,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapEngine {
    locator: PageLocator,
}

impl SwapEngine {
    pub fn new(locator: PageLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &PageLocator {
        &self.locator
    }

    // exchanges permutated bits p1 and p2 of every global index. the table is
    // left alone, callers decide whether it follows the data.
    pub fn swap_data<T: Transport + ?Sized>(
        &self,
        buffer: &mut LocalBuffer,
        transport: &T,
        p1: PermutatedQubit,
        p2: PermutatedQubit,
    ) -> Result<SwapPath> {
        if p1 == p2 {
            return Ok(SwapPath::Noop);
        }
        let (lo, hi) = if p1 < p2 { (p1, p2) } else { (p2, p1) };
        let path = match (self.locator.locate(lo), self.locator.locate(hi)) {
            (QubitLocation::NonPageLocal, QubitLocation::NonPageLocal) => {
                kernel::par_swap_bits(buffer.as_mut_slice(), lo.index(), hi.index(), 0);
                SwapPath::InPage
            }
            (
                QubitLocation::PageLocal | QubitLocation::DataBlock,
                QubitLocation::PageLocal | QubitLocation::DataBlock,
            ) => {
                self.swap_page_bits(buffer, lo, hi);
                SwapPath::PageBuffers
            }
            (QubitLocation::NonPageLocal, QubitLocation::PageLocal | QubitLocation::DataBlock) => {
                Self::swap_across_pages(buffer, hi, lo);
                SwapPath::CrossPage
            }
            (QubitLocation::Nonlocal, QubitLocation::Nonlocal) => self.swap_rank_bits(buffer, transport, lo, hi)?,
            (_, QubitLocation::Nonlocal) => self.swap_with_partner(buffer, transport, hi, lo)?,
            // lo < hi, so lo is never further out than hi
            (QubitLocation::PageLocal | QubitLocation::DataBlock, QubitLocation::NonPageLocal)
            | (QubitLocation::Nonlocal, _) => {
                unreachable!("qubit locations are ordered by index")
            }
        };
        log::trace!(
            "worker {} swapped permutated qubits {} and {} via {:?}",
            self.locator.rank(),
            lo.index(),
            hi.index(),
            path
        );
        Ok(path)
    }

    // page buffers whose number has bit a set and bit b clear trade places
    // with the one that has them the other way round. data block bits are the
    // high bits of that number, so this covers moves between blocks too.
    fn swap_page_bits(&self, buffer: &mut LocalBuffer, a: PermutatedQubit, b: PermutatedQubit) {
        let (ma, mb) = (self.locator.page_mask(a), self.locator.page_mask(b));
        for page in 0..buffer.page_count() {
            if page & ma != 0 && page & mb == 0 {
                buffer.swap_pages(page, page ^ (ma | mb));
            }
        }
    }

    fn swap_across_pages(buffer: &mut LocalBuffer, page_qubit: PermutatedQubit, inner_qubit: PermutatedQubit) {
        let half = page_qubit.mask();
        let inner = inner_qubit.mask();
        buffer
            .as_mut_slice()
            .par_chunks_mut(half << 1)
            .for_each(|chunk| {
                let (lo, hi) = chunk.split_at_mut(half);
                for o in (0..half).filter(|o| o & inner == 0) {
                    mem::swap(&mut hi[o], &mut lo[o | inner]);
                }
            });
    }

    // both qubits select the rank: the whole shard moves to the worker whose
    // two bits are the other way round, or stays when they agree
    fn swap_rank_bits<T: Transport + ?Sized>(
        &self,
        buffer: &mut LocalBuffer,
        transport: &T,
        a: PermutatedQubit,
        b: PermutatedQubit,
    ) -> Result<SwapPath> {
        if self.locator.rank_bit(a) == self.locator.rank_bit(b) {
            return Ok(SwapPath::Noop);
        }
        let peer = self.locator.rank() ^ self.locator.rank_mask(a) ^ self.locator.rank_mask(b);
        let outgoing = buffer.as_slice().to_vec();
        let incoming = transport.issue_exchange(peer, outgoing)?.wait()?;
        buffer.copy_from(&incoming)?;
        Ok(SwapPath::Exchange)
    }

    // one nonlocal qubit g and one local qubit l. elements whose l bit differs
    // from our g bit are traded with the partner, in index order on both sides.
    fn swap_with_partner<T: Transport + ?Sized>(
        &self,
        buffer: &mut LocalBuffer,
        transport: &T,
        global: PermutatedQubit,
        local: PermutatedQubit,
    ) -> Result<SwapPath> {
        let keep = self.locator.rank_bit(global);
        let mask = local.mask();
        let moving = |i: &usize| (i & mask != 0) != keep;

        let outgoing: Vec<_> = (0..buffer.size()).filter(moving).map(|i| buffer[i]).collect();
        let pending = transport.issue_exchange(self.locator.partner_rank(global), outgoing)?;
        let incoming = pending.wait()?;

        let slots = (0..buffer.size()).filter(moving);
        for (i, value) in slots.zip(incoming) {
            buffer[i] = value;
        }
        Ok(SwapPath::Exchange)
    }

    // SWAP gate between two logical qubits
    pub fn swap_qubits<T: Transport + ?Sized>(
        &self,
        table: &mut PermutationTable,
        buffer: &mut LocalBuffer,
        transport: &T,
        a: LogicalQubit,
        b: LogicalQubit,
        via_permutation: bool,
    ) -> Result<SwapPath> {
        let (pa, pb) = (table.logical_to_physical(a), table.logical_to_physical(b));
        if via_permutation {
            table.swap(pa, pb);
            log::debug!("swapped logical qubits {} and {} in the table: {}", a.index(), b.index(), table);
            return Ok(SwapPath::Permutation);
        }
        self.swap_data(buffer, transport, pa, pb)
    }

    // moves every nonlocal operand into the local buffer. data and table swap
    // together so the logical state is unchanged. pinned qubits are moved out
    // only when nothing else is left.
    pub fn make_local<T: Transport + ?Sized>(
        &self,
        table: &mut PermutationTable,
        buffer: &mut LocalBuffer,
        transport: &T,
        operands: &[LogicalQubit],
        pinned: &[LogicalQubit],
    ) -> Result<usize> {
        let local_qubits = self.locator.local_qubits();
        if operands.len() > local_qubits {
            return Err(StateError::TooManyOperatedQubits {
                requested: operands.len(),
                local: local_qubits,
            });
        }
        let mut interchanges = 0;
        for &operand in operands {
            let from = table.logical_to_physical(operand);
            if self.locator.is_local(from) {
                continue;
            }
            let free = |q: &LogicalQubit, avoid_pinned: bool| {
                !operands.contains(q) && !(avoid_pinned && pinned.contains(q))
            };
            let candidates = || (0..local_qubits).rev().map(PermutatedQubit);
            let to = candidates()
                .find(|&p| free(&table.physical_to_logical(p), true))
                .or_else(|| candidates().find(|&p| free(&table.physical_to_logical(p), false)))
                .ok_or(StateError::TooManyOperatedQubits {
                    requested: operands.len(),
                    local: local_qubits,
                })?;
            self.swap_data(buffer, transport, from, to)?;
            table.swap(from, to);
            interchanges += 1;
            log::debug!(
                "worker {} moved logical qubit {} from permutated {} to {}",
                self.locator.rank(),
                operand.index(),
                from.index(),
                to.index()
            );
        }
        Ok(interchanges)
    }
}
