// per-worker amplitude storage. the pages are contiguous slices of one
// allocation so kernels can run over the whole buffer or over a single page.
// with several data blocks the pages of block 0 come first, then block 1 and
// so on, and page buffers are numbered block by block.

use crate::error::{Result, StateError};
use crate::Amplitude;
use num_complex::Complex;
use std::ops::{Index, IndexMut, Range};

#[derive(Clone, Debug, PartialEq)]
pub struct LocalBuffer {
    data: Vec<Amplitude>,
    local_qubits: usize,
    page_qubits: usize,
    block_qubits: usize,
}

impl LocalBuffer {
    // zero-filled buffer of 2^local_qubits amplitudes in 2^block_qubits data
    // blocks of 2^page_qubits pages each
    pub fn new(local_qubits: usize, page_qubits: usize, block_qubits: usize) -> Result<Self> {
        if page_qubits + block_qubits > local_qubits {
            return Err(StateError::PageCountMismatch {
                expected: 1 << local_qubits,
                actual: 1 << (page_qubits + block_qubits),
            });
        }
        Ok(Self {
            data: vec![Complex::new(0.0, 0.0); 1 << local_qubits],
            local_qubits,
            page_qubits,
            block_qubits,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn local_qubits(&self) -> usize {
        self.local_qubits
    }

    pub fn page_qubits(&self) -> usize {
        self.page_qubits
    }

    pub fn num_data_blocks(&self) -> usize {
        1 << self.block_qubits
    }

    pub fn pages_per_block(&self) -> usize {
        1 << self.page_qubits
    }

    // page buffers over all data blocks
    pub fn page_count(&self) -> usize {
        1 << (self.page_qubits + self.block_qubits)
    }

    pub fn page_size(&self) -> usize {
        1 << (self.local_qubits - self.page_qubits - self.block_qubits)
    }

    // flat page number of a page inside a data block
    pub fn page_index(&self, block: usize, page: usize) -> usize {
        debug_assert!(block < self.num_data_blocks() && page < self.pages_per_block());
        (block << self.page_qubits) | page
    }

    pub fn page_range(&self, block: usize, page: usize) -> Range<usize> {
        let start = self.page_index(block, page) * self.page_size();
        start..start + self.page_size()
    }

    pub fn data_block(&self, block: usize) -> &[Amplitude] {
        let size = self.size() >> self.block_qubits;
        &self.data[block * size..(block + 1) * size]
    }

    pub fn page(&self, page: usize) -> &[Amplitude] {
        let size = self.page_size();
        &self.data[page * size..(page + 1) * size]
    }

    pub fn page_mut(&mut self, page: usize) -> &mut [Amplitude] {
        let size = self.page_size();
        &mut self.data[page * size..(page + 1) * size]
    }

    pub fn pages(&self) -> std::slice::Chunks<'_, Amplitude> {
        self.data.chunks(self.page_size())
    }

    // exchanges the contents of two pages, O(page_size)
    pub fn swap_pages(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let size = self.page_size();
        let (head, tail) = self.data.split_at_mut(hi * size);
        head[lo * size..(lo + 1) * size].swap_with_slice(&mut tail[..size]);
    }

    pub fn get(&self, index: usize) -> Option<&Amplitude> {
        self.data.get(index)
    }

    pub fn as_slice(&self) -> &[Amplitude] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Amplitude] {
        &mut self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|a| *a = Complex::new(0.0, 0.0));
    }

    // replaces the contents, the length must match
    pub fn copy_from(&mut self, values: &[Amplitude]) -> Result<()> {
        if values.len() != self.data.len() {
            return Err(StateError::DimensionMismatch {
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }
}

impl Index<usize> for LocalBuffer {
    type Output = Amplitude;

    fn index(&self, index: usize) -> &Amplitude {
        &self.data[index]
    }
}

impl IndexMut<usize> for LocalBuffer {
    fn index_mut(&mut self, index: usize) -> &mut Amplitude {
        &mut self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(local: usize, pages: usize) -> LocalBuffer {
        let mut buffer = LocalBuffer::new(local, pages, 0).unwrap();
        for i in 0..buffer.size() {
            buffer[i] = Complex::new(i as crate::Real, 0.0);
        }
        buffer
    }

    #[test]
    fn test_page_geometry() {
        let buffer = numbered(4, 2);
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.page_count(), 4);
        assert_eq!(buffer.page_size(), 4);
        assert_eq!(buffer.page(2)[0].re, 8.0);
        assert_eq!(buffer.pages().count(), 4);
    }

    #[test]
    fn test_pages_inside_data_blocks() {
        // 5 local qubits: 2 data blocks of 4 pages of 4 amplitudes
        let mut buffer = LocalBuffer::new(5, 2, 1).unwrap();
        for i in 0..buffer.size() {
            buffer[i] = Complex::new(i as crate::Real, 0.0);
        }
        assert_eq!(buffer.num_data_blocks(), 2);
        assert_eq!(buffer.pages_per_block(), 4);
        assert_eq!(buffer.page_count(), 8);
        assert_eq!(buffer.page_size(), 4);
        assert_eq!(buffer.page_index(1, 2), 6);
        assert_eq!(buffer.page_range(1, 2), 24..28);
        assert_eq!(buffer.data_block(1)[0].re, 16.0);
        assert_eq!(buffer.page(buffer.page_index(1, 0))[1].re, 17.0);
        assert!(LocalBuffer::new(3, 2, 2).is_err());
    }

    #[test]
    fn test_swap_pages() {
        let mut buffer = numbered(3, 1);
        buffer.swap_pages(1, 0);
        let values: Vec<_> = buffer.as_slice().iter().map(|a| a.re as usize).collect();
        assert_eq!(values, vec![4, 5, 6, 7, 0, 1, 2, 3]);
        buffer.swap_pages(0, 0);
        assert_eq!(buffer[0].re, 4.0);
    }

    #[test]
    fn test_page_count_cannot_exceed_local_size() {
        let err = LocalBuffer::new(2, 3, 0).unwrap_err();
        assert!(matches!(err, StateError::PageCountMismatch { .. }));
    }

    #[test]
    fn test_copy_from_checks_length() {
        let mut buffer = LocalBuffer::new(2, 0, 0).unwrap();
        assert!(buffer.copy_from(&[Complex::new(1.0, 0.0); 3]).is_err());
        buffer.copy_from(&[Complex::new(1.0, 0.0); 4]).unwrap();
        buffer.page_mut(0)[1] = Complex::new(0.0, 2.0);
        assert_eq!(buffer.get(1), Some(&Complex::new(0.0, 2.0)));
        buffer.fill_zero();
        assert!(buffer.as_slice().iter().all(|a| a.norm_sqr() == 0.0));
    }
}
