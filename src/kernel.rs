// slice kernels shared by direct application and fused groups.
//
// every kernel works on a slice whose first element sits at `offset` in the
// index space the control mask refers to. the slice has to be aligned to a
// power of two larger than every target bit it is asked to touch.

use crate::Amplitude;
use num_complex::Complex;
use rayon::prelude::*;

pub type Matrix2 = [[Amplitude; 2]; 2];

// a Pauli string placed on index bits: X on `x`, Z on `z`, and `y_count` of
// the qubits carrying Y = iXZ
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PauliMasks {
    pub x: usize,
    pub z: usize,
    pub y_count: u32,
}

impl PauliMasks {
    // P|b> = phase(b)|b ^ x>
    #[inline]
    pub fn phase(&self, index: usize) -> Amplitude {
        let sign = if (index & self.z).count_ones() % 2 == 0 { 1.0 } else { -1.0 };
        match self.y_count % 4 {
            0 => Complex::new(sign, 0.0),
            1 => Complex::new(0.0, sign),
            2 => Complex::new(-sign, 0.0),
            _ => Complex::new(0.0, -sign),
        }
    }

    fn top_bit(&self) -> usize {
        (usize::BITS - 1).saturating_sub(self.x.leading_zeros()) as usize
    }
}

// below this many amplitudes a chunk is not worth a rayon task
const MIN_PARALLEL_CHUNK: usize = 1 << 12;

#[inline]
fn controls_hold(index: usize, control_mask: usize) -> bool {
    index & control_mask == control_mask
}

pub fn apply_matrix(amps: &mut [Amplitude], offset: usize, target: usize, control_mask: usize, m: &Matrix2) {
    let t = 1 << target;
    for block in (0..amps.len()).step_by(t << 1) {
        for i in block..block + t {
            if !controls_hold(offset + i, control_mask) {
                continue;
            }
            let a0 = amps[i];
            let a1 = amps[i | t];
            amps[i] = m[0][0] * a0 + m[0][1] * a1;
            amps[i | t] = m[1][0] * a0 + m[1][1] * a1;
        }
    }
}

pub fn apply_diagonal(amps: &mut [Amplitude], offset: usize, target: usize, control_mask: usize, d: &[Amplitude; 2]) {
    let t = 1 << target;
    for (i, amp) in amps.iter_mut().enumerate() {
        let index = offset + i;
        if controls_hold(index, control_mask) {
            *amp *= d[(index & t != 0) as usize];
        }
    }
}

// exchanges bit a and bit b of every index whose controls hold
pub fn swap_bits(amps: &mut [Amplitude], offset: usize, a: usize, b: usize, control_mask: usize) {
    if a == b {
        return;
    }
    let (ma, mb) = (1 << a, 1 << b);
    for i in 0..amps.len() {
        if i & ma != 0 && i & mb == 0 && controls_hold(offset + i, control_mask) {
            amps.swap(i, i ^ (ma | mb));
        }
    }
}

pub fn apply_pauli_string(amps: &mut [Amplitude], offset: usize, control_mask: usize, p: &PauliMasks) {
    if p.x == 0 {
        for (i, amp) in amps.iter_mut().enumerate() {
            let index = offset + i;
            if controls_hold(index, control_mask) {
                *amp *= p.phase(index);
            }
        }
        return;
    }
    let top = 1 << p.top_bit();
    for i in 0..amps.len() {
        if i & top != 0 || !controls_hold(offset + i, control_mask) {
            continue;
        }
        let j = i ^ p.x;
        let (a, b) = (amps[i], amps[j]);
        amps[j] = p.phase(offset + i) * a;
        amps[i] = p.phase(offset + j) * b;
    }
}

// exp(i theta P) = cos(theta) + i sin(theta) P, `rotation` holds e^{i theta}
pub fn apply_pauli_rotation(
    amps: &mut [Amplitude],
    offset: usize,
    control_mask: usize,
    p: &PauliMasks,
    rotation: Amplitude,
) {
    let c = rotation.re;
    let is = Complex::new(0.0, rotation.im);
    if p.x == 0 {
        for (i, amp) in amps.iter_mut().enumerate() {
            let index = offset + i;
            if controls_hold(index, control_mask) {
                *amp *= is * p.phase(index) + c;
            }
        }
        return;
    }
    let top = 1 << p.top_bit();
    for i in 0..amps.len() {
        if i & top != 0 || !controls_hold(offset + i, control_mask) {
            continue;
        }
        let j = i ^ p.x;
        let (a, b) = (amps[i], amps[j]);
        amps[i] = a * c + is * p.phase(offset + j) * b;
        amps[j] = b * c + is * p.phase(offset + i) * a;
    }
}

// exp(i s SWAP): |00> and |11> pick up e^{is}, |01> and |10> mix
pub fn apply_exponential_swap(
    amps: &mut [Amplitude],
    offset: usize,
    a: usize,
    b: usize,
    control_mask: usize,
    rotation: Amplitude,
) {
    let (ma, mb) = (1 << a, 1 << b);
    let c = rotation.re;
    let is = Complex::new(0.0, rotation.im);
    for i in 0..amps.len() {
        if i & (ma | mb) != 0 || !controls_hold(offset + i, control_mask) {
            continue;
        }
        let (i01, i10, i11) = (i | ma, i | mb, i | ma | mb);
        amps[i] *= rotation;
        amps[i11] *= rotation;
        let (x, y) = (amps[i01], amps[i10]);
        amps[i01] = x * c + is * y;
        amps[i10] = y * c + is * x;
    }
}

// chunk length that keeps `top_bit` inside one chunk
pub(crate) fn chunk_len(len: usize, top_bit: usize) -> usize {
    (2usize << top_bit).max(MIN_PARALLEL_CHUNK).min(len)
}

pub fn par_apply_matrix(amps: &mut [Amplitude], target: usize, control_mask: usize, m: &Matrix2) {
    let size = chunk_len(amps.len(), target);
    amps.par_chunks_mut(size)
        .enumerate()
        .for_each(|(c, chunk)| apply_matrix(chunk, c * size, target, control_mask, m));
}

pub fn par_apply_diagonal(amps: &mut [Amplitude], target: usize, control_mask: usize, d: &[Amplitude; 2]) {
    let size = chunk_len(amps.len(), target);
    amps.par_chunks_mut(size)
        .enumerate()
        .for_each(|(c, chunk)| apply_diagonal(chunk, c * size, target, control_mask, d));
}

pub fn par_swap_bits(amps: &mut [Amplitude], a: usize, b: usize, control_mask: usize) {
    let size = chunk_len(amps.len(), a.max(b));
    amps.par_chunks_mut(size)
        .enumerate()
        .for_each(|(c, chunk)| swap_bits(chunk, c * size, a, b, control_mask));
}

pub fn par_apply_pauli_string(amps: &mut [Amplitude], control_mask: usize, p: &PauliMasks) {
    let size = chunk_len(amps.len(), p.top_bit());
    amps.par_chunks_mut(size)
        .enumerate()
        .for_each(|(c, chunk)| apply_pauli_string(chunk, c * size, control_mask, p));
}

pub fn par_apply_pauli_rotation(amps: &mut [Amplitude], control_mask: usize, p: &PauliMasks, rotation: Amplitude) {
    let size = chunk_len(amps.len(), p.top_bit());
    amps.par_chunks_mut(size)
        .enumerate()
        .for_each(|(c, chunk)| apply_pauli_rotation(chunk, c * size, control_mask, p, rotation));
}

pub fn par_apply_exponential_swap(amps: &mut [Amplitude], a: usize, b: usize, control_mask: usize, rotation: Amplitude) {
    let size = chunk_len(amps.len(), a.max(b));
    amps.par_chunks_mut(size)
        .enumerate()
        .for_each(|(c, chunk)| apply_exponential_swap(chunk, c * size, a, b, control_mask, rotation));
}

pub fn conjugate_transpose(m: &Matrix2) -> Matrix2 {
    [
        [m[0][0].conj(), m[1][0].conj()],
        [m[0][1].conj(), m[1][1].conj()],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Real;

    fn c(re: Real, im: Real) -> Amplitude {
        Complex::new(re, im)
    }

    fn pauli_x() -> Matrix2 {
        [[c(0.0, 0.0), c(1.0, 0.0)], [c(1.0, 0.0), c(0.0, 0.0)]]
    }

    fn numbered(n: usize) -> Vec<Amplitude> {
        (0..n).map(|i| c(i as Real, 0.0)).collect()
    }

    #[test]
    fn test_matrix_flips_target() {
        let mut amps = numbered(8);
        apply_matrix(&mut amps, 0, 1, 0, &pauli_x());
        let values: Vec<_> = amps.iter().map(|a| a.re as usize).collect();
        assert_eq!(values, vec![2, 3, 0, 1, 6, 7, 4, 5]);
    }

    #[test]
    fn test_controls_use_offset() {
        // chunk starting at 4 has bit 2 set everywhere
        let mut amps = numbered(4);
        apply_matrix(&mut amps, 4, 0, 0b100, &pauli_x());
        let values: Vec<_> = amps.iter().map(|a| a.re as usize).collect();
        assert_eq!(values, vec![1, 0, 3, 2]);

        let mut amps = numbered(4);
        apply_matrix(&mut amps, 0, 0, 0b100, &pauli_x());
        assert_eq!(amps, numbered(4));
    }

    #[test]
    fn test_diagonal_with_control() {
        let mut amps = vec![c(1.0, 0.0); 4];
        apply_diagonal(&mut amps, 0, 1, 0b01, &[c(1.0, 0.0), c(-1.0, 0.0)]);
        let values: Vec<_> = amps.iter().map(|a| a.re).collect();
        assert_eq!(values, vec![1.0, 1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_swap_bits() {
        let mut amps = numbered(8);
        swap_bits(&mut amps, 0, 0, 2, 0);
        let values: Vec<_> = amps.iter().map(|a| a.re as usize).collect();
        assert_eq!(values, vec![0, 4, 2, 6, 1, 5, 3, 7]);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let n = 1 << 14;
        let m = [[c(0.6, 0.0), c(0.0, 0.8)], [c(0.0, 0.8), c(0.6, 0.0)]];
        for target in [0, 5, 13] {
            let control = if target == 13 { 1 << 12 } else { 1 << 13 };
            let mut serial = numbered(n);
            let mut parallel = numbered(n);
            apply_matrix(&mut serial, 0, target, control, &m);
            par_apply_matrix(&mut parallel, target, control, &m);
            assert_eq!(serial, parallel);
        }
        let mut serial = numbered(n);
        let mut parallel = numbered(n);
        swap_bits(&mut serial, 0, 3, 13, 0b1);
        par_swap_bits(&mut parallel, 3, 13, 0b1);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_pauli_string_phases() {
        // Y on bit 0, Z on bit 1: Y|0> = i|1>, Z|1> = -|1>
        let p = PauliMasks { x: 0b01, z: 0b11, y_count: 1 };
        let mut amps = vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)];
        apply_pauli_string(&mut amps, 0, 0, &p);
        assert_eq!(amps, vec![c(0.0, 0.0), c(0.0, 1.0), c(0.0, 0.0), c(0.0, 0.0)]);

        let mut amps = vec![c(0.0, 0.0), c(0.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)];
        apply_pauli_string(&mut amps, 0, 0, &p);
        assert_eq!(amps, vec![c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, -1.0)]);

        // Z on both bits only changes signs
        let zz = PauliMasks { x: 0, z: 0b11, y_count: 0 };
        let mut amps = numbered(4);
        apply_pauli_string(&mut amps, 0, 0, &zz);
        let values: Vec<_> = amps.iter().map(|a| a.re).collect();
        assert_eq!(values, vec![0.0, -1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_pauli_rotation_at_quarter_turn() {
        // exp(i pi/2 XX) = i XX
        let xx = PauliMasks { x: 0b101, z: 0, y_count: 0 };
        let mut amps = numbered(8);
        apply_pauli_rotation(&mut amps, 0, 0, &xx, c(0.0, 1.0));
        let mut expected = numbered(8);
        apply_pauli_string(&mut expected, 0, 0, &xx);
        for (a, e) in amps.iter().zip(&expected) {
            assert!((a - e * c(0.0, 1.0)).norm() < 1e-6);
        }
    }

    #[test]
    fn test_exponential_swap_at_half_turn() {
        // s = pi/2 gives i SWAP
        let mut amps = numbered(4);
        apply_exponential_swap(&mut amps, 0, 0, 1, 0, c(0.0, 1.0));
        let expected = [c(0.0, 0.0), c(0.0, 2.0), c(0.0, 1.0), c(0.0, 3.0)];
        for (a, e) in amps.iter().zip(&expected) {
            assert!((a - e).norm() < 1e-6);
        }
        let mut amps = numbered(4);
        apply_exponential_swap(&mut amps, 0, 0, 1, 0, c(1.0, 0.0));
        assert_eq!(amps, numbered(4));
    }

    #[test]
    fn test_parallel_pauli_kernels_match_serial() {
        let n = 1 << 14;
        let p = PauliMasks { x: (1 << 13) | 0b10, z: 0b110, y_count: 1 };
        let rotation = c(0.6, 0.8);
        let mut serial = numbered(n);
        let mut parallel = numbered(n);
        apply_pauli_rotation(&mut serial, 0, 0b1, &p, rotation);
        par_apply_pauli_rotation(&mut parallel, 0b1, &p, rotation);
        assert_eq!(serial, parallel);

        apply_pauli_string(&mut serial, 0, 0, &p);
        par_apply_pauli_string(&mut parallel, 0, &p);
        assert_eq!(serial, parallel);

        apply_exponential_swap(&mut serial, 0, 2, 12, 0b1, rotation);
        par_apply_exponential_swap(&mut parallel, 2, 12, 0b1, rotation);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_conjugate_transpose() {
        let m = [[c(1.0, 1.0), c(2.0, 0.0)], [c(0.0, 3.0), c(4.0, -1.0)]];
        let h = conjugate_transpose(&m);
        assert_eq!(h[0][1], c(0.0, -3.0));
        assert_eq!(h[1][0], c(2.0, 0.0));
        assert_eq!(h[1][1], c(4.0, 1.0));
    }
}
