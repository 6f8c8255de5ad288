//! Offsets into the flat force-constant arrays. Every function here takes
//! 1-based coordinate indices.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("bad index {tuple:?} for {n} coordinates")]
    BadIndex { tuple: Vec<usize>, n: usize },

    #[error(
        "offset {offset} out of range for order {order} with {n} coordinates"
    )]
    BadOffset { offset: usize, order: usize, n: usize },
}

/// triangular number k(k+1)/2
const fn tri(k: usize) -> usize {
    k * (k + 1) / 2
}

/// tetrahedral number k(k+1)(k+2)/6
const fn tet(k: usize) -> usize {
    k * (k + 1) * (k + 2) / 6
}

/// pentatope number k(k+1)(k+2)(k+3)/24
const fn pen(k: usize) -> usize {
    k * (k + 1) * (k + 2) * (k + 3) / 24
}

/// the length of the quadratic array for `n` coordinates
pub const fn nfc2(n: usize) -> usize {
    n * n
}

/// the length of the cubic array for `n` coordinates
pub const fn nfc3(n: usize) -> usize {
    tet(n)
}

/// the length of the quartic array for `n` coordinates
pub const fn nfc4(n: usize) -> usize {
    pen(n)
}

/// offset of `(a, b)` in the row-major `n × n` quadratic array
pub const fn fc2_index(n: usize, a: usize, b: usize) -> usize {
    n * (a - 1) + (b - 1)
}

/// offset of the sorted triple `a ≤ b ≤ c`
pub const fn fc3_index(a: usize, b: usize, c: usize) -> usize {
    a + tri(b - 1) + tet(c - 1) - 1
}

/// offset of the sorted quadruple `a ≤ b ≤ c ≤ d`
pub const fn fc4_index(a: usize, b: usize, c: usize, d: usize) -> usize {
    a + tri(b - 1) + tet(c - 1) + pen(d - 1) - 1
}

/// Map the unordered `tuple` to its offsets in the array of its order. The
/// tuple is sorted first unless `raw` is set, in which case a pair keeps its
/// directional layout and yields a single offset. A sorted pair with distinct
/// entries yields both off-diagonal offsets.
pub fn index(
    n: usize,
    raw: bool,
    tuple: &[usize],
) -> Result<Vec<usize>, IndexError> {
    if !(2..=4).contains(&tuple.len())
        || tuple.iter().any(|&t| t == 0 || t > n)
    {
        return Err(IndexError::BadIndex {
            tuple: tuple.to_vec(),
            n,
        });
    }
    let mut id = tuple.to_vec();
    if !raw || id.len() > 2 {
        id.sort_unstable();
    }
    Ok(match id[..] {
        [a, b] if a == b || raw => vec![fc2_index(n, a, b)],
        [a, b] => vec![fc2_index(n, a, b), fc2_index(n, b, a)],
        [a, b, c] => vec![fc3_index(a, b, c)],
        [a, b, c, d] => vec![fc4_index(a, b, c, d)],
        _ => unreachable!(),
    })
}

/// Offsets of a two-step pattern in the `2n × 2n` grid of paired energies.
/// A negative step `-k` occupies row and column `k + n`.
pub fn e2d_index(
    n: usize,
    a: isize,
    b: isize,
) -> Result<Vec<usize>, IndexError> {
    let fold = |s: isize| {
        if s < 0 {
            s.unsigned_abs() + n
        } else {
            s.unsigned_abs()
        }
    };
    index(2 * n, false, &[fold(a), fold(b)])
}

/// inverse of [e2d_index], returning the step pair with the smaller folded
/// index first
pub fn e2d_steps(
    n: usize,
    offset: usize,
) -> Result<(isize, isize), IndexError> {
    let (a, b) = fc2_tuple(2 * n, offset)?;
    let unfold = |s: usize| {
        if s > n {
            -((s - n) as isize)
        } else {
            s as isize
        }
    };
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    Ok((unfold(a), unfold(b)))
}

/// inverse of [fc2_index]
pub fn fc2_tuple(
    n: usize,
    offset: usize,
) -> Result<(usize, usize), IndexError> {
    if n == 0 || offset >= nfc2(n) {
        return Err(IndexError::BadOffset {
            offset,
            order: 2,
            n,
        });
    }
    Ok((offset / n + 1, offset % n + 1))
}

/// the largest `k ≥ 1` with `f(k - 1) ≤ offset`
fn largest(offset: usize, f: impl Fn(usize) -> usize) -> usize {
    let mut k = 1;
    while f(k) <= offset {
        k += 1;
    }
    k
}

/// inverse of [fc3_index], returning the sorted triple
pub fn fc3_tuple(
    n: usize,
    offset: usize,
) -> Result<(usize, usize, usize), IndexError> {
    if offset >= nfc3(n) {
        return Err(IndexError::BadOffset {
            offset,
            order: 3,
            n,
        });
    }
    let c = largest(offset, tet);
    let rem = offset - tet(c - 1);
    let b = largest(rem, tri);
    let a = rem - tri(b - 1) + 1;
    Ok((a, b, c))
}

/// inverse of [fc4_index], returning the sorted quadruple
pub fn fc4_tuple(
    n: usize,
    offset: usize,
) -> Result<(usize, usize, usize, usize), IndexError> {
    if offset >= nfc4(n) {
        return Err(IndexError::BadOffset {
            offset,
            order: 4,
            n,
        });
    }
    let d = largest(offset, pen);
    let rem = offset - pen(d - 1);
    let c = largest(rem, tet);
    let rem = rem - tet(c - 1);
    let b = largest(rem, tri);
    let a = rem - tri(b - 1) + 1;
    Ok((a, b, c, d))
}
