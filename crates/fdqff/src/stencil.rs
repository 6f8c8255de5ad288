//! Central-difference stencils. A stencil turns a derivative tuple into the
//! displaced single points it needs, each with an integer weight. The shared
//! `scale` converts the weighted sum into a derivative in bohr.

/// Å to bohr conversion applied once per derivative order
pub const ANGBOHR: f64 = 0.529_177_210_9;

/// A single weighted displacement. An empty `steps` is the undisplaced
/// reference point.
#[derive(Clone, Debug, PartialEq)]
pub struct Proto {
    pub coeff: f64,
    pub steps: Vec<isize>,
    pub scale: f64,
}

impl Proto {
    pub fn is_e0(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StencilError {
    #[error("no stencil for derivative tuple {0:?}")]
    BadTuple(Vec<usize>),

    #[error("step size for coordinate {0} must be positive")]
    BadDelta(usize),
}

/// Emits the weighted displacements for one derivative tuple.
pub trait Derivative {
    fn emit(&self, tuple: &[usize]) -> Result<Vec<Proto>, StencilError>;
}

macro_rules! proto {
    ($scale:expr, $coeff:expr $(, $steps:expr)*) => {
        Proto {
            coeff: $coeff,
            steps: vec![$($steps),*],
            scale: $scale,
        }
    };
}

/// Central differences with a per-coordinate step size. `alpha` is the unit
/// conversion factor, [ANGBOHR] for Cartesian coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stencil {
    alpha: f64,
    deltas: Vec<f64>,
}

impl Stencil {
    pub fn new(alpha: f64, deltas: Vec<f64>) -> Result<Self, StencilError> {
        if let Some(i) = deltas.iter().position(|&d| d <= 0.0 || !d.is_finite())
        {
            return Err(StencilError::BadDelta(i + 1));
        }
        Ok(Self { alpha, deltas })
    }

    pub fn deltas(&self) -> &[f64] {
        &self.deltas
    }

    /// `α^k / (2^k ∏δ)` over the entries of `tuple`
    pub fn scale(&self, tuple: &[usize]) -> f64 {
        tuple.iter().fold(1.0, |acc, &t| {
            acc * self.alpha / (2.0 * self.deltas[t - 1])
        })
    }

    fn make1d(&self, s: f64, i: isize) -> Vec<Proto> {
        vec![proto!(s, 1.0, i), proto!(s, -1.0, -i)]
    }

    fn make2d(&self, s: f64, i: isize, j: isize) -> Vec<Proto> {
        if i == j {
            vec![proto!(s, 1.0, i, i), proto!(s, -2.0), proto!(s, 1.0, -i, -i)]
        } else {
            vec![
                proto!(s, 1.0, i, j),
                proto!(s, -1.0, i, -j),
                proto!(s, -1.0, -i, j),
                proto!(s, 1.0, -i, -j),
            ]
        }
    }

    fn make3d(&self, s: f64, i: isize, j: isize, k: isize) -> Vec<Proto> {
        // doubled index first
        let make3d_2_1 = |i, k| {
            vec![
                proto!(s, 1.0, i, i, k),
                proto!(s, -2.0, k),
                proto!(s, 1.0, -i, -i, k),
                proto!(s, -1.0, i, i, -k),
                proto!(s, 2.0, -k),
                proto!(s, -1.0, -i, -i, -k),
            ]
        };
        if i == j && j == k {
            vec![
                proto!(s, 1.0, i, i, i),
                proto!(s, -3.0, i),
                proto!(s, 3.0, -i),
                proto!(s, -1.0, -i, -i, -i),
            ]
        } else if i == j {
            make3d_2_1(i, k)
        } else if j == k {
            make3d_2_1(j, i)
        } else {
            vec![
                proto!(s, 1.0, i, j, k),
                proto!(s, -1.0, i, -j, k),
                proto!(s, -1.0, -i, j, k),
                proto!(s, 1.0, -i, -j, k),
                proto!(s, -1.0, i, j, -k),
                proto!(s, 1.0, i, -j, -k),
                proto!(s, 1.0, -i, j, -k),
                proto!(s, -1.0, -i, -j, -k),
            ]
        }
    }

    fn make4d(
        &self,
        s: f64,
        i: isize,
        j: isize,
        k: isize,
        l: isize,
    ) -> Vec<Proto> {
        let make4d_3_1 = |i, l| {
            vec![
                proto!(s, 1.0, i, i, i, l),
                proto!(s, -3.0, i, l),
                proto!(s, 3.0, -i, l),
                proto!(s, -1.0, -i, -i, -i, l),
                proto!(s, -1.0, i, i, i, -l),
                proto!(s, 3.0, i, -l),
                proto!(s, -3.0, -i, -l),
                proto!(s, 1.0, -i, -i, -i, -l),
            ]
        };
        let make4d_2_2 = |i, k| {
            vec![
                proto!(s, 1.0, i, i, k, k),
                proto!(s, 1.0, -i, -i, -k, -k),
                proto!(s, 1.0, -i, -i, k, k),
                proto!(s, 1.0, i, i, -k, -k),
                proto!(s, -2.0, i, i),
                proto!(s, -2.0, k, k),
                proto!(s, -2.0, -i, -i),
                proto!(s, -2.0, -k, -k),
                proto!(s, 4.0),
            ]
        };
        let make4d_2_1_1 = |i, k, l| {
            vec![
                proto!(s, 1.0, i, i, k, l),
                proto!(s, -2.0, k, l),
                proto!(s, 1.0, -i, -i, k, l),
                proto!(s, -1.0, i, i, -k, l),
                proto!(s, 2.0, -k, l),
                proto!(s, -1.0, -i, -i, -k, l),
                proto!(s, -1.0, i, i, k, -l),
                proto!(s, 2.0, k, -l),
                proto!(s, -1.0, -i, -i, k, -l),
                proto!(s, 1.0, i, i, -k, -l),
                proto!(s, -2.0, -k, -l),
                proto!(s, 1.0, -i, -i, -k, -l),
            ]
        };
        if i == j && j == k && k == l {
            vec![
                proto!(s, 1.0, i, i, i, i),
                proto!(s, -4.0, i, i),
                proto!(s, 6.0),
                proto!(s, -4.0, -i, -i),
                proto!(s, 1.0, -i, -i, -i, -i),
            ]
        } else if i == j && j == k {
            make4d_3_1(i, l)
        } else if j == k && k == l {
            make4d_3_1(j, i)
        } else if i == j && k == l {
            make4d_2_2(i, k)
        } else if i == j {
            make4d_2_1_1(i, k, l)
        } else if j == k {
            make4d_2_1_1(j, i, l)
        } else if k == l {
            make4d_2_1_1(k, i, j)
        } else {
            let mut ret = Vec::with_capacity(16);
            for (sl, cl) in [(l, 1.0), (-l, -1.0)] {
                for (sk, ck) in [(k, 1.0), (-k, -1.0)] {
                    for (sj, cj) in [(j, 1.0), (-j, -1.0)] {
                        for (si, ci) in [(i, 1.0), (-i, -1.0)] {
                            let c = ci * cj * ck * cl;
                            ret.push(proto!(s, c, si, sj, sk, sl));
                        }
                    }
                }
            }
            ret
        }
    }
}

impl Derivative for Stencil {
    /// `tuple` may come in any order, it is sorted descending before the
    /// multiplicity pattern is matched
    fn emit(&self, tuple: &[usize]) -> Result<Vec<Proto>, StencilError> {
        let n = self.deltas.len();
        if tuple.iter().any(|&t| t == 0 || t > n) {
            return Err(StencilError::BadTuple(tuple.to_vec()));
        }
        let mut t: Vec<isize> = tuple.iter().map(|&t| t as isize).collect();
        t.sort_unstable_by(|a, b| b.cmp(a));
        let s = self.scale(tuple);
        Ok(match t[..] {
            [i] => self.make1d(s, i),
            [i, j] => self.make2d(s, i, j),
            [i, j, k] => self.make3d(s, i, j, k),
            [i, j, k, l] => self.make4d(s, i, j, k, l),
            _ => return Err(StencilError::BadTuple(tuple.to_vec())),
        })
    }
}

/// Sort a step pattern by coordinate, positive before negative, so that
/// equivalent patterns build bit-identical geometries.
pub fn canonical(steps: &[isize]) -> Vec<isize> {
    let mut ret = steps.to_vec();
    ret.sort_by_key(|&s| (s.unsigned_abs(), s < 0));
    ret
}

/// Apply `steps` to a copy of `coords`. Step `±k` moves coordinate `k` by
/// `±deltas[k-1]`, and repeated steps accumulate.
pub fn displace(coords: &[f64], steps: &[isize], deltas: &[f64]) -> Vec<f64> {
    let mut ret = coords.to_vec();
    for &s in &canonical(steps) {
        let k = s.unsigned_abs() - 1;
        if s < 0 {
            ret[k] -= deltas[k];
        } else {
            ret[k] += deltas[k];
        }
    }
    ret
}
