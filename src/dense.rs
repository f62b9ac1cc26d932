use std::ops::Range;

use smallvec::SmallVec;

use crate::buffer::Buffer;
use crate::dtype::{DType, Scalar};
use crate::errors::{BroadcastMismatchSnafu, RegionOutOfBoundsSnafu, Result, ShapeLenMismatchSnafu};

/// Per-axis extents or indices; arrays are rarely more than a few axes deep.
pub type Dims = SmallVec<[usize; 4]>;

/// A per-axis coordinate range. An empty request means "whole array".
pub type Region = SmallVec<[Range<usize>; 4]>;

pub fn region_of_shape(shape: &[usize]) -> Region {
    shape.iter().map(|&n| 0..n).collect()
}

pub fn region_shape(region: &[Range<usize>]) -> Dims {
    region.iter().map(|r| r.end - r.start).collect()
}

pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Broadcast shape of two operand shapes (numpy trailing-axis rule: the
/// result is the right-aligned elementwise maximum, and every axis must
/// equal that maximum or 1).
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Dims> {
    let nd = a.len().max(b.len());
    let mut out: Dims = SmallVec::from_elem(0, nd);
    for i in 0..nd {
        let da = if i + a.len() >= nd { a[i + a.len() - nd] } else { 1 };
        let db = if i + b.len() >= nd { b[i + b.len() - nd] } else { 1 };
        let m = da.max(db);
        if (da != m && da != 1) || (db != m && db != 1) {
            return BroadcastMismatchSnafu {
                lhs: a.to_vec(),
                rhs: b.to_vec(),
            }
            .fail();
        }
        out[i] = m;
    }
    Ok(out)
}

/// Axis-wise intersection of two same-rank regions, `None` when disjoint
/// or empty along any axis.
pub fn intersect_regions(a: &[Range<usize>], b: &[Range<usize>]) -> Option<Region> {
    debug_assert_eq!(a.len(), b.len());
    let mut out = Region::new();
    for (ra, rb) in a.iter().zip(b.iter()) {
        let start = ra.start.max(rb.start);
        let end = ra.end.min(rb.end);
        if start >= end {
            return None;
        }
        out.push(start..end);
    }
    Some(out)
}

/// Row-major strides (last axis fastest).
pub(crate) fn strides_of(shape: &[usize]) -> Dims {
    let mut strides: Dims = SmallVec::from_elem(1, shape.len());
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// An in-memory n-dimensional array: a shape over a flat row-major [`Buffer`].
///
/// A zero-rank `Dense` (empty shape, one element) is the result of a full
/// reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    shape: Dims,
    data: Buffer,
}

impl Dense {
    pub fn new(shape: impl Into<Dims>, data: Buffer) -> Result<Dense> {
        let shape = shape.into();
        let expected = num_elements(&shape);
        if data.len() != expected {
            return ShapeLenMismatchSnafu {
                shape: shape.to_vec(),
                expected,
                got: data.len(),
            }
            .fail();
        }
        Ok(Dense { shape, data })
    }

    pub fn zeros(shape: impl Into<Dims>, dtype: DType) -> Dense {
        let shape = shape.into();
        let len = num_elements(&shape);
        Dense {
            shape,
            data: Buffer::zeros(dtype, len),
        }
    }

    pub fn filled(shape: impl Into<Dims>, value: Scalar) -> Dense {
        let shape = shape.into();
        let len = num_elements(&shape);
        Dense {
            shape,
            data: Buffer::filled(value, len),
        }
    }

    pub fn from_f64(shape: impl Into<Dims>, values: Vec<f64>) -> Result<Dense> {
        Dense::new(shape, Buffer::F64(values))
    }

    pub fn from_i64(shape: impl Into<Dims>, values: Vec<i64>) -> Result<Dense> {
        Dense::new(shape, Buffer::I64(values))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn buffer(&self) -> &Buffer {
        &self.data
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.data
    }

    pub fn into_buffer(self) -> Buffer {
        self.data
    }

    pub fn get(&self, index: &[usize]) -> Scalar {
        let strides = strides_of(&self.shape);
        let off: usize = index.iter().zip(strides.iter()).map(|(i, s)| i * s).sum();
        self.data.get(off)
    }

    /// The single element of a zero-rank or one-element array.
    pub fn item(&self) -> Option<Scalar> {
        (self.data.len() == 1).then(|| self.data.get(0))
    }

    pub fn cast(&self, dtype: DType) -> Dense {
        Dense {
            shape: self.shape.clone(),
            data: self.data.cast(dtype),
        }
    }

    pub fn map(&self, dtype: DType, f: impl Fn(Scalar) -> Scalar) -> Dense {
        let mut out = Buffer::zeros(dtype, self.len());
        for i in 0..self.len() {
            out.set(i, f(self.data.get(i)));
        }
        Dense {
            shape: self.shape.clone(),
            data: out,
        }
    }

    fn check_region(&self, region: &[Range<usize>]) -> Result<()> {
        let ok = region.len() == self.shape.len()
            && region
                .iter()
                .zip(self.shape.iter())
                .all(|(r, &n)| r.start <= r.end && r.end <= n);
        if !ok {
            return RegionOutOfBoundsSnafu {
                region: region.iter().map(|r| (r.start, r.end)).collect::<Vec<_>>(),
                shape: self.shape.to_vec(),
            }
            .fail();
        }
        Ok(())
    }

    /// Copy out a rectangular region as a new array.
    pub fn read_region(&self, region: &[Range<usize>]) -> Result<Dense> {
        self.check_region(region)?;
        let out_shape = region_shape(region);
        let mut out = Buffer::zeros(self.dtype(), num_elements(&out_shape));
        let mut dst = 0;
        for_each_row(&self.shape, region, |src, len| {
            out.copy_from(&self.data, src, dst, len);
            dst += len;
        });
        Dense::new(out_shape, out)
    }

    /// Write `src` (whose shape must equal the region's) into a region.
    pub fn write_region(&mut self, region: &[Range<usize>], src: &Dense) -> Result<()> {
        self.check_region(region)?;
        let cast;
        let src_buf = if src.dtype() == self.dtype() {
            src.buffer()
        } else {
            cast = src.data.cast(self.dtype());
            &cast
        };
        let mut read = 0;
        for_each_row(&self.shape, region, |dst, len| {
            self.data.copy_from(src_buf, read, dst, len);
            read += len;
        });
        Ok(())
    }

    pub fn fill_region(&mut self, region: &[Range<usize>], value: Scalar) -> Result<()> {
        self.check_region(region)?;
        for_each_row(&self.shape, region, |dst, len| {
            self.data.fill_range(dst, len, value);
        });
        Ok(())
    }

    /// Combine `src` into a region elementwise with `f(current, incoming)`.
    pub fn combine_region(
        &mut self,
        region: &[Range<usize>],
        src: &Dense,
        f: impl Fn(Scalar, Scalar) -> Scalar,
    ) -> Result<()> {
        self.check_region(region)?;
        let mut read = 0;
        for_each_row(&self.shape, region, |dst, len| {
            for k in 0..len {
                let cur = self.data.get(dst + k);
                self.data.set(dst + k, f(cur, src.data.get(read + k)));
            }
            read += len;
        });
        Ok(())
    }

    /// Combine a single value into every element of a region.
    pub fn combine_region_uniform(
        &mut self,
        region: &[Range<usize>],
        value: Scalar,
        f: impl Fn(Scalar, Scalar) -> Scalar,
    ) -> Result<()> {
        self.check_region(region)?;
        for_each_row(&self.shape, region, |dst, len| {
            for k in 0..len {
                let cur = self.data.get(dst + k);
                self.data.set(dst + k, f(cur, value));
            }
        });
        Ok(())
    }

    /// Materialize this array broadcast up to `target` (numpy trailing-axis
    /// rule: each axis must match or be 1).
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Dense> {
        if self.shape.as_slice() == target {
            return Ok(self.clone());
        }
        let tnd = target.len();
        let snd = self.shape.len();
        if snd > tnd {
            return BroadcastMismatchSnafu {
                lhs: self.shape.to_vec(),
                rhs: target.to_vec(),
            }
            .fail();
        }
        let src_strides = strides_of(&self.shape);
        // Source stride per target axis; 0 on broadcast (size-1 or missing) axes.
        let mut t_strides: Dims = SmallVec::from_elem(0, tnd);
        for j in 0..tnd {
            if j >= tnd - snd {
                let k = j - (tnd - snd);
                if self.shape[k] == target[j] {
                    t_strides[j] = src_strides[k];
                } else if self.shape[k] != 1 {
                    return BroadcastMismatchSnafu {
                        lhs: self.shape.to_vec(),
                        rhs: target.to_vec(),
                    }
                    .fail();
                }
            }
        }

        let out_len = num_elements(target);
        let mut out = Buffer::zeros(self.dtype(), out_len);
        if tnd == 0 {
            out.set(0, self.data.get(0));
            return Dense::new(Dims::new(), out);
        }

        let row_len = target[tnd - 1];
        let rows = out_len / row_len.max(1);
        let mut pos: Dims = SmallVec::from_elem(0, tnd - 1);
        let mut dst = 0;
        for _ in 0..rows {
            let base: usize = pos.iter().zip(t_strides.iter()).map(|(p, s)| p * s).sum();
            if t_strides[tnd - 1] == 1 {
                out.copy_from(&self.data, base, dst, row_len);
            } else {
                // Broadcast along the innermost axis: one repeated value.
                out.fill_range(dst, row_len, self.data.get(base));
            }
            dst += row_len;
            for ax in (0..tnd - 1).rev() {
                pos[ax] += 1;
                if pos[ax] < target[ax] {
                    break;
                }
                pos[ax] = 0;
            }
        }
        Dense::new(Dims::from_slice(target), out)
    }

    /// Reduce along the flagged axes, keeping them as size 1.
    pub fn reduce_axes(
        &self,
        reduced: &[bool],
        init: Scalar,
        f: impl Fn(Scalar, Scalar) -> Scalar,
    ) -> Dense {
        let out_shape: Dims = self
            .shape
            .iter()
            .zip(reduced.iter())
            .map(|(&n, &r)| if r { 1 } else { n })
            .collect();
        let out_strides = strides_of(&out_shape);
        let mut out = Buffer::filled(init, num_elements(&out_shape));

        let nd = self.shape.len();
        let mut pos: Dims = SmallVec::from_elem(0, nd);
        for i in 0..self.len() {
            let off: usize = pos
                .iter()
                .enumerate()
                .map(|(ax, &p)| if reduced[ax] { 0 } else { p * out_strides[ax] })
                .sum();
            out.set(off, f(out.get(off), self.data.get(i)));
            for ax in (0..nd).rev() {
                pos[ax] += 1;
                if pos[ax] < self.shape[ax] {
                    break;
                }
                pos[ax] = 0;
            }
        }
        Dense {
            shape: out_shape,
            data: out,
        }
    }

    /// Drop the flagged axes (each must have size 1).
    pub fn squeeze_axes(&self, drop: &[bool]) -> Dense {
        let shape: Dims = self
            .shape
            .iter()
            .zip(drop.iter())
            .filter(|(_, &d)| !d)
            .map(|(&n, _)| n)
            .collect();
        Dense {
            shape,
            data: self.data.clone(),
        }
    }
}

/// Visit a region of a row-major array as contiguous innermost-axis runs,
/// calling `f(flat_offset, run_len)` for each run.
fn for_each_row(shape: &[usize], region: &[Range<usize>], mut f: impl FnMut(usize, usize)) {
    let nd = shape.len();
    if nd == 0 {
        f(0, 1);
        return;
    }
    if region.iter().any(|r| r.start >= r.end) {
        return;
    }
    let strides = strides_of(shape);
    let row_len = region[nd - 1].end - region[nd - 1].start;
    let outer = &region[..nd - 1];
    let mut pos: Dims = outer.iter().map(|r| r.start).collect();
    loop {
        let base: usize = pos
            .iter()
            .zip(strides.iter())
            .map(|(p, s)| p * s)
            .sum::<usize>()
            + region[nd - 1].start * strides[nd - 1];
        f(base, row_len);
        let mut ax = nd - 1;
        loop {
            if ax == 0 {
                return;
            }
            ax -= 1;
            pos[ax] += 1;
            if pos[ax] < region[ax].end {
                break;
            }
            pos[ax] = region[ax].start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_read_write_region() {
        let d = Dense::from_i64(vec![3, 4], (0..12).collect()).unwrap();
        let r: Region = smallvec![1..3, 1..3];
        let sub = d.read_region(&r).unwrap();
        assert_eq!(sub.shape(), &[2, 2]);
        assert_eq!(sub.buffer(), &Buffer::I64(vec![5, 6, 9, 10]));

        let mut out = Dense::zeros(vec![3, 4], DType::Int64);
        out.write_region(&r, &sub).unwrap();
        assert_eq!(out.get(&[1, 1]), Scalar::I64(5));
        assert_eq!(out.get(&[2, 2]), Scalar::I64(10));
        assert_eq!(out.get(&[0, 0]), Scalar::I64(0));
    }

    #[test]
    fn test_region_bounds_checked() {
        let d = Dense::zeros(vec![2, 2], DType::Float64);
        let r: Region = smallvec![0..3, 0..1];
        assert!(d.read_region(&r).is_err());
    }

    #[test]
    fn test_broadcast_col_to_matrix() {
        let col = Dense::from_i64(vec![3, 1], vec![1, 2, 3]).unwrap();
        let b = col.broadcast_to(&[3, 4]).unwrap();
        assert_eq!(b.shape(), &[3, 4]);
        assert_eq!(b.buffer(), &Buffer::I64(vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]));
    }

    #[test]
    fn test_broadcast_row_and_missing_axis() {
        let row = Dense::from_i64(vec![4], vec![1, 2, 3, 4]).unwrap();
        let b = row.broadcast_to(&[2, 4]).unwrap();
        assert_eq!(b.buffer(), &Buffer::I64(vec![1, 2, 3, 4, 1, 2, 3, 4]));

        let bad = Dense::from_i64(vec![3], vec![1, 2, 3]).unwrap();
        assert!(bad.broadcast_to(&[2, 4]).is_err());
    }

    #[test]
    fn test_reduce_axes_keepdims() {
        let d = Dense::from_i64(vec![2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let summed = d.reduce_axes(&[false, true], Scalar::I64(0), |a, b| {
            Scalar::I64(a.as_i64() + b.as_i64())
        });
        assert_eq!(summed.shape(), &[2, 1]);
        assert_eq!(summed.buffer(), &Buffer::I64(vec![6, 15]));

        let squeezed = summed.squeeze_axes(&[false, true]);
        assert_eq!(squeezed.shape(), &[2]);
    }
}
