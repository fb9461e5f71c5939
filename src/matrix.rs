//! This module provides the sparse matrix functionality used to assemble constraint systems.
//!
use itertools::izip;
use crate::error::{InvOptError, Result};
use crate::utils::*;

/// Sparse 2-dimensional matrix.
///
/// Non-zeros are stored as a sorted list of linear row-major element indexes and a matching list of
/// coefficients. One important limitation is that `height*width` cannot exceed `usize::MAX`.
#[derive(Clone,Debug,PartialEq)]
pub struct SparseMatrix {
    shape : [usize; 2],
    sp    : Vec<usize>,
    data  : Vec<f64>,
}

impl SparseMatrix {
    /// Create a new [SparseMatrix] from data, checking that the data is valid.
    ///
    /// # Arguments
    /// - `shape` Shape of the matrix.
    /// - `sp` Sparsity pattern as linear row-major indexes, sorted and without duplicates.
    /// - `data` Non-zero coefficients
    pub fn new(shape : [usize;2], sp : Vec<usize>, data : Vec<f64>) -> Result<SparseMatrix> {
        if sp.len() > 1 && sp.iter().zip(sp[1..].iter()).any(|(&i0,&i1)| i1 <= i0) {
            Err(InvOptError::dimension("Sparsity is unsorted or contains duplicates"))
        }
        else if sp.len() != data.len() {
            Err(InvOptError::dimension("Mismatching sparsity and data lengths"))
        }
        else if sp.last().map(|&k| k >= shape[0]*shape[1]).unwrap_or(false) {
            Err(InvOptError::dimension("Mismatching sparsity and shape"))
        }
        else {
            Ok(SparseMatrix{ shape, sp, data })
        }
    }

    /// Create a new [SparseMatrix] from `(row,col,value)` triplets. Triplets need not be ordered;
    /// duplicate entries are summed.
    pub fn from_triplets<I>(shape : [usize;2], it : I) -> Result<SparseMatrix> where I : IntoIterator<Item = (usize,usize,f64)> {
        let st = shape.to_strides();
        let mut sp = Vec::new();
        let mut data = Vec::new();
        for (i,j,v) in it {
            let k = st.to_linear_checked(i,j)
                .ok_or_else(|| InvOptError::dimension(format!("Index ({},{}) out of bounds for shape {:?}",i,j,shape)))?;
            sp.push(k);
            data.push(v);
        }
        Ok(SparseMatrix::from_flat_unordered(shape, sp, data))
    }

    /// Create a matrix from a row-major dense coefficient array. Zeros are not stored.
    pub fn dense(shape : [usize;2], data : &[f64]) -> Result<SparseMatrix> {
        if data.len() != shape[0]*shape[1] {
            return Err(InvOptError::dimension("Mismatching data and shape"));
        }
        let (sp,data) = data.iter().enumerate().filter(|&(_,&v)| v != 0.0).map(|(k,&v)| (k,v)).unzip();
        Ok(SparseMatrix{ shape, sp, data })
    }

    fn from_flat_unordered(shape : [usize;2], sp_unordered : Vec<usize>, data : Vec<f64>) -> SparseMatrix {
        if sp_unordered.len() < 2 || sp_unordered.iter().zip(sp_unordered[1..].iter()).all(|(a,b)| a < b) {
            return SparseMatrix{ shape, sp : sp_unordered, data };
        }

        let mut perm : Vec<usize> = (0..sp_unordered.len()).collect();
        perm.sort_by_key(|&i| sp_unordered[i]);

        let mut sp = Vec::with_capacity(perm.len());
        let mut rdata : Vec<f64> = Vec::with_capacity(perm.len());
        for &p in perm.iter() {
            let k = sp_unordered[p];
            if sp.last() == Some(&k) {
                if let Some(v) = rdata.last_mut() { *v += data[p]; }
            }
            else {
                sp.push(k);
                rdata.push(data[p]);
            }
        }
        SparseMatrix{ shape, sp, data : rdata }
    }

    pub fn zeros(shape : [usize;2]) -> SparseMatrix { SparseMatrix{ shape, sp : Vec::new(), data : Vec::new() } }

    /// Sparse identity matrix of dimension `dim`.
    pub fn eye(dim : usize) -> SparseMatrix { SparseMatrix::diag(&vec![1.0; dim]) }

    /// Sparse square matrix with `d` on the diagonal.
    pub fn diag(d : &[f64]) -> SparseMatrix {
        let dim = d.len();
        SparseMatrix{ shape : [dim,dim], sp : (0..dim*dim).step_by(dim+1).collect(), data : d.to_vec() }
    }

    /// Number of rows
    pub fn height(&self) -> usize { self.shape[0] }
    /// Number of columns
    pub fn width(&self) -> usize { self.shape[1] }
    pub fn shape(&self) -> [usize; 2] { self.shape }
    /// Return number of non-zeros.
    pub fn nnz(&self) -> usize { self.data.len() }
    pub fn data(&self) -> &[f64] { self.data.as_slice() }
    pub fn sparsity(&self) -> &[usize] { self.sp.as_slice() }

    /// Coefficient at `(i,j)`, zero if not stored.
    pub fn get(&self, i : usize, j : usize) -> f64 {
        match self.shape.to_strides().to_linear_checked(i,j) {
            Some(k) => self.sp.binary_search(&k).map(|p| self.data[p]).unwrap_or(0.0),
            None => 0.0
        }
    }

    /// Iterate over the stored entries as `(row,col,value)` in row-major order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize,usize,f64)> + '_ {
        let st = self.shape.to_strides();
        izip!(self.sp.iter(),self.data.iter()).map(move |(&k,&v)| { let (i,j) = st.to_index(k); (i,j,v) })
    }

    /// Transpose matrix and return a new matrix.
    pub fn transpose(&self) -> SparseMatrix {
        let [h,w] = self.shape;
        let n = self.sp.len();

        let mut ptr = vec![0; w+1];
        self.sp.iter().for_each(|&k| ptr[1 + k % w] += 1);
        ptr.cummulate();

        let mut rsp = vec![0usize; n];
        let mut rdata = vec![0.0; n];
        for (&k,&d) in izip!(self.sp.iter(),self.data.iter()) {
            let (i,j) = (k / w, k % w);
            let p = ptr[j];
            rsp[p] = j*h + i;
            rdata[p] = d;
            ptr[j] += 1;
        }

        SparseMatrix{ shape : [w,h], sp : rsp, data : rdata }
    }

    /// Compute `self * x`.
    pub fn mul_vec(&self, x : &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.shape[1] {
            return Err(InvOptError::dimension(format!("Cannot multiply {:?} matrix by vector of length {}",self.shape,x.len())));
        }
        let mut res = vec![0.0; self.shape[0]];
        for (i,j,v) in self.triplets() {
            res[i] += v * x[j];
        }
        Ok(res)
    }

    /// Multiply all coefficients by a scalar, inplace.
    pub fn inplace_mul_scalar(&mut self, s : f64) { self.data.iter_mut().for_each(|v| *v *= s); }

    /// Sub-matrix consisting of the given columns, in the given order.
    pub fn select_columns(&self, cols : &[usize]) -> Result<SparseMatrix> {
        let mut map = vec![usize::MAX; self.shape[1]];
        for (newj,&j) in cols.iter().enumerate() {
            if j >= self.shape[1] {
                return Err(InvOptError::dimension(format!("Column {} out of bounds",j)));
            }
            map[j] = newj;
        }
        SparseMatrix::from_triplets([self.shape[0],cols.len()],
                                    self.triplets().filter(|&(_,j,_)| map[j] < usize::MAX).map(|(i,j,v)| (i,map[j],v)))
    }

    /// Sub-matrix consisting of the given rows, in the given order.
    pub fn select_rows(&self, rows : &[usize]) -> Result<SparseMatrix> {
        self.transpose().select_columns(rows).map(|m| m.transpose())
    }

    /// Number of stored entries in each row.
    pub fn row_nnz(&self) -> Vec<usize> {
        let mut cnt = vec![0usize; self.shape[0]];
        self.sp.iter().for_each(|&k| cnt[k / self.shape[1]] += 1);
        cnt
    }

    /// Only entries on or above the diagonal.
    pub fn upper_triangle(&self) -> SparseMatrix {
        let st = self.shape.to_strides();
        let (sp,data) = izip!(self.sp.iter(),self.data.iter())
            .filter(|&(&k,_)| { let (i,j) = st.to_index(k); i <= j })
            .map(|(&k,&v)| (k,v))
            .unzip();
        SparseMatrix{ shape : self.shape, sp, data }
    }

    /// Turns the matrix into a dense row-major array by adding the missing zeros.
    pub fn to_dense(&self) -> Vec<f64> {
        let mut data = vec![0.0; self.shape[0]*self.shape[1]];
        for (&k,&v) in izip!(self.sp.iter(),self.data.iter()) {
            data[k] = v;
        }
        data
    }

    /// Compressed sparse column representation `(colptr,rowval,nzval)`.
    pub fn to_csc(&self) -> (Vec<usize>,Vec<usize>,Vec<f64>) {
        let t = self.transpose();
        let h = self.shape[0];
        let mut colptr = vec![0usize; self.shape[1]+1];
        t.sp.iter().for_each(|&k| colptr[1 + k / h] += 1);
        colptr.cummulate();
        let rowval = t.sp.iter().map(|&k| k % h).collect();
        (colptr,rowval,t.data)
    }

}

impl std::ops::Mul<f64> for SparseMatrix {
    type Output = SparseMatrix;
    fn mul(mut self,rhs : f64) -> Self::Output {
        self.inplace_mul_scalar(rhs);
        self
    }
}

impl std::ops::MulAssign<f64> for SparseMatrix {
    fn mul_assign(&mut self, rhs: f64) { self.inplace_mul_scalar(rhs) }
}

/// Assembles a matrix from blocks laid out on a grid of block rows and block columns.
///
/// Entries are addressed as `(block row, block col, local row, local col)`, so callers stacking
/// per-scenario systems never compute global offsets themselves. Entries put twice are summed.
pub struct BlockBuilder {
    row_offsets : Vec<usize>,
    col_offsets : Vec<usize>,
    entries     : Vec<(usize,usize,f64)>,
}

impl BlockBuilder {
    /// Create a builder with the given block row heights and block column widths.
    pub fn new(row_blocks : &[usize], col_blocks : &[usize]) -> BlockBuilder {
        let offsets = |sizes : &[usize]| { let mut o = Vec::with_capacity(sizes.len()+1); o.push(0); o.extend_from_slice(sizes); o.cummulate(); o };
        BlockBuilder{
            row_offsets : offsets(row_blocks),
            col_offsets : offsets(col_blocks),
            entries     : Vec::new()
        }
    }

    fn block_shape(&self, bi : usize, bj : usize) -> Result<[usize;2]> {
        if bi+1 >= self.row_offsets.len() || bj+1 >= self.col_offsets.len() {
            Err(InvOptError::dimension(format!("Block ({},{}) out of bounds",bi,bj)))
        }
        else {
            Ok([self.row_offsets[bi+1]-self.row_offsets[bi], self.col_offsets[bj+1]-self.col_offsets[bj]])
        }
    }

    /// Put a single entry into block `(bi,bj)` at local position `(i,j)`.
    pub fn put(&mut self, bi : usize, bj : usize, i : usize, j : usize, v : f64) -> Result<()> {
        let [h,w] = self.block_shape(bi,bj)?;
        if i >= h || j >= w {
            return Err(InvOptError::dimension(format!("Entry ({},{}) out of bounds for block ({},{}) of shape {:?}",i,j,bi,bj,[h,w])));
        }
        if v != 0.0 {
            self.entries.push((self.row_offsets[bi]+i, self.col_offsets[bj]+j, v));
        }
        Ok(())
    }

    /// Put a whole matrix into block `(bi,bj)`, multiplied by `scale`. The matrix must have the exact
    /// shape of the block.
    pub fn put_block(&mut self, bi : usize, bj : usize, m : &SparseMatrix, scale : f64) -> Result<()> {
        let shape = self.block_shape(bi,bj)?;
        if shape != m.shape() {
            return Err(InvOptError::dimension(format!("Block ({},{}) has shape {:?}, got {:?}",bi,bj,shape,m.shape())));
        }
        let (r0,c0) = (self.row_offsets[bi],self.col_offsets[bj]);
        self.entries.extend(m.triplets().map(|(i,j,v)| (r0+i,c0+j,scale*v)));
        Ok(())
    }

    pub fn shape(&self) -> [usize;2] {
        [ *self.row_offsets.last().unwrap_or(&0), *self.col_offsets.last().unwrap_or(&0) ]
    }

    pub fn build(self) -> Result<SparseMatrix> {
        let shape = self.shape();
        SparseMatrix::from_triplets(shape, self.entries)
    }
}
