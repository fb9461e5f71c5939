use itertools::izip;

/// Row-major strides of a 2-dimensional shape, used to move between `(row,col)` coordinates and
/// linear element indexes.
#[derive(Debug,Clone,Copy)]
pub struct Strides {
    shape : [usize;2],
}

impl Strides {
    pub fn from_shape(shape : &[usize;2]) -> Strides { Strides{ shape : *shape } }
    pub fn to_linear(&self, i : usize, j : usize) -> usize { i * self.shape[1] + j }
    pub fn to_index(&self, k : usize) -> (usize,usize) { (k / self.shape[1], k % self.shape[1]) }

    /// Linear index of `(i,j)`, or `None` if it is outside the shape.
    pub fn to_linear_checked(&self, i : usize, j : usize) -> Option<usize> {
        if i < self.shape[0] && j < self.shape[1] { Some(self.to_linear(i,j)) } else { None }
    }
}

pub trait ShapeToStridesEx {
    fn to_strides(&self) -> Strides;
}

impl ShapeToStridesEx for [usize;2] {
    fn to_strides(&self) -> Strides { Strides::from_shape(self) }
}

pub trait Cummulate {
    fn cummulate(& mut self);
}

impl<T> Cummulate for [T] where
    T : Copy+std::ops::AddAssign
{
    fn cummulate(& mut self) {
        if ! self.is_empty() {
            let v0 = self[0];
            self[1..].iter_mut().fold(v0,|c,v| { *v += c; *v });
        }
    }
}

pub fn dot(a : &[f64], b : &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&a,&b)| a*b).sum()
}

pub fn inf_norm(a : &[f64]) -> f64 {
    a.iter().fold(0.0, |m,&v| m.max(v.abs()))
}

/// `max_i |a_i - b_i|`
pub fn inf_dist(a : &[f64], b : &[f64]) -> f64 {
    izip!(a.iter(),b.iter()).fold(0.0, |m,(&a,&b)| m.max((a-b).abs()))
}

pub fn sum_abs(a : &[f64]) -> f64 {
    a.iter().map(|v| v.abs()).sum()
}
