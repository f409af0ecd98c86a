use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::EquationTerm;
use crate::unknowns::UnknownQuantityHandler;

pub type PrescribedFn = Box<dyn Fn(f64, &mut [f64])>;

/// Where a prescribed quantity takes its value from.
pub enum DataSource {
    Constant(Vec<f64>),
    /// Values at the given (increasing) times, linearly interpolated and
    /// clamped outside the covered range.
    TimeSeries { times: Vec<f64>, values: Vec<Vec<f64>> },
    Function(PrescribedFn),
}

impl DataSource {
    pub fn function(f: impl Fn(f64, &mut [f64]) + 'static) -> Self {
        DataSource::Function(Box::new(f))
    }

    fn validate(&self, size: usize) -> Result<()> {
        match self {
            DataSource::Constant(v) if v.len() != size => Err(FvmError::config(format!(
                "prescribed constant has {} elements, unknown has {size}",
                v.len()
            ))),
            DataSource::TimeSeries { times, values } => {
                if times.is_empty() || times.len() != values.len() {
                    return Err(FvmError::config("prescribed time series needs one value per time"));
                }
                if times.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(FvmError::config("prescribed time series must have increasing times"));
                }
                if values.iter().any(|v| v.len() != size) {
                    return Err(FvmError::config(format!(
                        "prescribed time series values must have {size} elements"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Writes the value at time `t` into `out`.
    pub fn evaluate(&self, t: f64, out: &mut [f64]) {
        match self {
            DataSource::Constant(v) => out.copy_from_slice(v),
            DataSource::TimeSeries { times, values } => {
                let last = times.len() - 1;
                if t <= times[0] {
                    out.copy_from_slice(&values[0]);
                } else if t >= times[last] {
                    out.copy_from_slice(&values[last]);
                } else {
                    let k = times.partition_point(|&tk| tk <= t) - 1;
                    let w = (t - times[k]) / (times[k + 1] - times[k]);
                    for (o, (a, b)) in out.iter_mut().zip(values[k].iter().zip(&values[k + 1])) {
                        *o = (1.0 - w) * a + w * b;
                    }
                }
            }
            DataSource::Function(f) => f(t, out),
        }
    }
}

/// A quantity known in advance: contributes `data(t) - x`.
///
/// An equation made only of this term is *predetermined*: the solver stores
/// `data(t)` directly and keeps the unknown out of the linear system.
pub struct PrescribedParameter {
    source: DataSource,
    current: Vec<f64>,
}

impl PrescribedParameter {
    pub fn new(size: usize, source: DataSource) -> Result<Self> {
        source.validate(size)?;
        Ok(Self {
            source,
            current: vec![0.0; size],
        })
    }

    pub fn constant(values: Vec<f64>) -> Self {
        Self {
            current: values.clone(),
            source: DataSource::Constant(values),
        }
    }

    /// Value at the time of the last rebuild.
    pub fn values(&self) -> &[f64] {
        &self.current
    }

    pub fn size(&self) -> usize {
        self.current.len()
    }
}

impl EquationTerm for PrescribedParameter {
    fn rebuild(&mut self, t: f64, _dt: f64, _unknowns: &UnknownQuantityHandler) -> Result<()> {
        self.source.evaluate(t, &mut self.current);
        Ok(())
    }

    fn nnz_per_row(&self) -> usize {
        1
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        for (i, v) in self.current.iter().enumerate() {
            mat.set_element(i, i, -1.0)?;
            rhs[i] += v;
        }
        Ok(())
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        if vec.len() < self.size() || x.len() < self.size() {
            return Err(FvmError::config("prescribed parameter: vector shorter than the unknown"));
        }
        for (i, v) in self.current.iter().enumerate() {
            vec[i] += v - x[i];
        }
        Ok(())
    }

    fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        _x: &[f64],
        _unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        if uqty_id == deriv_id {
            for i in 0..self.size() {
                jac.set_element(i, i, -1.0)?;
            }
        }
        Ok(())
    }
}
