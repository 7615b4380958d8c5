//! The field-source contract shared by model and data sources.

use undulator_model::device::InsertionDeviceModel;
use undulator_solver::{Handle, SolverContext};
use undulator_types::error::{UndulatorError, UndulatorResult};

/// A coordinate argument: a scalar, or the one swept axis of a call.
#[derive(Debug, Clone)]
pub enum Coordinate {
    Scalar(f64),
    Sweep(Vec<f64>),
}

impl From<f64> for Coordinate {
    fn from(v: f64) -> Self {
        Coordinate::Scalar(v)
    }
}

impl From<Vec<f64>> for Coordinate {
    fn from(v: Vec<f64>) -> Self {
        Coordinate::Sweep(v)
    }
}

/// Common capability set of model and data sources.
pub trait FieldSource {
    /// Field [T] at a point [mm].
    fn field_at(&self, point: [f64; 3]) -> UndulatorResult<[f64; 3]>;

    /// Field along at most one swept axis. Scalars produce a length-1
    /// sequence; two or more sweeps are a shape error. The output order
    /// follows the swept axis.
    fn get_field(
        &self,
        x: Coordinate,
        y: Coordinate,
        z: Coordinate,
    ) -> UndulatorResult<Vec<[f64; 3]>> {
        let sweeps = [&x, &y, &z]
            .iter()
            .filter(|c| matches!(c, Coordinate::Sweep(_)))
            .count();
        if sweeps > 1 {
            return Err(UndulatorError::Shape(
                "at most one axis may be a sequence per call".to_string(),
            ));
        }

        let points: Vec<[f64; 3]> = match (&x, &y, &z) {
            (Coordinate::Sweep(xs), Coordinate::Scalar(y0), Coordinate::Scalar(z0)) => {
                xs.iter().map(|&xi| [xi, *y0, *z0]).collect()
            }
            (Coordinate::Scalar(x0), Coordinate::Sweep(ys), Coordinate::Scalar(z0)) => {
                ys.iter().map(|&yi| [*x0, yi, *z0]).collect()
            }
            (Coordinate::Scalar(x0), Coordinate::Scalar(y0), Coordinate::Sweep(zs)) => {
                zs.iter().map(|&zi| [*x0, *y0, zi]).collect()
            }
            (Coordinate::Scalar(x0), Coordinate::Scalar(y0), Coordinate::Scalar(z0)) => {
                vec![[*x0, *y0, *z0]]
            }
            _ => unreachable!("multiple sweeps rejected above"),
        };

        points.iter().map(|&p| self.field_at(p)).collect()
    }

    /// Bulk evaluation; implementations with a parallel backend forward
    /// the `(nproc, chunksize)` hints, the default path is serial.
    fn field_at_many(
        &self,
        points: &[[f64; 3]],
        _nproc: Option<usize>,
        _chunksize: Option<usize>,
    ) -> UndulatorResult<Vec<[f64; 3]>> {
        points.iter().map(|&p| self.field_at(p)).collect()
    }
}

/// Field source backed by a solved device model in a solver context.
pub struct ModelFieldSource<'a> {
    ctx: &'a SolverContext,
    handle: Handle,
}

impl<'a> ModelFieldSource<'a> {
    pub fn new(ctx: &'a SolverContext, handle: Handle) -> Self {
        ModelFieldSource { ctx, handle }
    }

    /// Borrow the composite handle of a built device.
    pub fn from_device(
        ctx: &'a SolverContext,
        model: &InsertionDeviceModel,
    ) -> UndulatorResult<Self> {
        let handle = model.handle().ok_or_else(|| {
            UndulatorError::Solver("device has no solver geometry; call build() first".to_string())
        })?;
        Ok(ModelFieldSource { ctx, handle })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl FieldSource for ModelFieldSource<'_> {
    fn field_at(&self, point: [f64; 3]) -> UndulatorResult<[f64; 3]> {
        self.ctx.field_at(self.handle, point)
    }

    fn field_at_many(
        &self,
        points: &[[f64; 3]],
        nproc: Option<usize>,
        chunksize: Option<usize>,
    ) -> UndulatorResult<Vec<[f64; 3]>> {
        self.ctx.field_at_many(self.handle, points, nproc, chunksize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UniformField([f64; 3]);

    impl FieldSource for UniformField {
        fn field_at(&self, _point: [f64; 3]) -> UndulatorResult<[f64; 3]> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_all_scalars_yield_single_sample() {
        let src = UniformField([0.1, 0.2, 0.3]);
        let out = src
            .get_field(0.0.into(), 0.0.into(), 0.0.into())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_single_sweep_preserves_order() {
        let src = UniformField([0.0, 1.0, 0.0]);
        let out = src
            .get_field(0.0.into(), 0.0.into(), vec![3.0, 1.0, 2.0].into())
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_two_sweeps_rejected() {
        let src = UniformField([0.0; 3]);
        let err = src
            .get_field(vec![0.0].into(), 0.0.into(), vec![0.0].into())
            .unwrap_err();
        assert!(matches!(err, UndulatorError::Shape(_)));
    }

    #[test]
    fn test_default_bulk_matches_pointwise() {
        let src = UniformField([0.5, 0.0, -0.5]);
        let points = vec![[0.0; 3], [1.0, 2.0, 3.0]];
        let out = src.field_at_many(&points, None, None).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], [0.5, 0.0, -0.5]);
    }
}
