use nalgebra::{Point3, RealField, Vector2, Vector3};

use super::{BrownConrady5, DistortionModel, FxFyCxCySkew, IntrinsicsModel, Pinhole, ProjectionModel};
use crate::Real;

/// Unit-length viewing ray in camera coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Ray<S: RealField + Copy> {
    pub dir: Vector3<S>,
}

/// Camera composed of projection, distortion and intrinsics stages.
#[derive(Clone, Debug)]
pub struct Camera<S, P, D, K>
where
    S: RealField + Copy,
    P: ProjectionModel<S>,
    D: DistortionModel<S>,
    K: IntrinsicsModel<S>,
{
    pub proj: P,
    pub dist: D,
    pub k: K,
    _phantom: core::marker::PhantomData<S>,
}

impl<S, P, D, K> Camera<S, P, D, K>
where
    S: RealField + Copy,
    P: ProjectionModel<S>,
    D: DistortionModel<S>,
    K: IntrinsicsModel<S>,
{
    pub fn new(proj: P, dist: D, k: K) -> Self {
        Self {
            proj,
            dist,
            k,
            _phantom: core::marker::PhantomData,
        }
    }

    /// Project a point given in camera coordinates. `None` behind the camera.
    pub fn project_point_c(&self, p_c: &Vector3<S>) -> Option<Vector2<S>> {
        if p_c.z <= S::zero() {
            return None;
        }
        let n_u = self.proj.project_dir(p_c)?;
        let n_d = self.dist.distort(&n_u);
        Some(self.k.sensor_to_pixel(&n_d))
    }

    pub fn project_point(&self, p_c: &Point3<S>) -> Option<Vector2<S>> {
        self.project_point_c(&p_c.coords)
    }

    pub fn backproject_pixel(&self, px: &Vector2<S>) -> Ray<S> {
        let n_d = self.k.pixel_to_sensor(px);
        let n_u = self.dist.undistort(&n_d);
        let dir = self.proj.unproject_dir(&n_u);
        let dir = dir / dir.norm();
        Ray { dir }
    }
}

/// Pinhole camera with Brown-Conrady distortion, the model every rig camera uses.
pub type PinholeCamera = Camera<Real, Pinhole, BrownConrady5<Real>, FxFyCxCySkew<Real>>;

/// Build a [`PinholeCamera`] from intrinsics and distortion.
pub fn make_pinhole_camera(k: FxFyCxCySkew<Real>, dist: BrownConrady5<Real>) -> PinholeCamera {
    Camera::new(Pinhole, dist, k)
}
