use anyhow::{ensure, Result};
use nalgebra::{Quaternion, Translation3, UnitQuaternion, Vector4};
use quadcal_core::{Iso3, Vec3};

/// Average rigid transforms: arithmetic mean of translations and a
/// hemisphere-aligned mean of rotation quaternions.
///
/// Adequate for clustered estimates of the same pose (e.g. one board pose
/// seen from several cameras); not a Karcher mean.
pub fn average_isometries(poses: &[Iso3]) -> Result<Iso3> {
    ensure!(!poses.is_empty(), "cannot average an empty pose set");

    let n = poses.len() as f64;
    let mut t_sum = Vec3::zeros();
    for p in poses {
        t_sum += p.translation.vector;
    }

    let q_ref = poses[0].rotation.into_inner().coords;
    let mut q_sum = Vector4::zeros();
    for p in poses {
        let q = p.rotation.into_inner().coords;
        q_sum += if q.dot(&q_ref) < 0.0 { -q } else { q };
    }
    ensure!(q_sum.norm() > 0.0, "rotation average is degenerate");
    let rot = UnitQuaternion::from_quaternion(Quaternion::from(q_sum));

    Ok(Iso3::from_parts(Translation3::from(t_sum / n), rot))
}
