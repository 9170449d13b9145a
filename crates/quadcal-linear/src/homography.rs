use nalgebra::DMatrix;
use quadcal_core::{Mat3, Pt2};
use thiserror::Error;

use crate::math::{mat3_from_svd_row, normalize_points_2d};

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("point count mismatch: {0} plane vs {1} image")]
    CountMismatch(usize, usize),
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
}

/// Estimate `H` such that `x' ~ H x` using the normalized DLT.
///
/// Both point sets are Hartley-normalized before the SVD solve and the
/// result is denormalized and scaled so that `H[2,2] = 1`.
pub fn dlt_homography(world: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
    let n = world.len();
    if image.len() != n {
        return Err(HomographyError::CountMismatch(n, image.len()));
    }
    if n < 4 {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let (world_n, t_w) = normalize_points_2d(world).ok_or(HomographyError::Degenerate)?;
    let (image_n, t_i) = normalize_points_2d(image).ok_or(HomographyError::Degenerate)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (pw, pi)) in world_n.iter().zip(image_n.iter()).enumerate() {
        let (x, y, u, v) = (pw.x, pw.y, pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    // A has fewer rows than columns for n = 4; pad so the SVD yields a full V^T.
    if a.nrows() < 9 {
        a = a.resize_vertically(9, 0.0);
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    let h_n = mat3_from_svd_row(&v_t, v_t.nrows() - 1).ok_or(HomographyError::SvdFailed)?;

    let t_i_inv = t_i.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut h = t_i_inv * h_n * t_w;

    let scale = h[(2, 2)];
    if scale.abs() <= f64::EPSILON {
        return Err(HomographyError::Degenerate);
    }
    h /= scale;
    Ok(h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadcal_core::{from_homogeneous, to_homogeneous};

    #[test]
    fn scaled_square() {
        let w = vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(1.0, 0.0),
            Pt2::new(1.0, 1.0),
            Pt2::new(0.0, 1.0),
        ];
        let img = vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(2.0, 0.0),
            Pt2::new(2.0, 2.0),
            Pt2::new(0.0, 2.0),
        ];

        let h = dlt_homography(&w, &img).unwrap();
        assert!((h[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((h[(1, 1)] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn recovers_projective_map_in_millimetres() {
        let h_gt = Mat3::new(1.8, 0.1, 120.0, -0.05, 1.7, 80.0, 1e-4, -2e-4, 1.0);
        let world: Vec<Pt2> = (0..6)
            .flat_map(|j| (0..8).map(move |i| Pt2::new(i as f64 * 25.0, j as f64 * 25.0)))
            .collect();
        let image: Vec<Pt2> = world
            .iter()
            .map(|p| from_homogeneous(&(h_gt * to_homogeneous(p))))
            .collect();

        let h = dlt_homography(&world, &image).unwrap();
        assert!((h - h_gt).norm() < 1e-6, "diff={}", (h - h_gt).norm());
    }

    #[test]
    fn too_few_points() {
        let p = vec![Pt2::new(0.0, 0.0); 3];
        assert!(matches!(
            dlt_homography(&p, &p),
            Err(HomographyError::NotEnoughPoints(3))
        ));
    }
}
