//! Camera model building blocks and composable pipelines.
//!
//! The camera pipeline has three stages:
//!
//! 1. `ProjectionModel`: map a 3D ray to normalized coordinates (pinhole).
//! 2. `DistortionModel`: apply radial/tangential distortion in normalized space.
//! 3. `IntrinsicsModel`: map normalized coordinates to pixels (K matrix).
//!
//! The combined mapping is:
//! `pixel = intrinsics(distortion(projection(dir)))`

mod camera;
mod distortion;
mod intrinsics;
mod projection;

pub use camera::*;
pub use distortion::*;
pub use intrinsics::*;
pub use projection::*;

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn roundtrip_backproject_project_no_dist() {
        let cam = make_pinhole_camera(
            FxFyCxCySkew {
                fx: 800.0,
                fy: 810.0,
                cx: 640.0,
                cy: 360.0,
                skew: 0.0,
            },
            BrownConrady5::default(),
        );

        let px = Vector2::new(1000.0, 200.0);
        let ray = cam.backproject_pixel(&px);
        let p = ray.dir * 2.5;
        let px2 = cam.project_point_c(&p).unwrap();

        let err = (px2 - px).norm();
        assert!(err < 1e-9, "err={err}");
    }

    #[test]
    fn roundtrip_with_distortion() {
        let cam = make_pinhole_camera(
            FxFyCxCySkew {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 200.0,
                skew: 0.0,
            },
            BrownConrady5 {
                k1: -0.1,
                k2: 0.02,
                k3: 0.0,
                p1: 0.0005,
                p2: 0.0,
                iters: 20,
            },
        );

        let px = Vector2::new(450.0, 300.0);
        let ray = cam.backproject_pixel(&px);
        let px2 = cam.project_point_c(&(ray.dir * 4.0)).unwrap();
        assert!((px2 - px).norm() < 1e-6);
    }
}
