//! Integration tests for the camera model and the synthetic 2×2 rig.

use approx::assert_relative_eq;
use quadcal_core::synthetic::noise::UniformPixelNoise;
use quadcal_core::synthetic::rig::SyntheticRig;
use quadcal_core::{
    BrownConrady5, CalibrationFrame, CameraIntrinsics, CorrespondenceStore, FxFyCxCySkew, ImageSize,
    Pt3, Real, RigLayout, Vec2, Vec3, NUM_CAMERAS,
};

fn highres_camera() -> CameraIntrinsics {
    CameraIntrinsics {
        k: FxFyCxCySkew {
            fx: 1000.0,
            fy: 1002.0,
            cx: 642.0,
            cy: 398.0,
            skew: 0.0,
        },
        dist: BrownConrady5 {
            k1: -0.12,
            k2: 0.03,
            k3: 0.0,
            p1: 0.0008,
            p2: -0.0004,
            iters: 12,
        },
        reproj_error: 0.2,
        image_size: ImageSize::new(1280, 800),
    }
}

#[test]
fn distorted_projection_roundtrips() {
    let camera = highres_camera().camera();
    let points = [
        Pt3::new(0.0, 0.0, 500.0),
        Pt3::new(120.0, -80.0, 600.0),
        Pt3::new(-200.0, 110.0, 450.0),
    ];

    for p in &points {
        let px = camera.project_point(p).unwrap();
        let ray = camera.backproject_pixel(&px);
        let expected = p.coords.normalize();
        assert_relative_eq!(ray.dir, expected, epsilon = 1e-7);
    }
    assert!(camera.project_point(&Pt3::new(0.0, 0.0, -1.0)).is_none());
}

#[test]
fn rescaled_intrinsics_scale_pixels_not_distortion() {
    let full = highres_camera();
    let half = full.rescaled_to(ImageSize::new(640, 400));
    assert_eq!(half.dist, full.dist);
    assert_eq!(half.reproj_error, full.reproj_error);

    let p = Pt3::new(90.0, 40.0, 700.0);
    let px_full: Vec2 = full.camera().project_point(&p).unwrap();
    let px_half: Vec2 = half.camera().project_point(&p).unwrap();
    assert_relative_eq!(px_half, px_full * 0.5, epsilon = 1e-9);
}

#[test]
fn synthetic_rig_matches_default_layout() {
    let rig = SyntheticRig::default();
    let layout = RigLayout::default();

    let centroid = rig.poses.iter().map(|p| p.tvec).sum::<Vec3>() / NUM_CAMERAS as Real;
    assert_relative_eq!(centroid, Vec3::zeros(), epsilon = 1e-12);

    for row in layout.grid {
        let (left, right) = (rig.poses[row[0]].tvec, rig.poses[row[1]].tvec);
        assert!(right.x > left.x, "row {row:?} is not left-to-right");
        assert_relative_eq!((right - left).norm(), 50.0, epsilon = 1e-9);
    }
    for col in 0..2 {
        let (top, bottom) = (rig.poses[layout.grid[0][col]].tvec, rig.poses[layout.grid[1][col]].tvec);
        assert!(bottom.y > top.y, "column {col} is not top-to-bottom");
    }
    for pair in &layout.rect_pairs {
        let d = (rig.poses[pair.first].tvec - rig.poses[pair.second].tvec).norm();
        assert_relative_eq!(d, 50.0, epsilon = 1e-9);
    }
}

#[test]
fn store_tracks_partial_detections() {
    let rig = SyntheticRig::default();
    let noise = UniformPixelNoise::none();
    let frames: Vec<CalibrationFrame> = (0..6)
        .map(|idx| {
            let detections = std::array::from_fn(|cam| (cam != idx % NUM_CAMERAS).then(|| rig.project(idx, cam, noise).unwrap()));
            CalibrationFrame::new(rig.object_points(), detections).unwrap()
        })
        .collect();
    let store = CorrespondenceStore::from_frames(frames).unwrap();

    assert_eq!(store.len(), 6);
    assert_eq!(store.detection_counts(), [4, 4, 5, 5]);
    assert!(store.complete_frames().is_empty());
    assert!(store.frames().iter().all(|f| f.meets_quorum(3)));
    assert_eq!(store.common_views(0, 3).len(), 3);

    let json = serde_json::to_string(&store).unwrap();
    let restored: CorrespondenceStore = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, store);
}

#[test]
fn frame_rejects_mismatched_detection_length() {
    let rig = SyntheticRig::default();
    let mut short = rig.project(0, 1, UniformPixelNoise::none()).unwrap();
    short.pop();
    let err = CalibrationFrame::new(rig.object_points(), [None, Some(short), None, None]).unwrap_err();
    assert!(err.to_string().contains("camera 1"));
}
