//! Per-frame correspondences and the session-wide correspondence store.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::{CorrespondenceView, Pt2, Pt3};

/// Number of cameras in the rig (2×2 layout).
pub const NUM_CAMERAS: usize = 4;

/// One capture event: the target grid plus each camera's detections.
///
/// Detections are `None` for cameras that did not see the target. When
/// present, a detection list has the same length and corner ordering as
/// `object_points`, so index `i` refers to the same physical corner in every
/// camera. Deserialization runs the same checks as [`CalibrationFrame::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFrame")]
pub struct CalibrationFrame {
    object_points: Vec<Pt3>,
    detections: [Option<Vec<Pt2>>; NUM_CAMERAS],
}

#[derive(Deserialize)]
struct RawFrame {
    object_points: Vec<Pt3>,
    detections: [Option<Vec<Pt2>>; NUM_CAMERAS],
}

impl TryFrom<RawFrame> for CalibrationFrame {
    type Error = anyhow::Error;

    fn try_from(raw: RawFrame) -> Result<Self> {
        Self::new(raw.object_points, raw.detections)
    }
}

impl CalibrationFrame {
    /// # Errors
    ///
    /// Returns an error if any present detection list differs in length from
    /// the object points.
    pub fn new(object_points: Vec<Pt3>, detections: [Option<Vec<Pt2>>; NUM_CAMERAS]) -> Result<Self> {
        ensure!(!object_points.is_empty(), "frame has no object points");
        for (cam, det) in detections.iter().enumerate() {
            if let Some(det) = det {
                ensure!(
                    det.len() == object_points.len(),
                    "camera {} has {} corners, expected {}",
                    cam,
                    det.len(),
                    object_points.len()
                );
            }
        }
        Ok(Self {
            object_points,
            detections,
        })
    }

    pub fn object_points(&self) -> &[Pt3] {
        &self.object_points
    }

    /// Detected corners of camera `cam`, if it saw the target.
    pub fn detection(&self, cam: usize) -> Option<&[Pt2]> {
        self.detections.get(cam)?.as_deref()
    }

    pub fn has_detection(&self, cam: usize) -> bool {
        self.detection(cam).is_some()
    }

    /// Number of cameras that detected the target.
    pub fn num_detected(&self) -> usize {
        self.detections.iter().filter(|d| d.is_some()).count()
    }

    /// Indices of cameras that detected the target.
    pub fn detected_cameras(&self) -> Vec<usize> {
        (0..NUM_CAMERAS).filter(|&c| self.has_detection(c)).collect()
    }

    /// True when at least `quorum` cameras detected the target.
    pub fn meets_quorum(&self, quorum: usize) -> bool {
        self.num_detected() >= quorum
    }

    /// Correspondences for a single camera.
    pub fn view(&self, cam: usize) -> Option<CorrespondenceView> {
        let det = self.detection(cam)?;
        Some(CorrespondenceView {
            points_3d: self.object_points.clone(),
            points_2d: det.to_vec(),
        })
    }
}

/// Append-only store of accepted frames for one calibration run.
///
/// Frames are never removed individually; [`CorrespondenceStore::reset`]
/// clears the whole store between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStore")]
pub struct CorrespondenceStore {
    frames: Vec<CalibrationFrame>,
}

#[derive(Deserialize)]
struct RawStore {
    frames: Vec<CalibrationFrame>,
}

impl TryFrom<RawStore> for CorrespondenceStore {
    type Error = anyhow::Error;

    fn try_from(raw: RawStore) -> Result<Self> {
        Self::from_frames(raw.frames)
    }
}

impl CorrespondenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns an error if the frames do not share the same target grid.
    pub fn from_frames(frames: Vec<CalibrationFrame>) -> Result<Self> {
        let mut store = Self::new();
        for frame in frames {
            store.push(frame)?;
        }
        Ok(store)
    }

    /// Append an accepted frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame's object points differ in count from
    /// frames already in the store.
    pub fn push(&mut self, frame: CalibrationFrame) -> Result<()> {
        if let Some(first) = self.frames.first() {
            ensure!(
                first.object_points.len() == frame.object_points.len(),
                "frame has {} object points, store uses {}",
                frame.object_points.len(),
                first.object_points.len()
            );
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn frames(&self) -> &[CalibrationFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Views of camera `cam` with their frame indices.
    pub fn camera_views(&self, cam: usize) -> Vec<(usize, CorrespondenceView)> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| f.view(cam).map(|v| (idx, v)))
            .collect()
    }

    /// Frames in which both `a` and `b` detected the target.
    pub fn common_views(
        &self,
        a: usize,
        b: usize,
    ) -> Vec<(usize, CorrespondenceView, CorrespondenceView)> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| Some((idx, f.view(a)?, f.view(b)?)))
            .collect()
    }

    /// Indices of frames seen by every camera.
    pub fn complete_frames(&self) -> Vec<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.num_detected() == NUM_CAMERAS)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Number of frames each camera detected the target in.
    pub fn detection_counts(&self) -> [usize; NUM_CAMERAS] {
        let mut counts = [0; NUM_CAMERAS];
        for frame in &self.frames {
            for (cam, count) in counts.iter_mut().enumerate() {
                if frame.has_detection(cam) {
                    *count += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Pt3> {
        vec![
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(25.0, 0.0, 0.0),
            Pt3::new(0.0, 25.0, 0.0),
        ]
    }

    fn corners() -> Option<Vec<Pt2>> {
        Some(vec![
            Pt2::new(10.0, 10.0),
            Pt2::new(20.0, 10.0),
            Pt2::new(10.0, 20.0),
        ])
    }

    #[test]
    fn frame_rejects_length_mismatch() {
        let bad = [corners(), Some(vec![Pt2::new(0.0, 0.0)]), None, None];
        assert!(CalibrationFrame::new(grid(), bad).is_err());
    }

    #[test]
    fn quorum_counts_present_detections() {
        let frame = CalibrationFrame::new(grid(), [corners(), None, corners(), corners()]).unwrap();
        assert_eq!(frame.num_detected(), 3);
        assert!(frame.meets_quorum(3));
        assert!(!frame.meets_quorum(4));
        assert_eq!(frame.detected_cameras(), vec![0, 2, 3]);
    }

    #[test]
    fn store_queries() {
        let mut store = CorrespondenceStore::new();
        store
            .push(CalibrationFrame::new(grid(), [corners(), corners(), corners(), corners()]).unwrap())
            .unwrap();
        store
            .push(CalibrationFrame::new(grid(), [corners(), None, corners(), corners()]).unwrap())
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.detection_counts(), [2, 1, 2, 2]);
        assert_eq!(store.common_views(0, 1).len(), 1);
        assert_eq!(store.common_views(0, 3).len(), 2);
        assert_eq!(store.complete_frames(), vec![0]);
        assert_eq!(store.camera_views(1)[0].0, 0);

        store.reset();
        assert!(store.is_empty());
    }

    #[test]
    fn store_rejects_different_grid() {
        let mut store = CorrespondenceStore::new();
        store
            .push(CalibrationFrame::new(grid(), [corners(), corners(), corners(), None]).unwrap())
            .unwrap();
        let small = CalibrationFrame::new(
            vec![Pt3::new(0.0, 0.0, 0.0)],
            [Some(vec![Pt2::new(1.0, 1.0)]), None, None, None],
        )
        .unwrap();
        assert!(store.push(small).is_err());
    }

    #[test]
    fn store_json_roundtrip() {
        let store = CorrespondenceStore::from_frames(vec![CalibrationFrame::new(
            grid(),
            [corners(), None, corners(), corners()],
        )
        .unwrap()])
        .unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let restored: CorrespondenceStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, store);
    }

    #[test]
    fn deserialized_frame_is_length_checked() {
        let frame = CalibrationFrame::new(grid(), [corners(), None, None, None]).unwrap();
        let mut json = serde_json::to_value(&frame).unwrap();
        json["detections"][0] = serde_json::json!([[10.0, 10.0]]);
        let err = serde_json::from_value::<CalibrationFrame>(json).unwrap_err();
        assert!(err.to_string().contains("camera 0 has 1 corners, expected 3"), "{err}");

        let empty = serde_json::json!({ "object_points": [], "detections": [null, null, null, null] });
        assert!(serde_json::from_value::<CalibrationFrame>(empty).is_err());
    }

    #[test]
    fn deserialized_store_rejects_mixed_grids() {
        let full = CalibrationFrame::new(grid(), [corners(), None, None, None]).unwrap();
        let small = CalibrationFrame::new(
            vec![Pt3::new(0.0, 0.0, 0.0)],
            [Some(vec![Pt2::new(1.0, 1.0)]), None, None, None],
        )
        .unwrap();
        let json = serde_json::json!({ "frames": [full, small] });
        let err = serde_json::from_value::<CorrespondenceStore>(json).unwrap_err();
        assert!(err.to_string().contains("frame has 1 object points, store uses 3"), "{err}");
    }
}
