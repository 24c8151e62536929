//! Recorded pose sessions: one JSON object per line,
//! `{"ts": <ms>, "keypoints": [[x, y, score], ...]}`.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::gesture::GestureEvent;
use crate::pose::{KeypointIndex, Pose};
use crate::session::{FrameOutput, Pipeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub ts: u64,
    pub keypoints: Vec<[f32; 3]>,
}

impl PoseRecord {
    pub fn from_pose(pose: &Pose, ts: u64) -> Self {
        Self {
            ts,
            keypoints: pose.keypoints.iter().map(|k| [k.x, k.y, k.confidence]).collect(),
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::from_rows(&self.keypoints)
    }
}

/// JSON-lines を読む。空行は飛ばす
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<PoseRecord>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", i + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PoseRecord =
            serde_json::from_str(&line).with_context(|| format!("Invalid record on line {}", i + 1))?;
        ensure!(
            record.keypoints.len() == KeypointIndex::COUNT,
            "line {}: expected {} keypoints, got {}",
            i + 1,
            KeypointIndex::COUNT,
            record.keypoints.len()
        );
        records.push(record);
    }
    Ok(records)
}

pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<PoseRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_records(BufReader::new(file))
}

/// 再生結果のまとめ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub usable_frames: usize,
    pub count: u32,
    /// 各レップがカウントされた時刻
    pub rep_times: Vec<u64>,
    pub gestures: Vec<GestureEvent>,
}

/// 記録をパイプラインに流す。`on_frame` は各フレームの出力を受け取る
pub fn replay<F>(pipeline: &mut Pipeline, records: &[PoseRecord], mut on_frame: F) -> ReplaySummary
where
    F: FnMut(&PoseRecord, &FrameOutput),
{
    let mut summary = ReplaySummary {
        frames: 0,
        usable_frames: 0,
        count: pipeline.count(),
        rep_times: Vec::new(),
        gestures: Vec::new(),
    };

    for record in records {
        let out = pipeline.process(&record.pose(), record.ts);
        summary.frames += 1;
        summary.gestures.extend(out.gestures.iter().copied());
        if let Some(update) = &out.update {
            summary.usable_frames += 1;
            if update.count > summary.count {
                summary.rep_times.push(record.ts);
            }
            summary.count = update.count;
        }
        on_frame(record, &out);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::default_calibration;
    use crate::session::ExerciseId;
    use crate::signals::tests::standing_pose;

    #[test]
    fn test_read_records_skips_blank_lines() {
        let line = serde_json::to_string(&PoseRecord::from_pose(&standing_pose(), 33)).unwrap();
        let input = format!("{line}\n\n{line}\n");
        let records = read_records(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ts, 33);
        assert_eq!(records[0].pose(), standing_pose());
    }

    #[test]
    fn test_read_records_reports_line() {
        let err = read_records("{\"ts\": 0, \"keypoints\": [[0.5, 0.5, 0.9]]}\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
        let err = read_records("not json\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn test_replay_counts_usable_frames() {
        let mut pipeline = Pipeline::new(ExerciseId::Snatch, &default_calibration());
        let mut records: Vec<PoseRecord> =
            (0..5).map(|i| PoseRecord::from_pose(&standing_pose(), i * 33)).collect();
        records.push(PoseRecord::from_pose(&Pose::default(), 165));

        let mut seen = 0;
        let summary = replay(&mut pipeline, &records, |_, _| seen += 1);
        assert_eq!(seen, 6);
        assert_eq!(summary.frames, 6);
        assert_eq!(summary.usable_frames, 5);
        assert_eq!(summary.count, 0);
        assert!(summary.rep_times.is_empty());
    }
}
