//! Grouping per-frame annotations into tracks.

use crate::models::{Annotation, Task};
use serde::Serialize;
use std::collections::BTreeMap;

/// All annotations sharing one `track_id`, ordered by frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub track_id: i64,
    pub annotations: Vec<Annotation>,
}

impl Track {
    pub fn first_frame(&self) -> Option<i64> {
        self.annotations.first().map(|a| a.frame)
    }

    pub fn last_frame(&self) -> Option<i64> {
        self.annotations.last().map(|a| a.frame)
    }

    /// Frames where the object is not marked outside.
    pub fn visible_frames(&self) -> usize {
        self.annotations.iter().filter(|a| a.is_visible()).count()
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            track_id: self.track_id,
            annotations: self.annotations.len(),
            visible_frames: self.visible_frames(),
            first_frame: self.first_frame(),
            last_frame: self.last_frame(),
        }
    }
}

/// Compact description of a track for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSummary {
    pub track_id: i64,
    pub annotations: usize,
    pub visible_frames: usize,
    pub first_frame: Option<i64>,
    pub last_frame: Option<i64>,
}

/// A `(track_id, frame)` pair recorded more than once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateKey {
    pub track_id: i64,
    pub frame: i64,
    pub annotation_ids: Vec<i64>,
}

/// Export document: a task with its tracks
#[derive(Debug, Clone, Serialize)]
pub struct TaskTracks {
    pub task: Task,
    pub tracks: Vec<Track>,
}

impl TaskTracks {
    pub fn annotation_count(&self) -> usize {
        self.tracks.iter().map(|t| t.annotations.len()).sum()
    }
}

/// Group annotations by track. Tracks come out in `track_id` order and
/// each track's rows in `(frame, annotation_id)` order.
pub fn group_tracks(annotations: Vec<Annotation>) -> Vec<Track> {
    let mut by_track: BTreeMap<i64, Vec<Annotation>> = BTreeMap::new();
    for annotation in annotations {
        by_track
            .entry(annotation.track_id)
            .or_default()
            .push(annotation);
    }

    by_track
        .into_iter()
        .map(|(track_id, mut annotations)| {
            annotations.sort_by_key(|a| (a.frame, a.annotation_id));
            Track {
                track_id,
                annotations,
            }
        })
        .collect()
}

/// Find `(track_id, frame)` pairs with more than one annotation.
pub fn duplicate_keys(annotations: &[Annotation]) -> Vec<DuplicateKey> {
    let mut by_key: BTreeMap<(i64, i64), Vec<i64>> = BTreeMap::new();
    for annotation in annotations {
        by_key
            .entry((annotation.track_id, annotation.frame))
            .or_default()
            .push(annotation.annotation_id);
    }

    by_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((track_id, frame), mut annotation_ids)| {
            annotation_ids.sort_unstable();
            DuplicateKey {
                track_id,
                frame,
                annotation_ids,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(id: i64, track_id: i64, frame: i64, outside: Option<bool>) -> Annotation {
        Annotation {
            annotation_id: id,
            task_id: Some(10),
            track_id,
            frame,
            xtl: None,
            ytl: None,
            xbr: None,
            ybr: None,
            outside,
            attributes: None,
        }
    }

    #[test]
    fn test_group_tracks_orders_by_track_and_frame() {
        let tracks = group_tracks(vec![
            ann(1, 2, 4, None),
            ann(2, 1, 9, None),
            ann(3, 1, 3, Some(true)),
            ann(4, 2, 0, Some(false)),
        ]);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_id, 1);
        let frames: Vec<i64> = tracks[0].annotations.iter().map(|a| a.frame).collect();
        assert_eq!(frames, vec![3, 9]);
        assert_eq!(tracks[1].first_frame(), Some(0));
        assert_eq!(tracks[1].last_frame(), Some(4));
    }

    #[test]
    fn test_track_summary_counts_visible_frames() {
        let tracks = group_tracks(vec![
            ann(1, 7, 0, Some(false)),
            ann(2, 7, 1, Some(true)),
            ann(3, 7, 2, None),
        ]);
        let summary = tracks[0].summary();

        assert_eq!(summary.track_id, 7);
        assert_eq!(summary.annotations, 3);
        assert_eq!(summary.visible_frames, 2);
        assert_eq!(summary.first_frame, Some(0));
        assert_eq!(summary.last_frame, Some(2));
    }

    #[test]
    fn test_group_tracks_empty() {
        assert!(group_tracks(Vec::new()).is_empty());
    }

    #[test]
    fn test_duplicate_keys() {
        let rows = vec![
            ann(5, 1, 0, None),
            ann(6, 1, 1, None),
            ann(9, 1, 0, None),
            ann(7, 2, 0, None),
        ];
        let dups = duplicate_keys(&rows);

        assert_eq!(
            dups,
            vec![DuplicateKey {
                track_id: 1,
                frame: 0,
                annotation_ids: vec![5, 9],
            }]
        );
    }

    #[test]
    fn test_no_duplicates_across_tracks() {
        let rows = vec![ann(1, 1, 0, None), ann(2, 2, 0, None)];
        assert!(duplicate_keys(&rows).is_empty());
    }
}
