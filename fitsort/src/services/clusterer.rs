//! Spatial session clustering
//!
//! Phase 1 of a run: group frames by pointing into candidate observing
//! sessions. Assignment is a single streaming pass against each cluster's
//! seed pointing, followed by a median recentre and a merge pass that folds
//! together clusters split by early unlucky seed placement.

use crate::config::ASSIGNMENT_RADIUS_DEG;
use crate::services::header::HeaderReader;
use crate::types::FrameInfo;
use fitsort_common::events::{SessionSummary, TriageEvent};
use fitsort_common::{CelestialPoint, EventBus};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One candidate observing session.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: u32,
    /// Per-axis median of member pointings
    pub centroid: CelestialPoint,
    /// Indices into the frame list handed to the clusterer
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn frame_count(&self) -> usize {
        self.members.len()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            ra: self.centroid.ra,
            dec: self.centroid.dec,
            frame_count: self.members.len(),
        }
    }
}

/// Result of the scan phase.
#[derive(Debug)]
pub struct ScanOutcome {
    pub frames: Vec<FrameInfo>,
    pub clusters: Vec<Cluster>,
    /// Frames left out of every cluster (no valid header coordinates)
    pub ungrouped: usize,
    pub cancelled: bool,
}

pub struct SpatialClusterer {
    assignment_radius_deg: f64,
    merge_tolerance_deg: f64,
}

impl SpatialClusterer {
    pub fn new(merge_tolerance_arcmin: f64) -> Self {
        Self {
            assignment_radius_deg: ASSIGNMENT_RADIUS_DEG,
            merge_tolerance_deg: merge_tolerance_arcmin / 60.0,
        }
    }

    /// Read headers and cluster the frames, reporting progress on the bus.
    ///
    /// Runs synchronously; callers put it on a blocking thread. Cancellation
    /// is honored between frames and returns the partial state with
    /// `cancelled` set.
    pub fn scan(
        &self,
        files: Vec<PathBuf>,
        reader: &dyn HeaderReader,
        bus: &EventBus,
        cancel: &CancellationToken,
    ) -> ScanOutcome {
        let total = files.len();
        bus.emit_lossy(TriageEvent::ScanStarted {
            total,
            timestamp: chrono::Utc::now(),
        });

        let mut frames = Vec::with_capacity(total);
        for (i, path) in files.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(scanned = i, total, "Scan cancelled");
                return ScanOutcome {
                    frames,
                    clusters: Vec::new(),
                    ungrouped: 0,
                    cancelled: true,
                };
            }
            let coord = reader.read_coordinate(&path);
            frames.push(FrameInfo::new(path, coord));
            bus.emit_lossy(TriageEvent::ScanProgress {
                current: i + 1,
                total,
                timestamp: chrono::Utc::now(),
            });
        }

        let clusters = self.cluster(&mut frames);
        let ungrouped = frames.iter().filter(|f| f.cluster_id.is_none()).count();

        bus.emit_lossy(TriageEvent::ScanCompleted {
            sessions: clusters.iter().map(Cluster::summary).collect(),
            ungrouped,
            timestamp: chrono::Utc::now(),
        });

        ScanOutcome {
            frames,
            clusters,
            ungrouped,
            cancelled: false,
        }
    }

    /// Assign every frame with a valid pointing to a cluster and write the
    /// final cluster ids back into the frames.
    ///
    /// During the scan each cluster keeps the pointing it was seeded with;
    /// joining a cluster never moves it, so assignment does not depend on
    /// how many members arrived first. Centroids become medians only once
    /// the scan is over.
    pub fn cluster(&self, frames: &mut [FrameInfo]) -> Vec<Cluster> {
        let coords: Vec<Option<CelestialPoint>> =
            frames.iter().map(|f| f.working_coord).collect();

        let mut clusters: Vec<Cluster> = Vec::new();
        for (idx, coord) in coords.iter().enumerate() {
            let Some(coord) = *coord else {
                continue;
            };
            match clusters
                .iter_mut()
                .find(|c| c.centroid.separation_deg(&coord) < self.assignment_radius_deg)
            {
                Some(cluster) => cluster.members.push(idx),
                None => clusters.push(Cluster {
                    id: clusters.len() as u32 + 1,
                    centroid: coord,
                    members: vec![idx],
                }),
            }
        }

        for cluster in &mut clusters {
            recompute_centroid(cluster, &coords);
        }

        let mut merged = self.merge(clusters, &coords);

        for (i, cluster) in merged.iter_mut().enumerate() {
            cluster.id = i as u32 + 1;
            for &member in &cluster.members {
                frames[member].cluster_id = Some(cluster.id);
            }
        }
        merged
    }

    /// Fold together clusters whose centroids sit within the merge
    /// tolerance. Each absorption recomputes the surviving centroid, so a
    /// chain of near neighbors collapses into one session.
    fn merge(&self, clusters: Vec<Cluster>, coords: &[Option<CelestialPoint>]) -> Vec<Cluster> {
        let mut pending: Vec<Cluster> = clusters;
        let mut merged: Vec<Cluster> = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let mut current = pending.remove(0);
            let mut i = 0;
            while i < pending.len() {
                if current.centroid.separation_deg(&pending[i].centroid)
                    < self.merge_tolerance_deg
                {
                    let absorbed = pending.remove(i);
                    current.members.extend(absorbed.members);
                    recompute_centroid(&mut current, coords);
                    // Rescan against the moved centroid.
                    i = 0;
                } else {
                    i += 1;
                }
            }
            merged.push(current);
        }
        merged
    }
}

/// Recentre a cluster on the per-axis median of its members.
///
/// The median is the lower-middle element of the sorted values, so for an
/// even member count the centroid is an actual observed pointing rather
/// than an interpolated one.
fn recompute_centroid(cluster: &mut Cluster, coords: &[Option<CelestialPoint>]) {
    let mut ras = Vec::with_capacity(cluster.members.len());
    let mut decs = Vec::with_capacity(cluster.members.len());
    for &member in &cluster.members {
        if let Some(coord) = coords[member] {
            ras.push(coord.ra);
            decs.push(coord.dec);
        }
    }
    if let (Some(ra), Some(dec)) = (lower_median(&mut ras), lower_median(&mut decs)) {
        cluster.centroid = CelestialPoint::new(ra, dec);
    }
}

fn lower_median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[(values.len() - 1) / 2])
}
