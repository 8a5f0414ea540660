// 该文件是 Maodian （锚点） 项目的一部分。
// src/dedup.rs - 锚点去重
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 候选位姿与已放置标记的距离小于自适应阈值时视为同一物体：
//!
//! `threshold = base + factor * |candidate - camera|`
//!
//! 离相机越远，深度估计误差越大，判定为不同物体所需的间距也越大。
//! `should_reject` 与 `record` 必须在同一线程上紧接着调用。

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{anchor::PlacedMarker, pose::WorldPose};

const DEFAULT_BASE: f32 = 0.12;
const DEFAULT_FACTOR: f32 = 0.07;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
  /// 基础间距（米）
  pub base: f32,
  /// 每米相机距离增加的间距
  pub factor: f32,
}

impl Default for DedupConfig {
  fn default() -> Self {
    Self {
      base: DEFAULT_BASE,
      factor: DEFAULT_FACTOR,
    }
  }
}

impl DedupConfig {
  pub fn threshold(&self, candidate: &Vector3<f32>, camera_position: &Vector3<f32>) -> f32 {
    self.base + self.factor * (candidate - camera_position).norm()
  }
}

#[derive(Debug, Clone)]
struct MarkerPosition {
  id: String,
  position: Vector3<f32>,
}

/// 已放置标记的位置索引，不持有标记本身
#[derive(Debug, Clone, Default)]
pub struct AnchorDedupStore {
  config: DedupConfig,
  markers: Vec<MarkerPosition>,
}

impl AnchorDedupStore {
  pub fn new(config: DedupConfig) -> Self {
    Self {
      config,
      markers: Vec::new(),
    }
  }

  pub fn config(&self) -> &DedupConfig {
    &self.config
  }

  /// 候选位姿是否与现有标记重复。只读，不改变状态。
  pub fn should_reject(&self, candidate: &WorldPose, camera_position: &Vector3<f32>) -> bool {
    let threshold = self.config.threshold(candidate.position(), camera_position);
    let duplicate = self
      .markers
      .iter()
      .find(|marker| candidate.distance_to(&marker.position) < threshold);

    match duplicate {
      Some(marker) => {
        debug!(
          "候选位姿与标记 {} 相距 {:.3} 米，小于阈值 {:.3} 米",
          marker.id,
          candidate.distance_to(&marker.position),
          threshold
        );
        true
      }
      None => false,
    }
  }

  pub fn record(&mut self, marker: &PlacedMarker) {
    self.markers.push(MarkerPosition {
      id: marker.id.clone(),
      position: *marker.pose.position(),
    });
  }

  pub fn len(&self) -> usize {
    self.markers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.markers.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tracking::AnchorHandle;
  use approx::assert_relative_eq;

  fn marker(id: &str, x: f32, y: f32, z: f32) -> PlacedMarker {
    PlacedMarker {
      id: id.to_string(),
      pose: WorldPose::from_position(Vector3::new(x, y, z)),
      label: "cup".to_string(),
      anchor: AnchorHandle(0),
      scene: None,
      restored: false,
    }
  }

  fn at(x: f32, y: f32, z: f32) -> WorldPose {
    WorldPose::from_position(Vector3::new(x, y, z))
  }

  #[test]
  fn threshold_grows_with_camera_distance() {
    let config = DedupConfig::default();
    let camera = Vector3::zeros();
    assert_relative_eq!(config.threshold(&Vector3::new(0.0, 0.0, -1.0), &camera), 0.19, epsilon = 1e-6);
    assert_relative_eq!(config.threshold(&Vector3::new(0.0, 0.0, -3.0), &camera), 0.33, epsilon = 1e-6);
  }

  #[test]
  fn empty_store_accepts_everything() {
    let store = AnchorDedupStore::default();
    assert!(!store.should_reject(&at(0.0, 0.0, -1.0), &Vector3::zeros()));
  }

  #[test]
  fn rejects_within_threshold() {
    let mut store = AnchorDedupStore::new(DedupConfig::default());
    store.record(&marker("a", 0.0, 0.0, -1.0));
    let camera = Vector3::zeros();

    // 距相机约 1 米，阈值约 0.19 米
    assert!(store.should_reject(&at(0.1, 0.0, -1.0), &camera));
    assert!(!store.should_reject(&at(0.25, 0.0, -1.0), &camera));
  }

  #[test]
  fn farther_candidates_need_more_separation() {
    let mut store = AnchorDedupStore::new(DedupConfig::default());
    store.record(&marker("a", 0.0, 0.0, -4.0));
    let camera = Vector3::zeros();
    // 相距 0.3 米：近处算不同物体，4 米外阈值为 0.40 米，算重复
    assert!(store.should_reject(&at(0.3, 0.0, -4.0), &camera));

    let mut near = AnchorDedupStore::new(DedupConfig::default());
    near.record(&marker("b", 0.0, 0.0, -1.0));
    assert!(!near.should_reject(&at(0.3, 0.0, -1.0), &camera));
  }

  #[test]
  fn boundary_distance_is_not_a_duplicate() {
    let config = DedupConfig {
      base: 0.5,
      factor: 0.0,
    };
    let mut store = AnchorDedupStore::new(config);
    store.record(&marker("a", 0.0, 0.0, 0.0));
    assert!(!store.should_reject(&at(0.5, 0.0, 0.0), &Vector3::new(0.0, 0.0, 5.0)));
    assert!(store.should_reject(&at(0.49, 0.0, 0.0), &Vector3::new(0.0, 0.0, 5.0)));
  }

  #[test]
  fn check_is_idempotent_without_record() {
    let mut store = AnchorDedupStore::default();
    store.record(&marker("a", 1.0, 0.0, -2.0));
    let camera = Vector3::new(0.0, 0.0, 0.0);
    for candidate in [at(1.05, 0.0, -2.0), at(3.0, 0.0, -2.0)] {
      let first = store.should_reject(&candidate, &camera);
      let second = store.should_reject(&candidate, &camera);
      assert_eq!(first, second);
    }
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn checks_against_every_marker() {
    let mut store = AnchorDedupStore::default();
    for i in 0..20 {
      store.record(&marker(&i.to_string(), i as f32, 0.0, -1.0));
    }
    assert!(store.should_reject(&at(19.02, 0.0, -1.0), &Vector3::new(19.0, 0.0, 0.0)));
  }
}
