// 该文件是 Maodian （锚点） 项目的一部分。
// src/scenario.rs - 场景回放输入
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

//! 场景文件是一个 JSON 对象，逐帧描述相机帧、检测结果、命中结果与用户点击。
//! 使用 `scenario:///path/to/scenario.json` 加载。
//!
//! ```json
//! {
//!   "view": { "width": 1080, "height": 1920 },
//!   "ticks": [
//!     {
//!       "frame": { "width": 1280, "height": 720, "detections": [
//!         { "label": "cup", "score": 0.9, "bbox": [0.1, 0.2, 0.3, 0.4] }
//!       ] },
//!       "hits": [ { "trackable": { "kind": "depth_point" },
//!                   "pose": { "position": [0, 0, -1], "orientation": [0, 0, 0, 1] },
//!                   "distance": 1.0 } ],
//!       "tap": { "x": 540, "y": 960 }
//!     }
//!   ]
//! }
//! ```

use std::{collections::HashMap, path::Path, str::FromStr, time::Duration, vec};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CameraFrame, FrameError, ImageFrameMeta, Rotation},
  model::DetectItem,
  pose::{Camera, CameraIntrinsics, PoseError, ScreenPoint, WorldPose},
  sim::{FrameScript, ScriptedHit, ScriptedModelFactory, SimulatedTracking},
  task::InputEvent,
  transform::ViewSize,
};

/// 相邻两帧的时间间隔，按 30 FPS 计
pub const FRAME_INTERVAL_MS: u64 = 33;

#[derive(Error, Debug)]
pub enum ScenarioError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("场景解析失败: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("第 {tick} 帧无效: {source}")]
  InvalidFrame { tick: usize, source: FrameError },
  #[error("相机参数无效: {0}")]
  InvalidCamera(#[from] PoseError),
}

fn default_fov() -> f32 {
  60.0
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFrame {
  pub width: u32,
  pub height: u32,
  #[serde(default)]
  pub rotation: Rotation,
  #[serde(default)]
  pub detections: Vec<DetectItem>,
  /// 检测器在这一帧报错
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTick {
  #[serde(default)]
  pub frame: Option<ScenarioFrame>,
  #[serde(default)]
  pub tap: Option<ScreenPoint>,
  /// 相机位姿，不给出时沿用上一帧
  #[serde(default)]
  pub camera: Option<WorldPose>,
  #[serde(default = "default_true")]
  pub tracking: bool,
  #[serde(default)]
  pub hits: Vec<ScriptedHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
  #[serde(default)]
  pub view: Option<ViewSize>,
  #[serde(default = "default_fov")]
  pub fov_y_degrees: f32,
  #[serde(default = "default_true")]
  pub depth_supported: bool,
  #[serde(default)]
  pub anchor_range: Option<f32>,
  /// 模拟检测耗时（毫秒）
  #[serde(default)]
  pub inference_ms: u64,
  pub ticks: Vec<ScenarioTick>,
}

impl FromStr for Scenario {
  type Err = ScenarioError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(serde_json::from_str(s)?)
  }
}

impl Scenario {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
    let path = path.as_ref();
    let scenario: Scenario = std::fs::read_to_string(path)?.parse()?;
    info!("加载场景 {}: {} 帧", path.display(), scenario.ticks.len());
    Ok(scenario)
  }

  pub fn timestamp(tick: usize) -> u64 {
    tick as u64 * FRAME_INTERVAL_MS
  }

  /// 拆分为回放输入、模拟跟踪与脚本检测器；三者共享同一时间线
  pub fn into_parts(self, view: ViewSize) -> Result<ScenarioParts, ScenarioError> {
    let intrinsics = CameraIntrinsics::from_vertical_fov(self.fov_y_degrees, view.width, view.height)?;
    let mut tracking = SimulatedTracking::with_camera(Camera::new(WorldPose::identity(), intrinsics))
      .with_depth_support(self.depth_supported);
    if let Some(range) = self.anchor_range {
      tracking = tracking.with_anchor_range(range);
    }

    let mut script = HashMap::new();
    let mut ticks = Vec::with_capacity(self.ticks.len());
    for (index, tick) in self.ticks.into_iter().enumerate() {
      let timestamp_ms = Self::timestamp(index);
      let frame = match tick.frame {
        Some(frame) => {
          let meta = ImageFrameMeta::new(frame.width, frame.height, frame.rotation)
            .map_err(|source| ScenarioError::InvalidFrame { tick: index, source })?;
          let entry = match frame.error {
            Some(message) => FrameScript::Error(message),
            None => FrameScript::Detections(frame.detections),
          };
          script.insert(timestamp_ms, entry);
          Some(meta)
        }
        None => None,
      };
      ticks.push(ReplayTick {
        frame,
        timestamp_ms,
        tap: tick.tap,
        camera: tick.camera,
        tracking: tick.tracking,
        hits: tick.hits,
      });
    }

    let factory =
      ScriptedModelFactory::new(script).with_latency(Duration::from_millis(self.inference_ms));
    let input = ScenarioInput {
      tracking: tracking.clone(),
      ticks: ticks.into_iter(),
    };
    Ok(ScenarioParts {
      input,
      tracking,
      factory,
    })
  }
}

impl FromUrlWithScheme for Scenario {
  const SCHEME: &'static str = "scenario";
}

impl FromUrl for Scenario {
  type Error = ScenarioError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ScenarioError::SchemeMismatch);
    }
    Self::load(url.path())
  }
}

#[derive(Debug)]
pub struct ScenarioParts {
  pub input: ScenarioInput,
  pub tracking: SimulatedTracking,
  pub factory: ScriptedModelFactory,
}

#[derive(Debug)]
struct ReplayTick {
  /// 图像缓冲在回放到该帧时才分配
  frame: Option<ImageFrameMeta>,
  timestamp_ms: u64,
  tap: Option<ScreenPoint>,
  camera: Option<WorldPose>,
  tracking: bool,
  hits: Vec<ScriptedHit>,
}

/// 逐帧回放场景；每产出一帧都先把该帧的跟踪状态写入模拟跟踪
#[derive(Debug)]
pub struct ScenarioInput {
  tracking: SimulatedTracking,
  ticks: vec::IntoIter<ReplayTick>,
}

impl Iterator for ScenarioInput {
  type Item = InputEvent;

  fn next(&mut self) -> Option<Self::Item> {
    let tick = self.ticks.next()?;
    self.tracking.advance();
    self.tracking.set_tracking(tick.tracking);
    self.tracking.set_hits(tick.hits);
    if let Some(pose) = tick.camera {
      self.tracking.set_camera_pose(pose);
    }
    debug!("回放帧: 图像 {}，点击 {:?}", tick.frame.is_some(), tick.tap);
    Some(InputEvent {
      frame: tick
        .frame
        .map(|meta| CameraFrame::blank(meta, tick.timestamp_ms)),
      tap: tick.tap,
    })
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.ticks.size_hint()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{DetectorOptions, Model, ModelFactory},
    tracking::{TrackingError, TrackingSession},
  };

  const SCENARIO: &str = r#"{
    "view": { "width": 1080, "height": 1920 },
    "anchor_range": 3.0,
    "ticks": [
      { "frame": { "width": 1280, "height": 720, "detections": [
          { "label": "cup", "score": 0.9, "bbox": [0.1, 0.2, 0.3, 0.4] } ] } },
      { "tracking": false, "tap": { "x": 540, "y": 960 } },
      { "frame": { "width": 1280, "height": 720, "error": "npu busy" },
        "camera": { "position": [0, 1, 0], "orientation": [0, 0, 0, 1] } }
    ]
  }"#;

  #[test]
  fn parses_defaults() {
    let scenario: Scenario = SCENARIO.parse().unwrap();
    assert_eq!(scenario.ticks.len(), 3);
    assert_eq!(scenario.fov_y_degrees, 60.0);
    assert!(scenario.depth_supported);
    assert!(scenario.ticks[0].tracking);
    assert_eq!(scenario.ticks[0].frame.as_ref().unwrap().rotation, Rotation::Deg0);
  }

  #[test]
  fn replay_drives_tracking_state() {
    let scenario: Scenario = SCENARIO.parse().unwrap();
    let view = scenario.view.unwrap_or_default();
    let ScenarioParts {
      mut input,
      tracking,
      factory,
    } = scenario.into_parts(view).unwrap();

    let first = input.next().unwrap();
    assert_eq!(first.frame.as_ref().unwrap().timestamp_ms, 0);
    assert!(tracking.current_frame().is_ok());

    let second = input.next().unwrap();
    assert!(second.frame.is_none());
    assert_eq!(second.tap, Some(ScreenPoint::new(540.0, 960.0)));
    assert_eq!(tracking.current_frame(), Err(TrackingError::TrackingUnavailable));

    let third = input.next().unwrap();
    let frame = third.frame.unwrap();
    assert_eq!(frame.timestamp_ms, 2 * FRAME_INTERVAL_MS);
    assert_eq!(tracking.camera().position().y, 1.0);
    assert!(input.next().is_none());

    let model = factory.create(&DetectorOptions::default()).unwrap();
    assert!(model.infer(&frame).is_err());
  }

  #[test]
  fn invalid_frame_is_reported_with_tick() {
    let scenario: Scenario =
      r#"{ "ticks": [ {}, { "frame": { "width": 0, "height": 720 } } ] }"#.parse().unwrap();
    assert!(matches!(
      scenario.into_parts(ViewSize::default()),
      Err(ScenarioError::InvalidFrame { tick: 1, .. })
    ));
  }

  #[test]
  fn large_frames_are_not_allocated_before_replay() {
    // 64 帧 16384x16384 RGBA，一次性分配需要 64 GiB
    let tick = r#"{ "frame": { "width": 16384, "height": 16384 } }"#;
    let json = format!(r#"{{ "ticks": [ {} ] }}"#, vec![tick; 64].join(", "));
    let scenario: Scenario = json.parse().unwrap();
    let ScenarioParts { input, .. } = scenario.into_parts(ViewSize::default()).unwrap();
    assert_eq!(input.size_hint(), (64, Some(64)));
  }

  #[test]
  fn from_url_requires_scheme() {
    let url = Url::parse("file:///tmp/scenario.json").unwrap();
    assert!(matches!(Scenario::from_url(&url), Err(ScenarioError::SchemeMismatch)));
  }
}
