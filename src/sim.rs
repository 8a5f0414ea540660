// 该文件是 Maodian （锚点） 项目的一部分。
// src/sim.rs - 模拟的跟踪、渲染与检测组件
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

//! 不依赖真实设备的组件，供场景回放与测试使用。

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::CameraFrame,
  model::{DetectItem, DetectResult, DetectorOptions, Model, ModelFactory},
  pose::{Camera, CameraIntrinsics, ScreenPoint, WorldPose},
  tracking::{
    AnchorError, AnchorHandle, Attachment, HitResult, MarkerContent, SceneError, SceneHandle,
    SceneRenderer, TrackingError, TrackingFrame, TrackingSession,
  },
  transform::{ViewRect, ViewSize},
};

const DEFAULT_FOV_Y_DEGREES: f32 = 60.0;

/// 只在屏幕某个区域内返回的命中结果；`region` 为空时处处命中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedHit {
  #[serde(default)]
  pub region: Option<ViewRect>,
  #[serde(flatten)]
  pub hit: HitResult,
}

impl ScriptedHit {
  pub fn everywhere(hit: HitResult) -> Self {
    Self { region: None, hit }
  }

  pub fn within(region: ViewRect, hit: HitResult) -> Self {
    Self {
      region: Some(region),
      hit,
    }
  }

  fn covers(&self, point: ScreenPoint) -> bool {
    self.region.is_none_or(|r| {
      point.x >= r.left && point.x <= r.right && point.y >= r.top && point.y <= r.bottom
    })
  }
}

#[derive(Debug)]
struct SimState {
  frame_id: u64,
  camera: Camera,
  tracking: bool,
  hits: Vec<ScriptedHit>,
  depth_supported: bool,
  anchor_range: Option<f32>,
  anchors_created: u64,
}

/// 模拟的 AR 跟踪会话。克隆体共享同一份状态，便于回放输入逐帧驱动。
#[derive(Debug, Clone)]
pub struct SimulatedTracking {
  state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedTracking {
  fn default() -> Self {
    Self::new(ViewSize::default())
  }
}

impl SimulatedTracking {
  pub fn new(view: ViewSize) -> Self {
    let intrinsics = CameraIntrinsics::from_vertical_fov(DEFAULT_FOV_Y_DEGREES, view.width, view.height)
      .unwrap_or(CameraIntrinsics {
        fx: view.height,
        fy: view.height,
        cx: view.width / 2.0,
        cy: view.height / 2.0,
      });
    Self::with_camera(Camera::new(WorldPose::identity(), intrinsics))
  }

  pub fn with_camera(camera: Camera) -> Self {
    Self {
      state: Arc::new(Mutex::new(SimState {
        frame_id: 0,
        camera,
        tracking: true,
        hits: Vec::new(),
        depth_supported: true,
        anchor_range: None,
        anchors_created: 0,
      })),
    }
  }

  fn state(&self) -> MutexGuard<'_, SimState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 距相机超过 `range` 米的锚点请求会被拒绝
  pub fn with_anchor_range(self, range: f32) -> Self {
    self.state().anchor_range = Some(range);
    self
  }

  pub fn with_depth_support(self, supported: bool) -> Self {
    self.state().depth_supported = supported;
    self
  }

  pub fn set_hits(&self, hits: Vec<ScriptedHit>) {
    self.state().hits = hits;
  }

  pub fn set_camera_pose(&self, pose: WorldPose) {
    self.state().camera.pose = pose;
  }

  pub fn set_tracking(&self, tracking: bool) {
    self.state().tracking = tracking;
  }

  /// 进入下一帧
  pub fn advance(&self) {
    self.state().frame_id += 1;
  }

  pub fn camera(&self) -> Camera {
    self.state().camera
  }

  pub fn anchors_created(&self) -> u64 {
    self.state().anchors_created
  }
}

impl TrackingSession for SimulatedTracking {
  fn current_frame(&self) -> Result<TrackingFrame, TrackingError> {
    let state = self.state();
    if !state.tracking {
      return Err(TrackingError::TrackingUnavailable);
    }
    Ok(TrackingFrame {
      id: state.frame_id,
      camera: state.camera,
    })
  }

  fn hit_test(&self, _frame: &TrackingFrame, x: f32, y: f32) -> Vec<HitResult> {
    let point = ScreenPoint::new(x, y);
    let mut hits: Vec<HitResult> = self
      .state()
      .hits
      .iter()
      .filter(|scripted| scripted.covers(point))
      .map(|scripted| scripted.hit.clone())
      .collect();
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits
  }

  fn create_anchor(&mut self, pose: &WorldPose) -> Result<AnchorHandle, AnchorError> {
    let mut state = self.state();
    if !pose.is_finite() {
      return Err(AnchorError::AnchorCreationFailed("位姿包含非有限数值".to_string()));
    }
    if let Some(range) = state.anchor_range {
      let distance = pose.distance_to(state.camera.position());
      if distance > range {
        return Err(AnchorError::AnchorCreationFailed(format!(
          "距相机 {:.2} 米，超出跟踪范围 {:.2} 米",
          distance, range
        )));
      }
    }
    state.anchors_created += 1;
    Ok(AnchorHandle(state.anchors_created))
  }

  fn is_depth_supported(&self) -> bool {
    self.state().depth_supported
  }
}

/// 立即完成挂载的渲染端
#[derive(Debug, Default)]
pub struct ImmediateRenderer {
  next: u64,
  failure: Option<SceneError>,
}

impl ImmediateRenderer {
  pub fn failing(error: SceneError) -> Self {
    Self {
      next: 0,
      failure: Some(error),
    }
  }
}

impl SceneRenderer for ImmediateRenderer {
  fn attach_node(&mut self, _anchor: AnchorHandle, _content: MarkerContent) -> Attachment {
    if let Some(error) = &self.failure {
      return Attachment::ready(Err(error.clone()));
    }
    self.next += 1;
    Attachment::ready(Ok(SceneHandle(self.next)))
  }
}

/// 在后台线程延迟完成挂载的渲染端，模拟加载模型的耗时
#[derive(Debug)]
pub struct DeferredRenderer {
  delay: Duration,
  next: Arc<AtomicUsize>,
}

impl DeferredRenderer {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      next: Arc::new(AtomicUsize::new(0)),
    }
  }
}

impl SceneRenderer for DeferredRenderer {
  fn attach_node(&mut self, anchor: AnchorHandle, content: MarkerContent) -> Attachment {
    let (tx, attachment) = Attachment::channel();
    let delay = self.delay;
    let next = Arc::clone(&self.next);
    thread::spawn(move || {
      thread::sleep(delay);
      let handle = SceneHandle(next.fetch_add(1, Ordering::Relaxed) as u64 + 1);
      debug!("标记 {} 已挂载到锚点 {:?}", content.label, anchor);
      // 接收端可能已随会话结束被丢弃
      let _ = tx.send(Ok(handle));
    });
    attachment
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("模拟检测器错误: {0}")]
pub struct ScriptedModelError(pub String);

/// 某一帧的检测脚本
#[derive(Debug, Clone, PartialEq)]
pub enum FrameScript {
  Detections(Vec<DetectItem>),
  Error(String),
}

/// 按帧时间戳返回预设结果的检测器
#[derive(Debug, Clone)]
pub struct ScriptedModel {
  script: Arc<HashMap<u64, FrameScript>>,
  options: DetectorOptions,
  latency: Duration,
}

impl ScriptedModel {
  pub fn options(&self) -> &DetectorOptions {
    &self.options
  }
}

impl Model for ScriptedModel {
  type Error = ScriptedModelError;

  fn infer(&self, input: &CameraFrame) -> Result<DetectResult, Self::Error> {
    if !self.latency.is_zero() {
      thread::sleep(self.latency);
    }
    match self.script.get(&input.timestamp_ms) {
      Some(FrameScript::Detections(items)) => Ok(DetectResult::new(input.meta, items.clone())),
      Some(FrameScript::Error(message)) => Err(ScriptedModelError(message.clone())),
      None => Ok(DetectResult::new(input.meta, Vec::new())),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedModelFactory {
  script: Arc<HashMap<u64, FrameScript>>,
  latency: Duration,
  created: Arc<AtomicUsize>,
}

impl ScriptedModelFactory {
  pub fn new(script: HashMap<u64, FrameScript>) -> Self {
    Self {
      script: Arc::new(script),
      latency: Duration::ZERO,
      created: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// 已创建的检测器实例数
  pub fn instances(&self) -> usize {
    self.created.load(Ordering::Acquire)
  }
}

impl ModelFactory for ScriptedModelFactory {
  type Model = ScriptedModel;
  type Error = ScriptedModelError;

  fn create(&self, options: &DetectorOptions) -> Result<Self::Model, Self::Error> {
    self.created.fetch_add(1, Ordering::AcqRel);
    debug!("创建模拟检测器: {:?}", options);
    Ok(ScriptedModel {
      script: Arc::clone(&self.script),
      options: options.clone(),
      latency: self.latency,
    })
  }
}
