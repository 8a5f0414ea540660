// 该文件是 Maodian （锚点） 项目的一部分。
// src/session.rs - 锚定会话
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

//! 会话在持有跟踪会话的线程上运行：接收推理事件、处理点击与自动放置。
//! 去重检查与记录之间不会穿插其它放置。

use std::mem;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  anchor::{AnchorLifecycleManager, PlacedMarker},
  dedup::{AnchorDedupStore, DedupConfig},
  detection::{DetectionBatch, DetectionFrameBuffer},
  hit::{HitResolver, HitSource, ResolverConfig},
  pose::ScreenPoint,
  store::{AnchorStore, StoreError},
  task::WorkerEvent,
  tracking::{SceneRenderer, TrackingError, TrackingSession},
  transform::{TransformMode, ViewSize},
};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("跟踪错误: {0}")]
  TrackingError(#[from] TrackingError),
  #[error("存储错误: {0}")]
  StoreError(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
  /// 用户点击检测框时放置
  #[default]
  Tap,
  /// 每批检测结果的每个框都尝试放置
  Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub view: ViewSize,
  pub transform: TransformMode,
  pub resolver: ResolverConfig,
  pub dedup: DedupConfig,
  pub mode: PlacementMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
  Placed { id: String, label: String, source: HitSource },
  /// 与已有标记重复
  Duplicate { label: String, source: HitSource },
  /// 跟踪端拒绝创建锚点
  AnchorRejected { label: String, reason: String },
  /// 点击位置没有检测框
  NoDetection,
  /// 自动模式下忽略点击
  Ignored,
}

/// 需要提示给用户的短暂通知
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
  DetectorError(String),
  PersistFailed { id: String, reason: String },
}

pub struct AnchoringSession<T, S, R> {
  config: SessionConfig,
  tracking: T,
  buffer: DetectionFrameBuffer,
  resolver: HitResolver,
  dedup: AnchorDedupStore,
  lifecycle: AnchorLifecycleManager<S, R>,
  notices: Vec<SessionNotice>,
  /// 当前批次尚未被自动放置使用
  fresh_batch: bool,
}

impl<T, S, R> AnchoringSession<T, S, R>
where
  T: TrackingSession,
  S: AnchorStore,
  R: SceneRenderer,
{
  pub fn new(config: SessionConfig, tracking: T, store: S, renderer: R) -> Self {
    let depth_supported = tracking.is_depth_supported();
    if config.resolver.depth_hits && !depth_supported {
      info!("跟踪端不支持深度，跳过深度点命中");
    }
    let resolver = HitResolver::new(ResolverConfig {
      depth_hits: config.resolver.depth_hits && depth_supported,
      ..config.resolver
    });
    Self {
      config,
      tracking,
      buffer: DetectionFrameBuffer::new(),
      resolver,
      dedup: AnchorDedupStore::new(config.dedup),
      lifecycle: AnchorLifecycleManager::new(store, renderer),
      notices: Vec::new(),
      fresh_batch: false,
    }
  }

  /// 恢复持久化的锚点，并计入去重索引
  pub fn start(&mut self) -> Result<usize, SessionError> {
    let restored = self.lifecycle.restore_all(&mut self.tracking)?;
    for marker in &restored {
      self.dedup.record(marker);
    }
    Ok(restored.len())
  }

  pub fn handle_worker_event(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Detections { result, latency } => {
        let batch = DetectionBatch::from_result(&result, self.config.view, self.config.transform);
        info!("推理完成，耗时: {:.2?}，{} 个检测框", latency, batch.len());
        self.apply_batch(batch);
      }
      WorkerEvent::DetectorError(message) => {
        warn!("检测器错误: {}", message);
        self.notices.push(SessionNotice::DetectorError(message));
      }
      WorkerEvent::Reconfigured(meta) => {
        info!("检测器已按 {}x{} {:?} 重新配置", meta.image_width, meta.image_height, meta.rotation);
      }
    }
  }

  fn apply_batch(&mut self, batch: DetectionBatch) {
    self.buffer.replace_batch(batch);
    self.fresh_batch = true;
  }

  /// 点击放置：只在点击落在某个检测框内时尝试
  pub fn tap(&mut self, point: ScreenPoint) -> Result<PlacementOutcome, SessionError> {
    if self.config.mode == PlacementMode::Auto {
      return Ok(PlacementOutcome::Ignored);
    }
    let Some(label) = self.buffer.hit_test(point).map(|b| b.label.clone()) else {
      return Ok(PlacementOutcome::NoDetection);
    };
    self.place_at(point, &label)
  }

  /// 按批次顺序对每个检测框的中心尝试放置；同批先放置的标记参与后续去重。
  /// 每个批次只使用一次，没有新批次时不放置。
  pub fn auto_place(&mut self) -> Result<Vec<PlacementOutcome>, SessionError> {
    if !mem::take(&mut self.fresh_batch) {
      return Ok(Vec::new());
    }
    let mut outcomes = Vec::with_capacity(self.buffer.len());
    for detection in self.buffer.iter() {
      outcomes.push(self.place_at(detection.center(), &detection.label)?);
    }
    Ok(outcomes)
  }

  fn place_at(&mut self, point: ScreenPoint, label: &str) -> Result<PlacementOutcome, SessionError> {
    let frame = self.tracking.current_frame()?;
    let resolution = self.resolver.resolve_frame(&self.tracking, &frame, point);
    if self.dedup.should_reject(&resolution.pose, frame.camera.position()) {
      info!("{} 已有标记，跳过 ({:?})", label, resolution.source);
      return Ok(PlacementOutcome::Duplicate {
        label: label.to_string(),
        source: resolution.source,
      });
    }

    let marker = match self.lifecycle.place(&mut self.tracking, resolution.pose, label) {
      Ok(marker) => marker,
      Err(e) => {
        warn!("{} 无法放置: {}", label, e);
        return Ok(PlacementOutcome::AnchorRejected {
          label: label.to_string(),
          reason: e.to_string(),
        });
      }
    };
    self.dedup.record(&marker);
    if let Err(e) = self.lifecycle.persist(&marker) {
      warn!("标记 {} 持久化失败: {}", marker.id, e);
      self.notices.push(SessionNotice::PersistFailed {
        id: marker.id.clone(),
        reason: e.to_string(),
      });
    }
    Ok(PlacementOutcome::Placed {
      id: marker.id,
      label: marker.label,
      source: resolution.source,
    })
  }

  pub fn poll_attachments(&mut self) -> usize {
    self.lifecycle.poll_attachments()
  }

  pub fn set_mode(&mut self, mode: PlacementMode) {
    if self.config.mode != mode {
      info!("切换放置模式: {:?}", mode);
      self.config.mode = mode;
    }
  }

  pub fn mode(&self) -> PlacementMode {
    self.config.mode
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn detections(&self) -> &DetectionFrameBuffer {
    &self.buffer
  }

  pub fn markers(&self) -> &[PlacedMarker] {
    self.lifecycle.markers()
  }

  pub fn pending_attachments(&self) -> usize {
    self.lifecycle.pending_attachments()
  }

  /// 取走所有未读通知
  pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
    mem::take(&mut self.notices)
  }

  pub fn tracking(&self) -> &T {
    &self.tracking
  }

  pub fn store(&self) -> &S {
    self.lifecycle.store()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detection::DetectionBox,
    frame::{ImageFrameMeta, Rotation},
    pose::WorldPose,
    sim::{ImmediateRenderer, ScriptedHit, SimulatedTracking},
    store::MemoryAnchorStore,
    tracking::{HitResult, Trackable},
    transform::ViewRect,
  };
  use nalgebra::Vector3;

  fn session(tracking: SimulatedTracking) -> AnchoringSession<SimulatedTracking, MemoryAnchorStore, ImmediateRenderer> {
    AnchoringSession::new(
      SessionConfig::default(),
      tracking,
      MemoryAnchorStore::new(),
      ImmediateRenderer::default(),
    )
  }

  fn cup_at(left: f32, top: f32) -> DetectionBox {
    DetectionBox::from_rect(ViewRect::new(left, top, left + 200.0, top + 200.0), "cup", 0.9)
  }

  fn meta() -> ImageFrameMeta {
    ImageFrameMeta::new(1280, 720, Rotation::Deg0).unwrap()
  }

  #[test]
  fn tap_outside_detections_does_nothing() {
    let mut session = session(SimulatedTracking::default());
    session.buffer.replace(meta(), vec![cup_at(100.0, 100.0)]);
    assert_eq!(session.tap(ScreenPoint::new(900.0, 900.0)).unwrap(), PlacementOutcome::NoDetection);
    assert!(session.markers().is_empty());
  }

  #[test]
  fn tap_places_once_then_dedups() {
    let mut session = session(SimulatedTracking::default());
    session.buffer.replace(meta(), vec![cup_at(100.0, 100.0)]);
    let first = session.tap(ScreenPoint::new(200.0, 200.0)).unwrap();
    assert!(matches!(first, PlacementOutcome::Placed { source: HitSource::RayFallback, .. }));
    let second = session.tap(ScreenPoint::new(201.0, 201.0)).unwrap();
    assert!(matches!(second, PlacementOutcome::Duplicate { .. }));
    assert_eq!(session.markers().len(), 1);
    assert_eq!(session.store().records().len(), 1);
  }

  #[test]
  fn tracking_loss_skips_placement() {
    let tracking = SimulatedTracking::default();
    tracking.set_tracking(false);
    let mut session = session(tracking);
    session.buffer.replace(meta(), vec![cup_at(100.0, 100.0)]);
    assert!(matches!(
      session.tap(ScreenPoint::new(200.0, 200.0)),
      Err(SessionError::TrackingError(TrackingError::TrackingUnavailable))
    ));
    assert!(session.markers().is_empty());
  }

  #[test]
  fn auto_mode_dedups_within_one_batch() {
    let tracking = SimulatedTracking::default();
    // 两个框命中同一深度点
    tracking.set_hits(vec![ScriptedHit::everywhere(HitResult {
      trackable: Trackable::DepthPoint,
      pose: WorldPose::from_position(Vector3::new(0.0, 0.0, -1.0)),
      distance: 1.0,
    })]);
    let mut session = session(tracking);
    session.set_mode(PlacementMode::Auto);
    session.apply_batch(DetectionBatch::new(
      meta(),
      vec![cup_at(100.0, 100.0), cup_at(600.0, 900.0)],
    ));

    let outcomes = session.auto_place().unwrap();
    assert!(matches!(outcomes[0], PlacementOutcome::Placed { source: HitSource::DepthPoint, .. }));
    assert!(matches!(outcomes[1], PlacementOutcome::Duplicate { .. }));
    assert_eq!(session.markers().len(), 1);
    assert_eq!(session.tap(ScreenPoint::new(200.0, 200.0)).unwrap(), PlacementOutcome::Ignored);
  }

  #[test]
  fn auto_mode_uses_each_batch_once() {
    let tracking = SimulatedTracking::default();
    let mut session = session(tracking.clone());
    session.set_mode(PlacementMode::Auto);
    assert!(session.auto_place().unwrap().is_empty());

    session.apply_batch(DetectionBatch::new(meta(), vec![cup_at(100.0, 100.0)]));
    assert_eq!(session.auto_place().unwrap().len(), 1);

    // 相机移动后旧批次不再参与放置
    tracking.set_camera_pose(WorldPose::from_position(Vector3::new(2.0, 0.0, 0.0)));
    assert!(session.auto_place().unwrap().is_empty());
    assert_eq!(session.markers().len(), 1);
  }

  #[derive(Debug, Default)]
  struct ReadOnlyStore;

  impl AnchorStore for ReadOnlyStore {
    fn load_records(&self) -> Result<Vec<crate::store::PersistedAnchorRecord>, StoreError> {
      Ok(Vec::new())
    }

    fn append_record(&mut self, _record: &crate::store::PersistedAnchorRecord) -> Result<(), StoreError> {
      Err(StoreError::IoError(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        "read-only",
      )))
    }
  }

  #[test]
  fn persist_failure_keeps_marker_and_raises_notice() {
    let mut session = AnchoringSession::new(
      SessionConfig::default(),
      SimulatedTracking::default(),
      ReadOnlyStore,
      ImmediateRenderer::default(),
    );
    session.buffer.replace(meta(), vec![cup_at(100.0, 100.0)]);

    let outcome = session.tap(ScreenPoint::new(200.0, 200.0)).unwrap();
    let PlacementOutcome::Placed { id, .. } = &outcome else {
      panic!("期望放置成功，实际为 {:?}", outcome);
    };
    assert_eq!(session.markers().len(), 1);
    assert_eq!(session.dedup.len(), 1);

    let notices = session.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(&notices[0], SessionNotice::PersistFailed { id: failed, .. } if failed == id));

    // 未持久化的标记依然参与去重
    assert!(matches!(
      session.tap(ScreenPoint::new(201.0, 201.0)).unwrap(),
      PlacementOutcome::Duplicate { .. }
    ));
  }

  #[test]
  fn anchor_rejection_is_skipped() {
    let tracking = SimulatedTracking::default().with_anchor_range(0.5);
    let mut session = session(tracking);
    session.buffer.replace(meta(), vec![cup_at(100.0, 100.0)]);
    let outcome = session.tap(ScreenPoint::new(200.0, 200.0)).unwrap();
    assert!(matches!(outcome, PlacementOutcome::AnchorRejected { .. }));
    assert!(session.markers().is_empty());
    assert!(session.store().records().is_empty());
  }

  #[test]
  fn detector_errors_become_notices() {
    let mut session = session(SimulatedTracking::default());
    session.handle_worker_event(WorkerEvent::DetectorError("boom".to_string()));
    assert_eq!(
      session.drain_notices(),
      vec![SessionNotice::DetectorError("boom".to_string())]
    );
    assert!(session.drain_notices().is_empty());
  }

  #[test]
  fn depth_strategy_follows_tracking_support() {
    let session = session(SimulatedTracking::default().with_depth_support(false));
    assert!(!session.resolver.config().depth_hits);
  }
}
