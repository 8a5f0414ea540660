// 该文件是 Maodian （锚点） 项目的一部分。
// src/anchor.rs - 锚点生命周期管理
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

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::{
  pose::WorldPose,
  store::{AnchorStore, PersistedAnchorRecord, StoreError},
  tracking::{
    AnchorError, AnchorHandle, Attachment, AttachmentState, MarkerContent, SceneHandle,
    SceneRenderer, TrackingSession,
  },
};

/// 已放置的标记，存活到会话结束
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMarker {
  pub id: String,
  pub pose: WorldPose,
  pub label: String,
  pub anchor: AnchorHandle,
  /// 渲染节点挂载完成后才有值
  pub scene: Option<SceneHandle>,
  /// 是否由持久化记录恢复
  pub restored: bool,
}

impl PlacedMarker {
  pub fn to_record(&self) -> PersistedAnchorRecord {
    PersistedAnchorRecord {
      id: self.id.clone(),
      pose: self.pose,
      label: Some(self.label.clone()),
    }
  }
}

pub struct AnchorLifecycleManager<S, R> {
  store: S,
  renderer: R,
  markers: Vec<PlacedMarker>,
  /// 按锚点句柄索引，恢复的记录可能共用同一 id
  pending: HashMap<AnchorHandle, Attachment>,
  counter: u16,
}

impl<S: AnchorStore, R: SceneRenderer> AnchorLifecycleManager<S, R> {
  pub fn new(store: S, renderer: R) -> Self {
    Self {
      store,
      renderer,
      markers: Vec::new(),
      pending: HashMap::new(),
      counter: 0,
    }
  }

  fn next_id(&mut self) -> String {
    self.counter = self.counter.wrapping_add(1);
    format!("{}-{:04X}", Utc::now().format("%Y%m%d-%H%M%S"), self.counter)
  }

  /// 同步创建跟踪锚点，异步挂载渲染节点
  pub fn place<T: TrackingSession + ?Sized>(
    &mut self,
    session: &mut T,
    pose: WorldPose,
    label: &str,
  ) -> Result<PlacedMarker, AnchorError> {
    let id = self.next_id();
    self.materialize(session, id, pose, label.to_string(), false)
  }

  fn materialize<T: TrackingSession + ?Sized>(
    &mut self,
    session: &mut T,
    id: String,
    pose: WorldPose,
    label: String,
    restored: bool,
  ) -> Result<PlacedMarker, AnchorError> {
    let anchor = session.create_anchor(&pose)?;
    let attachment = self.renderer.attach_node(
      anchor,
      MarkerContent {
        label: label.clone(),
        position: *pose.position(),
      },
    );
    self.pending.insert(anchor, attachment);

    let marker = PlacedMarker {
      id,
      pose,
      label,
      anchor,
      scene: None,
      restored,
    };
    info!(
      "放置标记 {} ({}) 于 {:?}，锚点 {:?}",
      marker.id,
      marker.label,
      marker.pose.position(),
      marker.anchor
    );
    self.markers.push(marker.clone());
    Ok(marker)
  }

  /// 追加一条持久化记录
  pub fn persist(&mut self, marker: &PlacedMarker) -> Result<PersistedAnchorRecord, StoreError> {
    let record = marker.to_record();
    self.store.append_record(&record)?;
    Ok(record)
  }

  /// 恢复所有持久化记录；被跟踪端拒绝的记录只记日志并跳过
  pub fn restore_all<T: TrackingSession + ?Sized>(
    &mut self,
    session: &mut T,
  ) -> Result<Vec<PlacedMarker>, StoreError> {
    let records = self.store.load_records()?;
    let total = records.len();
    let mut restored = Vec::with_capacity(total);
    for record in records {
      let label = record.label.unwrap_or_default();
      match self.materialize(session, record.id.clone(), record.pose, label, true) {
        Ok(marker) => restored.push(marker),
        Err(e) => warn!("跳过锚点记录 {}: {}", record.id, e),
      }
    }
    info!("恢复 {}/{} 个锚点", restored.len(), total);
    Ok(restored)
  }

  /// 收取已完成的异步挂载，返回本次新挂载的标记数
  pub fn poll_attachments(&mut self) -> usize {
    let mut attached = 0;
    let mut finished = Vec::new();
    for (anchor, attachment) in &self.pending {
      match attachment.poll() {
        AttachmentState::Pending => {}
        AttachmentState::Attached(handle) => {
          if let Some(marker) = self.markers.iter_mut().find(|m| m.anchor == *anchor) {
            marker.scene = Some(handle);
            attached += 1;
          }
          finished.push(*anchor);
        }
        AttachmentState::Failed(e) => {
          warn!("锚点 {:?} 的渲染节点挂载失败: {}", anchor, e);
          finished.push(*anchor);
        }
      }
    }
    for anchor in finished {
      self.pending.remove(&anchor);
    }
    attached
  }

  pub fn markers(&self) -> &[PlacedMarker] {
    &self.markers
  }

  pub fn pending_attachments(&self) -> usize {
    self.pending.len()
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn renderer(&self) -> &R {
    &self.renderer
  }
}
