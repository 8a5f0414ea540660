// 该文件是 Maodian （锚点） 项目的一部分。
// tests/pipeline.rs - 端到端回放测试
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

use std::time::Duration;

use maodian::{
  frame::{CameraFrame, ImageFrameMeta, Rotation},
  model::DetectorOptions,
  scenario::{Scenario, ScenarioParts},
  session::{AnchoringSession, PlacementMode, SessionConfig, SessionNotice},
  sim::ImmediateRenderer,
  store::{AnchorStore, JsonLinesAnchorStore, MemoryAnchorStore},
  task::{ContinuousTask, InferenceWorker, Task, WorkerEvent},
  transform::ViewSize,
};

/// 第 0 帧检测到位于画面中央的杯子（视图坐标中心为 540, 960），
/// 第 1、2 帧点击该位置，命中 1 米外的深度点
const TAP_SCENARIO: &str = r#"{
  "ticks": [
    { "frame": { "width": 1280, "height": 720, "detections": [
        { "label": "cup", "score": 0.9, "bbox": [0.4, 0.4, 0.6, 0.6] },
        { "label": "noise", "score": 0.2, "bbox": [0.0, 0.0, 0.1, 0.1] } ] } },
    { "tap": { "x": 540, "y": 960 },
      "hits": [ { "trackable": { "kind": "depth_point" },
                  "pose": { "position": [0, 0, -1], "orientation": [0, 0, 0, 1] },
                  "distance": 1.0 } ] },
    { "tap": { "x": 545, "y": 955 },
      "hits": [ { "trackable": { "kind": "depth_point" },
                  "pose": { "position": [0.02, 0, -1], "orientation": [0, 0, 0, 1] },
                  "distance": 1.0 } ] }
  ]
}"#;

fn replay<S: AnchorStore>(
  json: &str,
  mode: PlacementMode,
  store: S,
) -> AnchoringSession<maodian::sim::SimulatedTracking, S, ImmediateRenderer> {
  let scenario: Scenario = json.parse().unwrap();
  let view = scenario.view.unwrap_or_default();
  let ScenarioParts {
    input,
    tracking,
    factory,
  } = scenario.into_parts(view).unwrap();
  let config = SessionConfig {
    view,
    mode,
    ..SessionConfig::default()
  };
  let mut session = AnchoringSession::new(config, tracking, store, ImmediateRenderer::default());
  session.start().unwrap();
  let worker = InferenceWorker::spawn(factory, DetectorOptions::default()).unwrap();
  ContinuousTask::default()
    .with_result_timeout(Some(Duration::from_secs(5)))
    .run_task(input, worker, &mut session)
    .unwrap();
  session
}

#[test]
fn tap_places_one_marker_per_object() {
  let session = replay(TAP_SCENARIO, PlacementMode::Tap, MemoryAnchorStore::new());

  // 低分检测被过滤
  assert_eq!(session.detections().len(), 1);
  assert_eq!(session.markers().len(), 1);
  let marker = &session.markers()[0];
  assert_eq!(marker.label, "cup");
  assert_eq!(marker.pose.position().z, -1.0);
  assert!(marker.scene.is_some());
  assert_eq!(session.store().records().len(), 1);
}

#[test]
fn restored_markers_block_duplicates() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("anchors.jsonl");

  let first = replay(TAP_SCENARIO, PlacementMode::Tap, JsonLinesAnchorStore::new(&path));
  assert_eq!(first.markers().len(), 1);

  let second = replay(TAP_SCENARIO, PlacementMode::Tap, JsonLinesAnchorStore::new(&path));
  assert_eq!(second.markers().len(), 1);
  assert!(second.markers()[0].restored);
  // 恢复不会重复写入
  assert_eq!(JsonLinesAnchorStore::new(&path).load_records().unwrap().len(), 1);
}

#[test]
fn auto_mode_places_each_object_once() {
  let json = r#"{
    "ticks": [
      { "frame": { "width": 1280, "height": 720, "detections": [
          { "label": "cup", "score": 0.9, "bbox": [0.4, 0.4, 0.6, 0.6] },
          { "label": "cup", "score": 0.8, "bbox": [0.41, 0.41, 0.61, 0.61] } ] },
        "hits": [ { "trackable": { "kind": "instant_placement" },
                    "pose": { "position": [0, 0, -1.5], "orientation": [0, 0, 0, 1] },
                    "distance": 1.5 } ] },
      { "frame": { "width": 1280, "height": 720, "detections": [
          { "label": "cup", "score": 0.9, "bbox": [0.4, 0.4, 0.6, 0.6] } ] },
        "hits": [ { "trackable": { "kind": "instant_placement" },
                    "pose": { "position": [0.05, 0, -1.5], "orientation": [0, 0, 0, 1] },
                    "distance": 1.5 } ] }
    ]
  }"#;
  let session = replay(json, PlacementMode::Auto, MemoryAnchorStore::new());
  assert_eq!(session.markers().len(), 1);
  assert_eq!(session.store().records().len(), 1);
}

#[test]
fn auto_mode_ignores_batches_already_used() {
  // 只有第 0 帧有检测结果；之后命中点随相机移动
  let hit = |x: f32| {
    format!(
      r#"[ {{ "trackable": {{ "kind": "depth_point" }},
              "pose": {{ "position": [{x}, 0, -1], "orientation": [0, 0, 0, 1] }},
              "distance": 1.0 }} ]"#
    )
  };
  let json = format!(
    r#"{{
      "ticks": [
        {{ "frame": {{ "width": 1280, "height": 720, "detections": [
            {{ "label": "cup", "score": 0.9, "bbox": [0.4, 0.4, 0.6, 0.6] }} ] }},
          "hits": {} }},
        {{ "hits": {} }},
        {{ "hits": {} }},
        {{ "hits": {} }}
      ]
    }}"#,
    hit(0.0),
    hit(1.0),
    hit(2.0),
    hit(3.0)
  );
  let session = replay(&json, PlacementMode::Auto, MemoryAnchorStore::new());
  assert_eq!(session.markers().len(), 1);
  assert_eq!(session.markers()[0].pose.position().x, 0.0);
}

#[test]
fn detector_errors_surface_as_notices() {
  let json = r#"{
    "ticks": [ { "frame": { "width": 640, "height": 480, "error": "npu busy" } } ]
  }"#;
  let mut session = replay(json, PlacementMode::Tap, MemoryAnchorStore::new());
  let notices = session.drain_notices();
  assert_eq!(notices.len(), 1);
  assert!(matches!(&notices[0], SessionNotice::DetectorError(m) if m.contains("npu busy")));
  assert!(session.markers().is_empty());
}

#[test]
fn rotated_frames_reconfigure_before_detecting() {
  let json = r#"{
    "ticks": [
      { "frame": { "width": 720, "height": 1280, "rotation": 90, "detections": [
          { "label": "cup", "score": 0.9, "bbox": [0.4, 0.4, 0.6, 0.6] } ] } },
      { "frame": { "width": 720, "height": 1280, "rotation": 90, "detections": [
          { "label": "cup", "score": 0.9, "bbox": [0.4, 0.4, 0.6, 0.6] } ] } }
    ]
  }"#;
  let scenario: Scenario = json.parse().unwrap();
  let ScenarioParts {
    mut input,
    tracking,
    factory,
  } = scenario.into_parts(ViewSize::default()).unwrap();
  let mut session = AnchoringSession::new(
    SessionConfig::default(),
    tracking,
    MemoryAnchorStore::new(),
    ImmediateRenderer::default(),
  );
  let worker = InferenceWorker::spawn(factory.clone(), DetectorOptions::default()).unwrap();

  let first: CameraFrame = input.next().unwrap().frame.unwrap();
  worker.submit(first);
  let event = worker.recv_timeout(Duration::from_secs(5)).unwrap();
  assert_eq!(
    event,
    WorkerEvent::Reconfigured(ImageFrameMeta::new(720, 1280, Rotation::Deg90).unwrap())
  );
  session.handle_worker_event(event);
  assert!(session.detections().is_empty());
  assert_eq!(factory.instances(), 2);

  worker.submit(input.next().unwrap().frame.unwrap());
  session.handle_worker_event(worker.recv_timeout(Duration::from_secs(5)).unwrap());
  assert_eq!(session.detections().len(), 1);
}
