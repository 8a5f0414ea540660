// 该文件是 Maodian （锚点） 项目的一部分。
// src/main.rs - 场景回放主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use maodian::{
  FromUrl,
  hit::ResolverConfig,
  model::DetectorOptions,
  scenario::{Scenario, ScenarioParts},
  session::{AnchoringSession, PlacementMode, SessionConfig},
  sim::DeferredRenderer,
  store::StoreWrapper,
  task::{ContinuousTask, InferenceWorker, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("场景: {}", args.scenario);
  info!("存储: {}", args.store);

  let scenario = Scenario::from_url(&args.scenario)?;
  let view = args.view.or(scenario.view).unwrap_or_default();
  info!("视图尺寸: {}x{}", view.width, view.height);

  let ScenarioParts {
    input,
    tracking,
    factory,
  } = scenario.into_parts(view)?;
  let store = StoreWrapper::from_url(&args.store)?;
  let renderer = DeferredRenderer::new(Duration::from_millis(args.render_delay_ms));

  let config = SessionConfig {
    view,
    transform: args.transform,
    resolver: ResolverConfig {
      fallback_depth: args.fallback_depth,
      ..ResolverConfig::default()
    },
    mode: if args.auto { PlacementMode::Auto } else { PlacementMode::Tap },
    ..SessionConfig::default()
  };
  let mut session = AnchoringSession::new(config, tracking, store, renderer);
  let restored = session.start()?;
  info!("已恢复 {} 个锚点", restored);

  let worker = InferenceWorker::spawn(factory, DetectorOptions::default())?;
  let result_timeout = (args.result_timeout_ms > 0).then(|| Duration::from_millis(args.result_timeout_ms));
  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_result_timeout(result_timeout)
    .with_interrupt(true)
    .run_task(input, worker, &mut session)?;

  for notice in session.drain_notices() {
    info!("通知: {:?}", notice);
  }

  println!("共 {} 个标记:", session.markers().len());
  for marker in session.markers() {
    let p = marker.pose.position();
    println!(
      "  - {} {}: ({:.3}, {:.3}, {:.3}){}",
      marker.id,
      marker.label,
      p.x,
      p.y,
      p.z,
      if marker.restored { " [恢复]" } else { "" }
    );
  }

  Ok(())
}
