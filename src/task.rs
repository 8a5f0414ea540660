// 该文件是 Maodian （锚点） 项目的一部分。
// src/task.rs - 推理工作线程与任务循环
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{CameraFrame, ImageFrameMeta},
  model::{DetectResult, DetectorOptions, Model, ModelFactory},
  pose::ScreenPoint,
  session::{AnchoringSession, PlacementMode},
  store::AnchorStore,
  tracking::{SceneRenderer, TrackingSession},
};

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("创建检测器失败: {0}")]
  DetectorCreation(String),
  #[error("无法启动推理线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 推理线程发回会话线程的事件
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
  Detections { result: DetectResult, latency: Duration },
  DetectorError(String),
  /// 帧几何变化，检测器已重建，本帧没有结果
  Reconfigured(ImageFrameMeta),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
  Accepted,
  /// 已有帧在推理中，本帧被丢弃
  Dropped,
  /// 推理线程已退出
  Closed,
}

/// 单生产者推理线程；同一时刻最多一帧在推理中
#[derive(Debug)]
pub struct InferenceWorker {
  in_flight: Arc<AtomicBool>,
  frames: Option<SyncSender<CameraFrame>>,
  events: Receiver<WorkerEvent>,
  handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
  pub fn spawn<F>(factory: F, options: DetectorOptions) -> Result<Self, WorkerError>
  where
    F: ModelFactory + Send + 'static,
    F::Model: Send + 'static,
  {
    let detector = factory
      .create(&options)
      .map_err(|e| WorkerError::DetectorCreation(e.to_string()))?;
    let in_flight = Arc::new(AtomicBool::new(false));
    let (frame_tx, frame_rx) = mpsc::sync_channel::<CameraFrame>(1);
    let (event_tx, event_rx) = mpsc::channel();

    let flag = Arc::clone(&in_flight);
    let handle = thread::Builder::new()
      .name("maodian-inference".to_string())
      .spawn(move || {
        let mut detector = detector;
        let mut options = options;
        info!("推理线程启动");
        for frame in frame_rx {
          let event = if options.matches(&frame.meta) {
            let started = Instant::now();
            match detector.infer(&frame) {
              Ok(result) => WorkerEvent::Detections {
                result: result.filtered(&options),
                latency: started.elapsed(),
              },
              Err(e) => WorkerEvent::DetectorError(e.to_string()),
            }
          } else {
            let next = options.reconfigured(&frame.meta);
            info!("帧几何变化为 {:?}，重建检测器", frame.meta);
            match factory.create(&next) {
              Ok(model) => {
                detector = model;
                options = next;
                WorkerEvent::Reconfigured(frame.meta)
              }
              Err(e) => WorkerEvent::DetectorError(format!("重建检测器失败: {}", e)),
            }
          };
          // 先释放标志再发送，收到事件时必然可以提交下一帧
          flag.store(false, Ordering::Release);
          if event_tx.send(event).is_err() {
            debug!("事件接收端已关闭");
            break;
          }
        }
        info!("推理线程退出");
      })?;

    Ok(Self {
      in_flight,
      frames: Some(frame_tx),
      events: event_rx,
      handle: Some(handle),
    })
  }

  /// 非阻塞提交；推理中时直接丢弃本帧
  pub fn submit(&self, frame: CameraFrame) -> Submission {
    let Some(frames) = &self.frames else {
      return Submission::Closed;
    };
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("推理进行中，丢弃帧 {}", frame.timestamp_ms);
      return Submission::Dropped;
    }
    match frames.try_send(frame) {
      Ok(()) => Submission::Accepted,
      Err(TrySendError::Full(frame)) => {
        self.in_flight.store(false, Ordering::Release);
        debug!("通道已满，丢弃帧 {}", frame.timestamp_ms);
        Submission::Dropped
      }
      Err(TrySendError::Disconnected(_)) => {
        self.in_flight.store(false, Ordering::Release);
        Submission::Closed
      }
    }
  }

  pub fn in_flight(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  pub fn try_recv(&self) -> Option<WorkerEvent> {
    self.events.try_recv().ok()
  }

  pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
    match self.events.recv_timeout(timeout) {
      Ok(event) => Some(event),
      Err(RecvTimeoutError::Timeout) => None,
      Err(RecvTimeoutError::Disconnected) => None,
    }
  }
}

impl Drop for InferenceWorker {
  fn drop(&mut self) {
    // 关闭帧通道，推理线程处理完当前帧后退出
    self.frames.take();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("推理线程异常退出");
    }
  }
}

/// 一次循环的输入：可能有新相机帧，也可能有用户点击
#[derive(Debug, Clone, Default)]
pub struct InputEvent {
  pub frame: Option<CameraFrame>,
  pub tap: Option<ScreenPoint>,
}

pub trait Task<I, W, S>: Sized {
  type Error;
  fn run_task(self, input: I, worker: W, session: S) -> Result<(), Self::Error>;
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  result_timeout: Option<Duration>,
  interruptible: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每次循环最多等待推理结果的时间；不设置时不等待
  pub fn with_result_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.result_timeout = timeout;
    self
  }

  /// 安装 Ctrl-C 处理，一个进程只能安装一次
  pub fn with_interrupt(mut self, interruptible: bool) -> Self {
    self.interruptible = interruptible;
    self
  }
}

impl<I, T, St, R> Task<I, InferenceWorker, &mut AnchoringSession<T, St, R>> for ContinuousTask
where
  I: Iterator<Item = InputEvent>,
  T: TrackingSession,
  St: AnchorStore,
  R: SceneRenderer,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    worker: InferenceWorker,
    session: &mut AnchoringSession<T, St, R>,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();
    if self.interruptible {
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(());
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;
    }

    let mut frame_index = 0;
    // 每个被接受的帧恰好产生一个事件
    let mut awaiting = false;
    for event in input {
      frame_index += 1;
      debug!("处理第 {} 次输入", frame_index);

      if let Some(frame) = event.frame {
        match worker.submit(frame) {
          Submission::Accepted => awaiting = true,
          Submission::Dropped => debug!("第 {} 帧被丢弃", frame_index),
          Submission::Closed => anyhow::bail!("推理线程已退出"),
        }
      }

      if awaiting
        && let Some(timeout) = self.result_timeout
        && let Some(result) = worker.recv_timeout(timeout)
      {
        awaiting = false;
        session.handle_worker_event(result);
      }
      while let Some(result) = worker.try_recv() {
        awaiting = false;
        session.handle_worker_event(result);
      }
      session.poll_attachments();

      if let Some(point) = event.tap {
        match session.tap(point) {
          Ok(outcome) => info!("点击 ({:.0}, {:.0}): {:?}", point.x, point.y, outcome),
          Err(e) => warn!("点击 ({:.0}, {:.0}) 未处理: {}", point.x, point.y, e),
        }
      }
      if session.mode() == PlacementMode::Auto {
        match session.auto_place() {
          Ok(outcomes) if !outcomes.is_empty() => debug!("自动放置: {:?}", outcomes),
          Ok(_) => {}
          Err(e) => warn!("跳过本帧自动放置: {}", e),
        }
      }

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    drop(worker);
    session.poll_attachments();
    info!("任务完成，退出");
    Ok(())
  }
}
