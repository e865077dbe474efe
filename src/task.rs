// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 视频逐帧检测循环
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  decode::BoxDecoder,
  detector::{InferenceError, detect_image},
  input::VisualSource,
  model::{InferenceEngine, ModelHandle},
  output::RenderSurface,
};

const DEFAULT_REFRESH_RATE: f32 = 60.0;
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);
const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// 决定下一次 tick 何时开始
pub trait RefreshScheduler {
  /// 阻塞到下一次刷新时机
  fn wait_for_refresh(&mut self);
}

/// 按固定刷新率节拍，补足距离上次刷新的剩余时间
#[derive(Debug, Clone)]
pub struct FramePacer {
  interval: Duration,
  last: Option<Instant>,
}

impl Default for FramePacer {
  fn default() -> Self {
    Self::with_rate(DEFAULT_REFRESH_RATE)
  }
}

impl FramePacer {
  /// 非正数或非有限的刷新率表示不等待；过小的刷新率按最长间隔处理
  pub fn with_rate(rate: f32) -> Self {
    let interval = if rate.is_finite() && rate > 0.0 {
      Duration::try_from_secs_f32(1.0 / rate).unwrap_or(MAX_REFRESH_INTERVAL)
    } else {
      Duration::ZERO
    };
    Self {
      interval,
      last: None,
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }
}

impl RefreshScheduler for FramePacer {
  fn wait_for_refresh(&mut self) {
    if let Some(last) = self.last {
      let elapsed = last.elapsed();
      if elapsed < self.interval {
        thread::sleep(self.interval - elapsed);
      }
    }
    self.last = Some(Instant::now());
  }
}

/// 立即开始下一次 tick
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl RefreshScheduler for Immediate {
  fn wait_for_refresh(&mut self) {}
}

/// 外部取消信号
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  /// 收到 Ctrl-C 时取消；若循环 30 秒内仍未退出则强制结束进程
  pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      token.cancel();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 视觉源宽度为 0 且没有实时流
  SourceInactive,
  Cancelled,
  /// 达到指定帧数
  FrameLimit,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Running,
  Stopped(StopReason),
}

/// 循环结束时的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
  pub frames: usize,
  pub reason: StopReason,
}

/// 视频逐帧检测循环
///
/// 每次 tick 处理一帧：预处理、推理、解码并绘制到表面，然后由表面输出合成结果。
/// 前一次 tick 的张量作用域完全关闭之后才会开始下一次 tick。
pub struct VideoLoop<'m, S, E, R, P = FramePacer> {
  source: S,
  model: &'m ModelHandle<E>,
  decoder: BoxDecoder,
  surface: R,
  scheduler: P,
  cancel: CancelToken,
  frame_limit: Option<usize>,
  frames: usize,
  state: LoopState,
}

impl<'m, S, E, R> VideoLoop<'m, S, E, R, FramePacer>
where
  S: VisualSource,
  E: InferenceEngine,
  R: RenderSurface,
{
  pub fn new(source: S, model: &'m ModelHandle<E>, decoder: BoxDecoder, surface: R) -> Self {
    Self {
      source,
      model,
      decoder,
      surface,
      scheduler: FramePacer::default(),
      cancel: CancelToken::new(),
      frame_limit: None,
      frames: 0,
      state: LoopState::Running,
    }
  }
}

impl<'m, S, E, R, P> VideoLoop<'m, S, E, R, P>
where
  S: VisualSource,
  E: InferenceEngine,
  R: RenderSurface,
  P: RefreshScheduler,
{
  pub fn with_scheduler<Q: RefreshScheduler>(self, scheduler: Q) -> VideoLoop<'m, S, E, R, Q> {
    VideoLoop {
      source: self.source,
      model: self.model,
      decoder: self.decoder,
      surface: self.surface,
      scheduler,
      cancel: self.cancel,
      frame_limit: self.frame_limit,
      frames: self.frames,
      state: self.state,
    }
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<usize>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  /// 已处理的帧数
  pub fn frames(&self) -> usize {
    self.frames
  }

  pub fn surface(&self) -> &R {
    &self.surface
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  fn stop(&mut self, reason: StopReason) -> LoopState {
    info!("检测循环停止: {:?}, 共处理 {} 帧", reason, self.frames);
    self.state = LoopState::Stopped(reason);
    self.state
  }

  fn fail(&mut self, err: InferenceError) -> InferenceError {
    warn!("检测循环出错: {}", err);
    self.state = LoopState::Stopped(StopReason::Failed);
    err
  }

  /// 执行一次 tick，返回之后的状态
  pub fn tick(&mut self) -> Result<LoopState, InferenceError> {
    if let LoopState::Stopped(_) = self.state {
      return Ok(self.state);
    }

    if self.cancel.is_cancelled() {
      self.surface.clear();
      return Ok(self.stop(StopReason::Cancelled));
    }
    if self.source.intrinsic_width() == 0 && !self.source.has_live_stream() {
      self.surface.clear();
      return Ok(self.stop(StopReason::SourceInactive));
    }

    let frame = match self.source.read_frame() {
      Ok(Some(frame)) => frame,
      Ok(None) => {
        debug!("暂无新帧");
        return Ok(self.state);
      }
      Err(e) => return Err(self.fail(InferenceError::InferenceFailure(Box::new(e)))),
    };

    let now = Instant::now();
    self.surface.resize(frame.width(), frame.height());
    if let Err(e) = detect_image(&frame, self.model, &self.decoder, Some(&mut self.surface)) {
      return Err(self.fail(e));
    }
    let elapsed_a = now.elapsed();
    if let Err(e) = self.surface.present(&frame) {
      return Err(self.fail(e.into()));
    }
    let elapsed_b = now.elapsed();

    self.frames += 1;
    info!(
      "处理第 {} 帧图像，耗时: {:.2?} / {:.2?}",
      self.frames, elapsed_a, elapsed_b
    );

    if self.frame_limit.is_some_and(|limit| self.frames >= limit) {
      info!("达到指定帧数 {}, 退出任务循环", self.frames);
      return Ok(self.stop(StopReason::FrameLimit));
    }
    Ok(self.state)
  }

  /// 循环执行 tick 直到停止
  pub fn run(&mut self) -> Result<LoopSummary, InferenceError> {
    info!("开始检测循环...");
    loop {
      match self.tick()? {
        LoopState::Running => self.scheduler.wait_for_refresh(),
        LoopState::Stopped(reason) => {
          return Ok(LoopSummary {
            frames: self.frames,
            reason,
          });
        }
      }
    }
  }
}
