// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 推理任务
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
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use anyhow::{anyhow, bail};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

/// 预热次数，不计入平均耗时
const WARMUP_TIMES: usize = 2;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 中断后强制退出前的等待时间
const FORCE_EXIT_DELAY: Duration = Duration::from_secs(30);

/// 对同一帧重复推理，校验结果一致并统计平均耗时
#[derive(Debug, Clone, Copy)]
pub struct RepeatShotTask {
  times: usize,
  render_each: bool,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      times: 100,
      render_each: true,
    }
  }
}

impl RepeatShotTask {
  pub fn new(times: usize) -> Self {
    Self {
      times: times.max(1),
      render_each: true,
    }
  }

  /// 只渲染最后一次结果，计时不受输出开销影响
  pub fn render_last_only(mut self) -> Self {
    self.render_each = false;
    self
  }

  pub fn times(&self) -> usize {
    self.times
  }
}

/// 跳过预热轮次后的平均耗时；轮次不足时对全部计时取平均
pub(crate) fn average_elapsed(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > WARMUP_TIMES {
    &times[WARMUP_TIMES..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D: PartialEq,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务, 重复 {} 次...", self.times);
    let frame = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let mut first: Option<D> = None;
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);

      if self.render_each || i + 1 == self.times {
        output.render_result(&frame, &result)?;
        info!("({})渲染完成", i);
      }

      match &first {
        Some(expected) => {
          if expected != &result {
            bail!("第 {} 次推理结果与首次不一致", i);
          }
        }
        None => first = Some(result),
      }
    }

    if let Some(average) = average_elapsed(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 持续处理输入帧，直到输入结束、达到指定帧数或收到中断信号
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interrupt_handler: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 注册 Ctrl-C 处理；每个进程只能注册一次
  pub fn with_interrupt_handler(mut self, enable: bool) -> Self {
    self.interrupt_handler = enable;
    self
  }

  fn install_interrupt_handler(&self) -> anyhow::Result<Option<mpsc::Receiver<()>>> {
    if !self.interrupt_handler {
      return Ok(None);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_DELAY);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(Some(rx))
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = self.install_interrupt_handler()?;

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.saturating_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    if frame_index == 0 {
      bail!("没有输入帧");
    }
    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::{Cell, RefCell};
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("mock")]
  struct MockError;

  struct CountingModel<'a> {
    calls: &'a Cell<usize>,
    drift_at: Option<usize>,
  }

  impl Model for CountingModel<'_> {
    type Input = u32;
    type Output = Vec<u32>;
    type Error = MockError;

    fn infer(&self, input: &u32) -> Result<Vec<u32>, MockError> {
      let call = self.calls.get();
      self.calls.set(call + 1);
      if self.drift_at == Some(call) {
        Ok(vec![*input, 1])
      } else {
        Ok(vec![*input])
      }
    }
  }

  #[derive(Default)]
  struct Collect {
    rendered: RefCell<Vec<(u32, Vec<u32>)>>,
  }

  impl Render<u32, Vec<u32>> for &Collect {
    type Error = MockError;

    fn render_result(&self, frame: &u32, result: &Vec<u32>) -> Result<(), MockError> {
      self.rendered.borrow_mut().push((*frame, result.clone()));
      Ok(())
    }
  }

  fn model(calls: &Cell<usize>, drift_at: Option<usize>) -> CountingModel<'_> {
    CountingModel { calls, drift_at }
  }

  #[test]
  fn one_shot_renders_first_frame() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    OneShotTask
      .run_task([7u32, 8].into_iter(), model(&calls, None), &collect)
      .unwrap();
    assert_eq!(collect.rendered.into_inner(), vec![(7, vec![7])]);
  }

  #[test]
  fn one_shot_without_frame_fails() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    assert!(
      OneShotTask
        .run_task(std::iter::empty::<u32>(), model(&calls, None), &collect)
        .is_err()
    );
  }

  #[test]
  fn repeat_shot_renders_every_result() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    RepeatShotTask::new(5)
      .run_task([3u32].into_iter(), model(&calls, None), &collect)
      .unwrap();
    assert_eq!(calls.get(), 5);
    assert_eq!(collect.rendered.into_inner(), vec![(3, vec![3]); 5]);
  }

  #[test]
  fn repeat_shot_detects_drift() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    let result =
      RepeatShotTask::new(4).run_task([3u32].into_iter(), model(&calls, Some(2)), &collect);
    assert!(result.is_err());
    assert_eq!(calls.get(), 3);
    assert_eq!(collect.rendered.into_inner().len(), 3);
  }

  #[test]
  fn repeat_shot_can_render_only_last_result() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    let task = RepeatShotTask::new(6).render_last_only();
    assert_eq!(task.times(), 6);
    task
      .run_task([3u32].into_iter(), model(&calls, None), &collect)
      .unwrap();
    assert_eq!(calls.get(), 6);
    assert_eq!(collect.rendered.into_inner(), vec![(3, vec![3])]);
  }

  #[test]
  fn continuous_processes_every_frame() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    ContinuousTask::default()
      .run_task([1u32, 2, 3].into_iter(), model(&calls, None), &collect)
      .unwrap();
    assert_eq!(
      collect.rendered.into_inner(),
      vec![(1, vec![1]), (2, vec![2]), (3, vec![3])]
    );
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(1u32.., model(&calls, None), &collect)
      .unwrap();
    assert_eq!(calls.get(), 2);
    assert_eq!(collect.rendered.into_inner().len(), 2);
  }

  #[test]
  fn continuous_without_frames_fails() {
    let collect = Collect::default();
    let calls = Cell::new(0);
    assert!(
      ContinuousTask::default()
        .run_task(std::iter::empty::<u32>(), model(&calls, None), &collect)
        .is_err()
    );
  }

  #[test]
  fn average_skips_warmup() {
    let ms = Duration::from_millis;
    assert_eq!(average_elapsed(&[]), None);
    assert_eq!(average_elapsed(&[ms(9), ms(3)]), Some(ms(6)));
    assert_eq!(average_elapsed(&[ms(100), ms(50), ms(4), ms(6)]), Some(ms(5)));
  }
}
