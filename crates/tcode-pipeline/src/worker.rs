//! 任务执行.
//!
//! 每个任务在独立的 tokio 任务中运行, 通过 `JobHandle` 取消或等待结果.

use tcode_core::{TcError, TcResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::io::{FrameSink, FrameSource};
use crate::pipeline::{Pipeline, Summary};

/// 运行中任务的句柄
pub struct JobHandle {
    cancel: CancellationToken,
    task: JoinHandle<TcResult<Summary>>,
}

impl JobHandle {
    /// 请求取消; 正在处理的帧完成后生效
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 取消令牌 (用于与信号处理等外部事件关联)
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 等待任务结束
    pub async fn wait(self) -> TcResult<Summary> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TcError::pipeline(None, format!("任务异常终止: {e}"))),
        }
    }
}

/// 在后台启动任务
pub fn spawn_job(
    pipeline: Pipeline,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
) -> JobHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move { pipeline.run(source, sink, token).await });
    JobHandle { cancel, task }
}
