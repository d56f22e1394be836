//! 外部工具适配.
//!
//! 子进程的标准输入由写入任务填充, 标准输出由读取任务排空, 两者与调用方
//! 之间都是容量为 1 的通道. 任一方向有数据流动都会重置空闲计时;
//! 超过空闲时间没有任何活动即视为超时.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tcode_core::{TcError, TcResult, ToolFailure};
use tcode_module::{ExternalInvocation, ToolLocator};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// 单次读取标准输出的缓冲区大小
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// 外部工具适配器
#[derive(Debug, Clone)]
pub struct ExternalToolAdapter {
    locator: ToolLocator,
    idle_timeout: Duration,
}

impl ExternalToolAdapter {
    pub fn new(locator: ToolLocator, idle_timeout: Duration) -> Self {
        Self {
            locator,
            idle_timeout,
        }
    }

    /// 启动工具进程, 返回流式会话
    pub fn spawn(&self, invocation: &ExternalInvocation) -> TcResult<ToolSession> {
        let tool = invocation.tool.as_str();
        let path = self
            .locator
            .locate(tool)
            .ok_or_else(|| TcError::external_tool(tool, ToolFailure::NotFound))?;

        log::info!("启动外部工具: {} {}", path.display(), invocation.args.join(" "));
        let mut child = Command::new(&path)
            .args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TcError::external_tool(tool, ToolFailure::Spawn(e.to_string())))?;

        let pipe_missing = || TcError::external_tool(tool, ToolFailure::Io("管道未建立".into()));
        let stdin = child.stdin.take().ok_or_else(pipe_missing)?;
        let stdout = child.stdout.take().ok_or_else(pipe_missing)?;
        let stderr = child.stderr.take().ok_or_else(pipe_missing)?;

        let activity = Arc::new(Notify::new());
        let (input_tx, input_rx) = mpsc::channel::<Bytes>(1);
        let (output_tx, output_rx) = mpsc::channel::<TcResult<Bytes>>(1);

        let writer = tokio::spawn(feed_stdin(stdin, input_rx, Arc::clone(&activity)));
        let reader = tokio::spawn(drain_stdout(
            tool.to_string(),
            stdout,
            output_tx,
            activity,
            self.idle_timeout,
        ));
        tokio::spawn(log_stderr(tool.to_string(), stderr));

        Ok(ToolSession {
            tool: tool.to_string(),
            child,
            input: Some(input_tx),
            output: output_rx,
            writer,
            reader,
            idle_timeout: self.idle_timeout,
            bytes_out: 0,
        })
    }

    /// 一次性调用: 送入全部输入, 收集全部输出
    ///
    /// 任何失败都会丢弃已收到的部分输出.
    pub async fn invoke(&self, tool: &str, args: &[String], input: Bytes) -> TcResult<Bytes> {
        let invocation = ExternalInvocation::new(tool, args.iter().cloned());
        let mut session = self.spawn(&invocation)?;
        let input_tx = session.take_input();

        let feed = async move {
            if let Some(tx) = input_tx {
                if !input.is_empty() {
                    // 工具提前退出时通道关闭, 错误由 finish 报告
                    let _ = tx.send(input).await;
                }
            }
        };
        let collect = async {
            let mut out = BytesMut::new();
            while let Some(chunk) = session.recv().await {
                out.extend_from_slice(&chunk?);
            }
            Ok::<_, TcError>(out)
        };

        let ((), collected) = tokio::join!(feed, collect);
        let out = match collected {
            Ok(out) => out,
            Err(e) => {
                session.kill().await;
                return Err(e);
            }
        };
        session.finish().await?;
        Ok(out.freeze())
    }
}

/// 运行中的外部工具会话
pub struct ToolSession {
    tool: String,
    child: Child,
    input: Option<mpsc::Sender<Bytes>>,
    output: mpsc::Receiver<TcResult<Bytes>>,
    writer: JoinHandle<std::io::Result<u64>>,
    reader: JoinHandle<()>,
    idle_timeout: Duration,
    bytes_out: u64,
}

impl ToolSession {
    /// 工具名
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// 取出标准输入的发送端; 发送端全部释放后工具收到输入结束
    pub fn take_input(&mut self) -> Option<mpsc::Sender<Bytes>> {
        self.input.take()
    }

    /// 接收下一段标准输出, 输出结束时返回 `None`
    pub async fn recv(&mut self) -> Option<TcResult<Bytes>> {
        let item = self.output.recv().await;
        if let Some(Ok(chunk)) = &item {
            self.bytes_out += chunk.len() as u64;
        }
        item
    }

    /// 已收到的输出字节数
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// 等待工具退出并检查结果
    ///
    /// 应在 `recv()` 返回 `None` 之后调用.
    pub async fn finish(mut self) -> TcResult<()> {
        self.input.take();
        let status = match tokio::time::timeout(self.idle_timeout, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(TcError::external_tool(
                    &self.tool,
                    ToolFailure::Io(e.to_string()),
                ));
            }
            Err(_) => {
                log::warn!("{}: 等待退出超时, 终止进程", self.tool);
                let _ = self.child.kill().await;
                return Err(TcError::external_tool(
                    &self.tool,
                    ToolFailure::Timeout(self.idle_timeout),
                ));
            }
        };

        if !status.success() {
            self.reader.abort();
            return Err(TcError::external_tool(
                &self.tool,
                ToolFailure::ExitStatus(status.code()),
            ));
        }

        let written = match (&mut self.writer).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                return Err(TcError::external_tool(
                    &self.tool,
                    ToolFailure::Io(e.to_string()),
                ));
            }
            Err(e) => {
                return Err(TcError::external_tool(
                    &self.tool,
                    ToolFailure::Io(e.to_string()),
                ));
            }
        };

        if self.bytes_out == 0 {
            return Err(TcError::external_tool(&self.tool, ToolFailure::NoOutput));
        }
        log::debug!(
            "{}: 正常退出, 输入 {} 字节, 输出 {} 字节",
            self.tool,
            written,
            self.bytes_out
        );
        Ok(())
    }

    /// 立即终止工具进程
    pub async fn kill(mut self) {
        self.input.take();
        self.writer.abort();
        self.reader.abort();
        if let Err(e) = self.child.kill().await {
            log::debug!("{}: 终止进程失败: {e}", self.tool);
        }
    }
}

async fn feed_stdin(
    mut stdin: ChildStdin,
    mut input: mpsc::Receiver<Bytes>,
    activity: Arc<Notify>,
) -> std::io::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = input.recv().await {
        stdin.write_all(&chunk).await?;
        written += chunk.len() as u64;
        activity.notify_one();
    }
    stdin.shutdown().await?;
    Ok(written)
}

async fn drain_stdout(
    tool: String,
    mut stdout: ChildStdout,
    output: mpsc::Sender<TcResult<Bytes>>,
    activity: Arc<Notify>,
    idle_timeout: Duration,
) {
    loop {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let read = tokio::select! {
            r = stdout.read_buf(&mut buf) => r,
            _ = activity.notified() => continue,
            _ = tokio::time::sleep(idle_timeout) => {
                log::warn!("{tool}: 超过 {} ms 无活动", idle_timeout.as_millis());
                let _ = output
                    .send(Err(TcError::external_tool(&tool, ToolFailure::Timeout(idle_timeout))))
                    .await;
                return;
            }
        };
        match read {
            Ok(0) => return,
            Ok(_) => {
                if output.send(Ok(buf.freeze())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = output
                    .send(Err(TcError::external_tool(&tool, ToolFailure::Io(e.to_string()))))
                    .await;
                return;
            }
        }
    }
}

async fn log_stderr(tool: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            log::debug!("[{tool}] {line}");
        }
    }
}
