//! 流式转码管线.
//!
//! 处理流程:
//! 1. 校验任务 (失败时不读取任何输入)
//! 2. 读取任务按序读帧, 经容量为 1 的通道交给处理循环
//! 3. 处理循环依次调用导入解码器与主插件, 结果按序写入写入端
//! 4. 插件声明了外部工具时, 该插件的输出送入工具, 工具输出重新编号后
//!    交给后续插件
//! 5. 成功时 `finish` 所有插件并提交输出; 失败时中止输出并报告最后完成的帧

use std::time::{Duration, Instant};

use bytes::Bytes;
use tcode_core::{StreamFrame, TcError, TcResult, ToolFailure};
use tcode_module::{ExternalInvocation, Job, Plugin, PluginRegistry, ToolLocator, validate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::external::{ExternalToolAdapter, ToolSession};
use crate::io::{FrameSink, FrameSource};

/// 任务运行摘要
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// 读取的帧数
    pub frames_in: u64,
    /// 写出的帧数
    pub frames_out: u64,
    /// 读取的字节数
    pub bytes_in: u64,
    /// 写出的字节数
    pub bytes_out: u64,
    /// 最后一个输入帧的序号
    pub last_sequence: Option<u64>,
    /// 总耗时
    pub elapsed: Duration,
}

type FrameMessage = TcResult<StreamFrame>;

/// 转码管线
pub struct Pipeline {
    job: Job,
    tools: ToolLocator,
    import: Option<Box<dyn Plugin>>,
    export: Box<dyn Plugin>,
}

impl Pipeline {
    /// 从注册表创建任务所需的插件实例
    pub fn new(job: Job, registry: &PluginRegistry, tools: ToolLocator) -> TcResult<Self> {
        let export = registry.create(job.selected_plugin.kind(), job.selected_plugin.name())?;
        let import = match &job.import_plugin {
            Some(desc) => Some(registry.create(desc.kind(), desc.name())?),
            None => None,
        };
        Ok(Self {
            job,
            tools,
            import,
            export,
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// 运行任务
    pub async fn run(
        self,
        source: Box<dyn FrameSource>,
        mut sink: Box<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> TcResult<Summary> {
        let started = Instant::now();
        validate(&self.job, &self.tools)?;
        let idle_timeout = self.job.tool_timeout()?;

        let Self {
            job,
            tools,
            import,
            export,
        } = self;

        let mut chain: Vec<Box<dyn Plugin>> = import.into_iter().collect();
        chain.push(export);
        for plugin in chain.iter_mut() {
            plugin.configure(&job.options)?;
        }

        // 外部工具之前的插件在 pre 中, 之后的在 post 中
        let split = chain
            .iter()
            .position(|p| p.external_invocation().is_some());
        let (stages, tool) = match split {
            Some(idx) => {
                let post = chain.split_off(idx + 1);
                let invocation = chain[idx].external_invocation();
                (Stages { pre: chain, post }, invocation)
            }
            None => (
                Stages {
                    pre: chain,
                    post: Vec::new(),
                },
                None,
            ),
        };

        log::info!(
            "开始转码: {} -> {} ({})",
            job.input_path.display(),
            job.effective_output_path().display(),
            job.plugin_chain()
                .map(|d| d.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let (frame_tx, frame_rx) = mpsc::channel::<FrameMessage>(1);
        let reader = spawn_reader(source, frame_tx);

        let mut run = Run {
            stages,
            frames: frame_rx,
            sink: &mut sink,
            cancel,
            progress: Progress::default(),
        };
        let outcome = match tool {
            Some(invocation) => {
                let adapter = ExternalToolAdapter::new(tools, idle_timeout);
                run.drive_with_tool(&adapter, &invocation).await
            }
            None => run.drive().await,
        };
        let outcome = outcome.and_then(|()| run.finish_stages());
        let progress = run.progress;
        drop(run.frames);

        let bytes_in = reader.await.unwrap_or_else(|e| {
            log::warn!("读取任务异常退出: {e}");
            0
        });

        let outcome = match outcome {
            Ok(()) => sink
                .commit()
                .await
                .map_err(|e| e.into_job_failure(progress.last_done)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                let summary = Summary {
                    frames_in: progress.frames_in,
                    frames_out: progress.frames_out,
                    bytes_in,
                    bytes_out: progress.bytes_out,
                    last_sequence: progress.last_in,
                    elapsed: started.elapsed(),
                };
                log::info!(
                    "转码完成: 输入 {} 帧 / {} 字节, 输出 {} 帧 / {} 字节, 耗时 {:.2?}",
                    summary.frames_in,
                    summary.bytes_in,
                    summary.frames_out,
                    summary.bytes_out,
                    summary.elapsed
                );
                Ok(summary)
            }
            Err(e) => {
                log::error!("转码失败: {e}");
                if let Err(abort_err) = sink.abort().await {
                    log::warn!("清理未完成输出失败: {abort_err}");
                }
                Err(e)
            }
        }
    }
}

fn spawn_reader(
    mut source: Box<dyn FrameSource>,
    tx: mpsc::Sender<FrameMessage>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        loop {
            if tx.is_closed() {
                break;
            }
            match source.next_frame().await {
                Ok(Some(frame)) => {
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
        source.bytes_read()
    })
}

/// 外部工具前后的插件
struct Stages {
    pre: Vec<Box<dyn Plugin>>,
    post: Vec<Box<dyn Plugin>>,
}

fn apply(plugins: &mut [Box<dyn Plugin>], frame: StreamFrame) -> TcResult<StreamFrame> {
    plugins.iter_mut().try_fold(frame, |f, p| p.process(f))
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    frames_in: u64,
    frames_out: u64,
    bytes_out: u64,
    /// 最后读入的帧序号
    last_in: Option<u64>,
    /// 最后完成的帧序号
    last_done: Option<u64>,
}

struct Run<'a> {
    stages: Stages,
    frames: mpsc::Receiver<FrameMessage>,
    sink: &'a mut Box<dyn FrameSink>,
    cancel: CancellationToken,
    progress: Progress,
}

impl Run<'_> {
    fn fail(&self, err: TcError) -> TcError {
        err.into_job_failure(self.progress.last_done)
    }

    fn cancelled(&self) -> TcError {
        log::warn!("任务被取消");
        TcError::Cancelled {
            last_successful: self.progress.last_done,
        }
    }

    /// 接收并检查下一帧
    fn accept(&mut self, message: FrameMessage) -> TcResult<StreamFrame> {
        let frame = message.map_err(|e| self.fail(e))?;
        if let Some(prev) = self.progress.last_in {
            if frame.sequence <= prev {
                return Err(TcError::pipeline(
                    self.progress.last_done,
                    format!("帧序号未严格递增: {} 之后为 {}", prev, frame.sequence),
                ));
            }
        }
        self.progress.frames_in += 1;
        self.progress.last_in = Some(frame.sequence);
        Ok(frame)
    }

    async fn write(&mut self, frame: StreamFrame) -> TcResult<()> {
        let size = frame.size() as u64;
        self.sink
            .write_frame(frame)
            .await
            .map_err(|e| e.into_job_failure(self.progress.last_done))?;
        self.progress.frames_out += 1;
        self.progress.bytes_out += size;
        Ok(())
    }

    /// 全部在进程内处理
    async fn drive(&mut self) -> TcResult<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                m = self.frames.recv() => m,
            };
            let Some(message) = message else {
                return Ok(());
            };
            let frame = self.accept(message)?;
            let sequence = frame.sequence;
            let out = apply(&mut self.stages.pre, frame).map_err(|e| self.fail(e))?;
            self.write(out).await?;
            self.progress.last_done = Some(sequence);
        }
    }

    /// 经由外部工具处理
    async fn drive_with_tool(
        &mut self,
        adapter: &ExternalToolAdapter,
        invocation: &ExternalInvocation,
    ) -> TcResult<()> {
        let mut session = adapter.spawn(invocation).map_err(|e| self.fail(e))?;
        match self.pump(&mut session).await {
            Ok(input_complete) => {
                let bytes_out = session.bytes_out();
                session.finish().await.map_err(|e| self.fail(e))?;
                log::debug!("{}: 共输出 {} 字节", invocation.tool, bytes_out);
                if !input_complete {
                    return Err(self.fail(TcError::external_tool(
                        &invocation.tool,
                        ToolFailure::Io("工具在输入结束前关闭了管道".into()),
                    )));
                }
                Ok(())
            }
            Err(e) => {
                session.kill().await;
                Err(e)
            }
        }
    }

    /// 在输入帧与工具输出之间循环, 返回输入是否已全部送入工具
    async fn pump(&mut self, session: &mut ToolSession) -> TcResult<bool> {
        let mut input = session.take_input();
        let mut pending: Option<(u64, Bytes)> = None;
        let mut input_done = false;
        let mut output_seq = 0u64;

        loop {
            if input_done && pending.is_none() {
                // 释放发送端, 工具收到输入结束
                input = None;
            }
            let can_read = pending.is_none() && !input_done;
            let can_write = pending.is_some() && input.is_some();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                permit = reserve(&input), if can_write => {
                    let Some(permit) = permit else {
                        // 写入任务已退出, 排空输出后由 finish 报告原因
                        self.drain(session).await?;
                        return Ok(false);
                    };
                    if let Some((sequence, data)) = pending.take() {
                        permit.send(data);
                        self.progress.last_done = Some(sequence);
                    }
                }
                message = self.frames.recv(), if can_read => {
                    match message {
                        Some(message) => {
                            let frame = self.accept(message)?;
                            let sequence = frame.sequence;
                            let out = apply(&mut self.stages.pre, frame).map_err(|e| self.fail(e))?;
                            if out.is_empty() {
                                self.progress.last_done = Some(sequence);
                            } else {
                                pending = Some((sequence, out.data));
                            }
                        }
                        None => input_done = true,
                    }
                }
                chunk = session.recv() => {
                    match chunk {
                        Some(Ok(data)) => {
                            output_seq += 1;
                            let frame = StreamFrame::new(output_seq, data);
                            let out = apply(&mut self.stages.post, frame)
                                .map_err(|e| self.fail(e))?;
                            self.write(out).await?;
                        }
                        Some(Err(e)) => return Err(self.fail(e)),
                        None => return Ok(input_done && pending.is_none()),
                    }
                }
            }
        }
    }

    /// 丢弃工具剩余的输出直到其关闭标准输出
    async fn drain(&mut self, session: &mut ToolSession) -> TcResult<()> {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                chunk = session.recv() => chunk,
            };
            match chunk {
                Some(Ok(data)) => {
                    log::debug!("{}: 输入已关闭, 丢弃 {} 字节输出", session.tool(), data.len());
                }
                Some(Err(e)) => return Err(self.fail(e)),
                None => return Ok(()),
            }
        }
    }

    fn finish_stages(&mut self) -> TcResult<()> {
        let last_done = self.progress.last_done;
        for plugin in self
            .stages
            .pre
            .iter_mut()
            .chain(self.stages.post.iter_mut())
        {
            plugin
                .finish()
                .map_err(|e| e.into_job_failure(last_done))?;
        }
        Ok(())
    }
}

async fn reserve(input: &Option<mpsc::Sender<Bytes>>) -> Option<mpsc::Permit<'_, Bytes>> {
    match input {
        Some(tx) => tx.reserve().await.ok(),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemorySource};
    use tcode_core::MediaType;
    use tcode_module::{PluginDescriptor, PluginKind};

    /// 在指定帧失败的测试编码器
    struct FailAt {
        descriptor: PluginDescriptor,
        fail_at: u64,
    }

    fn fail_at_descriptor() -> TcResult<PluginDescriptor> {
        PluginDescriptor::builder("failing", PluginKind::Encoder, MediaType::Video)
            .format("RAW")
            .option("fail_at")
            .build()
    }

    fn create_fail_at() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(FailAt {
            descriptor: fail_at_descriptor()?,
            fail_at: u64::MAX,
        }))
    }

    impl Plugin for FailAt {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        fn configure(&mut self, options: &tcode_core::JobOptions) -> TcResult<()> {
            if let Some(n) = options.get_u64("fail_at")? {
                self.fail_at = n;
            }
            Ok(())
        }

        fn encode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
            if frame.sequence == self.fail_at {
                return Err(TcError::InvalidData(format!("帧 {} 损坏", frame.sequence)));
            }
            Ok(frame)
        }
    }

    fn registry() -> PluginRegistry {
        let mut reg = PluginRegistry::new();
        tcode_module::register_all(&mut reg).unwrap();
        reg.register(fail_at_descriptor().unwrap(), create_fail_at)
            .unwrap();
        reg
    }

    fn payloads(n: u64) -> MemorySource {
        MemorySource::from_payloads((1..=n).map(|i| vec![i as u8; 16]))
    }

    fn job(encoder: &str, out: &str, options: &[&str]) -> Job {
        let reg = registry();
        let desc = reg.resolve_encoder(encoder).unwrap().clone();
        Job::new("in.raw", out, desc)
            .with_options(tcode_core::JobOptions::from_pairs(options.iter().copied()).unwrap())
    }

    async fn run_job(job: Job, source: MemorySource, sink: &MemorySink) -> TcResult<Summary> {
        let tools = ToolLocator::new(Vec::new());
        Pipeline::new(job, &registry(), tools)
            .unwrap()
            .run(
                Box::new(source),
                Box::new(sink.handle()),
                CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_透传保持顺序与帧数() {
        let sink = MemorySink::new();
        let summary = run_job(job("raw", "out.raw", &[]), payloads(100), &sink)
            .await
            .unwrap();
        assert_eq!(summary.frames_in, 100);
        assert_eq!(summary.frames_out, 100);
        assert_eq!(summary.bytes_in, 1600);
        assert_eq!(summary.bytes_out, 1600);
        assert_eq!(summary.last_sequence, Some(100));
        assert_eq!(sink.sequences(), (1..=100).collect::<Vec<_>>());
        assert!(sink.state().committed);
    }

    #[tokio::test]
    async fn test_第50帧失败报告最后完成帧49() {
        let sink = MemorySink::new();
        let err = run_job(job("failing", "out.raw", &["fail_at=50"]), payloads(100), &sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TcError::Pipeline {
                last_successful: Some(49),
                ..
            }
        ));
        assert_eq!(sink.sequences(), (1..=49).collect::<Vec<_>>());
        assert!(sink.state().aborted);
        assert!(!sink.state().committed);
    }

    #[tokio::test]
    async fn test_首帧失败没有完成帧() {
        let sink = MemorySink::new();
        let err = run_job(job("failing", "out.raw", &["fail_at=1"]), payloads(3), &sink)
            .await
            .unwrap_err();
        assert_eq!(err.last_successful(), None);
        assert!(sink.sequences().is_empty());
    }

    #[tokio::test]
    async fn test_校验失败不读取输入() {
        let sink = MemorySink::new();
        let reg = registry();
        let divx = reg.resolve_encoder("divx4").unwrap().clone();
        let job = Job::new("in.raw", "out.avi", divx).with_options(
            tcode_core::JobOptions::from_pairs(["format=XVID"]).unwrap(),
        );
        let err = run_job(job, payloads(10), &sink).await.unwrap_err();
        assert!(matches!(err, TcError::Validation(_)));
        assert_eq!(err.exit_code(), tcode_core::error::EXIT_VALIDATION);
        assert!(sink.sequences().is_empty());
        assert!(!sink.state().aborted);
    }

    #[tokio::test]
    async fn test_帧序号必须严格递增() {
        let sink = MemorySink::new();
        let source = MemorySource::new(vec![
            StreamFrame::new(1, &b"a"[..]),
            StreamFrame::new(2, &b"b"[..]),
            StreamFrame::new(2, &b"c"[..]),
        ]);
        let err = run_job(job("raw", "out.raw", &[]), source, &sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TcError::Pipeline {
                last_successful: Some(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_取消后报告已取消() {
        let sink = MemorySink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Pipeline::new(job("raw", "out.raw", &[]), &registry(), ToolLocator::default())
            .unwrap()
            .run(Box::new(payloads(10)), Box::new(sink.handle()), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TcError::Cancelled { .. }));
        assert!(sink.state().aborted);
    }

    #[cfg(unix)]
    mod external {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        /// 在临时目录中生成一个名为 oggenc 的脚本
        fn fake_oggenc(dir: &Path, body: &str) -> ToolLocator {
            let path = dir.join("oggenc");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            ToolLocator::from_env().with_override("oggenc", path)
        }

        /// 每帧之间停顿的读取端
        struct SlowSource {
            next: u64,
            total: u64,
        }

        #[async_trait::async_trait]
        impl FrameSource for SlowSource {
            async fn next_frame(&mut self) -> TcResult<Option<StreamFrame>> {
                if self.next > self.total {
                    return Ok(None);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                let frame = StreamFrame::new(self.next, vec![0u8; 16]);
                self.next += 1;
                Ok(Some(frame))
            }

            fn bytes_read(&self) -> u64 {
                (self.next - 1) * 16
            }
        }

        async fn run_ogg_with(
            tools: ToolLocator,
            source: Box<dyn FrameSource>,
            timeout_ms: u64,
            cancel: CancellationToken,
        ) -> (TcResult<Summary>, MemorySink) {
            let sink = MemorySink::new();
            let reg = registry();
            let desc = reg.resolve_encoder("ogg").unwrap().clone();
            let options =
                tcode_core::JobOptions::from_pairs([format!("tool_timeout_ms={timeout_ms}")])
                    .unwrap();
            let job = Job::new("in.wav", "out.ogg", desc).with_options(options);
            let result = Pipeline::new(job, &reg, tools)
                .unwrap()
                .run(source, Box::new(sink.handle()), cancel)
                .await;
            (result, sink)
        }

        async fn run_ogg(
            tools: ToolLocator,
            frames: u64,
            timeout_ms: u64,
        ) -> (TcResult<Summary>, MemorySink) {
            let source = Box::new(payloads(frames));
            run_ogg_with(tools, source, timeout_ms, CancellationToken::new()).await
        }

        #[tokio::test]
        async fn test_外部工具输出写入写入端() {
            let dir = tempfile::tempdir().unwrap();
            let tools = fake_oggenc(dir.path(), "exec cat");
            let (result, sink) = run_ogg(tools, 100, 5000).await;
            let summary = result.unwrap();
            assert_eq!(summary.frames_in, 100);
            assert_eq!(summary.bytes_out, 1600);
            let expected: Vec<u8> = (1..=100u8).flat_map(|i| vec![i; 16]).collect();
            assert_eq!(sink.contents(), expected);
            assert!(sink.state().committed);
        }

        #[tokio::test]
        async fn test_外部工具非零退出() {
            let dir = tempfile::tempdir().unwrap();
            let tools = fake_oggenc(dir.path(), "exit 3");
            let (result, sink) = run_ogg(tools, 10, 5000).await;
            let err = result.unwrap_err();
            assert!(matches!(
                err,
                TcError::ExternalTool {
                    failure: ToolFailure::ExitStatus(Some(3)),
                    ..
                }
            ));
            assert_eq!(err.exit_code(), tcode_core::error::EXIT_EXTERNAL_TOOL);
            assert!(sink.state().aborted);
        }

        #[tokio::test]
        async fn test_外部工具超时() {
            let dir = tempfile::tempdir().unwrap();
            let tools = fake_oggenc(dir.path(), "exec sleep 5");
            let (result, _sink) = run_ogg(tools, 3, 200).await;
            assert!(matches!(
                result.unwrap_err(),
                TcError::ExternalTool {
                    failure: ToolFailure::Timeout(_),
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn test_外部工具提前关闭输入立即失败() {
            let dir = tempfile::tempdir().unwrap();
            // 关闭标准输入后持续输出, 输出量超过管道缓冲区
            let tools = fake_oggenc(dir.path(), "exec 0<&-\nhead -c 1048576 /dev/zero");
            let source = MemorySource::from_payloads((0..64).map(|_| vec![7u8; 4096]));
            let started = Instant::now();
            let (result, sink) =
                run_ogg_with(tools, Box::new(source), 10_000, CancellationToken::new()).await;
            let err = result.unwrap_err();
            assert!(
                matches!(
                    err,
                    TcError::ExternalTool {
                        failure: ToolFailure::Io(_),
                        ..
                    }
                ),
                "{err:?}"
            );
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(sink.state().aborted);
        }

        #[tokio::test]
        async fn test_取消时终止外部工具进程() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("oggenc.pid");
            let body = format!("echo $$ > '{}'\nexec cat", pid_file.display());
            let tools = fake_oggenc(dir.path(), &body);
            let cancel = CancellationToken::new();
            let source = Box::new(SlowSource {
                next: 1,
                total: 1000,
            });
            let task = tokio::spawn(run_ogg_with(tools, source, 5000, cancel.clone()));

            for _ in 0..100 {
                if pid_file.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();

            let (result, sink) = task.await.unwrap();
            let err = result.unwrap_err();
            assert!(
                matches!(
                    err,
                    TcError::Cancelled {
                        last_successful: Some(_)
                    }
                ),
                "{err:?}"
            );
            assert!(sink.state().aborted);

            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let alive = std::process::Command::new("kill")
                .args(["-0", pid.trim()])
                .stderr(std::process::Stdio::null())
                .status()
                .unwrap()
                .success();
            assert!(!alive, "外部工具进程 {} 仍在运行", pid.trim());
        }

        #[tokio::test]
        async fn test_外部工具缺失在校验阶段发现() {
            let tools = ToolLocator::new(Vec::new());
            let (result, sink) = run_ogg(tools, 3, 1000).await;
            assert!(matches!(
                result.unwrap_err(),
                TcError::Validation(tcode_core::ValidationError::MissingTool { .. })
            ));
            assert!(sink.sequences().is_empty());
        }
    }
}
