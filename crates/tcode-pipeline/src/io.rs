//! 帧读取端与写入端.
//!
//! 文件类读写端均在第一次读写时才打开文件, 因此校验失败的任务不会触碰
//! 输入文件, 也不会创建输出文件.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tcode_core::{MediaType, StreamFrame, TcError, TcResult};
use tcode_module::Job;
use tcode_module::chunk::{AUDIO_CHUNK_TAG, CHUNK_HEADER_SIZE, ChunkHeader, VIDEO_CHUNK_TAG};
use tcode_module::descriptor::Framing;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

/// 单个分块允许的最大负载 (64 MB)
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

/// 帧读取端
#[async_trait]
pub trait FrameSource: Send {
    /// 读取下一帧, 输入结束时返回 `None`
    async fn next_frame(&mut self) -> TcResult<Option<StreamFrame>>;

    /// 已读取的输入字节数
    fn bytes_read(&self) -> u64;
}

/// 帧写入端
#[async_trait]
pub trait FrameSink: Send {
    /// 写入一帧
    async fn write_frame(&mut self, frame: StreamFrame) -> TcResult<()>;

    /// 所有帧写入完毕, 使输出生效
    async fn commit(&mut self) -> TcResult<()>;

    /// 任务失败, 清理未完成的输出
    async fn abort(&mut self) -> TcResult<()>;
}

/// 按固定大小切分的原始文件读取端
pub struct ChunkedFileSource {
    path: PathBuf,
    frame_size: usize,
    reader: Option<BufReader<File>>,
    next_sequence: u64,
    bytes_read: u64,
}

impl ChunkedFileSource {
    pub fn new(path: impl Into<PathBuf>, frame_size: usize) -> Self {
        Self {
            path: path.into(),
            frame_size: frame_size.max(1),
            reader: None,
            next_sequence: 1,
            bytes_read: 0,
        }
    }
}

#[async_trait]
impl FrameSource for ChunkedFileSource {
    async fn next_frame(&mut self) -> TcResult<Option<StreamFrame>> {
        if self.reader.is_none() {
            let file = File::open(&self.path).await?;
            log::debug!("打开输入: {}", self.path.display());
            self.reader = Some(BufReader::new(file));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut buf = Vec::with_capacity(self.frame_size);
        reader
            .take(self.frame_size as u64)
            .read_to_end(&mut buf)
            .await?;
        if buf.is_empty() {
            return Ok(None);
        }

        self.bytes_read += buf.len() as u64;
        let frame = StreamFrame::new(self.next_sequence, buf);
        self.next_sequence += 1;
        Ok(Some(frame))
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

/// RIFF 分块读取端
///
/// 每个标签匹配的分块 (含头部和补齐字节) 产生一帧. 进入 `RIFF` / `LIST`
/// 容器内部继续查找, 其它标签的分块被跳过.
pub struct RiffChunkSource {
    path: PathBuf,
    tag: [u8; 4],
    reader: Option<BufReader<File>>,
    next_sequence: u64,
    bytes_read: u64,
}

impl RiffChunkSource {
    pub fn new(path: impl Into<PathBuf>, tag: [u8; 4]) -> Self {
        Self {
            path: path.into(),
            tag,
            reader: None,
            next_sequence: 1,
            bytes_read: 0,
        }
    }

    /// 读取分块头, 在分块边界处遇到文件结束时返回 `None`
    async fn read_header(&mut self) -> TcResult<Option<ChunkHeader>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut raw = [0u8; CHUNK_HEADER_SIZE];
        let mut filled = 0;
        while filled < raw.len() {
            let n = reader.read(&mut raw[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.bytes_read += filled as u64;
        match filled {
            0 => Ok(None),
            CHUNK_HEADER_SIZE => Ok(Some(ChunkHeader::parse(&raw)?)),
            n => Err(TcError::InvalidData(format!(
                "输入在分块头中途结束 ({n} 字节)"
            ))),
        }
    }
}

#[async_trait]
impl FrameSource for RiffChunkSource {
    async fn next_frame(&mut self) -> TcResult<Option<StreamFrame>> {
        if self.reader.is_none() {
            let file = File::open(&self.path).await?;
            log::debug!("打开分块输入: {}", self.path.display());
            self.reader = Some(BufReader::new(file));
        }

        loop {
            let Some(header) = self.read_header().await? else {
                return Ok(None);
            };
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            if &header.tag == b"RIFF" || &header.tag == b"LIST" {
                let mut form = [0u8; 4];
                reader.read_exact(&mut form).await.map_err(truncated)?;
                self.bytes_read += 4;
                log::trace!(
                    "进入容器 {} ({})",
                    header.tag_str(),
                    String::from_utf8_lossy(&form)
                );
                continue;
            }

            if header.size > MAX_CHUNK_SIZE {
                return Err(TcError::InvalidData(format!(
                    "分块 {} 过大: {} 字节",
                    header.tag_str(),
                    header.size
                )));
            }

            let body_len = header.size as usize + header.padding();
            let mut body = vec![0u8; body_len];
            reader.read_exact(&mut body).await.map_err(truncated)?;
            self.bytes_read += body_len as u64;

            if header.tag != self.tag {
                log::trace!("跳过分块 {} ({} 字节)", header.tag_str(), header.size);
                continue;
            }

            let mut data = BytesMut::with_capacity(CHUNK_HEADER_SIZE + body_len);
            data.extend_from_slice(&header.to_bytes());
            data.extend_from_slice(&body);
            let frame = StreamFrame::new(self.next_sequence, data.freeze());
            self.next_sequence += 1;
            return Ok(Some(frame));
        }
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

fn truncated(err: std::io::Error) -> TcError {
    if err.kind() == ErrorKind::UnexpectedEof {
        TcError::InvalidData("输入在分块中途结束".into())
    } else {
        TcError::Io(err)
    }
}

/// 内存读取端
pub struct MemorySource {
    frames: VecDeque<StreamFrame>,
    bytes_read: u64,
}

impl MemorySource {
    /// 使用给定帧创建 (序号原样保留)
    pub fn new(frames: Vec<StreamFrame>) -> Self {
        Self {
            frames: frames.into(),
            bytes_read: 0,
        }
    }

    /// 依次为每段数据分配从 1 开始的序号
    pub fn from_payloads<I, B>(payloads: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let frames = payloads
            .into_iter()
            .zip(1u64..)
            .map(|(data, seq)| StreamFrame::new(seq, data))
            .collect();
        Self::new(frames)
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> TcResult<Option<StreamFrame>> {
        let frame = self.frames.pop_front();
        if let Some(f) = &frame {
            self.bytes_read += f.size() as u64;
        }
        Ok(frame)
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

/// 文件写入端
///
/// 数据先写入 `<输出>.part`, 提交时重命名为最终文件名.
pub struct FileSink {
    path: PathBuf,
    part_path: PathBuf,
    keep_partial: bool,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, keep_partial: bool) -> Self {
        let path = path.into();
        let part_path = part_path(&path);
        Self {
            path,
            part_path,
            keep_partial,
            writer: None,
            bytes_written: 0,
        }
    }

    /// 未完成输出的临时路径
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    async fn writer(&mut self) -> TcResult<&mut BufWriter<File>> {
        if self.writer.is_none() {
            let file = File::create(&self.part_path).await?;
            log::debug!("创建输出: {}", self.part_path.display());
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| TcError::InvalidData("输出文件未打开".into()))
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl FrameSink for FileSink {
    async fn write_frame(&mut self, frame: StreamFrame) -> TcResult<()> {
        let writer = self.writer().await?;
        writer.write_all(&frame.data).await?;
        self.bytes_written += frame.size() as u64;
        Ok(())
    }

    async fn commit(&mut self) -> TcResult<()> {
        let mut writer = match self.writer.take() {
            Some(w) => w,
            None => BufWriter::new(File::create(&self.part_path).await?),
        };
        writer.flush().await?;
        writer.get_mut().sync_all().await?;
        drop(writer);
        fs::rename(&self.part_path, &self.path).await?;
        log::info!(
            "输出完成: {} ({} 字节)",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }

    async fn abort(&mut self) -> TcResult<()> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                log::warn!("刷新未完成输出失败: {e}");
            }
        }
        if self.keep_partial {
            if fs::try_exists(&self.part_path).await.unwrap_or(false) {
                log::warn!(
                    "保留未完成输出: {} ({} 字节)",
                    self.part_path.display(),
                    self.bytes_written
                );
            }
            return Ok(());
        }
        match fs::remove_file(&self.part_path).await {
            Ok(()) => {
                log::info!("已删除未完成输出: {}", self.part_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存写入端的共享状态
#[derive(Debug, Default)]
pub struct MemorySinkState {
    /// 已写入的帧
    pub frames: Vec<StreamFrame>,
    /// 是否已提交
    pub committed: bool,
    /// 是否已中止
    pub aborted: bool,
}

/// 内存写入端
///
/// 中止时保留已写入的帧, 通过 `handle()` 在管线结束后检查.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取共享状态的句柄
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// 锁定并读取状态
    pub fn state(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 已写入帧的序号
    pub fn sequences(&self) -> Vec<u64> {
        self.state().frames.iter().map(|f| f.sequence).collect()
    }

    /// 已写入数据的拼接
    pub fn contents(&self) -> Vec<u8> {
        self.state()
            .frames
            .iter()
            .flat_map(|f| f.data.iter().copied())
            .collect()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, frame: StreamFrame) -> TcResult<()> {
        self.state().frames.push(frame);
        Ok(())
    }

    async fn commit(&mut self) -> TcResult<()> {
        self.state().committed = true;
        Ok(())
    }

    async fn abort(&mut self) -> TcResult<()> {
        self.state().aborted = true;
        Ok(())
    }
}

/// 按任务的首个插件选择读取端
///
/// 首个插件使用分块输入时按 RIFF 分块读取, 否则按 `frame_size` 切分.
pub fn open_source(job: &Job) -> TcResult<Box<dyn FrameSource>> {
    let first = job
        .plugin_chain()
        .next()
        .unwrap_or(&job.selected_plugin);
    match first.framing() {
        Framing::Chunked => {
            let tag = match first.media_type() {
                MediaType::Video => VIDEO_CHUNK_TAG,
                MediaType::Audio => AUDIO_CHUNK_TAG,
            };
            Ok(Box::new(RiffChunkSource::new(&job.input_path, tag)))
        }
        Framing::Raw => Ok(Box::new(ChunkedFileSource::new(
            &job.input_path,
            job.frame_size()?,
        ))),
    }
}

/// 为任务创建文件写入端
pub fn open_sink(job: &Job) -> TcResult<Box<dyn FrameSink>> {
    Ok(Box::new(FileSink::new(
        job.effective_output_path(),
        job.keep_partial()?,
    )))
}
