//! DivX 4 视频插件.
//!
//! 码流本身由外部 DivX 编解码库产生, 这里只负责容器层:
//! - `divx4` 编码器把每帧包装为 AVI `00dc` 分块
//! - `divx4raw` 编码器输出裸码流 (不封装)
//! - `divx4` 解码器从分块中取出码流

use tcode_core::options::OPT_RAW;
use tcode_core::{JobOptions, MediaType, StreamFrame, TcError, TcResult};

use crate::chunk::{CHUNK_HEADER_SIZE, VIDEO_CHUNK_TAG, unwrap_chunk, wrap_chunk};
use crate::descriptor::{Framing, PluginDescriptor, PluginFlags, PluginKind};
use crate::plugin::Plugin;

const VERSION: &str = "0.5.0";

/// 单帧上限选项
pub const OPT_MAX_FRAME_SIZE: &str = "max_frame_size";

const PAL_CROP_NOTE: &str = "PAL (720x576) 视频使用 -r 缩小时结果不正确, 需先裁剪: \
                             -r2 或 -r4 配合 -j 0,8, -r8 配合 -j 32,40";

pub fn encoder_descriptor() -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("divx4", PluginKind::Encoder, MediaType::Video)
        .version(VERSION)
        .description("DivX 4.xx 视频编码前端 (AVI 封装)")
        .format("AVI")
        .format("DIVX")
        .option(OPT_MAX_FRAME_SIZE)
        .limitation(PAL_CROP_NOTE)
        .limitation("音频以原始格式导出到单独文件 (--raw-audio)")
        .build()
}

pub fn raw_encoder_descriptor() -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("divx4raw", PluginKind::Encoder, MediaType::Video)
        .version(VERSION)
        .description("DivX 4.xx 视频编码前端 (裸码流)")
        .format("DIVX")
        .option(OPT_MAX_FRAME_SIZE)
        .flags(PluginFlags::RAW_BITSTREAM)
        .limitation(PAL_CROP_NOTE)
        .limitation("裸码流输出要求音频导出到单独文件 (--raw-audio)")
        .build()
}

pub fn decoder_descriptor() -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("divx4", PluginKind::Decoder, MediaType::Video)
        .version(VERSION)
        .description("DivX 4.xx 视频解码前端 (AVI 分块)")
        .format("AVI")
        .format("DIVX")
        .framing(Framing::Chunked)
        .build()
}

/// DivX 4 编码器
pub struct Divx4Encoder {
    descriptor: PluginDescriptor,
    /// 输出裸码流
    raw: bool,
    /// 单帧最大字节数
    max_frame_size: usize,
    frames: u64,
    bytes: u64,
}

impl Divx4Encoder {
    fn with_descriptor(descriptor: PluginDescriptor) -> Self {
        let raw = descriptor.is_raw_bitstream();
        Self {
            descriptor,
            raw,
            max_frame_size: u32::MAX as usize - CHUNK_HEADER_SIZE,
            frames: 0,
            bytes: 0,
        }
    }

    pub fn create() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self::with_descriptor(encoder_descriptor()?)))
    }

    pub fn create_raw() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self::with_descriptor(raw_encoder_descriptor()?)))
    }
}

impl Plugin for Divx4Encoder {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn configure(&mut self, options: &JobOptions) -> TcResult<()> {
        if options.flag(OPT_RAW)? {
            self.raw = true;
        }
        if let Some(max) = options.get_u32(OPT_MAX_FRAME_SIZE)? {
            if max == 0 {
                return Err(TcError::Configuration(format!(
                    "{OPT_MAX_FRAME_SIZE} 不能为 0"
                )));
            }
            self.max_frame_size = max as usize;
        }
        log::debug!(
            "{}: raw={}, max_frame_size={}",
            self.descriptor.name(),
            self.raw,
            self.max_frame_size
        );
        Ok(())
    }

    fn encode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        if frame.size() > self.max_frame_size {
            return Err(TcError::InvalidData(format!(
                "帧 {} 大小 {} 字节, 超过上限 {} 字节",
                frame.sequence,
                frame.size(),
                self.max_frame_size
            )));
        }
        self.frames += 1;
        self.bytes += frame.size() as u64;
        if self.raw {
            return Ok(frame);
        }
        let chunk = wrap_chunk(VIDEO_CHUNK_TAG, &frame.data)?;
        Ok(frame.with_data(chunk))
    }

    fn finish(&mut self) -> TcResult<()> {
        log::info!(
            "{}: 编码 {} 帧, 码流 {} 字节",
            self.descriptor.name(),
            self.frames,
            self.bytes
        );
        Ok(())
    }
}

/// DivX 4 解码器
pub struct Divx4Decoder {
    descriptor: PluginDescriptor,
}

impl Divx4Decoder {
    pub fn create() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            descriptor: decoder_descriptor()?,
        }))
    }
}

impl Plugin for Divx4Decoder {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn decode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        let payload = unwrap_chunk(&frame.data, VIDEO_CHUNK_TAG)?;
        Ok(frame.with_data(payload))
    }
}
