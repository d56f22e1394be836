//! Ogg Vorbis 音频插件.
//!
//! 编解码本身交给外部工具 (`oggenc` / `oggdec`), 插件只负责参数校验和
//! 构造命令行. 管线把插件输出经由标准输入送给工具, 再从标准输出收集结果.

use tcode_core::{JobOptions, MediaType, StreamFrame, TcError, TcResult};

use crate::descriptor::{ExternalInvocation, PluginDescriptor, PluginKind};
use crate::plugin::Plugin;

const VERSION: &str = "0.6.0";

pub const OPT_RATE: &str = "rate";
pub const OPT_CHANNELS: &str = "channels";
pub const OPT_BITS: &str = "bits";
pub const OPT_QUALITY: &str = "quality";

const DEFAULT_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u32 = 2;
const DEFAULT_BITS: u32 = 16;

pub fn encoder_descriptor() -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("ogg", PluginKind::Encoder, MediaType::Audio)
        .version(VERSION)
        .description("Ogg Vorbis 音频编码前端")
        .format("OGG")
        .requires_tool("oggenc")
        .option(OPT_RATE)
        .option(OPT_CHANNELS)
        .option(OPT_BITS)
        .option(OPT_QUALITY)
        .limitation("原始音频以 --raw-audio 导出到单独文件")
        .limitation("需要 oggenc")
        .limitation("合成音视频 Ogg 流需另行使用 oggmerge (ogmtools)")
        .build()
}

pub fn decoder_descriptor() -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("ogg", PluginKind::Decoder, MediaType::Audio)
        .version(VERSION)
        .description("Ogg Vorbis 音频解码前端")
        .format("OGG")
        .requires_tool("oggdec")
        .limitation("需要 oggdec")
        .build()
}

/// PCM 输入参数
#[derive(Debug, Clone, Copy, PartialEq)]
struct PcmParams {
    rate: u32,
    channels: u32,
    bits: u32,
    /// Vorbis 质量 (-1 ~ 10), 未指定时使用 oggenc 默认值
    quality: Option<f32>,
}

impl Default for PcmParams {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            channels: DEFAULT_CHANNELS,
            bits: DEFAULT_BITS,
            quality: None,
        }
    }
}

impl PcmParams {
    fn from_options(options: &JobOptions) -> TcResult<Self> {
        let mut params = Self::default();
        if let Some(rate) = options.get_u32(OPT_RATE)? {
            if !(1_000..=192_000).contains(&rate) {
                return Err(TcError::Configuration(format!("不支持的采样率: {rate}")));
            }
            params.rate = rate;
        }
        if let Some(channels) = options.get_u32(OPT_CHANNELS)? {
            if !(1..=8).contains(&channels) {
                return Err(TcError::Configuration(format!("不支持的声道数: {channels}")));
            }
            params.channels = channels;
        }
        if let Some(bits) = options.get_u32(OPT_BITS)? {
            if bits != 8 && bits != 16 {
                return Err(TcError::Configuration(format!("不支持的采样位数: {bits}")));
            }
            params.bits = bits;
        }
        if let Some(raw) = options.get(OPT_QUALITY) {
            let quality: f32 = raw.parse().map_err(|_| {
                TcError::Configuration(format!("选项 {OPT_QUALITY} 不是数字: {raw}"))
            })?;
            if !(-1.0..=10.0).contains(&quality) {
                return Err(TcError::Configuration(format!(
                    "Vorbis 质量超出范围 [-1, 10]: {quality}"
                )));
            }
            params.quality = Some(quality);
        }
        Ok(params)
    }

    fn oggenc_args(&self) -> Vec<String> {
        let mut args = vec![
            "-Q".to_string(),
            "-r".to_string(),
            "-R".to_string(),
            self.rate.to_string(),
            "-C".to_string(),
            self.channels.to_string(),
            "-B".to_string(),
            self.bits.to_string(),
        ];
        if let Some(q) = self.quality {
            args.push("-q".to_string());
            args.push(q.to_string());
        }
        args.extend(["-o", "-", "-"].map(String::from));
        args
    }

    /// 单个采样帧的字节数
    fn block_align(&self) -> usize {
        (self.channels * self.bits / 8) as usize
    }
}

/// Ogg Vorbis 编码器
///
/// 帧内数据为交错 PCM, 原样送入 oggenc.
pub struct OggEncoder {
    descriptor: PluginDescriptor,
    params: PcmParams,
    samples: u64,
}

impl OggEncoder {
    pub fn create() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            descriptor: encoder_descriptor()?,
            params: PcmParams::default(),
            samples: 0,
        }))
    }
}

impl Plugin for OggEncoder {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn configure(&mut self, options: &JobOptions) -> TcResult<()> {
        self.params = PcmParams::from_options(options)?;
        log::debug!(
            "ogg: {} Hz, {} 声道, {} 位",
            self.params.rate,
            self.params.channels,
            self.params.bits
        );
        Ok(())
    }

    fn encode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        self.samples += (frame.size() / self.params.block_align()) as u64;
        Ok(frame)
    }

    fn external_invocation(&self) -> Option<ExternalInvocation> {
        Some(ExternalInvocation::new("oggenc", self.params.oggenc_args()))
    }

    fn finish(&mut self) -> TcResult<()> {
        log::info!(
            "ogg: 送入 oggenc {} 个采样 ({:.2} 秒)",
            self.samples,
            self.samples as f64 / f64::from(self.params.rate)
        );
        Ok(())
    }
}

/// Ogg Vorbis 解码器
///
/// Ogg 码流原样送入 oggdec, 从标准输出取回 PCM.
pub struct OggDecoder {
    descriptor: PluginDescriptor,
}

impl OggDecoder {
    pub fn create() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            descriptor: decoder_descriptor()?,
        }))
    }
}

impl Plugin for OggDecoder {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn decode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        Ok(frame)
    }

    fn external_invocation(&self) -> Option<ExternalInvocation> {
        Some(ExternalInvocation::new("oggdec", ["-Q", "-o", "-", "-"]))
    }
}
