//! RAW 视频 / PCM 音频透传插件.
//!
//! 不做任何转换, 帧数据原样输出. 导入与导出两侧共用同一实现.

use tcode_core::{MediaType, StreamFrame, TcResult};

use crate::descriptor::{PluginDescriptor, PluginKind};
use crate::plugin::Plugin;

const VERSION: &str = "0.2.0";

/// 透传插件
pub struct Passthrough {
    descriptor: PluginDescriptor,
    /// 已处理帧数
    frames: u64,
}

impl Passthrough {
    fn boxed(descriptor: PluginDescriptor) -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            descriptor,
            frames: 0,
        }))
    }

    fn forward(&mut self, frame: StreamFrame) -> StreamFrame {
        self.frames += 1;
        frame
    }
}

impl Plugin for Passthrough {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn encode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        Ok(self.forward(frame))
    }

    fn decode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        Ok(self.forward(frame))
    }

    fn finish(&mut self) -> TcResult<()> {
        log::debug!("{}: 透传 {} 帧", self.descriptor.name(), self.frames);
        Ok(())
    }
}

fn raw_descriptor(kind: PluginKind) -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("raw", kind, MediaType::Video)
        .version(VERSION)
        .description("RAW 视频透传")
        .format("RAW")
        .build()
}

fn pcm_descriptor(kind: PluginKind) -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("pcm", kind, MediaType::Audio)
        .version(VERSION)
        .description("PCM 音频透传")
        .format("RAW")
        .format("WAV")
        .build()
}

pub fn raw_decoder_descriptor() -> TcResult<PluginDescriptor> {
    raw_descriptor(PluginKind::Decoder)
}

pub fn raw_encoder_descriptor() -> TcResult<PluginDescriptor> {
    raw_descriptor(PluginKind::Encoder)
}

pub fn pcm_decoder_descriptor() -> TcResult<PluginDescriptor> {
    pcm_descriptor(PluginKind::Decoder)
}

pub fn pcm_encoder_descriptor() -> TcResult<PluginDescriptor> {
    pcm_descriptor(PluginKind::Encoder)
}

pub fn create_raw_decoder() -> TcResult<Box<dyn Plugin>> {
    Passthrough::boxed(raw_decoder_descriptor()?)
}

pub fn create_raw_encoder() -> TcResult<Box<dyn Plugin>> {
    Passthrough::boxed(raw_encoder_descriptor()?)
}

pub fn create_pcm_decoder() -> TcResult<Box<dyn Plugin>> {
    Passthrough::boxed(pcm_decoder_descriptor()?)
}

pub fn create_pcm_encoder() -> TcResult<Box<dyn Plugin>> {
    Passthrough::boxed(pcm_encoder_descriptor()?)
}
