//! 空输出编码器.
//!
//! 丢弃所有数据, 仅保留帧序号, 用于测速和检查导入链路.

use bytes::Bytes;
use tcode_core::{MediaType, StreamFrame, TcResult};

use crate::descriptor::{PluginDescriptor, PluginKind};
use crate::plugin::Plugin;

pub fn descriptor() -> TcResult<PluginDescriptor> {
    PluginDescriptor::builder("null", PluginKind::Encoder, MediaType::Video)
        .version("0.1.1")
        .description("丢弃输出, 仅计数")
        .format("NULL")
        .limitation("不产生任何输出数据")
        .build()
}

/// 空输出编码器
pub struct NullEncoder {
    descriptor: PluginDescriptor,
    discarded: u64,
}

impl NullEncoder {
    pub fn create() -> TcResult<Box<dyn Plugin>> {
        Ok(Box::new(Self {
            descriptor: descriptor()?,
            discarded: 0,
        }))
    }
}

impl Plugin for NullEncoder {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn encode(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        self.discarded += frame.size() as u64;
        Ok(frame.with_data(Bytes::new()))
    }

    fn finish(&mut self) -> TcResult<()> {
        log::info!("null: 共丢弃 {} 字节", self.discarded);
        Ok(())
    }
}
