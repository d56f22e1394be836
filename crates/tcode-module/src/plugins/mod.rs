//! 内置插件实现.

pub mod divx4;
pub mod null;
pub mod ogg;
pub mod raw;

use tcode_core::TcResult;

use crate::registry::PluginRegistry;

/// 注册所有内置解码器
pub fn register_all_decoders(registry: &mut PluginRegistry) -> TcResult<()> {
    registry.register(raw::raw_decoder_descriptor()?, raw::create_raw_decoder)?;
    registry.register(raw::pcm_decoder_descriptor()?, raw::create_pcm_decoder)?;
    registry.register(divx4::decoder_descriptor()?, divx4::Divx4Decoder::create)?;
    registry.register(ogg::decoder_descriptor()?, ogg::OggDecoder::create)?;
    Ok(())
}

/// 注册所有内置编码器
pub fn register_all_encoders(registry: &mut PluginRegistry) -> TcResult<()> {
    registry.register(raw::raw_encoder_descriptor()?, raw::create_raw_encoder)?;
    registry.register(raw::pcm_encoder_descriptor()?, raw::create_pcm_encoder)?;
    registry.register(null::descriptor()?, null::NullEncoder::create)?;
    registry.register(divx4::encoder_descriptor()?, divx4::Divx4Encoder::create)?;
    registry.register(
        divx4::raw_encoder_descriptor()?,
        divx4::Divx4Encoder::create_raw,
    )?;
    registry.register(ogg::encoder_descriptor()?, ogg::OggEncoder::create)?;
    Ok(())
}
