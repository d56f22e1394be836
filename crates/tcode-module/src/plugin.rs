//! 插件 trait 定义.
//!
//! 所有编解码插件 (无论在进程内处理还是委托给外部工具) 都实现 `Plugin`.

use tcode_core::{JobOptions, StreamFrame, TcError, TcResult};

use crate::descriptor::{ExternalInvocation, PluginDescriptor, PluginKind};

/// 编解码插件 trait
///
/// 处理流程:
/// 1. 调用 `configure()` 传入任务选项
/// 2. 对每一帧调用 `encode()` (编码器) 或 `decode()` (解码器), 一帧进一帧出
/// 3. 所有帧处理完毕后调用 `finish()`
///
/// 声明了 `external_invocation()` 的插件, 其输出会继续送入外部工具,
/// 由管线负责进程管理.
pub trait Plugin: Send {
    /// 插件能力描述
    fn descriptor(&self) -> &PluginDescriptor;

    /// 使用任务选项配置插件
    ///
    /// 默认实现为空操作.
    fn configure(&mut self, _options: &JobOptions) -> TcResult<()> {
        Ok(())
    }

    /// 编码一帧
    fn encode(&mut self, _frame: StreamFrame) -> TcResult<StreamFrame> {
        Err(TcError::Unsupported(format!(
            "插件 '{}' 不支持编码",
            self.descriptor().name()
        )))
    }

    /// 解码一帧
    fn decode(&mut self, _frame: StreamFrame) -> TcResult<StreamFrame> {
        Err(TcError::Unsupported(format!(
            "插件 '{}' 不支持解码",
            self.descriptor().name()
        )))
    }

    /// 配置完成后需要启动的外部工具 (如果有)
    fn external_invocation(&self) -> Option<ExternalInvocation> {
        None
    }

    /// 所有帧处理完毕
    fn finish(&mut self) -> TcResult<()> {
        Ok(())
    }

    /// 按插件类型分派到 `encode` 或 `decode`
    fn process(&mut self, frame: StreamFrame) -> TcResult<StreamFrame> {
        match self.descriptor().kind() {
            PluginKind::Encoder => self.encode(frame),
            PluginKind::Decoder => self.decode(frame),
        }
    }
}
