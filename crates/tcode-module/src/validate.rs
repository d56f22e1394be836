//! 任务校验.
//!
//! 在任何流 I/O 开始之前, 依据插件能力描述检查任务:
//! 1. 选项名称与类型
//! 2. 导入/导出插件能否串联
//! 3. 输出格式是否受支持
//! 4. 依赖的外部工具是否可用
//! 5. 互斥选项

use tcode_core::options::{GENERIC_OPTIONS, OPT_AUDIO, OPT_CONTAINER, OPT_KEEP_PARTIAL, OPT_RAW};
use tcode_core::{FormatTag, MediaType, TcError, TcResult, ValidationError};

use crate::descriptor::{PluginFlags, PluginKind};
use crate::job::Job;
use crate::tools::{ToolLocator, override_var_name};

/// 校验任务
///
/// 选项错误返回 `Configuration`, 其余不满足项返回 `Validation`.
pub fn validate(job: &Job, tools: &ToolLocator) -> TcResult<()> {
    check_options(job)?;
    check_chain(job)?;
    check_format(job)?;
    check_tools(job, tools)?;
    check_exclusive_options(job)?;
    log::debug!(
        "任务校验通过: {} -> {} ({})",
        job.input_path.display(),
        job.effective_output_path().display(),
        job.selected_plugin.name()
    );
    Ok(())
}

fn check_options(job: &Job) -> TcResult<()> {
    for name in job.options.names() {
        let accepted = GENERIC_OPTIONS.contains(&name)
            || job.plugin_chain().any(|p| p.accepts_option(name));
        if !accepted {
            return Err(TcError::Configuration(format!(
                "插件 '{}' 不接受选项 '{name}'",
                job.selected_plugin.name()
            )));
        }
    }
    // 提前暴露类型错误
    job.frame_size()?;
    job.tool_timeout()?;
    for flag in [OPT_RAW, OPT_AUDIO, OPT_KEEP_PARTIAL] {
        job.options.get_bool(flag)?;
    }
    Ok(())
}

fn check_chain(job: &Job) -> TcResult<()> {
    let export = &job.selected_plugin;
    if let Some(import) = &job.import_plugin {
        let incompatible = |reason: String| {
            TcError::Validation(ValidationError::IncompatibleChain {
                import: import.name().to_string(),
                export: export.name().to_string(),
                reason,
            })
        };
        if import.kind() != PluginKind::Decoder {
            return Err(incompatible(format!("'{}' 不是解码器", import.name())));
        }
        if export.kind() != PluginKind::Encoder {
            return Err(incompatible(format!("'{}' 不是编码器", export.name())));
        }
        if import.media_type() != export.media_type() {
            return Err(incompatible(format!(
                "媒体类型不一致 ({} / {})",
                import.media_type(),
                export.media_type()
            )));
        }
        let external = job
            .plugin_chain()
            .filter(|p| p.flags().contains(PluginFlags::EXTERNAL))
            .count();
        if external > 1 {
            return Err(incompatible("同一任务最多只能使用一个外部工具".into()));
        }
    }
    Ok(())
}

fn check_format(job: &Job) -> TcResult<()> {
    let plugin = &job.selected_plugin;
    let unsupported = |format: FormatTag| {
        TcError::Validation(ValidationError::UnsupportedFormat {
            plugin: plugin.name().to_string(),
            format,
            supported: plugin.formats_string(),
        })
    };

    let format = job.requested_format()?;
    if !plugin.supports(&format) {
        return Err(unsupported(format));
    }
    if let Some(container) = job.options.get(OPT_CONTAINER) {
        let container: FormatTag = container.parse()?;
        if !plugin.supports(&container) {
            return Err(unsupported(container));
        }
    }
    Ok(())
}

fn check_tools(job: &Job, tools: &ToolLocator) -> TcResult<()> {
    for plugin in job.plugin_chain() {
        for tool in plugin.required_external_tools() {
            if !tools.is_available(tool) {
                log::warn!(
                    "未找到外部工具 '{tool}', 可通过环境变量 {} 指定路径",
                    override_var_name(tool)
                );
                return Err(TcError::Validation(ValidationError::MissingTool {
                    plugin: plugin.name().to_string(),
                    tool: tool.clone(),
                }));
            }
        }
    }
    Ok(())
}

fn check_exclusive_options(job: &Job) -> TcResult<()> {
    let plugin = &job.selected_plugin;
    let raw = plugin.is_raw_bitstream() || job.options.flag(OPT_RAW)?;

    if raw && job.options.contains(OPT_CONTAINER) {
        return Err(TcError::Validation(ValidationError::ConflictingOptions {
            first: OPT_RAW.to_string(),
            second: OPT_CONTAINER.to_string(),
        }));
    }

    if raw
        && plugin.media_type() == MediaType::Video
        && job.options.flag(OPT_AUDIO)?
        && job.raw_audio_path.is_none()
    {
        return Err(TcError::Validation(ValidationError::MissingRawAudio {
            plugin: plugin.name().to_string(),
        }));
    }

    if job.raw_audio_path.is_some() && plugin.media_type() == MediaType::Video && !raw {
        log::warn!("插件 '{}' 输出封装流, 忽略 --raw-audio", plugin.name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{divx4, ogg, raw};
    use crate::registry::PluginRegistry;
    use tcode_core::JobOptions;

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        crate::register_all(&mut registry).unwrap();
        registry
    }

    fn no_tools() -> ToolLocator {
        ToolLocator::new(Vec::new())
    }

    fn opts(pairs: &[&str]) -> JobOptions {
        JobOptions::from_pairs(pairs).unwrap()
    }

    #[test]
    fn test_不支持的输出格式() {
        let reg = registry();
        let divx = reg.resolve_encoder("divx4").unwrap().clone();
        let job = Job::new("in.raw", "out.avi", divx).with_options(opts(&["format=XVID"]));
        let err = validate(&job, &no_tools()).unwrap_err();
        match err {
            TcError::Validation(ValidationError::UnsupportedFormat { plugin, format, .. }) => {
                assert_eq!(plugin, "divx4");
                assert_eq!(format, FormatTag::new("XVID"));
            }
            other => panic!("期望格式校验错误, 实际: {other}"),
        }
    }

    #[test]
    fn test_支持的输出格式通过() {
        let divx = divx4::encoder_descriptor().unwrap();
        let job = Job::new("in.raw", "out.divx", divx);
        assert!(validate(&job, &no_tools()).is_ok());
    }

    #[test]
    fn test_缺少外部工具() {
        let job = Job::new("in.wav", "out.ogg", ogg::encoder_descriptor().unwrap());
        let err = validate(&job, &no_tools()).unwrap_err();
        assert!(matches!(
            err,
            TcError::Validation(ValidationError::MissingTool { ref tool, .. }) if tool == "oggenc"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_外部工具可用时通过() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("oggenc");
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let tools = ToolLocator::new(vec![dir.path().to_path_buf()]);
        let job = Job::new("in.wav", "out.ogg", ogg::encoder_descriptor().unwrap())
            .with_options(opts(&["rate=48000", "channels=1"]));
        assert!(validate(&job, &tools).is_ok());
    }

    #[test]
    fn test_裸码流与封装容器互斥() {
        let job = Job::new("in.raw", "out.divx", divx4::raw_encoder_descriptor().unwrap())
            .with_options(opts(&["container=DIVX"]));
        let err = validate(&job, &no_tools()).unwrap_err();
        assert!(matches!(
            err,
            TcError::Validation(ValidationError::ConflictingOptions { .. })
        ));

        let job = Job::new("in.raw", "out.avi", divx4::encoder_descriptor().unwrap())
            .with_options(opts(&["raw", "container=avi"]));
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Validation(ValidationError::ConflictingOptions { .. }))
        ));
    }

    #[test]
    fn test_裸码流携带音频需要单独导出() {
        let desc = divx4::raw_encoder_descriptor().unwrap();
        let job = Job::new("in.raw", "out.divx", desc.clone()).with_options(opts(&["audio"]));
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Validation(ValidationError::MissingRawAudio { .. }))
        ));

        let job = Job::new("in.raw", "out.divx", desc)
            .with_options(opts(&["audio"]))
            .with_raw_audio("audio.pcm");
        assert!(validate(&job, &no_tools()).is_ok());
    }

    #[test]
    fn test_未知选项为配置错误() {
        let job = Job::new("in.raw", "out.avi", divx4::encoder_descriptor().unwrap())
            .with_options(opts(&["rate=44100"]));
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Configuration(_))
        ));

        let job = Job::new("in.raw", "out.avi", divx4::encoder_descriptor().unwrap())
            .with_options(opts(&["frame_size=abc"]));
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Configuration(_))
        ));
    }

    #[test]
    fn test_插件串联检查() {
        let job = Job::new("in.wav", "out.avi", divx4::encoder_descriptor().unwrap())
            .with_import(raw::pcm_decoder_descriptor().unwrap());
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Validation(ValidationError::IncompatibleChain { .. }))
        ));

        let job = Job::new("in.avi", "out.raw", raw::raw_decoder_descriptor().unwrap())
            .with_import(divx4::decoder_descriptor().unwrap());
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Validation(ValidationError::IncompatibleChain { .. }))
        ));

        let job = Job::new("in.avi", "out.raw", raw::raw_encoder_descriptor().unwrap())
            .with_import(divx4::decoder_descriptor().unwrap());
        assert!(validate(&job, &no_tools()).is_ok());
    }

    #[test]
    fn test_多个外部工具不能串联() {
        let job = Job::new("in.ogg", "out.ogg", ogg::encoder_descriptor().unwrap())
            .with_import(ogg::decoder_descriptor().unwrap());
        assert!(matches!(
            validate(&job, &no_tools()),
            Err(TcError::Validation(ValidationError::IncompatibleChain { .. }))
        ));
        let err = validate(&job, &no_tools()).unwrap_err();
        assert_eq!(err.exit_code(), tcode_core::error::EXIT_VALIDATION);
    }
}
