//! tcode - 转码命令行工具
//!
//! 退出码: 0 成功, 2 配置错误, 3 校验失败, 4 管线错误, 5 外部工具失败.

mod profile;

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tcode::logging::{self, LoggingConfig};
use tcode_core::{JobOptions, TcError, TcResult};
use tcode_core::options::{OPT_FORMAT, OPT_KEEP_PARTIAL};
use tcode_core::FormatTag;
use tcode_module::{Job, PluginDescriptor, PluginFlags, PluginKind, PluginRegistry, ToolLocator};
use tcode_pipeline::{Pipeline, open_sink, open_source, spawn_job};

use profile::Profile;

#[derive(Parser, Debug)]
#[command(name = "tcode", version, about = "可插拔编解码模块的转码工具")]
struct Cli {
    /// 导入解码器 (如 raw, divx4, ogg), 省略时按输入扩展名推断
    #[arg(short = 'x', long = "import")]
    import: Option<String>,

    /// 导出编码器 (如 divx4, divx4raw, ogg), 省略时按输出格式推断
    #[arg(short = 'y', long = "export")]
    export: Option<String>,

    /// 输入文件
    #[arg(short = 'i', long = "in")]
    input: Option<PathBuf>,

    /// 输出文件
    #[arg(short = 'o', long = "out")]
    output: Option<PathBuf>,

    /// 音频单独导出的文件
    #[arg(short = 'm', long = "raw-audio")]
    raw_audio: Option<PathBuf>,

    /// 插件选项 k=v, 可重复
    #[arg(short = 'O', long = "option", value_name = "K=V")]
    options: Vec<String>,

    /// JSON 导出配置文件
    #[arg(long)]
    profile: Option<PathBuf>,

    /// 失败时保留未完成的输出
    #[arg(long)]
    keep_partial: bool,

    /// 列出所有插件
    #[arg(long)]
    list: bool,

    /// 显示插件详情
    #[arg(long, value_name = "PLUGIN")]
    describe: Option<String>,

    /// 日志目录
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// 日志级别 (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LoggingConfig {
        directory: cli.log_dir.clone(),
        ..LoggingConfig::default()
    }
    .with_verbosity(cli.verbose);
    if let Err(e) = logging::init(log_config) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{e}");
            eprintln!("错误: {e}");
            e.exit_code()
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> TcResult<()> {
    let registry = tcode::global_registry()?;

    if cli.list {
        print_plugin_list(registry);
        return Ok(());
    }
    if let Some(name) = &cli.describe {
        return describe_plugin(registry, name);
    }

    let tools = ToolLocator::from_env();
    let job = build_job(&cli, registry, &tools)?;
    for desc in job.plugin_chain() {
        log::info!("{desc}");
        for note in desc.known_limitations() {
            log::warn!("{}: {note}", desc.name());
        }
    }

    let source = open_source(&job)?;
    let sink = open_sink(&job)?;
    let pipeline = Pipeline::new(job, registry, tools)?;
    let input = pipeline.job().input_path.clone();
    let output = pipeline.job().effective_output_path().to_path_buf();

    let handle = spawn_job(pipeline, source, sink);
    let token = handle.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("收到中断信号, 当前帧完成后停止");
            token.cancel();
        }
    });

    let summary = handle.wait().await?;
    println!(
        "{} -> {}: {} 帧 / {} 字节 -> {} 帧 / {} 字节, 耗时 {:.2?}",
        input.display(),
        output.display(),
        summary.frames_in,
        summary.bytes_in,
        summary.frames_out,
        summary.bytes_out,
        summary.elapsed
    );
    Ok(())
}

/// 合并配置文件与命令行参数, 构造任务
fn build_job(cli: &Cli, registry: &PluginRegistry, tools: &ToolLocator) -> TcResult<Job> {
    let profile = match &cli.profile {
        Some(path) => Profile::load(path).map_err(|e| TcError::Configuration(format!("{e:#}")))?,
        None => Profile::default(),
    };

    let input = cli
        .input
        .clone()
        .ok_or_else(|| TcError::Configuration("必须指定输入文件 (--in)".into()))?;
    let output = cli
        .output
        .clone()
        .ok_or_else(|| TcError::Configuration("必须指定输出文件 (--out)".into()))?;

    let mut options = profile
        .job_options()
        .map_err(|e| TcError::Configuration(format!("{e:#}")))?;
    options.merge(&JobOptions::from_pairs(&cli.options)?);
    if cli.keep_partial {
        options.set(OPT_KEEP_PARTIAL, "true");
    }

    let export = match cli.export.as_deref().or(profile.export.as_deref()) {
        Some(name) => registry.resolve_encoder(name)?.clone(),
        None => {
            let format = match options.get(OPT_FORMAT) {
                Some(tag) => tag.parse()?,
                None => FormatTag::from_path(&output).ok_or_else(|| {
                    TcError::Configuration(format!(
                        "无法从 {} 推断输出格式, 请指定导出插件 (--export)",
                        output.display()
                    ))
                })?,
            };
            infer_export(registry, &format, tools)?
        }
    };
    let import = match cli.import.as_deref().or(profile.import.as_deref()) {
        Some(name) => Some(registry.resolve_decoder(name)?.clone()),
        None => infer_import(registry, &input, &export, tools),
    };

    let mut job = Job::new(input, output, export).with_options(options);
    if let Some(import) = import {
        job = job.with_import(import);
    }
    if let Some(raw_audio) = cli.raw_audio.clone().or(profile.raw_audio) {
        job = job.with_raw_audio(raw_audio);
    }
    Ok(job)
}

/// 按输出格式选择导出插件
///
/// 按优先顺序取第一个外部工具齐备的插件; 都不齐备时取第一个,
/// 由校验报告缺少的工具.
fn infer_export(
    registry: &PluginRegistry,
    format: &FormatTag,
    tools: &ToolLocator,
) -> TcResult<PluginDescriptor> {
    let candidates = registry.resolve_for_format(PluginKind::Encoder, format);
    let chosen = candidates
        .iter()
        .find(|d| tools_ready(d, tools))
        .or(candidates.first())
        .ok_or_else(|| {
            TcError::Configuration(format!("没有支持格式 {format} 的导出插件, 请指定 --export"))
        })?;
    log::info!("按格式 {format} 选择导出插件 '{}'", chosen.name());
    Ok((*chosen).clone())
}

/// 按输入扩展名选择导入插件
///
/// 只考虑与导出插件媒体类型一致的解码器, 并且不会与导出插件一起
/// 使用两个外部工具. 没有合适的解码器时直接把输入交给导出插件.
fn infer_import(
    registry: &PluginRegistry,
    input: &Path,
    export: &PluginDescriptor,
    tools: &ToolLocator,
) -> Option<PluginDescriptor> {
    let format = FormatTag::from_path(input)?;
    let media = export.media_type();
    let export_external = export.flags().contains(PluginFlags::EXTERNAL);
    let chosen = registry
        .resolve_for_format(PluginKind::Decoder, &format)
        .into_iter()
        .filter(|d| d.media_type() == media)
        .filter(|d| !(export_external && d.flags().contains(PluginFlags::EXTERNAL)))
        .find(|d| tools_ready(d, tools));
    match chosen {
        Some(desc) => log::info!("按输入格式 {format} 选择导入插件 '{}'", desc.name()),
        None => log::debug!("没有适用于 {format} 的导入插件, 输入直接交给导出插件"),
    }
    chosen.cloned()
}

fn tools_ready(desc: &PluginDescriptor, tools: &ToolLocator) -> bool {
    desc.required_external_tools()
        .iter()
        .all(|tool| tools.is_available(tool))
}

fn print_plugin_list(registry: &PluginRegistry) {
    for (title, kind) in [
        ("导入 (解码器)", PluginKind::Decoder),
        ("导出 (编码器)", PluginKind::Encoder),
    ] {
        println!("{title}:");
        for desc in registry.list(kind) {
            println!("  {desc}");
        }
    }
}

fn describe_plugin(registry: &PluginRegistry, name: &str) -> TcResult<()> {
    let found: Vec<_> = [PluginKind::Decoder, PluginKind::Encoder]
        .into_iter()
        .filter_map(|kind| registry.resolve(kind, name).ok())
        .collect();
    if found.is_empty() {
        return Err(TcError::PluginNotFound(name.to_string()));
    }
    for desc in found {
        for line in desc.describe_lines() {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PluginRegistry {
        tcode::default_registry().unwrap()
    }

    fn no_tools() -> ToolLocator {
        ToolLocator::new(Vec::new())
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tcode").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_命令行构造任务() {
        let cli = parse(&[
            "-x", "raw", "-y", "divx4", "-i", "in.raw", "-o", "out.avi", "-O",
            "max_frame_size=1024", "--keep-partial",
        ]);
        let job = build_job(&cli, &registry(), &no_tools()).unwrap();
        assert_eq!(job.selected_plugin.name(), "divx4");
        assert_eq!(job.import_plugin.as_ref().map(|d| d.name()), Some("raw"));
        assert_eq!(job.options.get("max_frame_size"), Some("1024"));
        assert!(job.keep_partial().unwrap());
    }

    #[test]
    fn test_命令行覆盖配置文件() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(
            &path,
            r#"{"export": "divx4raw", "raw_audio": "a.wav", "options": {"max_frame_size": 10}}"#,
        )
        .unwrap();
        let profile = path.to_string_lossy().to_string();
        let cli = parse(&[
            "--profile", &profile, "-i", "in.raw", "-o", "out.divx", "-O", "max_frame_size=20",
        ]);
        let job = build_job(&cli, &registry(), &no_tools()).unwrap();
        assert_eq!(job.selected_plugin.name(), "divx4raw");
        assert_eq!(job.raw_audio_path, Some(PathBuf::from("a.wav")));
        assert_eq!(job.options.get("max_frame_size"), Some("20"));
    }

    #[test]
    fn test_缺少参数或未知插件是配置错误() {
        let cli = parse(&["-i", "in.raw", "-o", "out.bin"]);
        let err = build_job(&cli, &registry(), &no_tools()).unwrap_err();
        assert_eq!(err.exit_code(), tcode_core::error::EXIT_CONFIGURATION);

        let cli = parse(&["-i", "in.raw", "-o", "out.avi", "-O", "format=XVID"]);
        let err = build_job(&cli, &registry(), &no_tools()).unwrap_err();
        assert!(matches!(err, TcError::Configuration(_)));

        let cli = parse(&["-y", "xvid", "-i", "in.raw", "-o", "out.avi"]);
        let err = build_job(&cli, &registry(), &no_tools()).unwrap_err();
        assert!(matches!(err, TcError::PluginNotFound(_)));
        assert_eq!(err.exit_code(), tcode_core::error::EXIT_CONFIGURATION);
    }

    #[test]
    fn test_省略插件时按扩展名推断() {
        let cli = parse(&["-i", "in.raw", "-o", "out.avi"]);
        let job = build_job(&cli, &registry(), &no_tools()).unwrap();
        assert_eq!(job.selected_plugin.name(), "divx4");
        assert_eq!(job.import_plugin.as_ref().map(|d| d.name()), Some("raw"));

        let cli = parse(&["-i", "movie.avi", "-o", "frames.raw"]);
        let job = build_job(&cli, &registry(), &no_tools()).unwrap();
        assert_eq!(job.selected_plugin.name(), "raw");
        assert_eq!(job.import_plugin.as_ref().map(|d| d.name()), Some("divx4"));

        // 媒体类型不一致的解码器不参与推断
        let cli = parse(&["-i", "in.wav", "-o", "out.divx"]);
        let job = build_job(&cli, &registry(), &no_tools()).unwrap();
        assert_eq!(job.selected_plugin.name(), "divx4raw");
        assert!(job.import_plugin.is_none());

        // 显式的 format 选项优先于扩展名
        let cli = parse(&["-i", "in.raw", "-o", "out.bin", "-O", "format=avi"]);
        let job = build_job(&cli, &registry(), &no_tools()).unwrap();
        assert_eq!(job.selected_plugin.name(), "divx4");
    }

    #[cfg(unix)]
    #[test]
    fn test_推断时不串联两个外部工具() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        for tool in ["oggenc", "oggdec"] {
            let path = dir.path().join(tool);
            std::fs::write(&path, "#!/bin/sh\nexec cat\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let tools = ToolLocator::new(vec![dir.path().to_path_buf()]);

        let cli = parse(&["-i", "in.ogg", "-o", "out.ogg"]);
        let job = build_job(&cli, &registry(), &tools).unwrap();
        assert_eq!(job.selected_plugin.name(), "ogg");
        assert!(job.import_plugin.is_none());

        let cli = parse(&["-i", "in.ogg", "-o", "out.wav"]);
        let job = build_job(&cli, &registry(), &tools).unwrap();
        assert_eq!(job.selected_plugin.name(), "pcm");
        assert_eq!(job.import_plugin.as_ref().map(|d| d.name()), Some("ogg"));
    }

    #[test]
    fn test_查看插件详情() {
        assert!(describe_plugin(&registry(), "ogg").is_ok());
        assert!(matches!(
            describe_plugin(&registry(), "mpeg2"),
            Err(TcError::PluginNotFound(_))
        ));
    }
}
