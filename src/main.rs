//! 命令行渲染工具：按 config.toml / APP_* 环境变量装配路由器，生成一张二维码。

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use qr_backend::AppConfig;
use qr_backend::config::LoggingConfig;
use qr_backend::features::qr::{ErrorCorrection, GenerationRequest, OutputFormat, PhysicalUnit};
use qr_backend::features::routing::MetricsFacadeRecorder;
use qr_backend::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match Args::parse(std::env::args().skip(1).collect()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("参数错误: {e}（使用 --help 查看用法）");
            std::process::exit(2);
        }
    };
    if args.help {
        print_help();
        return Ok(());
    }
    let Some(content) = args.content.clone() else {
        print_help();
        return Err("缺少要编码的内容".into());
    };

    // 配置先于日志加载，日志级别/格式来自 [logging]
    let loaded = AppConfig::init_global();
    match &loaded {
        Ok(()) => init_tracing(&AppConfig::global().logging),
        Err(_) => init_tracing(&LoggingConfig::default()),
    }
    if let Err(e) = loaded {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();
    MetricsFacadeRecorder::describe();
    let state = AppState::from_config(config);

    let req = args.to_request(content)?;
    let output: Vec<u8> = match args.data_uri {
        Some(DataUriKind::Png) => state.router.png_data_uri(&req)?.into_bytes(),
        Some(DataUriKind::Svg) => state.router.svg_data_uri(&req)?.into_bytes(),
        Some(DataUriKind::InlineSvg) => state.router.svg_inline(&req)?.into_bytes(),
        None => state.generate_async(req, args.identifier.clone()).await?.bytes,
    };

    match args.out_path {
        Some(path) => {
            fs::write(&path, &output)?;
            tracing::info!("已写入: {} ({} 字节)", path.display(), output.len());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&output)?;
            stdout.flush()?;
        }
    }

    let stats = state.router.breaker().stats();
    tracing::debug!(
        "熔断器状态: {}, 连续失败 {}, 拒绝 {}",
        stats.state,
        stats.consecutive_failures,
        stats.total_rejected
    );
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum DataUriKind {
    Png,
    Svg,
    InlineSvg,
}

#[derive(Debug, Default)]
struct Args {
    help: bool,
    content: Option<String>,
    format: Option<String>,
    error_correction: Option<String>,
    size: Option<u32>,
    border: Option<u32>,
    fill: Option<String>,
    back: Option<String>,
    physical_size: Option<f64>,
    unit: Option<String>,
    dpi: Option<u32>,
    quality: Option<u8>,
    title: Option<String>,
    description: Option<String>,
    logo: bool,
    data_uri: Option<DataUriKind>,
    identifier: Option<String>,
    out_path: Option<PathBuf>,
}

impl Args {
    fn parse(argv: Vec<String>) -> Result<Self, String> {
        let mut args = Self::default();

        let mut it = argv.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "-h" | "--help" => args.help = true,
                "--format" | "-f" => args.format = Some(value(&mut it, &a)?),
                "--ec" => args.error_correction = Some(value(&mut it, &a)?),
                "--size" => args.size = Some(number(&mut it, &a)?),
                "--border" => args.border = Some(number(&mut it, &a)?),
                "--fill" => args.fill = Some(value(&mut it, &a)?),
                "--back" => args.back = Some(value(&mut it, &a)?),
                "--physical-size" => args.physical_size = Some(number(&mut it, &a)?),
                "--unit" => args.unit = Some(value(&mut it, &a)?),
                "--dpi" => args.dpi = Some(number(&mut it, &a)?),
                "--quality" => args.quality = Some(number(&mut it, &a)?),
                "--title" => args.title = Some(value(&mut it, &a)?),
                "--desc" => args.description = Some(value(&mut it, &a)?),
                "--logo" => args.logo = true,
                "--data-uri" => {
                    let v = value(&mut it, &a)?;
                    args.data_uri = Some(match v.as_str() {
                        "png" => DataUriKind::Png,
                        "svg" => DataUriKind::Svg,
                        "inline-svg" => DataUriKind::InlineSvg,
                        other => {
                            return Err(format!(
                                "--data-uri 不支持 `{other}`（可选 png/svg/inline-svg）"
                            ));
                        }
                    });
                }
                "--id" => args.identifier = Some(value(&mut it, &a)?),
                "--out" | "-o" => args.out_path = Some(PathBuf::from(value(&mut it, &a)?)),
                flag if flag.starts_with('-') => return Err(format!("未知参数 `{flag}`")),
                _ if args.content.is_none() => args.content = Some(a),
                _ => return Err(format!("多余的参数 `{a}`")),
            }
        }
        Ok(args)
    }

    fn to_request(&self, content: String) -> Result<GenerationRequest, Box<dyn std::error::Error>> {
        let format: OutputFormat = self.format.as_deref().unwrap_or("png").parse()?;
        let mut req = GenerationRequest::new(content, format);
        if let Some(ec) = self.error_correction.as_deref() {
            req.error_correction = ec.parse::<ErrorCorrection>()?;
        }
        if let Some(size) = self.size {
            req.size = size;
        }
        if let Some(border) = self.border {
            req.border = border;
        }
        if let Some(fill) = &self.fill {
            req.fill_color = fill.clone();
        }
        if let Some(back) = &self.back {
            req.back_color = back.clone();
        }
        req.physical_size = self.physical_size;
        req.physical_unit = self
            .unit
            .as_deref()
            .map(str::parse::<PhysicalUnit>)
            .transpose()?;
        req.dpi = self.dpi;
        req.quality = self.quality;
        req.svg_title = self.title.clone();
        req.svg_description = self.description.clone();
        req.include_logo = self.logo;
        Ok(req)
    }
}

fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next().ok_or_else(|| format!("{flag} 缺少参数值"))
}

fn number<T: FromStr>(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<T, String> {
    let raw = value(it, flag)?;
    raw.parse()
        .map_err(|_| format!("{flag} 需要数字，收到 `{raw}`"))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter_directive().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format.as_str() {
        "compact" => builder.compact().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.init(),
    }
}

fn print_help() {
    println!(
        r#"qr-backend（二维码渲染工具）

用法：
  qr-backend <CONTENT> [选项]

常用参数：
  --format png|jpeg|webp|svg    输出格式（默认 png）
  --ec L|M|Q|H                  纠错等级（默认 M）
  --size N                      相对尺寸 1-500（默认 10，即 250px）
  --border N                    静区模块数 0-20（默认 4）
  --fill #RRGGBB[AA]            前景色（可为 transparent）
  --back #RRGGBB[AA]            背景色（可为 transparent）
  --physical-size X --unit in|cm|mm --dpi N
                                按物理尺寸输出（三者必须同时提供）
  --quality N                   JPEG/WEBP 质量 1-100
  --title TEXT / --desc TEXT    SVG 无障碍标题/描述
  --logo                        合成配置中的默认 Logo
  --data-uri png|svg|inline-svg 输出 Data URI / 内联 SVG 字符串
  --id KEY                      金丝雀分桶标识
  --out PATH                    写入到文件（否则 stdout）
"#
    );
}
