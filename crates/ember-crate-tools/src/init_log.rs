use std::io::Write;

/// 彩色的单行日志头 + 灰色的位置信息
///
/// 默认级别为 Info，可以通过 `RUST_LOG` 覆盖
fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let level_color = match record.level() {
                log::Level::Error => Some(anstyle::AnsiColor::Red),
                log::Level::Warn => Some(anstyle::AnsiColor::Yellow),
                log::Level::Info => Some(anstyle::AnsiColor::Green),
                log::Level::Debug => Some(anstyle::AnsiColor::Cyan),
                log::Level::Trace => None,
            };
            let level_style =
                buf.default_level_style(record.level()).fg_color(level_color.map(anstyle::Color::Ansi));
            let grey_style =
                anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let module = record.module_path().unwrap_or("");

            writeln!(
                buf,
                "{level_style}[{time}] {:<5}: {}{level_style:#}\n\t {grey_style}In {module} At {file}:{line}{grey_style:#}",
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env();
    builder
}

/// 应用程序使用，只能调用一次
pub fn init_log() {
    builder().init();
}

/// 测试使用：输出交给 test harness 捕获，重复调用不会 panic
pub fn init_test_log() {
    let _ = builder().is_test(true).filter(None, log::LevelFilter::Debug).try_init();
}
