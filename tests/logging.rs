use hotpatch_core::{
    Config,
    logging::{LogFlags, LogLevel, Logger},
    time::{FileTimestamps, TimestampSource},
};
use rstest::rstest;
use std::{cell::RefCell, fmt::Arguments};

fn recording_logger(
    flags: LogFlags,
    lines: &RefCell<Vec<String>>,
) -> Logger<impl Fn(LogLevel, Arguments<'_>) + '_> {
    Logger::new(flags, move |level: LogLevel, args: Arguments<'_>| {
        lines.borrow_mut().push(format!("{}{}", level.prefix(), args));
    })
}

#[rstest]
fn default_flags_hide_details() {
    let lines = RefCell::new(Vec::new());
    let logger = recording_logger(LogFlags::default(), &lines);
    logger.error(format_args!("relocation {} failed", 3));
    logger.warning(format_args!("symbol {} redefined", "foo"));
    logger.info(format_args!("patched"));
    logger.detail(format_args!("page at 0x{:x}", 0x1000));

    assert_eq!(
        *lines.borrow(),
        ["error: relocation 3 failed", "warning: symbol foo redefined", "info: patched"]
    );
}

#[rstest]
#[case(LogFlags::empty(), 0)]
#[case(LogFlags::ERROR, 1)]
#[case(LogFlags::ERROR | LogFlags::DETAIL, 2)]
#[case(LogFlags::all(), 4)]
fn flags_select_levels(#[case] flags: LogFlags, #[case] expected: usize) {
    let lines = RefCell::new(Vec::new());
    let logger = recording_logger(flags, &lines);
    for level in [LogLevel::Error, LogLevel::Warning, LogLevel::Info, LogLevel::Detail] {
        assert_eq!(logger.enabled(level), flags.contains(level.flag()));
        logger.log(level, format_args!("message"));
    }
    assert_eq!(lines.borrow().len(), expected);
}

#[rstest]
fn flags_can_change_at_runtime() {
    let lines = RefCell::new(Vec::new());
    let mut logger = recording_logger(LogFlags::ERROR, &lines);
    logger.info(format_args!("hidden"));
    logger.set_flags(logger.flags() | LogFlags::INFO);
    logger.info(format_args!("shown"));
    assert_eq!(*lines.borrow(), ["info: shown"]);
}

#[rstest]
fn config_hands_out_filtered_loggers() {
    let lines = RefCell::new(Vec::new());
    let config = Config::new().with_log_flags(LogFlags::WARNING);
    let logger = config.logger(|level: LogLevel, args: Arguments<'_>| {
        lines.borrow_mut().push(format!("{level} {args}"));
    });
    logger.error(format_args!("dropped"));
    logger.warning(format_args!("kept"));
    drop(logger);
    assert_eq!(lines.into_inner(), ["warning kept"]);
}

#[cfg(feature = "log")]
#[rstest]
fn log_crate_sink_forwards() {
    use hotpatch_core::logging::LogCrateSink;

    let _ = env_logger::builder().is_test(true).try_init();
    let logger = Logger::new(LogFlags::all(), LogCrateSink);
    logger.detail(format_args!("forwarded to the log facade"));
    logger.error(format_args!("forwarded as an error"));
}

#[rstest]
fn file_timestamps_follow_modification() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("hotpatch_core_mtime_{}", std::process::id()));
    std::fs::write(&path, b"first").unwrap();
    let path_str = path.to_str().unwrap();

    let source = FileTimestamps;
    let before = source.mtime(path_str).unwrap();
    assert!(before > 0);
    assert_eq!(source.mtime(path_str).unwrap(), before);

    let file = std::fs::File::options().write(true).open(&path).unwrap();
    let later = std::fs::metadata(&path).unwrap().modified().unwrap()
        + std::time::Duration::from_secs(10);
    file.set_modified(later).unwrap();
    drop(file);
    assert!(source.mtime(path_str).unwrap() > before);

    std::fs::remove_file(&path).unwrap();
    assert!(source.mtime(path_str).is_err());
}

#[rstest]
fn closures_are_timestamp_sources() {
    let fixed = |_: &str| -> hotpatch_core::Result<u64> { Ok(7) };
    assert_eq!(fixed.mtime("anything").unwrap(), 7);
}
