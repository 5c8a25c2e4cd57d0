use std::path::PathBuf;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Handle;

pub fn init_logging(log_fp: Option<&PathBuf>, quiet: bool) -> Option<Handle> {
    let level = if quiet { LevelFilter::Error } else { LevelFilter::Info };
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("> {m}{n}")))
        .build();
    let mut config =
        Config::builder().appender(Appender::builder().build(
            "console",
            Box::new(console),
        ));
    let mut root = Root::builder().appender("console");
    if let Some(fp) = log_fp {
        match FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "[{d(%Y-%m-%d %H:%M:%S)}] {l} {m}{n}",
            )))
            .build(fp)
        {
            Ok(appender) => {
                config = config.appender(
                    Appender::builder().build("file", Box::new(appender)),
                );
                root = root.appender("file");
            }
            Err(e) => {
                eprintln!(
                    "failed to open log file {}, {e}",
                    fp.display()
                );
                return None;
            }
        }
    }
    config
        .build(root.build(level))
        .ok()
        .and_then(|config| log4rs::init_config(config).ok())
}
