//! Log subscriber setup

use crate::application::dump::DUMP_TARGET;
use crate::config::LogConfig;
use crate::domain::{ProxyError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives for a verbosity and dump selection.
pub fn filter_directives(log: &LogConfig) -> String {
    let level = match log.level {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    if (log.dump_fon || log.dump_box) && log.level < 1 {
        format!("{},{}=info", level, DUMP_TARGET)
    } else {
        level.to_string()
    }
}

fn make_writer(file: Option<&str>) -> Result<BoxMakeWriter> {
    Ok(match file {
        None => BoxMakeWriter::new(std::io::stderr),
        Some("-") => BoxMakeWriter::new(std::io::stdout),
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    })
}

/// Initialize the global subscriber. `RUST_LOG` replaces the verbosity.
pub fn init_logging(log: &LogConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(log)).map_err(ProxyError::configuration)?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(log.file.is_none())
        .with_writer(make_writer(log.file.as_deref())?);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(ProxyError::configuration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(level: u8, dump: bool) -> LogConfig {
        LogConfig {
            level,
            dump_box: dump,
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(&log(0, false)), "error");
        assert_eq!(filter_directives(&log(2, false)), "debug");
        assert_eq!(filter_directives(&log(9, false)), "trace");
        assert_eq!(
            filter_directives(&log(0, true)),
            "error,fonbox_proxy::dump=info"
        );
        assert_eq!(filter_directives(&log(1, true)), "info");
    }

    #[test]
    fn test_dump_directive_names_emitter_target() {
        let directives = filter_directives(&log(0, true));
        assert!(directives.ends_with(&format!("{}=info", DUMP_TARGET)));
    }

    #[test]
    fn test_directives_parse() {
        for level in 0..4 {
            assert!(EnvFilter::try_new(filter_directives(&log(level, true))).is_ok());
        }
    }
}
