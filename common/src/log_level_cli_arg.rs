//! Standard type to use with the `-l/--log-level` CLI option.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Accepts the full names and their one-letter aliases, case-insensitively
/// when the argument is declared with `ignore_case = true`. The nine names
/// fold onto the five `tracing` levels. A name sitting between two `tracing`
/// levels folds up, so it never shows a record it would have hidden.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum LogLevelCliArg {
    #[value(alias = "s")]
    Spam,
    #[value(alias = "d")]
    Debug,
    #[value(alias = "v")]
    Verbose,
    #[default]
    #[value(alias = "i")]
    Info,
    #[value(alias = "n")]
    Notice,
    #[value(alias = "w")]
    Warning,
    #[value(alias = "u")]
    Success,
    #[value(alias = "e")]
    Error,
    #[value(alias = "c")]
    Critical,
}

impl From<LogLevelCliArg> for LevelFilter {
    fn from(value: LogLevelCliArg) -> Self {
        match value {
            LogLevelCliArg::Spam => LevelFilter::TRACE,
            LogLevelCliArg::Debug => LevelFilter::DEBUG,
            LogLevelCliArg::Verbose | LogLevelCliArg::Info => LevelFilter::INFO,
            LogLevelCliArg::Notice | LogLevelCliArg::Warning => LevelFilter::WARN,
            LogLevelCliArg::Success | LogLevelCliArg::Error | LogLevelCliArg::Critical => {
                LevelFilter::ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> LogLevelCliArg {
        LogLevelCliArg::from_str(input, true).unwrap()
    }

    #[test]
    fn aliases_and_case() {
        assert_eq!(parse("s"), LogLevelCliArg::Spam);
        assert_eq!(parse("V"), LogLevelCliArg::Verbose);
        assert_eq!(parse("u"), LogLevelCliArg::Success);
        assert_eq!(parse("WARNING"), LogLevelCliArg::Warning);
        assert_eq!(parse("Critical"), LogLevelCliArg::Critical);
        assert!(LogLevelCliArg::from_str("x", true).is_err());
        assert!(LogLevelCliArg::from_str("loud", true).is_err());
    }

    #[test]
    fn levels_fold_onto_tracing() {
        assert_eq!(LevelFilter::from(LogLevelCliArg::Spam), LevelFilter::TRACE);
        assert_eq!(LevelFilter::from(LogLevelCliArg::Debug), LevelFilter::DEBUG);
        assert_eq!(LevelFilter::from(LogLevelCliArg::default()), LevelFilter::INFO);
        assert_eq!(LevelFilter::from(LogLevelCliArg::Warning), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevelCliArg::Critical), LevelFilter::ERROR);
    }

    #[test]
    fn in_between_levels_fold_up() {
        // verbose hides debug, notice hides info, success hides warnings.
        assert_eq!(LevelFilter::from(LogLevelCliArg::Verbose), LevelFilter::INFO);
        assert_eq!(LevelFilter::from(LogLevelCliArg::Notice), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevelCliArg::Success), LevelFilter::ERROR);
    }
}
