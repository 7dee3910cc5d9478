//! Logging to the systemd user journal (`journalctl --user -t flowday -f`).

use log::{LevelFilter, Log, Metadata, Record};
use systemd_journal_logger::JournalLog;

/// Passes flowday records at info, or debug when toggled, and everything
/// else at warn.
struct FilteredJournal {
    inner: JournalLog,
}

fn allowed(target: &str, level: log::Level, debug: bool) -> bool {
    let max = if !target.starts_with("flowday") {
        LevelFilter::Warn
    } else if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    level <= max
}

impl Log for FilteredJournal {
    fn enabled(&self, metadata: &Metadata) -> bool {
        allowed(metadata.target(), metadata.level(), crate::debug_logging())
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the journal logger under `identifier`.
///
/// Without a journal (containers, CI) the process carries on unlogged.
pub fn init(identifier: &str, debug: bool) {
    crate::set_debug_logging(debug);

    let journal = match JournalLog::new() {
        Ok(journal) => journal.with_syslog_identifier(identifier.to_string()),
        Err(e) => {
            eprintln!("journal logging unavailable: {e}");
            return;
        }
    };

    if let Err(e) = log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })) {
        eprintln!("logger already installed: {e}");
        return;
    }
    // Global max stays at Debug so the toggle works without reinstalling.
    log::set_max_level(LevelFilter::Debug);
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn own_records_follow_the_debug_toggle() {
        assert!(allowed("flowday::sync", Level::Info, false));
        assert!(!allowed("flowday::sync", Level::Debug, false));
        assert!(allowed("flowday::sync", Level::Debug, true));
    }

    #[test]
    fn dependencies_are_held_at_warn() {
        assert!(allowed("tokio::runtime", Level::Warn, true));
        assert!(!allowed("tokio::runtime", Level::Info, true));
    }
}
