// =============================================================================
// CSV audit writer — one append-only line per accepted signal
// =============================================================================
//
// Fixed 15-column schema; the header is written once when the file is
// created. Appends are serialized by a process-wide mutex. Audit failures
// are logged and never reach the request path.
// =============================================================================

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, info};

const HEADER: [&str; 15] = [
    "timestamp",
    "signal_id",
    "action",
    "ticker",
    "quantity",
    "price",
    "entry_price",
    "stop_loss",
    "take_profit",
    "atr",
    "rr_ratio",
    "rsi",
    "checksum",
    "state",
    "source_ip",
];

/// One audit line, already rendered to field strings by the caller.
#[derive(Debug, Clone)]
pub struct AuditLine {
    pub timestamp: String,
    pub signal_id: String,
    pub action: String,
    pub ticker: String,
    pub quantity: i64,
    pub price: String,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub atr: Option<f64>,
    pub rr_ratio: Option<f64>,
    pub rsi: Option<f64>,
    pub checksum: String,
    pub state: String,
    pub source_ip: String,
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

pub struct CsvAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvAuditLog {
    /// Prepare the audit file: parent directories and the one-time header.
    /// Setup failure downgrades to a logged error; the relay still serves.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        if let Err(e) = Self::ensure_header(&path) {
            error!(path = %path.display(), error = %e, "failed to initialize audit CSV");
        } else {
            info!(path = %path.display(), "audit CSV ready");
        }

        Self { path, lock: Mutex::new(()) }
    }

    fn ensure_header(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            let mut writer = csv::Writer::from_writer(std::fs::File::create(path)?);
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Append one line. Never propagates failure.
    pub fn append(&self, line: &AuditLine) {
        let _guard = self.lock.lock();

        let result = (|| -> std::io::Result<()> {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
            writer.write_record([
                line.timestamp.as_str(),
                line.signal_id.as_str(),
                line.action.as_str(),
                line.ticker.as_str(),
                &line.quantity.to_string(),
                line.price.as_str(),
                &line.entry_price.to_string(),
                &opt(line.stop_loss),
                &opt(line.take_profit),
                &opt(line.atr),
                &opt(line.rr_ratio),
                &opt(line.rsi),
                line.checksum.as_str(),
                line.state.as_str(),
                line.source_ip.as_str(),
            ])?;
            writer.flush()?;
            Ok(())
        })();

        match result {
            Ok(()) => debug!(signal_id = %line.signal_id, "signal appended to audit CSV"),
            Err(e) => {
                error!(signal_id = %line.signal_id, error = %e, "audit CSV append failed")
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str) -> AuditLine {
        AuditLine {
            timestamp: "2025-06-02 10:00:00".to_string(),
            signal_id: id.to_string(),
            action: "buy".to_string(),
            ticker: "7203".to_string(),
            quantity: 100,
            price: "market".to_string(),
            entry_price: 1850.0,
            stop_loss: Some(1800.0),
            take_profit: None,
            atr: None,
            rr_ratio: None,
            rsi: Some(55.2),
            checksum: "0123456789abcdef".to_string(),
            state: "pending".to_string(),
            source_ip: "10.0.0.5".to_string(),
        }
    }

    #[test]
    fn header_once_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("signals.csv");

        let log = CsvAuditLog::new(&path);
        log.append(&line("sig_1"));
        log.append(&line("sig_2"));

        // Reopening must not rewrite the header.
        let log = CsvAuditLog::new(&path);
        log.append(&line("sig_3"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("timestamp,signal_id,action"));
        assert_eq!(lines[0].split(',').count(), 15);
        assert!(lines[1].contains("sig_1"));
        assert!(lines[3].contains("sig_3"));
    }

    #[test]
    fn optional_fields_render_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.csv");
        let log = CsvAuditLog::new(&path);
        log.append(&line("sig_1"));

        let content = std::fs::read_to_string(&path).unwrap();
        let data = content.lines().nth(1).unwrap();
        let fields: Vec<&str> = data.split(',').collect();
        assert_eq!(fields.len(), 15);
        assert_eq!(fields[7], "1800"); // stop_loss
        assert_eq!(fields[8], ""); // take_profit absent
        assert_eq!(fields[14], "10.0.0.5");
    }

    #[test]
    fn append_to_unwritable_path_does_not_panic() {
        let log = CsvAuditLog::new("/proc/definitely/not/writable/signals.csv");
        log.append(&line("sig_1"));
    }
}
