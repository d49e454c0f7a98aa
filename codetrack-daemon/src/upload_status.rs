use std::fmt::Write as _;
use std::sync::Arc;

use codetrack_sync::UploadStatsListener;

use crate::worker::MonitoredSubject;

/// Exposes sync progress to the metrics reporter.
pub struct UploadStatsStatus {
    listener: Arc<UploadStatsListener>,
}

impl UploadStatsStatus {
    pub fn new(listener: Arc<UploadStatsListener>) -> Self {
        Self { listener }
    }
}

impl MonitoredSubject for UploadStatsStatus {
    fn is_active(&self) -> bool {
        self.listener.is_currently_uploading()
    }

    fn display_errors(&self, _errors: &mut Vec<String>) {}

    fn display_metrics(&self, buffer: &mut String) {
        if let Some(stats) = self.listener.current_stats() {
            let _ = write!(
                buffer,
                "Uploaded {:>3} of {:>3} MB at {:>5} MB/sec",
                format!("{:.1}%", stats.upload_ratio() * 100.0),
                format!("{:.2}", stats.total_megabytes()),
                format!("{:.3}", stats.megabytes_per_second()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use codetrack_sync::ProgressListener;

    use super::*;

    #[test]
    fn inactive_and_silent_before_any_upload() {
        let status = UploadStatsStatus::new(Arc::new(UploadStatsListener::new()));
        assert!(!status.is_active());
        let mut buffer = String::new();
        status.display_metrics(&mut buffer);
        assert!(buffer.is_empty());
    }

    #[test]
    fn reports_ratio_and_size_while_uploading() {
        let listener = Arc::new(UploadStatsListener::new());
        listener.upload_started(2 * 1024 * 1024);
        listener.bytes_uploaded(1024 * 1024);
        let status = UploadStatsStatus::new(listener.clone());

        assert!(status.is_active());
        let mut buffer = String::new();
        status.display_metrics(&mut buffer);
        assert!(buffer.starts_with("Uploaded 50.0% of 2.00 MB at "), "{buffer}");
        assert!(buffer.ends_with(" MB/sec"));

        listener.upload_finished();
        assert!(!status.is_active());
    }
}
