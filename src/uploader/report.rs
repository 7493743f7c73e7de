use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::{
    cloud_storage::path_conversions::normalize_path, domain::UploadResult,
    uploader::error::ReportError, utils::constants::REPORT_PREFIX,
};

/// One CSV line, columns in output order
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow<'a> {
    file_path: &'a str,
    #[serde(rename = "filePathMD5")]
    file_path_md5: &'a str,
    #[serde(rename = "fileNameMD5")]
    file_name_md5: &'a str,
    upload_success: &'a str,
    code: &'a str,
    download_page: &'a str,
    file_id: &'a str,
    file_name: &'a str,
    guest_token: &'a str,
    md5: &'a str,
    parent_folder: &'a str,
}

impl<'a> From<&'a UploadResult> for ReportRow<'a> {
    fn from(result: &'a UploadResult) -> Self {
        let field = |value: &'a Option<String>| value.as_deref().unwrap_or_default();
        Self {
            file_path: &result.file_path,
            file_path_md5: &result.file_path_md5,
            file_name_md5: &result.file_name_md5,
            upload_success: field(&result.upload_success),
            code: field(&result.code),
            download_page: field(&result.download_page),
            file_id: field(&result.file_id),
            file_name: field(&result.file_name),
            guest_token: field(&result.guest_token),
            md5: field(&result.md5),
            parent_folder: field(&result.parent_folder),
        }
    }
}

/// Counters logged at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub hashed: usize,
    pub hash_failed: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "discovered: {} | hashed: {} | hash failures: {} | skipped: {} | uploaded: {} | failed: {}",
            self.discovered, self.hashed, self.hash_failed, self.skipped, self.succeeded, self.failed
        )
    }
}

pub fn report_file_name(unix_secs: i64) -> String {
    format!("{REPORT_PREFIX}_{unix_secs}.csv")
}

/// Write every result as one row to `gofile_upload_<unix seconds>.csv` inside `dir`
pub fn write_report(results: &[UploadResult], dir: &Path) -> Result<PathBuf, ReportError> {
    let path = dir.join(report_file_name(Utc::now().timestamp()));
    let mut writer = csv::Writer::from_path(&path)?;
    for result in results {
        writer.serialize(ReportRow::from(result))?;
    }
    writer.flush()?;
    Ok(path)
}

/// Hand the results to the user: a CSV when `save` is on, the log otherwise
pub fn report(results: &[UploadResult], summary: &RunSummary, save: bool, dir: &Path) -> Result<(), ReportError> {
    if results.is_empty() {
        info!("Nothing to report");
    } else if save {
        let path = write_report(results, dir)?;
        info!("Results saved to {}", normalize_path(&path));
    } else {
        for result in results {
            if result.succeeded() {
                info!(
                    "{} -> {}",
                    result.file_path,
                    result.download_page.as_deref().unwrap_or("(no download page)")
                );
            } else {
                warn!(
                    "{} failed: {}",
                    result.file_path,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    info!("{summary}");
    Ok(())
}
