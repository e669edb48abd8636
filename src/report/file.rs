use super::tee::ReportSink;
use crate::error::{Result, ScriptestError};
use fs2::FileExt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// 套件报告文件名：`TEST-<name>.xml`
pub fn report_path(reports_dir: &Path, suite_name: &str) -> PathBuf {
    reports_dir.join(format!("TEST-{}.xml", suite_name))
}

/// 落盘的报告文件
///
/// 内容先写入同目录下的临时文件，`close` 时整体替换到最终路径。
/// 写入期间临时文件持有排他锁。
pub struct ReportFile {
    target: PathBuf,
    temp: Option<NamedTempFile>,
}

impl ReportFile {
    /// 在报告目录中为套件创建报告文件（目录不存在时创建）
    pub fn create(reports_dir: &Path, suite_name: &str) -> Result<Self> {
        let target = report_path(reports_dir, suite_name);
        let write_error = |source: io::Error| ScriptestError::ReportWrite {
            path: target.clone(),
            source,
        };

        fs::create_dir_all(reports_dir).map_err(write_error)?;
        let temp = NamedTempFile::new_in(reports_dir).map_err(write_error)?;
        temp.as_file().lock_exclusive().map_err(write_error)?;

        Ok(Self {
            target,
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.target
    }

    fn temp(&mut self) -> io::Result<&mut NamedTempFile> {
        self.temp
            .as_mut()
            .ok_or_else(|| io::Error::other("报告文件已关闭"))
    }
}

impl Write for ReportFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.temp.as_mut() {
            Some(temp) => temp.flush(),
            None => Ok(()),
        }
    }
}

impl ReportSink for ReportFile {
    fn close(&mut self) -> io::Result<()> {
        let Some(mut temp) = self.temp.take() else {
            return Ok(());
        };
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.target).map_err(|err| err.error)?;
        Ok(())
    }

    fn discard(&mut self) -> io::Result<()> {
        match self.temp.take() {
            Some(temp) => temp.close(),
            None => Ok(()),
        }
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.target)
    }
}
