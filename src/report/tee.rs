use std::io::{self, Write};
use std::path::Path;

/// 报告写入目标
///
/// `close` 表示文档已完整写入；`discard` 用于生成失败时丢弃已写内容。
pub trait ReportSink: Write {
    fn close(&mut self) -> io::Result<()>;

    fn discard(&mut self) -> io::Result<()> {
        self.close()
    }

    /// 持久化位置（内存目标没有）
    fn location(&self) -> Option<&Path> {
        None
    }
}

impl ReportSink for Vec<u8> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn discard(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }
}

/// 双路写入：持久目标与内存副本同时接收每一次写入
pub struct ReportTee<D: ReportSink, C: ReportSink = Vec<u8>> {
    durable: D,
    capture: C,
}

impl<D: ReportSink> ReportTee<D, Vec<u8>> {
    pub fn new(durable: D) -> Self {
        Self {
            durable,
            capture: Vec::new(),
        }
    }
}

impl<D: ReportSink, C: ReportSink> ReportTee<D, C> {
    pub fn with_capture(durable: D, capture: C) -> Self {
        Self { durable, capture }
    }

    pub fn durable(&self) -> &D {
        &self.durable
    }

    pub fn captured(&self) -> &C {
        &self.capture
    }

    pub fn into_parts(self) -> (D, C) {
        (self.durable, self.capture)
    }
}

/// 两个操作都执行，返回先出现的错误
fn both(first: io::Result<()>, second: io::Result<()>) -> io::Result<()> {
    first.and(second)
}

impl<D: ReportSink, C: ReportSink> Write for ReportTee<D, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.durable.write_all(buf)?;
        self.capture.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let durable = self.durable.flush();
        let capture = self.capture.flush();
        both(durable, capture)
    }
}

impl<D: ReportSink, C: ReportSink> ReportSink for ReportTee<D, C> {
    fn close(&mut self) -> io::Result<()> {
        let durable = self.durable.close();
        let capture = self.capture.close();
        both(durable, capture)
    }

    fn discard(&mut self) -> io::Result<()> {
        let durable = self.durable.discard();
        let capture = self.capture.discard();
        both(durable, capture)
    }

    fn location(&self) -> Option<&Path> {
        self.durable.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 关闭时失败的目标
    struct FailingSink {
        written: Vec<u8>,
        closed: bool,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ReportSink for FailingSink {
        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Err(io::Error::other("disk full"))
        }
    }

    #[test]
    fn test_every_write_reaches_both_sinks() {
        let mut tee = ReportTee::with_capture(Vec::new(), Vec::new());
        tee.write_all(b"<a>").unwrap();
        tee.write_all(b"").unwrap();
        tee.flush().unwrap();
        tee.write_all(b"</a>").unwrap();
        tee.close().unwrap();
        let (durable, capture) = tee.into_parts();
        assert_eq!(durable, b"<a></a>".to_vec());
        assert_eq!(durable, capture);
    }

    #[test]
    fn test_close_attempts_both_and_reports_first_error() {
        let capture = FailingSink {
            written: Vec::new(),
            closed: false,
        };
        let mut tee = ReportTee::with_capture(Vec::new(), capture);
        tee.write_all(b"report").unwrap();
        let err = tee.close().unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        let (durable, capture) = tee.into_parts();
        assert!(capture.closed);
        assert_eq!(durable, capture.written);
    }

    #[test]
    fn test_durable_failure_still_closes_capture() {
        let durable = FailingSink {
            written: Vec::new(),
            closed: false,
        };
        let capture = FailingSink {
            written: Vec::new(),
            closed: false,
        };
        let mut tee = ReportTee::with_capture(durable, capture);
        assert!(tee.close().is_err());
        let (durable, capture) = tee.into_parts();
        assert!(durable.closed);
        assert!(capture.closed);
    }

    #[test]
    fn test_discard_clears_capture() {
        let mut tee = ReportTee::new(Vec::new());
        tee.write_all(b"partial").unwrap();
        tee.discard().unwrap();
        assert!(tee.captured().is_empty());
        assert!(tee.durable().is_empty());
    }
}
