//! 诊断输出
//!
//! 所有异常都通过 [`Diagnostics`] 上报，核心代码从不直接写标准输出。
//! 宿主程序决定诊断的去向：日志、控制台面板或测试中的内存记录。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// 严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Diagnostic,
    Default,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Diagnostic => "diagnostic",
            Severity::Default => "default",
        };
        f.write_str(name)
    }
}

/// 诊断接收器
pub trait Diagnostics: Send + Sync {
    fn report(&self, severity: Severity, message: &str);

    fn error(&self, message: &str) {
        self.report(Severity::Error, message);
    }

    fn warning(&self, message: &str) {
        self.report(Severity::Warning, message);
    }

    fn diagnostic(&self, message: &str) {
        self.report(Severity::Diagnostic, message);
    }

    fn note(&self, message: &str) {
        self.report(Severity::Default, message);
    }
}

/// 转发到 `tracing` 的诊断接收器
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => tracing::error!("{}", message),
            Severity::Warning => tracing::warn!("{}", message),
            Severity::Diagnostic => tracing::debug!("{}", message),
            Severity::Default => tracing::info!("{}", message),
        }
    }
}

/// 一条诊断记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub severity: Severity,
    pub message: String,
}

/// 在内存中收集诊断
///
/// 克隆共享同一份记录，宿主保留一个克隆即可在之后读取。
#[derive(Debug, Clone, Default)]
pub struct RecordingDiagnostics {
    entries: Arc<Mutex<Vec<DiagnosticEntry>>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.lock().clone()
    }

    /// 指定级别的记录数
    pub fn count(&self, severity: Severity) -> usize {
        self.lock().iter().filter(|e| e.severity == severity).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DiagnosticEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn report(&self, severity: Severity, message: &str) {
        TracingDiagnostics.report(severity, message);
        self.lock().push(DiagnosticEntry {
            severity,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_shared_between_clones() {
        let sink = RecordingDiagnostics::new();
        let handle = sink.clone();

        sink.warning("tree out of sync");
        sink.note("opened");
        sink.error("compensation failed");

        assert_eq!(handle.entries().len(), 3);
        assert_eq!(handle.count(Severity::Warning), 1);
        assert_eq!(handle.count(Severity::Diagnostic), 0);
        assert_eq!(handle.entries()[0].message, "tree out of sync");

        handle.clear();
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Warning.to_string(), "warning");
        assert_eq!(Severity::Default.to_string(), "default");
    }
}
