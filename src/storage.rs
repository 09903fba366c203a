//! Report persistence: auto-save history, JSON/CSV export, and local document input.

use crate::model::{BoxPlotReport, RawResponse};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "backtest-boxplot";

fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join(APP_DIR).join("runs"))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn report_file_name(report: &BoxPlotReport) -> String {
    let backtest: String = report
        .backtest_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(
        "{}-{}-{}.json",
        report.timestamp_utc.replace(':', "-"),
        backtest,
        &report.run_id[..8.min(report.run_id.len())]
    )
}

/// Save a report to the auto-save directory and return its path.
pub fn save_report(report: &BoxPlotReport) -> Result<PathBuf> {
    save_report_in(&runs_dir()?, report)
}

fn save_report_in(dir: &Path, report: &BoxPlotReport) -> Result<PathBuf> {
    let path = dir.join(report_file_name(report));
    export_json(&path, report)?;
    tracing::debug!(path = %path.display(), "report saved");
    Ok(path)
}

/// Load up to `limit` saved reports, newest first.
pub fn load_recent(limit: usize) -> Result<Vec<BoxPlotReport>> {
    load_recent_in(&runs_dir()?, limit)
}

fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<BoxPlotReport>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    // File names start with an RFC 3339 timestamp, so name order is time order.
    files.sort();
    files.reverse();

    let mut out = Vec::new();
    for path in files {
        if out.len() >= limit {
            break;
        }
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable report");
                continue;
            }
        };
        match serde_json::from_slice::<BoxPlotReport>(&data) {
            Ok(r) => out.push(r),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed report")
            }
        }
    }
    Ok(out)
}

/// Write a report as pretty-printed JSON.
pub fn export_json(path: &Path, report: &BoxPlotReport) -> Result<()> {
    ensure_parent(path)?;
    let data = serde_json::to_vec_pretty(report).context("serialize report")?;
    fs::write(path, data).with_context(|| format!("write {}", path.display()))
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_number(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

/// Write the report's records as CSV, one row per subgroup.
pub fn export_csv(path: &Path, report: &BoxPlotReport) -> Result<()> {
    ensure_parent(path)?;
    let mut f = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    writeln!(f, "group,subgroup,mu,sd,n,value")?;
    for r in &report.records {
        writeln!(
            f,
            "{},{},{},{},{},{}",
            csv_field(&r.group),
            csv_field(&r.subgroup),
            csv_number(r.stats.mu),
            csv_number(r.stats.sd),
            r.stats.n,
            csv_number(r.stats.value)
        )?;
    }
    f.flush()?;
    Ok(())
}

/// Read a box-plot document from disk instead of fetching it.
pub fn load_document(path: &Path) -> Result<RawResponse> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    crate::engine::decode_document(&data).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Statistics, SummaryRecord};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "backtest-boxplot-{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn report(ts: &str, run_id: &str) -> BoxPlotReport {
        BoxPlotReport {
            timestamp_utc: ts.to_string(),
            run_id: run_id.to_string(),
            backtest_id: "bt".to_string(),
            source: "test".to_string(),
            records: vec![
                SummaryRecord {
                    group: "G1".into(),
                    subgroup: "A, \"quoted\"".into(),
                    stats: Statistics {
                        mu: 2.0,
                        sd: 0.5,
                        n: 3,
                        value: 2.0,
                    },
                },
                SummaryRecord {
                    group: "G1".into(),
                    subgroup: "empty".into(),
                    stats: Statistics {
                        mu: f64::NAN,
                        sd: f64::NAN,
                        n: 0,
                        value: f64::NAN,
                    },
                },
            ],
        }
    }

    #[test]
    fn csv_quotes_and_blanks_nan() {
        let dir = scratch_dir("csv");
        let path = dir.join("nested").join("out.csv");
        export_csv(&path, &report("2026-01-01T00:00:00Z", "123")).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "group,subgroup,mu,sd,n,value");
        assert_eq!(lines[1], "G1,\"A, \"\"quoted\"\"\",2,0.5,3,2");
        assert_eq!(lines[2], "G1,empty,,,0,");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn saved_reports_load_newest_first() {
        let dir = scratch_dir("history");
        save_report_in(&dir, &report("2026-01-01T00:00:00Z", "11111111")).unwrap();
        save_report_in(&dir, &report("2026-03-01T00:00:00Z", "33333333")).unwrap();
        save_report_in(&dir, &report("2026-02-01T00:00:00Z", "22222222")).unwrap();
        fs::write(dir.join("junk.json"), b"not json").unwrap();

        let loaded = load_recent_in(&dir, 2).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["33333333", "22222222"]);
        assert!(loaded[0].records[1].stats.mu.is_nan());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn same_run_saves_each_backtest_separately() {
        let dir = scratch_dir("same-run");
        let mut alpha = report("2026-01-01T00:00:00Z", "44444444");
        alpha.backtest_id = "alpha".into();
        let mut beta = alpha.clone();
        beta.backtest_id = "beta/../x".into();

        let a = save_report_in(&dir, &alpha).unwrap();
        let b = save_report_in(&dir, &beta).unwrap();
        assert_ne!(a, b);
        assert_eq!(b.parent(), Some(dir.as_path()));
        assert_eq!(
            a.file_name().and_then(|n| n.to_str()),
            Some("2026-01-01T00-00-00Z-alpha-44444444.json")
        );

        let mut ids: Vec<String> = load_recent_in(&dir, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.backtest_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["alpha", "beta/../x"]);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_history_dir_is_empty() {
        let dir = std::env::temp_dir().join("backtest-boxplot-does-not-exist-9f2c");
        assert!(load_recent_in(&dir, 5).unwrap().is_empty());
    }

    #[test]
    fn load_document_from_file() {
        let dir = scratch_dir("doc");
        let path = dir.join("doc.json");
        fs::write(&path, r#"{"G1": {"x": ["A"], "y": [4]}}"#).unwrap();
        let raw = load_document(&path).unwrap();
        assert_eq!(raw.groups[0].0, "G1");

        let err = load_document(&dir.join("missing.json")).unwrap_err();
        assert!(err.to_string().starts_with("read "));
        fs::remove_dir_all(dir).ok();
    }
}
