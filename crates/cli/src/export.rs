use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use retainer_orchestrator::{RetentionCandidate, RunReport};
use std::path::{Path, PathBuf};

fn stamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d_%H%M%S").to_string()
}

/// Quotes a text field, doubling embedded quotes.
fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// `name,id,size_mb,last_reload` with every non-numeric field quoted.
pub fn stale_apps_csv(apps: &[&RetentionCandidate]) -> String {
    let mut out = ["name", "id", "size_mb", "last_reload"]
        .map(quoted)
        .join(",");
    out.push('\n');
    for app in apps {
        let last_reload = app
            .last_reload
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{:.2},{}\n",
            quoted(&app.name),
            quoted(&app.app_id),
            app.size_mb(),
            quoted(&last_reload)
        ));
    }
    out
}

pub fn write_stale_apps(dir: &Path, apps: &[&RetentionCandidate]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("stale_apps_{}.csv", stamp(Local::now())));
    std::fs::write(&path, stale_apps_csv(apps)).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn write_run_report(dir: &Path, report: &RunReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!(
        "run_report_{}.json",
        stamp(report.started_at.with_timezone(&Local))
    ));
    let json = serde_json::to_string_pretty(&report.to_document())?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use retainer_orchestrator::OutcomeKind;
    use retainer_orchestrator::TruncationOutcome;
    use std::time::Duration;

    #[test]
    fn test_csv_quotes_text_but_not_sizes() {
        let app = RetentionCandidate::new("a1", "Sales \"EU\"")
            .reloaded_at(Utc.with_ymd_and_hms(2021, 3, 4, 10, 11, 12).unwrap())
            .with_size(3 * 1024 * 1024);
        let unknown = RetentionCandidate::new("b2", "Scratch");

        let csv = stale_apps_csv(&[&app, &unknown]);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], r#""name","id","size_mb","last_reload""#);
        assert_eq!(lines[1], r#""Sales ""EU""","a1",3.00,"2021-03-04 10:11:12""#);
        assert_eq!(lines[2], r#""Scratch","b2",0.00,"""#);
    }

    #[test]
    fn test_run_report_lands_in_report_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new(Utc::now());
        report.outcomes.push(TruncationOutcome {
            app_id: "a1".into(),
            name: "Sales".into(),
            size_bytes: 10,
            kind: OutcomeKind::Truncated,
            elapsed: Duration::from_millis(3),
        });

        let path = write_run_report(&dir.path().join("reports"), &report).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("run_report_") && name.ends_with(".json"));

        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["outcomes"][0]["outcome"], "truncated");
        assert_eq!(doc["summary"]["truncated"], 1);
    }

    #[test]
    fn test_stale_apps_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let app = RetentionCandidate::new("a1", "Sales");
        let path = write_stale_apps(dir.path(), &[&app]).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("stale_apps_"));
        assert!(std::fs::read_to_string(path).unwrap().contains("\"a1\""));
    }
}
