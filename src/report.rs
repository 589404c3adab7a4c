//! Summary statistics over a JSONL result file

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{MarbleError, Result};
use crate::evaluator::{coordination_score, task_score};

/// Scores recovered from one result line
#[derive(Debug, Clone, PartialEq)]
pub struct LineSummary {
    pub line: usize,
    pub run_id: String,
    pub termination: String,
    pub task_score: f64,
    pub coordination_score: f64,
    pub token_usage: u64,
    /// Numeric leaves of the requested field, dotted keys
    pub fields: BTreeMap<String, f64>,
}

/// A line that could not be summarized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub path: PathBuf,
    pub field: Option<String>,
    pub lines: Vec<LineSummary>,
    pub malformed: Vec<MalformedLine>,
}

impl Summary {
    pub fn token_total(&self) -> u64 {
        self.lines.iter().map(|l| l.token_usage).sum()
    }

    pub fn token_average(&self) -> f64 {
        if self.lines.is_empty() {
            return 0.0;
        }
        self.token_total() as f64 / self.lines.len() as f64
    }

    pub fn mean_task_score(&self) -> f64 {
        mean(self.lines.iter().map(|l| l.task_score))
    }

    pub fn mean_coordination_score(&self) -> f64 {
        mean(self.lines.iter().map(|l| l.coordination_score))
    }

    /// Average of each numeric leaf across the lines that carry it
    pub fn field_averages(&self) -> BTreeMap<String, f64> {
        let mut collected: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for line in &self.lines {
            for (key, value) in &line.fields {
                collected.entry(key.clone()).or_default().push(*value);
            }
        }
        collected
            .into_iter()
            .map(|(key, values)| (key, mean(values.into_iter())))
            .collect()
    }
}

/// Read a result file and compute per-line and aggregate scores.
///
/// `field` names a key of the `metrics` object (or of the line itself,
/// e.g. `usage`) whose numeric leaves are averaged.
pub fn summarize(path: &Path, field: Option<&str>) -> Result<Summary> {
    let content = fs::read_to_string(path)
        .map_err(|e| MarbleError::Output(format!("cannot read {}: {}", path.display(), e)))?;

    let mut lines = Vec::new();
    let mut malformed = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let number = index + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match summarize_line(number, raw, field) {
            Ok(summary) => lines.push(summary),
            Err(reason) => {
                log::warn!("{}:{}: {}", path.display(), number, reason);
                malformed.push(MalformedLine { line: number, reason });
            }
        }
    }

    Ok(Summary {
        path: path.to_path_buf(),
        field: field.map(str::to_string),
        lines,
        malformed,
    })
}

fn summarize_line(number: usize, raw: &str, field: Option<&str>) -> std::result::Result<LineSummary, String> {
    let data: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))?;
    let object = data.as_object().ok_or("line is not a JSON object")?;

    let run_id = object
        .get("run_id")
        .and_then(Value::as_str)
        .unwrap_or("-")
        .to_string();
    let termination = object
        .get("termination")
        .and_then(|t| t.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("-")
        .to_string();
    let token_usage = object.get("token_usage").and_then(Value::as_u64).unwrap_or(0);

    let metrics = object.get("metrics").cloned().unwrap_or(Value::Null);
    let (ts, cs) = scores_from(&metrics)?;

    let mut fields = BTreeMap::new();
    if let Some(name) = field {
        let selected = metrics.get(name).or_else(|| object.get(name));
        if let Some(value) = selected {
            flatten_numeric(value, name, &mut fields);
        }
    }

    Ok(LineSummary {
        line: number,
        run_id,
        termination,
        task_score: ts,
        coordination_score: cs,
        token_usage,
        fields,
    })
}

/// TS and CS recomputed from the raw judge numbers; unscored runs count as 0
fn scores_from(metrics: &Value) -> std::result::Result<(f64, f64), String> {
    if metrics.get("status").and_then(Value::as_str) != Some("scored") {
        return Ok((0.0, 0.0));
    }

    let kpis: BTreeMap<String, u32> = match metrics.get("agent_kpis") {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| format!("bad agent_kpis: {}", e))?,
        None => BTreeMap::new(),
    };
    let total = metrics.get("total_milestones").and_then(Value::as_u64).unwrap_or(0) as u32;
    let planning = number_list(metrics.get("planning_scores"))?;
    let communication = number_list(metrics.get("communication_scores"))?;

    Ok((
        task_score(&kpis, total, kpis.len()),
        coordination_score(&planning, &communication),
    ))
}

fn number_list(value: Option<&Value>) -> std::result::Result<Vec<f64>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| format!("non-numeric score {}", v)))
            .collect(),
        Some(other) => Err(format!("expected a list of scores, got {}", other)),
    }
}

fn flatten_numeric(value: &Value, prefix: &str, out: &mut BTreeMap<String, f64>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_numeric(child, &format!("{}.{}", prefix, key), out);
            }
        }
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                out.insert(prefix.to_string(), v);
            }
        }
        _ => {}
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64 * 10_000.0).round() / 10_000.0
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path.display())?;
        writeln!(f, "{:<6}{:<28}{:<10}{:<10}{:<10}{:>10}", "line", "run", "reason", "TS", "CS", "tokens")?;
        writeln!(f, "{}", "-".repeat(74))?;
        for line in &self.lines {
            writeln!(
                f,
                "{:<6}{:<28}{:<10}{:<10}{:<10}{:>10}",
                line.line, line.run_id, line.termination, line.task_score, line.coordination_score, line.token_usage
            )?;
        }
        for bad in &self.malformed {
            writeln!(f, "{:<6}ERROR {}", bad.line, bad.reason)?;
        }

        if self.lines.is_empty() {
            return writeln!(f, "no readable runs");
        }

        writeln!(f, "{}", "-".repeat(74))?;
        writeln!(
            f,
            "runs: {}  tokens: {} (avg {:.1})",
            self.lines.len(),
            self.token_total(),
            self.token_average()
        )?;
        let cs = self.mean_coordination_score();
        writeln!(
            f,
            "mean TS: {}  mean CS: {} ({:.2} / 100)",
            self.mean_task_score(),
            cs,
            cs * 20.0
        )?;

        if let Some(field) = &self.field {
            let averages = self.field_averages();
            if averages.is_empty() {
                writeln!(f, "no numeric values under '{}'", field)?;
            }
            for (key, value) in averages {
                writeln!(f, "  {}: {}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn scored_line(run_id: &str, kpis: &str, planning: &str, tokens: u64) -> String {
        format!(
            r#"{{"run_id":"{run_id}","termination":{{"reason":"cap","turn":3}},"token_usage":{tokens},"metrics":{{"status":"scored","judge":"mock/judge","criteria":{{"innovation":4.0,"safety":2.0}},"planning_scores":{planning},"communication_scores":[3.0],"total_milestones":4,"agent_kpis":{kpis},"task_score":0.0,"coordination_score":0.0,"agent_rewards":{{}}}}}}"#
        )
    }

    #[test]
    fn test_summarize_scores_and_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", scored_line("run-a", r#"{"a":2,"b":2}"#, "[4.0,-1.0]", 100)).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", scored_line("run-b", r#"{"a":4,"b":0}"#, "[2.0]", 50)).unwrap();

        let summary = summarize(file.path(), Some("criteria")).unwrap();
        assert_eq!(summary.lines.len(), 2);
        assert!(summary.malformed.is_empty());

        // 4 / (4 x 2)
        assert_eq!(summary.lines[0].task_score, 0.5);
        // planning mean over positives is 4, communication 3
        assert_eq!(summary.lines[0].coordination_score, 3.5);
        assert_eq!(summary.lines[1].coordination_score, 2.5);

        assert_eq!(summary.token_total(), 150);
        assert_eq!(summary.mean_coordination_score(), 3.0);

        let averages = summary.field_averages();
        assert_eq!(averages.get("criteria.innovation"), Some(&4.0));
        assert_eq!(averages.get("criteria.safety"), Some(&2.0));
    }

    #[test]
    fn test_malformed_lines_are_reported_and_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "[1, 2]").unwrap();
        writeln!(file, "{}", scored_line("run-a", r#"{"a":1}"#, "[5.0]", 10)).unwrap();

        let summary = summarize(file.path(), None).unwrap();
        assert_eq!(summary.lines.len(), 1);
        assert_eq!(summary.malformed.len(), 2);
        assert_eq!(summary.malformed[0].line, 1);
        assert_eq!(summary.malformed[1].line, 2);

        let rendered = summary.to_string();
        assert!(rendered.contains("ERROR"));
        assert!(rendered.contains("run-a"));
    }

    #[test]
    fn test_unscored_run_counts_as_zero() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"run_id":"run-x","termination":{{"reason":"failure","turn":1}},"token_usage":7,"metrics":{{"status":"unscored","reason":"run terminated by failure"}}}}"#
        )
        .unwrap();

        let summary = summarize(file.path(), None).unwrap();
        assert_eq!(summary.lines[0].task_score, 0.0);
        assert_eq!(summary.lines[0].termination, "failure");
        assert_eq!(summary.token_total(), 7);
    }

    #[test]
    fn test_missing_file_is_output_error() {
        let err = summarize(Path::new("/nonexistent/results.jsonl"), None).unwrap_err();
        assert!(matches!(err, MarbleError::Output(_)));
    }
}
