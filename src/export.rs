use anyhow::Context;
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StudentExportRow {
    pub admission_no: String,
    pub first_name: String,
    pub last_name: String,
    pub class_name: String,
    pub section_name: Option<String>,
    pub status: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub row_count: usize,
}

const HEADER: &str = "admission_no,first_name,last_name,class,section,status,email,phone";

/// Write the selected students as one CSV file under <workspace>/exports/.
/// One batched call per export, never one call per record.
pub fn export_students_csv(
    workspace: &Path,
    rows: &[StudentExportRow],
) -> anyhow::Result<ExportSummary> {
    let dir = workspace.join("exports");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("students-{}.csv", stamp));
    let mut out = File::create(&path)
        .with_context(|| format!("failed to create export file {}", path.to_string_lossy()))?;

    writeln!(out, "{}", HEADER).context("failed to write export header")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            csv_field(&row.admission_no),
            csv_field(&row.first_name),
            csv_field(&row.last_name),
            csv_field(&row.class_name),
            csv_field(row.section_name.as_deref().unwrap_or("")),
            csv_field(&row.status),
            csv_field(row.email.as_deref().unwrap_or("")),
            csv_field(row.phone.as_deref().unwrap_or("")),
        )
        .context("failed to write export row")?;
    }
    out.flush().context("failed to flush export file")?;

    Ok(ExportSummary {
        path,
        row_count: rows.len(),
    })
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_pass_through_unquoted() {
        assert_eq!(csv_field("Maria"), "Maria");
        assert_eq!(csv_field(""), "");
    }

    #[test]
    fn fields_with_separators_are_quoted_and_escaped() {
        assert_eq!(csv_field("Lopez, Maria"), "\"Lopez, Maria\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn export_writes_header_plus_one_line_per_student() {
        let dir = std::env::temp_dir().join(format!(
            "schoolhub-export-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let rows = vec![
            StudentExportRow {
                admission_no: "A-001".into(),
                first_name: "Maria".into(),
                last_name: "Lopez".into(),
                class_name: "7B".into(),
                section_name: Some("Blue".into()),
                status: "Active".into(),
                email: Some("maria@example.com".into()),
                phone: None,
            },
            StudentExportRow {
                admission_no: "A-002".into(),
                first_name: "Mark".into(),
                last_name: "Twain".into(),
                class_name: "7B".into(),
                section_name: None,
                status: "Inactive".into(),
                email: None,
                phone: Some("555-0102".into()),
            },
        ];
        let summary = export_students_csv(&dir, &rows).expect("export");
        assert_eq!(summary.row_count, 2);

        let text = std::fs::read_to_string(&summary.path).expect("read export");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("A-001,Maria,Lopez,7B,Blue,Active"));
        assert!(lines[2].ends_with("555-0102"));
    }
}
