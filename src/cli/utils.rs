use serde_json::{json, Value};
use crate::cli::OutputFormat;
use crate::provision::SkippedStep;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message,
                "completed_at": chrono::Utc::now(),
            });

            if let (Some(object), Some(Value::Object(data_value))) = (response.as_object_mut(), data) {
                object.extend(data_value);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// List skipped advisory steps; JSON output already carries them in the report
pub fn output_skipped(output_format: &OutputFormat, skipped: &[SkippedStep]) {
    if let OutputFormat::Text = output_format {
        if skipped.is_empty() {
            return;
        }
        println!("! {} step(s) skipped:", skipped.len());
        for step in skipped {
            let first_line = step.error.lines().next().unwrap_or_default();
            println!("  - {}: {}", step.step, first_line);
        }
    }
}

/// Print `label: value` pairs aligned for text output
pub fn output_fields(output_format: &OutputFormat, fields: &[(&str, &str)]) {
    if let OutputFormat::Text = output_format {
        let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        for (label, value) in fields {
            println!("  {:<width$}  {}", label, value, width = width);
        }
    }
}
