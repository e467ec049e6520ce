use crate::domain::ports::Storage;
use crate::utils::error::Result;
use std::io::{BufRead, Write};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = Path::new(&self.base_path).join(path);
        let data = tokio::fs::read(full_path).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = Path::new(&self.base_path).join(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // write then rename so a crash never leaves half an entries file
        let tmp_path = full_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &full_path).await?;
        Ok(())
    }
}

/// Asks for a value on `output`, returning `default` on an empty answer.
pub fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
    default: Option<&str>,
) -> Result<Option<String>> {
    match default {
        Some(d) if !d.is_empty() => write!(output, "{:<10}[{}]: ", label, d)?,
        _ => write!(output, "{:<10}: ", label)?,
    }
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(answer_or_default(&line, default))
}

/// Asks for a secret on the terminal without echoing it. An empty answer
/// keeps `current`, which is never displayed.
#[cfg(feature = "cli")]
pub fn prompt_password(label: &str, current: Option<&str>) -> Result<Option<String>> {
    let shown = match current {
        Some(c) if !c.is_empty() => format!("{:<10}[unchanged]: ", label),
        _ => format!("{:<10}: ", label),
    };
    let line = rpassword::prompt_password(shown)?;
    Ok(answer_or_default(&line, current))
}

fn answer_or_default(line: &str, default: Option<&str>) -> Option<String> {
    let answer = line.trim_end_matches(['\r', '\n']);
    if answer.is_empty() {
        default.filter(|d| !d.is_empty()).map(str::to_string)
    } else {
        Some(answer.to_string())
    }
}
