use anyhow::Result;
use serde::Serialize;
use std::io::IsTerminal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// `--json` wins over `--format`; anything but "json" renders text.
    pub fn from_flags(json: bool, format: Option<&str>) -> Self {
        if json {
            return Self::Json;
        }
        match format {
            Some(f) if f.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub use_color: bool,
}

impl OutputOptions {
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Print `value` to stdout as JSON, pretty when requested.
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{}", json);
        Ok(())
    }
}

pub fn detect_color(color_flag: bool) -> bool {
    if !color_flag {
        return false;
    }
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_overrides_format() {
        assert_eq!(OutputFormat::from_flags(true, Some("text")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, Some("JSON")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, Some("yaml")), OutputFormat::Text);
        assert_eq!(OutputFormat::from_flags(false, None), OutputFormat::Text);
    }

    #[test]
    fn color_disabled_by_flag() {
        assert!(!detect_color(false));
    }
}
