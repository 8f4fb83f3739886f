use std::path::Path;

use crate::error::Error;

/// One line of an input script.
///
/// A blank line is valid and means "send a bare terminator". Some lines
/// are recognized by naming convention, e.g. a command containing `exit`
/// gets an extended drain wait via the device profile's timing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine(String);

impl ScriptLine {
    /// A script line from raw text. Surrounding whitespace is dropped;
    /// the terminator is appended at send time per device profile.
    pub fn new<S: AsRef<str>>(text: S) -> Self {
        Self(text.as_ref().trim().to_string())
    }

    /// The command text, without terminator.
    pub fn text(&self) -> &str {
        &self.0
    }

    /// A blank line sends a bare terminator.
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }

    /// The first whitespace-separated token, used for progress output
    /// so that command arguments (which may hold secrets) stay off the
    /// console.
    pub fn first_token(&self) -> Option<&str> {
        self.0.split_whitespace().next()
    }
}

/// An operator-authored command script, consumed strictly in file order.
#[derive(Debug, Clone, Default)]
pub struct Script {
    lines: Vec<ScriptLine>,
}

impl Script {
    /// Load a script from a UTF-8 text file, one command per line.
    pub fn new_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;

        Ok(Self::from_text(&text))
    }

    /// A script from in-memory text.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(ScriptLine::new).collect(),
        }
    }

    /// Number of script lines, blank ones included.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if the script has no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The lines in file order.
    pub fn into_lines(self) -> Vec<ScriptLine> {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lines_keep_file_order() {
        let script = Script::from_text("ping\nstatus\nexit\n");

        let texts: Vec<_> = script
            .into_lines()
            .iter()
            .map(|l| l.text().to_string())
            .collect();

        assert_eq!(texts, vec!["ping", "status", "exit"]);
    }

    #[test]
    fn blank_lines_are_kept() {
        let script = Script::from_text("ping\n\nexit\n");

        assert_eq!(script.len(), 3);
        assert!(script.into_lines()[1].is_blank());
    }

    #[test]
    fn first_token_hides_arguments() {
        let line = ScriptLine::new("set_wifi my-ssid my-secret-password");

        assert_eq!(line.first_token(), Some("set_wifi"));
    }

    #[test]
    fn blank_line_has_no_token() {
        assert_eq!(ScriptLine::new("   ").first_token(), None);
    }
}
