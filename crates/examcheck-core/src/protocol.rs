//! Time-stamped answer protocols.

use crate::error::DomainError;

/// Current wall clock time as `HH:MM:SS`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Render a value on a single protocol line.
pub fn escape(value: &str) -> String {
    value.replace('\r', "\\r").replace('\n', "\\n")
}

/// Log of what a worker chose and verified for one question.
#[derive(Debug, Clone, Default)]
pub struct AnswerProtocol {
    title: String,
    lines: Vec<String>,
}

impl AnswerProtocol {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn add(&mut self, text: &str) {
        self.lines
            .push(format!("{} [{}] {}", timestamp(), self.title, escape(text)));
    }

    pub fn choose(&mut self, key: &[String], value: &str) {
        self.add(&format!("chose '{}' for '{}'.", escape(value), key.join(" / ")));
    }

    /// Compare what the UI shows against what was entered.
    ///
    /// A mismatch after a simulated crash means autosave lost data; any other
    /// mismatch means the stored answer is corrupt.
    pub fn verify(
        &mut self,
        key: &[String],
        expected: &str,
        actual: &str,
        after_crash: bool,
    ) -> Result<(), DomainError> {
        let name = key.join(" / ");
        if expected == actual {
            self.add(&format!("verified '{}' for '{name}'.", escape(actual)));
            return Ok(());
        }
        let message = format!(
            "expected '{}' for '{name}' of question '{}', but found '{}'",
            escape(expected),
            self.title,
            escape(actual)
        );
        self.add(&format!("FAIL: {message}."));
        if after_crash {
            Err(DomainError::auto_save(format!("{message} after crash")))
        } else {
            Err(DomainError::integrity(message))
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}
