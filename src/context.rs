use serde::Deserialize;

use crate::error::RelayError;

/// Header line that opens a non-empty context block.
pub const CONTEXT_HEADER: &str = "# File Context Block\n@files\n";

/// Trailer appended after the last file. The user's question follows it directly.
pub const CONTEXT_TRAILER: &str = "@end\n\n# User Message: \n\n";

/// A named line range inside a [`CodeFile`], e.g. `caching` at `15-30`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeSection {
    pub name: String,
    /// `"<start>-<end>"`, 1-based and inclusive. Not validated: a bad range
    /// renders the whole file instead of failing.
    pub lines: String,
}

/// A pasted source file the user wants the model to see.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeFile {
    pub filename: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<CodeSection>,
    pub code: String,
}

impl CodeFile {
    /// Build a file record. Filename and code are both required.
    pub fn new(
        filename: impl Into<String>,
        code: impl Into<String>,
        description: Option<String>,
    ) -> Result<Self, RelayError> {
        let file = Self {
            filename: filename.into(),
            description,
            sections: Vec::new(),
            code: code.into(),
        };
        file.validate()?;
        Ok(file)
    }

    /// Attach a section. Both name and line range must be non-empty; the range
    /// itself is only interpreted at render time.
    pub fn add_section(
        &mut self,
        name: impl Into<String>,
        lines: impl Into<String>,
    ) -> Result<(), RelayError> {
        let section = CodeSection {
            name: name.into(),
            lines: lines.into(),
        };
        if section.name.is_empty() || section.lines.is_empty() {
            return Err(RelayError::InvalidContext(
                "section name and lines are required".to_string(),
            ));
        }
        self.sections.push(section);
        Ok(())
    }

    /// Reject records the "add file" form would not accept.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.filename.is_empty() || self.code.is_empty() {
            return Err(RelayError::InvalidContext(
                "filename and code are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ordered list of files attached to the current prompt.
#[derive(Debug, Clone, Default)]
pub struct ContextFiles {
    files: Vec<CodeFile>,
}

impl ContextFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: CodeFile) -> Result<(), RelayError> {
        file.validate()?;
        self.files.push(file);
        Ok(())
    }

    /// Remove the file at `index`, returning it. Out of range is a no-op.
    pub fn remove(&mut self, index: usize) -> Option<CodeFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn files(&self) -> &[CodeFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn render(&self) -> String {
        format_context(&self.files)
    }
}

/// Render the file context block prepended to the user's question.
///
/// Returns an empty string for an empty list. The output depends only on
/// `files`, so repeated calls on the same list produce identical text.
pub fn format_context(files: &[CodeFile]) -> String {
    if files.is_empty() {
        return String::new();
    }

    let mut out = String::from(CONTEXT_HEADER);

    for file in files {
        let lang = language_for(&file.filename);
        out.push_str(&format!("{}:\n", file.filename));

        if let Some(description) = file.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("  description: \"{description}\"\n"));
        }

        if !file.sections.is_empty() {
            out.push_str("  sections:\n");
            for section in &file.sections {
                out.push_str(&format!("    - name: \"{}\"\n", section.name));
                out.push_str(&format!("      lines: {}\n", section.lines));
                out.push_str(&format!("      content: ```{lang}\n"));
                out.push_str(&format!(
                    "        {}\n",
                    extract_section(&file.code, &section.lines)
                ));
                out.push_str("        ```\n");
            }
        }

        out.push_str(&format!("  content: ```{lang}\n"));
        out.push_str(&file.code);
        out.push_str("\n  ```\n");
    }

    out.push_str(CONTEXT_TRAILER);
    out
}

/// The full `userMessage` a client submits: context block, then question.
pub fn compose_user_message(files: &[CodeFile], question: &str) -> String {
    let mut message = format_context(files);
    message.push_str(question);
    message
}

/// Slice `code` to the 1-based inclusive range in `lines` (`"3-5"`).
///
/// Any range that can't be honoured (unparsable bounds, `start` of 0,
/// `start > end`, `end` past the last line) yields the whole of `code`.
pub fn extract_section<'a>(code: &'a str, lines: &str) -> std::borrow::Cow<'a, str> {
    let code_lines: Vec<&str> = code.split('\n').collect();

    let Some((start, end)) = parse_range(lines) else {
        return code.into();
    };
    if start < 1 || start > end || end > code_lines.len() {
        return code.into();
    }

    code_lines[start - 1..end].join("\n").into()
}

/// Split `"<start>-<end>"` and read the leading digits of each side.
/// Anything after the second bound (`"1-2-3"`) is ignored.
fn parse_range(lines: &str) -> Option<(usize, usize)> {
    let mut parts = lines.split('-');
    let start = parse_leading_int(parts.next()?)?;
    let end = parse_leading_int(parts.next()?)?;
    Some((start, end))
}

fn parse_leading_int(s: &str) -> Option<usize> {
    let s = s.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    // Absurdly long digit runs can't be a valid line number anyway.
    s[..digits].parse().ok()
}

/// Code fence language for a filename, keyed on its lower-cased extension.
/// Unmapped extensions are returned as-is; no extension gives `""`.
pub fn language_for(filename: &str) -> String {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => return String::new(),
    };

    match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "css" => "css",
        "html" => "html",
        other => other,
    }
    .to_string()
}
