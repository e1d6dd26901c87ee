//! Parser for the editable knowledge base text.
//!
//! Entries are delimited by `[KB_ID: ...]` marker lines:
//!
//! ```text
//! [KB_ID: KB_VPN_01]
//! Use case: VPN will not connect from a laptop
//! Required info:
//! - OS version
//! - error message
//! Solution:
//! 1. Reset the VPN adapter
//! 2. Re-enter the pre-shared key
//! ```

use tickethive_schema::KbEntry;

/// Parse the full KB text into entries. Malformed entries (missing use case
/// or solution) are skipped with a warning; the caller decides whether an
/// empty result is an error.
pub fn parse_kb_text(text: &str) -> Vec<KbEntry> {
    let mut entries = Vec::new();
    let mut current: Option<EntryBuilder> = None;

    for line in text.lines() {
        if let Some(kb_id) = parse_marker(line) {
            if let Some(builder) = current.take() {
                finish_entry(builder, &mut entries);
            }
            current = Some(EntryBuilder::new(kb_id));
            continue;
        }

        let Some(builder) = current.as_mut() else {
            continue;
        };
        builder.feed(line);
    }

    if let Some(builder) = current.take() {
        finish_entry(builder, &mut entries);
    }

    entries
}

fn finish_entry(builder: EntryBuilder, entries: &mut Vec<KbEntry>) {
    match builder.build() {
        Some(entry) => entries.push(entry),
        None => tracing::warn!("skipping malformed KB entry (missing use case or solution)"),
    }
}

/// `[KB_ID: KB_VPN_01]` -> `KB_VPN_01`
fn parse_marker(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix("[KB_ID:")?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

#[derive(PartialEq)]
enum Section {
    Preamble,
    RequiredInfo,
    Solution,
}

struct EntryBuilder {
    kb_id: String,
    use_case: String,
    required_info: Vec<String>,
    solution_lines: Vec<String>,
    section: Section,
}

impl EntryBuilder {
    fn new(kb_id: String) -> Self {
        Self {
            kb_id,
            use_case: String::new(),
            required_info: Vec::new(),
            solution_lines: Vec::new(),
            section: Section::Preamble,
        }
    }

    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(rest) = strip_prefix_ci(trimmed, &lower, "use case:") {
            self.use_case = rest.trim().to_string();
            self.section = Section::Preamble;
        } else if lower == "required info:" {
            self.section = Section::RequiredInfo;
        } else if lower == "solution:" {
            self.section = Section::Solution;
        } else {
            match self.section {
                Section::RequiredInfo => {
                    if let Some(field) = trimmed
                        .strip_prefix('-')
                        .or_else(|| trimmed.strip_prefix('*'))
                    {
                        let field = field.trim();
                        if !field.is_empty() {
                            self.required_info.push(field.to_string());
                        }
                    }
                }
                Section::Solution => self.solution_lines.push(line.to_string()),
                Section::Preamble => {}
            }
        }
    }

    fn build(self) -> Option<KbEntry> {
        let solution_steps = self.solution_lines.join("\n").trim().to_string();
        if self.use_case.is_empty() || solution_steps.is_empty() {
            return None;
        }
        Some(KbEntry {
            kb_id: self.kb_id,
            use_case: self.use_case,
            required_info: self.required_info,
            solution_steps,
        })
    }
}

fn strip_prefix_ci<'a>(original: &'a str, lower: &str, prefix: &str) -> Option<&'a str> {
    if lower.starts_with(prefix) {
        Some(&original[prefix.len()..])
    } else {
        None
    }
}
