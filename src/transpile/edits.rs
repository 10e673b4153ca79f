//! Byte-range edits over the source text.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Replacement {
    /// Overwrite with spaces, keeping line breaks.
    Blank,
    Text(String),
}

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    replacement: Replacement,
}

#[derive(Debug, Default)]
pub(crate) struct EditList {
    edits: Vec<Edit>,
    appendix: Vec<String>,
}

impl EditList {
    pub(crate) fn blank(&mut self, start: usize, end: usize) {
        if start < end {
            self.edits.push(Edit {
                start,
                end,
                replacement: Replacement::Blank,
            });
        }
    }

    pub(crate) fn replace(&mut self, start: usize, end: usize, text: impl Into<String>) {
        self.edits.push(Edit {
            start,
            end,
            replacement: Replacement::Text(text.into()),
        });
    }

    pub(crate) fn insert(&mut self, at: usize, text: impl Into<String>) {
        self.replace(at, at, text);
    }

    /// Line appended after the module body.
    pub(crate) fn append_line(&mut self, line: impl Into<String>) {
        self.appendix.push(line.into());
    }

    /// Apply every edit. An edit that starts inside an earlier, wider edit is
    /// dropped, so blanking a whole declaration subsumes edits within it.
    pub(crate) fn apply(mut self, source: &str) -> String {
        self.edits
            .sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut out = String::with_capacity(source.len() + 64);
        let mut cursor = 0;
        for edit in &self.edits {
            if edit.start < cursor || edit.end > source.len() {
                continue;
            }
            out.push_str(&source[cursor..edit.start]);
            match &edit.replacement {
                Replacement::Blank => {
                    for ch in source[edit.start..edit.end].chars() {
                        out.push(if ch == '\n' || ch == '\r' { ch } else { ' ' });
                    }
                }
                Replacement::Text(text) => out.push_str(text),
            }
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);

        if !self.appendix.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            for line in &self.appendix {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}
