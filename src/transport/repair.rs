//! Best-effort repair of malformed JSON payloads.
//!
//! Upstream services (and the models behind them) regularly emit JSON that is
//! almost right. Each repair pass below targets one observed failure shape and
//! the parse is retried after every pass, so the cheapest fix wins:
//!
//! 1. Markdown code fences around the payload
//! 2. Trailing commas before `}` / `]`
//! 3. Unquoted object keys (`{name: "x"}`)
//! 4. Truncation: unterminated strings, dangling `,` / `:`, unclosed brackets
//! 5. Raw control characters inside the payload

use serde_json::Value;

/// Parse `raw` as JSON, repairing it if needed. `None` if every pass fails.
pub fn repair_json(raw: &str) -> Option<Value> {
    if let Some(v) = try_parse(raw) {
        return Some(v);
    }

    let mut repaired = strip_code_fences(raw).to_string();
    if let Some(v) = try_parse(&repaired) {
        return Some(v);
    }

    repaired = repair_trailing_commas(&repaired);
    if let Some(v) = try_parse(&repaired) {
        return Some(v);
    }

    repaired = quote_unquoted_keys(&repaired);
    if let Some(v) = try_parse(&repaired) {
        return Some(v);
    }

    repaired = close_truncated(&repaired);
    if let Some(v) = try_parse(&repaired) {
        return Some(v);
    }

    // Truncation repair may expose a comma that is now trailing.
    repaired = repair_trailing_commas(&repaired);
    if let Some(v) = try_parse(&repaired) {
        return Some(v);
    }

    repaired = strip_control_characters(&repaired);
    try_parse(&repaired)
}

fn try_parse(input: &str) -> Option<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

// ─── Passes ──────────────────────────────────────────────────────────────────

/// Strip a surrounding ```` ```json ... ``` ```` fence.
fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return input;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body)
}

/// Remove commas that directly precede `}` or `]`, outside strings.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());
    let mut scanner = StringScanner::default();

    for (i, &ch) in chars.iter().enumerate() {
        if !scanner.in_string() && ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        scanner.feed(ch);
        result.push(ch);
    }

    result
}

/// Wrap bare identifier keys in double quotes: `{a: 1}` → `{"a": 1}`.
fn quote_unquoted_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len() + 8);
    let mut scanner = StringScanner::default();
    // Whether the previous significant character was `{` or `,`.
    let mut expecting_key = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if !scanner.in_string() && expecting_key && is_ident_start(ch) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if j < chars.len() && chars[j] == ':' {
                result.push('"');
                result.push_str(&ident);
                result.push('"');
            } else {
                result.push_str(&ident);
            }
            expecting_key = false;
            continue;
        }

        scanner.feed(ch);
        if !scanner.in_string() && !ch.is_whitespace() {
            expecting_key = ch == '{' || ch == ',';
        }
        result.push(ch);
        i += 1;
    }

    result
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '-'
}

/// Complete a payload that was cut off mid-stream.
fn close_truncated(input: &str) -> String {
    let mut scanner = StringScanner::default();
    let mut stack: Vec<char> = Vec::new();

    for ch in input.chars() {
        let was_in_string = scanner.in_string();
        scanner.feed(ch);
        if was_in_string || scanner.in_string() {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = input.trim_end().to_string();

    if scanner.in_string() {
        if scanner.escape_pending() {
            result.pop();
        }
        result.push('"');
    } else {
        let trimmed_len = result.trim_end().len();
        result.truncate(trimmed_len);
        if result.ends_with(',') {
            result.pop();
        } else if result.ends_with(':') {
            result.push_str(" null");
        }
    }

    while let Some(closer) = stack.pop() {
        result.push(closer);
    }

    result
}

/// Drop control characters other than `\n`, `\r` and `\t`.
fn strip_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

// ─── String-state tracking ───────────────────────────────────────────────────

/// Tracks whether a character-by-character scan is inside a JSON string.
#[derive(Default)]
struct StringScanner {
    in_string: bool,
    escape_next: bool,
}

impl StringScanner {
    fn feed(&mut self, ch: char) {
        if self.escape_next {
            self.escape_next = false;
            return;
        }
        if self.in_string && ch == '\\' {
            self.escape_next = true;
            return;
        }
        if ch == '"' {
            self.in_string = !self.in_string;
        }
    }

    fn in_string(&self) -> bool {
        self.in_string
    }

    fn escape_pending(&self) -> bool {
        self.escape_next
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
