use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::handle::{CanonicalRecord, FieldMap, Severity};

/// An error captured into a log record's error field.
///
/// Serializes as `{"message": ..., "stack": ...}`; the stack is either
/// a raw trace string handed over by a compatibility caller or the
/// joined source chain of a Rust error.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedError {
    pub message: String,
    pub stack: Option<String>,
}

impl CapturedError {
    pub fn new(message: impl Into<String>) -> Self {
        CapturedError {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Captures a Rust error, folding its source chain into the stack.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        let mut captured = CapturedError::new(err.to_string());
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        if !causes.is_empty() {
            captured.stack = Some(causes.join("\n"));
        }
        captured
    }

    /// Message text to emit for this error, `"Error"` when empty.
    pub fn message_or_default(&self) -> String {
        if self.message.is_empty() {
            "Error".to_string()
        } else {
            self.message.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.stack {
            Some(stack) => json!({ "message": self.message, "stack": stack }),
            None => json!({ "message": self.message }),
        }
    }
}

/// The heterogeneous first argument of a severity call.
///
/// Conversions keep the normalization total: string values become
/// [`Text`], objects and arrays become [`Fields`], and remaining
/// primitives are stringified into [`Text`].
///
/// [`Text`]: LogMessage::Text
/// [`Fields`]: LogMessage::Fields
#[derive(Clone, Debug, PartialEq)]
pub enum LogMessage {
    Text(String),
    Fields(Value),
    Failure(CapturedError),
}

impl From<&str> for LogMessage {
    fn from(message: &str) -> Self {
        LogMessage::Text(message.to_string())
    }
}

impl From<String> for LogMessage {
    fn from(message: String) -> Self {
        LogMessage::Text(message)
    }
}

impl From<Value> for LogMessage {
    fn from(message: Value) -> Self {
        match message {
            Value::String(text) => LogMessage::Text(text),
            Value::Object(_) | Value::Array(_) => LogMessage::Fields(message),
            other => LogMessage::Text(other.to_string()),
        }
    }
}

impl From<CapturedError> for LogMessage {
    fn from(err: CapturedError) -> Self {
        LogMessage::Failure(err)
    }
}

impl LogMessage {
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        LogMessage::Failure(CapturedError::from_error(err))
    }
}

/// Reduces every call shape to one [`CanonicalRecord`].
///
/// The algorithm is total: no input combination fails, the worst case
/// is a stringified message with untouched positional values.
pub struct Normalizer {
    context_field: String,
    error_field: String,
}

impl Normalizer {
    pub fn new(context_field: impl Into<String>, error_field: impl Into<String>) -> Self {
        Normalizer {
            context_field: context_field.into(),
            error_field: error_field.into(),
        }
    }

    /// Normalization pipeline, in order: trailing-context extraction,
    /// the merge-vs-interpolate decision on the remaining tail, then
    /// the message guard chain.
    pub fn normalize(
        &self,
        severity: Severity,
        message: LogMessage,
        params: Vec<Value>,
    ) -> CanonicalRecord {
        let mut fields = FieldMap::new();
        let mut args = params;

        // the last positional value is always the context, whatever its
        // type
        if let Some(context) = args.pop() {
            fields.insert(self.context_field.clone(), context);
        }

        let placeholders = match &message {
            LogMessage::Text(text) => count_placeholders(text),
            _ => 0,
        };

        // a trailing object is merged unless the message has
        // placeholders left to feed; empty objects still merge
        if placeholders == 0
            && matches!(args.last(), Some(Value::Object(_)) | Some(Value::Array(_)))
        {
            if let Some(tail) = args.pop() {
                merge_into(&mut fields, tail);
            }
        }

        match message {
            LogMessage::Failure(err) => {
                let text = err.message_or_default();
                fields.insert(self.error_field.clone(), err.to_value());
                CanonicalRecord {
                    fields,
                    message: Some(text),
                    args,
                }
            }
            LogMessage::Text(text) if severity == Severity::Error && is_stack_string(&args) => {
                // compatibility shim: some upstream exception handlers
                // pass (message, stack-trace-string) positionally
                // instead of an error value; rebuild the error from the
                // two halves and drop the message slot entirely
                let stack = match args.first().and_then(Value::as_str) {
                    Some(stack) => stack.to_string(),
                    None => String::new(),
                };
                let err = CapturedError::new(text).with_stack(stack);
                fields.insert(self.error_field.clone(), err.to_value());
                CanonicalRecord {
                    fields,
                    message: None,
                    args: Vec::new(),
                }
            }
            LogMessage::Fields(value) => {
                merge_into(&mut fields, value);
                CanonicalRecord {
                    fields,
                    message: None,
                    args,
                }
            }
            LogMessage::Text(text) => CanonicalRecord {
                fields,
                message: Some(text),
                args,
            },
        }
    }
}

/// Shallow-merges an object's entries into `fields`; arrays merge as
/// index-keyed entries, anything else is ignored.
pub(crate) fn merge_into(fields: &mut FieldMap, value: Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map {
                fields.insert(key, entry);
            }
        }
        Value::Array(items) => {
            for (index, entry) in items.into_iter().enumerate() {
                fields.insert(index.to_string(), entry);
            }
        }
        _ => {}
    }
}

/// Counts `%s %d %j %o` markers; `%%` escapes a literal percent.
pub(crate) fn count_placeholders(message: &str) -> usize {
    let mut count = 0;
    let mut chars = message.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some('s' | 'd' | 'j' | 'o') = chars.next() {
                count += 1;
            }
        }
    }
    count
}

fn stack_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s+at ").expect("stack pattern is valid"))
}

fn is_stack_string(args: &[Value]) -> bool {
    if args.len() != 1 {
        return false;
    }
    match args[0].as_str() {
        Some(text) => stack_pattern().is_match(text),
        None => false,
    }
}

/// Renders the final message text, substituting placeholders from
/// `args` in order. Unfed markers stay literal; leftover values are
/// appended.
pub(crate) fn render_message(message: Option<&str>, args: &[Value]) -> String {
    let mut remaining = args.iter();

    let mut out = match message {
        Some(message) => {
            let mut out = String::with_capacity(message.len());
            let mut chars = message.chars().peekable();
            while let Some(c) = chars.next() {
                if c != '%' {
                    out.push(c);
                    continue;
                }
                match chars.peek() {
                    Some('%') => {
                        chars.next();
                        out.push('%');
                    }
                    Some(&marker @ ('s' | 'd' | 'j' | 'o')) => {
                        chars.next();
                        match remaining.next() {
                            Some(value) => out.push_str(&render_placeholder(marker, value)),
                            None => {
                                out.push('%');
                                out.push(marker);
                            }
                        }
                    }
                    _ => out.push('%'),
                }
            }
            out
        }
        None => String::new(),
    };

    for value in remaining {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&display_value(value));
    }
    out
}

fn render_placeholder(marker: char, value: &Value) -> String {
    match marker {
        's' => display_value(value),
        'd' => match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) if s.parse::<f64>().is_ok() => s.clone(),
            _ => "NaN".to_string(),
        },
        // %j and %o both render compact JSON
        _ => value.to_string(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
