use std::path::Path;

use serde_json::Value;
use sourcemap::SourceMap;

/// Rewrites bundled `file:line:column` references in stack traces and
/// inspector protocol frames to their original-source positions. Any frame
/// the map cannot place is passed through unmodified; rewriting never
/// errors and never panics.
pub struct SourceMapRewriter {
    map: SourceMap,
}

impl SourceMapRewriter {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("failed to read source map {}: {}", path.display(), e))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let map = SourceMap::from_slice(bytes)
            .map_err(|e| format!("failed to parse source map: {}", e))?;
        Ok(Self { map })
    }

    pub fn from_map(map: SourceMap) -> Self {
        Self { map }
    }

    /// Rewrite every frame line in a stack string. Lines without a
    /// recognizable `file:line:column` location stay as they are.
    pub fn rewrite(&self, stack: &str) -> String {
        stack
            .split('\n')
            .map(|line| self.rewrite_line(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rewrite an inspector protocol message carrying stack information.
    /// Returns `None` when the message is not one we touch or nothing in
    /// it mapped, so callers can forward the original text untouched.
    pub fn rewrite_protocol_message(&self, text: &str) -> Option<String> {
        let mut value: Value = serde_json::from_str(text).ok()?;
        let method = value.get("method")?.as_str()?;
        if method != "Runtime.exceptionThrown" && method != "Runtime.consoleAPICalled" {
            return None;
        }
        let params = value.get_mut("params")?;
        if self.rewrite_protocol_value(params) {
            serde_json::to_string(&value).ok()
        } else {
            None
        }
    }

    fn rewrite_line(&self, line: &str) -> String {
        let Some(location) = parse_frame_location(line) else {
            return line.to_string();
        };
        let Some(token) = self.map.lookup_token(
            location.line.saturating_sub(1),
            location.column.saturating_sub(1),
        ) else {
            return line.to_string();
        };
        let Some(source) = token.get_source() else {
            return line.to_string();
        };

        let mapped = format!(
            "{}:{}:{}",
            source,
            token.get_src_line() + 1,
            token.get_src_col() + 1
        );
        let mut out = String::with_capacity(line.len());
        out.push_str(&line[..location.start]);
        out.push_str(&mapped);
        out.push_str(&line[location.end..]);

        match token.get_name() {
            Some(name) => rewrite_frame_name(&out, name),
            None => out,
        }
    }

    fn rewrite_protocol_value(&self, value: &mut Value) -> bool {
        match value {
            Value::Object(fields) => {
                let mut changed = false;
                if let Some(Value::String(description)) = fields.get_mut("description") {
                    let rewritten = self.rewrite(description);
                    if rewritten != *description {
                        *description = rewritten;
                        changed = true;
                    }
                }
                if let Some(Value::Array(frames)) = fields.get_mut("callFrames") {
                    for frame in frames.iter_mut() {
                        changed |= self.rewrite_call_frame(frame);
                    }
                }
                for (_, child) in fields.iter_mut() {
                    changed |= self.rewrite_protocol_value(child);
                }
                changed
            }
            Value::Array(items) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    changed |= self.rewrite_protocol_value(item);
                }
                changed
            }
            _ => false,
        }
    }

    /// Structured CDP call frames carry zero-based line and column numbers.
    fn rewrite_call_frame(&self, frame: &mut Value) -> bool {
        let Some(fields) = frame.as_object_mut() else {
            return false;
        };
        let line = fields.get("lineNumber").and_then(Value::as_u64);
        let column = fields.get("columnNumber").and_then(Value::as_u64);
        let (Some(line), Some(column)) = (line, column) else {
            return false;
        };
        let Some(token) = self.map.lookup_token(line as u32, column as u32) else {
            return false;
        };
        let Some(source) = token.get_source() else {
            return false;
        };

        fields.insert("url".to_string(), Value::from(source));
        fields.insert("lineNumber".to_string(), Value::from(token.get_src_line()));
        fields.insert("columnNumber".to_string(), Value::from(token.get_src_col()));
        if let Some(name) = token.get_name() {
            fields.insert("functionName".to_string(), Value::from(name));
        }
        true
    }
}

struct FrameLocation {
    line: u32,
    column: u32,
    start: usize,
    end: usize,
}

/// Find a trailing `file:line:column` in a stack frame line. Returns the
/// one-based line and column plus the byte span of the whole location.
fn parse_frame_location(text: &str) -> Option<FrameLocation> {
    let end = text.rfind(|c: char| c.is_ascii_digit())? + 1;
    let tail = &text[..end];
    let colon_col = tail.rfind(':')?;
    let column: u32 = tail[colon_col + 1..end].parse().ok()?;
    let colon_line = tail[..colon_col].rfind(':')?;
    let line: u32 = tail[colon_line + 1..colon_col].parse().ok()?;

    let head = &tail[..colon_line];
    let start = head
        .rfind(['(', ' ', '\t'])
        .map(|i| i + 1)
        .unwrap_or(0);
    if start >= colon_line {
        return None;
    }
    Some(FrameLocation {
        line,
        column,
        start,
        end,
    })
}

/// Replace the function name in `at name (file...)` when the map knows the
/// original name. Frames without a name part stay untouched.
fn rewrite_frame_name(line: &str, name: &str) -> String {
    let Some(at) = line.find("at ") else {
        return line.to_string();
    };
    let rest = &line[at + 3..];
    let Some(paren) = rest.find(" (") else {
        return line.to_string();
    };
    let current = &rest[..paren];
    if current.is_empty() || current.contains('/') {
        return line.to_string();
    }
    format!("{}at {} ({}", &line[..at], name, &rest[paren + 2..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcemap::SourceMapBuilder;

    fn rewriter_with_dostuff() -> SourceMapRewriter {
        let mut builder = SourceMapBuilder::new(Some("/dist/index.js"));
        // bundled 1:11 (0-based 0:10) came from doStuff at app.ts 6:3
        builder.add(0, 10, 5, 2, Some("/src/app.ts"), Some("doStuff"), false);
        SourceMapRewriter::from_map(builder.into_sourcemap())
    }

    #[test]
    fn test_frame_maps_to_original_source() {
        let rewriter = rewriter_with_dostuff();
        let stack = "TypeError: x is not a function\n    at doStuff (/dist/index.js:1:11)";
        let rewritten = rewriter.rewrite(stack);
        assert!(rewritten.contains("/src/app.ts:6:3"), "got: {rewritten}");
        assert!(rewritten.contains("at doStuff ("));
        assert!(rewritten.starts_with("TypeError: x is not a function\n"));
    }

    #[test]
    fn test_unmapped_frame_passes_through() {
        let builder = SourceMapBuilder::new(Some("/dist/index.js"));
        let rewriter = SourceMapRewriter::from_map(builder.into_sourcemap());
        let stack = "    at doStuff (/dist/index.js:1:11)";
        assert_eq!(rewriter.rewrite(stack), stack);
    }

    #[test]
    fn test_non_frame_lines_untouched() {
        let rewriter = rewriter_with_dostuff();
        assert_eq!(
            rewriter.rewrite("TypeError: x is not a function"),
            "TypeError: x is not a function"
        );
        assert_eq!(rewriter.rewrite(""), "");
    }

    #[test]
    fn test_bare_location_without_parens() {
        let rewriter = rewriter_with_dostuff();
        let rewritten = rewriter.rewrite("    at /dist/index.js:1:11");
        assert!(rewritten.contains("/src/app.ts:6:3"), "got: {rewritten}");
    }

    #[test]
    fn test_exception_thrown_description_rewritten() {
        let rewriter = rewriter_with_dostuff();
        let message = serde_json::json!({
            "method": "Runtime.exceptionThrown",
            "params": {
                "exceptionDetails": {
                    "exception": {
                        "description": "TypeError: boom\n    at doStuff (/dist/index.js:1:11)"
                    }
                }
            }
        })
        .to_string();

        let rewritten = rewriter.rewrite_protocol_message(&message).unwrap();
        assert!(rewritten.contains("/src/app.ts:6:3"));
    }

    #[test]
    fn test_unrelated_protocol_message_left_alone() {
        let rewriter = rewriter_with_dostuff();
        let message = r#"{"method":"Debugger.paused","params":{}}"#;
        assert!(rewriter.rewrite_protocol_message(message).is_none());
    }

    #[test]
    fn test_call_frames_rewritten_zero_based() {
        let rewriter = rewriter_with_dostuff();
        let message = serde_json::json!({
            "method": "Runtime.consoleAPICalled",
            "params": {
                "stackTrace": {
                    "callFrames": [{
                        "functionName": "minified",
                        "url": "/dist/index.js",
                        "lineNumber": 0,
                        "columnNumber": 10
                    }]
                }
            }
        })
        .to_string();

        let rewritten = rewriter.rewrite_protocol_message(&message).unwrap();
        let value: Value = serde_json::from_str(&rewritten).unwrap();
        let frame = &value["params"]["stackTrace"]["callFrames"][0];
        assert_eq!(frame["url"], "/src/app.ts");
        assert_eq!(frame["lineNumber"], 5);
        assert_eq!(frame["columnNumber"], 2);
        assert_eq!(frame["functionName"], "doStuff");
    }
}
