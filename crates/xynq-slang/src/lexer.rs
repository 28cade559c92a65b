//! Streaming tokenizer for prefix S-expressions.
//!
//! Grammar:
//!
//! ```text
//! program := expr*
//! expr    := '(' ident value* ')'
//! value   := int | float | string | ident | payload | expr
//! payload := '!' tag '[' opaque-bytes ']'     ; tag is at most 4 bytes
//! comment := ';' ... end-of-line
//! ```
//!
//! The lexer pulls bytes from a [`StreamReader`] one at a time and tracks
//! the current term as a window into the reader's buffer. When the buffer
//! runs dry mid-term, the partial term is copied into an overflow buffer
//! before the refill, so handlers always see whole tokens no matter how
//! the input is chunked.

use xynq_base::StreamReader;

/// Handler error: a message; the lexer attaches position.
pub type HandlerResult = Result<(), String>;

/// Callback capability driven by the lexer. Implemented by the compiler
/// and by the config parser.
pub trait LexerHandler {
    fn begin_op(&mut self, name: &str) -> HandlerResult;
    fn end_op(&mut self) -> HandlerResult;
    fn str_value(&mut self, value: &str) -> HandlerResult;
    fn int_value(&mut self, value: i64) -> HandlerResult;
    fn double_value(&mut self, value: f64) -> HandlerResult;
    /// Bare identifiers and anything else that is not a number or string.
    fn unhandled_value(&mut self, value: &str) -> HandlerResult;
    /// Called between `[` and `]` of a custom payload; the handler
    /// consumes the payload bytes from the reader.
    fn custom_data(&mut self, tag: u32, reader: &mut StreamReader<'_>) -> HandlerResult;
}

/// Lexing failure with source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerFailure {
    pub line: usize,
    pub col: usize,
    pub msg: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TermType {
    Op,
    Value,
    Str,
}

struct LexerState {
    line: usize,
    col: usize,
    depth: i32,
    escaped: bool,
    was_escaped: bool,
    term_type: TermType,
    term_begin: Option<usize>,
    term_buf: Vec<u8>,
    parsed_any: bool,
}

impl LexerState {
    fn new() -> Self {
        Self {
            line: 1,
            col: 0,
            depth: 0,
            escaped: false,
            was_escaped: false,
            term_type: TermType::Value,
            term_begin: None,
            term_buf: Vec::new(),
            parsed_any: false,
        }
    }

    fn fail(&self, msg: impl Into<String>) -> LexerFailure {
        LexerFailure {
            line: self.line,
            col: self.col,
            msg: msg.into(),
        }
    }

    fn new_line(&mut self) {
        self.line += 1;
        self.col = 0;
    }

    fn start_term(&mut self, term_type: TermType, begin: usize) {
        self.term_type = term_type;
        self.term_begin = Some(begin);
    }

    fn finish_term(&mut self) {
        self.term_type = TermType::Value;
        self.term_begin = None;
        self.term_buf.clear();
    }

    fn has_term(&self) -> bool {
        self.term_begin.is_some()
    }

    /// Stash `[term_begin, end)` into the overflow buffer (called right
    /// before the reader's buffer is recycled).
    fn save_term(&mut self, reader: &StreamReader<'_>, end: usize) {
        if let Some(begin) = self.term_begin.take() {
            self.term_buf.extend_from_slice(reader.buffer(begin, end));
        }
    }

    fn next_char(&mut self, reader: &mut StreamReader<'_>) -> Option<u8> {
        if reader.available().is_empty() && !self.refill(reader) {
            return None;
        }
        self.col += 1;
        Some(reader.read_char_unchecked())
    }

    fn refill(&mut self, reader: &mut StreamReader<'_>) -> bool {
        let had_term = self.has_term();
        self.save_term(reader, reader.buffered_end());
        match reader.refill_available() {
            Err(_) => false,
            Ok(window) => {
                if window.is_empty() {
                    return false;
                }
                if had_term {
                    // The term continues at the head of the fresh window.
                    self.term_begin = Some(reader.cursor());
                }
                true
            }
        }
    }
}

/// Run the lexer over `reader`, driving `handler`. With `single_expr`,
/// parsing stops as soon as the outermost `)` closes at depth zero.
///
/// Returns whether any expression was parsed (false means the stream
/// ended before one started).
pub fn run<H: LexerHandler>(
    reader: &mut StreamReader<'_>,
    handler: &mut H,
    single_expr: bool,
) -> Result<bool, LexerFailure> {
    let mut state = LexerState::new();

    loop {
        let Some(ch) = state.next_char(reader) else {
            break;
        };

        let cur_escaped = state.escaped;
        state.escaped = false;

        if state.term_type == TermType::Str && (ch != b'"' || cur_escaped) {
            // Inside a string literal: only an unescaped quote closes it.
            if ch == b'\\' && !cur_escaped {
                state.escaped = true;
                state.was_escaped = true;
            }
            if ch == b'\n' {
                state.new_line();
            }
            continue;
        }

        match ch {
            b'(' => {
                finalize_term(&mut state, reader, handler)?;
                state.depth += 1;
                state.parsed_any = true;
                state.start_term(TermType::Op, reader.cursor());
            }

            b')' => {
                finalize_term(&mut state, reader, handler)?;
                handler.end_op().map_err(|msg| state.fail(msg))?;
                state.depth -= 1;
                if state.depth < 0 {
                    return Err(state.fail("Redundant closing parenthesis"));
                }
                if single_expr && state.depth == 0 {
                    return Ok(true);
                }
            }

            b'"' => {
                let closing = state.term_type == TermType::Str;
                finalize_term(&mut state, reader, handler)?;
                if !closing {
                    state.start_term(TermType::Str, reader.cursor());
                }
            }

            b'!' => {
                // Custom payload: accumulate the tag (at most 4 bytes),
                // then hand the reader to the payload handler.
                let mut token: u32 = 0;
                let mut token_size = 0;
                let mut last_char = 0u8;
                loop {
                    match state.next_char(reader) {
                        None => {
                            last_char = 0;
                            break;
                        }
                        Some(c) => {
                            last_char = c;
                            if c == b'[' || token_size >= 4 {
                                break;
                            }
                            token = (token << 8) | u32::from(c);
                            token_size += 1;
                        }
                    }
                }

                if last_char != b'[' {
                    return Err(state.fail("Invalid opening tag for custom data"));
                }
                handler
                    .custom_data(token, reader)
                    .map_err(|msg| state.fail(msg))?;
                match state.next_char(reader) {
                    Some(b']') => {}
                    _ => return Err(state.fail("No closing ] for custom data")),
                }
                state.finish_term();
            }

            b';' => {
                finalize_term(&mut state, reader, handler)?;
                loop {
                    match state.next_char(reader) {
                        None | Some(b'\n') => break,
                        Some(_) => {}
                    }
                }
                state.new_line();
            }

            b'\n' => {
                state.new_line();
                finalize_term(&mut state, reader, handler)?;
            }

            b' ' | b'\t' | b'\r' => {
                finalize_term(&mut state, reader, handler)?;
            }

            _ => {
                if !state.has_term() {
                    // Term starts at the character just consumed.
                    state.start_term(TermType::Value, reader.cursor() - 1);
                }
            }
        }
    }

    debug_assert!(state.depth >= 0);
    if state.depth > 0 {
        return Err(state.fail("Missing closing parenthesis"));
    }
    if state.term_type == TermType::Str {
        return Err(state.fail("Invalid string literal - not closed"));
    }

    Ok(state.parsed_any)
}

/// Run the lexer over an in-memory string.
pub fn run_str<H: LexerHandler>(code: &str, handler: &mut H) -> Result<bool, LexerFailure> {
    let mut buf = code.as_bytes().to_vec();
    let stream = xynq_base::DummyInStream;
    let len = buf.len();
    let mut reader = StreamReader::with_available(&mut buf, &stream, len);
    run(&mut reader, handler, false)
}

fn finalize_term<H: LexerHandler>(
    state: &mut LexerState,
    reader: &StreamReader<'_>,
    handler: &mut H,
) -> Result<(), LexerFailure> {
    if !state.has_term() {
        return Ok(());
    }
    if state.depth <= 0 {
        return Err(state.fail("Expected opening bracket"));
    }

    // The delimiter that ended the term has already been consumed; the
    // term spans up to (not including) it.
    let end = reader.cursor() - 1;
    let begin = state.term_begin.take().expect("checked has_term");
    let bytes: &[u8] = if state.term_buf.is_empty() {
        reader.buffer(begin, end)
    } else {
        state.term_buf.extend_from_slice(reader.buffer(begin, end));
        &state.term_buf
    };

    let result = match state.term_type {
        TermType::Op => {
            if bytes.is_empty() {
                Ok(())
            } else if !check_op_name(bytes) {
                Err(format!("Invalid op name: {}", String::from_utf8_lossy(bytes)))
            } else {
                match std::str::from_utf8(bytes) {
                    Ok(name) => handler.begin_op(name),
                    Err(_) => Err("Invalid UTF-8 in input".to_string()),
                }
            }
        }

        TermType::Value => {
            if bytes.is_empty() {
                Ok(())
            } else if let Some(value) = parse_int64(bytes) {
                handler.int_value(value)
            } else if let Some(value) = parse_double(bytes) {
                handler.double_value(value)
            } else {
                match std::str::from_utf8(bytes) {
                    Ok(text) => handler.unhandled_value(text),
                    Err(_) => Err("Invalid UTF-8 in input".to_string()),
                }
            }
        }

        TermType::Str => {
            debug_assert!(!state.escaped);
            let unescaped;
            let text = if state.was_escaped {
                unescaped = strip_escapes(bytes);
                std::str::from_utf8(&unescaped)
            } else {
                std::str::from_utf8(bytes)
            };
            state.was_escaped = false;
            match text {
                Ok(text) => handler.str_value(text),
                Err(_) => Err("Invalid UTF-8 in input".to_string()),
            }
        }
    };

    let result = result.map_err(|msg| state.fail(msg));
    state.finish_term();
    result
}

/// Characters allowed in operation names: printable, not a digit (in first
/// position), not structural punctuation.
fn is_op_char(ch: u8) -> bool {
    ch > 0x20
        && !ch.is_ascii_digit()
        && !matches!(ch, b'(' | b')' | b'{' | b'}' | b'[' | b']' | b'"' | b'\'' | b':' | b';')
}

fn check_op_name(bytes: &[u8]) -> bool {
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    if !is_op_char(first) {
        return false;
    }
    rest.iter().all(|&ch| is_op_char(ch) || ch.is_ascii_digit())
}

/// Full-token signed 64-bit parse; trailing junk rejects.
fn parse_int64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Full-token float parse; trailing junk rejects.
fn parse_double(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Remove escape slashes: `\X` becomes `X` for any X.
fn strip_escapes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut escaped = false;
    for &ch in bytes {
        if ch == b'\\' && !escaped {
            escaped = true;
            continue;
        }
        escaped = false;
        out.push(ch);
    }
    out
}
