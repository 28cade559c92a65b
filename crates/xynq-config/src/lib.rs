//! # xynq-config — S-expression configuration
//!
//! Configuration files are the same S-expression grammar the server
//! speaks:
//!
//! ```text
//! (log (level "info"))          ; nested keys flatten to log.level
//! (tcp (bind "0.0.0.0:9920"))
//! (fib-seq 0 1 1 2 3 5 8 13)    ; a key may hold a list of values
//! (@include "common.conf")      ; top level only
//! (exec (@locate "init.xq"))    ; resolve relative to this file
//! ```
//!
//! Hierarchies flatten to dot-joined keys; `yes`/`no` identifiers read as
//! booleans; nested lists are rejected. Command-line overrides load by
//! synthesizing `(key value)` expressions and parsing them like a file.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use xynq_base::{FileInStream, StreamReader};
use xynq_slang::lexer::{self, HandlerResult, LexerHandler};
use xynq_slang::LexerFailure;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file not found")]
    FileNotFound,
    #[error("config i/o error")]
    Io,
    #[error("invalid config arguments")]
    InvalidArgs,
    #[error("config syntax error (ln {}, col {}): {}", .0.line, .0.col, .0.msg)]
    Syntax(LexerFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKeyError {
    DoesNotExist,
    InvalidType,
}

pub type ConfigKeyResult<T> = Result<T, ConfigKeyError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl ConfigValue {
    fn format_into(&self, out: &mut String) {
        match self {
            ConfigValue::Str(s) => out.push_str(s),
            ConfigValue::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            ConfigValue::Double(v) => {
                let _ = write!(out, "{}", v);
            }
            ConfigValue::Bool(v) => out.push_str(if *v { "Yes" } else { "No" }),
        }
    }
}

type ConfigMap = BTreeMap<String, Vec<ConfigValue>>;

/// Immutable key/value map. Every key holds a list; single values are
/// one-element lists.
#[derive(Debug, Default)]
pub struct Config {
    values: ConfigMap,
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Config, ConfigLoadError> {
        let stream = FileInStream::open(path).map_err(|e| {
            tracing::error!(target: "xynq::config", "failed to open config file {}: {}", path.display(), e);
            ConfigLoadError::FileNotFound
        })?;

        let mut buf = [0u8; 512];
        let mut reader = StreamReader::new(&mut buf, &stream);
        Self::load_from_reader(&mut reader, path)
    }

    pub fn load_from_str(text: &str) -> Result<Config, ConfigLoadError> {
        let mut buf = text.as_bytes().to_vec();
        let stream = xynq_base::DummyInStream;
        let len = buf.len();
        let mut reader = StreamReader::with_available(&mut buf, &stream, len);
        Self::load_from_reader(&mut reader, Path::new(""))
    }

    /// Load `key=value` style overrides by synthesizing `(key value)`
    /// expressions.
    pub fn load_from_overrides(pairs: &[(String, String)]) -> Result<Config, ConfigLoadError> {
        let mut text = String::new();
        for (key, value) in pairs {
            if !check_arg(key) || !check_arg(value) {
                tracing::error!(target: "xynq::config", "cannot parse override: {}={}", key, value);
                return Err(ConfigLoadError::InvalidArgs);
            }
            let _ = writeln!(text, "({} {})", key, value);
        }
        Self::load_from_str(&text)
    }

    fn load_from_reader(
        reader: &mut StreamReader<'_>,
        source_path: &Path,
    ) -> Result<Config, ConfigLoadError> {
        let mut parser = ConfigParser::new(source_path);
        match lexer::run(reader, &mut parser, false) {
            Ok(_) => Ok(Config {
                values: parser.map,
            }),
            Err(failure) => {
                tracing::error!(
                    target: "xynq::config",
                    "failed to parse config: {} (ln {}, col {})",
                    failure.msg, failure.line, failure.col
                );
                Err(ConfigLoadError::Syntax(failure))
            }
        }
    }

    /// Take all values from `right` and merge them into `left`; keys in
    /// both come out with `right`'s values.
    pub fn merge(mut left: Config, right: Config) -> Config {
        for (key, values) in right.values {
            left.values.insert(key, values);
        }
        left
    }

    pub fn get_str(&self, key: &str) -> ConfigKeyResult<&str> {
        match self.single(key)? {
            ConfigValue::Str(s) => Ok(s),
            _ => Err(ConfigKeyError::InvalidType),
        }
    }

    pub fn get_i64(&self, key: &str) -> ConfigKeyResult<i64> {
        match self.single(key)? {
            ConfigValue::Int(v) => Ok(*v),
            _ => Err(ConfigKeyError::InvalidType),
        }
    }

    pub fn get_f64(&self, key: &str) -> ConfigKeyResult<f64> {
        match self.single(key)? {
            ConfigValue::Double(v) => Ok(*v),
            _ => Err(ConfigKeyError::InvalidType),
        }
    }

    pub fn get_bool(&self, key: &str) -> ConfigKeyResult<bool> {
        match self.single(key)? {
            ConfigValue::Bool(v) => Ok(*v),
            _ => Err(ConfigKeyError::InvalidType),
        }
    }

    /// The value list at `key`; a single value is a one-element list.
    pub fn get_list(&self, key: &str) -> ConfigKeyResult<&[ConfigValue]> {
        self.values
            .get(key)
            .map(Vec::as_slice)
            .ok_or(ConfigKeyError::DoesNotExist)
    }

    /// The list at `key` as strings; fails if any element is not a string.
    pub fn get_str_list(&self, key: &str) -> ConfigKeyResult<Vec<&str>> {
        let list = self.get_list(key)?;
        list.iter()
            .map(|v| match v {
                ConfigValue::Str(s) => Ok(s.as_str()),
                _ => Err(ConfigKeyError::InvalidType),
            })
            .collect()
    }

    /// Visit every key with a formatted value string, sorted by key.
    /// Debug/startup output only.
    pub fn enumerate(&self, mut callback: impl FnMut(&str, &str)) {
        for (key, values) in &self.values {
            let mut text = String::new();
            if values.len() == 1 {
                values[0].format_into(&mut text);
            } else {
                text.push('[');
                for (i, value) in values.iter().enumerate() {
                    if i != 0 {
                        text.push_str(", ");
                    }
                    value.format_into(&mut text);
                }
                text.push(']');
            }
            callback(key, &text);
        }
    }

    fn single(&self, key: &str) -> ConfigKeyResult<&ConfigValue> {
        let values = self
            .values
            .get(key)
            .ok_or(ConfigKeyError::DoesNotExist)?;
        values.first().ok_or(ConfigKeyError::DoesNotExist)
    }
}

/// Lexer handler building the flattened key map.
struct ConfigParser {
    map: ConfigMap,
    source_path: PathBuf,
    cur_key: String,
    key_stack: Vec<usize>,
    values: Vec<ConfigValue>,
    is_nested_list: bool,
}

impl ConfigParser {
    fn new(source_path: &Path) -> Self {
        Self {
            map: ConfigMap::new(),
            source_path: source_path.to_path_buf(),
            cur_key: String::new(),
            key_stack: Vec::new(),
            values: Vec::new(),
            is_nested_list: false,
        }
    }

    fn add_value(&mut self, value: ConfigValue) -> HandlerResult {
        if self.is_nested_list {
            return Err("Nested lists are not allowed in config".to_string());
        }
        self.values.push(value);
        Ok(())
    }
}

impl LexerHandler for ConfigParser {
    fn begin_op(&mut self, key: &str) -> HandlerResult {
        if !self.values.is_empty() {
            return Err("Invalid list. Lists cannot have nested keys.".to_string());
        }
        self.key_stack.push(self.cur_key.len());
        self.cur_key.push('.');
        self.cur_key.push_str(key);
        self.is_nested_list = false;
        Ok(())
    }

    fn end_op(&mut self) -> HandlerResult {
        if self.cur_key.is_empty() {
            return Err("No key".to_string());
        }
        let stack_top = *self.key_stack.last().expect("balanced by the lexer");
        let cur_op = self.cur_key[stack_top + 1..].to_string();

        if cur_op == "@locate" {
            // Resolve filenames against this file's directory; the values
            // stay and belong to the enclosing key.
            let dir = self.source_path.parent().unwrap_or_else(|| Path::new(""));
            for value in &mut self.values {
                let ConfigValue::Str(name) = value else {
                    return Err("Expected filename string for @locate.".to_string());
                };
                *value = ConfigValue::Str(dir.join(&*name).display().to_string());
            }
        } else {
            if cur_op == "@include" {
                if self.key_stack.len() > 1 {
                    return Err("@include is expected at top level".to_string());
                }
                for value in &self.values {
                    let ConfigValue::Str(name) = value else {
                        return Err("Invalid include filename. Should be a string.".to_string());
                    };
                    let loaded = Config::load_from_file(Path::new(name))
                        .map_err(|_| "Failed to load config".to_string())?;
                    for (key, values) in loaded.values {
                        self.map.insert(key, values);
                    }
                }
            } else if cur_op.starts_with('@') {
                return Err("Unknown directive.".to_string());
            } else if !self.values.is_empty() {
                let key = self.cur_key[1..].to_string();
                self.map.insert(key, std::mem::take(&mut self.values));
            }
            self.values.clear();
        }

        self.cur_key.truncate(stack_top);
        self.key_stack.pop();
        self.is_nested_list = !self.key_stack.is_empty();
        Ok(())
    }

    fn str_value(&mut self, value: &str) -> HandlerResult {
        self.add_value(ConfigValue::Str(value.to_string()))
    }

    fn int_value(&mut self, value: i64) -> HandlerResult {
        self.add_value(ConfigValue::Int(value))
    }

    fn double_value(&mut self, value: f64) -> HandlerResult {
        self.add_value(ConfigValue::Double(value))
    }

    fn unhandled_value(&mut self, value: &str) -> HandlerResult {
        match value {
            "yes" | "Yes" => self.add_value(ConfigValue::Bool(true)),
            "no" | "No" => self.add_value(ConfigValue::Bool(false)),
            _ => self.str_value(value),
        }
    }

    fn custom_data(&mut self, _token: u32, _reader: &mut StreamReader<'_>) -> HandlerResult {
        Err("No custom data is allowed in config".to_string())
    }
}

/// Override keys/values may not contain whitespace or parentheses (they
/// are spliced into synthesized expressions).
fn check_arg(arg: &str) -> bool {
    !arg.is_empty()
        && !arg
            .bytes()
            .any(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\x0b' | b'(' | b')'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn loads_scalar_types() {
        let conf = Config::load_from_str(
            r#"
            ; Three keys total.
            (key1   "str val")  ; Key 1
            (key2   325)        ; Key 2
            (key3   321.75)     ; Key 3
        "#,
        )
        .unwrap();

        assert_eq!(conf.get_str("key1"), Ok("str val"));
        assert_eq!(conf.get_i64("key2"), Ok(325));
        assert_eq!(conf.get_f64("key3"), Ok(321.75));
    }

    #[test]
    fn booleans() {
        let conf = Config::load_from_str("(key1 Yes) (key2 No)").unwrap();
        assert_eq!(conf.get_bool("key1"), Ok(true));
        assert_eq!(conf.get_bool("key2"), Ok(false));
    }

    #[test]
    fn type_mismatch() {
        let conf = Config::load_from_str("(key1 325)").unwrap();
        assert_eq!(conf.get_bool("key1"), Err(ConfigKeyError::InvalidType));
        assert_eq!(conf.get_str("missing"), Err(ConfigKeyError::DoesNotExist));
    }

    #[test]
    fn nested_keys_flatten() {
        let conf = Config::load_from_str(
            r#"
            (key1                           ; Key 1
                (key2 325)                  ; Key 2
                (key3                       ; Key 3
                    (key4 25.25)            ; Key 4
                    (key5 "str value")))    ; Key 5
        "#,
        )
        .unwrap();

        assert_eq!(conf.get_i64("key1.key2"), Ok(325));
        assert_eq!(conf.get_f64("key1.key3.key4"), Ok(25.25));
        assert_eq!(conf.get_str("key1.key3.key5"), Ok("str value"));
    }

    #[test]
    fn lists() {
        let conf = Config::load_from_str("(key \"value 1\" 325 325.65)").unwrap();
        let list = conf.get_list("key").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0], ConfigValue::Str("value 1".to_string()));
        assert_eq!(list[1], ConfigValue::Int(325));
        assert_eq!(list[2], ConfigValue::Double(325.65));
    }

    #[test]
    fn nested_lists_rejected() {
        assert!(Config::load_from_str("(key1 \"hello\" (key2 123))").is_err());
        assert!(Config::load_from_str("(key1 (key2 123) \"value\")").is_err());
    }

    #[test]
    fn merge_right_wins() {
        let left = Config::load_from_str("(x 1) (y 2)").unwrap();
        let right = Config::load_from_str("(y 3) (z 4)").unwrap();
        let conf = Config::merge(left, right);

        assert_eq!(conf.get_i64("x"), Ok(1));
        assert_eq!(conf.get_i64("y"), Ok(3));
        assert_eq!(conf.get_i64("z"), Ok(4));
    }

    #[test]
    fn enumerate_is_sorted_and_formatted() {
        let conf =
            Config::load_from_str("(b 2 3) (a \"x\") (c Yes)").unwrap();
        let mut seen = Vec::new();
        conf.enumerate(|key, value| seen.push((key.to_string(), value.to_string())));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), "x".to_string()),
                ("b".to_string(), "[2, 3]".to_string()),
                ("c".to_string(), "Yes".to_string()),
            ]
        );
    }

    #[test]
    fn overrides_load_like_expressions() {
        let pairs = vec![
            ("key1".to_string(), "\"Value1\"".to_string()),
            ("key2".to_string(), "325".to_string()),
            ("key3".to_string(), "32.098".to_string()),
        ];
        let conf = Config::load_from_overrides(&pairs).unwrap();
        assert_eq!(conf.get_str("key1"), Ok("Value1"));
        assert_eq!(conf.get_i64("key2"), Ok(325));
        assert_eq!(conf.get_f64("key3"), Ok(32.098));
    }

    #[test]
    fn bad_overrides_rejected() {
        let pairs = vec![("key 1".to_string(), "v".to_string())];
        assert!(matches!(
            Config::load_from_overrides(&pairs),
            Err(ConfigLoadError::InvalidArgs)
        ));
    }

    #[test]
    fn include_and_locate() {
        let dir = std::env::temp_dir().join("xynq_config_test");
        std::fs::create_dir_all(&dir).unwrap();

        let common = dir.join("common.conf");
        let mut f = std::fs::File::create(&common).unwrap();
        writeln!(f, "(shared (flag Yes))").unwrap();
        drop(f);

        let main = dir.join("main.conf");
        let mut f = std::fs::File::create(&main).unwrap();
        writeln!(f, "(@include \"{}\")", common.display()).unwrap();
        writeln!(f, "(exec (@locate \"init.xq\"))").unwrap();
        drop(f);

        let conf = Config::load_from_file(&main).unwrap();
        assert_eq!(conf.get_bool("shared.flag"), Ok(true));
        assert_eq!(
            conf.get_str("exec"),
            Ok(dir.join("init.xq").display().to_string().as_str())
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_loading() {
        let dir = std::env::temp_dir();
        let path = dir.join("xynq_config_basic.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "(key1 \"str val\") (key2 325)").unwrap();
        drop(f);

        let conf = Config::load_from_file(&path).unwrap();
        assert_eq!(conf.get_str("key1"), Ok("str val"));
        assert_eq!(conf.get_i64("key2"), Ok(325));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_not_found() {
        assert!(matches!(
            Config::load_from_file(Path::new("/no/such/xynq.conf")),
            Err(ConfigLoadError::FileNotFound)
        ));
    }
}
