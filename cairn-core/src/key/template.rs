//! Key templates such as `{{ .Repo.Name }}-{{ checksum "Cargo.lock" }}`.
//!
//! Text outside `{{ }}` is copied verbatim. An action is either a field path
//! into [`Metadata`] or a call to a function from the generator's own
//! [`FunctionMap`], with quoted strings or field paths as arguments.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use super::{KeyGenerator, Metadata};
use crate::error::{Error, Result};

const ACTION_PATTERN: &str = r"(?s)\{\{(.*?)\}\}";
const TOKEN_PATTERN: &str = r#""((?:[^"\\]|\\.)*)"|(\S+)"#;

/// A function callable from a template.
pub type TemplateFunction = Arc<dyn Fn(&[String]) -> Result<String> + Send + Sync>;

/// Functions available to one template generator.
#[derive(Clone, Default)]
pub struct FunctionMap {
    functions: HashMap<String, TemplateFunction>,
}

impl FunctionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in functions: `checksum`, `epoch`, `arch` and `os`.
    ///
    /// `checksum` resolves relative paths against `root`.
    pub fn standard(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut functions = Self::new();

        functions.register("checksum", move |args| {
            let [path] = args else {
                return Err(arity("checksum", 1, args.len()));
            };
            checksum(&root.join(path))
        });
        functions.register("epoch", |args| {
            expect_no_args("epoch", args)?;
            Ok(chrono::Utc::now().timestamp().to_string())
        });
        functions.register("arch", |args| {
            expect_no_args("arch", args)?;
            Ok(go_arch(std::env::consts::ARCH).to_string())
        });
        functions.register("os", |args| {
            expect_no_args("os", args)?;
            Ok(go_os(std::env::consts::OS).to_string())
        });

        functions
    }

    /// Adds or replaces a function.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[String]) -> Result<String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn call(&self, name: &str, args: &[String]) -> Result<String> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::Template(format!("function \"{}\" not defined", name)))?;
        function(args)
    }
}

impl fmt::Debug for FunctionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionMap").field("functions", &names).finish()
    }
}

fn arity(name: &str, expected: usize, got: usize) -> Error {
    Error::Template(format!(
        "wrong number of args for {}: want {} got {}",
        name, expected, got
    ))
}

fn expect_no_args(name: &str, args: &[String]) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(arity(name, 0, args.len()))
    }
}

fn checksum(path: &std::path::Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::Template(format!("checksum {}: {}", path.display(), e)))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(&mut file)
        .map_err(|e| Error::Template(format!("checksum {}: {}", path.display(), e)))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        other => other,
    }
}

fn go_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field(Vec<String>),
    Call { name: String, args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(String),
    Field(Vec<String>),
}

/// Renders a template over build metadata.
///
/// Parts passed to [`KeyGenerator::generate`] are ignored; the template alone
/// determines the key.
#[derive(Debug, Clone)]
pub struct TemplateKey {
    template: String,
    metadata: Metadata,
    functions: FunctionMap,
}

impl TemplateKey {
    pub fn new(template: impl Into<String>, metadata: Metadata, functions: FunctionMap) -> Self {
        Self {
            template: template.into(),
            metadata,
            functions,
        }
    }

    fn parse(&self) -> Result<Vec<Segment>> {
        let actions = compile(ACTION_PATTERN)?;
        let tokens = compile(TOKEN_PATTERN)?;

        let mut segments = Vec::new();
        let mut last = 0;

        for caps in actions.captures_iter(&self.template) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_text(&mut segments, &self.template[last..whole.start()])?;
            segments.push(self.parse_action(body.as_str(), &tokens)?);
            last = whole.end();
        }
        push_text(&mut segments, &self.template[last..])?;

        Ok(segments)
    }

    fn parse_action(&self, body: &str, tokens: &Regex) -> Result<Segment> {
        let mut words = Vec::new();
        for caps in tokens.captures_iter(body) {
            if let Some(quoted) = caps.get(1) {
                words.push(Word::Quoted(unescape(quoted.as_str())));
            } else if let Some(bare) = caps.get(2) {
                words.push(Word::Bare(bare.as_str()));
            }
        }

        let Some((head, rest)) = words.split_first() else {
            return Err(Error::Template("empty action {{ }}".to_string()));
        };

        match head {
            Word::Quoted(text) if rest.is_empty() => Ok(Segment::Text(text.clone())),
            Word::Bare(word) if word.starts_with('.') => {
                if !rest.is_empty() {
                    return Err(Error::Template(format!(
                        "unexpected arguments after field {}",
                        word
                    )));
                }
                Ok(Segment::Field(field_path(word)?))
            }
            Word::Bare(name) => {
                if !self.functions.contains(name) {
                    return Err(Error::Template(format!("function \"{}\" not defined", name)));
                }
                let args = rest
                    .iter()
                    .map(|word| match word {
                        Word::Quoted(text) => Ok(Arg::Literal(text.clone())),
                        Word::Bare(field) if field.starts_with('.') => {
                            Ok(Arg::Field(field_path(field)?))
                        }
                        Word::Bare(other) => Err(Error::Template(format!(
                            "unexpected \"{}\" in arguments of {}",
                            other, name
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Segment::Call {
                    name: name.to_string(),
                    args,
                })
            }
            Word::Quoted(_) => Err(Error::Template(format!(
                "unexpected arguments in action {{{{{}}}}}",
                body
            ))),
        }
    }

    fn render(&self, segments: &[Segment]) -> Result<String> {
        let data = serde_json::to_value(&self.metadata)
            .map_err(|e| Error::Template(format!("metadata: {}", e)))?;

        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(path) => out.push_str(&lookup(&data, path)?),
                Segment::Call { name, args } => {
                    let args = args
                        .iter()
                        .map(|arg| match arg {
                            Arg::Literal(text) => Ok(text.clone()),
                            Arg::Field(path) => lookup(&data, path),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    out.push_str(&self.functions.call(name, &args)?);
                }
            }
        }
        Ok(out)
    }
}

impl KeyGenerator for TemplateKey {
    fn generate(&self, _parts: &[&str]) -> Result<String> {
        let segments = self.parse()?;
        let key = self.render(&segments)?;
        if key.trim().is_empty() {
            return Err(Error::KeyGeneration(format!(
                "template {:?} rendered an empty key",
                self.template
            )));
        }
        Ok(key)
    }

    fn check(&self) -> Result<()> {
        self.parse().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

enum Word<'a> {
    Quoted(String),
    Bare(&'a str),
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Template(e.to_string()))
}

fn push_text(segments: &mut Vec<Segment>, text: &str) -> Result<()> {
    if text.contains("{{") {
        return Err(Error::Template(format!("unclosed action in {:?}", text)));
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
    Ok(())
}

fn field_path(word: &str) -> Result<Vec<String>> {
    let path: Vec<String> = word[1..].split('.').map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return Err(Error::Template(format!("bad field path {}", word)));
    }
    Ok(path)
}

fn unescape(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn lookup(data: &Value, path: &[String]) -> Result<String> {
    let mut current = data;
    for name in path {
        current = current.get(name.as_str()).ok_or_else(|| {
            Error::Template(format!("can't evaluate field .{} in metadata", path.join(".")))
        })?;
    }

    match current {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(Error::Template(format!(
            ".{} is not a scalar value",
            path.join(".")
        ))),
    }
}
