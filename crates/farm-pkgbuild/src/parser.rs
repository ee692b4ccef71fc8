//! A small PKGBUILD reader.
//!
//! Only top-level assignments are interpreted. Function bodies are skipped,
//! so dependency arrays declared inside `package_*()` functions of split
//! packages are not seen. Values containing parameter expansions or command
//! substitutions cannot be resolved without a shell and are dropped.

use crate::error::PkgbuildError;
use farm_core::package::Package;
use tracing::debug;

/// The fields of a PKGBUILD the buildfarm cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    pub pkgname: Vec<String>,
    /// Build-time dependencies, in declaration order, without duplicates.
    pub makedepends: Vec<String>,
    /// Run-time dependencies, in declaration order, without duplicates.
    pub depends: Vec<String>,
    /// E-mail addresses from `# Maintainer:` comments.
    pub maintainers: Vec<String>,
}

impl Recipe {
    pub fn into_package(self, name: impl Into<String>) -> Package {
        let mut package = Package::new(name)
            .with_build_dependencies(self.makedepends)
            .with_run_dependencies(self.depends);
        package.maintainers = self.maintainers;
        package
    }
}

/// Parse the dependency arrays out of PKGBUILD text.
///
/// A recipe that declares neither `makedepends` nor `depends` yields empty
/// lists. Unterminated quotes and arrays are errors.
pub fn parse_pkgbuild(text: &str) -> Result<Recipe, PkgbuildError> {
    let mut cursor = Cursor::new(text);
    let mut recipe = Recipe::default();
    let mut depth = 0usize;

    loop {
        cursor.skip_separators();
        let Some(c) = cursor.peek() else {
            break;
        };

        match c {
            '#' => {
                let comment = cursor.take_line();
                if depth == 0 {
                    if let Some(email) = maintainer_email(&comment) {
                        push_unique(&mut recipe.maintainers, email);
                    }
                }
            }
            '{' => {
                cursor.bump();
                depth += 1;
            }
            '}' => {
                cursor.bump();
                depth = depth.saturating_sub(1);
            }
            _ if depth == 0 => match cursor.assignment() {
                Some((name, append)) => {
                    let line = cursor.line;
                    let values = cursor.value(&name, line)?;
                    recipe.assign(&name, append, values);
                }
                None => depth = cursor.skip_statement(depth)?,
            },
            _ => depth = cursor.skip_statement(depth)?,
        }
    }

    Ok(recipe)
}

impl Recipe {
    fn assign(&mut self, name: &str, append: bool, values: Vec<Word>) {
        let target = match name {
            "makedepends" => &mut self.makedepends,
            "depends" => &mut self.depends,
            "pkgname" => &mut self.pkgname,
            _ => return,
        };
        if !append {
            target.clear();
        }
        for word in values {
            if word.dynamic {
                debug!(field = name, value = %word.text, "Skipping unexpanded value");
                continue;
            }
            let value = if name == "pkgname" {
                Some(word.text)
            } else {
                dependency_name(&word.text)
            };
            if let Some(value) = value {
                push_unique(target, value);
            }
        }
    }
}

/// Strip `: description` suffixes and version constraints.
fn dependency_name(raw: &str) -> Option<String> {
    let name = raw.split(':').next().unwrap_or_default();
    let end = name.find(['<', '>', '=']).unwrap_or(name.len());
    let name = name[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn maintainer_email(comment: &str) -> Option<String> {
    let body = comment.trim_start_matches('#').trim();
    let rest = body.strip_prefix("Maintainer:")?;
    let start = rest.find('<')? + 1;
    let end = start + rest[start..].find('>')?;
    let email = rest[start..end].trim();
    (!email.is_empty()).then(|| email.to_string())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[derive(Debug)]
struct Word {
    text: String,
    /// Contains `$` or a backquote outside single quotes.
    dynamic: bool,
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_separators(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ';' {
                self.bump();
            } else if c == '\\' && self.peek_at(1) == Some('\n') {
                self.bump();
                self.bump();
            } else {
                break;
            }
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.bump();
        }
    }

    fn take_line(&mut self) -> String {
        let mut line = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            line.push(c);
            self.bump();
        }
        line
    }

    /// Consume `name=` or `name+=`, returning the name and whether it
    /// appends. Leaves the cursor untouched when no assignment starts here.
    fn assignment(&mut self) -> Option<(String, bool)> {
        let start = self.pos;
        let mut len = 0;
        while let Some(c) = self.peek_at(len) {
            let valid = if len == 0 {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !valid {
                break;
            }
            len += 1;
        }
        if len == 0 {
            return None;
        }

        let (append, skip) = match (self.peek_at(len), self.peek_at(len + 1)) {
            (Some('='), _) => (false, 1),
            (Some('+'), Some('=')) => (true, 2),
            _ => return None,
        };
        let name: String = self.chars[start..start + len].iter().collect();
        self.pos += len + skip;
        Some((name, append))
    }

    /// Read the right-hand side of an assignment: an array or one word.
    fn value(&mut self, name: &str, line: usize) -> Result<Vec<Word>, PkgbuildError> {
        if self.peek() != Some('(') {
            return Ok(self.word(false)?.into_iter().collect());
        }
        self.bump();

        let mut words = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => {
                    return Err(PkgbuildError::UnterminatedArray {
                        name: name.to_string(),
                        line,
                    });
                }
                Some(')') => {
                    self.bump();
                    return Ok(words);
                }
                Some('#') => {
                    self.take_line();
                }
                Some(_) => match self.word(true)? {
                    Some(word) => words.push(word),
                    None => {
                        self.bump();
                    }
                },
            }
        }
    }

    fn word(&mut self, in_array: bool) -> Result<Option<Word>, PkgbuildError> {
        let mut text = String::new();
        let mut dynamic = false;
        let mut consumed = false;

        while let Some(c) = self.peek() {
            match c {
                c if c.is_whitespace() || c == ';' => break,
                ')' | '(' if in_array => break,
                '\'' => {
                    let line = self.line;
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('\'') => break,
                            Some(c) => text.push(c),
                            None => return Err(PkgbuildError::UnterminatedQuote { line }),
                        }
                    }
                }
                '"' => {
                    let line = self.line;
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('"') => break,
                            Some('\\') => match self.bump() {
                                Some(next @ ('"' | '\\' | '$' | '`')) => text.push(next),
                                Some('\n') => {}
                                Some(next) => {
                                    text.push('\\');
                                    text.push(next);
                                }
                                None => return Err(PkgbuildError::UnterminatedQuote { line }),
                            },
                            Some(c) => {
                                if c == '$' || c == '`' {
                                    dynamic = true;
                                }
                                text.push(c);
                            }
                            None => return Err(PkgbuildError::UnterminatedQuote { line }),
                        }
                    }
                }
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some('\n') | None => {}
                        Some(next) => text.push(next),
                    }
                }
                c => {
                    if c == '$' || c == '`' {
                        dynamic = true;
                    }
                    text.push(c);
                    self.bump();
                }
            }
            consumed = true;
        }

        Ok(consumed.then_some(Word { text, dynamic }))
    }

    /// Skip a statement that is not a top-level assignment, tracking braces
    /// so function bodies are skipped as a whole.
    fn skip_statement(&mut self, mut depth: usize) -> Result<usize, PkgbuildError> {
        self.skip_blanks();
        while let Some(c) = self.peek() {
            match c {
                '\n' => break,
                '#' => {
                    self.take_line();
                    break;
                }
                '{' => {
                    depth += 1;
                    self.bump();
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                '\'' | '"' | '\\' => {
                    self.word(false)?;
                }
                _ => {
                    self.bump();
                }
            }
            self.skip_blanks();
        }
        Ok(depth)
    }
}
