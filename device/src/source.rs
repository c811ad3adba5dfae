//! Kernel entry point discovery.
//!
//! Drivers that compile OpenCL C or CUDA C source need to know which entry points a module
//! exports and how many parameters each one takes, since the argument list of a kernel is
//! sized from its signature. The scanner recognizes `__kernel`/`kernel` (OpenCL C) and
//! `__global__` (CUDA) definitions, skips comments, literals and preprocessor lines, and
//! checks that brackets balance.

use std::fmt;

use smallvec::SmallVec;

/// A kernel definition found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub arity: usize,
    /// 1-based line of the kernel name.
    pub line: usize,
}

/// A rejected source, with the line the problem was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

const QUALIFIERS: [&str; 3] = ["__kernel", "kernel", "__global__"];
const ATTRIBUTES: [&str; 3] = ["__attribute__", "__launch_bounds__", "__declspec"];

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Punct(char),
}

#[derive(Debug)]
struct Spanned<'a> {
    token: Token<'a>,
    line: usize,
}

fn diagnostic<T>(line: usize, message: impl Into<String>) -> Result<T, Diagnostic> {
    Err(Diagnostic { line, message: message.into() })
}

fn tokenize(source: &str) -> Result<Vec<Spanned<'_>>, Diagnostic> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let (mut i, mut line) = (0, 1);
    let mut line_start = true;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\n' => {
                line += 1;
                line_start = true;
                i += 1;
                continue;
            }
            c if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'#' if line_start => {
                // Preprocessor line, honoring backslash continuations.
                while i < bytes.len() && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'\n') {
                        line += 1;
                        i += 1;
                    }
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = line;
                i += 2;
                loop {
                    match bytes.get(i) {
                        None => return diagnostic(start, "unterminated block comment"),
                        Some(b'*') if bytes.get(i + 1) == Some(&b'/') => {
                            i += 2;
                            break;
                        }
                        Some(b'\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
                continue;
            }
            b'"' | b'\'' => {
                let (quote, start) = (c, line);
                i += 1;
                loop {
                    match bytes.get(i) {
                        None | Some(b'\n') => return diagnostic(start, "unterminated literal"),
                        Some(b'\\') => i += 2,
                        Some(&b) if b == quote => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Spanned { token: Token::Ident(&source[start..i]), line });
            }
            c if c.is_ascii_digit() => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
            }
            _ => {
                // Multi-byte characters only appear inside literals and comments in valid source.
                let ch = source[i..].chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
                tokens.push(Spanned { token: Token::Punct(ch), line });
                i += ch.len_utf8();
            }
        }
        line_start = false;
    }

    Ok(tokens)
}

fn check_balance(tokens: &[Spanned<'_>]) -> Result<(), Diagnostic> {
    let mut open: SmallVec<[(char, usize); 16]> = SmallVec::new();
    for spanned in tokens {
        let Token::Punct(c) = spanned.token else { continue };
        match c {
            '(' | '[' | '{' => open.push((c, spanned.line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match open.pop() {
                    Some((opener, _)) if opener == expected => {}
                    Some((opener, line)) => {
                        return diagnostic(spanned.line, format!("`{c}` does not close `{opener}` opened on line {line}"));
                    }
                    None => return diagnostic(spanned.line, format!("unmatched `{c}`")),
                }
            }
            _ => {}
        }
    }

    match open.pop() {
        Some((opener, line)) => diagnostic(line, format!("`{opener}` is never closed")),
        None => Ok(()),
    }
}

/// Index just past the bracket group that starts at `start`.
fn skip_group(tokens: &[Spanned<'_>], start: usize) -> usize {
    let mut depth = 0usize;
    for (offset, spanned) in tokens[start..].iter().enumerate() {
        match spanned.token {
            Token::Punct('(' | '[' | '{') => depth += 1,
            Token::Punct(')' | ']' | '}') => {
                depth -= 1;
                if depth == 0 {
                    return start + offset + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

/// Count the top-level parameters of the list opening at `open`.
fn count_params(tokens: &[Spanned<'_>], open: usize, name: &str) -> Result<(usize, usize), Diagnostic> {
    let close = skip_group(tokens, open) - 1;
    let inner = &tokens[open + 1..close];

    if inner.is_empty() || matches!(inner, [Spanned { token: Token::Ident("void"), .. }]) {
        return Ok((0, close));
    }

    let (mut depth, mut params, mut current) = (0usize, 0, 0usize);
    for spanned in inner {
        match spanned.token {
            Token::Punct('(' | '[' | '{' | '<') => depth += 1,
            Token::Punct(')' | ']' | '}' | '>') => depth = depth.saturating_sub(1),
            Token::Punct(',') if depth == 0 => {
                if current == 0 {
                    return diagnostic(spanned.line, format!("empty parameter in signature of `{name}`"));
                }
                params += 1;
                current = 0;
                continue;
            }
            _ => {}
        }
        current += 1;
    }

    if current == 0 {
        return diagnostic(tokens[close].line, format!("empty parameter in signature of `{name}`"));
    }
    Ok((params + 1, close))
}

/// Find every kernel definition in `source`.
pub fn scan_entry_points(source: &str) -> Result<SmallVec<[EntryPoint; 4]>, Diagnostic> {
    let tokens = tokenize(source)?;
    check_balance(&tokens)?;

    let mut entries: SmallVec<[EntryPoint; 4]> = SmallVec::new();
    let mut i = 0;
    while i < tokens.len() {
        let Token::Ident(qualifier) = tokens[i].token else {
            i += 1;
            continue;
        };
        if !QUALIFIERS.contains(&qualifier) {
            i += 1;
            continue;
        }

        // Walk the declarator up to the opening parenthesis of the parameter list.
        let mut words: SmallVec<[&str; 4]> = SmallVec::new();
        let mut j = i + 1;
        let open = loop {
            match tokens.get(j).map(|t| &t.token) {
                Some(Token::Ident(word)) if ATTRIBUTES.contains(word) => {
                    j = match tokens.get(j + 1) {
                        Some(Spanned { token: Token::Punct('('), .. }) => skip_group(&tokens, j + 1),
                        _ => j + 1,
                    };
                }
                Some(Token::Ident(word)) => {
                    words.push(word);
                    j += 1;
                }
                Some(Token::Punct('*')) => j += 1,
                Some(Token::Punct('(')) if words.len() >= 2 => break Some(j),
                _ => break None,
            }
        };

        let Some(open) = open else {
            if qualifier == "kernel" {
                // Plain identifier named `kernel`, not a qualifier.
                i += 1;
                continue;
            }
            return diagnostic(tokens[i].line, format!("expected a kernel declaration after `{qualifier}`"));
        };

        let name = words[words.len() - 1];
        let line = tokens[open - 1].line;
        if !words[..words.len() - 1].contains(&"void") {
            return diagnostic(line, format!("kernel `{name}` must return void"));
        }

        let (arity, close) = count_params(&tokens, open, name)?;
        match tokens.get(close + 1).map(|t| &t.token) {
            Some(Token::Punct('{')) => {
                if entries.iter().any(|entry| entry.name == name) {
                    return diagnostic(line, format!("duplicate kernel `{name}`"));
                }
                entries.push(EntryPoint { name: name.to_string(), arity, line });
            }
            // Prototype; the definition is scanned on its own.
            Some(Token::Punct(';')) => {}
            _ => return diagnostic(line, format!("expected a body for kernel `{name}`")),
        }
        i = close + 1;
    }

    Ok(entries)
}
