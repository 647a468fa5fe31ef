use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::value::Value;

/// Parses source text into heap values: integers, symbols, proper and
/// dotted lists, with `'x` as sugar for `(quote x)` and `;` line comments.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    rt: &'a Runtime,
}

impl<'a> Reader<'a> {
    pub fn new(rt: &'a Runtime, input: &'a str) -> Self {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            rt,
        }
    }

    /// Read one expression. Returns None at end of input.
    pub fn read(&mut self) -> Result<Option<Value>> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let value = self.read_expr()?;
        Ok(Some(value))
    }

    /// Read every expression in the input.
    pub fn read_all(&mut self) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        while let Some(value) = self.read()? {
            results.push(value);
        }
        Ok(results)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
                self.pos += 1;
            }
            if self.peek() == Some(b';') {
                while self.peek().is_some() && self.peek() != Some(b'\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_expr(&mut self) -> Result<Value> {
        self.skip_whitespace_and_comments();
        let ch = self
            .peek()
            .ok_or_else(|| Error::Read("unexpected end of input".into()))?;
        match ch {
            b'(' => self.read_list(),
            b')' => Err(Error::Read("unexpected ')'".into())),
            b'\'' => self.read_quote(),
            _ => self.read_word(),
        }
    }

    /// Read a list: `(a b c)`, `(a . b)` or `(a b . c)`.
    fn read_list(&mut self) -> Result<Value> {
        self.advance(); // consume '('
        let mut elements = Vec::new();
        let mut dot_tail = None;

        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => return Err(Error::Read("unterminated list".into())),
                Some(b')') => {
                    self.advance();
                    break;
                }
                Some(b'.') if self.dot_is_separator() => {
                    self.advance(); // consume '.'
                    if elements.is_empty() {
                        return Err(Error::Read("dot without a preceding element".into()));
                    }
                    dot_tail = Some(self.read_expr()?);
                    self.skip_whitespace_and_comments();
                    if self.peek() != Some(b')') {
                        return Err(Error::Read("expected ')' after dotted tail".into()));
                    }
                    self.advance();
                    break;
                }
                Some(_) => elements.push(self.read_expr()?),
            }
        }

        let mut result = dot_tail.unwrap_or_else(|| self.rt.nil());
        for value in elements.into_iter().rev() {
            result = Value::cons(&value, &result);
        }
        Ok(result)
    }

    /// A '.' separates a dotted tail only when followed by a delimiter;
    /// otherwise it belongs to a word.
    fn dot_is_separator(&self) -> bool {
        match self.input.get(self.pos + 1) {
            None => true,
            Some(b' ' | b'\t' | b'\n' | b'\r' | b'(' | b')') => true,
            Some(_) => false,
        }
    }

    fn read_quote(&mut self) -> Result<Value> {
        self.advance(); // consume '\''
        let quoted = self.read_expr()?;
        Ok(self.rt.list(&[self.rt.syms.quote.clone(), quoted]))
    }

    /// Read an integer or a symbol.
    fn read_word(&mut self) -> Result<Value> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            match ch {
                b' ' | b'\t' | b'\n' | b'\r' | b'(' | b')' | b'\'' | b';' => break,
                _ => self.pos += 1,
            }
        }
        let word = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| Error::Read("source is not valid UTF-8".into()))?;

        let numeric = word
            .strip_prefix('-')
            .map_or(word, |rest| rest)
            .bytes()
            .all(|b| b.is_ascii_digit());
        if numeric && word != "-" && !word.is_empty() {
            let value = word
                .parse::<i64>()
                .map_err(|_| Error::Read(format!("integer out of range: {}", word)))?;
            return Ok(self.rt.integer(value));
        }
        Ok(self.rt.intern(word))
    }
}
