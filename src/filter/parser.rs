use super::{CategoryFilter, FilterParseError, MAX_NESTING_DEPTH, MAX_TERMS};

type ParseResult<T> = Result<T, FilterParseError>;

pub(super) fn parse(input: &str) -> ParseResult<CategoryFilter> {
    let mut parser = Parser::new(input);
    parser.skip_whitespace();

    let filter = match parser.peek() {
        Some('+') => parser.parse_additive()?,
        Some('(') => parser.parse_node(0)?,
        Some(ch) => {
            return Err(FilterParseError::new(
                format!("expected '+' or '(' but found '{ch}'"),
                parser.position,
            ));
        }
        None => {
            return Err(FilterParseError::new(
                "expression is empty",
                parser.position,
            ));
        }
    };

    parser.skip_whitespace();
    if let Some(ch) = parser.peek() {
        return Err(FilterParseError::new(
            format!("unexpected trailing input '{ch}'"),
            parser.position,
        ));
    }
    Ok(filter)
}

struct Parser<'a> {
    input: &'a str,
    position: usize,
    terms: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            terms: 0,
        }
    }

    /// `+a+b+c`: a flat conjunction. Terms run to the next `+`.
    fn parse_additive(&mut self) -> ParseResult<CategoryFilter> {
        let mut terms = Vec::new();
        while self.peek() == Some('+') {
            self.advance();
            let start = self.position;
            while let Some(ch) = self.peek() {
                if ch == '+' {
                    break;
                }
                if matches!(ch, '(' | ')' | '=') {
                    return Err(FilterParseError::new(
                        format!("unexpected '{ch}' in category term"),
                        self.position,
                    ));
                }
                self.advance();
            }
            let raw = self.input[start..self.position].trim();
            if raw.is_empty() {
                return Err(FilterParseError::new(
                    "expected a category after '+'",
                    start,
                ));
            }
            terms.push(self.term(raw, start)?);
        }

        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(CategoryFilter::And(terms))
        }
    }

    /// One parenthesised node: `(cat=x)`, `(AND ...)`, `(OR ...)` or `(NOT x)`.
    fn parse_node(&mut self, depth: usize) -> ParseResult<CategoryFilter> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(FilterParseError::new(
                format!("nesting deeper than {MAX_NESTING_DEPTH} levels"),
                self.position,
            ));
        }

        self.expect('(')?;
        self.skip_whitespace();
        let word_start = self.position;
        let word = self.consume_word();
        self.skip_whitespace();

        if word.is_empty() {
            return Err(FilterParseError::new(
                "expected an operator or 'cat='",
                word_start,
            ));
        }

        if self.peek() == Some('=') {
            if !word.eq_ignore_ascii_case("cat") {
                return Err(FilterParseError::new(
                    format!("unknown attribute '{word}', expected 'cat'"),
                    word_start,
                ));
            }
            self.advance();
            return self.parse_equality();
        }

        let operator = word.to_ascii_uppercase();
        match operator.as_str() {
            "AND" | "OR" => {
                let children = self.parse_children(depth)?;
                if children.is_empty() {
                    return Err(FilterParseError::new(
                        format!("{operator} needs at least one operand"),
                        self.position,
                    ));
                }
                self.expect(')')?;
                if operator == "AND" {
                    Ok(CategoryFilter::And(children))
                } else {
                    Ok(CategoryFilter::Or(children))
                }
            }
            "NOT" => {
                let mut children = self.parse_children(depth)?;
                if children.len() != 1 {
                    return Err(FilterParseError::new(
                        format!("NOT takes exactly one operand, found {}", children.len()),
                        self.position,
                    ));
                }
                self.expect(')')?;
                Ok(CategoryFilter::Not(Box::new(children.remove(0))))
            }
            _ => Err(FilterParseError::new(
                format!("unknown operator '{word}'"),
                word_start,
            )),
        }
    }

    /// The value part of `(cat=value)`, after the `=`.
    fn parse_equality(&mut self) -> ParseResult<CategoryFilter> {
        let value_start = self.position;
        loop {
            match self.peek() {
                Some(')') => break,
                Some('(') | None => {
                    return Err(FilterParseError::new(
                        "unterminated category term",
                        value_start,
                    ));
                }
                Some(_) => self.advance(),
            }
        }
        let raw = self.input[value_start..self.position].trim();
        if raw.is_empty() {
            return Err(FilterParseError::new("empty category value", value_start));
        }
        let term = self.term(raw, value_start)?;
        self.expect(')')?;
        Ok(term)
    }

    fn parse_children(&mut self, depth: usize) -> ParseResult<Vec<CategoryFilter>> {
        let mut children = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('(') {
                children.push(self.parse_node(depth + 1)?);
            } else {
                break;
            }
        }
        Ok(children)
    }

    fn term(&mut self, raw: &str, offset: usize) -> ParseResult<CategoryFilter> {
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(FilterParseError::new(
                format!("more than {MAX_TERMS} category terms"),
                offset,
            ));
        }
        Ok(CategoryFilter::Equals(raw.to_lowercase()))
    }

    fn expect(&mut self, expected: char) -> ParseResult<()> {
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(FilterParseError::new(
                format!("expected '{expected}' but found '{ch}'"),
                self.position,
            )),
            None => Err(FilterParseError::new(
                format!("expected '{expected}' but reached end of input"),
                self.position,
            )),
        }
    }

    fn consume_word(&mut self) -> &'a str {
        let input = self.input;
        let start = self.position;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        &input[start..self.position]
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek() {
            self.position += ch.len_utf8();
        }
    }
}
