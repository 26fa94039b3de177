use crate::error::{ScriptError, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Arrow,

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    LeftShift,
    RightShift,
    Equal,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Walrus,

    // Compound assignment
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    DoubleSlashEqual,
    PercentEqual,
    DoubleStarEqual,
    AtEqual,
    AmpersandEqual,
    PipeEqual,
    CaretEqual,
    LeftShiftEqual,
    RightShiftEqual,

    // Literals
    Identifier,
    String,
    FString,
    Integer,
    Float,

    // Keywords
    And,
    Or,
    Not,
    Is,
    In,
    If,
    Elif,
    Else,
    For,
    While,
    Pass,
    Break,
    Continue,
    True,
    False,
    None,

    // Reserved words: recognised so the parser can name the construct
    Def,
    Class,
    Import,
    From,
    Try,
    Except,
    Finally,
    Raise,
    With,
    Return,
    Del,
    Global,
    Nonlocal,
    Assert,
    Lambda,
    Yield,
    Await,
    Async,
    As,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

fn keyword(text: &str) -> Option<TokenType> {
    let token_type = match text {
        "and" => TokenType::And,
        "or" => TokenType::Or,
        "not" => TokenType::Not,
        "is" => TokenType::Is,
        "in" => TokenType::In,
        "if" => TokenType::If,
        "elif" => TokenType::Elif,
        "else" => TokenType::Else,
        "for" => TokenType::For,
        "while" => TokenType::While,
        "pass" => TokenType::Pass,
        "break" => TokenType::Break,
        "continue" => TokenType::Continue,
        "True" => TokenType::True,
        "False" => TokenType::False,
        "None" => TokenType::None,
        "def" => TokenType::Def,
        "class" => TokenType::Class,
        "import" => TokenType::Import,
        "from" => TokenType::From,
        "try" => TokenType::Try,
        "except" => TokenType::Except,
        "finally" => TokenType::Finally,
        "raise" => TokenType::Raise,
        "with" => TokenType::With,
        "return" => TokenType::Return,
        "del" => TokenType::Del,
        "global" => TokenType::Global,
        "nonlocal" => TokenType::Nonlocal,
        "assert" => TokenType::Assert,
        "lambda" => TokenType::Lambda,
        "yield" => TokenType::Yield,
        "await" => TokenType::Await,
        "async" => TokenType::Async,
        "as" => TokenType::As,
        _ => return None,
    };
    Some(token_type)
}

/// A token; for string tokens the lexeme holds the decoded contents, for
/// integers the normalised decimal digits.
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub span: Span,
    /// Source offset and line of every decoded character. Only f-strings
    /// fill this in.
    pub positions: Vec<(usize, usize)>,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, span: Span) -> Self {
        Self {
            token_type,
            lexeme,
            span,
            positions: Vec::new(),
        }
    }

    /// Offset and line of the decoded character at `index`, or the end of
    /// the token when `index` runs past the body.
    pub fn position(&self, index: usize) -> (usize, usize) {
        self.positions
            .get(index)
            .copied()
            .unwrap_or((self.span.end, self.span.line))
    }
}

const TAB_WIDTH: usize = 8;

pub struct Lexer {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    start_line: usize,
    current: usize,
    line: usize,
    offset: usize,
    indents: Vec<usize>,
    nesting: usize,
    at_line_start: bool,
    layout: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            start_line: 1,
            current: 0,
            line: 1,
            offset: 0,
            indents: vec![0],
            nesting: 0,
            at_line_start: true,
            layout: true,
        }
    }

    /// Lexer for an expression embedded in a larger source (f-string
    /// replacement fields). Spans are shifted to `offset`/`line` and no
    /// layout tokens are produced.
    pub fn embedded(source: &str, offset: usize, line: usize) -> Self {
        Self {
            line,
            offset,
            layout: false,
            at_line_start: false,
            ..Self::new(source)
        }
    }

    pub fn scan_tokens(mut self) -> Result<Vec<Token>, ScriptError> {
        while !self.is_at_end() {
            if self.at_line_start && self.nesting == 0 && self.layout {
                self.indentation()?;
                continue;
            }
            self.start = self.current;
            self.start_line = self.line;
            self.scan_token()?;
        }

        self.start = self.current;
        self.start_line = self.line;
        if self.layout {
            let needs_newline = self
                .tokens
                .last()
                .is_some_and(|token| !matches!(token.token_type, TokenType::Newline | TokenType::Dedent));
            if needs_newline {
                self.add_token_with_content(TokenType::Newline, String::new());
            }
            while self.indents.len() > 1 {
                self.indents.pop();
                self.add_token_with_content(TokenType::Dedent, String::new());
            }
        }
        self.add_token_with_content(TokenType::Eof, String::new());

        Ok(self.tokens)
    }

    /// Measures leading whitespace of a logical line and emits INDENT/DEDENT.
    fn indentation(&mut self) -> Result<(), ScriptError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' => width = 0,
                _ => break,
            }
            self.current += 1;
        }

        match self.peek() {
            None => return Ok(()),
            Some('\n') | Some('\r') | Some('#') => {
                // Blank and comment-only lines do not affect indentation.
                while let Some(c) = self.peek() {
                    self.current += 1;
                    if c == '\n' {
                        self.line += 1;
                        break;
                    }
                }
                return Ok(());
            }
            _ => {}
        }

        self.start = self.current;
        self.start_line = self.line;
        self.at_line_start = false;

        let top = self.indents.last().copied().unwrap_or(0);
        if width > top {
            self.indents.push(width);
            self.add_token_with_content(TokenType::Indent, String::new());
        } else if width < top {
            while self.indents.last().is_some_and(|&level| level > width) {
                self.indents.pop();
                self.add_token_with_content(TokenType::Dedent, String::new());
            }
            if self.indents.last().copied() != Some(width) {
                return Err(ScriptError::syntax(
                    self.span(),
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(())
    }

    fn scan_token(&mut self) -> Result<(), ScriptError> {
        let c = self.advance();

        match c {
            '(' | '[' | '{' => {
                self.nesting += 1;
                self.add_token(match c {
                    '(' => TokenType::LeftParen,
                    '[' => TokenType::LeftBracket,
                    _ => TokenType::LeftBrace,
                });
            }
            ')' | ']' | '}' => {
                self.nesting = self.nesting.saturating_sub(1);
                self.add_token(match c {
                    ')' => TokenType::RightParen,
                    ']' => TokenType::RightBracket,
                    _ => TokenType::RightBrace,
                });
            }
            ',' => self.add_token(TokenType::Comma),
            ';' => self.add_token(TokenType::Semicolon),
            '~' => self.add_token(TokenType::Tilde),
            ':' => {
                let token_type = if self.match_char('=') {
                    TokenType::Walrus
                } else {
                    TokenType::Colon
                };
                self.add_token(token_type);
            }
            '.' => {
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.number()?;
                } else {
                    self.add_token(TokenType::Dot);
                }
            }
            '+' => self.operator('=', TokenType::PlusEqual, TokenType::Plus),
            '%' => self.operator('=', TokenType::PercentEqual, TokenType::Percent),
            '@' => self.operator('=', TokenType::AtEqual, TokenType::At),
            '&' => self.operator('=', TokenType::AmpersandEqual, TokenType::Ampersand),
            '|' => self.operator('=', TokenType::PipeEqual, TokenType::Pipe),
            '^' => self.operator('=', TokenType::CaretEqual, TokenType::Caret),
            '=' => self.operator('=', TokenType::EqualEqual, TokenType::Equal),
            '-' => {
                let token_type = if self.match_char('=') {
                    TokenType::MinusEqual
                } else if self.match_char('>') {
                    TokenType::Arrow
                } else {
                    TokenType::Minus
                };
                self.add_token(token_type);
            }
            '*' => {
                let token_type = if self.match_char('*') {
                    if self.match_char('=') {
                        TokenType::DoubleStarEqual
                    } else {
                        TokenType::DoubleStar
                    }
                } else if self.match_char('=') {
                    TokenType::StarEqual
                } else {
                    TokenType::Star
                };
                self.add_token(token_type);
            }
            '/' => {
                let token_type = if self.match_char('/') {
                    if self.match_char('=') {
                        TokenType::DoubleSlashEqual
                    } else {
                        TokenType::DoubleSlash
                    }
                } else if self.match_char('=') {
                    TokenType::SlashEqual
                } else {
                    TokenType::Slash
                };
                self.add_token(token_type);
            }
            '<' => {
                let token_type = if self.match_char('<') {
                    if self.match_char('=') {
                        TokenType::LeftShiftEqual
                    } else {
                        TokenType::LeftShift
                    }
                } else if self.match_char('=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.add_token(token_type);
            }
            '>' => {
                let token_type = if self.match_char('>') {
                    if self.match_char('=') {
                        TokenType::RightShiftEqual
                    } else {
                        TokenType::RightShift
                    }
                } else if self.match_char('=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(token_type);
            }
            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenType::BangEqual);
                } else {
                    return Err(ScriptError::syntax(self.span(), "invalid syntax: unexpected '!'"));
                }
            }
            '#' => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.current += 1;
                }
            }
            '\\' => {
                if self.match_char('\r') {
                    self.match_char('\n');
                } else if !self.match_char('\n') {
                    return Err(ScriptError::syntax(
                        self.span(),
                        "unexpected character after line continuation character",
                    ));
                }
                self.line += 1;
            }
            ' ' | '\r' | '\t' | '\x0c' => {}
            '\n' => {
                if self.nesting == 0 && self.layout {
                    let after_statement = self
                        .tokens
                        .last()
                        .is_some_and(|token| !matches!(token.token_type, TokenType::Newline));
                    if after_statement {
                        self.add_token(TokenType::Newline);
                    }
                    self.at_line_start = true;
                }
                self.line += 1;
            }
            '"' | '\'' => self.string(c, false, false)?,
            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier()?,
            _ => {
                return Err(ScriptError::syntax(
                    self.span(),
                    format!("invalid character '{}'", c),
                ));
            }
        }

        Ok(())
    }

    fn operator(&mut self, second: char, matched: TokenType, single: TokenType) {
        let token_type = if self.match_char(second) { matched } else { single };
        self.add_token(token_type);
    }

    fn advance(&mut self) -> char {
        let c = self.source.get(self.current).copied().unwrap_or('\0');
        self.current += 1;
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.current).copied()
    }

    fn peek_at(&self, distance: usize) -> Option<char> {
        self.source.get(self.current + distance).copied()
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.source[start..end].iter().collect()
    }

    fn span(&self) -> Span {
        Span::new(
            self.offset + self.start,
            self.offset + self.current.max(self.start + 1),
            self.start_line,
        )
    }

    fn string(&mut self, quote: char, raw: bool, formatted: bool) -> Result<(), ScriptError> {
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.current += 2;
        }

        let mut content = String::new();
        let mut positions = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                let message = if triple {
                    "unterminated triple-quoted string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(ScriptError::syntax(self.span(), message));
            };

            if c == quote {
                if !triple {
                    self.current += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.current += 3;
                    break;
                }
            }

            let position = (self.offset + self.current, self.line);
            let decoded = content.len();
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax(self.span(), "unterminated string literal"));
                }
                self.line += 1;
            }

            self.current += 1;
            if c == '\\' {
                self.escape(raw, &mut content)?;
            } else {
                content.push(c);
            }
            if formatted {
                positions.extend(content[decoded..].chars().map(|_| position));
            }
        }

        if formatted {
            self.add_token_with_content(TokenType::FString, content);
            if let Some(token) = self.tokens.last_mut() {
                token.positions = positions;
            }
        } else {
            self.add_token_with_content(TokenType::String, content);
        }
        Ok(())
    }

    fn escape(&mut self, raw: bool, content: &mut String) -> Result<(), ScriptError> {
        let Some(c) = self.peek() else {
            return Err(ScriptError::syntax(self.span(), "unterminated string literal"));
        };
        self.current += 1;

        if raw {
            content.push('\\');
            content.push(c);
            if c == '\n' {
                self.line += 1;
            }
            return Ok(());
        }

        match c {
            '\n' => self.line += 1,
            '\\' => content.push('\\'),
            '\'' => content.push('\''),
            '"' => content.push('"'),
            'n' => content.push('\n'),
            't' => content.push('\t'),
            'r' => content.push('\r'),
            '0' => content.push('\0'),
            'a' => content.push('\x07'),
            'b' => content.push('\x08'),
            'f' => content.push('\x0c'),
            'v' => content.push('\x0b'),
            'x' => content.push(self.hex_escape(2)?),
            'u' => content.push(self.hex_escape(4)?),
            'U' => content.push(self.hex_escape(8)?),
            other => {
                content.push('\\');
                content.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, ScriptError> {
        let end = self.current + digits;
        if end > self.source.len() {
            return Err(ScriptError::syntax(self.span(), "truncated escape sequence"));
        }
        let text = self.text(self.current, end);
        self.current = end;
        u32::from_str_radix(&text, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ScriptError::syntax(self.span(), format!("invalid escape sequence '{}'", text)))
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let first = self.source[self.start];
        if first == '0' {
            let radix = match self.peek() {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.current += 1;
                return self.radix_integer(radix);
            }
        }

        let mut is_float = first == '.';
        self.digits();
        if !is_float && self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| c.is_alphabetic() || c == '_') {
            is_float = true;
            self.current += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.current += digit_at;
                self.digits();
            }
        }
        self.reject_identifier_suffix()?;

        let text: String = self.text(self.start, self.current).replace('_', "");
        if is_float {
            if text.parse::<f64>().is_err() {
                return Err(ScriptError::syntax(self.span(), format!("invalid float literal '{}'", text)));
            }
            self.add_token_with_content(TokenType::Float, text);
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(ScriptError::syntax_with_help(
                    self.span(),
                    "leading zeros in decimal integer literals are not permitted",
                    "use an 0o prefix for octal integers",
                ));
            }
            let value = text
                .parse::<i64>()
                .map_err(|_| ScriptError::syntax(self.span(), format!("integer literal '{}' is too large", text)))?;
            self.add_token_with_content(TokenType::Integer, value.to_string());
        }
        Ok(())
    }

    fn radix_integer(&mut self, radix: u32) -> Result<(), ScriptError> {
        let digits_start = self.current;
        while self.peek().is_some_and(|c| c.is_digit(radix) || c == '_') {
            self.current += 1;
        }
        self.reject_identifier_suffix()?;
        let digits = self.text(digits_start, self.current).replace('_', "");
        let value = i64::from_str_radix(&digits, radix)
            .map_err(|_| ScriptError::syntax(self.span(), "invalid integer literal"))?;
        self.add_token_with_content(TokenType::Integer, value.to_string());
        Ok(())
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.current += 1;
        }
    }

    fn reject_identifier_suffix(&mut self) -> Result<(), ScriptError> {
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.current += 1;
            return Err(ScriptError::syntax(self.span(), "invalid decimal literal"));
        }
        Ok(())
    }

    fn identifier(&mut self) -> Result<(), ScriptError> {
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.current += 1;
        }

        let text = self.text(self.start, self.current);
        if let Some(quote) = self.peek().filter(|c| *c == '"' || *c == '\'') {
            let prefix = text.to_ascii_lowercase();
            let (raw, formatted) = match prefix.as_str() {
                "r" => (true, false),
                "u" => (false, false),
                "f" => (false, true),
                "rf" | "fr" => (true, true),
                "b" | "br" | "rb" => {
                    return Err(ScriptError::syntax(self.span(), "bytes literals are not supported"));
                }
                _ => {
                    return Err(ScriptError::syntax(self.span(), "invalid syntax"));
                }
            };
            self.current += 1;
            return self.string(quote, raw, formatted);
        }

        let token_type = keyword(&text).unwrap_or(TokenType::Identifier);
        self.add_token_with_content(token_type, text);
        Ok(())
    }

    fn add_token(&mut self, token_type: TokenType) {
        let text = self.text(self.start, self.current);
        self.add_token_with_content(token_type, text);
    }

    fn add_token_with_content(&mut self, token_type: TokenType, lexeme: String) {
        let span = Span::new(self.offset + self.start, self.offset + self.current, self.start_line);
        self.tokens.push(Token::new(token_type, lexeme, span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn types(source: &str) -> Vec<TokenType> {
        Lexer::new(source)
            .scan_tokens()
            .expect("lexing failed")
            .into_iter()
            .map(|token| token.token_type)
            .collect()
    }

    #[test]
    fn indentation_produces_layout_tokens() {
        use TokenType::*;
        assert_eq!(
            types("if x:\n    y = 1\nz"),
            vec![
                If, Identifier, Colon, Newline, Indent, Identifier, Equal, Integer, Newline, Dedent,
                Identifier, Newline, Eof
            ]
        );
    }

    #[test]
    fn blank_lines_and_comments_are_ignored() {
        use TokenType::*;
        assert_eq!(
            types("# header\n\na = 1  # trailing\n\n   \n"),
            vec![Identifier, Equal, Integer, Newline, Eof]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        use TokenType::*;
        assert_eq!(
            types("x = [1,\n     2]\n"),
            vec![Identifier, Equal, LeftBracket, Integer, Comma, Integer, RightBracket, Newline, Eof]
        );
    }

    #[test]
    fn compound_operators_use_longest_match() {
        use TokenType::*;
        assert_eq!(
            types("a //= 2 ** 3"),
            vec![Identifier, DoubleSlashEqual, Integer, DoubleStar, Integer, Newline, Eof]
        );
    }

    #[test]
    fn string_escapes_and_prefixes() {
        let tokens = Lexer::new(r#"'a\tb' r'a\tb' f"{x}""#).scan_tokens().unwrap();
        assert_eq!(tokens[0].lexeme, "a\tb");
        assert_eq!(tokens[1].lexeme, "a\\tb");
        assert_eq!(tokens[2].token_type, TokenType::FString);
        assert_eq!(tokens[2].lexeme, "{x}");
    }

    #[test]
    fn triple_quoted_strings_track_lines() {
        let tokens = Lexer::new("s = '''a\nb'''\nt = 1").scan_tokens().unwrap();
        assert_eq!(tokens[2].lexeme, "a\nb");
        let t = tokens.iter().find(|token| token.lexeme == "t").unwrap();
        assert_eq!(t.span.line, 3);
    }

    #[test]
    fn number_forms() {
        let tokens = Lexer::new("0x1F 1_000 1.5 .5 1e3").scan_tokens().unwrap();
        let lexemes: Vec<&str> = tokens[..5].iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, vec!["31", "1000", "1.5", ".5", "1e3"]);
        assert_eq!(tokens[2].token_type, TokenType::Float);
    }

    #[test]
    fn lexical_errors() {
        assert!(Lexer::new("'abc").scan_tokens().is_err());
        assert!(Lexer::new("x = 012").scan_tokens().is_err());
        assert!(Lexer::new("x = 99999999999999999999").scan_tokens().is_err());
        assert!(Lexer::new("x = $").scan_tokens().is_err());
        assert!(Lexer::new("b'bytes'").scan_tokens().is_err());
        assert!(Lexer::new("if x:\n    a\n  b").scan_tokens().is_err());
    }

    #[test]
    fn lines_are_tracked() {
        let tokens = Lexer::new("a\nb\n\nc").scan_tokens().unwrap();
        let lines: Vec<usize> = tokens
            .iter()
            .filter(|t| t.token_type == TokenType::Identifier)
            .map(|t| t.span.line)
            .collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }
}
