use crate::script::ScriptError;
use std::rc::Rc;

/// 词法单元类型
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(Rc<str>),
    Number(f64),
    String(Rc<str>),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    In,
    Break,
    Continue,
    New,
    This,
    Null,
    True,
    False,
    Typeof,
    Instanceof,
    Delete,
    Throw,
    Try,
    Catch,
    Finally,
}

impl Keyword {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "var" => Self::Var,
            "let" => Self::Let,
            "const" => Self::Const,
            "function" => Self::Function,
            "return" => Self::Return,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "do" => Self::Do,
            "for" => Self::For,
            "in" => Self::In,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "new" => Self::New,
            "this" => Self::This,
            "null" => Self::Null,
            "true" => Self::True,
            "false" => Self::False,
            "typeof" => Self::Typeof,
            "instanceof" => Self::Instanceof,
            "delete" => Self::Delete,
            "throw" => Self::Throw,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            _ => return None,
        })
    }
}

/// 标点与运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Semicolon,
    Comma,
    Dot,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
    /// 该 token 之前是否出现过换行（用于可选分号和 return）
    pub newline_before: bool,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    current: usize,
    line: u32,
    column: u32,
    unit: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, unit: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            current: 0,
            line: 1,
            column: 1,
            unit,
        }
    }

    /// 将源码切分为 token 序列，末尾总是 Eof
    pub fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let kind = match self.peek() {
                None => TokenKind::Eof,
                Some(c) => self.scan(c)?,
            };
            let is_eof = kind == TokenKind::Eof;
            tokens.push(Token {
                kind,
                line,
                column,
                newline_before,
            });
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.current).copied()?;
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            unit: self.unit.to_string(),
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    /// 跳过空白和注释，返回是否跨越了换行
    fn skip_trivia(&mut self) -> Result<bool, ScriptError> {
        let mut newline = false;
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    newline = true;
                    self.advance();
                }
                c if c.is_whitespace() || c == '\u{feff}' => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '/' if self.peek_next() == Some('*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            None => return Err(self.error("unterminated comment")),
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(newline)
    }

    fn scan(&mut self, c: char) -> Result<TokenKind, ScriptError> {
        if c.is_ascii_digit() || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit()))
        {
            return self.number();
        }
        if c == '"' || c == '\'' {
            return self.string(c);
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            return Ok(self.word());
        }

        self.advance();
        let punct = match c {
            '{' => Punct::LeftBrace,
            '}' => Punct::RightBrace,
            '(' => Punct::LeftParen,
            ')' => Punct::RightParen,
            '[' => Punct::LeftBracket,
            ']' => Punct::RightBracket,
            ';' => Punct::Semicolon,
            ',' => Punct::Comma,
            '.' => Punct::Dot,
            ':' => Punct::Colon,
            '?' => Punct::Question,
            '+' if self.eat('+') => Punct::PlusPlus,
            '+' if self.eat('=') => Punct::PlusAssign,
            '+' => Punct::Plus,
            '-' if self.eat('-') => Punct::MinusMinus,
            '-' if self.eat('=') => Punct::MinusAssign,
            '-' => Punct::Minus,
            '*' if self.eat('=') => Punct::StarAssign,
            '*' => Punct::Star,
            '/' if self.eat('=') => Punct::SlashAssign,
            '/' => Punct::Slash,
            '%' if self.eat('=') => Punct::PercentAssign,
            '%' => Punct::Percent,
            '=' if self.eat('=') => {
                if self.eat('=') {
                    Punct::StrictEq
                } else {
                    Punct::Eq
                }
            }
            '=' => Punct::Assign,
            '!' if self.eat('=') => {
                if self.eat('=') {
                    Punct::StrictNotEq
                } else {
                    Punct::NotEq
                }
            }
            '!' => Punct::Not,
            '<' if self.eat('=') => Punct::LessEq,
            '<' => Punct::Less,
            '>' if self.eat('=') => Punct::GreaterEq,
            '>' => Punct::Greater,
            '&' if self.eat('&') => Punct::And,
            '|' if self.eat('|') => Punct::Or,
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(TokenKind::Punct(punct))
    }

    fn number(&mut self) -> Result<TokenKind, ScriptError> {
        let start = self.current;
        if self.peek() == Some('0') && matches!(self.peek_next(), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let digits_start = self.current;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits: String = self.chars[digits_start..self.current].iter().collect();
            return u64::from_str_radix(&digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| self.error("invalid hex literal"));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.error("missing exponent"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.error("identifier starts immediately after numeric literal"));
        }

        let text: String = self.chars[start..self.current].iter().collect();
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ScriptError> {
        self.advance();
        let mut value = String::new();
        loop {
            let c = match self.advance() {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some(c) => c,
            };
            if c == quote {
                break;
            }
            if c != '\\' {
                value.push(c);
                continue;
            }
            let escaped = self
                .advance()
                .ok_or_else(|| self.error("unterminated string literal"))?;
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'v' => value.push('\u{b}'),
                '0' => value.push('\0'),
                'x' => value.push(self.hex_escape(2)?),
                'u' => value.push(self.hex_escape(4)?),
                // 行续接
                '\n' => {}
                other => value.push(other),
            }
        }
        Ok(TokenKind::String(value.into()))
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, ScriptError> {
        let mut code = 0u32;
        for _ in 0..len {
            let digit = self
                .advance()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid escape sequence"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn word(&mut self) -> TokenKind {
        let start = self.current;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.advance();
        }
        let word: String = self.chars[start..self.current].iter().collect();
        match Keyword::parse(&word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(word.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, "test.js")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = kinds("a === b !== c += 1");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Punct(Punct::StrictEq),
                TokenKind::Identifier("b".into()),
                TokenKind::Punct(Punct::StrictNotEq),
                TokenKind::Identifier("c".into()),
                TokenKind::Punct(Punct::PlusAssign),
                TokenKind::Number(1.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_and_numbers() {
        let tokens = kinds(r#"'it\'s' "tab\there" 0x1F 2.5e2 .5"#);
        assert_eq!(tokens[0], TokenKind::String("it's".into()));
        assert_eq!(tokens[1], TokenKind::String("tab\there".into()));
        assert_eq!(tokens[2], TokenKind::Number(31.0));
        assert_eq!(tokens[3], TokenKind::Number(250.0));
        assert_eq!(tokens[4], TokenKind::Number(0.5));
    }

    #[test]
    fn test_skips_comments_and_tracks_newlines() {
        let tokens = Lexer::new("/* header\n */ var x // trailing\nx", "test.js")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Var));
        assert!(tokens[0].newline_before);
        assert_eq!(tokens[0].line, 2);
        assert!(!tokens[1].newline_before);
        assert!(tokens[2].newline_before);
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn test_unterminated_string_is_syntax_error() {
        let err = Lexer::new("var s = 'open", "broken.js").tokenize().unwrap_err();
        match err {
            ScriptError::Syntax { unit, line, .. } => {
                assert_eq!(unit, "broken.js");
                assert_eq!(line, 1);
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_character() {
        assert!(Lexer::new("a # b", "test.js").tokenize().is_err());
    }
}
