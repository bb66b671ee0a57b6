use crate::{
    token::{self, Token},
    Position,
};

/// Scanner reads bytes from the source code and groups them in to
/// a sequence of tokens. Tokens are produced on demand as the compiler asks
/// for them, there is never a full list of tokens in memory.
#[derive(Debug)]
pub struct Scanner<'src> {
    src: &'src str,
    start: usize,
    current: usize,
    start_pos: Position,
    pos: Position,
}

impl<'src> Scanner<'src> {
    /// Create a new scanner
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            start: 0,
            current: 0,
            start_pos: Position::default(),
            pos: Position::default(),
        }
    }

    /// Consume and return the next token from source. Lexical errors are
    /// reported as tokens of type [`token::Type::Error`].
    pub fn scan(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;
        self.start_pos = self.pos;
        if self.is_source_end() {
            return self.token(token::Type::Eof);
        }
        match self.advance() {
            b'(' => self.token(token::Type::LParen),
            b')' => self.token(token::Type::RParen),
            b'{' => self.token(token::Type::LBrace),
            b'}' => self.token(token::Type::RBrace),
            b';' => self.token(token::Type::Semicolon),
            b',' => self.token(token::Type::Comma),
            b'.' => self.token(token::Type::Dot),
            b'-' => self.token(token::Type::Minus),
            b'+' => self.token(token::Type::Plus),
            b'/' => self.token(token::Type::Slash),
            b'*' => self.token(token::Type::Star),
            b'!' => {
                if self.consume(b'=') {
                    self.token(token::Type::BangEqual)
                } else {
                    self.token(token::Type::Bang)
                }
            }
            b'=' => {
                if self.consume(b'=') {
                    self.token(token::Type::EqualEqual)
                } else {
                    self.token(token::Type::Equal)
                }
            }
            b'<' => {
                if self.consume(b'=') {
                    self.token(token::Type::LessEqual)
                } else {
                    self.token(token::Type::Less)
                }
            }
            b'>' => {
                if self.consume(b'=') {
                    self.token(token::Type::GreaterEqual)
                } else {
                    self.token(token::Type::Greater)
                }
            }
            b'"' => self.string(),
            n if is_digit(n) => self.number(),
            c if is_alpha(c) => self.identity(),
            _ => self.error("Unexpected character."),
        }
    }

    fn identity(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.advance();
        }
        self.token(self.identity_token_type())
    }

    /// Determine if an identifer if a keyword by examine its prefix tree.
    fn identity_token_type(&self) -> token::Type {
        let lexeme = self.lexeme().as_bytes();
        match lexeme[0] {
            b'a' => return self.check_keyword(1, b"nd", token::Type::And),
            b'c' => return self.check_keyword(1, b"lass", token::Type::Class),
            b'e' => return self.check_keyword(1, b"lse", token::Type::Else),
            b'i' => return self.check_keyword(1, b"f", token::Type::If),
            b'f' if lexeme.len() > 1 => match lexeme[1] {
                b'a' => return self.check_keyword(2, b"lse", token::Type::False),
                b'o' => return self.check_keyword(2, b"r", token::Type::For),
                b'u' => return self.check_keyword(2, b"n", token::Type::Fun),
                _ => {}
            },
            b'n' => return self.check_keyword(1, b"il", token::Type::Nil),
            b'o' => return self.check_keyword(1, b"r", token::Type::Or),
            b'p' => return self.check_keyword(1, b"rint", token::Type::Print),
            b'r' => return self.check_keyword(1, b"eturn", token::Type::Return),
            b's' => return self.check_keyword(1, b"uper", token::Type::Super),
            b't' if lexeme.len() > 1 => match lexeme[1] {
                b'h' => return self.check_keyword(2, b"is", token::Type::This),
                b'r' => return self.check_keyword(2, b"ue", token::Type::True),
                _ => {}
            },
            b'v' => return self.check_keyword(1, b"ar", token::Type::Var),
            b'w' => return self.check_keyword(1, b"hile", token::Type::While),
            _ => {}
        }
        token::Type::Ident
    }

    fn check_keyword(&self, start: usize, rest: &[u8], typ: token::Type) -> token::Type {
        let lexeme = self.lexeme().as_bytes();
        if lexeme.len() == start + rest.len() && &lexeme[start..] == rest {
            return typ;
        }
        token::Type::Ident
    }

    fn number(&mut self) -> Token<'src> {
        while is_digit(self.peek()) {
            self.advance();
        }
        if self.peek() == b'.' && is_digit(self.peek_next()) {
            self.advance();
            while is_digit(self.peek()) {
                self.advance();
            }
        }
        self.token(token::Type::Number)
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_source_end() {
            self.advance();
        }

        if self.is_source_end() {
            return self.error("Unterminated string.");
        }
        self.advance();
        self.token(token::Type::String)
    }

    fn lexeme(&self) -> &'src str {
        &self.src[self.start..self.current]
    }

    fn token(&self, typ: token::Type) -> Token<'src> {
        Token {
            typ,
            lexeme: self.lexeme(),
            pos: self.start_pos,
        }
    }

    fn error(&self, message: &'static str) -> Token<'src> {
        Token {
            typ: token::Type::Error,
            lexeme: message,
            pos: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' | b'\n' => {
                    self.advance();
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        while self.peek() != b'\n' && !self.is_source_end() {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn peek(&self) -> u8 {
        if self.is_source_end() {
            b'\0'
        } else {
            self.src.as_bytes()[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.src.len() {
            b'\0'
        } else {
            self.src.as_bytes()[self.current + 1]
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.src.as_bytes()[self.current];
        if c == b'\n' {
            self.pos.next_line();
        } else {
            self.pos.next_column();
        }
        self.current += 1;
        // A non-ASCII character is reported as a single unexpected character.
        if !c.is_ascii() {
            while !self.src.is_char_boundary(self.current) {
                self.current += 1;
            }
        }
        c
    }

    fn consume(&mut self, expected: u8) -> bool {
        if self.peek() != expected || self.is_source_end() {
            return false;
        }
        self.advance();
        true
    }

    fn is_source_end(&self) -> bool {
        self.current >= self.src.len()
    }
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}
