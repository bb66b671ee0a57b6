/// Lox token. The value of a literal is not evaluated eagerly, the compiler
/// reads it from the lexeme when it emits the constant.
#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    /// What kind of token this is
    pub typ: Type,
    /// The string segment in source that represents this token. For an
    /// error token, this holds the error message instead.
    pub lexeme: &'src str,
    /// Where the token starts
    pub pos: Position,
}

impl Token<'_> {
    /// The token that ends every source, also used before the first token is scanned.
    pub fn eof(pos: Position) -> Self {
        Self {
            typ: Type::Eof,
            lexeme: "",
            pos,
        }
    }
}

/// Kinds of token, one per operator and keyword plus literals and
/// the two markers produced by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `-`
    Minus,
    /// `+`
    Plus,
    /// `;`
    Semicolon,
    /// `/`
    Slash,
    /// `*`
    Star,
    /// `!`
    Bang,
    /// `!=`
    BangEqual,
    /// `=`
    Equal,
    /// `==`
    EqualEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// Identifier
    Ident,
    /// String literal, the lexeme includes the quotes
    String,
    /// Number literal, integer or decimal
    Number,
    /// `and`
    And,
    /// `class`
    Class,
    /// `else`
    Else,
    /// `false`
    False,
    /// `for`
    For,
    /// `fun`
    Fun,
    /// `if`
    If,
    /// `nil`
    Nil,
    /// `or`
    Or,
    /// `print`
    Print,
    /// `return`
    Return,
    /// `super`
    Super,
    /// `this`
    This,
    /// `true`
    True,
    /// `var`
    Var,
    /// `while`
    While,
    /// A lexical error, the lexeme is the error message
    Error,
    /// End of the source
    Eof,
}

/// Where a token starts, lines and columns count from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number
    pub line: usize,
    /// Column number, in bytes
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl Position {
    /// Move to the start of the next line.
    pub fn next_line(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    /// Move one column to the right.
    pub fn next_column(&mut self) {
        self.column += 1;
    }
}
