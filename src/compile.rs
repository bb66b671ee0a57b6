//! Single-pass compiler from Lox source code to bytecode.
//!
//! Scanning, parsing and code generation are interleaved, there is no syntax tree. The
//! parser asks the scanner for tokens one at a time and emits bytecodes as soon as it has
//! seen enough of the source. Expressions are parsed with a Pratt parser driven by the
//! table in [`Parser::rule`].

use tracing::debug;

use crate::{
    token::{self, Token},
    Chunk, CompileError, ErrorLocation, GcRoots, Heap, ObjFunction, ObjRef, OpCode, Scanner,
    Value,
};

/// Locals are addressed by a one-byte operand.
const MAX_LOCALS: usize = u8::MAX as usize + 1;

/// Upvalues are addressed by a one-byte operand.
const MAX_UPVALUES: usize = u8::MAX as usize + 1;

/// Compile the given source code into the function of the top-level script.
///
/// Objects created while compiling live in `heap`. If a collection is triggered, the
/// functions being compiled and everything reachable from `roots` are kept alive.
/// Every error found in the source is returned, not only the first one.
pub fn compile(
    src: &str,
    heap: &mut Heap,
    roots: &dyn GcRoots,
    print_code: bool,
) -> Result<ObjRef, Vec<CompileError>> {
    let mut parser = Parser::new(src, heap, roots, print_code);
    parser.init_compiler(FunctionKind::Script);
    parser.advance();
    while !parser.match_token(token::Type::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();
    if !parser.errors.is_empty() {
        return Err(parser.errors);
    }
    Ok(parser.alloc_function(function))
}

/// Precedence from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Function,
    Initializer,
    Method,
    Script,
}

#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    /// `None` while the variable is declared but its initializer is not compiled yet.
    depth: Option<usize>,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Upvalue {
    index: u8,
    is_local: bool,
}

/// State of the function being compiled. Nested functions push a new one on top of the
/// compiler stack, the one below is the lexically enclosing function.
#[derive(Debug)]
struct FunctionCompiler<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<Upvalue>,
    scope_depth: usize,
}

impl<'src> FunctionCompiler<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot zero holds the receiver for methods and the callee for functions.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Function | FunctionKind::Script => "",
        };
        let mut locals = Vec::with_capacity(MAX_LOCALS);
        locals.push(Local {
            name: slot_zero,
            depth: Some(0),
            is_captured: false,
        });
        Self {
            function: ObjFunction::new(name),
            kind,
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

#[derive(Debug)]
struct ClassCompiler {
    has_superclass: bool,
}

/// Functions being compiled are not in the heap yet, but their constants are.
struct CompilerRoots<'a, 'src> {
    compilers: &'a [FunctionCompiler<'src>],
    outer: &'a dyn GcRoots,
}

impl GcRoots for CompilerRoots<'_, '_> {
    fn mark_roots(&self, heap: &mut Heap) {
        for compiler in self.compilers {
            if let Some(name) = compiler.function.name {
                heap.mark_object(name);
            }
            for constant in compiler.function.chunk.constants() {
                heap.mark_value(*constant);
            }
        }
        self.outer.mark_roots(heap);
    }
}

/// The parser holds the whole compilation state.
struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'h mut Heap,
    roots: &'h dyn GcRoots,
    compilers: Vec<FunctionCompiler<'src>>,
    classes: Vec<ClassCompiler>,
    print_code: bool,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(src: &'src str, heap: &'h mut Heap, roots: &'h dyn GcRoots, print_code: bool) -> Self {
        let eof = Token::eof(token::Position::default());
        Self {
            scanner: Scanner::new(src),
            current: eof,
            previous: eof,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            roots,
            compilers: Vec::new(),
            classes: Vec::new(),
            print_code,
        }
    }

    fn rule(typ: token::Type) -> ParseRule<'src, 'h> {
        use token::Type as T;
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match typ {
            T::LParen => (Some(Self::grouping), Some(Self::call), Precedence::Call),
            T::Dot => (None, Some(Self::dot), Precedence::Call),
            T::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            T::Plus => (None, Some(Self::binary), Precedence::Term),
            T::Slash | T::Star => (None, Some(Self::binary), Precedence::Factor),
            T::Bang => (Some(Self::unary), None, Precedence::None),
            T::BangEqual | T::EqualEqual => (None, Some(Self::binary), Precedence::Equality),
            T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
                (None, Some(Self::binary), Precedence::Comparison)
            }
            T::Ident => (Some(Self::variable), None, Precedence::None),
            T::String => (Some(Self::string), None, Precedence::None),
            T::Number => (Some(Self::number), None, Precedence::None),
            T::And => (None, Some(Self::and), Precedence::And),
            T::Or => (None, Some(Self::or), Precedence::Or),
            T::False | T::True | T::Nil => (Some(Self::literal), None, Precedence::None),
            T::Super => (Some(Self::super_), None, Precedence::None),
            T::This => (Some(Self::this), None, Precedence::None),
            T::RParen
            | T::LBrace
            | T::RBrace
            | T::Comma
            | T::Semicolon
            | T::Equal
            | T::Class
            | T::Else
            | T::For
            | T::Fun
            | T::If
            | T::Print
            | T::Return
            | T::Var
            | T::While
            | T::Error
            | T::Eof => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    // ---- Declarations and statements ----

    fn declaration(&mut self) {
        if self.match_token(token::Type::Class) {
            self.class_declaration();
        } else if self.match_token(token::Type::Fun) {
            self.fun_declaration();
        } else if self.match_token(token::Type::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(token::Type::Ident, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit_bytes(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCompiler {
            has_superclass: false,
        });

        if self.match_token(token::Type::Less) {
            self.consume(token::Type::Ident, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // Each subclass gets its own scope so `super` resolves to its own superclass.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name.lexeme, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        // Keep the class on the stack while its methods are bound.
        self.named_variable(class_name.lexeme, false);
        self.consume(token::Type::LBrace, "Expect '{' before class body.");
        while !self.check(token::Type::RBrace) && !self.check(token::Type::Eof) {
            self.method();
        }
        self.consume(token::Type::RBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if let Some(class) = self.classes.pop() {
            if class.has_superclass {
                self.end_scope();
            }
        }
    }

    fn method(&mut self) {
        self.consume(token::Type::Ident, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_bytes(OpCode::Method, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function can refer to itself in its body.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.init_compiler(kind);
        self.begin_scope();

        self.consume(token::Type::LParen, "Expect '(' after function name.");
        if !self.check(token::Type::RParen) {
            loop {
                let function = &mut self.compiler_mut().function;
                if function.arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(token::Type::Comma) {
                    break;
                }
            }
        }
        self.consume(token::Type::RParen, "Expect ')' after parameters.");
        self.consume(token::Type::LBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let function = self.alloc_function(function);
        let constant = self.make_constant(Value::Obj(function));
        self.emit_bytes(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(token::Type::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            token::Type::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(token::Type::Print) {
            self.print_statement();
        } else if self.match_token(token::Type::For) {
            self.for_statement();
        } else if self.match_token(token::Type::If) {
            self.if_statement();
        } else if self.match_token(token::Type::Return) {
            self.return_statement();
        } else if self.match_token(token::Type::While) {
            self.while_statement();
        } else if self.match_token(token::Type::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(token::Type::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(token::Type::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn return_statement(&mut self) {
        if self.compiler().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(token::Type::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(token::Type::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(token::Type::LParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(token::Type::RParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(token::Type::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().code().len();
        self.consume(token::Type::LParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(token::Type::RParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(token::Type::LParen, "Expect '(' after 'for'.");
        if self.match_token(token::Type::Semicolon) {
            // No initializer.
        } else if self.match_token(token::Type::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().code().len();
        let mut exit_jump = None;
        if !self.match_token(token::Type::Semicolon) {
            self.expression();
            self.consume(token::Type::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(token::Type::RParen) {
            // The increment runs after the body, so jump over it now and loop back to it
            // at the end of the body.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().code().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(token::Type::RParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn block(&mut self) {
        while !self.check(token::Type::RBrace) && !self.check(token::Type::Eof) {
            self.declaration();
        }
        self.consume(token::Type::RBrace, "Expect '}' after block.");
    }

    /// Skip tokens until a statement boundary so one mistake is reported once.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.typ != token::Type::Eof {
            if self.previous.typ == token::Type::Semicolon {
                return;
            }
            match self.current.typ {
                token::Type::Class
                | token::Type::Fun
                | token::Type::Var
                | token::Type::For
                | token::Type::If
                | token::Type::While
                | token::Type::Print
                | token::Type::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- Expressions ----

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match Self::rule(self.previous.typ).prefix {
            Some(prefix) => prefix,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.typ).precedence {
            self.advance();
            if let Some(infix) = Self::rule(self.previous.typ).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(token::Type::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(token::Type::RParen, "Expect ')' after expression.");
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_bytes(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(token::Type::Ident, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(token::Type::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty, name);
        } else if self.match_token(token::Type::LParen) {
            let argc = self.argument_list();
            self.emit_bytes(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_bytes(OpCode::GetProperty, name);
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.typ;
        self.parse_precedence(Precedence::Unary);
        match operator {
            token::Type::Bang => self.emit_op(OpCode::Not),
            token::Type::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("Unary operators are either '!' or '-'."),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.typ;
        let rule = Self::rule(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
            token::Type::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            token::Type::EqualEqual => self.emit_op(OpCode::Equal),
            token::Type::Greater => self.emit_op(OpCode::Greater),
            token::Type::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            token::Type::Less => self.emit_op(OpCode::Less),
            token::Type::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            token::Type::Plus => self.emit_op(OpCode::Add),
            token::Type::Minus => self.emit_op(OpCode::Subtract),
            token::Type::Star => self.emit_op(OpCode::Multiply),
            token::Type::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("Token {:?} is not a binary operator.", operator),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let s = self.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(s));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.typ {
            token::Type::False => self.emit_op(OpCode::False),
            token::Type::Nil => self.emit_op(OpCode::Nil),
            token::Type::True => self.emit_op(OpCode::True),
            _ => unreachable!("Literals are 'false', 'nil' or 'true'."),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.")
            }
            Some(_) => {}
        }

        self.consume(token::Type::Dot, "Expect '.' after 'super'.");
        self.consume(token::Type::Ident, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.match_token(token::Type::LParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_bytes(OpCode::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_bytes(OpCode::GetSuper, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(token::Type::RParen) {
            loop {
                self.expression();
                if argc == u8::MAX as usize {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_token(token::Type::Comma) {
                    break;
                }
            }
        }
        self.consume(token::Type::RParen, "Expect ')' after arguments.");
        argc.min(u8::MAX as usize) as u8
    }

    // ---- Variables and scopes ----

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(token::Type::Ident, message);
        self.declare_variable();
        if self.compiler().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let name = self.intern(name);
        self.make_constant(Value::Obj(name))
    }

    fn declare_variable(&mut self) {
        let compiler = self.compiler();
        if compiler.scope_depth == 0 {
            return;
        }

        let name = self.previous.lexeme;
        let redeclared = compiler
            .locals
            .iter()
            .rev()
            .take_while(|local| !matches!(local.depth, Some(d) if d < compiler.scope_depth))
            .any(|local| local.name == name);
        if redeclared {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.compiler().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler_mut().locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let compiler = self.compiler_mut();
        if compiler.scope_depth == 0 {
            return;
        }
        let depth = compiler.scope_depth;
        if let Some(local) = compiler.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal, global);
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.compilers.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(top, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(index) = self.resolve_upvalue(top, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, index)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(token::Type::Equal) {
            self.expression();
            self.emit_bytes(set_op, arg);
        } else {
            self.emit_bytes(get_op, arg);
        }
    }

    fn resolve_local(&mut self, compiler: usize, name: &str) -> Option<u8> {
        let (slot, local) = self.compilers[compiler]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)?;
        if local.depth.is_none() {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot as u8)
    }

    /// Look for a local variable in the enclosing functions. When found, every function
    /// between the declaring one and `compiler` captures it as an upvalue.
    fn resolve_upvalue(&mut self, compiler: usize, name: &str) -> Option<u8> {
        if compiler == 0 {
            return None;
        }
        let enclosing = compiler - 1;
        if let Some(slot) = self.resolve_local(enclosing, name) {
            self.compilers[enclosing].locals[slot as usize].is_captured = true;
            return Some(self.add_upvalue(compiler, slot, true));
        }
        if let Some(index) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(compiler, index, false));
        }
        None
    }

    fn add_upvalue(&mut self, compiler: usize, index: u8, is_local: bool) -> u8 {
        let upvalue = Upvalue { index, is_local };
        let upvalues = &self.compilers[compiler].upvalues;
        if let Some(existing) = upvalues.iter().position(|u| *u == upvalue) {
            return existing as u8;
        }
        if upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let upvalues = &mut self.compilers[compiler].upvalues;
        upvalues.push(upvalue);
        (upvalues.len() - 1) as u8
    }

    fn begin_scope(&mut self) {
        self.compiler_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler_mut().scope_depth -= 1;
        loop {
            let compiler = self.compiler();
            let is_captured = match compiler.locals.last() {
                Some(local) if matches!(local.depth, Some(d) if d > compiler.scope_depth) => {
                    local.is_captured
                }
                _ => break,
            };
            // Captured variables move to the heap when they go out of scope.
            if is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.compiler_mut().locals.pop();
        }
    }

    // ---- Function compilers ----

    fn init_compiler(&mut self, kind: FunctionKind) {
        let name = match kind {
            FunctionKind::Script => None,
            _ => Some(self.intern(self.previous.lexeme)),
        };
        self.compilers.push(FunctionCompiler::new(kind, name));
    }

    fn end_compiler(&mut self) -> (ObjFunction, Vec<Upvalue>) {
        self.emit_return();
        let compiler = self
            .compilers
            .pop()
            .expect("A function compiler must have been initialized.");
        let mut function = compiler.function;
        function.upvalue_count = compiler.upvalues.len();

        if self.print_code && self.errors.is_empty() {
            let name = function.name.map_or("<script>", |name| self.heap.str(name));
            debug!(
                target: "loxvm::compile",
                "\n{}",
                function.chunk.disassemble(name, self.heap)
            );
        }
        (function, compiler.upvalues)
    }

    fn alloc_function(&mut self, function: ObjFunction) -> ObjRef {
        let roots = CompilerRoots {
            compilers: &self.compilers,
            outer: self.roots,
        };
        self.heap.alloc(function, &roots)
    }

    fn intern(&mut self, s: &str) -> ObjRef {
        let roots = CompilerRoots {
            compilers: &self.compilers,
            outer: self.roots,
        };
        self.heap.intern(s, &roots)
    }

    fn compiler(&self) -> &FunctionCompiler<'src> {
        self.compilers
            .last()
            .expect("There's always a compiler for the script.")
    }

    fn compiler_mut(&mut self) -> &mut FunctionCompiler<'src> {
        self.compilers
            .last_mut()
            .expect("There's always a compiler for the script.")
    }

    // ---- Bytecode emission ----

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.compiler_mut().function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.pos.line;
        self.chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.pos.line;
        self.chunk().write_op(op, line);
    }

    fn emit_bytes(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        // The offset also skips the two operand bytes.
        let offset = self.chunk().code().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let [hi, lo] = (offset as u16).to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().code().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk().code().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let [hi, lo] = (jump as u16).to_be_bytes();
        self.chunk().patch(offset, hi);
        self.chunk().patch(offset + 1, lo);
    }

    fn emit_return(&mut self) {
        if self.compiler().kind == FunctionKind::Initializer {
            self.emit_bytes(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.chunk().add_const(value);
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_bytes(OpCode::Constant, constant);
    }

    // ---- Tokens and errors ----

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan();
            if self.current.typ != token::Type::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn consume(&mut self, typ: token::Type, message: &str) {
        if self.current.typ == typ {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, typ: token::Type) -> bool {
        self.current.typ == typ
    }

    fn match_token(&mut self, typ: token::Type) -> bool {
        if !self.check(typ) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.typ {
            token::Type::Eof => ErrorLocation::End,
            token::Type::Error => ErrorLocation::Lexical,
            _ => ErrorLocation::At(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.pos.line,
            location,
            message: message.to_string(),
        });
    }
}
