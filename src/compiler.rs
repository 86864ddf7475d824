use std::io::Write;

use once_cell::sync::Lazy;

use crate::chunk::{Chunk, OpCode};
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_manager::ObjectManager;
use crate::scanner::{Scanner, Token, TokenType};
use crate::table::Table;
use crate::value::{make_function_value, make_number_value, make_string_value, Value};

/// Locals and upvalue descriptors use the 1-or-3-byte operand encoding, so
/// the per-function caps sit at the 16-bit boundary.
pub const MAX_LOCALS: usize = 65_536;
pub const MAX_UPVALUES: usize = 65_536;
/// Largest legal constant-pool index.
pub const MAX_CONSTANT_INDEX: usize = 65_535;

pub struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    scanner: Option<Scanner<'a>>,
    has_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'a>>,
    class_depth: usize,
    object_manager: &'a mut ObjectManager,
    intern_strings: &'a mut Table,
}

struct Local<'a> {
    name: Token<'a>,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone)]
struct Upvalue {
    index: usize,
    is_local: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    Function,
    Method,
    Script,
}

struct Compiler<'a> {
    function: ObjectFunction,
    function_type: FunctionType,
    locals: Vec<Local<'a>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

impl<'a> Compiler<'a> {
    fn new(function_type: FunctionType) -> Compiler<'a> {
        Compiler {
            function: ObjectFunction::new(0, String::new()),
            function_type,
            locals: vec![],
            upvalues: vec![],
            scope_depth: 0,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // ||
    And,        // &&
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl From<u8> for Precedence {
    fn from(value: u8) -> Precedence {
        match value {
            0 => Precedence::None,
            1 => Precedence::Assignment,
            2 => Precedence::Or,
            3 => Precedence::And,
            4 => Precedence::Equality,
            5 => Precedence::Comparison,
            6 => Precedence::Term,
            7 => Precedence::Factor,
            8 => Precedence::Unary,
            9 => Precedence::Call,
            10 => Precedence::Primary,
            _ => unreachable!("Invalid precedence value: {}", value),
        }
    }
}

type ParserFn = fn(&mut Parser<'_>, bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(
        prefix: Option<ParserFn>,
        infix: Option<ParserFn>,
        precedence: Precedence,
    ) -> ParseRule {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

const RULE_COUNT: usize = TokenType::Eof as usize + 1;

static RULES: Lazy<[ParseRule; RULE_COUNT]> = Lazy::new(|| {
    let mut rules = [ParseRule::new(None, None, Precedence::None); RULE_COUNT];

    rules[TokenType::LeftParen as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.grouping()),
        Some(|parser, _can_assign| parser.call()),
        Precedence::Call,
    );

    rules[TokenType::Dot as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.dot(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Minus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Plus as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Slash as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Star as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Bang as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        None,
        Precedence::None,
    );

    rules[TokenType::BangEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::EqualEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::Greater as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::GreaterEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Less as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::LessEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::AndAnd as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.and()),
        Precedence::And,
    );

    rules[TokenType::OrOr as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.or()),
        Precedence::Or,
    );

    rules[TokenType::Identifier as usize] = ParseRule::new(
        Some(|parser, can_assign| parser.variable(can_assign)),
        None,
        Precedence::None,
    );

    rules[TokenType::String as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.string()),
        None,
        Precedence::None,
    );

    rules[TokenType::Number as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.number()),
        None,
        Precedence::None,
    );

    rules[TokenType::False as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::True as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::Null as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::SelfKw as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.self_expression()),
        None,
        Precedence::None,
    );

    rules
});

impl<'a> Parser<'a> {
    pub fn new(object_manager: &'a mut ObjectManager, intern_strings: &'a mut Table) -> Box<Parser<'a>> {
        let mut parser = Box::new(Parser {
            current: Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            },
            previous: Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            },
            scanner: None,
            has_error: false,
            panic_mode: false,
            compilers: vec![],
            class_depth: 0,
            object_manager,
            intern_strings,
        });
        parser.init_compiler(FunctionType::Script);
        parser
    }

    /// Compiles a whole script into a zero-arity function whose chunk is the
    /// script body. Returns None when any compile error was reported.
    pub fn compile(&mut self, source: &'a str) -> Option<*mut ObjectFunction> {
        self.scanner = Some(Scanner::new(source));

        self.advance();
        while !self.match_token(TokenType::Eof) {
            self.declaration();
        }

        let compiler = self.end_compiler();
        if self.has_error {
            return None;
        }
        Some(self.object_manager.alloc_function(compiler.function))
    }

    fn specific_compiler(&self, compiler_index: usize) -> &Compiler<'a> {
        self.compilers
            .get(compiler_index)
            .expect("compiler index is invalid")
    }

    fn specific_compiler_mut(&mut self, compiler_index: usize) -> &mut Compiler<'a> {
        self.compilers
            .get_mut(compiler_index)
            .expect("compiler index is invalid")
    }

    fn current_compiler(&self) -> &Compiler<'a> {
        self.compilers.last().expect("no compiler frame")
    }

    fn current_compiler_mut(&mut self) -> &mut Compiler<'a> {
        self.compilers.last_mut().expect("no compiler frame")
    }

    fn current_function(&self) -> &ObjectFunction {
        &self.current_compiler().function
    }

    fn current_function_mut(&mut self) -> &mut ObjectFunction {
        &mut self.current_compiler_mut().function
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_function().chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_function_mut().chunk
    }

    fn current_locals(&self) -> &Vec<Local<'a>> {
        &self.current_compiler().locals
    }

    fn current_locals_mut(&mut self) -> &mut Vec<Local<'a>> {
        &mut self.current_compiler_mut().locals
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = match &mut self.scanner {
                Some(scanner) => scanner.scan_token(),
                None => panic!("compiler was not given a scanner"),
            };
            if self.current.token_type != TokenType::Error {
                break;
            }

            self.error_at_current(self.current.value);
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }
        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: &str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }

        self.error_at_current(message);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    /// Constant-style operand: a `Const`/`ConstLong` marker byte followed by
    /// a 1-byte or 3-byte little-endian index. Every instruction that takes
    /// a constant, slot, or upvalue index shares this encoding; the bare
    /// constant load is the marker itself.
    fn emit_index(&mut self, index: usize) {
        if index <= u8::MAX as usize {
            self.emit_bytes(OpCode::Const.to_byte(), index as u8);
        } else {
            self.emit_byte(OpCode::ConstLong.to_byte());
            self.emit_byte((index & 0xff) as u8);
            self.emit_byte(((index >> 8) & 0xff) as u8);
            self.emit_byte(((index >> 16) & 0xff) as u8);
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_index(index);
    }

    fn emit_return(&mut self) {
        self.emit_byte(OpCode::Null.to_byte());
        self.emit_byte(OpCode::Ret.to_byte());
    }

    /// Emits a jump with a 0xffff placeholder target and returns the operand
    /// offset for patching.
    fn emit_jump(&mut self, instruction: OpCode) -> usize {
        self.emit_byte(instruction.to_byte());
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    /// Backpatches the operand at `offset` with the current chunk length as
    /// an absolute little-endian target.
    fn patch_jump(&mut self, offset: usize) {
        let target = self.current_chunk().len();
        if target > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let chunk = self.current_chunk_mut();
        chunk.write_by_offset(offset, (target & 0xff) as u8);
        chunk.write_by_offset(offset + 1, ((target >> 8) & 0xff) as u8);
    }

    /// Backward jumps reuse `Jmp` with an absolute target.
    fn emit_loop(&mut self, loop_start: usize) {
        if loop_start > u16::MAX as usize {
            self.error("Loop body is too large.");
        }
        self.emit_byte(OpCode::Jmp.to_byte());
        self.emit_byte((loop_start & 0xff) as u8);
        self.emit_byte(((loop_start >> 8) & 0xff) as u8);
    }

    fn init_compiler(&mut self, function_type: FunctionType) {
        let mut compiler = Compiler::new(function_type);
        // A function declaration reaches here right after its name token was
        // consumed, so the name is sitting in `previous`.
        if function_type != FunctionType::Script {
            compiler.function.name = self.previous.value.to_string();
        }

        // Slot zero holds the callee; method bodies resolve `self` there.
        let slot_zero_name = if function_type == FunctionType::Method {
            "self"
        } else {
            ""
        };
        compiler.locals.push(Local {
            name: Token {
                token_type: TokenType::Identifier,
                value: slot_zero_name,
                line: 0,
            },
            depth: 0,
            is_captured: false,
        });
        self.compilers.push(compiler);
    }

    fn end_compiler(&mut self) -> Compiler<'a> {
        self.emit_return();

        if self.current_function().name.is_empty() {
            debug_feature::disassemble_chunk(self, "<script>");
        } else {
            let function_name = self.current_function().name.clone();
            debug_feature::disassemble_chunk(self, &function_name);
        }

        let mut compiler = self.compilers.pop().expect("no compiler frame");
        compiler.function.upvalue_count = compiler.upvalues.len();
        compiler
    }

    fn make_constant(&mut self, value: Value) -> usize {
        if let Some(index) = self.current_chunk().find_constant(&value) {
            return index;
        }

        if self.current_chunk().constants.len() > MAX_CONSTANT_INDEX {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.current_chunk_mut().add_constant(value)
    }

    fn number(&mut self) {
        let value = self.previous.value.parse::<f64>().unwrap_or(0.0);
        self.emit_constant(make_number_value(value));
    }

    fn string(&mut self) {
        // Trim the surrounding quotation marks.
        let lexeme = self.previous.value;
        let value = make_string_value(
            self.object_manager,
            self.intern_strings,
            &lexeme[1..lexeme.len() - 1],
        );
        self.emit_constant(value);
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Let) {
            self.let_declaration();
        } else if self.match_token(TokenType::Fn) {
            self.function_declaration();
        } else if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn let_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_byte(OpCode::Null.to_byte());
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");

        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> usize {
        self.consume(TokenType::Identifier, message);

        self.declare_variable();
        if self.current_compiler().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.clone())
    }

    fn declare_variable(&mut self) {
        if self.current_compiler().scope_depth == 0 {
            return;
        }

        let variable_name = self.previous.clone();
        let scope_depth = self.current_compiler().scope_depth;
        let mut duplicate = false;
        for local in self.current_locals().iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if Self::identifier_equal(&variable_name, &local.name) {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(variable_name);
    }

    fn add_local(&mut self, variable_name: Token<'a>) {
        if self.current_locals().len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }

        // Depth -1 marks the local uninitialized until its initializer has
        // been compiled.
        self.current_locals_mut().push(Local {
            name: variable_name,
            depth: -1,
            is_captured: false,
        });
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        self.init_compiler(function_type);
        self.begin_scope();

        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.current_function().arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.current_function_mut().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        let compiler = self.end_compiler();
        let upvalues = compiler.upvalues.clone();
        let function = self.object_manager.alloc_function(compiler.function);
        let constant = self.make_constant(make_function_value(function));
        self.emit_byte(OpCode::Closure.to_byte());
        self.emit_index(constant);

        for upvalue in upvalues.iter() {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_index(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(self.previous.clone());
        self.declare_variable();

        self.emit_byte(OpCode::Class.to_byte());
        self.emit_index(name_constant);
        self.define_variable(name_constant);

        self.class_depth += 1;
        // Push the class back for the member definitions.
        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            if self.match_token(TokenType::Let) {
                self.field_declaration();
            } else if self.match_token(TokenType::Fn) {
                self.method_declaration();
            } else {
                self.error_at_current("Expect 'let' or 'fn' in class body.");
                self.advance();
            }
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_byte(OpCode::Pop.to_byte());
        self.class_depth -= 1;
    }

    fn field_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect field name.");
        let name_constant = self.identifier_constant(self.previous.clone());
        self.consume(TokenType::Semicolon, "Expect ';' after field name.");
        self.emit_byte(OpCode::DefineProperty.to_byte());
        self.emit_index(name_constant);
    }

    fn method_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let name_constant = self.identifier_constant(self.previous.clone());
        self.function(FunctionType::Method);
        self.emit_byte(OpCode::Method.to_byte());
        self.emit_index(name_constant);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argument_count: u32 = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if argument_count >= 255 {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    argument_count += 1;
                }

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        argument_count as u8
    }

    fn identifier_constant(&mut self, token: Token) -> usize {
        let value = make_string_value(self.object_manager, self.intern_strings, token.value);
        self.make_constant(value)
    }

    fn define_variable(&mut self, global: usize) {
        if self.current_compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_byte(OpCode::DefineGlobal.to_byte());
        self.emit_index(global);
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_compiler().scope_depth;
        if scope_depth == 0 {
            return;
        }

        if let Some(local) = self.current_locals_mut().last_mut() {
            local.depth = scope_depth;
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.clone(), can_assign)
    }

    fn self_expression(&mut self) {
        if self.class_depth == 0 {
            self.error("Can't use 'self' outside of a class.");
            return;
        }
        self.named_variable(self.previous.clone(), false);
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let current_compiler_index = self.compilers.len() - 1;
        let (get_op, set_op, index);
        let local = self.resolve_local(current_compiler_index, &name);
        if local != -1 {
            get_op = OpCode::GetLocal;
            set_op = OpCode::SetLocal;
            index = local as usize;
        } else {
            let upvalue = self.resolve_upvalue(current_compiler_index, &name);
            if upvalue != -1 {
                get_op = OpCode::GetUpvalue;
                set_op = OpCode::SetUpvalue;
                index = upvalue as usize;
            } else {
                get_op = OpCode::GetGlobal;
                set_op = OpCode::SetGlobal;
                index = self.identifier_constant(name);
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_byte(set_op.to_byte());
        } else {
            self.emit_byte(get_op.to_byte());
        }
        self.emit_index(index);
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &Token) -> i32 {
        let mut resolved = -1;
        let mut uninitialized = false;
        for (index, local) in self
            .specific_compiler(compiler_index)
            .locals
            .iter()
            .enumerate()
            .rev()
        {
            if Self::identifier_equal(name, &local.name) {
                if local.depth == -1 {
                    uninitialized = true;
                }
                resolved = index as i32;
                break;
            }
        }

        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        resolved
    }

    fn identifier_equal(left: &Token, right: &Token) -> bool {
        left.value == right.value
    }

    /// Walks outward through the enclosing compiler chain. A hit registers
    /// an upvalue in every frame between the owner and the capturer and
    /// marks the originating local as captured.
    fn resolve_upvalue(&mut self, compiler_index: usize, name: &Token) -> i32 {
        if compiler_index == 0 {
            return -1;
        }

        let local = self.resolve_local(compiler_index - 1, name);
        if local != -1 {
            self.specific_compiler_mut(compiler_index - 1).locals[local as usize].is_captured =
                true;
            return self.add_upvalue(compiler_index, local as usize, true);
        }

        let upvalue = self.resolve_upvalue(compiler_index - 1, name);
        if upvalue != -1 {
            return self.add_upvalue(compiler_index, upvalue as usize, false);
        }

        -1
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: usize, is_local: bool) -> i32 {
        for (slot, upvalue) in self
            .specific_compiler(compiler_index)
            .upvalues
            .iter()
            .enumerate()
        {
            if upvalue.is_local == is_local && upvalue.index == index {
                return slot as i32;
            }
        }

        if self.specific_compiler(compiler_index).upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        let compiler = self.specific_compiler_mut(compiler_index);
        compiler.upvalues.push(Upvalue { index, is_local });
        compiler.function.upvalue_count = compiler.upvalues.len();
        (compiler.upvalues.len() - 1) as i32
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JmpIfFalse);
        self.emit_byte(OpCode::Pop.to_byte());
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JmpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jmp);
        self.patch_jump(else_jump);
        self.emit_byte(OpCode::Pop.to_byte());
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn if_statement(&mut self) {
        self.expression();
        self.consume(TokenType::LeftBrace, "Expect '{' after condition.");

        let then_jump = self.emit_jump(OpCode::JmpIfFalse);
        self.emit_byte(OpCode::Pop.to_byte());
        self.begin_scope();
        self.block();
        self.end_scope();

        let else_jump = self.emit_jump(OpCode::Jmp);
        self.patch_jump(then_jump);
        self.emit_byte(OpCode::Pop.to_byte());

        if self.match_token(TokenType::Else) {
            if self.match_token(TokenType::If) {
                self.if_statement();
            } else {
                self.consume(TokenType::LeftBrace, "Expect '{' after 'else'.");
                self.begin_scope();
                self.block();
                self.end_scope();
            }
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();

        self.expression();
        self.consume(TokenType::LeftBrace, "Expect '{' after condition.");

        let exit_jump = self.emit_jump(OpCode::JmpIfFalse);
        self.emit_byte(OpCode::Pop.to_byte());

        self.begin_scope();
        self.block();
        self.end_scope();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Let) {
            self.let_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump: i32 = -1;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            exit_jump = self.emit_jump(OpCode::JmpIfFalse) as i32;
            self.emit_byte(OpCode::Pop.to_byte());
        }

        if !self.match_token(TokenType::RightParen) {
            // The step runs after the body, so it is compiled out of line:
            // skip it on entry, loop back to it from the body, and fall
            // through from it to the condition.
            let body_jump = self.emit_jump(OpCode::Jmp);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_byte(OpCode::Pop.to_byte());
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.consume(TokenType::LeftBrace, "Expect '{' before loop body.");
        self.begin_scope();
        self.block();
        self.end_scope();
        self.emit_loop(loop_start);

        if exit_jump != -1 {
            self.patch_jump(exit_jump as usize);
            self.emit_byte(OpCode::Pop.to_byte());
        }
        self.end_scope();
    }

    fn begin_scope(&mut self) {
        self.current_compiler_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_compiler_mut().scope_depth -= 1;
        let scope_depth = self.current_compiler().scope_depth;
        loop {
            let captured = match self.current_locals().last() {
                Some(local) if local.depth > scope_depth => local.is_captured,
                _ => break,
            };

            if captured {
                self.emit_byte(OpCode::CloseUpvalue.to_byte());
            } else {
                self.emit_byte(OpCode::Pop.to_byte());
            }
            self.current_locals_mut().pop();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn return_statement(&mut self) {
        if self.current_compiler().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_byte(OpCode::Ret.to_byte());
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_byte(OpCode::Print.to_byte());
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn unary(&mut self) {
        let operator_type = self.previous.token_type;

        self.parse_precedence(Precedence::Unary);

        match operator_type {
            TokenType::Bang => self.emit_byte(OpCode::Not.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Neg.to_byte()),
            _ => unreachable!("Expect unary operator."),
        }
    }

    fn binary(&mut self) {
        let operator_type = self.previous.token_type;
        let rule = &RULES[operator_type as usize];
        self.parse_precedence((rule.precedence as u8 + 1).into());

        match operator_type {
            TokenType::BangEqual => self.emit_bytes(OpCode::Eq.to_byte(), OpCode::Not.to_byte()),
            TokenType::EqualEqual => self.emit_byte(OpCode::Eq.to_byte()),
            TokenType::Greater => self.emit_byte(OpCode::Gt.to_byte()),
            TokenType::GreaterEqual => self.emit_bytes(OpCode::Lt.to_byte(), OpCode::Not.to_byte()),
            TokenType::Less => self.emit_byte(OpCode::Lt.to_byte()),
            TokenType::LessEqual => self.emit_bytes(OpCode::Gt.to_byte(), OpCode::Not.to_byte()),
            TokenType::Plus => self.emit_byte(OpCode::Add.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Sub.to_byte()),
            TokenType::Star => self.emit_byte(OpCode::Mul.to_byte()),
            TokenType::Slash => self.emit_byte(OpCode::Div.to_byte()),
            _ => unreachable!("Unexpected binary operator: {}", operator_type),
        }
    }

    fn literal(&mut self) {
        match self.previous.token_type {
            TokenType::False => self.emit_byte(OpCode::False.to_byte()),
            TokenType::True => self.emit_byte(OpCode::True.to_byte()),
            TokenType::Null => self.emit_byte(OpCode::Null.to_byte()),
            _ => unreachable!("Unexpected literal: {}", self.previous.token_type),
        }
    }

    fn call(&mut self) {
        let argument_count = self.argument_list();
        self.emit_bytes(OpCode::Call.to_byte(), argument_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name_constant = self.identifier_constant(self.previous.clone());

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_byte(OpCode::SetProperty.to_byte());
        } else {
            self.emit_byte(OpCode::GetProperty.to_byte());
        }
        self.emit_index(name_constant);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        // Only the leftmost expression at assignment precedence may consume
        // an '='.
        let can_assign = precedence <= Precedence::Assignment;
        match RULES[self.previous.token_type as usize].prefix {
            Some(prefix) => prefix(self, can_assign),
            None => {
                self.error("Expect expression.");
                return;
            }
        }

        while precedence as u8 <= RULES[self.current.token_type as usize].precedence as u8 {
            self.advance();
            if let Some(infix) = RULES[self.previous.token_type as usize].infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token_type != TokenType::Eof {
            if self.previous.token_type == TokenType::Semicolon {
                return;
            }

            match self.current.token_type {
                TokenType::Class
                | TokenType::Fn
                | TokenType::Let
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => (),
            }

            self.advance()
        }
    }

    fn error(&mut self, message: &str) {
        self.error_at(&self.previous.clone(), message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(&self.current.clone(), message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        write!(&mut std::io::stderr(), "[line {}] Error", token.line)
            .expect("Failed to write to stderr");

        match token.token_type {
            TokenType::Eof => {
                write!(&mut std::io::stderr(), " at end").expect("Failed to write to stderr")
            }
            TokenType::Error => {}
            _ => write!(&mut std::io::stderr(), " at '{}'", token.value)
                .expect("Failed to write to stderr"),
        };

        writeln!(&mut std::io::stderr(), ": {}", message).expect("Failed to write to stderr");
        self.has_error = true;
    }
}

#[cfg(feature = "debug_print_code")]
mod debug_feature {
    use super::*;
    use crate::debug;

    pub fn disassemble_chunk(parser: &Parser, name: &str) {
        if !parser.has_error {
            debug::disassemble_chunk(parser.current_chunk(), name);
        }
    }
}

#[cfg(not(feature = "debug_print_code"))]
mod debug_feature {
    use super::*;

    pub fn disassemble_chunk(_parser: &Parser, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_function, is_function, is_string, ValueType};

    fn compile(source: &str) -> (ObjectManager, Table, Option<*mut ObjectFunction>) {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let function = {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            parser.compile(source)
        };
        (object_manager, intern_strings, function)
    }

    #[test]
    fn test_expression_bytecode_layout() {
        let (_manager, _intern, function) = compile("print 1 + 2 * 3;");
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };

        let expected = [
            OpCode::Const.to_byte(),
            0,
            OpCode::Const.to_byte(),
            1,
            OpCode::Const.to_byte(),
            2,
            OpCode::Mul.to_byte(),
            OpCode::Add.to_byte(),
            OpCode::Print.to_byte(),
            OpCode::Null.to_byte(),
            OpCode::Ret.to_byte(),
        ];
        assert_eq!(chunk.code, expected);
        assert_eq!(*chunk.get_constant(0), make_number_value(1.0));
        assert_eq!(*chunk.get_constant(1), make_number_value(2.0));
        assert_eq!(*chunk.get_constant(2), make_number_value(3.0));
    }

    #[test]
    fn test_while_uses_absolute_jump_targets() {
        let (_manager, _intern, function) = compile("while false { }");
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };

        // 0 False; 1 JmpIfFalse -> 8; 4 Pop; 5 Jmp -> 0; 8 Pop; 9 Null; 10 Ret
        assert_eq!(chunk.code[0], OpCode::False.to_byte());
        assert_eq!(chunk.code[1], OpCode::JmpIfFalse.to_byte());
        assert_eq!(
            u16::from_le_bytes([chunk.code[2], chunk.code[3]]),
            8,
            "exit jump is patched with the absolute offset past the loop"
        );
        assert_eq!(chunk.code[4], OpCode::Pop.to_byte());
        assert_eq!(chunk.code[5], OpCode::Jmp.to_byte());
        assert_eq!(
            u16::from_le_bytes([chunk.code[6], chunk.code[7]]),
            0,
            "backward jump targets the loop start absolutely"
        );
        assert_eq!(chunk.code[8], OpCode::Pop.to_byte());
    }

    #[test]
    fn test_identifier_constants_are_deduplicated() {
        let (_manager, _intern, function) = compile("let a = 1; a = 2; print a;");
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };

        let name_slots: Vec<usize> = chunk
            .iter_constants()
            .enumerate()
            .filter(|(_, constant)| is_string(constant))
            .map(|(index, _)| index)
            .collect();
        assert_eq!(
            name_slots.len(),
            1,
            "the identifier 'a' occupies exactly one constant slot"
        );
    }

    #[test]
    fn test_intern_strings_shared_across_compiles() {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            assert!(parser.compile("\"this is a test string\";").is_some());
        }
        {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            assert!(parser.compile("\"this is a test string\";").is_some());
        }
        assert_eq!(intern_strings.len(), 1);
    }

    #[test]
    fn test_function_declaration_produces_nested_function() {
        let (_manager, _intern, function) = compile(
            "fn sum(a, b, c) {
                 return a + b + c;
             }
             print 4 + sum(5, 6, 7);",
        );
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };

        assert_eq!(chunk.code[0], OpCode::Closure.to_byte());
        let nested = chunk
            .iter_constants()
            .find(|constant| is_function(constant))
            .expect("nested function constant");
        unsafe {
            let nested = as_function(nested);
            assert_eq!((*nested).arity, 3);
            assert_eq!((*nested).upvalue_count, 0);
            assert_eq!((*nested).name, "sum");
        }
    }

    #[test]
    fn test_closure_captures_enclosing_local() {
        let (_manager, _intern, function) = compile(
            "fn outer() {
                 let x = 1;
                 fn inner() { return x; }
                 return inner;
             }",
        );
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };

        let outer = chunk
            .iter_constants()
            .find(|constant| is_function(constant))
            .expect("outer function constant");
        unsafe {
            let outer = as_function(outer);
            let inner = (*outer)
                .chunk
                .iter_constants()
                .find(|constant| is_function(constant))
                .expect("inner function constant");
            let inner = as_function(inner);
            assert_eq!((*inner).upvalue_count, 1, "inner captures x by upvalue");
        }
    }

    #[test]
    fn test_class_body_emits_field_and_method_ops() {
        let (_manager, _intern, function) = compile(
            "class P {
                 let name;
                 fn greet() { print self.name; }
             }",
        );
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };

        assert!(chunk.code.contains(&OpCode::Class.to_byte()));
        assert!(chunk.code.contains(&OpCode::DefineProperty.to_byte()));
        assert!(chunk.code.contains(&OpCode::Method.to_byte()));
    }

    #[test]
    fn test_compile_errors() {
        // Each of these must report and yield no function.
        let sources = [
            "return 1;",
            "1 + ;",
            "a + b = 1;",
            "{ let a = 1; let a = 2; }",
            "{ let a = a; }",
            "print 1",
            "self;",
            "(1;",
        ];
        for source in sources {
            let (_manager, _intern, function) = compile(source);
            assert!(function.is_none(), "expected compile error for {:?}", source);
        }
    }

    #[test]
    fn test_long_constant_operands() {
        // Force the pool past 256 entries so loads switch to the long form.
        let mut source = String::new();
        for index in 0..300 {
            source.push_str(&format!("print {};\n", index));
        }
        let (_manager, _intern, function) = compile(&source);
        let function = function.expect("compile error");
        let chunk = unsafe { &(*function).chunk };
        assert!(chunk.code.contains(&OpCode::ConstLong.to_byte()));
        assert_eq!(chunk.constants.len(), 300);
        assert_eq!(
            chunk.get_constant(299).value_type,
            ValueType::ValueNumber
        );
    }
}
