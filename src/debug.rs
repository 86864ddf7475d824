use crate::chunk::{Chunk, OpCode};
use crate::value::{as_function, format_value, is_function};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Decodes the constant-style operand at `offset`: a `Const`/`ConstLong`
/// marker byte followed by 1 or 3 little-endian index bytes.
fn read_index(chunk: &Chunk, offset: usize) -> (usize, usize) {
    if chunk.code[offset] == OpCode::Const.to_byte() {
        (chunk.code[offset + 1] as usize, offset + 2)
    } else {
        let index = chunk.code[offset + 1] as usize
            | (chunk.code[offset + 2] as usize) << 8
            | (chunk.code[offset + 3] as usize) << 16;
        (index, offset + 4)
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{}", name);
    offset + 1
}

/// For `Const`/`ConstLong` the opcode byte is itself the index marker.
fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let (index, next) = read_index(chunk, offset);
    println!(
        "{:<16} {:>4} '{}'",
        name,
        index,
        format_value(chunk.get_constant(index))
    );
    next
}

/// Named operands (globals, properties, methods, classes): opcode, then a
/// marker-encoded constant index.
fn named_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let (index, next) = read_index(chunk, offset + 1);
    println!(
        "{:<16} {:>4} '{}'",
        name,
        index,
        format_value(chunk.get_constant(index))
    );
    next
}

/// Slot/upvalue operands: opcode, then a marker-encoded raw index.
fn indexed_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let (index, next) = read_index(chunk, offset + 1);
    println!("{:<16} {:>4}", name, index);
    next
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    println!("{:<16} {:>4}", name, chunk.code[offset + 1]);
    offset + 2
}

fn jump_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let target = chunk.code[offset + 1] as u16 | (chunk.code[offset + 2] as u16) << 8;
    println!("{:<16} {:>4} -> {}", name, offset, target);
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let (index, mut next) = read_index(chunk, offset + 1);
    println!(
        "{:<16} {:>4} '{}'",
        "OpClosure",
        index,
        format_value(chunk.get_constant(index))
    );

    let constant = chunk.get_constant(index);
    if is_function(constant) {
        let upvalue_count = unsafe { (*as_function(constant)).upvalue_count };
        for _ in 0..upvalue_count {
            let is_local = chunk.code[next] == 1;
            let pair_offset = next;
            let (capture_index, after) = read_index(chunk, next + 1);
            next = after;
            println!(
                "{:04}    |             {} {}",
                pair_offset,
                if is_local { "local" } else { "upvalue" },
                capture_index
            );
        }
    }
    next
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);

    let current_line = chunk.get_line(offset);
    if offset > 0 && current_line == chunk.get_line(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", current_line);
    }

    let instruction = match OpCode::from_byte(chunk.code[offset]) {
        Some(instruction) => instruction,
        None => {
            println!("Unknown opcode {}", chunk.code[offset]);
            return offset + 1;
        }
    };

    let name = format!("Op{}", instruction);
    match instruction {
        OpCode::Const | OpCode::ConstLong => constant_instruction(&name, chunk, offset),
        OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::DefineProperty
        | OpCode::Class
        | OpCode::Method => named_instruction(&name, chunk, offset),
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue => {
            indexed_instruction(&name, chunk, offset)
        }
        OpCode::Jmp | OpCode::JmpIfFalse => jump_instruction(&name, chunk, offset),
        OpCode::Call => byte_instruction(&name, chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
        _ => simple_instruction(&name, offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Parser;
    use crate::objects::object_manager::ObjectManager;
    use crate::table::Table;

    /// Walks the whole instruction stream, checking that decode lengths line
    /// up exactly with the chunk — the disassembler and the VM agree on
    /// operand widths.
    fn decode_all(chunk: &Chunk) {
        let mut offset = 0;
        while offset < chunk.len() {
            let next = disassemble_instruction(chunk, offset);
            assert!(next > offset);
            offset = next;
        }
        assert_eq!(offset, chunk.len());
    }

    #[test]
    fn test_decodes_every_emitted_instruction() {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let function = {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            parser.compile(
                "let a = 1;
                 let b = \"s\" + \"t\";
                 fn mk() {
                     let x = 1;
                     fn get() { return x; }
                     return get;
                 }
                 class P {
                     let name;
                     fn greet() { print self.name; }
                 }
                 let p = P();
                 p.name = b;
                 p.greet();
                 if a < 2 && true { print a; } else { print b; }
                 while false { a = a + 1; }
                 for (let i = 0; i < 2; i = i + 1) { print -i; }
                 print mk()();",
            )
        }
        .expect("compile error");

        decode_all(unsafe { &(*function).chunk });
    }
}
