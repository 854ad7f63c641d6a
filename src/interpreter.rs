// Copyright 2018 Ian Johnson

// This file is part of Chip-8.

// Chip-8 is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Chip-8 is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Chip-8.  If not, see <http://www.gnu.org/licenses/>.

//! The Chip-8 interpreter.
//!
//! The main focus of this module is the `Interpreter` struct, which contains
//! the entire state of a Chip-8 machine and provides the interface used by
//! front-ends: loading programs, stepping through execution, feeding in key
//! states and reading back the display and sound state.
//!
//! Failures come in two kinds.  Some conditions end the current cycle early:
//! these are reported as a `Fault` from `step` and leave the timers alone.
//! Everything else (unknown opcodes, a bad font digit, `I` overflowing, bad
//! pixel or key indices from the host) is logged and replaced by a safe
//! default, and the cycle carries on.

use std::default::Default;
use std::fs::File;
use std::io::{self, Read};
use std::num::Wrapping;
use std::path::{Path, PathBuf};

use rand;

use display::{self, FONT, FONT_HEIGHT};
use input::{self, Key, N_KEYS};
use instruction::{Address, Instruction, Opcode, OutOfRangeError, Register};
use FONT_START;
use MEM_SIZE;
use PROG_SIZE;
use PROG_START;
use STACK_SIZE;

/// A condition which ends the current cycle early.
#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The program counter doesn't point at a whole opcode.
    #[fail(display = "program counter out of bounds: {:#05X}", _0)]
    PcOutOfBounds(u16),
    /// A `CALL` was made with a full call stack.
    #[fail(display = "call stack overflowed calling {}", _0)]
    StackOverflow(Address),
    /// A `RET` was made with an empty call stack.
    #[fail(display = "no subroutine to return from")]
    StackUnderflow,
    /// An instruction tried to access memory past the end.
    #[fail(display = "address out of bounds: {:#05X}", _0)]
    AddressOutOfBounds(usize),
}

/// An error encountered while loading a program.
#[derive(Debug, Fail)]
pub enum LoadError {
    /// The program file doesn't exist.
    #[fail(display = "program file not found: {:?}", _0)]
    NotFound(PathBuf),
    /// The program couldn't be read.
    #[fail(display = "could not read program: {}", _0)]
    Io(#[cause] io::Error),
    /// The program doesn't fit in memory.
    #[fail(display = "input program is too large: {} bytes", _0)]
    TooLarge(usize),
}

/// A Chip-8 interpreter.
///
/// This struct contains the entire state of a Chip-8 interpreter and provides
/// all the expected methods for interacting with an interpreter, such as
/// stepping through execution and inspecting the internal state.
pub struct Interpreter {
    /// The internal memory.
    mem: [u8; MEM_SIZE],
    /// The display buffer.
    display: display::Buffer,
    /// The input state.
    input: input::State,
    /// The general-purpose registers `V0`-`VF`.
    regs: [Wrapping<u8>; 16],
    /// The special register `I`.
    reg_i: Address,
    /// The delay timer.
    reg_dt: u8,
    /// The sound timer.
    reg_st: u8,
    /// The program counter.
    pc: u16,
    /// The call stack (for returning from subroutines).
    call_stack: Vec<u16>,
    /// The size of the loaded program, in bytes.
    prog_len: usize,
}

impl Interpreter {
    /// Returns a new interpreter with zeroed memory and registers and the hex
    /// font loaded.
    pub fn new() -> Self {
        let mut interpreter = Interpreter {
            mem: [0; MEM_SIZE],
            display: display::Buffer::new(),
            input: input::State::new(),
            regs: [Wrapping(0); 16],
            reg_i: Address::default(),
            reg_dt: 0,
            reg_st: 0,
            pc: PROG_START as u16,
            call_stack: Vec::with_capacity(STACK_SIZE),
            prog_len: 0,
        };

        interpreter.mem[FONT_START..FONT_START + FONT.len()].copy_from_slice(&FONT);
        interpreter
    }

    /// Loads program data from the specified source.
    ///
    /// Only the program region of memory is touched: registers, timers, the
    /// display and the program counter keep whatever state they had, so
    /// reloading a program into a used interpreter does not restart it.
    pub fn load_program<R: Read>(&mut self, input: &mut R) -> Result<(), LoadError> {
        let mut program = Vec::with_capacity(PROG_SIZE);
        input.read_to_end(&mut program).map_err(LoadError::Io)?;
        self.load_bytes(&program)
    }

    /// Loads the given program bytes.
    ///
    /// See `load_program` for what is (and isn't) reset.
    pub fn load_bytes(&mut self, program: &[u8]) -> Result<(), LoadError> {
        if program.len() > PROG_SIZE {
            return Err(LoadError::TooLarge(program.len()));
        }
        self.mem[PROG_START..PROG_START + program.len()].copy_from_slice(program);
        self.prog_len = program.len();
        info!("loaded program of {} bytes", program.len());
        Ok(())
    }

    /// Loads the program stored in the given file.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LoadError::NotFound(path.to_path_buf())
            } else {
                LoadError::Io(e)
            }
        })?;
        debug!("loading program from {}", path.display());
        self.load_program(&mut file)
    }

    /// Returns the size of the loaded program, in bytes.
    pub fn prog_len(&self) -> usize {
        self.prog_len
    }

    /// Returns whether the program counter has moved past the end of the
    /// loaded program.
    pub fn ran_off_end(&self) -> bool {
        self.pc as usize >= PROG_START + self.prog_len
    }

    /// Returns a reference to the display buffer.
    pub fn display(&self) -> &display::Buffer {
        &self.display
    }

    /// Returns a mutable reference to the display buffer.
    pub fn display_mut(&mut self) -> &mut display::Buffer {
        &mut self.display
    }

    /// Returns the pixel at the given position (1 if lit, 0 if not).
    ///
    /// Positions off the screen are logged and read as 0.
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        match self.display.get(x, y) {
            Ok(pixel) => pixel as u8,
            Err(e) => {
                warn!("{}", e);
                0
            }
        }
    }

    /// Returns a reference to the input state.
    pub fn input(&self) -> &input::State {
        &self.input
    }

    /// Sets whether the key with the given index is pressed.
    ///
    /// Indices past the keypad are logged and ignored.
    pub fn set_key(&mut self, index: usize, pressed: bool) {
        if let Err(e) = self.input.set(index, pressed) {
            warn!("ignoring key update: {}", e);
        }
    }

    /// Sets the state of every key at once, indexed by key number.
    pub fn set_keys(&mut self, keys: &[bool; N_KEYS]) {
        for (index, &pressed) in keys.iter().enumerate() {
            self.set_key(index, pressed);
        }
    }

    /// Returns whether the buzzer should be sounding.
    pub fn play_sound(&self) -> bool {
        self.reg_st > 0
    }

    /// Returns a reference to the internal memory.
    pub fn mem(&self) -> &[u8; MEM_SIZE] {
        &self.mem
    }

    /// Returns a mutable reference to the internal memory.
    pub fn mem_mut(&mut self) -> &mut [u8; MEM_SIZE] {
        &mut self.mem
    }

    /// Returns the value of register `I`.
    pub fn i(&self) -> Address {
        self.reg_i
    }

    /// Sets the value of register `I`.
    pub fn set_i(&mut self, val: Address) {
        self.reg_i = val;
    }

    /// Returns the value of the delay timer.
    pub fn dt(&self) -> u8 {
        self.reg_dt
    }

    /// Sets the value of the delay timer.
    pub fn set_dt(&mut self, val: u8) {
        self.reg_dt = val;
    }

    /// Returns the value of the sound timer.
    pub fn st(&self) -> u8 {
        self.reg_st
    }

    /// Sets the value of the sound timer.
    pub fn set_st(&mut self, val: u8) {
        self.reg_st = val;
    }

    /// Returns the value in the given register.
    pub fn register(&self, reg: Register) -> u8 {
        self.regs[reg as usize].0
    }

    /// Sets the given register to the given value.
    pub fn set_register(&mut self, reg: Register, val: u8) {
        self.regs[reg as usize].0 = val
    }

    /// Returns the value of the program counter.
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Returns the return addresses currently on the call stack, oldest
    /// first.
    pub fn call_stack(&self) -> &[u16] {
        &self.call_stack
    }

    /// Returns the opcode at the program counter.
    pub fn current_opcode(&self) -> Result<Opcode, Fault> {
        let pc = self.pc as usize;
        if pc >= MEM_SIZE - 1 {
            return Err(Fault::PcOutOfBounds(self.pc));
        }
        Ok(Opcode::from_bytes(self.mem[pc], self.mem[pc + 1]))
    }

    /// Performs a single execution step.
    ///
    /// The opcode at the program counter is fetched, the program counter is
    /// moved past it, and the instruction is executed.  Then the delay and
    /// sound timers are each decremented once.
    ///
    /// Since the timers tick once per step rather than at a fixed 60 Hz,
    /// how fast they run is entirely up to how often the caller steps the
    /// interpreter.
    ///
    /// If a `Fault` is returned, the rest of the step (including the timer
    /// update) was skipped.
    pub fn step(&mut self) -> Result<(), Fault> {
        let opcode = self.current_opcode().map_err(|e| {
            debug!("could not fetch: {}", e);
            e
        })?;
        let addr = self.pc;
        self.pc += 2;

        match Instruction::from_opcode(opcode) {
            Ok(ins) => {
                trace!("{:#05X}: {} ({})", addr, ins, opcode);
                self.execute(ins).map_err(|e| {
                    debug!("error executing {} at {:#05X}: {}", ins, addr, e);
                    e
                })?;
            }
            Err(e) => warn!("skipping {:#05X}: {}", addr, e),
        }

        self.update_timers();
        Ok(())
    }

    /// Executes the given instruction in the current interpreter context.
    ///
    /// The program counter is expected to already point past the
    /// instruction, as it does during `step`.  Timers are not updated.
    pub fn execute(&mut self, ins: Instruction) -> Result<(), Fault> {
        use self::Instruction::*;

        match ins {
            Cls => self.display.clear(),
            Ret => self.pc = self.call_stack.pop().ok_or(Fault::StackUnderflow)?,
            Jp(addr) => self.pc = addr.addr() as u16,
            Call(addr) => {
                if self.call_stack.len() >= STACK_SIZE {
                    return Err(Fault::StackOverflow(addr));
                }
                self.call_stack.push(self.pc);
                self.pc = addr.addr() as u16;
            }
            SeByte(reg, b) => {
                let skip = self.register(reg) == b;
                self.skip_if(skip);
            }
            SneByte(reg, b) => {
                let skip = self.register(reg) != b;
                self.skip_if(skip);
            }
            SeReg(reg1, reg2) => {
                let skip = self.register(reg1) == self.register(reg2);
                self.skip_if(skip);
            }
            LdByte(reg, b) => self.set_register(reg, b),
            AddByte(reg, b) => self.regs[reg as usize] += Wrapping(b),
            LdReg(reg1, reg2) => {
                let r2 = self.register(reg2);
                self.set_register(reg1, r2);
            }
            Or(reg1, reg2) => {
                let r1 = self.register(reg1);
                let r2 = self.register(reg2);
                self.set_register(reg1, r1 | r2);
            }
            And(reg1, reg2) => {
                let r1 = self.register(reg1);
                let r2 = self.register(reg2);
                self.set_register(reg1, r1 & r2);
            }
            Xor(reg1, reg2) => {
                let r1 = self.register(reg1);
                let r2 = self.register(reg2);
                self.set_register(reg1, r1 ^ r2);
            }
            AddReg(reg1, reg2) => self.add(reg1, reg2),
            Sub(reg1, reg2) => self.sub(reg1, reg2),
            Shr(reg) => self.shr(reg),
            Subn(reg1, reg2) => self.subn(reg1, reg2),
            Shl(reg) => self.shl(reg),
            SneReg(reg1, reg2) => {
                let skip = self.register(reg1) != self.register(reg2);
                self.skip_if(skip);
            }
            LdI(addr) => self.reg_i = addr,
            JpV0(addr) => self.pc = self.register(Register::V0) as u16 + addr.addr() as u16,
            Rnd(reg, b) => self.set_register(reg, rand::random::<u8>() & b),
            Drw(reg1, reg2, n) => self.drw(reg1, reg2, n)?,
            Skp(reg) => {
                let skip = self.key_in_register_pressed(reg);
                self.skip_if(skip);
            }
            Sknp(reg) => {
                let skip = !self.key_in_register_pressed(reg);
                self.skip_if(skip);
            }
            LdRegDt(reg) => {
                let dt = self.dt();
                self.set_register(reg, dt);
            }
            LdKey(reg) => match self.input.first_pressed() {
                Some(key) => self.set_register(reg, key as u8),
                // Go back and try again next step.
                None => self.pc = self.pc.wrapping_sub(2),
            },
            LdDtReg(reg) => {
                let r = self.register(reg);
                self.set_dt(r);
            }
            LdSt(reg) => {
                let r = self.register(reg);
                self.set_st(r);
            }
            AddI(reg) => self.add_i(reg),
            LdF(reg) => self.ld_f(reg),
            LdB(reg) => self.ld_b(reg)?,
            LdDerefIReg(reg) => self.ld_deref_i_reg(reg)?,
            LdRegDerefI(reg) => self.ld_reg_deref_i(reg)?,
        }

        Ok(())
    }

    /// Skips the next instruction if `skip` is true.
    fn skip_if(&mut self, skip: bool) {
        if skip {
            self.pc = self.pc.wrapping_add(2);
        }
    }

    /// Returns whether the key named by the given register is pressed.
    ///
    /// A register value that doesn't name a key counts as not pressed.
    fn key_in_register_pressed(&self, reg: Register) -> bool {
        match Key::from_index(self.register(reg) as usize) {
            Ok(key) => self.input.is_pressed(key),
            Err(e) => {
                warn!("{} in {}, treating it as released", e, reg);
                false
            }
        }
    }

    /// Sets `reg1` to `reg1 + reg2`, setting `VF` to 1 on carry or 0
    /// otherwise.
    ///
    /// The sum is taken before `VF` is written, so `VF` as an operand holds
    /// its old value.
    fn add(&mut self, reg1: Register, reg2: Register) {
        let sum = self.register(reg1) as u16 + self.register(reg2) as u16;
        self.set_register(Register::VF, (sum > 0xFF) as u8);
        self.set_register(reg1, sum as u8);
    }

    /// Sets `reg1` to `reg1 - reg2`, setting `VF` to 0 on borrow or 1
    /// otherwise.
    ///
    /// `VF` is written before the subtraction, so `VF` as an operand holds
    /// the new flag.
    fn sub(&mut self, reg1: Register, reg2: Register) {
        let no_borrow = self.register(reg1) > self.register(reg2);
        self.set_register(Register::VF, no_borrow as u8);
        let r2 = self.regs[reg2 as usize];
        self.regs[reg1 as usize] -= r2;
    }

    /// Sets `reg1` to `reg2 - reg1`, setting `VF` to 0 on borrow or 1
    /// otherwise.
    ///
    /// As with `sub`, the flag is written first.
    fn subn(&mut self, reg1: Register, reg2: Register) {
        let no_borrow = self.register(reg2) > self.register(reg1);
        self.set_register(Register::VF, no_borrow as u8);
        self.regs[reg1 as usize] = self.regs[reg2 as usize] - self.regs[reg1 as usize];
    }

    /// Sets `reg` to `reg >> 1`, setting `VF` to the old lowest bit.
    fn shr(&mut self, reg: Register) {
        let old = self.register(reg) & 1;
        self.set_register(Register::VF, old);
        let r = self.register(reg);
        self.set_register(reg, r >> 1);
    }

    /// Sets `reg` to `reg << 1`, setting `VF` to the old highest bit.
    fn shl(&mut self, reg: Register) {
        let old = self.register(reg) >> 7;
        self.set_register(Register::VF, old);
        let r = self.register(reg);
        self.set_register(reg, r << 1);
    }

    /// Implements the `DRW` operation.
    ///
    /// Only the sprite rows which land on the screen are read, so rows
    /// clipped at the bottom edge may lie past the end of memory.
    fn drw(&mut self, reg1: Register, reg2: Register, n: u8) -> Result<(), Fault> {
        let x = self.register(reg1) as usize;
        let y = self.register(reg2) as usize;
        let rows = (n as usize).min(display::HEIGHT - y % display::HEIGHT);

        let start = self.reg_i.addr();
        let end = start + rows;
        if end > MEM_SIZE {
            return Err(Fault::AddressOutOfBounds(end - 1));
        }

        self.set_register(Register::VF, 0);
        if self.display.draw_sprite(&self.mem[start..end], x, y) {
            self.set_register(Register::VF, 1);
        }
        Ok(())
    }

    /// Implements the `ADD I, Vx` operation.
    fn add_i(&mut self, reg: Register) {
        let sum = self.reg_i.addr() + self.register(reg) as usize;
        self.reg_i = Address::from_usize(sum).unwrap_or_else(|e| {
            warn!("register 'I' overflowed ({}), resetting it to 0", e);
            Address::default()
        });
    }

    /// Implements the `LD F, Vx` operation.
    fn ld_f(&mut self, reg: Register) {
        let digit = self.register(reg) as usize;
        self.reg_i = if digit < FONT.len() / FONT_HEIGHT {
            Address::from_usize(FONT_START + digit * FONT_HEIGHT).unwrap()
        } else {
            warn!(
                "{}, resetting register 'I' to 0",
                OutOfRangeError("font digit", digit)
            );
            Address::default()
        };
    }

    /// Implements the `LD B, Vx` operation.
    fn ld_b(&mut self, reg: Register) -> Result<(), Fault> {
        let val = self.register(reg);
        let addr = self.reg_i.addr();

        if addr + 2 >= MEM_SIZE {
            return Err(Fault::AddressOutOfBounds(addr + 2));
        }
        self.mem[addr] = val / 100;
        self.mem[addr + 1] = val / 10 % 10;
        self.mem[addr + 2] = val % 10;
        Ok(())
    }

    /// Implements the `LD [I], Vx` operation.
    fn ld_deref_i_reg(&mut self, reg: Register) -> Result<(), Fault> {
        let last = reg as usize;
        let start = self.reg_i.addr();

        if start + last >= MEM_SIZE {
            return Err(Fault::AddressOutOfBounds(start + last));
        }
        for (dest, src) in self.mem[start..=start + last]
            .iter_mut()
            .zip(self.regs[0..=last].iter())
        {
            *dest = src.0;
        }
        Ok(())
    }

    /// Implements the `LD Vx, [I]` operation.
    fn ld_reg_deref_i(&mut self, reg: Register) -> Result<(), Fault> {
        let last = reg as usize;
        let start = self.reg_i.addr();

        if start + last >= MEM_SIZE {
            return Err(Fault::AddressOutOfBounds(start + last));
        }
        for (dest, src) in self.regs[0..=last]
            .iter_mut()
            .zip(self.mem[start..=start + last].iter())
        {
            *dest = Wrapping(*src);
        }
        Ok(())
    }

    /// Decrements the `DT` and `ST` registers, stopping at 0.
    fn update_timers(&mut self) {
        self.reg_dt = self.reg_dt.saturating_sub(1);
        self.reg_st = self.reg_st.saturating_sub(1);
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

#[cfg(test)]
mod tests {
    use std::u8;

    use super::*;

    /// Returns an interpreter with the given opcodes loaded as its program.
    fn with_program(opcodes: &[u16]) -> Interpreter {
        let mut program = Vec::new();
        for &op in opcodes {
            program.push((op >> 8) as u8);
            program.push(op as u8);
        }
        let mut interpreter = Interpreter::new();
        interpreter.load_bytes(&program).unwrap();
        interpreter
    }

    /// Steps the interpreter the given number of times, expecting no faults.
    fn run(interpreter: &mut Interpreter, steps: usize) {
        for _ in 0..steps {
            interpreter.step().unwrap();
        }
    }

    #[test]
    fn initial_state() {
        let interpreter = Interpreter::new();

        assert_eq!(interpreter.pc(), 0x200);
        assert_eq!(interpreter.i().addr(), 0);
        assert!(interpreter.call_stack().is_empty());
        assert_eq!(&interpreter.mem()[0x50..0xA0], &FONT[..]);
        assert!(interpreter.mem()[..0x50].iter().all(|&b| b == 0));
        assert!(interpreter.mem()[0xA0..].iter().all(|&b| b == 0));
    }

    /// Tests that `LD Vx, byte` followed by `ADD Vx, byte` wraps and leaves
    /// `VF` alone.
    #[test]
    fn instruction_add_byte() {
        let cases = [(0x12u8, 0x34u8), (0xFF, 0x01), (0x80, 0x80), (0x00, 0x00)];

        for &(b1, b2) in cases.iter() {
            let mut interpreter = with_program(&[
                0x6F00 | 0xAA,
                0x6300 | b1 as u16,
                0x7300 | b2 as u16,
            ]);
            run(&mut interpreter, 3);
            assert_eq!(
                interpreter.register(Register::V3),
                b1.wrapping_add(b2),
                "case {:?}",
                (b1, b2)
            );
            assert_eq!(interpreter.register(Register::VF), 0xAA);
        }
    }

    /// Tests the `ADD Vx, Vy` operation.
    #[test]
    fn instruction_add() {
        use Register::*;

        // Test cases, in the format (Vx, Vy, b1, b2).
        let cases = [
            (V0, V1, 24u8, 67u8),
            (V5, VD, 54u8, 102u8),
            (V7, VE, 255u8, 255u8),
            (V2, V4, 1u8, 255u8),
            (V5, V6, 0u8, 78u8),
            (V8, V9, 0xFFu8, 0x01u8),
            (V8, V9, 0x01u8, 0x01u8),
        ];
        let mut interpreter = Interpreter::new();

        for &(vx, vy, b1, b2) in cases.iter() {
            let case = (vx, vy, b1, b2);
            let sum = b1.wrapping_add(b2);
            let carry = b1 as u32 + b2 as u32 > u8::MAX as u32;

            interpreter.set_register(vx, b1);
            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::AddReg(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), sum, "case {:?}", case);
            assert_eq!(interpreter.register(VF), carry as u8, "case {:?}", case);
        }
    }

    /// Tests `ADD` with the same register as both operands, and with `VF` as
    /// the destination.
    #[test]
    fn instruction_add_self_referential() {
        use Register::*;
        let mut interpreter = Interpreter::new();

        interpreter.set_register(V2, 0x90);
        interpreter.execute(Instruction::AddReg(V2, V2)).unwrap();
        assert_eq!(interpreter.register(V2), 0x20);
        assert_eq!(interpreter.register(VF), 1);

        // The result overwrites the flag.
        interpreter.set_register(VF, 0x10);
        interpreter.set_register(V1, 0x20);
        interpreter.execute(Instruction::AddReg(VF, V1)).unwrap();
        assert_eq!(interpreter.register(VF), 0x30);
    }

    /// Tests the `AND`, `OR` and `XOR` operations.
    #[test]
    fn instruction_bitwise() {
        use Register::*;

        // Test cases, in the format (Vx, Vy, b1, b2).
        let cases = [
            (V7, V2, 0x75, 0xF2),
            (V3, V8, 0x01, 0xFF),
            (VA, VE, 0x6A, 0x32),
            (VF, VC, 0x78, 0xFD),
            (V0, V1, 0xF0, 0x0F),
        ];
        let mut interpreter = Interpreter::new();

        for &(vx, vy, b1, b2) in cases.iter() {
            let case = (vx, vy, b1, b2);

            interpreter.set_register(vx, b1);
            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::Or(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), b1 | b2, "case {:?}", case);

            interpreter.set_register(vx, b1);
            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::And(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), b1 & b2, "case {:?}", case);

            interpreter.set_register(vx, b1);
            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::Xor(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), b1 ^ b2, "case {:?}", case);

            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::LdReg(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), b2, "case {:?}", case);
        }
    }

    /// Tests the `SUB` and `SUBN` operations.
    #[test]
    fn instruction_sub() {
        use Register::*;

        // Test cases, in the format (Vx, Vy, b1, b2).
        let cases = [
            (V9, V8, 70u8, 35u8),
            (V6, V2, 56u8, 2u8),
            (V0, V1, 0u8, 0u8),
            (VE, VA, 255u8, 255u8),
            (V3, V7, 1u8, 255u8),
            (V3, V7, 5u8, 3u8),
            (V3, V7, 3u8, 5u8),
        ];
        let mut interpreter = Interpreter::new();

        for &(vx, vy, b1, b2) in cases.iter() {
            let case = (vx, vy, b1, b2);

            interpreter.set_register(vx, b1);
            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::Sub(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), b1.wrapping_sub(b2), "case {:?}", case);
            assert_eq!(interpreter.register(VF), (b1 > b2) as u8, "case {:?}", case);

            interpreter.set_register(vx, b1);
            interpreter.set_register(vy, b2);
            interpreter.execute(Instruction::Subn(vx, vy)).unwrap();
            assert_eq!(interpreter.register(vx), b2.wrapping_sub(b1), "case {:?}", case);
            assert_eq!(interpreter.register(VF), (b2 > b1) as u8, "case {:?}", case);
        }

        interpreter.set_register(V3, 3);
        interpreter.set_register(V7, 5);
        interpreter.execute(Instruction::Sub(V3, V7)).unwrap();
        assert_eq!(interpreter.register(V3), 0xFE);
        assert_eq!(interpreter.register(VF), 0);
    }

    /// When `VF` is the subtrahend, the flag has already replaced it.
    #[test]
    fn instruction_sub_reads_flag() {
        use Register::*;
        let mut interpreter = Interpreter::new();

        interpreter.set_register(V0, 5);
        interpreter.set_register(VF, 3);
        interpreter.execute(Instruction::Sub(V0, VF)).unwrap();
        assert_eq!(interpreter.register(VF), 1);
        assert_eq!(interpreter.register(V0), 4);

        interpreter.set_register(V0, 5);
        interpreter.set_register(VF, 3);
        interpreter.execute(Instruction::Subn(V0, VF)).unwrap();
        assert_eq!(interpreter.register(VF), 0);
        assert_eq!(interpreter.register(V0), 0xFB);
    }

    /// Tests the `SHR` and `SHL` operations.
    #[test]
    fn instruction_shift() {
        use Register::*;
        let mut interpreter = Interpreter::new();

        interpreter.set_register(V1, 0x03);
        interpreter.execute(Instruction::Shr(V1)).unwrap();
        assert_eq!(interpreter.register(V1), 0x01);
        assert_eq!(interpreter.register(VF), 1);

        interpreter.set_register(V1, 0x02);
        interpreter.execute(Instruction::Shr(V1)).unwrap();
        assert_eq!(interpreter.register(V1), 0x01);
        assert_eq!(interpreter.register(VF), 0);

        interpreter.set_register(V1, 0x81);
        interpreter.execute(Instruction::Shl(V1)).unwrap();
        assert_eq!(interpreter.register(V1), 0x02);
        assert_eq!(interpreter.register(VF), 1);

        interpreter.set_register(V1, 0x41);
        interpreter.execute(Instruction::Shl(V1)).unwrap();
        assert_eq!(interpreter.register(V1), 0x82);
        assert_eq!(interpreter.register(VF), 0);

        // Shifting VF itself shifts the flag that was just written.
        interpreter.set_register(VF, 0x03);
        interpreter.execute(Instruction::Shr(VF)).unwrap();
        assert_eq!(interpreter.register(VF), 0);
        interpreter.set_register(VF, 0x80);
        interpreter.execute(Instruction::Shl(VF)).unwrap();
        assert_eq!(interpreter.register(VF), 2);
    }

    /// The `y` field of a shift opcode is ignored.
    #[test]
    fn shift_ignores_vy() {
        let mut interpreter = with_program(&[0x6106, 0x62FF, 0x8126]);
        run(&mut interpreter, 3);
        assert_eq!(interpreter.register(Register::V1), 0x03);
        assert_eq!(interpreter.register(Register::V2), 0xFF);
    }

    /// Tests the `LD B, Vx` operation.
    #[test]
    fn instruction_ld_b() {
        use Register::*;

        // Test cases, in the format (Vx, n1, n2, n3), where the three digits
        // to be stored are n1, n2 and n3 (in that order).
        let cases = [
            (V5, 1, 2, 3),
            (VD, 0, 0, 1),
            (VE, 1, 0, 0),
            (V2, 2, 5, 5),
            (V6, 0, 0, 0),
            (V8, 0, 6, 4),
            (V0, 1, 5, 7),
        ];
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0x300).unwrap());

        for &(vx, n1, n2, n3) in cases.iter() {
            let case = (vx, n1, n2, n3);
            let n = 100 * n1 + 10 * n2 + n3;

            interpreter.set_register(vx, n);
            interpreter.execute(Instruction::LdB(vx)).unwrap();
            let i = interpreter.i().addr();
            assert_eq!(interpreter.mem()[i], n1, "case {:?}", case);
            assert_eq!(interpreter.mem()[i + 1], n2, "case {:?}", case);
            assert_eq!(interpreter.mem()[i + 2], n3, "case {:?}", case);
        }
    }

    #[test]
    fn ld_b_out_of_bounds() {
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0xFFE).unwrap());

        assert_eq!(
            interpreter.execute(Instruction::LdB(Register::V0)),
            Err(Fault::AddressOutOfBounds(0x1000))
        );
        assert_eq!(interpreter.mem()[0xFFE], 0);
    }

    #[test]
    fn cls_clears_pixels() {
        let mut interpreter = with_program(&[0xA050, 0xD005, 0x00E0]);
        run(&mut interpreter, 2);
        assert_eq!(interpreter.pixel(0, 0), 1);

        interpreter.display_mut().refresh(|_| -> Result<(), Fault> { Ok(()) }).unwrap();
        run(&mut interpreter, 1);
        assert!(interpreter.display().needs_refresh());
        for x in 0..display::WIDTH {
            for y in 0..display::HEIGHT {
                assert_eq!(interpreter.pixel(x, y), 0, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn pixel_out_of_range() {
        let mut interpreter = Interpreter::new();
        interpreter.display_mut().draw_sprite(&[0xFF], 56, 31);

        assert_eq!(interpreter.pixel(63, 31), 1);
        assert_eq!(interpreter.pixel(64, 31), 0);
        assert_eq!(interpreter.pixel(63, 32), 0);
        assert_eq!(interpreter.pixel(1000, 1000), 0);
    }

    #[test]
    fn call_and_return() {
        let mut interpreter = with_program(&[0x2206, 0x6101, 0x1204, 0x6202, 0x00EE]);

        interpreter.step().unwrap();
        assert_eq!(interpreter.pc(), 0x206);
        assert_eq!(interpreter.call_stack(), &[0x202]);

        run(&mut interpreter, 2);
        assert_eq!(interpreter.pc(), 0x202);
        assert!(interpreter.call_stack().is_empty());
        assert_eq!(interpreter.register(Register::V2), 2);

        interpreter.step().unwrap();
        assert_eq!(interpreter.register(Register::V1), 1);
    }

    #[test]
    fn stack_overflow() {
        // Every instruction calls the next one.
        let program: Vec<u16> = (0..17).map(|n| 0x2202 + 2 * n).collect();
        let mut interpreter = with_program(&program);
        interpreter.set_dt(100);

        run(&mut interpreter, 16);
        assert_eq!(interpreter.call_stack().len(), STACK_SIZE);
        assert_eq!(interpreter.dt(), 84);

        assert_eq!(
            interpreter.step(),
            Err(Fault::StackOverflow(Address::from_u16(0x222).unwrap()))
        );
        assert_eq!(interpreter.call_stack().len(), STACK_SIZE);
        // The failed step doesn't tick the timers.
        assert_eq!(interpreter.dt(), 84);
    }

    #[test]
    fn stack_underflow() {
        let mut interpreter = with_program(&[0x00EE]);
        interpreter.set_st(5);

        assert_eq!(interpreter.step(), Err(Fault::StackUnderflow));
        assert_eq!(interpreter.st(), 5);
    }

    #[test]
    fn jumps() {
        let mut interpreter = with_program(&[0x1208]);
        interpreter.step().unwrap();
        assert_eq!(interpreter.pc(), 0x208);

        interpreter.set_register(Register::V0, 0x10);
        interpreter.execute(Instruction::JpV0(Address::from_u16(0x300).unwrap())).unwrap();
        assert_eq!(interpreter.pc(), 0x310);
    }

    #[test]
    fn skips() {
        use Register::*;

        let mut interpreter = Interpreter::new();
        interpreter.set_register(V1, 0x42);
        interpreter.set_register(V2, 0x42);
        interpreter.set_register(V3, 0x43);

        let cases = [
            (Instruction::SeByte(V1, 0x42), true),
            (Instruction::SeByte(V1, 0x43), false),
            (Instruction::SneByte(V1, 0x43), true),
            (Instruction::SneByte(V1, 0x42), false),
            (Instruction::SeReg(V1, V2), true),
            (Instruction::SeReg(V1, V3), false),
            (Instruction::SneReg(V1, V3), true),
            (Instruction::SneReg(V1, V2), false),
        ];

        for &(ins, skipped) in cases.iter() {
            let before = interpreter.pc();
            interpreter.execute(ins).unwrap();
            let expected = if skipped { before + 2 } else { before };
            assert_eq!(interpreter.pc(), expected, "instruction {}", ins);
        }
    }

    #[test]
    fn key_skips() {
        use Register::*;

        let mut interpreter = Interpreter::new();
        interpreter.set_register(V0, 0xA);
        interpreter.set_key(0xA, true);

        interpreter.execute(Instruction::Skp(V0)).unwrap();
        assert_eq!(interpreter.pc(), 0x202);
        interpreter.execute(Instruction::Sknp(V0)).unwrap();
        assert_eq!(interpreter.pc(), 0x202);

        interpreter.set_key(0xA, false);
        interpreter.execute(Instruction::Skp(V0)).unwrap();
        assert_eq!(interpreter.pc(), 0x202);
        interpreter.execute(Instruction::Sknp(V0)).unwrap();
        assert_eq!(interpreter.pc(), 0x204);

        // A register value past the keypad is never pressed.
        interpreter.set_register(V0, 0x1A);
        interpreter.execute(Instruction::Skp(V0)).unwrap();
        assert_eq!(interpreter.pc(), 0x204);
        interpreter.execute(Instruction::Sknp(V0)).unwrap();
        assert_eq!(interpreter.pc(), 0x206);
    }

    #[test]
    fn wait_for_key() {
        let mut interpreter = with_program(&[0xF30A, 0x6001]);

        for _ in 0..5 {
            interpreter.step().unwrap();
            assert_eq!(interpreter.pc(), 0x200);
        }

        interpreter.set_keys(&[
            false, false, false, false, false, true, false, false, false, true, false, false,
            false, false, false, false,
        ]);
        interpreter.step().unwrap();
        assert_eq!(interpreter.register(Register::V3), 5);
        assert_eq!(interpreter.pc(), 0x202);
        // The key is still held.
        assert!(interpreter.input().is_pressed(Key::K5));
    }

    #[test]
    fn set_key_out_of_range() {
        let mut interpreter = Interpreter::new();

        interpreter.set_key(16, true);
        interpreter.set_key(255, true);
        assert_eq!(interpreter.input(), &input::State::new());
    }

    #[test]
    fn draw_twice_erases() {
        // LD I, sprite; LD V0, 62; LD V1, 3; DRW V0, V1, 2 (twice)
        let mut interpreter = with_program(&[0xA20C, 0x603E, 0x6103, 0xD012, 0xD012, 0x1FFF, 0xC3A5]);

        run(&mut interpreter, 4);
        assert_eq!(interpreter.register(Register::VF), 0);
        let lit: Vec<(usize, usize)> = (0..display::WIDTH)
            .flat_map(|x| (0..display::HEIGHT).map(move |y| (x, y)))
            .filter(|&(x, y)| interpreter.pixel(x, y) == 1)
            .collect();
        // 0xC3 and 0xA5 at column 62 wrap around to the left edge.
        assert_eq!(
            lit,
            vec![
                (0, 4),
                (3, 4),
                (4, 3),
                (5, 3),
                (5, 4),
                (62, 3),
                (62, 4),
                (63, 3),
            ]
        );

        interpreter.step().unwrap();
        assert_eq!(interpreter.register(Register::VF), 1);
        assert!(interpreter.display().data().iter().all(|col| col.iter().all(|&p| !p)));
    }

    #[test]
    fn draw_out_of_bounds() {
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0xFFC).unwrap());
        interpreter.set_register(Register::VF, 7);

        assert_eq!(
            interpreter.execute(Instruction::Drw(Register::V0, Register::V0, 5)),
            Err(Fault::AddressOutOfBounds(0x1000))
        );
        assert_eq!(interpreter.register(Register::VF), 7);
        assert!(!interpreter.display().needs_refresh());

        interpreter.execute(Instruction::Drw(Register::V0, Register::V0, 4)).unwrap();
        assert!(interpreter.display().needs_refresh());
    }

    #[test]
    fn draw_clipped_rows_past_end_of_memory() {
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0xFFE).unwrap());
        interpreter.mem_mut()[0xFFE] = 0x80;
        interpreter.mem_mut()[0xFFF] = 0x80;
        interpreter.set_register(Register::V1, 30);

        interpreter.execute(Instruction::Drw(Register::V0, Register::V1, 5)).unwrap();
        assert_eq!(interpreter.pixel(0, 30), 1);
        assert_eq!(interpreter.pixel(0, 31), 1);
        assert_eq!(interpreter.pixel(0, 0), 0);
        assert_eq!(interpreter.register(Register::VF), 0);

        interpreter.set_register(Register::V1, 29);
        assert_eq!(
            interpreter.execute(Instruction::Drw(Register::V0, Register::V1, 5)),
            Err(Fault::AddressOutOfBounds(0x1000))
        );
    }

    #[test]
    fn font_digits() {
        let mut interpreter = Interpreter::new();

        for digit in 0..16 {
            interpreter.set_register(Register::V4, digit);
            interpreter.execute(Instruction::LdF(Register::V4)).unwrap();
            assert_eq!(interpreter.i().addr(), 0x50 + 5 * digit as usize);
        }

        interpreter.set_register(Register::V4, 16);
        interpreter.execute(Instruction::LdF(Register::V4)).unwrap();
        assert_eq!(interpreter.i().addr(), 0);
    }

    #[test]
    fn add_i() {
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0xF00).unwrap());
        interpreter.set_register(Register::V1, 0xFF);

        interpreter.execute(Instruction::AddI(Register::V1)).unwrap();
        assert_eq!(interpreter.i().addr(), 0xFFF);
        assert_eq!(interpreter.register(Register::VF), 0);

        interpreter.execute(Instruction::AddI(Register::V1)).unwrap();
        assert_eq!(interpreter.i().addr(), 0);
    }

    #[test]
    fn register_block_transfer() {
        use Register::*;
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0x400).unwrap());
        for (n, &reg) in [V0, V1, V2, V3].iter().enumerate() {
            interpreter.set_register(reg, 0x10 + n as u8);
        }

        interpreter.execute(Instruction::LdDerefIReg(V2)).unwrap();
        assert_eq!(&interpreter.mem()[0x400..0x404], &[0x10, 0x11, 0x12, 0x00]);
        assert_eq!(interpreter.i().addr(), 0x400);

        interpreter.mem_mut()[0x400..0x404].copy_from_slice(&[0xA0, 0xA1, 0xA2, 0xA3]);
        interpreter.execute(Instruction::LdRegDerefI(V1)).unwrap();
        assert_eq!(interpreter.register(V0), 0xA0);
        assert_eq!(interpreter.register(V1), 0xA1);
        assert_eq!(interpreter.register(V2), 0x12);
    }

    #[test]
    fn register_block_transfer_out_of_bounds() {
        use Register::*;
        let mut interpreter = Interpreter::new();
        interpreter.set_i(Address::from_usize(0xFFE).unwrap());
        interpreter.set_register(V0, 0x55);

        assert_eq!(
            interpreter.execute(Instruction::LdDerefIReg(V2)),
            Err(Fault::AddressOutOfBounds(0x1000))
        );
        assert_eq!(interpreter.mem()[0xFFE], 0);

        interpreter.mem_mut()[0xFFE] = 0x99;
        assert_eq!(
            interpreter.execute(Instruction::LdRegDerefI(V2)),
            Err(Fault::AddressOutOfBounds(0x1000))
        );
        assert_eq!(interpreter.register(V0), 0x55);

        // Exactly reaching the last byte is fine.
        interpreter.execute(Instruction::LdRegDerefI(V1)).unwrap();
        assert_eq!(interpreter.register(V0), 0x99);
    }

    #[test]
    fn rnd_is_masked() {
        let mut interpreter = Interpreter::new();

        for _ in 0..32 {
            interpreter.execute(Instruction::Rnd(Register::V5, 0x0F)).unwrap();
            assert!(interpreter.register(Register::V5) <= 0x0F);
            interpreter.execute(Instruction::Rnd(Register::V6, 0x00)).unwrap();
            assert_eq!(interpreter.register(Register::V6), 0);
        }
    }

    #[test]
    fn timers() {
        // LD V0, 3; LD DT, V0; LD ST, V0; LD V1, DT
        let mut interpreter = with_program(&[0x6003, 0xF015, 0xF018, 0xF107, 0x1208]);

        run(&mut interpreter, 2);
        assert_eq!(interpreter.dt(), 2);
        run(&mut interpreter, 1);
        assert_eq!(interpreter.st(), 2);
        assert!(interpreter.play_sound());
        run(&mut interpreter, 1);
        assert_eq!(interpreter.register(Register::V1), 1);
        assert_eq!(interpreter.dt(), 0);

        run(&mut interpreter, 5);
        assert_eq!(interpreter.dt(), 0);
        assert_eq!(interpreter.st(), 0);
        assert!(!interpreter.play_sound());
    }

    #[test]
    fn unknown_opcode_is_skipped() {
        let mut interpreter = with_program(&[0x0123, 0x8AB9]);
        interpreter.set_dt(10);

        run(&mut interpreter, 2);
        assert_eq!(interpreter.pc(), 0x204);
        assert_eq!(interpreter.dt(), 8);
        assert!(interpreter.regs.iter().all(|r| r.0 == 0));
    }

    #[test]
    fn fetch_out_of_bounds() {
        let mut interpreter = Interpreter::new();
        interpreter.pc = 0xFFF;
        interpreter.set_dt(1);

        assert_eq!(interpreter.step(), Err(Fault::PcOutOfBounds(0xFFF)));
        assert_eq!(interpreter.pc(), 0xFFF);
        assert_eq!(interpreter.dt(), 1);

        interpreter.pc = 0xFFE;
        interpreter.step().unwrap();
    }

    #[test]
    fn load_size_limits() {
        let mut interpreter = Interpreter::new();

        let program = vec![0xAB; PROG_SIZE];
        interpreter.load_bytes(&program).unwrap();
        assert_eq!(interpreter.prog_len(), 4096 - 512);
        assert_eq!(interpreter.mem()[MEM_SIZE - 1], 0xAB);

        let program = vec![0xCD; PROG_SIZE + 1];
        match interpreter.load_bytes(&program) {
            Err(LoadError::TooLarge(len)) => assert_eq!(len, PROG_SIZE + 1),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(interpreter.mem()[PROG_START], 0xAB);
        assert_eq!(interpreter.prog_len(), PROG_SIZE);
    }

    #[test]
    fn load_from_reader() {
        let mut interpreter = Interpreter::new();
        let mut input = io::Cursor::new(vec![0x60, 0x2A]);

        interpreter.load_program(&mut input).unwrap();
        interpreter.step().unwrap();
        assert_eq!(interpreter.register(Register::V0), 0x2A);
    }

    /// A reader which always fails.
    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device unplugged"))
        }
    }

    #[test]
    fn load_read_error() {
        let mut interpreter = with_program(&[0x6507]);

        match interpreter.load_program(&mut BrokenReader) {
            Err(LoadError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::Other),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(interpreter.prog_len(), 2);
        assert_eq!(&interpreter.mem()[PROG_START..PROG_START + 2], &[0x65, 0x07]);
    }

    #[test]
    fn load_missing_file() {
        let mut interpreter = Interpreter::new();

        match interpreter.load_file("this/file/does/not/exist.ch8") {
            Err(LoadError::NotFound(path)) => {
                assert_eq!(path, PathBuf::from("this/file/does/not/exist.ch8"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn reload_keeps_state() {
        let mut interpreter = with_program(&[0x6507, 0x1202]);
        run(&mut interpreter, 2);

        interpreter.load_bytes(&[0x00, 0xE0]).unwrap();
        assert_eq!(interpreter.register(Register::V5), 7);
        assert_eq!(interpreter.pc(), 0x202);
        assert_eq!(interpreter.prog_len(), 2);
    }

    #[test]
    fn runs_off_end() {
        let mut interpreter = with_program(&[0x6001, 0x6102]);
        assert!(!interpreter.ran_off_end());

        run(&mut interpreter, 1);
        assert!(!interpreter.ran_off_end());
        run(&mut interpreter, 1);
        assert!(interpreter.ran_off_end());
    }
}
