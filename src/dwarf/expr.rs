// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! A small DWARF expression evaluator.
//!
//! Covers the operation subset producers emit for member locations, frame
//! bases and unoptimized variables. Everything else, including multi-piece
//! compositions, yields [`Error::UnsupportedExpression`] and the consumer
//! treats the described object as absent.

use super::reader::Reader;
use super::{Error, Result};
use crate::dwarf::consts::*;
use smallvec::SmallVec;

/// Outcome of evaluating a location expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// The object lives in memory at this address.
    Address(u64),
    /// The object lives in the given DWARF register.
    Register(u16),
    /// The object has no storage; this is its value.
    Constant(u64),
}

/// Read access to target memory, for `DW_OP_deref`.
pub trait MemoryAccess {
    /// Reads a `size`-byte little-endian word at `addr`.
    fn read_word(&self, addr: u64, size: u8) -> Option<u64>;
}

/// Read access to target registers, for `DW_OP_breg*`.
pub trait RegisterAccess {
    /// Returns the value of a DWARF register.
    fn register(&self, reg: u16) -> Option<u64>;
}

/// Evaluation context supplied by the caller.
///
/// All members except the address size are optional; operations needing an
/// absent member evaluate to "unsupported".
#[derive(Default, Clone, Copy)]
pub struct EvalCtx<'a> {
    /// Target address size in bytes.
    pub address_size: u8,
    /// Frame base for `DW_OP_fbreg`; also seeds the stack, which is how
    /// member-location expressions receive the enclosing object's address.
    pub frame_base: Option<u64>,
    /// Target memory, for `DW_OP_deref`.
    pub memory: Option<&'a dyn MemoryAccess>,
    /// Target registers, for `DW_OP_breg*`.
    pub registers: Option<&'a dyn RegisterAccess>,
}

/// Evaluates a DWARF expression block.
pub fn evaluate(expr: &[u8], ctx: &EvalCtx<'_>) -> Result<Value> {
    let mut r = Reader::new(expr);
    let mut stack: SmallVec<[u64; 8]> = SmallVec::new();
    if let Some(fb) = ctx.frame_base {
        stack.push(fb);
    }

    let mut piece_seen = false;

    while !r.is_empty() {
        if piece_seen {
            // A second piece means a composite location.
            return Err(Error::UnsupportedExpression);
        }

        let op = r.u8()?;
        match op {
            DW_OP_addr => {
                let v = r.ulong(ctx.address_size)?;
                stack.push(v);
            }

            DW_OP_const1u => {
                let v = r.u8()? as u64;
                stack.push(v);
            }
            DW_OP_const1s => {
                let v = r.u8()? as i8 as i64 as u64;
                stack.push(v);
            }
            DW_OP_const2u => {
                let v = r.u16()? as u64;
                stack.push(v);
            }
            DW_OP_const2s => {
                let v = r.u16()? as i16 as i64 as u64;
                stack.push(v);
            }
            DW_OP_const4u => {
                let v = r.u32()? as u64;
                stack.push(v);
            }
            DW_OP_const4s => {
                let v = r.u32()? as i32 as i64 as u64;
                stack.push(v);
            }
            DW_OP_const8u | DW_OP_const8s => {
                let v = r.u64()?;
                stack.push(v);
            }
            DW_OP_constu => {
                let v = r.uleb128()?;
                stack.push(v);
            }
            DW_OP_consts => {
                let v = r.sleb128()? as u64;
                stack.push(v);
            }

            DW_OP_plus_uconst => {
                let v = r.uleb128()?;
                let top = stack.last_mut().ok_or(Error::UnsupportedExpression)?;
                *top = top.wrapping_add(v);
            }

            DW_OP_reg0..=DW_OP_reg31 => {
                return Ok(Value::Register((op - DW_OP_reg0) as u16));
            }
            DW_OP_regx => {
                return Ok(Value::Register(r.uleb128()? as u16));
            }

            DW_OP_breg0..=DW_OP_breg31 => {
                let offset = r.sleb128()?;
                let base = read_register(ctx, (op - DW_OP_breg0) as u16)?;
                stack.push(base.wrapping_add_signed(offset));
            }
            DW_OP_bregx => {
                let reg = r.uleb128()? as u16;
                let offset = r.sleb128()?;
                let base = read_register(ctx, reg)?;
                stack.push(base.wrapping_add_signed(offset));
            }

            DW_OP_fbreg => {
                let offset = r.sleb128()?;
                let fb = ctx.frame_base.ok_or(Error::UnsupportedExpression)?;
                stack.push(fb.wrapping_add_signed(offset));
            }

            DW_OP_deref => {
                let addr = stack.pop().ok_or(Error::UnsupportedExpression)?;
                let mem = ctx.memory.ok_or(Error::UnsupportedExpression)?;
                let v = mem
                    .read_word(addr, ctx.address_size)
                    .ok_or(Error::UnsupportedExpression)?;
                stack.push(v);
            }

            DW_OP_stack_value => {
                let v = stack.pop().ok_or(Error::UnsupportedExpression)?;
                return Ok(Value::Constant(v));
            }

            DW_OP_piece => {
                r.uleb128()?;
                piece_seen = true;
            }

            _ => return Err(Error::UnsupportedExpression),
        }
    }

    stack
        .pop()
        .map(Value::Address)
        .ok_or(Error::UnsupportedExpression)
}

fn read_register(ctx: &EvalCtx<'_>, reg: u16) -> Result<u64> {
    ctx.registers
        .and_then(|x| x.register(reg))
        .ok_or(Error::UnsupportedExpression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::testenc::Enc;

    struct FakeMemory;

    impl MemoryAccess for FakeMemory {
        fn read_word(&self, addr: u64, _size: u8) -> Option<u64> {
            Some(addr + 0x1000)
        }
    }

    struct FakeRegisters;

    impl RegisterAccess for FakeRegisters {
        fn register(&self, reg: u16) -> Option<u64> {
            Some(0x10_0000 + reg as u64)
        }
    }

    fn ctx() -> EvalCtx<'static> {
        EvalCtx {
            address_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn member_offset() {
        // data_member_location as an expression: base is seeded on the stack.
        let mut e = Enc::new();
        e.u8(DW_OP_plus_uconst).uleb(12);

        let ctx = EvalCtx {
            frame_base: Some(0),
            ..ctx()
        };
        assert_eq!(evaluate(&e.0, &ctx).unwrap(), Value::Address(12));
    }

    #[test]
    fn frame_relative() {
        let mut e = Enc::new();
        e.u8(DW_OP_fbreg).sleb(-16);

        let fctx = EvalCtx {
            frame_base: Some(0x7fff_0000),
            ..ctx()
        };
        assert_eq!(evaluate(&e.0, &fctx).unwrap(), Value::Address(0x7ffe_fff0));

        // No frame base -> unsupported.
        assert!(matches!(
            evaluate(&e.0, &ctx()),
            Err(Error::UnsupportedExpression)
        ));
    }

    #[test]
    fn registers() {
        assert_eq!(
            evaluate(&[DW_OP_reg0 + 5], &ctx()).unwrap(),
            Value::Register(5)
        );

        let mut e = Enc::new();
        e.u8(DW_OP_regx).uleb(33);
        assert_eq!(evaluate(&e.0, &ctx()).unwrap(), Value::Register(33));

        let mut e = Enc::new();
        e.u8(DW_OP_breg0 + 7).sleb(8);
        let with_regs = EvalCtx {
            registers: Some(&FakeRegisters),
            ..ctx()
        };
        assert_eq!(
            evaluate(&e.0, &with_regs).unwrap(),
            Value::Address(0x10_0007 + 8)
        );
        assert!(evaluate(&e.0, &ctx()).is_err());
    }

    #[test]
    fn constants_and_values() {
        let mut e = Enc::new();
        e.u8(DW_OP_constu).uleb(42).u8(DW_OP_stack_value);
        assert_eq!(evaluate(&e.0, &ctx()).unwrap(), Value::Constant(42));

        let mut e = Enc::new();
        e.u8(DW_OP_const2s).u16(-2i16 as u16);
        assert_eq!(
            evaluate(&e.0, &ctx()).unwrap(),
            Value::Address(-2i64 as u64)
        );
    }

    #[test]
    fn static_address() {
        let mut e = Enc::new();
        e.u8(DW_OP_addr).u64(0x60_1040);
        assert_eq!(evaluate(&e.0, &ctx()).unwrap(), Value::Address(0x60_1040));
    }

    #[test]
    fn deref() {
        let mut e = Enc::new();
        e.u8(DW_OP_addr).u64(0x2000).u8(DW_OP_deref);

        assert!(evaluate(&e.0, &ctx()).is_err());

        let with_mem = EvalCtx {
            memory: Some(&FakeMemory),
            ..ctx()
        };
        assert_eq!(evaluate(&e.0, &with_mem).unwrap(), Value::Address(0x3000));
    }

    #[test]
    fn single_piece_tolerated() {
        let mut e = Enc::new();
        e.u8(DW_OP_addr).u64(0x2000).u8(DW_OP_piece).uleb(8);
        assert_eq!(evaluate(&e.0, &ctx()).unwrap(), Value::Address(0x2000));
    }

    #[test]
    fn multiple_pieces_rejected() {
        let mut e = Enc::new();
        e.u8(DW_OP_addr).u64(0x2000).u8(DW_OP_piece).uleb(4);
        e.u8(DW_OP_addr).u64(0x3000).u8(DW_OP_piece).uleb(4);
        assert!(matches!(
            evaluate(&e.0, &ctx()),
            Err(Error::UnsupportedExpression)
        ));
    }

    #[test]
    fn unknown_opcode() {
        // DW_OP_xderef is outside the supported subset.
        assert!(matches!(
            evaluate(&[0x18], &ctx()),
            Err(Error::UnsupportedExpression)
        ));
    }

    #[test]
    fn empty_expression() {
        assert!(evaluate(&[], &ctx()).is_err());
    }
}
