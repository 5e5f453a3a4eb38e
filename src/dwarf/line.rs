// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! `.debug_line` state-machine interpreter.
//!
//! The program is run once per unit at parse time and the resulting rows are
//! materialized into a sorted vector, so address lookups are plain binary
//! searches with no interpreter state to restart.

use super::reader::Reader;
use super::{AddressNormalizer, Error, Result};
use crate::dwarf::consts::*;

/// One source/address mapping produced by the line program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    /// First address covered by this row (normalized).
    pub address: u64,
    /// Index into [`LineTable::file_name`].
    pub file: u32,
    /// Source line, 1-based; 0 means "no line".
    pub line: u32,
    /// Source column, 1-based; 0 means "no column".
    pub column: u32,
    /// Whether this address is a recommended breakpoint location.
    pub is_stmt: bool,
    /// Marks the first address past the end of a sequence. An end-sequence
    /// row carries no source location.
    pub end_sequence: bool,
}

/// The decoded line table of one compilation unit.
#[derive(Debug, Default)]
pub struct LineTable {
    files: Vec<String>,
    rows: Vec<LineRow>,
}

impl LineTable {
    /// All rows, sorted by `(sequence start, address)`.
    pub fn rows(&self) -> &[LineRow] {
        &self.rows
    }

    /// Resolves a file index of a row into its path.
    pub fn file_name(&self, index: u32) -> Option<&str> {
        self.files.get(index as usize).map(|x| x.as_str())
    }

    /// Finds the row describing `address`.
    ///
    /// Returns the greatest row with `row.address <= address`, unless that
    /// row closes a sequence (the address lies between functions).
    pub fn row_for(&self, address: u64) -> Option<&LineRow> {
        let idx = self.rows.partition_point(|row| row.address <= address);
        let row = self.rows[..idx].last()?;
        if row.end_sequence {
            None
        } else {
            Some(row)
        }
    }
}

/// Line-program state-machine registers.
struct Registers {
    address: u64,
    file: u64,
    line: i64,
    column: u64,
    is_stmt: bool,
}

impl Registers {
    fn reset(default_is_stmt: bool) -> Self {
        Self {
            address: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
        }
    }

    fn emit(&self, end_sequence: bool) -> LineRow {
        LineRow {
            address: self.address,
            file: self.file as u32,
            line: self.line.max(0) as u32,
            column: self.column as u32,
            is_stmt: self.is_stmt,
            end_sequence,
        }
    }
}

/// Runs the line program at `offset` of `.debug_line`.
///
/// `comp_dir` and `primary_file` come from the unit root and provide the
/// working directory for relative paths and the name of file index 0.
pub(crate) fn parse(
    debug_line: &[u8],
    offset: u64,
    address_size: u8,
    comp_dir: Option<&str>,
    primary_file: Option<&str>,
    normalizer: &AddressNormalizer,
) -> Result<LineTable> {
    let mut r = Reader::new_at(debug_line, offset as usize)?;

    let (unit_length, is_64) = r.initial_length()?;
    let end = r
        .pos()
        .checked_add(unit_length as usize)
        .ok_or(Error::MalformedLength(unit_length))?;

    let version = r.u16()?;
    if !(2..=4).contains(&version) {
        return Err(Error::UnsupportedVersion(version));
    }

    let header_length = r.offset(is_64)?;
    let program_start = r
        .pos()
        .checked_add(header_length as usize)
        .ok_or(Error::MalformedLength(header_length))?;

    let min_inst_length = r.u8()? as u64;
    if version >= 4 {
        // maximum_operations_per_instruction; VLIW op_index tracking is not
        // implemented, which matches every non-VLIW target.
        r.u8()?;
    }
    let default_is_stmt = r.u8()? != 0;
    let line_base = r.u8()? as i8 as i64;
    let line_range = r.u8()? as u64;
    let opcode_base = r.u8()?;
    if min_inst_length == 0 || line_range == 0 || opcode_base == 0 {
        return Err(Error::MalformedLength(unit_length));
    }

    let mut std_opcode_lengths = Vec::with_capacity(opcode_base as usize - 1);
    for _ in 1..opcode_base {
        std_opcode_lengths.push(r.u8()?);
    }

    // Include directories, terminated by an empty name.
    let mut dirs = Vec::new();
    loop {
        let raw = r.cstr()?;
        if raw.is_empty() {
            break;
        }
        dirs.push(String::from_utf8_lossy(raw).into_owned());
    }

    // File entries. Index 0 refers to the unit's primary source file.
    let mut files = vec![primary_file.unwrap_or_default().to_owned()];
    loop {
        let raw = r.cstr()?;
        if raw.is_empty() {
            break;
        }
        let dir_index = r.uleb128()?;
        r.uleb128()?; // mtime
        r.uleb128()?; // length
        files.push(join_path(&String::from_utf8_lossy(raw), dir_index, &dirs, comp_dir));
    }

    r.seek(program_start)?;

    let mut regs = Registers::reset(default_is_stmt);
    let mut sequences: Vec<(u64, Vec<LineRow>)> = Vec::new();
    let mut current: Vec<LineRow> = Vec::new();

    let const_pc_advance = ((255 - opcode_base) as u64 / line_range) * min_inst_length;

    while r.pos() < end {
        let opcode = r.u8()?;

        if opcode >= opcode_base {
            let adjusted = (opcode - opcode_base) as u64;
            regs.address += (adjusted / line_range) * min_inst_length;
            regs.line += line_base + (adjusted % line_range) as i64;
            current.push(regs.emit(false));
            continue;
        }

        match opcode {
            0 => {
                // Extended opcode: length-prefixed.
                let len = r.uleb128()? as usize;
                let op_end = r.pos().checked_add(len).ok_or(Error::TruncatedSection)?;
                let sub = r.u8()?;
                match sub {
                    DW_LNE_end_sequence => {
                        current.push(regs.emit(true));
                        let start = current[0].address;
                        sequences.push((start, std::mem::take(&mut current)));
                        regs = Registers::reset(default_is_stmt);
                    }
                    DW_LNE_set_address => {
                        regs.address = normalizer(r.ulong(address_size)?);
                    }
                    DW_LNE_define_file => {
                        let raw = r.cstr()?;
                        let dir_index = r.uleb128()?;
                        r.uleb128()?; // mtime
                        r.uleb128()?; // length
                        files.push(join_path(
                            &String::from_utf8_lossy(raw),
                            dir_index,
                            &dirs,
                            comp_dir,
                        ));
                    }
                    DW_LNE_set_discriminator => {
                        r.uleb128()?;
                    }
                    other => return Err(Error::UnknownOpcode(other)),
                }
                r.seek(op_end)?;
            }
            DW_LNS_copy => current.push(regs.emit(false)),
            DW_LNS_advance_pc => regs.address += r.uleb128()? * min_inst_length,
            DW_LNS_advance_line => regs.line += r.sleb128()?,
            DW_LNS_set_file => regs.file = r.uleb128()?,
            DW_LNS_set_column => regs.column = r.uleb128()?,
            DW_LNS_negate_stmt => regs.is_stmt = !regs.is_stmt,
            DW_LNS_set_basic_block => {}
            DW_LNS_const_add_pc => regs.address += const_pc_advance,
            DW_LNS_fixed_advance_pc => regs.address += r.u16()? as u64,
            DW_LNS_set_prologue_end | DW_LNS_set_epilogue_begin => {}
            DW_LNS_set_isa => {
                r.uleb128()?;
            }
            // A standard opcode we don't model: its declared operand count
            // tells us how much to skip.
            other => {
                for _ in 0..std_opcode_lengths[other as usize - 1] {
                    r.uleb128()?;
                }
            }
        }
    }

    // An unterminated trailing sequence is kept rather than dropped.
    if !current.is_empty() {
        let start = current[0].address;
        sequences.push((start, current));
    }

    sequences.sort_by_key(|&(start, _)| start);

    Ok(LineTable {
        files,
        rows: sequences.into_iter().flat_map(|(_, rows)| rows).collect(),
    })
}

/// Builds the display path of a file entry.
fn join_path(name: &str, dir_index: u64, dirs: &[String], comp_dir: Option<&str>) -> String {
    if name.starts_with('/') {
        return name.to_owned();
    }

    let dir = match dir_index.checked_sub(1) {
        None => comp_dir.unwrap_or(""),
        Some(idx) => dirs.get(idx as usize).map(|x| x.as_str()).unwrap_or(""),
    };

    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::testenc::Enc;

    /// Assembles a version-2 line program with one include dir and one file.
    fn encode_program(file: &str, opcodes: &[u8]) -> Vec<u8> {
        let mut header = Enc::new();
        header.u8(1); // min_inst_length
        header.u8(1); // default_is_stmt
        header.u8(-5i8 as u8); // line_base
        header.u8(14); // line_range
        header.u8(13); // opcode_base
        header.bytes(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]); // std lengths
        header.u8(0); // no include dirs
        header.cstr(file).uleb(0).uleb(0).uleb(0);
        header.u8(0); // end of file table

        let mut out = Enc::new();
        out.u32((2 + 4 + header.len() + opcodes.len()) as u32);
        out.u16(2);
        out.u32(header.len() as u32);
        out.bytes(&header.0);
        out.bytes(opcodes);
        out.0
    }

    fn set_address(addr: u64) -> Vec<u8> {
        let mut e = Enc::new();
        e.u8(0).uleb(9).u8(DW_LNE_set_address).u64(addr);
        e.0
    }

    fn end_sequence() -> Vec<u8> {
        vec![0, 1, DW_LNE_end_sequence]
    }

    #[test]
    fn simple_sequence() {
        // Mirrors: 0x100 -> line 10, 0x104 -> line 11, end at 0x108.
        let mut ops = Enc::new();
        ops.bytes(&set_address(0x100));
        ops.u8(DW_LNS_advance_line).sleb(9); // line = 10
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(4);
        ops.u8(DW_LNS_advance_line).sleb(1); // line = 11
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(4);
        ops.bytes(&end_sequence());

        let section = encode_program("a.c", &ops.0);
        let table = parse(&section, 0, 8, Some("/src"), Some("a.c"), &|a| a).unwrap();

        let rows = table.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].address, rows[0].line), (0x100, 10));
        assert_eq!((rows[1].address, rows[1].line), (0x104, 11));
        assert!(rows[2].end_sequence);
        assert_eq!(rows[2].address, 0x108);
        assert_eq!(table.file_name(rows[0].file), Some("/src/a.c"));

        // Lookup semantics: greatest row at or before the pc.
        assert_eq!(table.row_for(0x102).unwrap().line, 10);
        assert_eq!(table.row_for(0x104).unwrap().line, 11);
        assert_eq!(table.row_for(0x107).unwrap().line, 11);
        // The end-sequence row terminates lookups.
        assert!(table.row_for(0x108).is_none());
        assert!(table.row_for(0xffff).is_none());
        assert!(table.row_for(0x0ff).is_none());
    }

    #[test]
    fn special_opcodes() {
        // opcode_base 13, line_base -5, line_range 14.
        // special = 13 + (addr_adv * 14) + (line_adv - -5)
        let mut ops = Enc::new();
        ops.bytes(&set_address(0x40));
        ops.u8(13 + 14 + 5 + 2); // addr += 1, line += 2 -> (0x41, 3)
        ops.u8(13 + 5); // addr += 0, line += 0 -> (0x41, 3)
        ops.u8(DW_LNS_const_add_pc); // addr += (255-13)/14 = 17
        ops.u8(13 + 5 + 1); // line += 1 -> (0x52, 4)
        ops.bytes(&end_sequence());

        let section = encode_program("b.c", &ops.0);
        let table = parse(&section, 0, 8, None, Some("b.c"), &|a| a).unwrap();

        let rows = table.rows();
        assert_eq!((rows[0].address, rows[0].line), (0x41, 3));
        assert_eq!((rows[1].address, rows[1].line), (0x41, 3));
        assert_eq!((rows[2].address, rows[2].line), (0x52, 4));
    }

    #[test]
    fn sequences_sorted_by_start() {
        // Two sequences emitted high-address-first; rows come back sorted.
        let mut ops = Enc::new();
        ops.bytes(&set_address(0x200));
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(8);
        ops.bytes(&end_sequence());
        ops.bytes(&set_address(0x100));
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(8);
        ops.bytes(&end_sequence());

        let section = encode_program("c.c", &ops.0);
        let table = parse(&section, 0, 8, None, None, &|a| a).unwrap();

        let addrs: Vec<_> = table.rows().iter().map(|x| x.address).collect();
        assert_eq!(addrs, [0x100, 0x108, 0x200, 0x208]);

        // Within a sequence, addresses never decrease.
        let rows = table.rows();
        for pair in rows.windows(2) {
            if !pair[0].end_sequence {
                assert!(pair[0].address <= pair[1].address);
            }
        }
    }

    #[test]
    fn line_addresses_are_normalized() {
        let mut ops = Enc::new();
        ops.bytes(&set_address(0x40_0100));
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(4);
        ops.bytes(&end_sequence());

        let section = encode_program("d.c", &ops.0);
        let table = parse(&section, 0, 8, None, None, &|a| a - 0x40_0000).unwrap();
        assert_eq!(table.rows()[0].address, 0x100);
    }

    #[test]
    fn unknown_extended_opcode() {
        let mut ops = Enc::new();
        ops.u8(0).uleb(1).u8(0x7d); // vendor extension we don't know
        let section = encode_program("e.c", &ops.0);
        let err = parse(&section, 0, 8, None, None, &|a| a).unwrap_err();
        assert!(matches!(err, Error::UnknownOpcode(0x7d)));
    }
}
