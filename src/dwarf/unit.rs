// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Compilation-unit parsing: header decode and the DIE loop.

use super::abbrev::AbbrevTable;
use super::consts::*;
use super::reader::{str_at, Reader};
use super::symbol::{AttrValue, Symbol, SymbolId};
use super::{AddressNormalizer, CancelToken, Error, Result, Sections};
use std::collections::HashMap;

/// Decoded compilation-unit header.
#[derive(Debug, Clone, Copy)]
pub struct UnitHeader {
    /// Offset of the unit within `.debug_info`.
    pub offset: u64,
    /// One past the last byte of the unit.
    pub end: u64,
    /// Offset of the first DIE.
    pub die_start: u64,
    /// DWARF version (2-4).
    pub version: u16,
    /// Whether the unit uses the 64-bit DWARF format.
    pub is_64: bool,
    /// Size of a target address in bytes (4 or 8).
    pub address_size: u8,
    /// Offset of the unit's abbreviation table within `.debug_abbrev`.
    pub abbrev_offset: u64,
}

impl UnitHeader {
    /// Reads one header at the reader's current position.
    ///
    /// On success the reader is left at the first DIE. A version outside 2-4
    /// is reported via [`Error::UnsupportedVersion`] with the reader already
    /// skipped past the unit, so scanning can continue.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let offset = reader.pos() as u64;
        let (length, is_64) = reader.initial_length()?;
        let end = (reader.pos() as u64)
            .checked_add(length)
            .ok_or(Error::MalformedLength(length))?;

        let version = reader.u16()?;
        if !(2..=4).contains(&version) {
            reader.seek(end as usize)?;
            return Err(Error::UnsupportedVersion(version));
        }

        let abbrev_offset = reader.offset(is_64)?;
        let address_size = reader.u8()?;
        if address_size != 4 && address_size != 8 {
            reader.seek(end as usize)?;
            return Err(Error::UnsupportedVersion(version));
        }

        Ok(Self {
            offset,
            end,
            die_start: reader.pos() as u64,
            version,
            is_64,
            address_size,
            abbrev_offset,
        })
    }
}

/// One parsed compilation unit.
#[derive(Debug)]
pub struct Unit {
    /// The unit's header.
    pub header: UnitHeader,
    /// The root (`DW_TAG_compile_unit`) symbol.
    pub root: SymbolId,
    /// The unit's synthetic void type symbol.
    pub void: SymbolId,
}

/// Parses the DIEs of one unit into the session arena.
///
/// Appends symbols to `symbols` and their offsets to `offset_index`; on error
/// the caller rolls both back. The synthetic void type is created here and
/// inserted as the root's first child.
pub(crate) fn parse_unit<'data>(
    sections: &Sections<'data>,
    header: &UnitHeader,
    cu_index: u32,
    symbols: &mut Vec<Symbol<'data>>,
    offset_index: &mut HashMap<u64, SymbolId>,
    normalizer: &AddressNormalizer,
    cancel: &CancelToken,
) -> Result<Unit> {
    let mut reader = Reader::new_at(sections.debug_info, header.die_start as usize)?;
    let mut abbrevs = AbbrevTable::new(sections.debug_abbrev, header.abbrev_offset)?;

    let mut stack: Vec<SymbolId> = Vec::new();
    let mut root: Option<SymbolId> = None;

    while (reader.pos() as u64) < header.end {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let die_offset = reader.pos() as u64;
        let code = reader.uleb128()?;
        if code == 0 {
            // Close the innermost open parent. A terminator at top level or
            // directly after a has-children DIE is fine: empty child list.
            stack.pop();
            continue;
        }

        let abbrev = abbrevs
            .get(code)?
            .ok_or(Error::UnknownAbbrev(code))?
            .clone();

        let mut attrs = HashMap::with_capacity(abbrev.attrs.len());
        for spec in &abbrev.attrs {
            let value = read_value(&mut reader, spec.form, header, sections.debug_str, normalizer)?;
            // Duplicate attributes on one DIE keep the last value.
            attrs.insert(spec.attr, value);
        }

        let id = SymbolId(symbols.len() as u32);
        let parent = stack.last().copied().or(root);
        symbols.push(Symbol::new(
            abbrev.tag,
            Some(die_offset),
            cu_index,
            parent,
            attrs,
        ));
        offset_index.insert(die_offset, id);

        if let Some(p) = parent {
            symbols[p.index()].children.push(id);
        }
        if root.is_none() {
            root = Some(id);
        }
        if abbrev.has_children {
            stack.push(id);
        }
    }

    let root = root.ok_or(Error::TruncatedSection)?;

    // Synthesize the unit's void type and make it the root's first child.
    // Pointers and typedefs without an explicit type get wired to it later.
    let void = SymbolId(symbols.len() as u32);
    let mut void_attrs = HashMap::with_capacity(2);
    void_attrs.insert(DW_AT_name, AttrValue::String("void".into()));
    void_attrs.insert(DW_AT_byte_size, AttrValue::Const(0));
    symbols.push(Symbol::new(
        DW_TAG_base_type,
        None,
        cu_index,
        Some(root),
        void_attrs,
    ));
    symbols[root.index()].children.insert(0, void);

    Ok(Unit {
        header: *header,
        root,
        void,
    })
}

/// Reads one attribute value according to its form.
///
/// Address-form values are run through the normalizer right here, which is
/// the single point where they materialize.
fn read_value<'data>(
    reader: &mut Reader<'data>,
    form: DwForm,
    header: &UnitHeader,
    debug_str: &'data [u8],
    normalizer: &AddressNormalizer,
) -> Result<AttrValue<'data>> {
    Ok(match form {
        DW_FORM_addr => AttrValue::Addr(normalizer(reader.ulong(header.address_size)?)),

        DW_FORM_data1 => AttrValue::Const(reader.u8()? as u64),
        DW_FORM_data2 => AttrValue::Const(reader.u16()? as u64),
        DW_FORM_data4 => AttrValue::Const(reader.u32()? as u64),
        DW_FORM_data8 => AttrValue::Const(reader.u64()?),
        DW_FORM_udata => AttrValue::Const(reader.uleb128()?),
        DW_FORM_sdata => AttrValue::Const(reader.sleb128()? as u64),

        DW_FORM_block1 => {
            let n = reader.u8()? as usize;
            AttrValue::Block(reader.block(n)?)
        }
        DW_FORM_block2 => {
            let n = reader.u16()? as usize;
            AttrValue::Block(reader.block(n)?)
        }
        DW_FORM_block4 => {
            let n = reader.u32()? as usize;
            AttrValue::Block(reader.block(n)?)
        }
        DW_FORM_block => {
            let n = reader.uleb128()? as usize;
            AttrValue::Block(reader.block(n)?)
        }
        DW_FORM_exprloc => {
            let n = reader.uleb128()? as usize;
            AttrValue::ExprLoc(reader.block(n)?)
        }

        DW_FORM_string => AttrValue::String(String::from_utf8_lossy(reader.cstr()?)),
        DW_FORM_strp => {
            let off = reader.offset(header.is_64)?;
            AttrValue::String(String::from_utf8_lossy(str_at(debug_str, off)?))
        }

        DW_FORM_flag => AttrValue::Flag(reader.u8()? != 0),
        DW_FORM_flag_present => AttrValue::Flag(true),

        // Unit-relative references become absolute .debug_info offsets.
        DW_FORM_ref1 => AttrValue::Ref(header.offset + reader.u8()? as u64),
        DW_FORM_ref2 => AttrValue::Ref(header.offset + reader.u16()? as u64),
        DW_FORM_ref4 => AttrValue::Ref(header.offset + reader.u32()? as u64),
        DW_FORM_ref8 => AttrValue::Ref(header.offset + reader.u64()?),
        DW_FORM_ref_udata => AttrValue::Ref(header.offset + reader.uleb128()?),

        // Already absolute. DWARF 2 encoded this with address width, later
        // versions with offset width.
        DW_FORM_ref_addr => {
            let v = if header.version == 2 {
                reader.ulong(header.address_size)?
            } else {
                reader.offset(header.is_64)?
            };
            AttrValue::Ref(v)
        }

        DW_FORM_sec_offset => AttrValue::SecOffset(reader.offset(header.is_64)?),

        // Type-unit signature; we don't read .debug_types, so the value is
        // consumed but unusable.
        DW_FORM_ref_sig8 => {
            reader.u64()?;
            AttrValue::Invalid
        }

        DW_FORM_indirect => {
            let actual = DwForm(reader.uleb128()? as u16);
            if actual == DW_FORM_indirect {
                return Err(Error::UnknownForm(actual));
            }
            read_value(reader, actual, header, debug_str, normalizer)?
        }

        other => return Err(Error::UnknownForm(other)),
    })
}
