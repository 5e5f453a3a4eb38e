// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The address→compilation-unit index.
//!
//! Built once per session from `.debug_aranges`; units the section doesn't
//! cover fall back to the extent recorded on their root DIE (low/high PC or
//! a `.debug_ranges` list).

use super::consts::*;
use super::reader::Reader;
use super::symbol::{AttrValue, Symbol};
use super::unit::Unit;
use super::{AddressNormalizer, Diagnostic, Error, Result, Sections};
use std::collections::{HashMap, HashSet};

/// One address range owned by a unit. Addresses are normalized.
#[derive(Debug, Clone, Copy)]
struct Entry {
    lo: u64,
    hi: u64,
    unit: u32,
}

/// Sorted address→unit index.
#[derive(Debug, Default)]
pub(crate) struct AddrIndex {
    entries: Vec<Entry>,
}

impl AddrIndex {
    /// Finds the unit owning the given normalized address.
    pub fn unit_for(&self, addr: u64) -> Option<u32> {
        let idx = self.entries.partition_point(|e| e.lo <= addr);
        let entry = self.entries[..idx].last()?;
        (addr < entry.hi).then_some(entry.unit)
    }

    /// Number of indexed ranges.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Builds the index. Decode problems are recorded as diagnostics; the index
/// simply ends up with fewer entries.
pub(crate) fn build(
    sections: &Sections<'_>,
    units: &[Unit],
    symbols: &[Symbol<'_>],
    normalizer: &AddressNormalizer,
    diagnostics: &mut Vec<Diagnostic>,
) -> AddrIndex {
    let by_info_offset: HashMap<u64, u32> = units
        .iter()
        .enumerate()
        .map(|(i, u)| (u.header.offset, i as u32))
        .collect();

    let mut entries = Vec::new();
    let mut covered: HashSet<u32> = HashSet::new();

    let mut r = Reader::new(sections.debug_aranges);
    while !r.is_empty() {
        match parse_set(&mut r, &by_info_offset, normalizer, &mut entries, &mut covered) {
            Ok(()) => {}
            Err(e) => {
                diagnostics.push(Diagnostic {
                    unit_offset: None,
                    error: e,
                });
                break;
            }
        }
    }

    // Units .debug_aranges does not describe get their root extent instead.
    for (idx, unit) in units.iter().enumerate() {
        let idx = idx as u32;
        if covered.contains(&idx) {
            continue;
        }

        let root = &symbols[unit.root.index()];
        match root_extent(sections, unit, root) {
            Some((lo, hi)) if lo < hi => entries.push(Entry { lo, hi, unit: idx }),
            _ => crate::debug!("no address extent for unit at {:#x}", unit.header.offset),
        }
    }

    entries.sort_by_key(|e| e.lo);

    AddrIndex { entries }
}

/// Parses one `.debug_aranges` set, appending its tuples.
fn parse_set(
    r: &mut Reader<'_>,
    by_info_offset: &HashMap<u64, u32>,
    normalizer: &AddressNormalizer,
    entries: &mut Vec<Entry>,
    covered: &mut HashSet<u32>,
) -> Result<()> {
    let set_start = r.pos();
    let (length, is_64) = r.initial_length()?;
    let end = r
        .pos()
        .checked_add(length as usize)
        .ok_or(Error::MalformedLength(length))?;

    let version = r.u16()?;
    let info_offset = r.offset(is_64)?;
    let address_size = r.u8()?;
    let segment_size = r.u8()?;

    // Segmented address spaces never materialized; skip such sets whole.
    if version != 2 || segment_size != 0 || (address_size != 4 && address_size != 8) {
        crate::debug!("skipping aranges set with version {version}");
        return r.seek(end);
    }

    // Tuples are aligned to twice the address size, relative to the set.
    let tuple = 2 * address_size as usize;
    let misalign = (r.pos() - set_start) % tuple;
    if misalign != 0 {
        r.skip(tuple - misalign)?;
    }

    let unit = by_info_offset.get(&info_offset).copied();

    while r.pos() < end {
        let addr = r.ulong(address_size)?;
        let len = r.ulong(address_size)?;
        if addr == 0 && len == 0 {
            break;
        }

        if let Some(unit) = unit {
            let lo = normalizer(addr);
            entries.push(Entry {
                lo,
                hi: lo.wrapping_add(len),
                unit,
            });
            covered.insert(unit);
        }
    }

    r.seek(end)
}

/// Determines a unit's address extent from its root DIE.
fn root_extent(sections: &Sections<'_>, unit: &Unit, root: &Symbol<'_>) -> Option<(u64, u64)> {
    let low = match root.attr(DW_AT_low_pc) {
        Some(&AttrValue::Addr(a)) => Some(a),
        _ => None,
    };

    if let Some(lo) = low {
        let hi = match root.attr(DW_AT_high_pc) {
            // DWARF 4 allows high_pc to be a length instead of an address.
            Some(&AttrValue::Addr(a)) => Some(a),
            Some(&AttrValue::Const(len)) => Some(lo.wrapping_add(len)),
            _ => None,
        };
        if let Some(hi) = hi {
            return Some((lo, hi));
        }
    }

    // No classic extent: try a range list. Entry offsets are relative to the
    // unit's base address, so the already-normalized low PC works as base.
    if let Some(&AttrValue::SecOffset(off)) = root.attr(DW_AT_ranges) {
        return range_list_extent(
            sections.debug_ranges,
            off,
            unit.header.address_size,
            low.unwrap_or(0),
        );
    }

    None
}

/// Computes the covering extent of a DWARF ≤4 `.debug_ranges` list.
fn range_list_extent(
    debug_ranges: &[u8],
    offset: u64,
    address_size: u8,
    base: u64,
) -> Option<(u64, u64)> {
    let mut r = Reader::new_at(debug_ranges, offset as usize).ok()?;
    let max = match address_size {
        4 => u32::MAX as u64,
        _ => u64::MAX,
    };

    let mut lo = u64::MAX;
    let mut hi = 0u64;

    loop {
        let begin = r.ulong(address_size).ok()?;
        let end = r.ulong(address_size).ok()?;

        if begin == 0 && end == 0 {
            break;
        }

        // A base-address-selection entry carries a raw link address that we
        // can no longer normalize at this point; bail out on what we have.
        if begin == max {
            crate::debug!("range list at {offset:#x} switches base address");
            break;
        }

        lo = lo.min(base.wrapping_add(begin));
        hi = hi.max(base.wrapping_add(end));
    }

    (lo < hi).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::symbol::SymbolId;
    use crate::dwarf::testenc::{sections, Enc};
    use crate::dwarf::unit::UnitHeader;

    fn fake_unit(info_offset: u64, root: u32) -> Unit {
        Unit {
            header: UnitHeader {
                offset: info_offset,
                end: info_offset + 0x40,
                die_start: info_offset + 11,
                version: 4,
                is_64: false,
                address_size: 8,
                abbrev_offset: 0,
            },
            root: SymbolId(root),
            void: SymbolId(root + 1),
        }
    }

    fn root_symbol(attrs: &[(DwAt, AttrValue<'static>)]) -> Symbol<'static> {
        let map = attrs.iter().cloned().collect();
        Symbol::new(DW_TAG_compile_unit, Some(11), 0, None, map)
    }

    fn void_symbol() -> Symbol<'static> {
        Symbol::new(DW_TAG_base_type, None, 0, Some(SymbolId(0)), HashMap::new())
    }

    #[test]
    fn explicit_aranges() {
        // One set: version 2, info offset 0, 8-byte addresses.
        let mut e = Enc::new();
        let body_len = 2 + 4 + 1 + 1 + 4 /* pad */ + 16 * 3;
        e.u32(body_len as u32);
        e.u16(2);
        e.u32(0); // .debug_info offset
        e.u8(8).u8(0);
        e.bytes(&[0; 4]); // alignment padding
        e.u64(0x40_1000).u64(0x100);
        e.u64(0x40_2000).u64(0x80);
        e.u64(0).u64(0); // terminator

        let info = [0u8; 0];
        let mut secs = sections(&info, &[]);
        secs.debug_aranges = &e.0;

        let units = vec![fake_unit(0, 0)];
        let symbols = vec![root_symbol(&[]), void_symbol()];
        let mut diags = Vec::new();

        let index = build(&secs, &units, &symbols, &|a| a - 0x40_0000, &mut diags);
        assert!(diags.is_empty());
        assert_eq!(index.len(), 2);
        assert_eq!(index.unit_for(0x1000), Some(0));
        assert_eq!(index.unit_for(0x10ff), Some(0));
        assert_eq!(index.unit_for(0x1100), None);
        assert_eq!(index.unit_for(0x2040), Some(0));
        assert_eq!(index.unit_for(0x0fff), None);
    }

    #[test]
    fn fallback_low_high_pc() {
        let secs = sections(&[], &[]);
        let units = vec![fake_unit(0, 0)];
        let symbols = vec![
            root_symbol(&[
                (DW_AT_low_pc, AttrValue::Addr(0x500)),
                (DW_AT_high_pc, AttrValue::Const(0x100)), // length form
            ]),
            void_symbol(),
        ];
        let mut diags = Vec::new();

        let index = build(&secs, &units, &symbols, &|a| a, &mut diags);
        assert_eq!(index.unit_for(0x500), Some(0));
        assert_eq!(index.unit_for(0x5ff), Some(0));
        assert_eq!(index.unit_for(0x600), None);
    }

    #[test]
    fn fallback_range_list() {
        let mut ranges = Enc::new();
        ranges.u64(0x10).u64(0x20); // base-relative [0x110, 0x120)
        ranges.u64(0x40).u64(0x48);
        ranges.u64(0).u64(0);

        let mut secs = sections(&[], &[]);
        secs.debug_ranges = &ranges.0;

        let units = vec![fake_unit(0, 0)];
        let symbols = vec![
            root_symbol(&[
                (DW_AT_low_pc, AttrValue::Addr(0x100)),
                (DW_AT_ranges, AttrValue::SecOffset(0)),
            ]),
            void_symbol(),
        ];
        let mut diags = Vec::new();

        let index = build(&secs, &units, &symbols, &|a| a, &mut diags);
        // The covering extent is [0x110, 0x148).
        assert_eq!(index.unit_for(0x110), Some(0));
        assert_eq!(index.unit_for(0x147), Some(0));
        assert_eq!(index.unit_for(0x148), None);
    }

    #[test]
    fn malformed_set_is_diagnosed() {
        let mut e = Enc::new();
        e.u32(0xffff_fff2); // reserved initial length
        let mut secs = sections(&[], &[]);
        secs.debug_aranges = &e.0;

        let mut diags = Vec::new();
        let index = build(&secs, &[], &[], &|a| a, &mut diags);
        assert_eq!(index.len(), 0);
        assert_eq!(diags.len(), 1);
    }
}
