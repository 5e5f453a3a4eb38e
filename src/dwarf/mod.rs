// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The DWARF v2-v4 decoder.
//!
//! [`Database::parse`] consumes the raw section slices of one executable and
//! produces the immutable symbol graph everything else queries. Parsing is
//! deliberately forgiving: a malformed compilation unit is rolled back and
//! recorded as a [`Diagnostic`], never a session-level failure.
//!
//! The decode pipeline, bottom up: [`reader`] (byte cursor), [`abbrev`]
//! (per-unit DIE schemas), [`unit`] (the DIE loop), [`line`] (line-number
//! programs), [`expr`] (location expressions) and [`aranges`] (the
//! address→unit index). Post-parse passes resolve cross references, inject
//! the synthetic void type and apply specification merges, in that order.

pub mod consts;
pub mod expr;
pub mod line;

mod abbrev;
mod aranges;
mod reader;
mod symbol;
#[cfg(test)]
pub(crate) mod testenc;
mod unit;

pub use symbol::{AttrValue, Symbol, SymbolId};
pub use unit::{Unit, UnitHeader};

use consts::*;
use fallible_iterator::FallibleIterator;
use line::LineTable;
use reader::Reader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during DWARF decoding.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Initial-length field holds the reserved value {0:#010x}")]
    MalformedLength(u64),

    #[error("Attribute uses unknown form {0:?}")]
    UnknownForm(DwForm),

    #[error("Unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("Read past the end of the section")]
    TruncatedSection,

    #[error("DIE uses undeclared abbreviation code {0}")]
    UnknownAbbrev(u64),

    #[error("DWARF version {0} is not supported")]
    UnsupportedVersion(u16),

    #[error("Reference to offset {0:#x} does not resolve to a symbol")]
    UnresolvedReference(u64),

    #[error("Location expression outside the supported subset")]
    UnsupportedExpression,

    #[error("No type named `{0}`")]
    UnknownType(String),

    #[error("No line information for the address")]
    NoLineInfo,

    #[error("cancelled")]
    Cancelled,
}

/// The named DWARF sections of one executable, as plain byte slices.
///
/// Missing sections are represented by empty slices. Use
/// [`crate::objfile::DwarfData::borrow`] to fill this from an ELF file, or
/// populate the fields directly when the bytes come from elsewhere (a core
/// dump, a remote debugging stub).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sections<'data> {
    /// `.debug_info`.
    pub debug_info: &'data [u8],
    /// `.debug_abbrev`.
    pub debug_abbrev: &'data [u8],
    /// `.debug_str`.
    pub debug_str: &'data [u8],
    /// `.debug_line`.
    pub debug_line: &'data [u8],
    /// `.debug_ranges`.
    pub debug_ranges: &'data [u8],
    /// `.debug_loc`.
    pub debug_loc: &'data [u8],
    /// `.debug_aranges`.
    pub debug_aranges: &'data [u8],
}

/// Converts raw DWARF addresses into the space the caller queries in,
/// typically by subtracting the image base.
///
/// The parser runs every materialized address through this exactly once.
pub type AddressNormalizer = dyn Fn(u64) -> u64 + Send + Sync;

/// Cooperative cancellation flag for a parse session.
///
/// Checked between units and between DIEs; on cancellation the units parsed
/// so far are kept and a `cancelled` diagnostic is recorded.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A non-fatal problem encountered during parsing.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Offset of the affected unit within `.debug_info`, when attributable.
    pub unit_offset: Option<u64>,
    /// What went wrong.
    pub error: Error,
}

/// A function's address range, for the sorted function index.
#[derive(Debug, Clone, Copy)]
struct FuncEntry {
    lo: u64,
    hi: u64,
    sym: SymbolId,
}

/// The parsed debug database of one executable.
///
/// Immutable once [`Database::parse`] returns, and safe to share across
/// threads. The arena of symbols, the per-unit line tables and the address
/// indices all live here; everything hands out borrowed views.
pub struct Database<'data> {
    sections: Sections<'data>,
    units: Vec<Unit>,
    symbols: Vec<Symbol<'data>>,
    line_tables: Vec<Option<LineTable>>,
    addr_index: aranges::AddrIndex,
    functions: Vec<FuncEntry>,
    diagnostics: Vec<Diagnostic>,
}

impl<'data> Database<'data> {
    /// Parses the given sections into a symbol graph.
    ///
    /// Never fails as a whole: problems are recorded as [`Diagnostic`]s and
    /// the affected unit is dropped. `normalizer` converts every address the
    /// database stores; pass `&|a| a` when no rebasing is wanted.
    pub fn parse(
        sections: Sections<'data>,
        normalizer: &AddressNormalizer,
        cancel: &CancelToken,
    ) -> Self {
        let mut diagnostics = Vec::new();

        // Collect all unit headers up front. Header lengths chain the units
        // together, so a bad header ends the scan while a merely unsupported
        // unit is skipped.
        let mut headers = Vec::new();
        let mut header_iter = UnitHeaders {
            reader: Reader::new(sections.debug_info),
        };
        loop {
            match header_iter.next() {
                Ok(Some(header)) => headers.push(header),
                Ok(None) => break,
                Err(error @ Error::UnsupportedVersion(_)) => {
                    diagnostics.push(Diagnostic {
                        unit_offset: None,
                        error,
                    });
                }
                Err(error) => {
                    diagnostics.push(Diagnostic {
                        unit_offset: None,
                        error,
                    });
                    break;
                }
            }
        }

        // The DIE loop, one unit at a time. A failed unit is rolled back
        // wholesale so the arena never holds half-parsed trees.
        let mut symbols: Vec<Symbol<'data>> = Vec::new();
        let mut units: Vec<Unit> = Vec::new();
        let mut offset_index: HashMap<u64, SymbolId> = HashMap::new();

        for header in &headers {
            if cancel.is_cancelled() {
                diagnostics.push(Diagnostic {
                    unit_offset: Some(header.offset),
                    error: Error::Cancelled,
                });
                break;
            }

            let checkpoint = symbols.len();
            match unit::parse_unit(
                &sections,
                header,
                units.len() as u32,
                &mut symbols,
                &mut offset_index,
                normalizer,
                cancel,
            ) {
                Ok(unit) => units.push(unit),
                Err(error) => {
                    crate::debug!("dropping unit at {:#x}: {error}", header.offset);
                    symbols.truncate(checkpoint);
                    offset_index.retain(|_, id| id.index() < checkpoint);
                    let cancelled = error == Error::Cancelled;
                    diagnostics.push(Diagnostic {
                        unit_offset: Some(header.offset),
                        error,
                    });
                    if cancelled {
                        break;
                    }
                }
            }
        }

        // Post passes. Reference resolution must come first: the
        // specification merge follows resolved edges.
        resolve_references(&mut symbols, &offset_index);
        inject_void_types(&mut symbols, &units);
        merge_specifications(&mut symbols);

        // Materialize the per-unit line tables.
        let mut line_tables = Vec::with_capacity(units.len());
        for u in &units {
            line_tables.push(match decode_line_table(&sections, u, &symbols, normalizer) {
                Ok(table) => table,
                Err(error) => {
                    diagnostics.push(Diagnostic {
                        unit_offset: Some(u.header.offset),
                        error,
                    });
                    None
                }
            });
        }

        let addr_index = aranges::build(&sections, &units, &symbols, normalizer, &mut diagnostics);
        let functions = build_function_index(&symbols);

        Database {
            sections,
            units,
            symbols,
            line_tables,
            addr_index,
            functions,
            diagnostics,
        }
    }

    /// All successfully parsed units, in section order.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// The symbol arena. Indices correspond to [`SymbolId`] values.
    pub fn symbols(&self) -> &[Symbol<'data>] {
        &self.symbols
    }

    /// Looks up a symbol, validating the handle.
    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol<'data>> {
        self.symbols.get(id.index())
    }

    /// Problems encountered while parsing.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Finds the unit owning a normalized address.
    pub fn unit_for_address(&self, addr: u64) -> Option<&Unit> {
        self.units.get(self.addr_index.unit_for(addr)? as usize)
    }

    /// The line table of a unit, if one was decoded.
    pub fn line_table(&self, unit_index: u32) -> Option<&LineTable> {
        self.line_tables.get(unit_index as usize)?.as_ref()
    }

    /// Resolves an address to `(file, line, row address)`.
    pub fn line_for_address(&self, addr: u64) -> Result<(&str, u32, u64)> {
        let unit_index = self.addr_index.unit_for(addr).ok_or(Error::NoLineInfo)?;
        let table = self.line_table(unit_index).ok_or(Error::NoLineInfo)?;
        let row = table.row_for(addr).ok_or(Error::NoLineInfo)?;
        let file = table.file_name(row.file).unwrap_or("");
        Ok((file, row.line, row.address))
    }

    /// Finds the function containing a normalized address.
    ///
    /// Returns the symbol and the function's entry address.
    pub fn function_for_address(&self, addr: u64) -> Option<(SymbolId, u64)> {
        let idx = self.functions.partition_point(|f| f.lo <= addr);
        let entry = self.functions[..idx].last()?;
        (addr < entry.hi).then_some((entry.sym, entry.lo))
    }

    /// Picks the `.debug_loc` list entry covering `pc`.
    ///
    /// `offset` is the section offset from a `DW_AT_location` in
    /// section-offset form. Returns the expression block of the matching
    /// entry, or `None` when no entry covers the address (or the list uses
    /// features we don't model, like base-address switching).
    pub(crate) fn loclist_expr(&self, unit: &Unit, offset: u64, pc: u64) -> Option<&'data [u8]> {
        let address_size = unit.header.address_size;
        let base = match self.symbols[unit.root.index()].attr(DW_AT_low_pc) {
            Some(&AttrValue::Addr(a)) => a,
            _ => 0,
        };
        let max = match address_size {
            4 => u32::MAX as u64,
            _ => u64::MAX,
        };

        let mut r = Reader::new_at(self.sections.debug_loc, offset as usize).ok()?;
        loop {
            let begin = r.ulong(address_size).ok()?;
            let end = r.ulong(address_size).ok()?;
            if begin == 0 && end == 0 {
                return None;
            }
            if begin == max {
                // Base-address selection: the raw link address cannot be
                // normalized this late, so the rest of the list is opaque.
                crate::debug!("location list at {offset:#x} switches base address");
                return None;
            }

            let len = r.u16().ok()? as usize;
            let block = r.block(len).ok()?;
            if (base.wrapping_add(begin)..base.wrapping_add(end)).contains(&pc) {
                return Some(block);
            }
        }
    }
}

impl std::fmt::Debug for Database<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Database({} units, {} symbols, {} diagnostics)",
            self.units.len(),
            self.symbols.len(),
            self.diagnostics.len()
        )
    }
}

/// Iterator over the unit headers of `.debug_info`.
struct UnitHeaders<'data> {
    reader: Reader<'data>,
}

impl<'data> FallibleIterator for UnitHeaders<'data> {
    type Item = UnitHeader;
    type Error = Error;

    fn next(&mut self) -> Result<Option<UnitHeader>> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        UnitHeader::read(&mut self.reader).map(Some)
    }
}

/// Pass 1: reference resolution.
///
/// Every `Ref` pointing into a parsed unit becomes a `ResolvedRef`; the rest
/// stay as they are and read as absent.
fn resolve_references(symbols: &mut [Symbol<'_>], offset_index: &HashMap<u64, SymbolId>) {
    for sym in symbols.iter_mut() {
        for (_, value) in sym.attrs_mut() {
            if let AttrValue::Ref(offset) = value {
                if let Some(&target) = offset_index.get(offset) {
                    *value = AttrValue::ResolvedRef(target);
                }
            }
        }
    }
}

/// Pass 1b: pointers and typedefs without an explicit type mean `void`;
/// wire them to their unit's synthetic void symbol.
fn inject_void_types(symbols: &mut [Symbol<'_>], units: &[Unit]) {
    for idx in 0..symbols.len() {
        let sym = &symbols[idx];
        if sym.tag != DW_TAG_pointer_type && sym.tag != DW_TAG_typedef {
            continue;
        }
        if sym.attr(DW_AT_type).is_some() {
            continue;
        }
        let void = units[sym.unit as usize].void;
        symbols[idx].set_attr(DW_AT_type, AttrValue::ResolvedRef(void));
    }
}

/// Pass 2: specification merging.
///
/// A DIE carrying `DW_AT_specification` completes the declaration it points
/// at: its attributes (except the specification edge itself) are copied onto
/// the referent, overwriting. Running the pass again is a no-op.
fn merge_specifications(symbols: &mut [Symbol<'_>]) {
    for idx in 0..symbols.len() {
        let target = match symbols[idx].attr(DW_AT_specification) {
            Some(&AttrValue::ResolvedRef(target)) => target,
            _ => continue,
        };
        if target.index() == idx {
            continue;
        }

        let copied: Vec<_> = symbols[idx]
            .attrs()
            .filter(|(&at, _)| at != DW_AT_specification)
            .map(|(&at, value)| (at, value.clone()))
            .collect();

        for (at, value) in copied {
            symbols[target.index()].set_attr(at, value);
        }
    }
}

/// Decodes a unit's line table, when it has one.
fn decode_line_table(
    sections: &Sections<'_>,
    unit: &Unit,
    symbols: &[Symbol<'_>],
    normalizer: &AddressNormalizer,
) -> Result<Option<LineTable>> {
    let root = &symbols[unit.root.index()];

    let offset = match root.attr(DW_AT_stmt_list) {
        Some(&AttrValue::SecOffset(o)) | Some(&AttrValue::Const(o)) => o,
        _ => return Ok(None),
    };

    let comp_dir = match root.attr(DW_AT_comp_dir) {
        Some(AttrValue::String(s)) => Some(&**s),
        _ => None,
    };

    line::parse(
        sections.debug_line,
        offset,
        unit.header.address_size,
        comp_dir,
        root.name(),
        normalizer,
    )
    .map(Some)
}

/// Builds the sorted function index over all `DW_TAG_subprogram` symbols.
fn build_function_index(symbols: &[Symbol<'_>]) -> Vec<FuncEntry> {
    let mut out = Vec::new();

    for (idx, sym) in symbols.iter().enumerate() {
        if sym.tag != DW_TAG_subprogram {
            continue;
        }
        let lo = match sym.attr(DW_AT_low_pc) {
            Some(&AttrValue::Addr(a)) => a,
            _ => continue,
        };
        let hi = match sym.attr(DW_AT_high_pc) {
            Some(&AttrValue::Addr(a)) => a,
            Some(&AttrValue::Const(len)) => lo.wrapping_add(len),
            _ => continue,
        };
        if lo < hi {
            out.push(FuncEntry {
                lo,
                hi,
                sym: SymbolId(idx as u32),
            });
        }
    }

    out.sort_by_key(|f| f.lo);
    out
}
