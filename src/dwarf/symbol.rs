// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The in-memory symbol model.
//!
//! Symbols (DIEs) live in one arena owned by the parse session; all edges
//! between them are [`SymbolId`] handles into that arena. This sidesteps the
//! ownership knots a literal object graph would create: type references form
//! cycles (a struct holding a pointer to itself) and specification merges
//! alias nodes.

use super::consts::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Dense handle of a symbol within its parse session.
///
/// Ids are assigned in DIE traversal order and double as the opaque type
/// tokens the provider facade hands out.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    /// Index into the session's symbol arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw token value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym#{}", self.0)
    }
}

/// Decoded value of one DIE attribute.
///
/// The set of arms is closed: it covers the DWARF 2-4 form families and the
/// two post-processing states (`ResolvedRef`, `Invalid`). Consumers match
/// exhaustively instead of downcasting.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue<'data> {
    /// A target address, already run through the session's normalizer.
    Addr(u64),
    /// An integer constant. Signed constants are stored two's-complement.
    Const(u64),
    /// An uninterpreted byte block.
    Block(&'data [u8]),
    /// An inline or `.debug_str`-resident string.
    String(Cow<'data, str>),
    /// A boolean flag.
    Flag(bool),
    /// A not-yet-resolved reference: absolute offset into `.debug_info`.
    Ref(u64),
    /// A reference resolved against the session's symbol index.
    ResolvedRef(SymbolId),
    /// A DWARF expression block.
    ExprLoc(&'data [u8]),
    /// An offset into some other debug section.
    SecOffset(u64),
    /// Value could not be interpreted (e.g. a `.debug_types` signature).
    Invalid,
}

impl<'data> AttrValue<'data> {
    /// The constant value, if this is a constant.
    pub fn as_const(&self) -> Option<u64> {
        match *self {
            AttrValue::Const(v) => Some(v),
            _ => None,
        }
    }

    /// The resolved reference target, if this is one.
    pub fn as_ref_sym(&self) -> Option<SymbolId> {
        match *self {
            AttrValue::ResolvedRef(id) => Some(id),
            _ => None,
        }
    }
}

/// One debug information entry.
pub struct Symbol<'data> {
    /// The DIE tag.
    pub tag: DwTag,
    /// Absolute offset within `.debug_info`; `None` for synthetic symbols.
    pub offset: Option<u64>,
    /// Owning compilation unit, as an index into the session's unit list.
    pub unit: u32,
    /// Parent edge; `None` only for CU roots.
    pub parent: Option<SymbolId>,
    /// Children in source order.
    pub children: Vec<SymbolId>,
    attrs: HashMap<DwAt, AttrValue<'data>>,
}

impl<'data> Symbol<'data> {
    pub(crate) fn new(
        tag: DwTag,
        offset: Option<u64>,
        unit: u32,
        parent: Option<SymbolId>,
        attrs: HashMap<DwAt, AttrValue<'data>>,
    ) -> Self {
        Self {
            tag,
            offset,
            unit,
            parent,
            children: Vec::new(),
            attrs,
        }
    }

    /// Looks up an attribute value.
    pub fn attr(&self, at: DwAt) -> Option<&AttrValue<'data>> {
        self.attrs.get(&at)
    }

    /// Iterates over all attributes.
    pub fn attrs(&self) -> impl Iterator<Item = (&DwAt, &AttrValue<'data>)> {
        self.attrs.iter()
    }

    /// Mutable iteration, for the post-processing passes.
    pub(crate) fn attrs_mut(&mut self) -> impl Iterator<Item = (&DwAt, &mut AttrValue<'data>)> {
        self.attrs.iter_mut()
    }

    /// Inserts or overwrites an attribute.
    pub(crate) fn set_attr(&mut self, at: DwAt, value: AttrValue<'data>) {
        self.attrs.insert(at, value);
    }

    /// The `DW_AT_name` string, if present.
    pub fn name(&self) -> Option<&str> {
        match self.attr(DW_AT_name)? {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The mangled linkage name, preferring `DW_AT_linkage_name`.
    pub fn linkage_name(&self) -> Option<&str> {
        let value = self
            .attr(DW_AT_linkage_name)
            .or_else(|| self.attr(DW_AT_MIPS_linkage_name))?;
        match value {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The resolved `DW_AT_type` edge, if present.
    pub fn type_ref(&self) -> Option<SymbolId> {
        self.attr(DW_AT_type)?.as_ref_sym()
    }

    /// The constant value of an attribute, if present and constant.
    pub fn const_attr(&self, at: DwAt) -> Option<u64> {
        self.attr(at)?.as_const()
    }

    /// Whether a flag attribute is present and set.
    pub fn flag(&self, at: DwAt) -> bool {
        matches!(self.attr(at), Some(AttrValue::Flag(true)))
    }
}

impl fmt::Debug for Symbol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Symbol({:?} \"{}\" @ {})",
            self.tag,
            self.name().unwrap_or(""),
            match self.offset {
                Some(o) => format!("{o:#x}"),
                None => "synthetic".into(),
            }
        )
    }
}
